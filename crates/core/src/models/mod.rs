//! Shared domain models and wire schemas.

#![allow(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};

/// Authenticated identity as returned by the marketplace service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// Service-assigned identifier.
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    /// Sign-in email address.
    pub email: String,
    /// Display name, at least first and last name.
    pub full_name: String,
    /// Account creation time, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

/// A car listing in the feed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Listing {
    /// Service-assigned identifier.
    #[serde(rename = "_id", alias = "id")]
    pub id: String,
    /// Identifier of the owning user. The service sends either the embedded
    /// user document or its bare id.
    #[serde(
        rename = "user",
        default,
        deserialize_with = "deserialize_owner",
        skip_serializing_if = "Option::is_none"
    )]
    pub owner_id: Option<String>,
    /// Manufacturer.
    pub brand: String,
    /// Model name.
    pub model: String,
    /// Asking price in whole currency units.
    pub price: u64,
    /// URI of the main photo.
    #[serde(default)]
    pub main_photo: String,
    /// Additional photo URIs in display order.
    #[serde(default)]
    pub additional_photos: Vec<String>,
    /// Creation time, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    /// Last update time, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl Listing {
    /// Returns a user-facing label combining brand and model.
    pub fn display_name(&self) -> String {
        format!("{} {}", self.brand, self.model)
    }

    /// Whether the given identity may edit or delete this listing.
    pub fn is_owned_by(&self, user: Option<&User>) -> bool {
        match (user, self.owner_id.as_deref()) {
            (Some(user), Some(owner)) => user.id == owner,
            _ => false,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OwnerRef {
    Id(String),
    Embedded {
        #[serde(rename = "_id", alias = "id")]
        id: String,
    },
}

fn deserialize_owner<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let owner = Option::<OwnerRef>::deserialize(deserializer)?;
    Ok(owner.map(|owner| match owner {
        OwnerRef::Id(id) | OwnerRef::Embedded { id } => id,
    }))
}

/// Listing fields sent on create and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListingDraft {
    pub brand: String,
    pub model: String,
    pub price: u64,
    pub main_photo: String,
    pub additional_photos: Vec<String>,
}

/// One page of a paginated collection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    /// Items on this page, in server order.
    pub docs: Vec<T>,
    #[serde(default)]
    pub total_docs: u64,
    #[serde(default)]
    pub limit: u32,
    #[serde(default = "first_page")]
    pub page: u32,
    #[serde(default)]
    pub total_pages: u32,
    #[serde(default)]
    pub has_next_page: bool,
    #[serde(default)]
    pub has_prev_page: bool,
}

fn first_page() -> u32 {
    1
}

/// Query body for the paginated listing endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub page_number: u32,
    pub page_size: u32,
}

/// Result of a single file in a batch upload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedFile {
    pub file_name: String,
    #[serde(rename = "type", default)]
    pub content_type: String,
    pub url: String,
}

/// A local file ready to be sent in a multipart upload.
#[derive(Debug, Clone)]
pub struct UploadFile {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

impl UploadFile {
    /// Build an upload from a file name and its contents, inferring the
    /// content type from the extension.
    pub fn new(file_name: impl Into<String>, bytes: Vec<u8>) -> Self {
        let file_name = file_name.into();
        let content_type = content_type_for(&file_name).to_string();
        Self {
            file_name,
            content_type,
            bytes,
        }
    }
}

fn content_type_for(file_name: &str) -> &'static str {
    let extension = file_name
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "svg" => "image/svg+xml",
        _ => "application/octet-stream",
    }
}

/// Sign-in credentials.
#[derive(Debug, Clone, Serialize)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

/// Account registration data.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub full_name: String,
}

/// Identity plus bearer credential returned by login and registration.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthResponse {
    pub user: User,
    pub token: String,
}
