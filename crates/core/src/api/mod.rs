//! Marketplace REST client.

mod error;
mod http;

pub use error::ApiError;
pub use http::HttpApi;

use async_trait::async_trait;

use crate::models::{
    AuthResponse, Credentials, Listing, ListingDraft, Page, PageQuery, Registration, UploadFile,
    UploadedFile,
};

/// Operations offered by the marketplace service.
///
/// The session store, feed controller and listing editor only see this
/// trait, so they can run against [`HttpApi`] or an in-memory double.
#[async_trait]
pub trait MarketplaceApi: Send + Sync {
    /// Exchange credentials for an identity and bearer credential.
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError>;

    /// Create an account and sign into it.
    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError>;

    /// Invalidate the current credential server-side.
    async fn logout(&self) -> Result<(), ApiError>;

    /// Whether an account already exists for `email`.
    async fn check_email(&self, email: &str) -> Result<bool, ApiError>;

    /// Fetch one page of listings.
    async fn list_listings(&self, query: PageQuery) -> Result<Page<Listing>, ApiError>;

    async fn get_listing(&self, id: &str) -> Result<Listing, ApiError>;

    async fn create_listing(&self, draft: &ListingDraft) -> Result<Listing, ApiError>;

    async fn update_listing(&self, id: &str, draft: &ListingDraft) -> Result<Listing, ApiError>;

    async fn delete_listing(&self, id: &str) -> Result<(), ApiError>;

    /// Upload a batch of files, returning one URI per file in input order.
    async fn upload_files(&self, files: Vec<UploadFile>) -> Result<Vec<UploadedFile>, ApiError>;
}
