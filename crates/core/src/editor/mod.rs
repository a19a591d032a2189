//! Create/edit form state for a listing.
//!
//! Photos are kept as one ordered sequence of [`PhotoEntry`] values, mixing
//! URIs already stored on the service with local files awaiting upload. On
//! submit the main photo file (if any) is uploaded alone, then all pending
//! additional files go up as one batch. A failed upload aborts the submit;
//! files that did upload are remembered as stored URIs so a retry does not
//! send them again.

#![allow(missing_docs)]

mod photos;

pub use photos::{MainPhoto, PendingPhoto, PhotoEntry, PreviewHandle, PreviewRegistry};

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    api::{ApiError, MarketplaceApi},
    models::{Listing, ListingDraft, UploadFile},
    validation::{self, ValidationError},
};

/// Failure of [`ListingEditor::submit`].
#[derive(Debug, Error)]
pub enum EditorError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to read {}: {source}", path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("photo upload failed: {0}")]
    Upload(#[source] ApiError),
    #[error("upload returned {returned} URIs for {expected} files")]
    UploadMismatch { expected: usize, returned: usize },
    #[error("failed to save listing: {0}")]
    Api(#[from] ApiError),
}

impl EditorError {
    /// Whether the session was rejected during submit.
    pub fn is_unauthorized(&self) -> bool {
        match self {
            Self::Upload(err) | Self::Api(err) => err.is_unauthorized(),
            _ => false,
        }
    }
}

/// Text fields after validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedFields {
    pub brand: String,
    pub model: String,
    pub price: u64,
}

/// Form state for creating or editing one listing.
#[derive(Debug)]
pub struct ListingEditor {
    listing_id: Option<String>,
    brand: String,
    model: String,
    price: String,
    main_photo: MainPhoto,
    photos: Vec<PhotoEntry>,
    registry: PreviewRegistry,
}

impl ListingEditor {
    /// Empty form for a new listing.
    pub fn new(registry: PreviewRegistry) -> Self {
        Self {
            listing_id: None,
            brand: String::new(),
            model: String::new(),
            price: String::new(),
            main_photo: MainPhoto::Empty,
            photos: Vec::new(),
            registry,
        }
    }

    /// Form seeded from an existing listing; submit updates it.
    pub fn from_listing(listing: &Listing, registry: PreviewRegistry) -> Self {
        let main_photo = if listing.main_photo.trim().is_empty() {
            MainPhoto::Empty
        } else {
            MainPhoto::Url(listing.main_photo.clone())
        };
        Self {
            listing_id: Some(listing.id.clone()),
            brand: listing.brand.clone(),
            model: listing.model.clone(),
            price: listing.price.to_string(),
            main_photo,
            photos: listing
                .additional_photos
                .iter()
                .cloned()
                .map(PhotoEntry::Persisted)
                .collect(),
            registry,
        }
    }

    pub fn listing_id(&self) -> Option<&str> {
        self.listing_id.as_deref()
    }

    pub fn is_editing(&self) -> bool {
        self.listing_id.is_some()
    }

    pub fn brand(&self) -> &str {
        &self.brand
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Price exactly as typed.
    pub fn price_input(&self) -> &str {
        &self.price
    }

    pub fn set_brand(&mut self, brand: &str) {
        self.brand = brand.to_string();
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    pub fn set_price(&mut self, price: &str) {
        self.price = price.to_string();
    }

    pub fn main_photo(&self) -> &MainPhoto {
        &self.main_photo
    }

    /// Select a local file as the main photo, replacing (and revoking) any
    /// previous selection.
    pub fn set_main_photo_file(&mut self, path: impl Into<PathBuf>) {
        self.main_photo = MainPhoto::File(PendingPhoto::new(path.into(), &self.registry));
    }

    pub fn set_main_photo_url(&mut self, url: &str) -> Result<(), ValidationError> {
        let url = validation::validate_photo_url(url)?;
        self.main_photo = MainPhoto::Url(url);
        Ok(())
    }

    pub fn clear_main_photo(&mut self) {
        self.main_photo = MainPhoto::Empty;
    }

    /// Additional photos in display order.
    pub fn photos(&self) -> &[PhotoEntry] {
        &self.photos
    }

    pub fn pending_count(&self) -> usize {
        self.photos.iter().filter(|entry| entry.is_pending()).count()
    }

    /// Append local files, each with a fresh preview.
    pub fn add_photo_files<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: Into<PathBuf>,
    {
        for path in paths {
            let pending = PendingPhoto::new(path.into(), &self.registry);
            self.photos.push(PhotoEntry::Pending(pending));
        }
    }

    /// Append comma-separated photo URLs. Nothing is added unless every
    /// entry is valid.
    pub fn add_photo_urls(&mut self, input: &str) -> Result<usize, ValidationError> {
        let urls = input
            .split(',')
            .map(str::trim)
            .filter(|url| !url.is_empty())
            .map(validation::validate_photo_url)
            .collect::<Result<Vec<_>, _>>()?;
        let added = urls.len();
        self.photos
            .extend(urls.into_iter().map(PhotoEntry::Persisted));
        Ok(added)
    }

    /// Remove the photo at `index`. A pending file's preview is revoked.
    pub fn remove_photo(&mut self, index: usize) -> bool {
        if index >= self.photos.len() {
            return false;
        }
        let removed = self.photos.remove(index);
        if let PhotoEntry::Pending(pending) = &removed {
            info!(file = %pending.path().display(), "Pending photo removed");
        }
        true
    }

    /// Check the form without touching the network.
    pub fn validate(&self) -> Result<ValidatedFields, ValidationError> {
        let brand = validation::required("brand", &self.brand)?;
        let model = validation::required("model", &self.model)?;
        let price = validation::parse_price(&self.price)?;
        if self.main_photo.is_empty() {
            return Err(ValidationError::MissingMainPhoto);
        }
        Ok(ValidatedFields {
            brand,
            model,
            price,
        })
    }

    /// Whether submit should be offered.
    pub fn can_submit(&self) -> bool {
        self.validate().is_ok()
    }

    /// Upload new files and create or update the listing.
    pub async fn submit(&mut self, api: &dyn MarketplaceApi) -> Result<Listing, EditorError> {
        let fields = self.validate()?;

        let main_photo = match &self.main_photo {
            MainPhoto::Empty => return Err(ValidationError::MissingMainPhoto.into()),
            MainPhoto::Url(url) => url.clone(),
            MainPhoto::File(pending) => {
                let file = read_upload(pending.path()).await?;
                let uploaded = api
                    .upload_files(vec![file])
                    .await
                    .map_err(EditorError::Upload)?;
                let url = uploaded
                    .into_iter()
                    .next()
                    .map(|file| file.url)
                    .ok_or(EditorError::UploadMismatch {
                        expected: 1,
                        returned: 0,
                    })?;
                info!(url = %url, "Main photo uploaded");
                url
            }
        };
        self.main_photo = MainPhoto::Url(main_photo.clone());

        self.upload_pending(api).await?;
        let additional_photos = self
            .photos
            .iter()
            .filter_map(|entry| match entry {
                PhotoEntry::Persisted(uri) => Some(uri.clone()),
                PhotoEntry::Pending(_) => None,
            })
            .collect();

        let draft = ListingDraft {
            brand: fields.brand,
            model: fields.model,
            price: fields.price,
            main_photo,
            additional_photos,
        };
        let saved = match self.listing_id.as_deref() {
            Some(id) => api.update_listing(id, &draft).await?,
            None => api.create_listing(&draft).await?,
        };
        info!(listing_id = %saved.id, updated = self.is_editing(), "Listing saved");
        Ok(saved)
    }

    async fn upload_pending(&mut self, api: &dyn MarketplaceApi) -> Result<(), EditorError> {
        let mut indices = Vec::new();
        let mut files = Vec::new();
        for (index, entry) in self.photos.iter().enumerate() {
            if let PhotoEntry::Pending(pending) = entry {
                files.push(read_upload(pending.path()).await?);
                indices.push(index);
            }
        }
        if files.is_empty() {
            return Ok(());
        }

        let uploaded = api.upload_files(files).await.map_err(|err| {
            warn!(count = indices.len(), ?err, "Photo batch upload failed");
            EditorError::Upload(err)
        })?;
        if uploaded.len() != indices.len() {
            return Err(EditorError::UploadMismatch {
                expected: indices.len(),
                returned: uploaded.len(),
            });
        }
        for (index, file) in indices.into_iter().zip(uploaded) {
            self.photos[index] = PhotoEntry::Persisted(file.url);
        }
        Ok(())
    }
}

async fn read_upload(path: &Path) -> Result<UploadFile, EditorError> {
    let bytes = tokio::fs::read(path)
        .await
        .map_err(|source| EditorError::File {
            path: path.to_path_buf(),
            source,
        })?;
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| "photo".to_string());
    Ok(UploadFile::new(name, bytes))
}
