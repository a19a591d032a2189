//! In-memory [`MarketplaceApi`] double for unit tests.

use std::collections::HashSet;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::{
    api::{ApiError, MarketplaceApi},
    models::{
        AuthResponse, Credentials, Listing, ListingDraft, Page, PageQuery, Registration,
        UploadFile, UploadedFile, User,
    },
};

#[derive(Default)]
pub(crate) struct FakeState {
    pub listings: Vec<Listing>,
    pub registered_emails: Vec<String>,
    pub list_calls: Vec<PageQuery>,
    pub delete_calls: Vec<String>,
    pub upload_calls: Vec<Vec<String>>,
    pub created: Vec<ListingDraft>,
    pub updated: Vec<(String, ListingDraft)>,
    pub login_calls: usize,
    pub logout_calls: usize,
    pub fail_list: bool,
    pub fail_delete: HashSet<String>,
    pub fail_upload_batch_of: Option<usize>,
    pub fail_login: bool,
    pub fail_logout: bool,
    pub fail_save: bool,
}

#[derive(Default)]
pub(crate) struct FakeApi {
    pub state: Mutex<FakeState>,
}

pub(crate) fn listing(id: &str, owner: &str) -> Listing {
    Listing {
        id: id.to_string(),
        owner_id: Some(owner.to_string()),
        brand: format!("Brand {id}"),
        model: format!("Model {id}"),
        price: 1000,
        main_photo: format!("https://img.example.com/{id}.jpg"),
        additional_photos: Vec::new(),
        created_at: None,
        updated_at: None,
    }
}

pub(crate) fn user(id: &str) -> User {
    User {
        id: id.to_string(),
        email: format!("{id}@example.com"),
        full_name: "Ada Lovelace".to_string(),
        created_at: None,
    }
}

fn server_error(message: &str) -> ApiError {
    ApiError::Status {
        status: 500,
        message: message.to_string(),
    }
}

impl FakeApi {
    pub fn with_listings(count: usize) -> Self {
        let api = Self::default();
        api.state.lock().listings = (0..count)
            .map(|index| listing(&format!("l{index}"), "owner"))
            .collect();
        api
    }

    fn stored(draft: &ListingDraft, id: String) -> Listing {
        Listing {
            id,
            owner_id: Some("owner".to_string()),
            brand: draft.brand.clone(),
            model: draft.model.clone(),
            price: draft.price,
            main_photo: draft.main_photo.clone(),
            additional_photos: draft.additional_photos.clone(),
            created_at: None,
            updated_at: None,
        }
    }
}

#[async_trait]
impl MarketplaceApi for FakeApi {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        let mut state = self.state.lock();
        state.login_calls += 1;
        if state.fail_login {
            return Err(ApiError::Authentication(
                "Invalid email or password".to_string(),
            ));
        }
        Ok(AuthResponse {
            user: User {
                email: credentials.email.clone(),
                ..user("u1")
            },
            token: "token-u1".to_string(),
        })
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        let mut state = self.state.lock();
        state.registered_emails.push(registration.email.clone());
        Ok(AuthResponse {
            user: User {
                email: registration.email.clone(),
                full_name: registration.full_name.clone(),
                ..user("u2")
            },
            token: "token-u2".to_string(),
        })
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.logout_calls += 1;
        if state.fail_logout {
            return Err(server_error("logout failed"));
        }
        Ok(())
    }

    async fn check_email(&self, email: &str) -> Result<bool, ApiError> {
        let state = self.state.lock();
        Ok(state.registered_emails.iter().any(|known| known == email))
    }

    async fn list_listings(&self, query: PageQuery) -> Result<Page<Listing>, ApiError> {
        let mut state = self.state.lock();
        state.list_calls.push(query);
        if state.fail_list {
            return Err(server_error("list failed"));
        }
        let size = query.page_size as usize;
        let start = (query.page_number as usize - 1) * size;
        let docs: Vec<Listing> = state
            .listings
            .iter()
            .skip(start)
            .take(size)
            .cloned()
            .collect();
        let total = state.listings.len();
        let total_pages = total.div_ceil(size) as u32;
        Ok(Page {
            docs,
            total_docs: total as u64,
            limit: query.page_size,
            page: query.page_number,
            total_pages,
            has_next_page: query.page_number < total_pages,
            has_prev_page: query.page_number > 1,
        })
    }

    async fn get_listing(&self, id: &str) -> Result<Listing, ApiError> {
        let state = self.state.lock();
        state
            .listings
            .iter()
            .find(|listing| listing.id == id)
            .cloned()
            .ok_or_else(|| ApiError::Status {
                status: 404,
                message: "Listing not found".to_string(),
            })
    }

    async fn create_listing(&self, draft: &ListingDraft) -> Result<Listing, ApiError> {
        let mut state = self.state.lock();
        if state.fail_save {
            return Err(server_error("save failed"));
        }
        state.created.push(draft.clone());
        let id = format!("new{}", state.created.len());
        let stored = Self::stored(draft, id);
        state.listings.insert(0, stored.clone());
        Ok(stored)
    }

    async fn update_listing(&self, id: &str, draft: &ListingDraft) -> Result<Listing, ApiError> {
        let mut state = self.state.lock();
        if state.fail_save {
            return Err(server_error("save failed"));
        }
        state.updated.push((id.to_string(), draft.clone()));
        Ok(Self::stored(draft, id.to_string()))
    }

    async fn delete_listing(&self, id: &str) -> Result<(), ApiError> {
        let mut state = self.state.lock();
        state.delete_calls.push(id.to_string());
        if state.fail_delete.contains(id) {
            return Err(server_error("delete failed"));
        }
        state.listings.retain(|listing| listing.id != id);
        Ok(())
    }

    async fn upload_files(&self, files: Vec<UploadFile>) -> Result<Vec<UploadedFile>, ApiError> {
        let mut state = self.state.lock();
        let names: Vec<String> = files.iter().map(|file| file.file_name.clone()).collect();
        state.upload_calls.push(names);
        if state.fail_upload_batch_of == Some(files.len()) {
            return Err(server_error("upload failed"));
        }
        let call = state.upload_calls.len();
        Ok(files
            .into_iter()
            .enumerate()
            .map(|(index, file)| UploadedFile {
                url: format!("https://cdn.example.com/{call}/{index}/{}", file.file_name),
                file_name: file.file_name,
                content_type: file.content_type,
            })
            .collect())
    }
}
