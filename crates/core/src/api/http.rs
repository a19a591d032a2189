use std::time::Duration;

use async_trait::async_trait;
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, Response, StatusCode,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{json, Value};
use tracing::{debug, error, warn};

use super::{ApiError, MarketplaceApi};
use crate::{
    config::AppConfig,
    models::{
        AuthResponse, Credentials, Listing, ListingDraft, Page, PageQuery, Registration,
        UploadFile, UploadedFile,
    },
    storage::CredentialStore,
};

/// Multipart field name carrying uploaded images.
const UPLOAD_FIELD: &str = "images";

/// Standard response wrapper used by the service.
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    payload: T,
}

/// Login responses arrive bare on some deployments and wrapped on others.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum AuthEnvelope {
    Wrapped { payload: AuthResponse },
    Bare(AuthResponse),
}

impl AuthEnvelope {
    fn into_inner(self) -> AuthResponse {
        match self {
            Self::Wrapped { payload } | Self::Bare(payload) => payload,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct EmailCheck {
    email_exists: bool,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Access {
    /// Credential rejection means bad sign-in input.
    Public,
    /// Credential rejection means the session is gone.
    Authenticated,
}

/// [`MarketplaceApi`] over HTTP.
#[derive(Clone)]
pub struct HttpApi {
    client: Client,
    base_url: String,
    credentials: CredentialStore,
}

impl HttpApi {
    /// Build a client for the configured service sharing `credentials`.
    pub fn new(config: &AppConfig, credentials: CredentialStore) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;
        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn execute(&self, request: RequestBuilder, access: Access) -> Result<Response, ApiError> {
        let request = match self.credentials.token() {
            Some(token) => request.bearer_auth(token),
            None => request,
        };
        let response = request.send().await?;
        let status = response.status();
        debug!(status = status.as_u16(), url = %response.url(), "Response received");
        if status.is_success() {
            return Ok(response);
        }

        let message = error_message(response).await;
        if status == StatusCode::UNAUTHORIZED {
            return Err(match access {
                Access::Public => ApiError::Authentication(message),
                Access::Authenticated => ApiError::Unauthorized {
                    purged: self.purge_credential(),
                },
            });
        }
        Err(ApiError::Status {
            status: status.as_u16(),
            message,
        })
    }

    fn purge_credential(&self) -> bool {
        match self.credentials.purge() {
            Ok(true) => {
                warn!("Credential rejected by service; session cleared");
                true
            }
            Ok(false) => false,
            Err(err) => {
                error!(?err, "Failed to clear persisted credential");
                false
            }
        }
    }

    async fn payload<T: DeserializeOwned>(
        &self,
        request: RequestBuilder,
        access: Access,
    ) -> Result<T, ApiError> {
        let response = self.execute(request, access).await?;
        let bytes = response.bytes().await?;
        let envelope: Envelope<T> = serde_json::from_slice(&bytes)?;
        Ok(envelope.payload)
    }

    async fn authenticate(&self, request: RequestBuilder) -> Result<AuthResponse, ApiError> {
        let response = self.execute(request, Access::Public).await?;
        let bytes = response.bytes().await?;
        let envelope: AuthEnvelope = serde_json::from_slice(&bytes)?;
        Ok(envelope.into_inner())
    }
}

async fn error_message(response: Response) -> String {
    let status = response.status();
    let fallback = status
        .canonical_reason()
        .unwrap_or("unexpected status")
        .to_string();
    let Ok(body) = response.text().await else {
        return fallback;
    };
    match serde_json::from_str::<Value>(&body) {
        Ok(value) => value
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or(fallback),
        Err(_) if !body.trim().is_empty() && body.len() <= 200 => body.trim().to_string(),
        Err(_) => fallback,
    }
}

#[async_trait]
impl MarketplaceApi for HttpApi {
    async fn login(&self, credentials: &Credentials) -> Result<AuthResponse, ApiError> {
        let request = self.client.post(self.url("/user/login")).json(credentials);
        self.authenticate(request).await
    }

    async fn register(&self, registration: &Registration) -> Result<AuthResponse, ApiError> {
        let request = self.client.post(self.url("/user/register")).json(registration);
        self.authenticate(request).await
    }

    async fn logout(&self) -> Result<(), ApiError> {
        let request = self.client.put(self.url("/user/logout"));
        self.execute(request, Access::Authenticated).await?;
        Ok(())
    }

    async fn check_email(&self, email: &str) -> Result<bool, ApiError> {
        let request = self
            .client
            .post(self.url("/user/check"))
            .json(&json!({ "email": email }));
        let check: EmailCheck = self.payload(request, Access::Public).await?;
        Ok(check.email_exists)
    }

    async fn list_listings(&self, query: PageQuery) -> Result<Page<Listing>, ApiError> {
        let request = self.client.post(self.url("/listing/list")).json(&query);
        self.payload(request, Access::Authenticated).await
    }

    async fn get_listing(&self, id: &str) -> Result<Listing, ApiError> {
        let request = self.client.get(self.url(&format!("/listing/{id}")));
        self.payload(request, Access::Authenticated).await
    }

    async fn create_listing(&self, draft: &ListingDraft) -> Result<Listing, ApiError> {
        let request = self.client.post(self.url("/listing/create")).json(draft);
        self.payload(request, Access::Authenticated).await
    }

    async fn update_listing(&self, id: &str, draft: &ListingDraft) -> Result<Listing, ApiError> {
        let request = self
            .client
            .put(self.url(&format!("/listing/{id}")))
            .json(draft);
        self.payload(request, Access::Authenticated).await
    }

    async fn delete_listing(&self, id: &str) -> Result<(), ApiError> {
        let request = self.client.delete(self.url(&format!("/listing/{id}")));
        self.execute(request, Access::Authenticated).await?;
        Ok(())
    }

    async fn upload_files(&self, files: Vec<UploadFile>) -> Result<Vec<UploadedFile>, ApiError> {
        let count = files.len();
        let mut form = Form::new();
        for file in files {
            let part = Part::bytes(file.bytes)
                .file_name(file.file_name)
                .mime_str(&file.content_type)?;
            form = form.part(UPLOAD_FIELD, part);
        }
        let request = self.client.post(self.url("/file/upload")).multipart(form);
        let uploaded: Vec<UploadedFile> = self.payload(request, Access::Authenticated).await?;
        debug!(requested = count, returned = uploaded.len(), "Files uploaded");
        Ok(uploaded)
    }
}
