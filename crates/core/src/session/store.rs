#![allow(missing_docs)]

use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};

use crate::{
    api::{ApiError, MarketplaceApi},
    models::{Credentials, Registration, User},
    storage::CredentialStore,
    validation::{self, ValidationError},
};

/// Failure of a session operation.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("an account already exists for {0}")]
    EmailTaken(String),
    #[error(transparent)]
    Api(#[from] ApiError),
    #[error("failed to persist session: {0:#}")]
    Storage(#[from] anyhow::Error),
}

/// Result of signing out. Local state is always cleared; a server-side
/// failure is reported here instead of failing the whole operation.
#[derive(Debug)]
pub struct LogoutOutcome {
    pub server_error: Option<ApiError>,
}

/// Explicit session context shared by every screen.
///
/// Cloning is cheap; all clones observe the same credential store.
#[derive(Clone)]
pub struct SessionStore {
    credentials: CredentialStore,
    api: Arc<dyn MarketplaceApi>,
}

impl SessionStore {
    /// Build the session context from already-loaded persisted state.
    pub fn init(credentials: CredentialStore, api: Arc<dyn MarketplaceApi>) -> Self {
        match credentials.user() {
            Some(user) => info!(user_id = %user.id, "Restored persisted session"),
            None => info!("No persisted session"),
        }
        Self { credentials, api }
    }

    /// The signed-in identity, if any.
    pub fn current_user(&self) -> Option<User> {
        self.credentials.user()
    }

    pub fn is_signed_in(&self) -> bool {
        self.current_user().is_some()
    }

    /// Shared credential store, for wiring the HTTP client.
    pub fn credentials(&self) -> &CredentialStore {
        &self.credentials
    }

    /// Sign in. On failure any previous session is left untouched.
    pub async fn login(&self, email: &str, password: &str) -> Result<User, SessionError> {
        let email = validation::validate_email(email)?;
        validation::validate_password(password)?;

        let response = self
            .api
            .login(&Credentials {
                email,
                password: password.to_string(),
            })
            .await?;
        self.credentials.store(&response.token, &response.user)?;
        info!(user_id = %response.user.id, "Signed in");
        Ok(response.user)
    }

    /// Create an account and sign into it.
    pub async fn register(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<User, SessionError> {
        let email = validation::validate_email(email)?;
        validation::validate_password(password)?;
        let full_name = validation::validate_full_name(full_name)?;

        let response = self
            .api
            .register(&Registration {
                email,
                password: password.to_string(),
                full_name,
            })
            .await?;
        self.credentials.store(&response.token, &response.user)?;
        info!(user_id = %response.user.id, "Registered");
        Ok(response.user)
    }

    /// Whether `email` is already registered.
    pub async fn check_email(&self, email: &str) -> Result<bool, SessionError> {
        let email = validation::validate_email(email)?;
        Ok(self.api.check_email(&email).await?)
    }

    /// Register after confirming the email is still free.
    pub async fn register_new(
        &self,
        email: &str,
        password: &str,
        full_name: &str,
    ) -> Result<User, SessionError> {
        if self.check_email(email).await? {
            return Err(SessionError::EmailTaken(email.trim().to_string()));
        }
        self.register(email, password, full_name).await
    }

    /// Invalidate the credential server-side, then clear local state
    /// whatever the server said.
    pub async fn logout(&self) -> Result<LogoutOutcome, SessionError> {
        let server_error = self.api.logout().await.err();
        if let Some(err) = server_error.as_ref() {
            warn!(?err, "Server-side logout failed; clearing local session anyway");
        }
        self.credentials.purge()?;
        info!("Signed out");
        Ok(LogoutOutcome { server_error })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{user, FakeApi};

    fn session_with(api: Arc<FakeApi>) -> SessionStore {
        SessionStore::init(CredentialStore::in_memory(), api)
    }

    #[tokio::test]
    async fn login_persists_identity() {
        let api = Arc::new(FakeApi::default());
        let session = session_with(api.clone());
        assert!(!session.is_signed_in());

        let signed_in = session.login("ada@example.com", "hunter22").await.unwrap();
        assert_eq!(session.current_user(), Some(signed_in));
        assert_eq!(session.credentials().token().as_deref(), Some("token-u1"));
    }

    #[tokio::test]
    async fn failed_login_keeps_previous_session() {
        let api = Arc::new(FakeApi::default());
        let session = session_with(api.clone());
        session.credentials().store("old-token", &user("u9")).unwrap();
        api.state.lock().fail_login = true;

        let err = session.login("ada@example.com", "hunter22").await.unwrap_err();
        assert!(matches!(err, SessionError::Api(ApiError::Authentication(_))));
        assert_eq!(session.current_user().map(|u| u.id), Some("u9".to_string()));
        assert_eq!(session.credentials().token().as_deref(), Some("old-token"));
    }

    #[tokio::test]
    async fn invalid_input_never_reaches_service() {
        let api = Arc::new(FakeApi::default());
        let session = session_with(api.clone());

        let err = session.login("not-an-email", "hunter22").await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::InvalidEmail)
        ));
        let err = session
            .register("ada@example.com", "hunter22", "Ada")
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            SessionError::Validation(ValidationError::FullNameTokens)
        ));
        let state = api.state.lock();
        assert_eq!(state.login_calls, 0);
        assert!(state.registered_emails.is_empty());
    }

    #[tokio::test]
    async fn register_rejects_known_email() {
        let api = Arc::new(FakeApi::default());
        let session = session_with(api.clone());

        let created = session
            .register_new("grace@example.com", "hunter22", "Grace Hopper")
            .await
            .unwrap();
        assert_eq!(created.full_name, "Grace Hopper");
        assert!(session.is_signed_in());

        let err = session
            .register_new("grace@example.com", "hunter22", "Grace Hopper")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::EmailTaken(_)));
    }

    #[tokio::test]
    async fn logout_clears_even_when_server_fails() {
        let api = Arc::new(FakeApi::default());
        let session = session_with(api.clone());
        session.login("ada@example.com", "hunter22").await.unwrap();
        api.state.lock().fail_logout = true;

        let outcome = session.logout().await.unwrap();
        assert!(outcome.server_error.is_some());
        assert!(!session.is_signed_in());
        assert!(session.credentials().token().is_none());
        assert_eq!(api.state.lock().logout_calls, 1);

        let outcome = session.logout().await.unwrap();
        assert!(outcome.server_error.is_some());
        assert!(!session.is_signed_in());
    }
}
