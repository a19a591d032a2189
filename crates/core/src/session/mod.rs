//! Authenticated session lifecycle.

mod store;

pub use store::{LogoutOutcome, SessionError, SessionStore};
