#![warn(clippy::all, missing_docs)]

//! Core domain logic for the Automania marketplace client.
//!
//! This crate hosts the data models, configuration handling, credential
//! persistence, the REST client, and the session, feed and editor state
//! used by the terminal UI and any future frontends.

pub mod api;
pub mod config;
pub mod editor;
pub mod feed;
pub mod models;
pub mod session;
pub mod storage;
pub mod validation;

#[cfg(test)]
mod testing;

pub use api::{ApiError, HttpApi, MarketplaceApi};
pub use config::AppConfig;
pub use editor::{EditorError, ListingEditor, PreviewRegistry};
pub use feed::{FeedController, FeedError, LoadOutcome, LoadTicket};
pub use models::{Listing, User};
pub use session::{SessionError, SessionStore};
pub use storage::CredentialStore;
