mod app;
mod forms;

use anyhow::{Context, Result};
use std::{
    fs::{self, OpenOptions},
    path::Path,
    sync::{Arc, Mutex},
};

use automania_core::{
    api::{HttpApi, MarketplaceApi},
    config::{self, AppConfig},
    session::SessionStore,
    storage::CredentialStore,
};
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    config::ensure_default_config()?;
    let config = AppConfig::load()?;
    init_logging(&config.log_dir)?;

    let credentials = CredentialStore::open(config.session_path.clone())?;
    let api: Arc<dyn MarketplaceApi> = Arc::new(HttpApi::new(&config, credentials.clone())?);
    let session = SessionStore::init(credentials, api.clone());
    info!(session = %config.session_path.display(), "Session restored");

    let mut app = app::AutomaniaApp::new(config, session, api);
    app.run().await
}

/// Logs go to a file only; stdout belongs to the terminal UI.
fn init_logging(log_dir: &Path) -> Result<()> {
    fs::create_dir_all(log_dir)
        .with_context(|| format!("failed to create log dir {}", log_dir.display()))?;
    let log_path = log_dir.join("automania.log");
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .with_context(|| format!("failed to open log file {}", log_path.display()))?;

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let file_layer = tracing_subscriber::fmt::layer()
        .with_target(true)
        .with_ansi(false)
        .compact()
        .with_writer(Mutex::new(file));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .init();

    Ok(())
}
