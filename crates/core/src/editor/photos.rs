#![allow(missing_docs)]

//! Photo attachments and their local preview handles.

use std::{
    collections::HashSet,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use parking_lot::Mutex;
use tracing::debug;

/// Hands out preview URIs for local files and tracks which are still live.
#[derive(Debug, Clone, Default)]
pub struct PreviewRegistry {
    inner: Arc<Mutex<RegistryInner>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: u64,
    live: HashSet<u64>,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a preview handle for `path`.
    pub fn create(&self, path: &Path) -> PreviewHandle {
        let mut inner = self.inner.lock();
        inner.next_id += 1;
        let id = inner.next_id;
        inner.live.insert(id);
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_default();
        PreviewHandle {
            id,
            uri: format!("preview://{id}/{name}"),
            registry: self.clone(),
        }
    }

    /// Number of handles created and not yet revoked.
    pub fn live_count(&self) -> usize {
        self.inner.lock().live.len()
    }

    pub fn is_live(&self, uri: &str) -> bool {
        let inner = self.inner.lock();
        parse_id(uri).is_some_and(|id| inner.live.contains(&id))
    }

    fn revoke(&self, id: u64) {
        if self.inner.lock().live.remove(&id) {
            debug!(preview = id, "Preview revoked");
        }
    }
}

fn parse_id(uri: &str) -> Option<u64> {
    uri.strip_prefix("preview://")?.split('/').next()?.parse().ok()
}

/// A live preview URI. Dropping it revokes the URI.
pub struct PreviewHandle {
    id: u64,
    uri: String,
    registry: PreviewRegistry,
}

impl PreviewHandle {
    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl fmt::Debug for PreviewHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PreviewHandle").field(&self.uri).finish()
    }
}

impl Drop for PreviewHandle {
    fn drop(&mut self) {
        self.registry.revoke(self.id);
    }
}

/// A locally selected file not yet uploaded.
#[derive(Debug)]
pub struct PendingPhoto {
    path: PathBuf,
    preview: PreviewHandle,
}

impl PendingPhoto {
    pub(crate) fn new(path: PathBuf, registry: &PreviewRegistry) -> Self {
        let preview = registry.create(&path);
        Self { path, preview }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn preview_uri(&self) -> &str {
        self.preview.uri()
    }

    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// One entry of the additional-photo sequence.
#[derive(Debug)]
pub enum PhotoEntry {
    /// Already stored on the service.
    Persisted(String),
    /// Selected locally, uploaded on submit.
    Pending(PendingPhoto),
}

impl PhotoEntry {
    /// URI to display: the stored URI or the local preview.
    pub fn display_uri(&self) -> &str {
        match self {
            Self::Persisted(uri) => uri,
            Self::Pending(pending) => pending.preview_uri(),
        }
    }

    pub fn is_pending(&self) -> bool {
        matches!(self, Self::Pending(_))
    }
}

/// The main photo slot.
#[derive(Debug, Default)]
pub enum MainPhoto {
    #[default]
    Empty,
    Url(String),
    File(PendingPhoto),
}

impl MainPhoto {
    pub fn display_uri(&self) -> Option<&str> {
        match self {
            Self::Empty => None,
            Self::Url(uri) => Some(uri),
            Self::File(pending) => Some(pending.preview_uri()),
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }
}
