//! Registry of managed documents.

use indexmap::IndexMap;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{DocumentFactory, DocumentHandle, DocumentUri};
use crate::error::{Error, Result};
use crate::linker::Linker;

/// All documents of a workspace, keyed by URI in registration order.
#[derive(Debug, Default)]
pub struct Documents {
    map: RwLock<IndexMap<DocumentUri, DocumentHandle>>,
}

impl Documents {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document.
    ///
    /// # Errors
    ///
    /// Returns [`Error::DocumentExists`] if the URI is already registered.
    pub fn add(&self, handle: DocumentHandle) -> Result<()> {
        let mut map = self.map.write();
        if map.contains_key(handle.uri()) {
            return Err(Error::DocumentExists(handle.uri().to_string()));
        }
        map.insert(handle.uri().clone(), handle);
        Ok(())
    }

    /// Look up a document.
    #[must_use]
    pub fn get(&self, uri: &DocumentUri) -> Option<DocumentHandle> {
        self.map.read().get(uri).cloned()
    }

    /// Returns `true` if a document is registered under `uri`.
    #[must_use]
    pub fn has(&self, uri: &DocumentUri) -> bool {
        self.map.read().contains_key(uri)
    }

    /// Look up a document, creating and registering it from `uri` if absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the document has to be created and reading or
    /// parsing it fails.
    pub async fn get_or_create(
        &self,
        uri: &DocumentUri,
        factory: &DocumentFactory,
        cancel: &CancellationToken,
    ) -> Result<DocumentHandle> {
        if let Some(handle) = self.get(uri) {
            return Ok(handle);
        }
        let handle = DocumentHandle::new(factory.from_uri(uri.clone(), cancel).await?);
        let mut map = self.map.write();
        // Another task may have registered the URI while this one was parsing.
        Ok(map.entry(uri.clone()).or_insert(handle).clone())
    }

    /// Remove a document.
    pub fn delete(&self, uri: &DocumentUri) -> Option<DocumentHandle> {
        let removed = self.map.write().shift_remove(uri);
        if removed.is_some() {
            debug!(uri = %uri, "Deleted document");
        }
        removed
    }

    /// Reset a document to [`super::DocumentState::Changed`]: unlink it and
    /// drop its scopes and diagnostics. The text and trees are kept until the
    /// next parse phase.
    pub async fn invalidate(&self, uri: &DocumentUri, linker: &dyn Linker) -> Option<DocumentHandle> {
        let handle = self.get(uri)?;
        {
            let mut document = handle.write().await;
            linker.unlink(&mut document);
            document.invalidate();
        }
        debug!(uri = %uri, "Invalidated document");
        Some(handle)
    }

    /// Snapshot of all documents in registration order.
    #[must_use]
    pub fn all(&self) -> Vec<DocumentHandle> {
        self.map.read().values().cloned().collect()
    }

    /// Snapshot of all URIs in registration order.
    #[must_use]
    pub fn uris(&self) -> Vec<DocumentUri> {
        self.map.read().keys().cloned().collect()
    }

    /// Number of registered documents.
    #[must_use]
    pub fn len(&self) -> usize {
        self.map.read().len()
    }

    /// Returns `true` if no document is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.map.read().is_empty()
    }
}
