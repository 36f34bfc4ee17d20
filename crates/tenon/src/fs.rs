//! File access.
//!
//! Documents are read through a [`FileSystemProvider`]; editor buffers
//! registered in [`TextDocuments`] take precedence over the file on disk.

use std::collections::HashMap;

use async_trait::async_trait;
use parking_lot::RwLock;

use crate::document::DocumentUri;
use crate::error::{Error, Result};

/// One entry of a directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    /// Entry location
    pub uri: DocumentUri,
    /// Regular file
    pub is_file: bool,
    /// Directory
    pub is_directory: bool,
}

/// Read access to stored documents.
#[async_trait]
pub trait FileSystemProvider: Send + Sync {
    /// Read a document's text.
    async fn read_file(&self, uri: &DocumentUri) -> Result<String>;

    /// List the entries of a directory.
    async fn list_directory(&self, uri: &DocumentUri) -> Result<Vec<DirectoryEntry>>;
}

/// [`FileSystemProvider`] over the local disk.
#[derive(Debug, Clone, Copy, Default)]
pub struct LocalFileSystem;

#[async_trait]
impl FileSystemProvider for LocalFileSystem {
    async fn read_file(&self, uri: &DocumentUri) -> Result<String> {
        let path = uri.to_file_path().ok_or_else(|| Error::InvalidUri(uri.to_string()))?;
        Ok(tokio::fs::read_to_string(path).await?)
    }

    async fn list_directory(&self, uri: &DocumentUri) -> Result<Vec<DirectoryEntry>> {
        let path = uri.to_file_path().ok_or_else(|| Error::InvalidUri(uri.to_string()))?;
        let mut entries = Vec::new();
        let mut dir = tokio::fs::read_dir(path).await?;
        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(DirectoryEntry {
                uri: DocumentUri::from_file_path(&entry.path())?,
                is_file: file_type.is_file(),
                is_directory: file_type.is_dir(),
            });
        }
        entries.sort_by(|a, b| a.uri.cmp(&b.uri));
        Ok(entries)
    }
}

/// Registry of documents open in an editor, with their unsaved text.
#[derive(Debug, Default)]
pub struct TextDocuments {
    buffers: RwLock<HashMap<DocumentUri, String>>,
}

impl TextDocuments {
    /// An empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a buffer, or replace the text of an open one.
    pub fn open(&self, uri: DocumentUri, text: String) {
        self.buffers.write().insert(uri, text);
    }

    /// Close a buffer. Returns its last text.
    pub fn close(&self, uri: &DocumentUri) -> Option<String> {
        self.buffers.write().remove(uri)
    }

    /// Text of an open buffer.
    #[must_use]
    pub fn get(&self, uri: &DocumentUri) -> Option<String> {
        self.buffers.read().get(uri).cloned()
    }

    /// Returns `true` if `uri` is open.
    #[must_use]
    pub fn is_open(&self, uri: &DocumentUri) -> bool {
        self.buffers.read().contains_key(uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lists_files_and_directories() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.dmodel"), "entity A {}").unwrap();
        std::fs::create_dir(dir.path().join("nested")).unwrap();
        let root = DocumentUri::from_file_path(dir.path()).unwrap();

        let entries = LocalFileSystem.list_directory(&root).await.unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_file);
        assert_eq!(entries[0].uri.file_name(), "a.dmodel");
        assert!(entries[1].is_directory);
    }

    #[tokio::test]
    async fn reads_files() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.dmodel");
        std::fs::write(&path, "entity A {}").unwrap();

        let text = LocalFileSystem
            .read_file(&DocumentUri::from_file_path(&path).unwrap())
            .await
            .unwrap();

        assert_eq!(text, "entity A {}");
    }

    #[tokio::test]
    async fn non_file_uris_cannot_be_read() {
        let uri = DocumentUri::parse("memory:///a.dmodel").unwrap();

        let read = LocalFileSystem.read_file(&uri).await;
        let listed = LocalFileSystem.list_directory(&DocumentUri::parse("memory:///").unwrap()).await;

        assert!(matches!(read, Err(Error::InvalidUri(_))));
        assert!(matches!(listed, Err(Error::InvalidUri(_))));
    }

    #[test]
    fn buffers_open_and_close() {
        let buffers = TextDocuments::new();
        let uri = DocumentUri::parse("memory:///a.dmodel").unwrap();

        buffers.open(uri.clone(), "one".into());
        buffers.open(uri.clone(), "two".into());

        assert_eq!(buffers.get(&uri).as_deref(), Some("two"));
        assert_eq!(buffers.close(&uri).as_deref(), Some("two"));
        assert!(!buffers.is_open(&uri));
    }
}
