//! Workspace facade.
//!
//! [`Workspace`] ties the language services, the [`DocumentBuilder`] and the
//! [`WorkspaceLock`] together: loading folders and applying file changes are
//! lock-guarded writes, queries are lock-guarded reads.
//! [`WorkspaceManager`] finds the documents of a folder tree.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::try_join_all;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::builder::{BuildOptions, DocumentBuilder};
use crate::cancel::interrupt_and_check;
use crate::config::WorkbenchConfig;
use crate::document::{DocumentState, DocumentUri};
use crate::error::Result;
use crate::lock::WorkspaceLock;
use crate::services::LanguageServices;

/// Outcome of loading workspace folders.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    /// Documents found in the folders
    pub documents: Vec<DocumentUri>,
    /// Directories that could not be listed, with the reason
    pub directories_skipped: Vec<(DocumentUri, String)>,
}

/// Discovers and loads the documents of workspace folders.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    services: Arc<LanguageServices>,
    builder: Arc<DocumentBuilder>,
    config: Arc<WorkbenchConfig>,
}

impl WorkspaceManager {
    /// Create a manager loading into `builder`'s documents.
    #[must_use]
    pub fn new(builder: Arc<DocumentBuilder>, config: Arc<WorkbenchConfig>) -> Self {
        Self {
            services: Arc::clone(builder.services()),
            builder,
            config,
        }
    }

    /// Load every document under `folders` and build the whole workspace
    /// with the initial build options.
    ///
    /// # Errors
    ///
    /// Returns an error if a folder path is not absolute, a document cannot
    /// be read, or the build fails or is cancelled. Directories that cannot
    /// be listed are skipped and reported instead.
    pub async fn initialize(&self, folders: &[PathBuf], cancel: &CancellationToken) -> Result<LoadReport> {
        let mut report = LoadReport::default();
        for folder in folders {
            let root = DocumentUri::from_file_path(folder)?;
            self.traverse(root, &mut report).await;
        }
        interrupt_and_check(cancel).await?;

        let services = &self.services;
        try_join_all(
            report
                .documents
                .iter()
                .map(|uri| services.documents.get_or_create(uri, &services.factory, cancel)),
        )
        .await?;
        info!(
            documents = report.documents.len(),
            skipped = report.directories_skipped.len(),
            "Loaded workspace documents"
        );

        let options = BuildOptions {
            validation: self.config.initial_validation(),
        };
        self.builder.build(&services.documents.all(), options, cancel).await?;
        Ok(report)
    }

    /// Collect the documents under `root`, depth first in listing order.
    async fn traverse(&self, root: DocumentUri, report: &mut LoadReport) {
        let mut pending = vec![root];
        while let Some(directory) = pending.pop() {
            let entries = match self.services.file_system.list_directory(&directory).await {
                Ok(entries) => entries,
                Err(e) => {
                    warn!(
                        directory = %directory,
                        error = %e,
                        "Cannot read directory, skipping"
                    );
                    report.directories_skipped.push((directory, e.to_string()));
                    continue;
                }
            };

            let mut subdirectories = Vec::new();
            for entry in entries {
                let name = entry.uri.file_name();
                if name.starts_with('.') {
                    continue;
                }
                if entry.is_directory {
                    if is_excluded_dir(name) {
                        debug!(directory = %entry.uri, "Skipping excluded directory");
                    } else {
                        subdirectories.push(entry.uri);
                    }
                } else if entry.is_file && self.includes(&entry.uri) {
                    report.documents.push(entry.uri);
                }
            }
            pending.extend(subdirectories.into_iter().rev());
        }
    }

    /// Returns `true` if `uri` has a document extension.
    #[must_use]
    pub fn includes(&self, uri: &DocumentUri) -> bool {
        uri.extension()
            .is_some_and(|extension| self.config.is_document_extension(extension))
    }
}

fn is_excluded_dir(name: &str) -> bool {
    matches!(
        name,
        "target" | "node_modules" | "vendor" | "bin" | "obj" | "build" | "dist" | "__pycache__" | "out"
    )
}

/// A loaded workspace of one language.
#[derive(Debug, Clone)]
pub struct Workspace {
    services: Arc<LanguageServices>,
    builder: Arc<DocumentBuilder>,
    manager: WorkspaceManager,
    lock: WorkspaceLock,
    config: Arc<WorkbenchConfig>,
}

impl Workspace {
    /// Create an empty workspace.
    #[must_use]
    pub fn new(services: LanguageServices, config: WorkbenchConfig) -> Self {
        let services = Arc::new(services);
        let config = Arc::new(config);
        let update_options = BuildOptions::validated(config.update_validation());
        let builder = Arc::new(DocumentBuilder::new(Arc::clone(&services), update_options));
        let manager = WorkspaceManager::new(Arc::clone(&builder), Arc::clone(&config));
        Self {
            services,
            builder,
            manager,
            lock: WorkspaceLock::new(),
            config,
        }
    }

    /// Language services.
    #[must_use]
    pub const fn services(&self) -> &Arc<LanguageServices> {
        &self.services
    }

    /// Document builder.
    #[must_use]
    pub const fn builder(&self) -> &Arc<DocumentBuilder> {
        &self.builder
    }

    /// Read/write lock guarding the workspace.
    #[must_use]
    pub const fn lock(&self) -> &WorkspaceLock {
        &self.lock
    }

    /// Configuration.
    #[must_use]
    pub fn config(&self) -> &WorkbenchConfig {
        &self.config
    }

    /// Load and build every document under `folders`.
    ///
    /// # Errors
    ///
    /// See [`WorkspaceManager::initialize`]. Resolves to
    /// [`crate::Error::Cancelled`] if a newer write supersedes the load.
    pub async fn load(&self, folders: Vec<PathBuf>) -> Result<LoadReport> {
        let manager = self.manager.clone();
        self.lock
            .write(move |cancel| async move { manager.initialize(&folders, &cancel).await })
            .await
    }

    /// Apply file changes and rebuild what they affect.
    ///
    /// # Errors
    ///
    /// See [`DocumentBuilder::update`]. Resolves to
    /// [`crate::Error::Cancelled`] if a newer write supersedes the update.
    pub async fn update(&self, changed: Vec<DocumentUri>, deleted: Vec<DocumentUri>) -> Result<()> {
        let builder = Arc::clone(&self.builder);
        self.lock
            .write(move |cancel| async move { builder.update(&changed, &deleted, &cancel).await })
            .await
    }

    /// Open an editor buffer for `uri` and rebuild.
    ///
    /// # Errors
    ///
    /// See [`Workspace::update`].
    pub async fn open_document(&self, uri: DocumentUri, text: String) -> Result<()> {
        self.services.text_documents.open(uri.clone(), text);
        self.update(vec![uri], Vec::new()).await
    }

    /// Close the editor buffer of `uri` and rebuild from the stored text.
    ///
    /// # Errors
    ///
    /// See [`Workspace::update`].
    pub async fn close_document(&self, uri: DocumentUri) -> Result<()> {
        self.services.text_documents.close(&uri);
        self.update(vec![uri], Vec::new()).await
    }

    /// Run a query that must not overlap a build.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Internal`] if `query` panics.
    pub async fn read<F, Fut, T>(&self, query: F) -> Result<T>
    where
        F: FnOnce(Arc<LanguageServices>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let services = Arc::clone(&self.services);
        self.lock.read(move || query(services)).await
    }

    /// Wait until the workspace, or the document at `uri`, reaches `state`.
    ///
    /// # Errors
    ///
    /// See [`DocumentBuilder::wait_until`].
    pub async fn wait_until(
        &self,
        state: DocumentState,
        uri: Option<&DocumentUri>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.builder.wait_until(state, uri, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::config::ParserMode;
    use crate::domainmodel;

    fn workspace() -> Workspace {
        let mut config = WorkbenchConfig::default();
        config.parser.mode = ParserMode::Sync;
        Workspace::new(domainmodel::services(&config).unwrap(), config)
    }

    #[test]
    fn build_directories_are_excluded() {
        assert!(is_excluded_dir("target"));
        assert!(is_excluded_dir("node_modules"));
        assert!(!is_excluded_dir("models"));
    }

    #[tokio::test]
    async fn load_skips_hidden_and_excluded_entries() {
        let temp_dir = TempDir::new().unwrap();
        let root = temp_dir.path();
        fs::create_dir_all(root.join("models/nested")).unwrap();
        fs::create_dir_all(root.join(".git")).unwrap();
        fs::create_dir_all(root.join("target")).unwrap();
        fs::write(root.join("models/a.dmodel"), "entity A {}").unwrap();
        fs::write(root.join("models/nested/b.dmodel"), "entity B { a: A }").unwrap();
        fs::write(root.join("models/notes.txt"), "not a model").unwrap();
        fs::write(root.join(".git/c.dmodel"), "entity C {}").unwrap();
        fs::write(root.join("target/d.dmodel"), "entity D {}").unwrap();
        fs::write(root.join(".e.dmodel"), "entity E {}").unwrap();
        let workspace = workspace();

        let report = workspace.load(vec![root.to_path_buf()]).await.unwrap();

        let names: Vec<_> = report.documents.iter().map(DocumentUri::file_name).collect();
        assert_eq!(names, ["a.dmodel", "b.dmodel"]);
        assert!(report.directories_skipped.is_empty());
        assert_eq!(workspace.builder().workspace_state(), DocumentState::Validated);

        let b = &report.documents[1];
        let handle = workspace.services().documents.get(b).unwrap();
        let document = handle.read().await;
        assert_eq!(document.state(), DocumentState::Validated);
        assert!(!document.has_linking_errors());
    }

    #[tokio::test]
    async fn missing_folder_is_reported() {
        let temp_dir = TempDir::new().unwrap();
        let missing = temp_dir.path().join("missing");
        let workspace = workspace();

        let report = workspace.load(vec![missing]).await.unwrap();

        assert!(report.documents.is_empty());
        assert_eq!(report.directories_skipped.len(), 1);
    }

    #[tokio::test]
    async fn open_document_rebuilds_from_buffer() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("a.dmodel");
        fs::write(&path, "entity A {}").unwrap();
        let workspace = workspace();
        workspace.load(vec![temp_dir.path().to_path_buf()]).await.unwrap();
        let uri = DocumentUri::from_file_path(&path).unwrap();

        workspace
            .open_document(uri.clone(), "entity Renamed {}".into())
            .await
            .unwrap();

        let names = workspace
            .read(move |services| async move {
                services
                    .index
                    .elements_of(&uri)
                    .iter()
                    .map(|symbol| symbol.name.clone())
                    .collect::<Vec<_>>()
            })
            .await
            .unwrap();
        assert_eq!(names, ["Renamed"]);
    }
}
