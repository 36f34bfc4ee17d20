//! Document creation and reparsing.

use std::sync::Arc;

use tenon_syntax::ParseResult;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::{Document, DocumentState, DocumentUri};
use crate::dispatch::ParserDispatcher;
use crate::error::Result;
use crate::fs::{FileSystemProvider, TextDocuments};

/// Creates documents from text, URIs or ready-made models, and brings
/// changed documents back to [`DocumentState::Parsed`].
///
/// Text comes from the open-buffer registry first, then from the file
/// system.
pub struct DocumentFactory {
    parser: Arc<dyn ParserDispatcher>,
    file_system: Arc<dyn FileSystemProvider>,
    text_documents: Arc<TextDocuments>,
}

impl std::fmt::Debug for DocumentFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DocumentFactory").finish_non_exhaustive()
    }
}

impl DocumentFactory {
    /// Create a factory over the given collaborators.
    #[must_use]
    pub fn new(
        parser: Arc<dyn ParserDispatcher>,
        file_system: Arc<dyn FileSystemProvider>,
        text_documents: Arc<TextDocuments>,
    ) -> Self {
        Self {
            parser,
            file_system,
            text_documents,
        }
    }

    /// Parse `text` into a new document.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing is cancelled or the dispatcher fails.
    pub async fn from_text(&self, uri: DocumentUri, text: String, cancel: &CancellationToken) -> Result<Document> {
        let parse_result = self.parser.parse(&text, cancel).await?;
        Ok(Document::parsed(uri, text, parse_result))
    }

    /// Read and parse the document at `uri`.
    ///
    /// # Errors
    ///
    /// Returns an error if the text cannot be read or parsing fails.
    pub async fn from_uri(&self, uri: DocumentUri, cancel: &CancellationToken) -> Result<Document> {
        let text = match self.text_documents.get(&uri) {
            Some(text) => text,
            None => self.file_system.read_file(&uri).await?,
        };
        self.from_text(uri, text, cancel).await
    }

    /// Wrap an existing parse result. The text is the one the result was
    /// parsed from.
    #[must_use]
    pub fn from_model(&self, uri: DocumentUri, parse_result: ParseResult) -> Document {
        let text = parse_result.cst.text().to_string();
        Document::parsed(uri, text, parse_result)
    }

    /// Refresh a document's text and reparse it if the text changed since
    /// the last parse. Leaves the document at [`DocumentState::Parsed`].
    ///
    /// Documents that are neither open nor on disk keep their current text.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsing fails; the
    /// document is left unchanged.
    pub async fn update(&self, document: &mut Document, cancel: &CancellationToken) -> Result<()> {
        let text = if let Some(text) = self.text_documents.get(&document.uri) {
            text
        } else if document.uri.is_file() {
            self.file_system.read_file(&document.uri).await?
        } else {
            document.text.clone()
        };

        let previous = std::mem::replace(&mut document.text, text);
        if document.needs_reparse() {
            match self.parser.parse(&document.text, cancel).await {
                Ok(parse_result) => document.parse_result = parse_result,
                Err(e) => {
                    document.text = previous;
                    return Err(e);
                }
            }
            document.version += 1;
            debug!(uri = %document.uri, version = document.version, "Reparsed document");
        }
        document.set_state(DocumentState::Parsed);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::SyncParser;
    use crate::domainmodel;
    use crate::fs::LocalFileSystem;

    fn factory(text_documents: Arc<TextDocuments>) -> DocumentFactory {
        let parser = SyncParser::new(domainmodel::parser().unwrap());
        DocumentFactory::new(Arc::new(parser), Arc::new(LocalFileSystem), text_documents)
    }

    #[tokio::test]
    async fn from_text_parses_immediately() {
        let factory = factory(Arc::default());
        let uri = DocumentUri::parse("memory:///a.dmodel").unwrap();

        let document = factory
            .from_text(uri, "entity A {}".into(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(document.state(), DocumentState::Parsed);
        assert!(document.parse_result.root().is_some());
        assert!(!document.parse_result.has_errors());
    }

    #[tokio::test]
    async fn open_buffers_win_over_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.dmodel");
        std::fs::write(&path, "entity OnDisk {}").unwrap();
        let uri = DocumentUri::from_file_path(&path).unwrap();
        let buffers = Arc::new(TextDocuments::new());
        buffers.open(uri.clone(), "entity InBuffer {}".into());

        let document = factory(buffers).from_uri(uri, &CancellationToken::new()).await.unwrap();

        assert_eq!(document.text, "entity InBuffer {}");
    }

    #[tokio::test]
    async fn update_reparses_only_changed_text() {
        let buffers = Arc::new(TextDocuments::new());
        let factory = factory(Arc::clone(&buffers));
        let uri = DocumentUri::parse("memory:///a.dmodel").unwrap();
        let cancel = CancellationToken::new();
        let mut document = factory.from_text(uri.clone(), "entity A {}".into(), &cancel).await.unwrap();
        document.set_state(DocumentState::Changed);

        factory.update(&mut document, &cancel).await.unwrap();
        assert_eq!(document.version, 1);
        assert_eq!(document.state(), DocumentState::Parsed);

        buffers.open(uri, "entity B {}".into());
        document.set_state(DocumentState::Changed);
        factory.update(&mut document, &cancel).await.unwrap();

        assert_eq!(document.version, 2);
        assert_eq!(document.parse_result.cst.text(), "entity B {}");
    }

    #[tokio::test]
    async fn missing_files_fail_without_touching_the_document() {
        let dir = tempfile::tempdir().unwrap();
        let uri = DocumentUri::from_file_path(&dir.path().join("gone.dmodel")).unwrap();
        let factory = factory(Arc::default());
        let mut document = factory.from_model(uri, ParseResult::empty("old"));
        document.set_state(DocumentState::Changed);

        let result = factory.update(&mut document, &CancellationToken::new()).await;

        assert!(result.is_err());
        assert_eq!(document.text, "old");
        assert_eq!(document.state(), DocumentState::Changed);
    }
}
