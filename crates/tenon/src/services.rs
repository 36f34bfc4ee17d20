//! Language services bundle.
//!
//! [`LanguageServices`] wires one language's collaborators together: the
//! parser dispatcher, document registry and factory, index, scoping,
//! linking and validation. [`LanguageServicesBuilder`] starts from the
//! default collaborators and accepts replacements for each pluggable one.

use std::sync::Arc;

use tenon_syntax::{AstParser, Grammar};

use crate::config::{ParserMode, WorkbenchConfig};
use crate::dispatch::{ParserDispatcher, SyncParser, WorkerPool};
use crate::document::{DocumentFactory, Documents};
use crate::error::Result;
use crate::fs::{FileSystemProvider, LocalFileSystem, TextDocuments};
use crate::index::IndexManager;
use crate::linker::{DefaultLinker, Linker};
use crate::references::{DefaultReferenceDescriptionProvider, ReferenceDescriptionProvider};
use crate::scope::{DefaultScopeComputation, ScopeComputation};
use crate::validation::{DefaultDocumentValidator, DocumentValidator, ValidationRegistry};

/// Collaborators serving one language in one workspace.
pub struct LanguageServices {
    /// Compiled grammar, used for type reflection
    pub grammar: Arc<Grammar>,
    /// Parses document text
    pub parser: Arc<dyn ParserDispatcher>,
    /// Reads stored documents
    pub file_system: Arc<dyn FileSystemProvider>,
    /// Open editor buffers
    pub text_documents: Arc<TextDocuments>,
    /// Creates and reparses documents
    pub factory: Arc<DocumentFactory>,
    /// Registered documents
    pub documents: Arc<Documents>,
    /// Exported and local symbols
    pub scope_computation: Arc<dyn ScopeComputation>,
    /// Symbol and reference caches
    pub index: Arc<IndexManager>,
    /// Resolves cross-references
    pub linker: Arc<dyn Linker>,
    /// Registered validation checks
    pub validation: Arc<ValidationRegistry>,
    /// Produces diagnostics
    pub validator: Arc<dyn DocumentValidator>,
    /// Extensions of files loaded as documents
    pub file_extensions: Vec<String>,
}

impl std::fmt::Debug for LanguageServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LanguageServices")
            .field("grammar", &self.grammar.name())
            .field("documents", &self.documents.len())
            .field("file_extensions", &self.file_extensions)
            .finish_non_exhaustive()
    }
}

impl LanguageServices {
    /// Start assembling services around `parser`.
    #[must_use]
    pub fn builder(parser: AstParser) -> LanguageServicesBuilder {
        LanguageServicesBuilder {
            parser,
            dispatcher: None,
            file_system: None,
            text_documents: None,
            scope_computation: None,
            reference_provider: None,
            linker: None,
            validator: None,
            validation: Arc::new(ValidationRegistry::new()),
        }
    }
}

/// Builder for [`LanguageServices`].
pub struct LanguageServicesBuilder {
    parser: AstParser,
    dispatcher: Option<Arc<dyn ParserDispatcher>>,
    file_system: Option<Arc<dyn FileSystemProvider>>,
    text_documents: Option<Arc<TextDocuments>>,
    scope_computation: Option<Arc<dyn ScopeComputation>>,
    reference_provider: Option<Arc<dyn ReferenceDescriptionProvider>>,
    linker: Option<Arc<dyn Linker>>,
    validator: Option<Arc<dyn DocumentValidator>>,
    validation: Arc<ValidationRegistry>,
}

impl LanguageServicesBuilder {
    /// Use `dispatcher` instead of the one selected by the configuration.
    #[must_use]
    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn ParserDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Read documents through `file_system` instead of the local disk.
    #[must_use]
    pub fn with_file_system(mut self, file_system: Arc<dyn FileSystemProvider>) -> Self {
        self.file_system = Some(file_system);
        self
    }

    /// Share an existing open-buffer registry.
    #[must_use]
    pub fn with_text_documents(mut self, text_documents: Arc<TextDocuments>) -> Self {
        self.text_documents = Some(text_documents);
        self
    }

    /// Replace [`DefaultScopeComputation`].
    #[must_use]
    pub fn with_scope_computation(mut self, scope_computation: Arc<dyn ScopeComputation>) -> Self {
        self.scope_computation = Some(scope_computation);
        self
    }

    /// Replace [`DefaultReferenceDescriptionProvider`].
    #[must_use]
    pub fn with_reference_provider(mut self, reference_provider: Arc<dyn ReferenceDescriptionProvider>) -> Self {
        self.reference_provider = Some(reference_provider);
        self
    }

    /// Replace [`DefaultLinker`].
    #[must_use]
    pub fn with_linker(mut self, linker: Arc<dyn Linker>) -> Self {
        self.linker = Some(linker);
        self
    }

    /// Replace [`DefaultDocumentValidator`].
    #[must_use]
    pub fn with_validator(mut self, validator: Arc<dyn DocumentValidator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// The validation registry the services will use, for registering checks.
    #[must_use]
    pub const fn validation(&self) -> &Arc<ValidationRegistry> {
        &self.validation
    }

    /// Assemble the services.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Config`] if `config` is invalid.
    pub fn build(self, config: &WorkbenchConfig) -> Result<LanguageServices> {
        config.validate()?;
        let grammar = Arc::clone(self.parser.grammar());

        let parser: Arc<dyn ParserDispatcher> = match (self.dispatcher, config.parser.mode) {
            (Some(dispatcher), _) => dispatcher,
            (None, ParserMode::Sync) => Arc::new(SyncParser::new(self.parser)),
            (None, ParserMode::Workers) => Arc::new(WorkerPool::new(self.parser, config.worker_pool())?),
        };
        let file_system = self.file_system.unwrap_or_else(|| Arc::new(LocalFileSystem));
        let text_documents = self.text_documents.unwrap_or_default();
        let factory = Arc::new(DocumentFactory::new(
            Arc::clone(&parser),
            Arc::clone(&file_system),
            Arc::clone(&text_documents),
        ));

        let scope_computation = self
            .scope_computation
            .unwrap_or_else(|| Arc::new(DefaultScopeComputation));
        let reference_provider = self
            .reference_provider
            .unwrap_or_else(|| Arc::new(DefaultReferenceDescriptionProvider));
        let index = Arc::new(IndexManager::new(
            Arc::clone(&grammar),
            Arc::clone(&scope_computation),
            reference_provider,
        ));
        let linker = self
            .linker
            .unwrap_or_else(|| Arc::new(DefaultLinker::new(Arc::clone(&grammar), Arc::clone(&index))));
        let validator = self.validator.unwrap_or_else(|| {
            Arc::new(DefaultDocumentValidator::new(
                Arc::clone(&grammar),
                Arc::clone(&self.validation),
            ))
        });

        Ok(LanguageServices {
            grammar,
            parser,
            file_system,
            text_documents,
            factory,
            documents: Arc::new(Documents::new()),
            scope_computation,
            index,
            linker,
            validation: self.validation,
            validator,
            file_extensions: config.file_extensions.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domainmodel;
    use crate::error::Error;

    #[test]
    fn builds_from_default_config() {
        let services = domainmodel::services(&WorkbenchConfig::default()).unwrap();

        assert_eq!(services.grammar.name(), "DomainModel");
        assert_eq!(services.file_extensions, [".dmodel"]);
        assert!(services.documents.is_empty());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let mut config = WorkbenchConfig::default();
        config.file_extensions.clear();

        let result = LanguageServices::builder(domainmodel::parser().unwrap()).build(&config);

        assert!(matches!(result, Err(Error::Config(_))));
    }
}
