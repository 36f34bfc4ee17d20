//! Document model.
//!
//! A [`Document`] is one managed source file moving through the build
//! phases described by [`DocumentState`]. Documents live behind a
//! [`DocumentHandle`] in the [`Documents`] registry and are created by the
//! [`DocumentFactory`].
//!
//! # State invariant
//!
//! A document at state `X` has completed every phase below `X`. The state
//! only moves forward, except when an invalidation resets it to
//! [`DocumentState::Changed`] or the relink cascade down-grades it.

mod factory;
mod registry;
mod uri;

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tenon_syntax::{ParseResult, ReferenceLocator, Resolution};
use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use factory::DocumentFactory;
pub use registry::Documents;
pub use uri::DocumentUri;

use crate::scope::PrecomputedScopes;
use crate::validation::Diagnostic;

/// Build phase a document has completed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DocumentState {
    /// Text changed; nothing derived from it is valid
    Changed = 0,
    /// AST and CST are current
    Parsed = 1,
    /// Exports are in the symbol index
    IndexedContent = 2,
    /// Local scopes are precomputed
    ComputedScopes = 3,
    /// Cross-references are resolved
    Linked = 4,
    /// Outgoing references are in the reference index
    IndexedReferences = 5,
    /// Diagnostics are computed
    Validated = 6,
}

impl DocumentState {
    /// All states in phase order.
    pub const ALL: [Self; 7] = [
        Self::Changed,
        Self::Parsed,
        Self::IndexedContent,
        Self::ComputedScopes,
        Self::Linked,
        Self::IndexedReferences,
        Self::Validated,
    ];
}

impl fmt::Display for DocumentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// One managed source file.
#[derive(Debug, Clone)]
pub struct Document {
    /// Identity key
    pub uri: DocumentUri,
    /// Current text
    pub text: String,
    /// Bumped on each reparse
    pub version: u64,
    state: DocumentState,
    /// Trees and syntax errors of the last parse
    pub parse_result: ParseResult,
    /// Locally visible symbols per AST node, once scopes are computed
    pub precomputed_scopes: Option<PrecomputedScopes>,
    /// Every cross-reference visited while linking
    pub references: Vec<ReferenceLocator>,
    /// Validation results
    pub diagnostics: Vec<Diagnostic>,
}

impl Document {
    /// A parsed document.
    #[must_use]
    pub fn parsed(uri: DocumentUri, text: String, parse_result: ParseResult) -> Self {
        Self {
            uri,
            text,
            version: 1,
            state: DocumentState::Parsed,
            parse_result,
            precomputed_scopes: None,
            references: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// A document that still has to be read and parsed.
    #[must_use]
    pub fn unparsed(uri: DocumentUri) -> Self {
        Self {
            uri,
            text: String::new(),
            version: 0,
            state: DocumentState::Changed,
            parse_result: ParseResult::empty(""),
            precomputed_scopes: None,
            references: Vec::new(),
            diagnostics: Vec::new(),
        }
    }

    /// Completed build phase.
    #[must_use]
    pub const fn state(&self) -> DocumentState {
        self.state
    }

    /// Move to `state`. Used by the builder after a phase completes.
    pub(crate) fn set_state(&mut self, state: DocumentState) {
        self.state = state;
    }

    /// Lower the state to at most `state`.
    pub(crate) fn lower_to(&mut self, state: DocumentState) {
        if self.state > state {
            self.state = state;
        }
    }

    /// Reset to [`DocumentState::Changed`], dropping everything derived from
    /// the parse except the trees themselves.
    pub(crate) fn invalidate(&mut self) {
        self.state = DocumentState::Changed;
        self.precomputed_scopes = None;
        self.diagnostics.clear();
    }

    /// Returns `true` if the parsed text differs from the current text.
    #[must_use]
    pub fn needs_reparse(&self) -> bool {
        self.version == 0 || self.parse_result.cst.text() != self.text
    }

    /// Returns `true` if any visited reference failed to resolve.
    #[must_use]
    pub fn has_linking_errors(&self) -> bool {
        self.references.iter().any(|locator| {
            self.parse_result
                .ast
                .reference(locator)
                .is_some_and(|reference| matches!(reference.resolution, Resolution::Error(_)))
        })
    }
}

/// Shared, lockable handle to a registered document.
///
/// The URI is kept outside the lock so registries and listeners can identify
/// a document without awaiting it.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    uri: DocumentUri,
    inner: Arc<RwLock<Document>>,
}

impl DocumentHandle {
    /// Wrap a document.
    #[must_use]
    pub fn new(document: Document) -> Self {
        Self {
            uri: document.uri.clone(),
            inner: Arc::new(RwLock::new(document)),
        }
    }

    /// Document identity.
    #[must_use]
    pub const fn uri(&self) -> &DocumentUri {
        &self.uri
    }

    /// Shared access.
    pub async fn read(&self) -> RwLockReadGuard<'_, Document> {
        self.inner.read().await
    }

    /// Exclusive access.
    pub async fn write(&self) -> RwLockWriteGuard<'_, Document> {
        self.inner.write().await
    }

    /// Current state.
    pub async fn state(&self) -> DocumentState {
        self.inner.read().await.state()
    }
}
