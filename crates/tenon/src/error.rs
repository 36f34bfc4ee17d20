//! Error types for workbench operations.
//!
//! Problems inside a document (lexer, parser and linking errors, validation
//! findings) are data, not errors: they are collected on the document and
//! never returned from an operation. [`Error`] covers what stops an
//! operation:
//!
//! - **Cancellation**: the one expected control-flow signal. Builds resume
//!   later from each document's last completed phase.
//! - **Infrastructure**: I/O, worker threads, (de)serialization.
//! - **Usage**: unknown documents, unreachable states, bad configuration.

use thiserror::Error;

use crate::document::DocumentState;

/// Result type for workbench operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for workbench operations.
#[derive(Debug, Error)]
pub enum Error {
    /// The operation was cancelled through its cancellation token
    #[error("operation cancelled")]
    Cancelled,

    /// File system operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No document is registered under the URI
    #[error("document not found: {0}")]
    DocumentNotFound(String),

    /// A document is already registered under the URI
    #[error("document already exists: {0}")]
    DocumentExists(String),

    /// A path or string is not a usable document URI
    #[error("invalid document URI: {0}")]
    InvalidUri(String),

    /// The language grammar does not compile
    #[error("grammar error: {0}")]
    Grammar(#[from] tenon_syntax::GrammarError),

    /// A parser worker thread failed
    #[error("parser worker failed: {0}")]
    Worker(String),

    /// The workspace passed `state` without the document reaching it
    #[error("document {uri} cannot reach state {state} in the current build")]
    StateUnreachable {
        /// Document that was waited for
        uri: String,
        /// State that was waited for
        state: DocumentState,
    },

    /// Invalid configuration or arguments
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON (de)serialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// YAML (de)serialization failed
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An internal invariant was violated
    #[error("internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Returns `true` for [`Error::Cancelled`].
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
