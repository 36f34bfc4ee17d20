//! Error types for grammar construction and parsing.
//!
//! Errors are split along the same line as the rest of the workbench:
//!
//! - **`GrammarError`**: the grammar itself is malformed. Raised once, when a
//!   language is assembled, and never while parsing documents.
//! - **`SyntaxError`**: a lexing or parsing problem inside one document. These
//!   are collected in the parse result and never raised.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::text::Position;

/// Result type for grammar construction.
pub type Result<T> = std::result::Result<T, GrammarError>;

/// A grammar definition that cannot be compiled.
#[derive(Debug, Error)]
pub enum GrammarError {
    /// A rule call names a parser rule that was never declared
    #[error("unknown parser rule '{0}'")]
    UnknownRule(String),

    /// An element names a terminal rule that was never declared
    #[error("unknown terminal rule '{0}'")]
    UnknownTerminal(String),

    /// Two rules (parser or terminal) share a name
    #[error("duplicate rule name '{0}'")]
    DuplicateRule(String),

    /// The grammar has no node rule to start parsing from
    #[error("grammar '{0}' has no entry rule")]
    MissingEntryRule(String),

    /// A terminal pattern is not a valid regular expression
    #[error("invalid pattern for terminal '{name}': {source}")]
    InvalidPattern {
        /// Terminal rule name
        name: String,
        /// Underlying regex compilation error
        #[source]
        source: regex::Error,
    },

    /// An assignment appears inside another assignment
    #[error("nested assignment to '{inner}' inside '{outer}'")]
    NestedAssignment {
        /// Feature of the enclosing assignment
        outer: String,
        /// Feature of the nested assignment
        inner: String,
    },

    /// An empty keyword or a keyword containing only whitespace
    #[error("invalid keyword '{0}'")]
    InvalidKeyword(String),
}

/// A lexing or parsing problem reported for one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyntaxError {
    /// Human-readable error message
    pub message: String,
    /// Byte offset of the offending input
    pub offset: usize,
    /// Byte length of the offending input (0 at end of input)
    pub length: usize,
    /// Line/character position of `offset`
    pub position: Position,
}

impl std::fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}: {}",
            self.position.line + 1,
            self.position.character + 1,
            self.message
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syntax_error_display_is_one_based() {
        let error = SyntaxError {
            message: "unexpected character".to_string(),
            offset: 4,
            length: 1,
            position: Position::new(0, 4),
        };

        assert_eq!(error.to_string(), "1:5: unexpected character");
    }

    #[test]
    fn grammar_error_names_the_rule() {
        let error = GrammarError::UnknownRule("Entity".to_string());

        assert!(error.to_string().contains("Entity"));
    }
}
