//! In-task parsing.

use async_trait::async_trait;
use tenon_syntax::{AstParser, ParseResult};
use tokio_util::sync::CancellationToken;

use super::ParserDispatcher;
use crate::error::Result;

/// Parses on the calling task. Cancellation is not observed; the result is
/// available as soon as the call is polled.
#[derive(Debug, Clone)]
pub struct SyncParser {
    parser: AstParser,
}

impl SyncParser {
    /// Wrap a parser.
    #[must_use]
    pub const fn new(parser: AstParser) -> Self {
        Self { parser }
    }
}

#[async_trait]
impl ParserDispatcher for SyncParser {
    async fn parse(&self, text: &str, _cancel: &CancellationToken) -> Result<ParseResult> {
        Ok(self.parser.parse(text))
    }
}
