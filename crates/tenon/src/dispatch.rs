//! Parser dispatch.
//!
//! A [`ParserDispatcher`] turns text into a [`ParseResult`]. Two
//! implementations exist:
//!
//! - [`SyncParser`]: parses on the calling task
//! - [`WorkerPool`]: parses on a bounded pool of OS threads, so long parses
//!   neither block the runtime nor outlive their cancellation for long

mod sync;
mod worker;

use async_trait::async_trait;
use tenon_syntax::ParseResult;
use tokio_util::sync::CancellationToken;

pub use sync::SyncParser;
pub use worker::{WorkerPool, WorkerPoolConfig};

use crate::error::Result;

/// Parses document text.
///
/// Implementations must be thread-safe (`Send + Sync`) so one dispatcher can
/// serve every document of a workspace.
#[async_trait]
pub trait ParserDispatcher: Send + Sync {
    /// Parse `text`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::Error::Cancelled`] if `cancel` fires before a result
    /// is available, or [`crate::Error::Worker`] if the parsing thread fails.
    /// Syntax errors are part of the result, never an error.
    async fn parse(&self, text: &str, cancel: &CancellationToken) -> Result<ParseResult>;
}
