//! Cooperative cancellation helpers.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use crate::error::{Error, Result};

/// Long-running work yields to the runtime at least this often.
const YIELD_INTERVAL: Duration = Duration::from_millis(10);

static LAST_YIELD: LazyLock<Mutex<Instant>> = LazyLock::new(|| Mutex::new(Instant::now()));

/// Yield to the runtime if the last yield is older than the yield interval,
/// then fail with [`Error::Cancelled`] if `cancel` has fired.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] if the token is cancelled.
pub async fn interrupt_and_check(cancel: &CancellationToken) -> Result<()> {
    let due = {
        let mut last = LAST_YIELD.lock();
        let now = Instant::now();
        if now.duration_since(*last) >= YIELD_INTERVAL {
            *last = now;
            true
        } else {
            false
        }
    };
    if due {
        tokio::task::yield_now().await;
    }
    check(cancel)
}

/// Fail with [`Error::Cancelled`] if `cancel` has fired.
///
/// # Errors
///
/// Returns [`Error::Cancelled`] if the token is cancelled.
pub fn check(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        Err(Error::Cancelled)
    } else {
        Ok(())
    }
}
