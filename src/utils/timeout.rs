//! Timeout constants and async timeout helpers.

use std::future::Future;
use std::time::Duration;

use crate::error::{ProtocolError, Result};

/// Default timeout for connects and request/response waits
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a stopping server waits for sessions to drain
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default accounting window for read throughput
pub const ACCOUNTING_WINDOW: Duration = Duration::from_secs(1);

/// Default time a session may stay under the minimum read average
pub const IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Run `fut`, mapping expiry to [`ProtocolError::Timeout`]
pub async fn with_timeout_error<F, T>(fut: F, duration: Duration) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(ProtocolError::Timeout),
    }
}
