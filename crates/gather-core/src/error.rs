use thiserror::Error;

use crate::auth::AuthError;
use crate::store::StoreError;

/// Failure taxonomy for the gateway. A recipient being offline is not an
/// error (expected, handled as a silent real-time drop), so it has no
/// variant here.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Transient network failure; the client's bounded reconnect policy
    /// owns recovery.
    #[error("transport error: {0}")]
    Transport(String),
    /// Invalid or expired credential; fatal for the current connection and
    /// never retried automatically.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Malformed input, rejected before any I/O.
    #[error("validation error: {0}")]
    Validation(String),
    /// Message store unavailable; the send fails and the optimistic entry
    /// is reverted.
    #[error(transparent)]
    Persistence(#[from] StoreError),
}
