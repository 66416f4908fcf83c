//! Error taxonomy for the conversion gateway.
//!
//! Recovery decisions are made on the variant, never on the message text.

use std::time::Duration;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, GatewayError>;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The engine process terminated abnormally during a call.
    #[error("engine crashed: {detail}")]
    EngineCrashed { detail: String },

    /// The engine ran but rejected the input or reported a tool-level error.
    #[error("conversion failed: {reason}")]
    ConversionFailed { reason: String },

    /// The engine binary or its environment is unusable.
    #[error("engine provisioning failed: {0}")]
    ProvisioningFailed(String),

    /// The caller's token was cancelled while waiting for the lock or the engine.
    #[error("operation cancelled")]
    Cancelled,

    #[error("conversion timed out after {0:?}")]
    Timeout(Duration),

    #[error("conversion queue is full ({limit} callers already waiting)")]
    QueueFull { limit: usize },

    #[error("invalid conversion options: {0}")]
    InvalidOptions(String),

    /// Start, restart or health check of the engine process failed.
    #[error("engine unavailable: {0}")]
    EngineUnavailable(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl GatewayError {
    pub fn crashed(detail: impl Into<String>) -> Self {
        Self::EngineCrashed {
            detail: detail.into(),
        }
    }

    pub fn conversion(reason: impl Into<String>) -> Self {
        Self::ConversionFailed {
            reason: reason.into(),
        }
    }

    /// True when the failure is recoverable by restarting the engine.
    pub fn is_crash(&self) -> bool {
        matches!(self, Self::EngineCrashed { .. })
    }

    /// True when the engine may be left mid-operation and must be recycled
    /// before it serves another call.
    pub fn leaves_engine_dirty(&self) -> bool {
        matches!(
            self,
            Self::EngineCrashed { .. } | Self::Cancelled | Self::Timeout(_)
        )
    }
}
