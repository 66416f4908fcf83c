//! Lifecycle of the long-lived engine process.
//!
//! The gateway only ever talks to the engine process through [`Process`];
//! [`SofficeProcess`] is the headless LibreOffice implementation.

mod shutdown;
mod soffice;

pub use shutdown::shutdown_child;
pub use soffice::SofficeProcess;

use crate::error::Result;
use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Process: Send + Sync {
    /// Launches the process and returns once it passes a health check.
    async fn start(&self, cancel: &CancellationToken) -> Result<()>;

    /// Terminates the process. Stopping a stopped process is a no-op.
    async fn stop(&self, cancel: &CancellationToken) -> Result<()>;

    /// Fails unless the process is running and accepting automation calls.
    async fn health_check(&self, cancel: &CancellationToken) -> Result<()>;
}
