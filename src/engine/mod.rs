pub mod extensions;
pub mod uno;

use crate::error::Result;
use crate::options::ConversionOptions;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

pub use uno::UnoClient;

/// A single conversion through the engine's automation channel.
///
/// Implementations report an abnormal engine exit as
/// [`GatewayError::EngineCrashed`](crate::error::GatewayError::EngineCrashed)
/// and never retry on their own.
#[async_trait]
pub trait EngineClient: Send + Sync {
    async fn pdf(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
    ) -> Result<()>;

    async fn document_format(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        target_ext: &str,
    ) -> Result<()>;
}
