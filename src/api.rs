//! Caller-facing conversion surface.
//!
//! Request handlers hold an `Arc<dyn Converter>` obtained from the
//! [`Provider`](crate::provider::Provider) and never see the engine process.

use crate::error::Result;
use crate::options::ConversionOptions;
use async_trait::async_trait;
use std::path::Path;
use tokio_util::sync::CancellationToken;

#[async_trait]
pub trait Converter: Send + Sync {
    /// Converts `input` to a PDF at `output`.
    async fn convert_to_pdf(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        options: ConversionOptions,
    ) -> Result<()>;

    /// Converts `input` to the format named by `target_ext` (e.g. `docx`).
    async fn convert_format(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        target_ext: &str,
    ) -> Result<()>;

    /// Input extensions the engine accepts. Fixed for the process lifetime.
    fn supported_extensions(&self) -> &[String];

    /// Stops the engine. Later conversions start it again.
    async fn shutdown(&self) -> Result<()>;
}
