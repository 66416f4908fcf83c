use super::EngineClient;
use crate::config::Config;
use crate::error::{GatewayError, Result};
use crate::options::ConversionOptions;
use crate::process::{Process, SofficeProcess};
use crate::util::{extension_of, stderr_snippet};
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};

/// Talks to a running [`SofficeProcess`] through the `unoconverter` client.
pub struct UnoClient {
    binary: PathBuf,
    process: Arc<SofficeProcess>,
    extensions: Arc<[String]>,
    timeout: Option<Duration>,
    env: BTreeMap<String, String>,
    keep_stderr: bool,
}

impl UnoClient {
    pub fn new(
        cfg: &Config,
        binary: PathBuf,
        process: Arc<SofficeProcess>,
        extensions: Arc<[String]>,
    ) -> Self {
        Self {
            binary,
            process,
            extensions,
            timeout: cfg.engine.conversion_timeout(),
            env: cfg.unoconverter.env.clone(),
            keep_stderr: cfg.debug.keep_converter_stderr,
        }
    }

    fn check_input(&self, input: &Path) -> Result<()> {
        let ext = extension_of(input).unwrap_or_default();
        if !self.extensions.iter().any(|e| *e == ext) {
            return Err(GatewayError::conversion(format!(
                "unsupported input extension {ext:?}: {}",
                input.display()
            )));
        }
        Ok(())
    }

    async fn run(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        args: Vec<String>,
    ) -> Result<()> {
        self.check_input(input)?;

        let mut cmd = Command::new(&self.binary);
        cmd.args(&args)
            .arg("-o")
            .arg(output)
            .arg(input)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (k, v) in &self.env {
            cmd.env(k, v);
        }
        debug!(binary = %self.binary.display(), ?args, "running converter");

        let run = cmd.output();
        let out = tokio::select! {
            _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
            res = with_timeout(self.timeout, run) => res?,
        };

        let stderr = stderr_snippet(&out.stderr);
        if self.keep_stderr && !stderr.is_empty() {
            debug!("converter stderr: {stderr}");
        }

        // The caller's token may already be cancelled; liveness must not
        // depend on it or a cancelled call reads as a crash.
        let alive = if out.status.success() {
            true
        } else {
            self.process.health_check(&CancellationToken::new()).await.is_ok()
        };
        classify(ExitKind::from(out.status), alive, &stderr)?;

        if tokio::fs::metadata(output).await.is_err() {
            return Err(GatewayError::conversion(format!(
                "converter reported success but wrote no output: {}",
                output.display()
            )));
        }
        Ok(())
    }
}

async fn with_timeout<F, T>(limit: Option<Duration>, fut: F) -> Result<T>
where
    F: std::future::Future<Output = std::io::Result<T>>,
{
    match limit {
        Some(limit) => match tokio::time::timeout(limit, fut).await {
            Ok(res) => Ok(res?),
            Err(_) => Err(GatewayError::Timeout(limit)),
        },
        None => Ok(fut.await?),
    }
}

#[async_trait]
impl EngineClient for UnoClient {
    #[instrument(skip_all, fields(input = %input.display()))]
    async fn pdf(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        options: &ConversionOptions,
    ) -> Result<()> {
        options.validate()?;
        let args = pdf_args(self.process.host(), self.process.port(), options);
        self.run(cancel, input, output, args).await
    }

    #[instrument(skip_all, fields(input = %input.display(), format = target_ext))]
    async fn document_format(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        target_ext: &str,
    ) -> Result<()> {
        validate_target_ext(target_ext)?;
        let args = base_args(self.process.host(), self.process.port(), target_ext);
        self.run(cancel, input, output, args).await
    }
}

fn base_args(host: &str, port: u16, format: &str) -> Vec<String> {
    vec![
        "--no-launch".into(),
        "--host".into(),
        host.into(),
        "--port".into(),
        port.to_string(),
        "--format".into(),
        format.into(),
    ]
}

fn pdf_args(host: &str, port: u16, options: &ConversionOptions) -> Vec<String> {
    let mut args = base_args(host, port, "pdf");
    if let Some(pw) = options.password.as_deref() {
        args.push("--password".into());
        args.push(pw.into());
    }
    if options.landscape {
        args.push("--landscape".into());
    }
    if options.update_indexes {
        args.push("--update-indexes".into());
    }
    for pair in options.export_filter_data() {
        args.push("--export".into());
        args.push(pair);
    }
    args
}

fn validate_target_ext(ext: &str) -> Result<()> {
    if ext.is_empty() || !ext.chars().all(|c| c.is_ascii_alphanumeric()) {
        return Err(GatewayError::InvalidOptions(format!(
            "invalid target extension: {ext:?}"
        )));
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ExitKind {
    Success,
    Code(i32),
    Signal(i32),
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            return Self::Success;
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return Self::Signal(sig);
            }
        }
        Self::Code(status.code().unwrap_or(-1))
    }
}

/// Maps a converter exit onto the error taxonomy. Exit 134/139 are the shell
/// conventions for SIGABRT/SIGSEGV core dumps.
fn classify(kind: ExitKind, engine_alive: bool, stderr: &str) -> Result<()> {
    match kind {
        ExitKind::Success => Ok(()),
        ExitKind::Signal(sig) => Err(GatewayError::crashed(format!(
            "converter killed by signal {sig}: {stderr}"
        ))),
        ExitKind::Code(code @ (134 | 139)) => Err(GatewayError::crashed(format!(
            "core dumped (exit {code}): {stderr}"
        ))),
        ExitKind::Code(code) if !engine_alive => Err(GatewayError::crashed(format!(
            "engine died during conversion (exit {code}): {stderr}"
        ))),
        ExitKind::Code(code) => Err(GatewayError::conversion(format!(
            "converter exited with {code}: {stderr}"
        ))),
    }
}
