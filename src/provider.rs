//! Lazy, once-per-process construction of the supervised engine.

use crate::api::Converter;
use crate::config::Config;
use crate::engine::{UnoClient, extensions};
use crate::error::{GatewayError, Result};
use crate::process::SofficeProcess;
use crate::supervisor::{Policy, Supervisor};
use crate::util::resolve_binary;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

const VERSION_PROBE_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds a ready-to-use converter. Called at most once by [`Provider`].
#[async_trait]
pub trait EngineFactory: Send + Sync {
    async fn build(&self) -> Result<Arc<dyn Converter>>;
}

/// Hands out the same converter to every caller.
///
/// The first `acquire` builds it; its outcome, success or provisioning
/// failure, is kept for the process lifetime.
pub struct Provider {
    factory: Box<dyn EngineFactory>,
    cell: OnceCell<std::result::Result<Arc<dyn Converter>, String>>,
}

impl Provider {
    pub fn new(factory: impl EngineFactory + 'static) -> Self {
        Self {
            factory: Box::new(factory),
            cell: OnceCell::new(),
        }
    }

    pub fn libreoffice(cfg: &Config) -> Self {
        Self::new(LibreOfficeFactory::new(cfg))
    }

    pub async fn acquire(&self) -> Result<Arc<dyn Converter>> {
        let cached = self
            .cell
            .get_or_init(|| async {
                match self.factory.build().await {
                    Ok(converter) => Ok(converter),
                    Err(GatewayError::ProvisioningFailed(msg)) => {
                        error!("engine provisioning failed: {msg}");
                        Err(msg)
                    }
                    Err(other) => {
                        error!("engine provisioning failed: {other}");
                        Err(other.to_string())
                    }
                }
            })
            .await;

        match cached {
            Ok(converter) => Ok(Arc::clone(converter)),
            Err(msg) => Err(GatewayError::ProvisioningFailed(msg.clone())),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineDiag {
    pub soffice: Option<String>,
    pub soffice_version: Option<String>,
    pub unoconverter: Option<String>,
    pub extension_count: usize,
    pub ok: bool,
    #[serde(default)]
    pub error: Option<String>,
}

pub struct LibreOfficeFactory {
    cfg: Config,
}

impl LibreOfficeFactory {
    pub fn new(cfg: &Config) -> Self {
        Self { cfg: cfg.clone() }
    }

    fn locate(&self) -> Result<(PathBuf, PathBuf, Vec<String>)> {
        let soffice = resolve_binary(&self.cfg.soffice.binary).ok_or_else(|| {
            GatewayError::ProvisioningFailed(format!(
                "soffice binary not found: {}",
                self.cfg.soffice.binary
            ))
        })?;
        let converter = resolve_binary(&self.cfg.unoconverter.binary).ok_or_else(|| {
            GatewayError::ProvisioningFailed(format!(
                "unoconverter binary not found: {}",
                self.cfg.unoconverter.binary
            ))
        })?;
        let exts = extensions::resolve(&self.cfg);
        if exts.is_empty() {
            return Err(GatewayError::ProvisioningFailed(
                "supported extension list is empty".into(),
            ));
        }
        Ok((soffice, converter, exts))
    }

    /// Environment report without starting the engine.
    pub async fn doctor(&self) -> EngineDiag {
        let soffice = resolve_binary(&self.cfg.soffice.binary);
        let unoconverter = resolve_binary(&self.cfg.unoconverter.binary);
        let soffice_version = match &soffice {
            Some(path) => soffice_version(path).await,
            None => None,
        };
        let error = self.locate().err().map(|e| e.to_string());
        EngineDiag {
            soffice: soffice.map(|p| p.display().to_string()),
            soffice_version,
            unoconverter: unoconverter.map(|p| p.display().to_string()),
            extension_count: extensions::resolve(&self.cfg).len(),
            ok: error.is_none(),
            error,
        }
    }
}

async fn soffice_version(binary: &Path) -> Option<String> {
    let mut cmd = Command::new(binary);
    cmd.arg("--version").kill_on_drop(true);
    let out = tokio::time::timeout(VERSION_PROBE_TIMEOUT, cmd.output())
        .await
        .ok()?
        .ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_string())
}

#[async_trait]
impl EngineFactory for LibreOfficeFactory {
    async fn build(&self) -> Result<Arc<dyn Converter>> {
        let (soffice, converter, exts) = self.locate()?;
        info!(
            soffice = %soffice.display(),
            unoconverter = %converter.display(),
            extensions = exts.len(),
            "provisioning engine"
        );

        let exts: Arc<[String]> = exts.into();
        let process = Arc::new(SofficeProcess::new(&self.cfg, soffice));
        let client = UnoClient::new(&self.cfg, converter, Arc::clone(&process), Arc::clone(&exts));
        let supervisor = Supervisor::new(client, process, exts, Policy::from_config(&self.cfg.engine));

        if self.cfg.engine.auto_start {
            supervisor
                .start(&CancellationToken::new())
                .await
                .map_err(|e| GatewayError::ProvisioningFailed(format!("initial start: {e}")))?;
        }

        Ok(Arc::new(supervisor))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn missing_binaries() -> Config {
        let mut cfg = Config::default();
        cfg.soffice.binary = "/definitely/not/here/soffice".into();
        cfg.unoconverter.binary = "/definitely/not/here/unoconverter".into();
        cfg
    }

    #[tokio::test]
    async fn missing_soffice_fails_provisioning() {
        let provider = Provider::libreoffice(&missing_binaries());
        let err = provider.acquire().await.err().expect("must fail");
        match err {
            GatewayError::ProvisioningFailed(msg) => assert!(msg.contains("soffice")),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn doctor_reports_missing_binaries() {
        let diag = LibreOfficeFactory::new(&missing_binaries()).doctor().await;
        assert!(!diag.ok);
        assert!(diag.soffice.is_none());
        assert!(diag.error.is_some());
        assert!(diag.extension_count > 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn non_executable_soffice_fails_provisioning() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let bin = dir.path().join("soffice");
        std::fs::write(&bin, b"#!/bin/sh\n").unwrap();
        std::fs::set_permissions(&bin, std::fs::Permissions::from_mode(0o644)).unwrap();

        let mut cfg = missing_binaries();
        cfg.soffice.binary = bin.display().to_string();
        match Provider::libreoffice(&cfg).acquire().await.err() {
            Some(GatewayError::ProvisioningFailed(msg)) => assert!(msg.contains("soffice")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
