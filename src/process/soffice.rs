use super::{Process, shutdown_child};
use crate::config::Config;
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::net::TcpStream;
use tokio::process::{Child, Command};
use tokio::sync::Mutex;
use tokio::time::{Instant, sleep, timeout};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const START_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// Headless LibreOffice listening for UNO automation on a TCP socket.
pub struct SofficeProcess {
    binary: PathBuf,
    host: String,
    port: u16,
    profile_root: PathBuf,
    start_timeout: Duration,
    stop_grace: Duration,
    probe_timeout: Duration,
    generation: AtomicU64,
    running: Mutex<Option<Running>>,
}

struct Running {
    child: Child,
    profile_dir: PathBuf,
}

impl SofficeProcess {
    pub fn new(cfg: &Config, binary: PathBuf) -> Self {
        let profile_root = if cfg.soffice.profile_root.is_empty() {
            std::env::temp_dir()
        } else {
            crate::util::expand_tilde(&cfg.soffice.profile_root)
        };
        Self {
            binary,
            host: cfg.soffice.host.clone(),
            port: cfg.soffice.port,
            profile_root,
            start_timeout: cfg.engine.start_timeout(),
            stop_grace: cfg.engine.stop_grace(),
            probe_timeout: Duration::from_millis(cfg.soffice.health_probe_ms.max(1)),
            generation: AtomicU64::new(0),
            running: Mutex::new(None),
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    fn next_profile_dir(&self) -> PathBuf {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        self.profile_root.join(format!(
            "officegate-{}-{}-{generation}",
            std::process::id(),
            self.port
        ))
    }

    fn spawn(&self, profile_dir: &Path) -> Result<Child> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("--headless")
            .arg("--invisible")
            .arg("--nocrashreport")
            .arg("--nodefault")
            .arg("--nologo")
            .arg("--nofirststartwizard")
            .arg("--norestore")
            .arg(format!(
                "-env:UserInstallation=file://{}",
                profile_dir.display()
            ))
            .arg(format!(
                "--accept=socket,host={},port={},tcpNoDelay=1;urp;StarOffice.ComponentContext",
                self.host, self.port
            ))
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        debug!(binary = %self.binary.display(), port = self.port, "spawning soffice");
        let mut child = cmd.spawn().map_err(|e| {
            GatewayError::EngineUnavailable(format!(
                "spawning {}: {e}",
                self.binary.display()
            ))
        })?;

        if let Some(stderr) = child.stderr.take() {
            let port = self.port;
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    debug!(port, "soffice: {line}");
                }
            });
        }

        Ok(child)
    }

    async fn probe_socket(&self) -> Result<()> {
        let addr = format!("{}:{}", self.host, self.port);
        match timeout(self.probe_timeout, TcpStream::connect(&addr)).await {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(GatewayError::EngineUnavailable(format!(
                "connect {addr}: {e}"
            ))),
            Err(_) => Err(GatewayError::EngineUnavailable(format!(
                "connect {addr}: timed out after {:?}",
                self.probe_timeout
            ))),
        }
    }

    async fn check_locked(&self, running: &mut Option<Running>) -> Result<()> {
        let Some(r) = running.as_mut() else {
            return Err(GatewayError::EngineUnavailable("soffice is not running".into()));
        };
        if let Some(status) = r.child.try_wait()? {
            return Err(GatewayError::EngineUnavailable(format!(
                "soffice exited with {status}"
            )));
        }
        self.probe_socket().await
    }

    async fn wait_until_ready(
        &self,
        running: &mut Option<Running>,
        cancel: &CancellationToken,
    ) -> Result<()> {
        let deadline = Instant::now() + self.start_timeout;
        loop {
            let err = match self.check_locked(running).await {
                Ok(()) => return Ok(()),
                Err(e) => e,
            };
            let exited = running
                .as_mut()
                .map(|r| matches!(r.child.try_wait(), Ok(Some(_))))
                .unwrap_or(true);
            if exited || Instant::now() >= deadline {
                return Err(err);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(GatewayError::Cancelled),
                _ = sleep(START_POLL_INTERVAL) => {}
            }
        }
    }

    async fn stop_locked(&self, running: &mut Option<Running>) -> Result<()> {
        let Some(mut r) = running.take() else {
            return Ok(());
        };
        let status = shutdown_child(&mut r.child, self.stop_grace).await;
        if let Err(e) = tokio::fs::remove_dir_all(&r.profile_dir).await {
            debug!(dir = %r.profile_dir.display(), "profile cleanup skipped: {e}");
        }
        let status = status?;
        info!(port = self.port, %status, "soffice stopped");
        Ok(())
    }
}

#[async_trait]
impl Process for SofficeProcess {
    async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        if let Some(r) = running.as_mut() {
            if r.child.try_wait()?.is_none() {
                debug!(port = self.port, "soffice already running");
                return Ok(());
            }
            self.stop_locked(&mut running).await?;
        }

        let profile_dir = self.next_profile_dir();
        let child = self.spawn(&profile_dir)?;
        *running = Some(Running { child, profile_dir });

        let started = Instant::now();
        if let Err(e) = self.wait_until_ready(&mut running, cancel).await {
            warn!(port = self.port, "soffice failed to become ready: {e}");
            if let Err(stop_err) = self.stop_locked(&mut running).await {
                debug!("stop after failed start: {stop_err}");
            }
            return Err(e);
        }

        info!(
            port = self.port,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "soffice started"
        );
        Ok(())
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<()> {
        // Stop runs to completion; an interrupted stop would leak the child.
        let mut running = self.running.lock().await;
        self.stop_locked(&mut running).await
    }

    async fn health_check(&self, cancel: &CancellationToken) -> Result<()> {
        let mut running = self.running.lock().await;
        tokio::select! {
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            res = self.check_locked(&mut running) => res,
        }
    }
}
