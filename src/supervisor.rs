//! Crash recovery and serialized access for the single engine instance.
//!
//! Every conversion runs under one lock. A call that ends in
//! [`GatewayError::EngineCrashed`] restarts the process and is retried exactly
//! once; a second crash is returned to the caller.

use crate::api::Converter;
use crate::config;
use crate::engine::EngineClient;
use crate::error::{GatewayError, Result};
use crate::options::ConversionOptions;
use crate::process::Process;
use async_trait::async_trait;
use std::future::Future;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

#[derive(Debug, Clone, Default)]
pub struct Policy {
    /// Recycle after this many successful conversions; 0 disables recycling.
    pub restart_after: u64,
    /// Callers allowed to wait for the lock; 0 means unbounded.
    pub max_queue_size: usize,
}

impl Policy {
    pub fn from_config(cfg: &config::Engine) -> Self {
        Self {
            restart_after: cfg.restart_after,
            max_queue_size: cfg.max_queue_size,
        }
    }
}

#[derive(Debug, Default)]
struct EngineState {
    running: bool,
    dirty: bool,
    conversions: u64,
}

pub struct Supervisor<C, P> {
    client: C,
    process: Arc<P>,
    state: Arc<Mutex<EngineState>>,
    waiting: AtomicUsize,
    policy: Policy,
    extensions: Arc<[String]>,
}

/// Decrements the waiter count however the wait ends.
struct QueueSlot<'a>(&'a AtomicUsize);

impl Drop for QueueSlot<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl<C, P> Supervisor<C, P>
where
    C: EngineClient,
    P: Process + 'static,
{
    pub fn new(client: C, process: Arc<P>, extensions: Arc<[String]>, policy: Policy) -> Self {
        Self {
            client,
            process,
            state: Arc::new(Mutex::new(EngineState::default())),
            waiting: AtomicUsize::new(0),
            policy,
            extensions,
        }
    }

    /// Starts the engine ahead of the first conversion.
    pub async fn start(&self, cancel: &CancellationToken) -> Result<()> {
        let guard = self.acquire(cancel).await?;
        if guard.running && !guard.dirty {
            return Ok(());
        }
        self.recycle(guard, "initial start").await.map(drop)
    }

    async fn acquire(&self, cancel: &CancellationToken) -> Result<OwnedMutexGuard<EngineState>> {
        if cancel.is_cancelled() {
            return Err(GatewayError::Cancelled);
        }

        let already_waiting = self.waiting.fetch_add(1, Ordering::SeqCst);
        let _slot = QueueSlot(&self.waiting);
        let limit = self.policy.max_queue_size;
        if limit > 0 && already_waiting >= limit {
            return Err(GatewayError::QueueFull { limit });
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(GatewayError::Cancelled),
            guard = Arc::clone(&self.state).lock_owned() => Ok(guard),
        }
    }

    /// Stops (ignoring failures), starts and health-checks the process.
    ///
    /// Runs on its own task that owns the lock guard, so a caller dropping
    /// its future cannot leave the instance half-started or the lock stuck.
    async fn recycle(
        &self,
        guard: OwnedMutexGuard<EngineState>,
        reason: &'static str,
    ) -> Result<OwnedMutexGuard<EngineState>> {
        info!(reason, "restarting engine");
        let process = Arc::clone(&self.process);
        let task = tokio::spawn(async move {
            let mut guard = guard;
            let token = CancellationToken::new();
            if let Err(e) = process.stop(&token).await {
                warn!("stopping engine before restart failed: {e}");
            }
            let res = match process.start(&token).await {
                Ok(()) => process.health_check(&token).await,
                Err(e) => Err(e),
            };
            guard.running = res.is_ok();
            guard.dirty = res.is_err();
            guard.conversions = 0;
            (res, guard)
        });

        let (res, guard) = task
            .await
            .map_err(|e| GatewayError::EngineUnavailable(format!("restart task failed: {e}")))?;
        res.map(|()| guard)
    }

    async fn prepare(
        &self,
        guard: OwnedMutexGuard<EngineState>,
    ) -> Result<OwnedMutexGuard<EngineState>> {
        let reason = if !guard.running {
            "not running"
        } else if guard.dirty {
            "previous call left engine dirty"
        } else if self.policy.restart_after > 0 && guard.conversions >= self.policy.restart_after {
            "conversion limit reached"
        } else {
            return Ok(guard);
        };
        self.recycle(guard, reason).await
    }

    async fn supervise<F, Fut>(&self, cancel: &CancellationToken, output: &Path, op: F) -> Result<()>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<()>> + Send,
    {
        let guard = self.acquire(cancel).await?;
        let mut guard = self.prepare(guard).await?;

        // Stays set if this future is dropped mid-conversion.
        guard.dirty = true;
        let outcome = match attempt(cancel, &op).await {
            Err(first) if first.is_crash() => {
                warn!(error = %first, "engine crashed; restarting and retrying once");
                remove_partial(output).await;
                guard = self.recycle(guard, "engine crashed").await?;
                if cancel.is_cancelled() {
                    return Err(GatewayError::Cancelled);
                }
                guard.dirty = true;
                let retry = attempt(cancel, &op).await;
                if let Err(e) = &retry {
                    if e.is_crash() {
                        warn!(error = %e, "engine crashed again on retry; giving up");
                        remove_partial(output).await;
                    }
                }
                retry
            }
            other => other,
        };

        match &outcome {
            Ok(()) => {
                guard.dirty = false;
                guard.conversions += 1;
            }
            Err(e) => guard.dirty = e.leaves_engine_dirty(),
        }
        outcome
    }
}

async fn attempt<F, Fut>(cancel: &CancellationToken, op: &F) -> Result<()>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(GatewayError::Cancelled),
        res = op() => res,
    }
}

async fn remove_partial(output: &Path) {
    if tokio::fs::remove_file(output).await.is_ok() {
        debug!(output = %output.display(), "removed partial output");
    }
}

#[async_trait]
impl<C, P> Converter for Supervisor<C, P>
where
    C: EngineClient,
    P: Process + 'static,
{
    #[instrument(skip_all, fields(input = %input.display(), output = %output.display()))]
    async fn convert_to_pdf(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        options: ConversionOptions,
    ) -> Result<()> {
        options.validate()?;
        let options = &options;
        let client = &self.client;
        self.supervise(cancel, output, move || {
            client.pdf(cancel, input, output, options)
        })
        .await
    }

    #[instrument(skip_all, fields(input = %input.display(), format = target_ext))]
    async fn convert_format(
        &self,
        cancel: &CancellationToken,
        input: &Path,
        output: &Path,
        target_ext: &str,
    ) -> Result<()> {
        let client = &self.client;
        self.supervise(cancel, output, move || {
            client.document_format(cancel, input, output, target_ext)
        })
        .await
    }

    fn supported_extensions(&self) -> &[String] {
        &self.extensions
    }

    async fn shutdown(&self) -> Result<()> {
        let mut guard = Arc::clone(&self.state).lock_owned().await;
        self.process.stop(&CancellationToken::new()).await?;
        guard.running = false;
        guard.dirty = false;
        Ok(())
    }
}
