#![allow(dead_code)]

use async_trait::async_trait;
use officegate::ConversionOptions;
use officegate::engine::EngineClient;
use officegate::error::{GatewayError, Result};
use officegate::process::Process;
use officegate::supervisor::{Policy, Supervisor};
use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
pub enum Outcome {
    Ok,
    Crash,
    /// The caller cancels while the engine is going down.
    CancelledCrash,
    Fail(&'static str),
}

#[derive(Default)]
pub struct FakeProcess {
    pub starts: AtomicUsize,
    pub stops: AtomicUsize,
    pub health_checks: AtomicUsize,
    pub fail_start: AtomicBool,
}

impl FakeProcess {
    pub fn starts(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Process for FakeProcess {
    async fn start(&self, _cancel: &CancellationToken) -> Result<()> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.fail_start.load(Ordering::SeqCst) {
            return Err(GatewayError::EngineUnavailable("fake start failure".into()));
        }
        Ok(())
    }

    async fn stop(&self, _cancel: &CancellationToken) -> Result<()> {
        self.stops.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn health_check(&self, _cancel: &CancellationToken) -> Result<()> {
        self.health_checks.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Default)]
struct EngineInner {
    script: Mutex<VecDeque<Outcome>>,
    calls: AtomicUsize,
    active: AtomicUsize,
    max_active: AtomicUsize,
    delay: Mutex<Duration>,
}

/// Scripted engine: pops one outcome per call, succeeding once the script runs out.
#[derive(Clone, Default)]
pub struct FakeEngine {
    inner: Arc<EngineInner>,
}

impl FakeEngine {
    pub fn scripted(outcomes: &[Outcome]) -> Self {
        let engine = Self::default();
        engine.inner.script.lock().unwrap().extend(outcomes.iter().copied());
        engine
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.inner.delay.lock().unwrap() = delay;
        self
    }

    pub fn calls(&self) -> usize {
        self.inner.calls.load(Ordering::SeqCst)
    }

    pub fn max_active(&self) -> usize {
        self.inner.max_active.load(Ordering::SeqCst)
    }

    async fn convert(&self, cancel: &CancellationToken, output: &Path) -> Result<()> {
        self.inner.calls.fetch_add(1, Ordering::SeqCst);
        let now = self.inner.active.fetch_add(1, Ordering::SeqCst) + 1;
        self.inner.max_active.fetch_max(now, Ordering::SeqCst);
        let _active = ActiveGuard(&self.inner.active);

        let delay = *self.inner.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let outcome = self
            .inner
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Ok);
        let res = match outcome {
            Outcome::Ok => tokio::fs::write(output, b"%PDF-1.7\n").await.map_err(Into::into),
            Outcome::Crash => {
                // A crashing engine may leave a truncated file behind.
                let _ = tokio::fs::write(output, b"%PDF").await;
                Err(GatewayError::crashed("core dumped"))
            }
            Outcome::CancelledCrash => {
                cancel.cancel();
                Err(GatewayError::crashed("engine died during conversion (exit 1)"))
            }
            Outcome::Fail(reason) => Err(GatewayError::conversion(reason)),
        };
        res
    }
}

/// Keeps the in-flight count right when the supervisor drops a cancelled call.
struct ActiveGuard<'a>(&'a AtomicUsize);

impl Drop for ActiveGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl EngineClient for FakeEngine {
    async fn pdf(
        &self,
        cancel: &CancellationToken,
        _input: &Path,
        output: &Path,
        _options: &ConversionOptions,
    ) -> Result<()> {
        self.convert(cancel, output).await
    }

    async fn document_format(
        &self,
        cancel: &CancellationToken,
        _input: &Path,
        output: &Path,
        _target_ext: &str,
    ) -> Result<()> {
        self.convert(cancel, output).await
    }
}

pub fn extensions() -> Arc<[String]> {
    ["docx", "odt", "xlsx"].iter().map(|s| s.to_string()).collect()
}

pub type FakeSupervisor = Supervisor<FakeEngine, FakeProcess>;

/// Supervisor over fakes, already started so restart counts start at one.
pub async fn started(engine: FakeEngine, policy: Policy) -> (FakeSupervisor, Arc<FakeProcess>) {
    let process = Arc::new(FakeProcess::default());
    let sup = Supervisor::new(engine, Arc::clone(&process), extensions(), policy);
    sup.start(&CancellationToken::new()).await.unwrap();
    assert_eq!(process.starts(), 1);
    (sup, process)
}
