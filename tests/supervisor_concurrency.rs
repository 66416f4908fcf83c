mod common;

use common::{FakeEngine, Outcome, started};
use officegate::supervisor::Policy;
use officegate::{ConversionOptions, Converter, GatewayError};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;

const SLOW: Duration = Duration::from_millis(300);

fn input(dir: &tempfile::TempDir) -> std::path::PathBuf {
    let p = dir.path().join("report.docx");
    std::fs::write(&p, b"PK").unwrap();
    p
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_calls_never_overlap_inside_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let input = input(&dir);
    let engine = FakeEngine::default().with_delay(Duration::from_millis(50));
    let (sup, _process) = started(engine.clone(), Policy::default()).await;
    let sup = Arc::new(sup);

    let mut handles = Vec::new();
    for i in 0..6 {
        let sup = Arc::clone(&sup);
        let input = input.clone();
        let output = dir.path().join(format!("out-{i}.pdf"));
        handles.push(tokio::spawn(async move {
            sup.convert_to_pdf(&CancellationToken::new(), &input, &output, ConversionOptions::default())
                .await
        }));
    }
    for h in handles {
        h.await.unwrap().unwrap();
    }

    assert_eq!(engine.calls(), 6);
    assert_eq!(engine.max_active(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn crash_retry_holds_the_lock_across_restart() {
    let dir = tempfile::tempdir().unwrap();
    let input = input(&dir);
    let engine = FakeEngine::scripted(&[Outcome::Crash, Outcome::Ok, Outcome::Ok])
        .with_delay(Duration::from_millis(30));
    let (sup, _process) = started(engine.clone(), Policy::default()).await;
    let sup = Arc::new(sup);

    let a = {
        let sup = Arc::clone(&sup);
        let input = input.clone();
        let output = dir.path().join("a.pdf");
        tokio::spawn(async move {
            sup.convert_to_pdf(&CancellationToken::new(), &input, &output, ConversionOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    let b = sup
        .convert_to_pdf(
            &CancellationToken::new(),
            &input,
            &dir.path().join("b.pdf"),
            ConversionOptions::default(),
        )
        .await;

    a.await.unwrap().unwrap();
    b.unwrap();
    assert_eq!(engine.max_active(), 1);
    assert_eq!(engine.calls(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancelled_waiter_returns_promptly_and_holder_finishes() {
    let dir = tempfile::tempdir().unwrap();
    let input = input(&dir);
    let engine = FakeEngine::default().with_delay(SLOW);
    let (sup, _process) = started(engine.clone(), Policy::default()).await;
    let sup = Arc::new(sup);

    let holder = {
        let sup = Arc::clone(&sup);
        let input = input.clone();
        let output = dir.path().join("holder.pdf");
        tokio::spawn(async move {
            sup.convert_to_pdf(&CancellationToken::new(), &input, &output, ConversionOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let cancelled = CancellationToken::new();
    cancelled.cancel();
    let waited = Instant::now();
    let err = sup
        .convert_to_pdf(
            &cancelled,
            &input,
            &dir.path().join("waiter.pdf"),
            ConversionOptions::default(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Cancelled));
    assert!(waited.elapsed() < SLOW / 2, "cancelled caller must not wait for the lock");

    holder.await.unwrap().unwrap();
    assert!(dir.path().join("holder.pdf").exists());

    // The lock was released by the holder.
    sup.convert_to_pdf(
        &CancellationToken::new(),
        &input,
        &dir.path().join("after.pdf"),
        ConversionOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(engine.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_while_waiting_abandons_the_call() {
    let dir = tempfile::tempdir().unwrap();
    let input = input(&dir);
    let engine = FakeEngine::default().with_delay(SLOW);
    let (sup, _process) = started(engine.clone(), Policy::default()).await;
    let sup = Arc::new(sup);

    let holder = {
        let sup = Arc::clone(&sup);
        let input = input.clone();
        let output = dir.path().join("holder.pdf");
        tokio::spawn(async move {
            sup.convert_to_pdf(&CancellationToken::new(), &input, &output, ConversionOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = sup
        .convert_to_pdf(&cancel, &input, &dir.path().join("w.pdf"), ConversionOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, GatewayError::Cancelled));
    holder.await.unwrap().unwrap();
    assert_eq!(engine.calls(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn cancellation_mid_conversion_recycles_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let input = input(&dir);
    let engine = FakeEngine::default().with_delay(SLOW);
    let (sup, process) = started(engine.clone(), Policy::default()).await;

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        trigger.cancel();
    });
    let err = sup
        .convert_to_pdf(&cancel, &input, &dir.path().join("a.pdf"), ConversionOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::Cancelled));
    assert_eq!(process.starts(), 1);

    sup.convert_to_pdf(
        &CancellationToken::new(),
        &input,
        &dir.path().join("b.pdf"),
        ConversionOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(process.starts(), 2);
    assert_eq!(engine.max_active(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callers_beyond_queue_limit_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let input = input(&dir);
    let engine = FakeEngine::default().with_delay(SLOW);
    let policy = Policy {
        max_queue_size: 1,
        ..Default::default()
    };
    let (sup, _process) = started(engine.clone(), policy).await;
    let sup = Arc::new(sup);

    let spawn_call = |name: &'static str| {
        let sup = Arc::clone(&sup);
        let input = input.clone();
        let output = dir.path().join(name);
        tokio::spawn(async move {
            sup.convert_to_pdf(&CancellationToken::new(), &input, &output, ConversionOptions::default())
                .await
        })
    };

    let holder = spawn_call("holder.pdf");
    tokio::time::sleep(Duration::from_millis(30)).await;
    let waiter = spawn_call("waiter.pdf");
    tokio::time::sleep(Duration::from_millis(30)).await;

    let err = sup
        .convert_to_pdf(
            &CancellationToken::new(),
            &input,
            &dir.path().join("rejected.pdf"),
            ConversionOptions::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, GatewayError::QueueFull { limit: 1 }));

    holder.await.unwrap().unwrap();
    waiter.await.unwrap().unwrap();
    assert_eq!(engine.calls(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn aborted_task_mid_conversion_recycles_the_engine() {
    let dir = tempfile::tempdir().unwrap();
    let input = input(&dir);
    let engine = FakeEngine::default().with_delay(SLOW);
    let (sup, process) = started(engine.clone(), Policy::default()).await;
    let sup = Arc::new(sup);

    let task = {
        let sup = Arc::clone(&sup);
        let input = input.clone();
        let output = dir.path().join("dropped.pdf");
        tokio::spawn(async move {
            sup.convert_to_pdf(&CancellationToken::new(), &input, &output, ConversionOptions::default())
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());
    assert_eq!(process.starts(), 1);

    sup.convert_to_pdf(
        &CancellationToken::new(),
        &input,
        &dir.path().join("after.pdf"),
        ConversionOptions::default(),
    )
    .await
    .unwrap();
    assert_eq!(process.starts(), 2, "abandoned engine must be restarted");
    assert_eq!(engine.max_active(), 1);
}
