//! Metrics regression test, gated behind the `metrics` feature.
//!
//! Exercises attempt/retry counters, the batch in-flight gauge, and the
//! circuit breaker's own counters/gauge through a `DebuggingRecorder`
//! snapshot, mirroring the teacher workspace's
//! `tests/metrics_regression/*.rs` convention.

#![cfg(feature = "metrics")]

use std::convert::Infallible;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, LazyLock};
use std::time::Duration;

use metrics_util::debugging::{DebugValue, DebuggingRecorder};
use resilient_exec::{BatchOptions, CallOptions, CircuitBreakerConfigBuilder, Executor, RetryStrategy, TaskContext};

static RECORDER: LazyLock<DebuggingRecorder> = LazyLock::new(DebuggingRecorder::default);

fn init_recorder() {
    let _ = metrics::set_global_recorder(&*RECORDER);
}

fn counter_exists(name: &str) -> bool {
    RECORDER
        .snapshotter()
        .snapshot()
        .into_vec()
        .iter()
        .any(|(key, _, _, value)| key.key().name() == name && matches!(value, DebugValue::Counter(_)))
}

fn gauge_exists(name: &str) -> bool {
    RECORDER
        .snapshotter()
        .snapshot()
        .into_vec()
        .iter()
        .any(|(key, _, _, value)| key.key().name() == name && matches!(value, DebugValue::Gauge(_)))
}

fn histogram_exists(name: &str) -> bool {
    RECORDER
        .snapshotter()
        .snapshot()
        .into_vec()
        .iter()
        .any(|(key, _, _, value)| key.key().name() == name && matches!(value, DebugValue::Histogram(_)))
}

#[tokio::test]
async fn executor_and_breaker_metrics_are_emitted() {
    init_recorder();

    let executor = Executor::builder()
        .max_retries(2)
        .retry_strategy(RetryStrategy::fixed(Duration::ZERO))
        .build()
        .map(Executor::from_config)
        .unwrap();

    let calls = Arc::new(AtomicU32::new(0));
    let calls_for_task = Arc::clone(&calls);
    let task = move |_ctx: TaskContext| {
        let calls = Arc::clone(&calls_for_task);
        async move {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            if n < 2 {
                Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
            } else {
                Ok::<u32, std::io::Error>(42)
            }
        }
    };
    let outcome = executor.run(task, CallOptions::new()).await;
    assert!(outcome.ok());

    assert!(counter_exists("resilient_exec_attempts_total"));
    assert!(counter_exists("resilient_exec_retries_total"));
    assert!(histogram_exists("resilient_exec_call_duration_ms"));

    let breaker_config = CircuitBreakerConfigBuilder::new()
        .failure_threshold(1)
        .name("metrics_test")
        .build()
        .unwrap();
    let breaker_executor = Executor::builder()
        .circuit_breaker(breaker_config)
        .build()
        .map(Executor::from_config)
        .unwrap();
    let failing = |_ctx: TaskContext| async { Err::<u32, _>(std::fmt::Error) };
    breaker_executor.run(failing, CallOptions::new()).await;
    breaker_executor.run(failing, CallOptions::new()).await;

    assert!(counter_exists("resilient_exec_circuit_rejected_total"));
    assert!(gauge_exists("resilient_exec_circuit_state"));

    let tasks: Vec<_> = (0..4)
        .map(|i| {
            move |_ctx: TaskContext| async move {
                tokio::time::sleep(Duration::from_millis(5)).await;
                Ok::<u32, Infallible>(i)
            }
        })
        .collect();
    executor.run_all(tasks, BatchOptions::new().concurrency(2)).await;

    assert!(gauge_exists("resilient_exec_batch_in_flight"));
}
