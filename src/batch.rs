//! The concurrency-bounded fan-out layer built on top of [`crate::Executor::run`].

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use tokio::sync::Semaphore;

use crate::executor::{CallOptions, Executor, TaskContext};
use crate::outcome::Outcome;

/// Options for [`Executor::run_all`]. `call` is applied to every item in the
/// batch; `concurrency` bounds how many run concurrently (`None` runs every
/// item at once, each still going through its own breaker/retry/timeout
/// handling).
pub struct BatchOptions<T> {
    pub concurrency: Option<usize>,
    pub call: CallOptions<T>,
}

impl<T> Default for BatchOptions<T> {
    fn default() -> Self {
        BatchOptions {
            concurrency: None,
            call: CallOptions::default(),
        }
    }
}

impl<T> BatchOptions<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    pub fn call(mut self, call: CallOptions<T>) -> Self {
        self.call = call;
        self
    }
}

impl Executor {
    /// Runs every task in `tasks`, each through [`Executor::run`], with no
    /// more than `opts.concurrency` in flight at once.
    ///
    /// Index `i` of the returned vector is always the outcome of `tasks[i]`
    /// — if the batch's outer signal cancels mid-run, indices a worker never
    /// reached are still populated (with a deterministic `Outcome::Aborted`)
    /// by a sequential post-pass, so every slot is guaranteed to end up
    /// `Some` before this returns.
    pub async fn run_all<T, E, F, Fut>(&self, tasks: Vec<F>, opts: BatchOptions<T>) -> Vec<Outcome<T>>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
    {
        let len = tasks.len();
        if len == 0 {
            return Vec::new();
        }

        let outer = opts
            .call
            .signal
            .clone()
            .or_else(|| self.config.signal.clone())
            .unwrap_or_default();
        let concurrency = opts.concurrency.unwrap_or(len).max(1);

        let semaphore = Semaphore::new(concurrency);
        let cursor = AtomicUsize::new(0);
        let pending: Vec<Mutex<Option<F>>> = tasks.into_iter().map(|t| Mutex::new(Some(t))).collect();
        let slots: Vec<Mutex<Option<Outcome<T>>>> = (0..len).map(|_| Mutex::new(None)).collect();

        let claim_options = |call: &CallOptions<T>| CallOptions {
            signal: Some(outer.clone()),
            ..call.clone()
        };

        #[cfg(feature = "metrics")]
        let in_flight = std::sync::atomic::AtomicUsize::new(0);

        let worker = || async {
            loop {
                if outer.is_cancelled() {
                    break;
                }
                let index = cursor.fetch_add(1, Ordering::SeqCst);
                if index >= len {
                    break;
                }
                let _permit = semaphore.acquire().await.expect("batch semaphore is never closed");
                let task = pending[index]
                    .lock()
                    .expect("batch task slot mutex poisoned")
                    .take()
                    .expect("batch index claimed twice");

                #[cfg(feature = "metrics")]
                {
                    let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                    metrics::gauge!("resilient_exec_batch_in_flight").set(now as f64);
                }

                let outcome = self.run(task, claim_options(&opts.call)).await;

                #[cfg(feature = "metrics")]
                {
                    let now = in_flight.fetch_sub(1, Ordering::SeqCst) - 1;
                    metrics::gauge!("resilient_exec_batch_in_flight").set(now as f64);
                }

                *slots[index].lock().expect("batch result slot mutex poisoned") = Some(outcome);
            }
        };

        let workers: Vec<_> = (0..concurrency).map(|_| worker()).collect();
        futures::future::join_all(workers).await;

        // Sequential post-pass: any index a worker never claimed (the outer
        // signal fired mid-batch) still gets a deterministic outcome by
        // running it now against the already-cancelled token.
        for index in 0..len {
            let already_filled = slots[index].lock().expect("batch result slot mutex poisoned").is_some();
            if already_filled {
                continue;
            }
            if let Some(task) = pending[index].lock().expect("batch task slot mutex poisoned").take() {
                let outcome = self.run(task, claim_options(&opts.call)).await;
                *slots[index].lock().expect("batch result slot mutex poisoned") = Some(outcome);
            }
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.into_inner()
                    .expect("batch result slot mutex poisoned")
                    .expect("every batch slot is populated before run_all returns")
            })
            .collect()
    }

    /// Runs `tasks` like [`Executor::run_all`] but rethrows the first
    /// non-success outcome, in input order, instead of returning the full
    /// `Vec<Outcome<T>>`.
    pub async fn run_all_or_throw<T, E, F, Fut>(
        &self,
        tasks: Vec<F>,
        opts: BatchOptions<T>,
    ) -> Result<Vec<T>, resilient_exec_core::TypedError>
    where
        F: Fn(TaskContext) -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, E>> + Send,
        T: Send,
        E: std::error::Error + Send + Sync + 'static,
    {
        let outcomes = self.run_all(tasks, opts).await;
        let mut values = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            values.push(outcome.into_result()?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicUsize as StdAtomicUsize, Ordering as StdOrdering};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn executor_with_concurrency_tracking() -> (Executor, Arc<StdAtomicUsize>, Arc<StdAtomicUsize>) {
        (Executor::new(), Arc::new(StdAtomicUsize::new(0)), Arc::new(StdAtomicUsize::new(0)))
    }

    #[tokio::test]
    async fn every_slot_is_populated_in_index_order() {
        let executor = Executor::new();
        let tasks: Vec<_> = (0..5)
            .map(|i| move |_ctx: TaskContext| async move { Ok::<u32, Infallible>(i) })
            .collect();

        let outcomes = executor.run_all(tasks, BatchOptions::new()).await;
        assert_eq!(outcomes.len(), 5);
        for (i, outcome) in outcomes.iter().enumerate() {
            assert_eq!(outcome.data(), Some(&(i as u32)));
        }
    }

    #[tokio::test]
    async fn concurrency_limit_bounds_in_flight_tasks() {
        let (executor, in_flight, max_seen) = executor_with_concurrency_tracking();
        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let in_flight = Arc::clone(&in_flight);
                let max_seen = Arc::clone(&max_seen);
                move |_ctx: TaskContext| {
                    let in_flight = Arc::clone(&in_flight);
                    let max_seen = Arc::clone(&max_seen);
                    async move {
                        let now = in_flight.fetch_add(1, StdOrdering::SeqCst) + 1;
                        max_seen.fetch_max(now, StdOrdering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(10)).await;
                        in_flight.fetch_sub(1, StdOrdering::SeqCst);
                        Ok::<u32, Infallible>(now as u32)
                    }
                }
            })
            .collect();

        let outcomes = executor.run_all(tasks, BatchOptions::new().concurrency(2)).await;
        assert_eq!(outcomes.len(), 8);
        assert!(max_seen.load(StdOrdering::SeqCst) <= 2);
    }

    #[tokio::test]
    async fn cancelling_mid_batch_aborts_unclaimed_indices() {
        let executor = Executor::new();
        let signal = CancellationToken::new();
        let started = Arc::new(StdAtomicUsize::new(0));

        let signal_for_cancel = signal.clone();
        let tasks: Vec<_> = (0..6)
            .map(|i| {
                let started = Arc::clone(&started);
                let signal_for_cancel = signal_for_cancel.clone();
                move |_ctx: TaskContext| {
                    let started = Arc::clone(&started);
                    let signal_for_cancel = signal_for_cancel.clone();
                    async move {
                        started.fetch_add(1, StdOrdering::SeqCst);
                        if i == 0 {
                            signal_for_cancel.cancel();
                        }
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        Ok::<u32, Infallible>(i)
                    }
                }
            })
            .collect();

        let outcomes = executor
            .run_all(
                tasks,
                BatchOptions::new().concurrency(1).call(CallOptions::new().signal(signal)),
            )
            .await;

        assert_eq!(outcomes.len(), 6);
        assert!(outcomes.iter().any(|o| matches!(o, Outcome::Aborted(..))));
    }

    #[tokio::test]
    async fn run_all_or_throw_rethrows_the_first_failure_in_order() {
        let executor = Executor::new();
        let tasks: Vec<_> = (0..3)
            .map(|i| {
                move |_ctx: TaskContext| async move {
                    if i == 1 {
                        Err::<u32, _>(resilient_exec_core::HttpStatusError::new(404, "missing"))
                    } else {
                        Ok(i)
                    }
                }
            })
            .collect();

        let result = executor.run_all_or_throw(tasks, BatchOptions::new()).await;
        let error = result.unwrap_err();
        assert_eq!(error.code, resilient_exec_core::ErrorCode::HTTP);
    }
}
