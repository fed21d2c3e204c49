//! Property tests for the batch engine's index-alignment invariant.
//!
//! Invariant tested: regardless of concurrency bound or which tasks
//! succeed or fail, `run_all`'s result vector has the same length as the
//! input and slot `i` always carries the outcome of `tasks[i]`.

use proptest::prelude::*;
use resilient_exec::{BatchOptions, Executor, TaskContext};
use std::convert::Infallible;
use tokio::runtime::Runtime;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(30))]

    #[test]
    fn results_are_index_aligned_regardless_of_concurrency(
        outcomes in prop::collection::vec(any::<bool>(), 1..20),
        concurrency in 1usize..=8,
    ) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            let executor = Executor::new();
            let tasks: Vec<_> = outcomes
                .iter()
                .enumerate()
                .map(|(i, &should_succeed)| {
                    move |_ctx: TaskContext| async move {
                        if should_succeed {
                            Ok::<u32, std::io::Error>(i as u32)
                        } else {
                            Err(std::io::Error::from(std::io::ErrorKind::ConnectionReset))
                        }
                    }
                })
                .collect();

            let results = executor
                .run_all(tasks, BatchOptions::new().concurrency(concurrency))
                .await;

            prop_assert_eq!(results.len(), outcomes.len());
            for (i, (expected_success, outcome)) in outcomes.iter().zip(results.iter()).enumerate() {
                prop_assert_eq!(
                    outcome.ok(),
                    *expected_success,
                    "slot {} disagreed with its task's intended outcome",
                    i
                );
                if *expected_success {
                    prop_assert_eq!(outcome.data(), Some(&(i as u32)));
                }
            }
            Ok(())
        })?;
    }

    /// Property: an already-cancelled outer signal makes every slot
    /// `Aborted` without changing the result count.
    #[test]
    fn pre_cancelled_signal_aborts_every_slot(count in 1usize..=12) {
        let rt = Runtime::new().unwrap();
        rt.block_on(async {
            use resilient_exec::CallOptions;
            use tokio_util::sync::CancellationToken;

            let executor = Executor::new();
            let signal = CancellationToken::new();
            signal.cancel();

            let tasks: Vec<_> = (0..count)
                .map(|_| move |_ctx: TaskContext| async move { Ok::<u32, Infallible>(1) })
                .collect();

            let results = executor
                .run_all(tasks, BatchOptions::new().call(CallOptions::new().signal(signal)))
                .await;

            prop_assert_eq!(results.len(), count);
            for outcome in &results {
                prop_assert!(!outcome.ok());
            }
            Ok(())
        })?;
    }
}
