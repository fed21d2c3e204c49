//! The composite cancellation primitive.
//!
//! A single outer [`CancellationToken`] and a per-attempt child token
//! (`outer.child_token()`) already give the engine a composite signal: the
//! child observes the outer firing, and cancelling the child for a timeout
//! never propagates back up to the outer. Cleanup is automatic — there is no
//! listener list to detach, since tokio_util's token tree drops its
//! bookkeeping for a child the moment both the child and its `cancelled()`
//! future are dropped, which happens on every exit path of the attempt loop
//! because that future is only ever polled inside a `tokio::select!`, never
//! spawned onto its own task.
//!
//! [`compose`] exists for the general case of merging more than the natural
//! two inputs the engine itself ever needs (outer + one attempt). It is not
//! on the engine's hot path today, but is exercised by its own tests as the
//! Rust-native answer to an arbitrary-arity composite cancellation signal.

use tokio_util::sync::CancellationToken;

/// Derives one token that is cancelled the moment any of `tokens` is.
///
/// An empty slice yields a token that never cancels on its own. A single
/// token is returned as a child of itself (propagation only flows
/// outer-to-child, so the parent is unaffected by cancelling the result).
/// More than one token additionally requires driving [`join_cancellation`]
/// to propagate a *later* input's cancellation into the derived token —
/// the derived token alone only reflects the first input's state at the
/// time this function is called.
pub fn compose(tokens: &[CancellationToken]) -> CancellationToken {
    match tokens {
        [] => CancellationToken::new(),
        [first, rest @ ..] => {
            let derived = first.child_token();
            if rest.iter().any(CancellationToken::is_cancelled) {
                derived.cancel();
            }
            derived
        }
    }
}

/// Waits for any of `extra` to cancel and propagates that into `derived`.
///
/// Must be raced inside the caller's own `select!` (as the engine does for
/// its own suspension points) rather than spawned — that is what gives this
/// future's drop, on every exit path, prompt cleanup without a separate
/// listener-detach step.
pub async fn join_cancellation(derived: &CancellationToken, extra: &[CancellationToken]) {
    if extra.is_empty() {
        std::future::pending::<()>().await;
        return;
    }
    let waiters: Vec<_> = extra.iter().map(CancellationToken::cancelled).collect();
    futures::future::select_all(waiters).await;
    derived.cancel();
}
