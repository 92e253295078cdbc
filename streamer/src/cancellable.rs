//! A shared idempotent cancellation flag (§5 "every async sequence
//! exposes an idempotent cancel()"), implemented as a `watch<bool>`:
//! cheap to clone, and every holder observes cancellation on its next
//! poll regardless of how many times `cancel()` is called.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
}

#[derive(Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<bool>,
}

pub fn cancel_pair() -> (CancelToken, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelToken { tx }, CancelSignal { rx })
}

impl CancelToken {
    /// Idempotent: cancelling twice is a no-op the second time.
    pub fn cancel(&self) { let _ = self.tx.send(true); }
}

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool { *self.rx.borrow() }

    /// Resolves once `cancel()` has been called, for use in `select!`.
    pub async fn cancelled(&mut self) {
        if self.is_cancelled() {
            return;
        }
        let _ = self.rx.changed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_is_idempotent_and_observable() {
        let (tok, mut sig) = cancel_pair();
        assert!(!sig.is_cancelled());
        tok.cancel();
        tok.cancel();
        sig.cancelled().await;
        assert!(sig.is_cancelled());
    }
}
