//! Cooperative cancellation for racing candidates.
//!
//! A [`CancelSource`] flips a `watch` flag; every [`CancelToken`] observes it
//! at the suspension points wrapped with [`CancelToken::run`]. Dropping the
//! wrapped future drops any child process with it (`kill_on_drop`).

use std::future::Future;

use tokio::sync::watch;

use crate::domain::{ForgeError, Result};

/// Owner side of a cancellation flag.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    /// Cancel every token issued by this source. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }
}

/// Observer side of a cancellation flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// A token that is never cancelled.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// `Err(Cancelled)` once cancelled.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(ForgeError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Resolve when cancelled; pend forever if the source is dropped first.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow_and_update() {
                return;
            }
            if rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }

    /// Drive `fut` unless cancelled first.
    pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output> {
        self.check()?;
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(ForgeError::Cancelled),
            out = fut => Ok(out),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let source = CancelSource::new();
        let token = source.token();
        assert_eq!(token.run(async { 7 }).await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_pending_work() {
        let source = CancelSource::new();
        let token = source.token();
        let task = tokio::spawn(async move {
            token
                .run(tokio::time::sleep(Duration::from_secs(30)))
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        source.cancel();

        let result = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(result, Err(ForgeError::Cancelled)));
    }

    #[tokio::test]
    async fn test_already_cancelled_skips_work() {
        let source = CancelSource::new();
        source.cancel();
        let token = source.token();
        assert!(token.is_cancelled());
        let mut polled = false;
        let result = token.run(async { polled = true }).await;
        assert!(matches!(result, Err(ForgeError::Cancelled)));
        assert!(!polled);
    }

    #[tokio::test]
    async fn test_never_token() {
        let token = CancelToken::never();
        assert!(!token.is_cancelled());
        assert!(token.check().is_ok());
        assert_eq!(token.run(async { "done" }).await.unwrap(), "done");
    }
}
