//! Operation context: cancellation handle plus optional deadline.
//!
//! Every public engine operation accepts an [`OpContext`]. Cancellation
//! propagates into ledger I/O, rate-limiter waits and retry sleeps; a
//! cancelled operation either returns before any state change or rolls its
//! transaction back.

use crate::error::{Error, ErrorKind, Result};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Handle used to cancel an in-flight operation tree.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    /// Signal cancellation to every context derived from this handle.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Cancellation + deadline carrier, cheap to clone into spawned work.
#[derive(Debug, Clone)]
pub struct OpContext {
    cancelled: Option<watch::Receiver<bool>>,
    deadline: Option<Instant>,
}

impl OpContext {
    /// A context that is never cancelled and has no deadline.
    pub fn background() -> Self {
        Self { cancelled: None, deadline: None }
    }

    /// A cancellable context and its handle.
    pub fn cancellable() -> (CancelHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (CancelHandle { tx }, Self { cancelled: Some(rx), deadline: None })
    }

    /// Derive a context whose deadline is at most `timeout` from now.
    /// The tighter of the existing and new deadlines wins.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let deadline = match self.deadline {
            Some(existing) => Some(existing.min(deadline)),
            None => Some(deadline),
        };
        Self { cancelled: self.cancelled.clone(), deadline }
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Time remaining until the deadline, `None` when unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline.map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_cancelled(&self) -> bool {
        match &self.cancelled {
            Some(rx) => *rx.borrow(),
            None => false,
        }
    }

    fn deadline_expired(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() >= d)
    }

    /// Fail fast before starting (or continuing) work.
    pub fn check(&self, operation: &str) -> Result<()> {
        if self.is_cancelled() {
            return Err(Error::new(ErrorKind::Timeout, format!("operation cancelled: {operation}"))
                .with_operation(operation));
        }
        if self.deadline_expired() {
            return Err(Error::new(ErrorKind::Timeout, format!("deadline exceeded: {operation}"))
                .with_operation(operation));
        }
        Ok(())
    }

    /// Resolves when the context is cancelled or its deadline passes.
    /// Pends forever for a background context.
    pub async fn done(&self) {
        let cancel = async {
            match self.cancelled.clone() {
                Some(mut rx) => loop {
                    if *rx.borrow() {
                        return;
                    }
                    if rx.changed().await.is_err() {
                        // Handle dropped without cancelling; nothing left to signal.
                        std::future::pending::<()>().await;
                    }
                },
                None => std::future::pending().await,
            }
        };
        match self.deadline {
            Some(deadline) => {
                tokio::select! {
                    _ = cancel => {}
                    _ = tokio::time::sleep_until(deadline) => {}
                }
            }
            None => cancel.await,
        }
    }

    /// Cancellation-aware sleep, used by retry backoff and ticker loops.
    pub async fn sleep(&self, duration: Duration, operation: &str) -> Result<()> {
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.done() => Err(self.check(operation).err().unwrap_or_else(|| {
                Error::new(
                    ErrorKind::Timeout,
                    format!("cancelled while waiting: {operation}"),
                )
                .with_operation(operation)
            })),
        }
    }

    /// Race a future against cancellation and the deadline.
    pub async fn run<T, F>(&self, operation: &str, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        self.check(operation)?;
        let started = Instant::now();
        tokio::select! {
            out = fut => out,
            _ = self.done() => {
                Err(Error::timeout(operation, started.elapsed()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn background_context_never_cancels() {
        let ctx = OpContext::background();
        assert!(!ctx.is_cancelled());
        assert!(ctx.check("noop").is_ok());
    }

    #[tokio::test]
    async fn cancel_handle_propagates() {
        let (handle, ctx) = OpContext::cancellable();
        let child = ctx.clone();
        assert!(child.check("op").is_ok());
        handle.cancel();
        assert!(child.is_cancelled());
        assert_eq!(child.check("op").unwrap_err().kind, ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_tightens_not_loosens() {
        let ctx = OpContext::background().with_timeout(Duration::from_secs(1));
        let widened = ctx.with_timeout(Duration::from_secs(60));
        assert!(widened.remaining().unwrap() <= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn run_times_out_at_deadline() {
        let ctx = OpContext::background().with_timeout(Duration::from_millis(50));
        let result = ctx
            .run("slow", async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(42)
            })
            .await;
        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_interrupted_by_cancellation() {
        let (handle, ctx) = OpContext::cancellable();
        let task = tokio::spawn(async move { ctx.sleep(Duration::from_secs(30), "backoff").await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.cancel();
        let result = task.await.unwrap();
        assert_eq!(result.unwrap_err().kind, ErrorKind::Timeout);
    }
}
