//! Cooperative cancellation for long-running async operations.
//!
//! A [`CancellationToken`] is cheap to clone; every clone observes the same
//! flag. Operations either poll [`is_cancelled`](CancellationToken::is_cancelled)
//! between units of work or race an in-flight call against
//! [`cancelled`](CancellationToken::cancelled) via [`CancellationToken::run`],
//! which abandons the call and returns [`RagError::Cancelled`].

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{RagError, Result};

#[derive(Debug, Clone)]
pub struct CancellationToken {
    tx: Arc<watch::Sender<bool>>,
}

impl CancellationToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so `wait_for` cannot fail here.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Drives `fut` to completion unless cancellation is requested first.
    ///
    /// On cancellation the future is dropped, which abandons any in-flight
    /// HTTP request or uncommitted transaction it owns.
    pub async fn run<T, F>(&self, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        if self.is_cancelled() {
            return Err(RagError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(RagError::Cancelled),
            out = fut => out,
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}
