//! Cancellation for subscriptions.
//!
//! A [`Context`] carries a `done` channel that never yields a message; it
//! becomes disconnected once the matching [`CancelHandle`] is cancelled or
//! dropped. Subscription threads include `ctx.done()` in their `select!`, so
//! cancellation wakes them without polling.

use crossbeam_channel::{bounded, never, Receiver, Sender, TryRecvError};
use parking_lot::Mutex;
use std::sync::Arc;

/// Cancellation signal passed to `pull`.
#[derive(Clone, Debug)]
pub struct Context {
    done: Receiver<()>,
}

impl Context {
    /// A context that is never cancelled.
    pub fn background() -> Self {
        Self { done: never() }
    }

    /// A cancellable context.
    ///
    /// Dropping every clone of the returned handle cancels the context, so
    /// keep the handle alive for as long as the subscription should run.
    pub fn with_cancel() -> (Self, CancelHandle) {
        let (sender, done) = bounded(0);
        let handle = CancelHandle {
            sender: Arc::new(Mutex::new(Some(sender))),
        };
        (Self { done }, handle)
    }

    /// Channel that becomes disconnected on cancellation. For use in `select!`.
    pub fn done(&self) -> &Receiver<()> {
        &self.done
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self.done.try_recv(), Err(TryRecvError::Disconnected))
    }
}

impl Default for Context {
    fn default() -> Self {
        Self::background()
    }
}

/// Cancels the [`Context`] it was created with.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    sender: Arc<Mutex<Option<Sender<()>>>>,
}

impl CancelHandle {
    /// Cancel the context. Idempotent.
    pub fn cancel(&self) {
        self.sender.lock().take();
    }
}
