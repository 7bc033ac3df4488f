//! Broadcast of committed changes to subscribers.
//!
//! Each subscriber owns an unbounded inbox registered on the resource's
//! [`Bus`]. Writers publish while holding the resource's write lock, so every
//! inbox sees commits in the same order and writers never wait on readers.
//! A forwarding thread per subscription drains the inbox, reshapes events for
//! that subscriber and hands them over a rendezvous channel.

use crate::context::Context;
use crate::error::Result;
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use tracing::debug;

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Registry of subscriber inboxes.
pub(crate) struct Bus<E> {
    subscribers: Mutex<HashMap<SubscriptionId, Sender<E>>>,
    next_id: AtomicU64,
}

impl<E: Clone> Bus<E> {
    pub fn new() -> Self {
        Self {
            subscribers: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Register a new inbox, pre-filled with `seeds`.
    ///
    /// Call while holding the resource's read lock so the seeds and the live
    /// stream line up with no gap or overlap.
    pub fn subscribe(
        self: &Arc<Self>,
        seeds: impl IntoIterator<Item = E>,
    ) -> (Receiver<E>, SubscriptionGuard<E>) {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let (sender, inbox) = unbounded();
        for seed in seeds {
            // Receiver is alive in this scope; send cannot fail.
            let _ = sender.send(seed);
        }
        self.subscribers.lock().insert(id, sender);
        debug!(subscription = id.0, "subscribed");

        let guard = SubscriptionGuard {
            id,
            bus: Arc::clone(self),
        };
        (inbox, guard)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        if self.subscribers.lock().remove(&id).is_some() {
            debug!(subscription = id.0, "unsubscribed");
        }
    }

    /// Deliver `event` to every inbox. Inboxes whose receiver is gone are dropped.
    pub fn publish(&self, event: E) {
        let mut subs = self.subscribers.lock();
        subs.retain(|id, sender| {
            let alive = sender.send(event.clone()).is_ok();
            if !alive {
                debug!(subscription = id.0, "dropping disconnected subscriber");
            }
            alive
        });
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }
}

/// Unsubscribes from the bus when dropped.
pub(crate) struct SubscriptionGuard<E: Clone> {
    id: SubscriptionId,
    bus: Arc<Bus<E>>,
}

impl<E: Clone> Drop for SubscriptionGuard<E> {
    fn drop(&mut self) {
        self.bus.unsubscribe(self.id);
    }
}

/// Spawn the thread that moves events from `inbox` to the returned channel.
///
/// `transform` may rewrite or drop each event. The thread exits, dropping
/// `guard` and closing the output, when `ctx` is cancelled, the inbox
/// closes or the receiver is dropped.
pub(crate) fn spawn_forwarder<E, O, G>(
    name: &str,
    ctx: Context,
    inbox: Receiver<E>,
    guard: G,
    mut transform: impl FnMut(E) -> Option<O> + Send + 'static,
) -> Result<Receiver<O>>
where
    E: Send + 'static,
    O: Send + 'static,
    G: Send + 'static,
{
    let (output, receiver) = bounded(0);
    let thread_name = name.to_string();

    thread::Builder::new().name(name.to_string()).spawn(move || {
        let _guard = guard;
        loop {
            let event = select! {
                recv(inbox) -> msg => match msg {
                    Ok(event) => event,
                    Err(_) => break,
                },
                recv(ctx.done()) -> _ => break,
            };
            let Some(out) = transform(event) else {
                continue;
            };
            select! {
                send(output, out) -> res => if res.is_err() { break },
                recv(ctx.done()) -> _ => break,
            }
        }
        debug!(thread = %thread_name, cancelled = ctx.is_cancelled(), "subscription closed");
    })?;

    Ok(receiver)
}
