//! Coalescing stages for consumers slower than the producer.
//!
//! A coalescer sits between a change stream and a consumer. It keeps
//! accepting input while the consumer is busy and folds pending changes
//! together, so memory grows with the number of distinct pending keys rather
//! than the number of changes.

use crate::changes::{ChangeType, CollectionChange, ValueChange};
use crate::context::Context;
use crate::error::Result;
use crossbeam_channel::{bounded, Receiver, Select, Sender, TryRecvError};
use std::collections::{HashMap, VecDeque};
use std::thread;
use tracing::debug;

/// Changes waiting for delivery.
trait Pending<E> {
    fn push(&mut self, event: E);
    fn pop(&mut self) -> Option<E>;
    fn is_empty(&self) -> bool;
}

/// Keeps one change per collection key, in first-arrival order.
struct KeyedExcess<T> {
    by_key: HashMap<String, CollectionChange<T>>,
    queue: VecDeque<String>,
}

impl<T> KeyedExcess<T> {
    fn new() -> Self {
        Self {
            by_key: HashMap::new(),
            queue: VecDeque::new(),
        }
    }
}

impl<T> Pending<CollectionChange<T>> for KeyedExcess<T> {
    fn push(&mut self, change: CollectionChange<T>) {
        let id = change.id.clone();
        match self.by_key.remove(&id) {
            None => {
                self.queue.push_back(id.clone());
                self.by_key.insert(id, change);
            }
            Some(first) => match merge_collection_changes(first, change) {
                // Keep the key's existing queue position.
                Some(merged) => {
                    self.by_key.insert(id, merged);
                }
                None => self.queue.retain(|k| *k != id),
            },
        }
    }

    fn pop(&mut self) -> Option<CollectionChange<T>> {
        while let Some(id) = self.queue.pop_front() {
            if let Some(change) = self.by_key.remove(&id) {
                return Some(change);
            }
        }
        None
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

/// Keeps only the most recent value.
struct Latest<T> {
    pending: Option<ValueChange<T>>,
}

impl<T> Pending<ValueChange<T>> for Latest<T> {
    fn push(&mut self, change: ValueChange<T>) {
        self.pending = Some(match self.pending.take() {
            Some(prev) => ValueChange {
                seed_value: prev.seed_value || change.seed_value,
                last_seed_value: prev.last_seed_value || change.last_seed_value,
                ..change
            },
            None => change,
        });
    }

    fn pop(&mut self) -> Option<ValueChange<T>> {
        self.pending.take()
    }

    fn is_empty(&self) -> bool {
        self.pending.is_none()
    }
}

/// Fold two changes to the same key, `first` committed before `second`.
///
/// Returns `None` when the pair cancels out, e.g. an add followed by a remove.
pub fn merge_collection_changes<T>(
    first: CollectionChange<T>,
    second: CollectionChange<T>,
) -> Option<CollectionChange<T>> {
    use ChangeType::*;

    let seed_value = first.seed_value || second.seed_value;
    let last_seed_value = first.last_seed_value || second.last_seed_value;

    let (change_type, old_value) = match (first.change_type, second.change_type) {
        (Add, Add) => (Add, second.old_value),
        (Add, Update | Replace) => (Add, None),
        (Add, Remove) => return None,
        (Update, Add) => (Replace, first.old_value),
        (Update, other) => (other, first.old_value),
        (Replace, Remove) => (Remove, first.old_value),
        (Replace, _) => (Replace, first.old_value),
        (Remove, Remove) => (Remove, first.old_value),
        (Remove, _) => (Replace, first.old_value),
    };

    Some(CollectionChange {
        change_type,
        old_value,
        seed_value,
        last_seed_value,
        ..second
    })
}

/// Interpose a coalescing stage on a collection change stream.
///
/// Changes the consumer has not yet taken are merged per id with
/// [`merge_collection_changes`]; a merged key keeps its place in the delivery
/// queue. When `input` closes the remaining changes are still delivered;
/// cancelling `ctx` closes the output straight away.
pub fn merge_collection_excess<T: Send + Sync + 'static>(
    ctx: Context,
    input: Receiver<CollectionChange<T>>,
) -> Result<Receiver<CollectionChange<T>>> {
    spawn_collection_merger(ctx, input, ())
}

pub(crate) fn spawn_collection_merger<T, G>(
    ctx: Context,
    input: Receiver<CollectionChange<T>>,
    guard: G,
) -> Result<Receiver<CollectionChange<T>>>
where
    T: Send + Sync + 'static,
    G: Send + 'static,
{
    spawn_coalescer("collection-merge", ctx, input, guard, KeyedExcess::new())
}

pub(crate) fn spawn_value_coalescer<T, G>(
    ctx: Context,
    input: Receiver<ValueChange<T>>,
    guard: G,
) -> Result<Receiver<ValueChange<T>>>
where
    T: Send + Sync + 'static,
    G: Send + 'static,
{
    spawn_coalescer("value-latest", ctx, input, guard, Latest { pending: None })
}

fn spawn_coalescer<E, P, G>(
    name: &str,
    ctx: Context,
    input: Receiver<E>,
    guard: G,
    mut pending: P,
) -> Result<Receiver<E>>
where
    E: Send + 'static,
    P: Pending<E> + Send + 'static,
    G: Send + 'static,
{
    let (output, receiver) = bounded(0);
    thread::Builder::new().name(name.to_string()).spawn(move || {
        let _guard = guard;
        run_coalescer(&ctx, &input, &output, &mut pending);
        debug!(cancelled = ctx.is_cancelled(), "coalescer closed");
    })?;
    Ok(receiver)
}

fn run_coalescer<E, P: Pending<E>>(
    ctx: &Context,
    input: &Receiver<E>,
    output: &Sender<E>,
    pending: &mut P,
) {
    let mut input_open = true;
    loop {
        // Fold in everything already waiting before offering the next change.
        while input_open {
            match input.try_recv() {
                Ok(event) => pending.push(event),
                Err(TryRecvError::Empty) => break,
                Err(TryRecvError::Disconnected) => input_open = false,
            }
        }
        if !input_open && pending.is_empty() {
            return;
        }

        let mut sel = Select::new();
        let done = sel.recv(ctx.done());
        let recv = input_open.then(|| sel.recv(input));
        let send = (!pending.is_empty()).then(|| sel.send(output));

        let oper = sel.select();
        let index = oper.index();
        if index == done {
            let _ = oper.recv(ctx.done());
            return;
        } else if Some(index) == recv {
            match oper.recv(input) {
                Ok(event) => pending.push(event),
                Err(_) => input_open = false,
            }
        } else if Some(index) == send {
            // The send is only registered while something is pending.
            if let Some(event) = pending.pop() {
                if oper.send(output, event).is_err() {
                    return;
                }
            }
        }
    }
}
