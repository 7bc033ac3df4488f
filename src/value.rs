//! A single reactive resource.

use crate::bus::{spawn_forwarder, Bus};
use crate::changes::ValueChange;
use crate::context::Context;
use crate::error::Result;
use crate::masks::{check_read_mask, filter_message, write_mask};
use crate::merge::spawn_value_coalescer;
use crate::options::{ReadOptions, ResourceConfig, WriteOptions};
use crate::types::{Message, Timestamp};
use crate::update::{check_expected, get_and_update, masked_write, Committed};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

struct ValueState<T> {
    value: Arc<T>,
    change_time: Timestamp,
}

/// Holds one message and notifies subscribers of every change to it.
///
/// The stored message is never mutated in place: each write installs a new
/// `Arc`, which is also what optimistic concurrency compares.
pub struct Value<T: Message> {
    state: RwLock<ValueState<T>>,
    bus: Arc<Bus<ValueChange<T>>>,
    config: ResourceConfig<T>,
}

impl<T: Message> Value<T> {
    pub fn new(initial: T, config: ResourceConfig<T>) -> Self {
        let change_time = config.clock.now();
        Self {
            state: RwLock::new(ValueState {
                value: Arc::new(initial),
                change_time,
            }),
            bus: Arc::new(Bus::new()),
            config,
        }
    }

    /// The current value, filtered by the read mask.
    pub fn get(&self, opts: &ReadOptions<T>) -> Result<T> {
        check_read_mask::<T>(opts.read_mask.as_ref())?;
        let value = Arc::clone(&self.state.read().value);
        filter_message(&*value, opts.read_mask.as_ref())
    }

    /// Write `body`, restricted to `writable_fields ∩ opts.update_mask`.
    ///
    /// Without any mask the value is replaced outright. Returns the committed
    /// value. Fails with `ConcurrentUpdate` if another write commits while
    /// this one is being computed.
    pub fn set(&self, body: T, opts: &WriteOptions<T>) -> Result<T> {
        let mask = write_mask(
            self.config.writable_fields.as_ref(),
            opts.update_mask.as_ref(),
            &body,
        )?;
        let committed = get_and_update(
            &self.state,
            "value",
            |s: &ValueState<T>| Some(Arc::clone(&s.value)),
            || None,
            |old, new| masked_write(old, new, body, mask.as_ref(), opts),
            |s, c| self.commit(s, c),
        )?;
        Ok(T::clone(&committed.new))
    }

    /// Apply `mutator(old, new)` to a copy of the current value and commit it.
    ///
    /// Honours `expected_value`; masks and interceptors do not apply.
    pub fn update_with(
        &self,
        mutator: impl FnOnce(&T, &mut T) -> Result<()>,
        opts: &WriteOptions<T>,
    ) -> Result<T> {
        let committed = get_and_update(
            &self.state,
            "value",
            |s: &ValueState<T>| Some(Arc::clone(&s.value)),
            || None,
            |old, new| {
                check_expected(old, opts)?;
                mutator(old, new)
            },
            |s, c| self.commit(s, c),
        )?;
        Ok(T::clone(&committed.new))
    }

    /// Runs under the write lock.
    fn commit(&self, state: &mut ValueState<T>, committed: &Committed<T>) {
        let change_time = self.config.clock.now();
        state.value = Arc::clone(&committed.new);
        state.change_time = change_time;
        self.bus.publish(ValueChange {
            value: Arc::clone(&committed.new),
            change_time,
            seed_value: false,
            last_seed_value: false,
        });
    }

    /// Subscribe to changes.
    ///
    /// Unless `updates_only` is set, the current value is delivered first as
    /// a seed. The channel closes when `ctx` is cancelled. Dropping the
    /// receiver also ends the subscription, but only once the next change
    /// is offered; until then the forwarding thread stays registered, so
    /// cancel `ctx` to release a subscription on a quiet value.
    pub fn pull(&self, ctx: Context, opts: &ReadOptions<T>) -> Result<Receiver<ValueChange<T>>> {
        check_read_mask::<T>(opts.read_mask.as_ref())?;

        let (inbox, guard) = {
            let state = self.state.read();
            let seed = (!opts.updates_only).then(|| ValueChange {
                value: Arc::clone(&state.value),
                change_time: state.change_time,
                seed_value: true,
                last_seed_value: true,
            });
            self.bus.subscribe(seed)
        };

        let mask = opts.read_mask.clone();
        let equivalence = self.config.equivalence.clone();
        let mut last_sent: Option<Arc<T>> = None;
        let transform = move |change: ValueChange<T>| {
            let value = match &mask {
                None => change.value,
                Some(mask) => match filter_message(&*change.value, Some(mask)) {
                    Ok(filtered) => Arc::new(filtered),
                    Err(e) => {
                        warn!(error = %e, "dropping change that failed to filter");
                        return None;
                    }
                },
            };
            if let Some(equivalence) = &equivalence {
                if let Some(prev) = &last_sent {
                    if equivalence.equivalent(prev, &value) {
                        return None;
                    }
                }
                last_sent = Some(Arc::clone(&value));
            }
            Some(ValueChange { value, ..change })
        };

        if opts.backpressure {
            spawn_forwarder("value-pull", ctx, inbox, guard, transform)
        } else {
            let latest = spawn_value_coalescer(ctx.clone(), inbox, guard)?;
            spawn_forwarder("value-pull", ctx, latest, (), transform)
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::StoreError;
    use crate::masks::FieldMask;
    use crate::types::FixedClock;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
    struct Light {
        name: String,
        level: u32,
    }

    fn light(name: &str, level: u32) -> Light {
        Light {
            name: name.into(),
            level,
        }
    }

    #[test]
    fn test_get_and_set() {
        let value = Value::new(light("hall", 1), ResourceConfig::default());
        let got = value.set(light("hall", 5), &WriteOptions::default()).unwrap();
        assert_eq!(got, light("hall", 5));
        assert_eq!(value.get(&ReadOptions::default()).unwrap(), light("hall", 5));
    }

    #[test]
    fn test_get_with_read_mask() {
        let value = Value::new(light("hall", 7), ResourceConfig::default());
        let opts = ReadOptions::default().with_read_mask(FieldMask::new(["level"]));
        assert_eq!(value.get(&opts).unwrap(), light("", 7));

        let bad = ReadOptions::default().with_read_mask(FieldMask::new(["nope"]));
        assert!(matches!(value.get(&bad), Err(StoreError::InvalidMask(_))));
    }

    #[test]
    fn test_interceptors_run_around_merge() {
        let value = Value::new(light("hall", 1), ResourceConfig::default());
        let opts = WriteOptions::default()
            .with_update_mask(FieldMask::new(["level"]))
            .with_intercept_before(|old: &Light, body: &mut Light| body.level += old.level)
            .with_intercept_after(|_: &Light, new: &mut Light| new.name.push('!'));

        let got = value.set(light("ignored", 10), &opts).unwrap();
        assert_eq!(got, light("hall!", 11));
    }

    #[test]
    fn test_update_with() {
        let value = Value::new(light("hall", 1), ResourceConfig::default());
        let got = value
            .update_with(
                |old, new| {
                    new.level = old.level * 3;
                    Ok(())
                },
                &WriteOptions::default(),
            )
            .unwrap();
        assert_eq!(got.level, 3);
    }

    #[test]
    fn test_change_time_from_clock() {
        let clock = Arc::new(FixedClock::new(Timestamp(10)));
        let value = Value::new(
            light("hall", 1),
            ResourceConfig::default().with_clock(clock.clone()),
        );
        let (ctx, _cancel) = Context::with_cancel();
        let rx = value.pull(ctx, &ReadOptions::default()).unwrap();

        let seed = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(seed.change_time, Timestamp(10));

        clock.set(Timestamp(20));
        value.set(light("hall", 2), &WriteOptions::default()).unwrap();
        let change = rx.recv_timeout(Duration::from_secs(1)).unwrap();
        assert_eq!(change.change_time, Timestamp(20));
        assert!(!change.seed_value);
    }
}
