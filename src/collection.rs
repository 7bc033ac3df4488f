//! A keyed set of reactive resources.

use crate::bus::{spawn_forwarder, Bus};
use crate::changes::{ChangeType, CollectionChange};
use crate::cmp::Equivalence;
use crate::context::Context;
use crate::error::{Result, StoreError};
use crate::ids::generate_unique_id;
use crate::masks::{check_read_mask, filter_message, write_mask, FieldMask};
use crate::merge::spawn_collection_merger;
use crate::options::{IncludeFn, ReadOptions, ResourceConfig, WriteOptions};
use crate::types::{Message, Timestamp};
use crate::update::{check_expected, get_and_update, masked_write, Committed};
use crossbeam_channel::Receiver;
use parking_lot::RwLock;
use std::collections::btree_map::Entry;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use tracing::warn;

struct Item<T> {
    body: Arc<T>,
    change_time: Timestamp,
}

struct CollectionState<T> {
    by_id: BTreeMap<String, Item<T>>,
}

impl<T> CollectionState<T> {
    fn body(&self, id: &str) -> Option<Arc<T>> {
        self.by_id.get(id).map(|item| Arc::clone(&item.body))
    }
}

/// Messages keyed by id, with the same read/write/pull contract as
/// [`Value`](crate::Value).
pub struct Collection<T: Message> {
    state: RwLock<CollectionState<T>>,
    bus: Arc<Bus<CollectionChange<T>>>,
    config: ResourceConfig<T>,
}

impl<T: Message> Collection<T> {
    pub fn new(config: ResourceConfig<T>) -> Self {
        Self {
            state: RwLock::new(CollectionState {
                by_id: BTreeMap::new(),
            }),
            bus: Arc::new(Bus::new()),
            config,
        }
    }

    /// A collection seeded with `items`. Empty ids are generated.
    pub fn with_items(
        items: impl IntoIterator<Item = (String, T)>,
        config: ResourceConfig<T>,
    ) -> Result<Self> {
        let collection = Self::new(config);
        for (id, body) in items {
            collection.add(&id, body)?;
        }
        Ok(collection)
    }

    pub fn get(&self, id: &str, opts: &ReadOptions<T>) -> Result<Option<T>> {
        check_read_mask::<T>(opts.read_mask.as_ref())?;
        let Some(body) = self.state.read().body(id) else {
            return Ok(None);
        };
        if !opts.includes(id, &body) {
            return Ok(None);
        }
        filter_message(&*body, opts.read_mask.as_ref()).map(Some)
    }

    /// Visible items in ascending id order.
    pub fn list(&self, opts: &ReadOptions<T>) -> Result<Vec<(String, T)>> {
        check_read_mask::<T>(opts.read_mask.as_ref())?;
        let snapshot: Vec<(String, Arc<T>)> = {
            let state = self.state.read();
            state
                .by_id
                .iter()
                .map(|(id, item)| (id.clone(), Arc::clone(&item.body)))
                .collect()
        };
        snapshot
            .into_iter()
            .filter(|(id, body)| opts.includes(id, body))
            .map(|(id, body)| Ok((id, filter_message(&*body, opts.read_mask.as_ref())?)))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.state.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.read().by_id.is_empty()
    }

    /// Insert `body` under `id`, or under a generated id if `id` is empty.
    ///
    /// Returns the id and the stored item.
    pub fn add(&self, id: &str, body: T) -> Result<(String, T)> {
        self.add_fn(id, |_| body)
    }

    /// Like [`add`](Self::add), building the item from its final id.
    ///
    /// `create` runs under the write lock and must not call back into this
    /// collection.
    pub fn add_fn(&self, id: &str, create: impl FnOnce(&str) -> T) -> Result<(String, T)> {
        let mut state = self.state.write();
        let id = if id.is_empty() {
            let mut rng = self.config.rng.lock();
            generate_unique_id(&mut **rng, |candidate| state.by_id.contains_key(candidate))?
        } else if state.by_id.contains_key(id) {
            return Err(StoreError::AlreadyExists(id.to_string()));
        } else {
            id.to_string()
        };

        let body = Arc::new(create(&id));
        let change_time = self.config.clock.now();
        state.by_id.insert(
            id.clone(),
            Item {
                body: Arc::clone(&body),
                change_time,
            },
        );
        self.bus
            .publish(CollectionChange::add(id.clone(), Arc::clone(&body), change_time));
        Ok((id, T::clone(&body)))
    }

    /// Masked write of `body` into the item `id`, as [`Value::set`](crate::Value::set).
    ///
    /// An absent item fails with `NotFound` unless `create_if_absent` is set,
    /// in which case the write applies to the empty message and is reported
    /// as an add.
    pub fn update(&self, id: &str, body: T, opts: &WriteOptions<T>) -> Result<T> {
        require_id(id)?;
        let mask = write_mask(
            self.config.writable_fields.as_ref(),
            opts.update_mask.as_ref(),
            &body,
        )?;
        self.apply(
            id,
            || opts.create_if_absent.then(T::default),
            |old, new| masked_write(old, new, body, mask.as_ref(), opts),
        )
    }

    /// Apply `mutator(old, new)` to a copy of item `id` and commit it.
    pub fn update_with(
        &self,
        id: &str,
        mutator: impl FnOnce(&T, &mut T) -> Result<()>,
    ) -> Result<T> {
        self.update_or_create(id, mutator, || None)
    }

    /// Like [`update_with`](Self::update_with), but an absent item is first
    /// built by `create`. If `create` returns `None` the update fails with
    /// `NotFound`.
    pub fn update_or_create(
        &self,
        id: &str,
        mutator: impl FnOnce(&T, &mut T) -> Result<()>,
        create: impl FnOnce() -> Option<T>,
    ) -> Result<T> {
        require_id(id)?;
        self.apply(id, create, mutator)
    }

    fn apply(
        &self,
        id: &str,
        create: impl FnOnce() -> Option<T>,
        mutate: impl FnOnce(&T, &mut T) -> Result<()>,
    ) -> Result<T> {
        let committed = get_and_update(
            &self.state,
            id,
            |s: &CollectionState<T>| s.body(id),
            create,
            mutate,
            |s, c| self.commit(s, id, c),
        )?;
        Ok(T::clone(&committed.new))
    }

    /// Runs under the write lock.
    fn commit(&self, state: &mut CollectionState<T>, id: &str, committed: &Committed<T>) {
        let change_time = self.config.clock.now();
        state.by_id.insert(
            id.to_string(),
            Item {
                body: Arc::clone(&committed.new),
                change_time,
            },
        );
        let new = Arc::clone(&committed.new);
        let change = match &committed.old {
            Some(old) => CollectionChange::update(id.to_string(), Arc::clone(old), new, change_time),
            None => CollectionChange::add(id.to_string(), new, change_time),
        };
        self.bus.publish(change);
    }

    /// Remove item `id`, returning what it held.
    ///
    /// An absent item fails with `NotFound`, or returns `None` with
    /// `allow_missing`.
    pub fn delete(&self, id: &str, opts: &WriteOptions<T>) -> Result<Option<T>> {
        require_id(id)?;
        let mut state = self.state.write();
        let Entry::Occupied(entry) = state.by_id.entry(id.to_string()) else {
            if opts.allow_missing {
                return Ok(None);
            }
            return Err(StoreError::NotFound(id.to_string()));
        };
        check_expected(&*entry.get().body, opts)?;

        let old = entry.remove().body;
        let change_time = self.config.clock.now();
        self.bus
            .publish(CollectionChange::remove(id.to_string(), Arc::clone(&old), change_time));
        Ok(Some(T::clone(&old)))
    }

    /// Subscribe to changes.
    ///
    /// Unless `updates_only` is set, every visible item is first delivered as
    /// an `Add` seed in id order, the last one flagged `last_seed_value`.
    /// With `include`, updates crossing the view boundary become adds or
    /// removes. Without backpressure, changes the consumer has not yet taken
    /// are coalesced per id.
    ///
    /// Cancelling `ctx` closes the channel. A dropped receiver is only
    /// noticed when the next visible change is offered to it.
    pub fn pull(
        &self,
        ctx: Context,
        opts: &ReadOptions<T>,
    ) -> Result<Receiver<CollectionChange<T>>> {
        check_read_mask::<T>(opts.read_mask.as_ref())?;

        let (inbox, guard) = {
            let state = self.state.read();
            let mut seeds: Vec<CollectionChange<T>> = if opts.updates_only {
                Vec::new()
            } else {
                state
                    .by_id
                    .iter()
                    .filter(|(id, item)| opts.includes(id, &item.body))
                    .map(|(id, item)| CollectionChange {
                        seed_value: true,
                        ..CollectionChange::add(id.clone(), Arc::clone(&item.body), item.change_time)
                    })
                    .collect()
            };
            if let Some(last) = seeds.last_mut() {
                last.last_seed_value = true;
            }
            self.bus.subscribe(seeds)
        };

        let mut view = SubscriberView {
            include: opts.include.clone(),
            mask: opts.read_mask.clone(),
            equivalence: self.config.equivalence.clone(),
            last_sent: HashMap::new(),
        };
        let transform = move |change| view.reshape(change);

        if opts.backpressure {
            spawn_forwarder("collection-pull", ctx, inbox, guard, transform)
        } else {
            let merged = spawn_collection_merger(ctx.clone(), inbox, guard)?;
            spawn_forwarder("collection-pull", ctx, merged, (), transform)
        }
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.bus.subscriber_count()
    }
}

fn require_id(id: &str) -> Result<()> {
    if id.is_empty() {
        return Err(StoreError::InvalidArgument("id is required".to_string()));
    }
    Ok(())
}

/// Per-subscription reshaping of the raw change stream.
struct SubscriberView<T: Message> {
    include: Option<IncludeFn<T>>,
    mask: Option<FieldMask>,
    equivalence: Option<Equivalence<T>>,
    /// Last value delivered per id, for de-duplication.
    last_sent: HashMap<String, Arc<T>>,
}

impl<T: Message> SubscriberView<T> {
    fn reshape(&mut self, change: CollectionChange<T>) -> Option<CollectionChange<T>> {
        let change = match &self.include {
            Some(include) => change.restrict_to(&**include)?,
            None => change,
        };
        let change = CollectionChange {
            old_value: self.filter(change.old_value.clone())?,
            new_value: self.filter(change.new_value.clone())?,
            ..change
        };

        if let Some(equivalence) = &self.equivalence {
            match (change.change_type, &change.new_value) {
                (ChangeType::Remove, _) | (_, None) => {
                    self.last_sent.remove(&change.id);
                }
                (change_type, Some(new)) => {
                    let debounce = matches!(change_type, ChangeType::Update | ChangeType::Replace);
                    if debounce {
                        if let Some(prev) = self.last_sent.get(&change.id) {
                            if equivalence.equivalent(prev, new) {
                                return None;
                            }
                        }
                    }
                    self.last_sent.insert(change.id.clone(), Arc::clone(new));
                }
            }
        }
        Some(change)
    }

    /// `None` when filtering failed and the change should be dropped.
    fn filter(&self, value: Option<Arc<T>>) -> Option<Option<Arc<T>>> {
        let Some(mask) = &self.mask else {
            return Some(value);
        };
        let Some(value) = value else {
            return Some(None);
        };
        match filter_message(&*value, Some(mask)) {
            Ok(filtered) => Some(Some(Arc::new(filtered))),
            Err(e) => {
                warn!(error = %e, "dropping change that failed to filter");
                None
            }
        }
    }
}
