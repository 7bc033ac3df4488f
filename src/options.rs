//! Resource, write and read configuration.

use crate::cmp::Equivalence;
use crate::masks::FieldMask;
use crate::types::{Clock, SystemClock};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use std::sync::Arc;

/// Random source shared between a resource and its id generator.
pub type SharedRng = Arc<Mutex<Box<dyn RngCore + Send>>>;

/// Hook run around a masked merge: `(old, value)`.
pub type Interceptor<T> = Arc<dyn Fn(&T, &mut T) + Send + Sync>;

/// Collection view predicate: `(id, item)`.
pub type IncludeFn<T> = Arc<dyn Fn(&str, &T) -> bool + Send + Sync>;

/// Wrap an rng for use as a resource's random source.
pub fn shared_rng(rng: impl RngCore + Send + 'static) -> SharedRng {
    let rng: Box<dyn RngCore + Send> = Box::new(rng);
    Arc::new(Mutex::new(rng))
}

/// Configuration fixed at construction of a [`Value`](crate::Value) or
/// [`Collection`](crate::Collection).
pub struct ResourceConfig<T> {
    /// Maximal mask writes may touch. `None` means all fields are writable.
    pub writable_fields: Option<FieldMask>,

    /// Source of change timestamps.
    pub clock: Arc<dyn Clock>,

    /// Source of randomness for id generation.
    pub rng: SharedRng,

    /// Suppresses consecutive equivalent values on each subscription.
    pub equivalence: Option<Equivalence<T>>,
}

impl<T> Default for ResourceConfig<T> {
    fn default() -> Self {
        Self {
            writable_fields: None,
            clock: Arc::new(SystemClock),
            rng: shared_rng(StdRng::from_entropy()),
            equivalence: None,
        }
    }
}

impl<T> ResourceConfig<T> {
    pub fn with_writable_fields(mut self, mask: FieldMask) -> Self {
        self.writable_fields = Some(mask);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_rng(mut self, rng: impl RngCore + Send + 'static) -> Self {
        self.rng = shared_rng(rng);
        self
    }

    pub fn with_equivalence(mut self, equivalence: Equivalence<T>) -> Self {
        self.equivalence = Some(equivalence);
        self
    }
}

/// Per-call options for writes.
pub struct WriteOptions<T> {
    /// Fields of the body to apply; intersected with the writable fields.
    pub update_mask: Option<FieldMask>,

    /// Runs before the merge with `(old, body)`.
    pub intercept_before: Option<Interceptor<T>>,

    /// Runs after the merge with `(old, new)`.
    pub intercept_after: Option<Interceptor<T>>,

    /// Abort with `ExpectedValueMismatch` unless the current value equals this.
    pub expected_value: Option<T>,

    /// Deleting an absent item succeeds instead of failing `NotFound`.
    pub allow_missing: bool,

    /// Updating an absent item creates it from the empty message.
    pub create_if_absent: bool,
}

impl<T> Default for WriteOptions<T> {
    fn default() -> Self {
        Self {
            update_mask: None,
            intercept_before: None,
            intercept_after: None,
            expected_value: None,
            allow_missing: false,
            create_if_absent: false,
        }
    }
}

impl<T> WriteOptions<T> {
    pub fn with_update_mask(mut self, mask: FieldMask) -> Self {
        self.update_mask = Some(mask);
        self
    }

    pub fn with_intercept_before(mut self, f: impl Fn(&T, &mut T) + Send + Sync + 'static) -> Self {
        self.intercept_before = Some(Arc::new(f));
        self
    }

    pub fn with_intercept_after(mut self, f: impl Fn(&T, &mut T) + Send + Sync + 'static) -> Self {
        self.intercept_after = Some(Arc::new(f));
        self
    }

    pub fn with_expected_value(mut self, value: T) -> Self {
        self.expected_value = Some(value);
        self
    }

    pub fn allow_missing(mut self) -> Self {
        self.allow_missing = true;
        self
    }

    pub fn create_if_absent(mut self) -> Self {
        self.create_if_absent = true;
        self
    }
}

/// Per-call options for reads and subscriptions.
pub struct ReadOptions<T> {
    /// Fields to return. `None` returns everything.
    pub read_mask: Option<FieldMask>,

    /// Skip replaying the current state to a new subscriber.
    pub updates_only: bool,

    /// Collection view: only items matching this are visible.
    pub include: Option<IncludeFn<T>>,

    /// When false, a slow subscriber gets coalesced changes instead of every change.
    pub backpressure: bool,
}

impl<T> Default for ReadOptions<T> {
    fn default() -> Self {
        Self {
            read_mask: None,
            updates_only: false,
            include: None,
            backpressure: true,
        }
    }
}

impl<T> Clone for ReadOptions<T> {
    fn clone(&self) -> Self {
        Self {
            read_mask: self.read_mask.clone(),
            updates_only: self.updates_only,
            include: self.include.clone(),
            backpressure: self.backpressure,
        }
    }
}

impl<T> ReadOptions<T> {
    pub fn with_read_mask(mut self, mask: FieldMask) -> Self {
        self.read_mask = Some(mask);
        self
    }

    pub fn updates_only(mut self) -> Self {
        self.updates_only = true;
        self
    }

    pub fn with_include(mut self, f: impl Fn(&str, &T) -> bool + Send + Sync + 'static) -> Self {
        self.include = Some(Arc::new(f));
        self
    }

    pub fn without_backpressure(mut self) -> Self {
        self.backpressure = false;
        self
    }

    pub(crate) fn includes(&self, id: &str, item: &T) -> bool {
        self.include.as_ref().map_or(true, |f| f(id, item))
    }
}
