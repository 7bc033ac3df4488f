//! Core types shared by values and collections.

use crate::error::Result;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current wall-clock time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_micros() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Source of change timestamps.
pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        Timestamp::now()
    }
}

/// A clock that only moves when told to. Used for deterministic change times.
#[derive(Debug, Default)]
pub struct FixedClock {
    micros: AtomicI64,
}

impl FixedClock {
    pub fn new(at: Timestamp) -> Self {
        Self {
            micros: AtomicI64::new(at.0),
        }
    }

    pub fn set(&self, at: Timestamp) {
        self.micros.store(at.0, Ordering::SeqCst);
    }

    /// Move the clock forward by `micros` and return the new time.
    pub fn advance(&self, micros: i64) -> Timestamp {
        Timestamp(self.micros.fetch_add(micros, Ordering::SeqCst) + micros)
    }
}

impl Clock for FixedClock {
    fn now(&self) -> Timestamp {
        Timestamp(self.micros.load(Ordering::SeqCst))
    }
}

/// Capabilities a type needs to be held by a [`Value`](crate::Value) or
/// [`Collection`](crate::Collection).
///
/// Field masks operate on the serde data model, so any plain serializable
/// struct qualifies. `Default` plays the role of the empty message: it is the
/// base for filtered reads and for items created by `create_if_absent`.
pub trait Message:
    Clone + PartialEq + Default + fmt::Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
}

impl<T> Message for T where
    T: Clone
        + PartialEq
        + Default
        + fmt::Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

pub(crate) fn to_json<T: Serialize>(msg: &T) -> Result<serde_json::Value> {
    Ok(serde_json::to_value(msg)?)
}

pub(crate) fn from_json<T: DeserializeOwned>(value: serde_json::Value) -> Result<T> {
    Ok(serde_json::from_value(value)?)
}
