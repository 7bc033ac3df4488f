//! Change events emitted by values and collections.

use crate::types::Timestamp;
use serde::Serialize;
use std::sync::Arc;

/// One state transition of a [`Value`](crate::Value).
#[derive(Clone, Debug, Serialize)]
pub struct ValueChange<T> {
    pub value: Arc<T>,
    pub change_time: Timestamp,
    /// Part of the current-state replay sent to a new subscriber.
    pub seed_value: bool,
    /// Final event of that replay.
    pub last_seed_value: bool,
}

/// Kind of change to a collection item.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Add,
    Update,
    /// The item was removed and re-added. Only produced by coalescing.
    Replace,
    Remove,
}

/// One state transition of a [`Collection`](crate::Collection) item.
#[derive(Clone, Debug, Serialize)]
pub struct CollectionChange<T> {
    pub id: String,
    pub change_time: Timestamp,
    pub change_type: ChangeType,
    pub old_value: Option<Arc<T>>,
    pub new_value: Option<Arc<T>>,
    pub seed_value: bool,
    pub last_seed_value: bool,
}

impl<T> CollectionChange<T> {
    pub(crate) fn add(id: String, value: Arc<T>, change_time: Timestamp) -> Self {
        Self {
            id,
            change_time,
            change_type: ChangeType::Add,
            old_value: None,
            new_value: Some(value),
            seed_value: false,
            last_seed_value: false,
        }
    }

    pub(crate) fn update(id: String, old: Arc<T>, new: Arc<T>, change_time: Timestamp) -> Self {
        Self {
            id,
            change_time,
            change_type: ChangeType::Update,
            old_value: Some(old),
            new_value: Some(new),
            seed_value: false,
            last_seed_value: false,
        }
    }

    pub(crate) fn remove(id: String, old: Arc<T>, change_time: Timestamp) -> Self {
        Self {
            id,
            change_time,
            change_type: ChangeType::Remove,
            old_value: Some(old),
            new_value: None,
            seed_value: false,
            last_seed_value: false,
        }
    }

    /// Reshape this change for a view that only shows items matching `include`.
    ///
    /// Updates that move an item into the view become adds, ones that move it
    /// out become removes, and changes entirely outside the view are dropped.
    pub(crate) fn restrict_to(self, include: impl Fn(&str, &T) -> bool) -> Option<Self> {
        let old_in = self
            .old_value
            .as_ref()
            .map_or(false, |v| include(self.id.as_str(), &**v));
        let new_in = self
            .new_value
            .as_ref()
            .map_or(false, |v| include(self.id.as_str(), &**v));

        match self.change_type {
            ChangeType::Add => new_in.then_some(self),
            ChangeType::Remove => old_in.then_some(self),
            ChangeType::Update | ChangeType::Replace => match (old_in, new_in) {
                (true, true) => Some(self),
                (true, false) => Some(Self {
                    change_type: ChangeType::Remove,
                    new_value: None,
                    ..self
                }),
                (false, true) => Some(Self {
                    change_type: ChangeType::Add,
                    old_value: None,
                    ..self
                }),
                (false, false) => None,
            },
        }
    }
}
