//! Optimistic read-compute-commit shared by values and collections.
//!
//! The current item is captured by identity (its `Arc` pointer) under the
//! read lock, the mutation runs with no lock held, and the commit only goes
//! through if the item is still the same allocation. There is exactly one
//! attempt: on conflict the caller gets [`StoreError::ConcurrentUpdate`] and
//! decides whether to retry.

use crate::error::{Result, StoreError};
use crate::masks::{merge_message, FieldMask};
use crate::options::WriteOptions;
use crate::types::Message;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::warn;

/// Outcome of a committed update. `old` is `None` when the item was created.
#[derive(Debug)]
pub(crate) struct Committed<T> {
    pub old: Option<Arc<T>>,
    pub new: Arc<T>,
}

/// Run one optimistic update against the item `get` selects from `lock`.
///
/// - `create` supplies the base when the item is absent; `None` from it means
///   the update fails with `NotFound(key)`.
/// - `mutate(old, new)` edits `new`, a clone of the base. It may fail to
///   abort the update.
/// - `commit` installs the result while the write lock is held.
pub(crate) fn get_and_update<S, T: Clone>(
    lock: &RwLock<S>,
    key: &str,
    get: impl Fn(&S) -> Option<Arc<T>>,
    create: impl FnOnce() -> Option<T>,
    mutate: impl FnOnce(&T, &mut T) -> Result<()>,
    commit: impl FnOnce(&mut S, &Committed<T>),
) -> Result<Committed<T>> {
    let old = get(&*lock.read());

    let base = match &old {
        Some(old) => Arc::clone(old),
        None => Arc::new(create().ok_or_else(|| StoreError::NotFound(key.to_string()))?),
    };
    let mut new = T::clone(&base);
    mutate(&base, &mut new)?;

    let mut state = lock.write();
    let current = get(&*state);
    let unchanged = match (&old, &current) {
        (Some(a), Some(b)) => Arc::ptr_eq(a, b),
        (None, None) => true,
        _ => false,
    };
    if !unchanged {
        warn!(key, "concurrent update detected, aborting");
        return Err(StoreError::ConcurrentUpdate);
    }

    let committed = Committed {
        old,
        new: Arc::new(new),
    };
    commit(&mut *state, &committed);
    Ok(committed)
}

/// Fail the write unless `old` matches the caller's expected value.
pub(crate) fn check_expected<T: Message>(old: &T, opts: &WriteOptions<T>) -> Result<()> {
    match &opts.expected_value {
        Some(expected) if expected != old => Err(StoreError::ExpectedValueMismatch),
        _ => Ok(()),
    }
}

/// The mutation step of a masked write: precondition, interceptors and merge.
pub(crate) fn masked_write<T: Message>(
    old: &T,
    new: &mut T,
    mut body: T,
    mask: Option<&FieldMask>,
    opts: &WriteOptions<T>,
) -> Result<()> {
    check_expected(old, opts)?;
    if let Some(before) = &opts.intercept_before {
        before(old, &mut body);
    }
    merge_message(new, &body, mask)?;
    if let Some(after) = &opts.intercept_after {
        after(old, new);
    }
    Ok(())
}
