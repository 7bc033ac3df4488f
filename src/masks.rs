//! Field masks over the serde data model.
//!
//! A mask is a set of dotted paths (`"brightness.level"`). Masks restrict
//! which parts of a message a write may touch and which parts a read
//! returns. All operations work on `serde_json::Value` trees; resources
//! convert their messages in and out around these calls.

use crate::error::{Result, StoreError};
use crate::shape::Shape;
use crate::types::{from_json, to_json, Message};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use tracing::debug;

/// A set of dotted field paths.
#[derive(Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FieldMask {
    paths: Vec<String>,
}

impl FieldMask {
    pub fn new<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut paths: Vec<String> = paths
            .into_iter()
            .map(Into::into)
            .filter(|p| !p.is_empty())
            .collect();
        paths.sort();
        paths.dedup();
        Self { paths }
    }

    /// Parse a comma separated list of paths, e.g. `"a,b.c"`.
    pub fn parse(s: &str) -> Self {
        Self::new(s.split(',').map(str::trim))
    }

    pub fn paths(&self) -> &[String] {
        &self.paths
    }

    pub fn is_empty(&self) -> bool {
        self.paths.is_empty()
    }

    /// Whether `path` is equal to, or nested under, one of the mask's paths.
    pub fn covers(&self, path: &str) -> bool {
        self.paths.iter().any(|p| is_prefix_path(p, path))
    }
}

impl fmt::Debug for FieldMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "FieldMask({})", self.paths.join(","))
    }
}

/// `prefix` equals `path` or is an ancestor of it.
fn is_prefix_path(prefix: &str, path: &str) -> bool {
    path == prefix
        || (path.len() > prefix.len()
            && path.starts_with(prefix)
            && path.as_bytes()[prefix.len()] == b'.')
}

/// Check that every path in `mask` names a field in at least one of `schemas`.
///
/// A `null` on the way down is an absent submessage; anything below it is
/// accepted since its shape cannot be inspected.
pub fn validate(mask: &FieldMask, schemas: &[&Value]) -> Result<()> {
    for path in mask.paths() {
        if !schemas.iter().any(|schema| path_known(schema, path)) {
            return Err(StoreError::InvalidMask(format!("unknown field path '{}'", path)));
        }
    }
    Ok(())
}

fn path_known(schema: &Value, path: &str) -> bool {
    let mut current = schema;
    for segment in path.split('.') {
        match current {
            Value::Object(map) => match map.get(segment) {
                Some(child) => current = child,
                None => return false,
            },
            Value::Null => return true,
            _ => return false,
        }
    }
    true
}

/// Compute the mask a write should apply.
///
/// `writable` is the resource's writable fields, `update` the caller's update
/// mask. `None` (or an empty update mask) means "everything". Returns `None`
/// when the write is a full replacement.
pub fn intersect(
    writable: Option<&FieldMask>,
    update: Option<&FieldMask>,
    schemas: &[&Value],
) -> Result<Option<FieldMask>> {
    let update = update.filter(|m| !m.is_empty());
    if let Some(update) = update {
        validate(update, schemas)?;
    }

    match (writable, update) {
        (None, update) => Ok(update.cloned()),
        (Some(writable), None) => Ok(Some(writable.clone())),
        (Some(writable), Some(update)) => {
            let mut paths = Vec::new();
            for path in update.paths() {
                if writable.covers(path) {
                    paths.push(path.clone());
                    continue;
                }
                // Update path is a parent of writable paths: narrow to those.
                let nested: Vec<&String> = writable
                    .paths()
                    .iter()
                    .filter(|w| is_prefix_path(path, w))
                    .collect();
                if nested.is_empty() {
                    return Err(StoreError::InvalidMask(format!(
                        "field '{}' is not writable",
                        path
                    )));
                }
                paths.extend(nested.into_iter().cloned());
            }
            Ok(Some(FieldMask::new(paths)))
        }
    }
}

/// Copy every masked path from `src` into `dst`.
///
/// A path missing from `src` is removed from `dst`. A `null` submessage in
/// `src` prunes the whole submessage in `dst`, even when only a nested path
/// was masked. A submessage absent from `dst` is first created with the
/// fields of its `src` counterpart reset to zero values, so only the masked
/// leaves carry data.
pub fn merge(dst: &mut Value, src: &Value, mask: &FieldMask) {
    merge_shaped(dst, src, mask, None);
}

/// [`merge`], creating absent submessages from `shape` where it knows them.
fn merge_shaped(dst: &mut Value, src: &Value, mask: &FieldMask, shape: Option<&Shape>) {
    for path in mask.paths() {
        let segments: Vec<&str> = path.split('.').collect();
        merge_path(dst, src, &segments, shape);
    }
}

fn merge_path(dst: &mut Value, src: &Value, segments: &[&str], shape: Option<&Shape>) {
    let Some((head, rest)) = segments.split_first() else {
        return;
    };
    let src_child = src.get(*head);

    if !dst.is_object() {
        *dst = Value::Object(Map::new());
    }
    let Value::Object(dst_map) = dst else {
        return;
    };

    match src_child {
        None => {
            dst_map.remove(*head);
        }
        Some(child) if rest.is_empty() || child.is_null() => {
            dst_map.insert((*head).to_string(), child.clone());
        }
        Some(child) => {
            let child_shape = shape.and_then(|s| s.field(head));
            let entry = dst_map.entry((*head).to_string()).or_insert(Value::Null);
            if !entry.is_object() {
                *entry = match child_shape.map(Shape::instance) {
                    Some(empty @ Value::Object(_)) => empty,
                    _ => zeroed(child),
                };
            }
            merge_path(entry, child, rest, child_shape);
        }
    }
}

/// `value` with every leaf reset to its zero value; nulls stay null.
fn zeroed(value: &Value) -> Value {
    match value {
        Value::Null => Value::Null,
        Value::Bool(_) => Value::Bool(false),
        Value::Number(n) if n.is_f64() => Value::from(0.0),
        Value::Number(_) => Value::from(0),
        Value::String(_) => Value::String(String::new()),
        Value::Array(_) => Value::Array(Vec::new()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, child)| (key.clone(), zeroed(child)))
                .collect(),
        ),
    }
}

/// Project `src` onto `mask`, starting from `base` (the empty message).
pub fn filter(src: &Value, mask: &FieldMask, base: Value) -> Value {
    let mut out = base;
    merge(&mut out, src, mask);
    out
}

/// Traced shape of `T` and the schema paths are checked against.
///
/// Without a traceable shape the schema is `T::default()`, where any path
/// below a `None` submessage is accepted.
fn message_schema<T: Message>() -> Result<(Option<Shape>, Value)> {
    match Shape::trace::<T>() {
        Ok(shape) => {
            let schema = shape.schema();
            Ok((Some(shape), schema))
        }
        Err(e) => {
            debug!(error = %e, "message shape not traceable, using its default value");
            Ok((None, to_json(&T::default())?))
        }
    }
}

/// The mask a write of `body` applies, checked against the shape of `T`.
pub(crate) fn write_mask<T: Message>(
    writable: Option<&FieldMask>,
    update: Option<&FieldMask>,
    body: &T,
) -> Result<Option<FieldMask>> {
    if writable.is_none() && update.map_or(true, FieldMask::is_empty) {
        return Ok(None);
    }
    let (_, schema) = message_schema::<T>()?;
    let body = to_json(body)?;
    intersect(writable, update, &[&schema, &body])
}

/// Check a read mask against the shape of `T`.
pub(crate) fn check_read_mask<T: Message>(mask: Option<&FieldMask>) -> Result<()> {
    match mask {
        Some(mask) if !mask.is_empty() => validate(mask, &[&message_schema::<T>()?.1]),
        _ => Ok(()),
    }
}

/// Merge `src` into `dst` along `mask`; no mask replaces `dst` outright.
pub(crate) fn merge_message<T: Message>(
    dst: &mut T,
    src: &T,
    mask: Option<&FieldMask>,
) -> Result<()> {
    match mask {
        None => *dst = src.clone(),
        Some(mask) => {
            let (shape, _) = message_schema::<T>()?;
            let mut out = to_json(&*dst)?;
            merge_shaped(&mut out, &to_json(src)?, mask, shape.as_ref());
            *dst = from_json(out)?;
        }
    }
    Ok(())
}

/// A copy of `msg` holding only the fields in `mask`.
pub(crate) fn filter_message<T: Message>(msg: &T, mask: Option<&FieldMask>) -> Result<T> {
    match mask {
        Some(mask) if !mask.is_empty() => {
            let (shape, _) = message_schema::<T>()?;
            let mut out = to_json(&T::default())?;
            merge_shaped(&mut out, &to_json(msg)?, mask, shape.as_ref());
            from_json(out)
        }
        _ => Ok(msg.clone()),
    }
}
