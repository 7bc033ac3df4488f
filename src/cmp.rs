//! Message equivalence for de-duplicating subscription output.

use crate::types::{to_json, Message};
use serde_json::Value;
use std::fmt;
use std::sync::Arc;

/// Decides whether two messages are close enough that a subscriber need not
/// see the second one.
pub struct Equivalence<T> {
    eq: Arc<dyn Fn(&T, &T) -> bool + Send + Sync>,
}

impl<T> Clone for Equivalence<T> {
    fn clone(&self) -> Self {
        Self {
            eq: Arc::clone(&self.eq),
        }
    }
}

impl<T> fmt::Debug for Equivalence<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Equivalence(..)")
    }
}

impl<T: Message> Equivalence<T> {
    /// Custom comparison.
    pub fn new(eq: impl Fn(&T, &T) -> bool + Send + Sync + 'static) -> Self {
        Self { eq: Arc::new(eq) }
    }

    /// Plain structural equality.
    pub fn structural() -> Self {
        Self::new(|a: &T, b: &T| a == b)
    }

    /// Structural equality where numbers compare equal within `tolerance`.
    pub fn float_tolerance(tolerance: f64) -> Self {
        Self::new(move |a: &T, b: &T| match (to_json(a), to_json(b)) {
            (Ok(a), Ok(b)) => json_equal(&a, &b, tolerance),
            _ => false,
        })
    }

    pub fn equivalent(&self, a: &T, b: &T) -> bool {
        (self.eq)(a, b)
    }
}

fn json_equal(a: &Value, b: &Value, tolerance: f64) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(x), Some(y)) => (x - y).abs() <= tolerance,
            _ => x == y,
        },
        (Value::Array(xs), Value::Array(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .zip(ys.iter())
                    .all(|(x, y)| json_equal(x, y, tolerance))
        }
        (Value::Object(xs), Value::Object(ys)) => {
            xs.len() == ys.len()
                && xs
                    .iter()
                    .all(|(k, x)| ys.get(k).map_or(false, |y| json_equal(x, y, tolerance)))
        }
        _ => a == b,
    }
}
