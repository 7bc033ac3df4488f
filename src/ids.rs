//! Unique id generation for collection items.

use crate::error::{Result, StoreError};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use rand::RngCore;
use tracing::{debug, warn};

/// Attempts before giving up on finding an unused id.
pub const MAX_ID_ATTEMPTS: usize = 10;

/// Bytes of randomness per id.
const ID_BYTES: usize = 16;

/// Generate a random id that `exists` reports as unused.
///
/// Fails with [`StoreError::IdExhausted`] after [`MAX_ID_ATTEMPTS`] collisions.
pub fn generate_unique_id(
    rng: &mut dyn RngCore,
    exists: impl Fn(&str) -> bool,
) -> Result<String> {
    let mut bytes = [0u8; ID_BYTES];
    for attempt in 1..=MAX_ID_ATTEMPTS {
        rng.fill_bytes(&mut bytes);
        let id = URL_SAFE_NO_PAD.encode(bytes);
        if !exists(&id) {
            return Ok(id);
        }
        debug!(attempt, id = %id, "generated id already in use");
    }
    warn!(attempts = MAX_ID_ATTEMPTS, "id generation exhausted");
    Err(StoreError::IdExhausted {
        attempts: MAX_ID_ATTEMPTS,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::cell::Cell;
    use std::collections::HashSet;

    #[test]
    fn test_generates_distinct_ids() {
        let mut rng = StdRng::seed_from_u64(1);
        let mut seen = HashSet::new();
        for _ in 0..100 {
            let id = generate_unique_id(&mut rng, |id| seen.contains(id)).unwrap();
            assert_eq!(id.len(), 22);
            seen.insert(id);
        }
        assert_eq!(seen.len(), 100);
    }

    #[test]
    fn test_retries_on_collision() {
        let mut rng = StdRng::seed_from_u64(2);
        let calls = Cell::new(0);
        let id = generate_unique_id(&mut rng, |_| {
            calls.set(calls.get() + 1);
            calls.get() < 3
        })
        .unwrap();
        assert!(!id.is_empty());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn test_exhaustion() {
        let mut rng = StdRng::seed_from_u64(3);
        let calls = Cell::new(0);
        let err = generate_unique_id(&mut rng, |_| {
            calls.set(calls.get() + 1);
            true
        })
        .unwrap_err();
        assert!(matches!(err, StoreError::IdExhausted { attempts: 10 }));
        assert_eq!(calls.get(), MAX_ID_ATTEMPTS);
    }
}
