//! Error kinds surfaced by resource operations.

use rand::RngCore;
use resource_store::{
    generate_unique_id, Collection, Context, ErrorKind, FieldMask, ReadOptions, ResourceConfig,
    StoreError, Value, WriteOptions, MAX_ID_ATTEMPTS,
};
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Account {
    owner: String,
    balance: i64,
    limits: Limits,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
struct Limits {
    daily: i64,
    monthly: i64,
}

fn account(owner: &str, balance: i64) -> Account {
    Account {
        owner: owner.to_string(),
        balance,
        limits: Limits::default(),
    }
}

/// Produces the same bytes forever, so every generated id collides.
struct StuckRng;

impl RngCore for StuckRng {
    fn next_u32(&mut self) -> u32 {
        0
    }

    fn next_u64(&mut self) -> u64 {
        0
    }

    fn fill_bytes(&mut self, dest: &mut [u8]) {
        dest.fill(0);
    }

    fn try_fill_bytes(&mut self, dest: &mut [u8]) -> std::result::Result<(), rand::Error> {
        self.fill_bytes(dest);
        Ok(())
    }
}

// --- Not Found / Already Exists ---

#[test]
fn test_missing_items() {
    let collection = Collection::<Account>::new(ResourceConfig::default());

    let err = collection
        .update("nobody", account("x", 1), &WriteOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert!(err.to_string().contains("nobody"));

    let err = collection
        .delete("nobody", &WriteOptions::default())
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);

    let err = collection
        .update_with("nobody", |_, _| Ok(()))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotFound);
}

#[test]
fn test_duplicate_add() {
    let collection = Collection::new(ResourceConfig::default());
    collection.add("alice", account("alice", 10)).unwrap();

    let err = collection.add("alice", account("alice", 20)).unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists(ref id) if id == "alice"));
    assert_eq!(
        collection
            .get("alice", &ReadOptions::default())
            .unwrap()
            .map(|a| a.balance),
        Some(10)
    );
}

#[test]
fn test_with_items_rejects_duplicates() {
    let items = vec![
        ("a".to_string(), account("a", 1)),
        ("a".to_string(), account("a", 2)),
    ];
    let err = Collection::with_items(items, ResourceConfig::default())
        .err()
        .unwrap();
    assert_eq!(err.kind(), ErrorKind::AlreadyExists);
}

// --- Invalid Argument ---

#[test]
fn test_unknown_mask_paths() {
    let value = Value::new(account("alice", 0), ResourceConfig::default());

    let opts = WriteOptions::default().with_update_mask(FieldMask::new(["balance.cents"]));
    let err = value.set(account("alice", 1), &opts).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);

    let opts = ReadOptions::default().with_read_mask(FieldMask::new(["nickname"]));
    assert_eq!(value.get(&opts).unwrap_err().kind(), ErrorKind::InvalidArgument);
    assert_eq!(
        value
            .pull(Context::background(), &opts)
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
}

#[test]
fn test_nested_mask_within_writable_parent() {
    let config = ResourceConfig::default().with_writable_fields(FieldMask::new(["limits"]));
    let value = Value::new(account("alice", 0), config);

    let body = Account {
        owner: "mallory".to_string(),
        balance: 1_000,
        limits: Limits {
            daily: 5,
            monthly: 50,
        },
    };
    let opts = WriteOptions::default().with_update_mask(FieldMask::new(["limits.daily"]));
    let got = value.set(body.clone(), &opts).unwrap();
    assert_eq!(got.owner, "alice");
    assert_eq!(got.balance, 0);
    assert_eq!(got.limits, Limits { daily: 5, monthly: 0 });

    let opts = WriteOptions::default().with_update_mask(FieldMask::new(["balance"]));
    let err = value.set(body, &opts).unwrap_err();
    assert!(matches!(err, StoreError::InvalidMask(_)));
}

#[test]
fn test_empty_id_for_update_and_delete() {
    let collection = Collection::<Account>::new(ResourceConfig::default());
    assert_eq!(
        collection
            .update("", account("x", 0), &WriteOptions::default())
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
    assert_eq!(
        collection
            .delete("", &WriteOptions::default())
            .unwrap_err()
            .kind(),
        ErrorKind::InvalidArgument
    );
}

// --- Preconditions ---

#[test]
fn test_expected_value_on_collection() {
    let collection = Collection::new(ResourceConfig::default());
    collection.add("alice", account("alice", 10)).unwrap();

    let opts = WriteOptions::default().with_expected_value(account("alice", 99));
    let err = collection
        .update("alice", account("alice", 11), &opts)
        .unwrap_err();
    assert!(matches!(err, StoreError::ExpectedValueMismatch));
    assert_eq!(err.kind(), ErrorKind::FailedPrecondition);

    let opts = WriteOptions::default().with_expected_value(account("alice", 10));
    assert_eq!(
        collection
            .update("alice", account("alice", 11), &opts)
            .unwrap()
            .balance,
        11
    );
}

#[test]
fn test_mutator_error_leaves_state_untouched() {
    let value = Value::new(account("alice", 10), ResourceConfig::default());
    let err = value
        .update_with(
            |old, _| Err(StoreError::InvalidArgument(format!("overdraft by {}", old.owner))),
            &WriteOptions::default(),
        )
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    assert_eq!(value.get(&ReadOptions::default()).unwrap().balance, 10);
}

#[test]
fn test_delete_allow_missing() {
    let collection = Collection::<Account>::new(ResourceConfig::default());
    let removed = collection
        .delete("ghost", &WriteOptions::default().allow_missing())
        .unwrap();
    assert!(removed.is_none());
}

// --- Id Generation ---

#[test]
fn test_id_exhaustion() {
    let collection = Collection::new(ResourceConfig::default().with_rng(StuckRng));
    let (first, _) = collection.add("", account("a", 0)).unwrap();
    assert_eq!(first.len(), 22);

    let err = collection.add("", account("b", 0)).unwrap_err();
    assert!(matches!(err, StoreError::IdExhausted { attempts } if attempts == MAX_ID_ATTEMPTS));
    assert_eq!(err.kind(), ErrorKind::Aborted);
    assert_eq!(collection.len(), 1);
}

#[test]
fn test_generate_unique_id_with_external_set() {
    let mut rng = StuckRng;
    let taken = generate_unique_id(&mut rng, |_| false).unwrap();
    let err = generate_unique_id(&mut rng, |id| id == taken).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Aborted);
}
