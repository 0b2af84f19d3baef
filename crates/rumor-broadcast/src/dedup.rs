//! Dedup store: the set of values this node has accepted.
//!
//! Values are keyed by their canonical JSON encoding. `serde_json` keeps object
//! keys sorted, so two structurally equal values always produce the same key
//! regardless of the field order they arrived in.

use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use serde_json::Value;

/// Canonical set key for a broadcast value.
#[must_use]
pub fn canonical_key(value: &Value) -> String {
    value.to_string()
}

/// Concurrent set of seen values. Grows monotonically.
#[derive(Debug, Default)]
pub struct DedupStore {
    seen: RwLock<HashMap<String, Value>>,
}

impl DedupStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `value` if absent.
    ///
    /// Returns `true` for exactly one caller per distinct value, no matter how
    /// many callers race on it.
    pub fn test_and_set(&self, value: &Value) -> bool {
        let key = canonical_key(value);
        let mut seen = self.seen.write().unwrap_or_else(PoisonError::into_inner);
        match seen.entry(key) {
            std::collections::hash_map::Entry::Occupied(_) => false,
            std::collections::hash_map::Entry::Vacant(slot) => {
                slot.insert(value.clone());
                true
            }
        }
    }

    /// Whether `value` has been accepted.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(&canonical_key(value))
    }

    /// All accepted values, each exactly once, in no particular order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<Value> {
        self.seen
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of accepted values.
    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether nothing has been accepted yet.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::{rngs::StdRng, SeedableRng};
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_first_insert_is_new() {
        let store = DedupStore::new();
        assert!(store.test_and_set(&json!(5)));
        assert!(!store.test_and_set(&json!(5)));
        assert!(store.contains(&json!(5)));
        assert_eq!(store.snapshot(), vec![json!(5)]);
    }

    #[test]
    fn test_distinct_types_are_distinct_values() {
        let store = DedupStore::new();
        assert!(store.test_and_set(&json!(1)));
        assert!(store.test_and_set(&json!("1")));
        assert!(store.test_and_set(&json!([1])));
        assert_eq!(store.len(), 3);
    }

    #[test]
    fn test_object_key_order_does_not_matter() {
        let store = DedupStore::new();
        let a: Value = serde_json::from_str(r#"{"x":1,"y":2}"#).unwrap();
        let b: Value = serde_json::from_str(r#"{"y":2,"x":1}"#).unwrap();

        assert!(store.test_and_set(&a));
        assert!(!store.test_and_set(&b));
        assert_eq!(canonical_key(&a), canonical_key(&b));
    }

    #[test]
    fn test_concurrent_distinct_values_are_all_kept() {
        const VALUES: u64 = 500;
        const THREADS: usize = 8;

        for seed in 0..10u64 {
            let store = Arc::new(DedupStore::new());
            let mut rng = StdRng::seed_from_u64(seed);

            // Every thread offers every value, in its own shuffled order.
            let workers: Vec<_> = (0..THREADS)
                .map(|_| {
                    let mut order: Vec<u64> = (0..VALUES).collect();
                    order.shuffle(&mut rng);
                    let store = Arc::clone(&store);
                    std::thread::spawn(move || {
                        order
                            .into_iter()
                            .filter(|v| store.test_and_set(&json!(v)))
                            .count()
                    })
                })
                .collect();

            let new_signals: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

            assert_eq!(new_signals as u64, VALUES, "seed={seed}");
            assert_eq!(store.len() as u64, VALUES, "seed={seed}");
            let mut snapshot: Vec<u64> = store
                .snapshot()
                .iter()
                .map(|v| v.as_u64().unwrap())
                .collect();
            snapshot.sort_unstable();
            assert_eq!(snapshot, (0..VALUES).collect::<Vec<_>>(), "seed={seed}");
        }
    }

    mod proptests {
        use super::*;
        use proptest::prelude::*;

        fn arb_value() -> impl Strategy<Value = Value> {
            prop_oneof![
                any::<i64>().prop_map(Value::from),
                "[a-z]{0,8}".prop_map(Value::from),
                any::<bool>().prop_map(Value::from),
                prop::collection::vec(any::<u8>(), 0..4).prop_map(Value::from),
            ]
        }

        proptest! {
            #[test]
            fn test_and_set_is_new_exactly_once(value in arb_value(), repeats in 1usize..20) {
                let store = DedupStore::new();
                let new_count = (0..repeats).filter(|_| store.test_and_set(&value)).count();

                prop_assert_eq!(new_count, 1);
                let snapshot = store.snapshot();
                prop_assert_eq!(snapshot.iter().filter(|v| **v == value).count(), 1);
            }

            #[test]
            fn snapshot_has_no_duplicates(values in prop::collection::vec(arb_value(), 0..50)) {
                let store = DedupStore::new();
                for value in &values {
                    store.test_and_set(value);
                }

                let snapshot = store.snapshot();
                let mut keys: Vec<String> = snapshot.iter().map(canonical_key).collect();
                keys.sort();
                keys.dedup();
                prop_assert_eq!(keys.len(), snapshot.len());
                for value in &values {
                    prop_assert!(snapshot.contains(value));
                }
            }
        }
    }
}
