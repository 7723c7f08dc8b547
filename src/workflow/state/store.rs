// SPDX-License-Identifier: MIT

//! Run-scoped value store

use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::RwLock;

use crate::workflow::params::ValueId;

/// Key-value store of every input/output/env/asset value in a run.
///
/// `set` and `get` are individually atomic. Within a run each id is written
/// once by the orchestrator loop and read many times by the resolver.
pub trait ValueStore: Send + Sync {
    fn get(&self, id: &ValueId) -> Option<Value>;

    fn set(&self, id: ValueId, value: Value);

    fn contains(&self, id: &ValueId) -> bool {
        self.get(id).is_some()
    }

    /// Every value keyed by its formatted id
    fn snapshot(&self) -> BTreeMap<String, Value>;
}

/// In-process store backed by a `HashMap`
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<HashMap<ValueId, Value>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.values.read().map(|v| v.len()).unwrap_or_else(|e| e.into_inner().len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ValueStore for MemoryStore {
    fn get(&self, id: &ValueId) -> Option<Value> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.get(id).cloned()
    }

    fn set(&self, id: ValueId, value: Value) {
        let mut values = self.values.write().unwrap_or_else(|e| e.into_inner());
        if let Some(previous) = values.get(&id) {
            if previous != &value {
                log::warn!("Value {} overwritten with a different value", id);
            }
        }
        values.insert(id, value);
    }

    fn contains(&self, id: &ValueId) -> bool {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values.contains_key(id)
    }

    fn snapshot(&self) -> BTreeMap<String, Value> {
        let values = self.values.read().unwrap_or_else(|e| e.into_inner());
        values
            .iter()
            .map(|(id, v)| (id.to_string(), v.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::Arc;

    #[test]
    fn test_set_get() {
        let store = MemoryStore::new();
        let id = ValueId::output("a.run", "total");
        assert!(store.get(&id).is_none());
        assert!(!store.contains(&id));

        store.set(id.clone(), json!(3));
        assert_eq!(store.get(&id), Some(json!(3)));
        assert!(store.contains(&id));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_null_counts_as_present() {
        let store = MemoryStore::new();
        let id = ValueId::output("a.run", "maybe");
        store.set(id.clone(), Value::Null);
        assert!(store.contains(&id));
    }

    #[test]
    fn test_snapshot_uses_formatted_ids() {
        let store = MemoryStore::new();
        store.set(ValueId::input("a.run", "q"), json!("hi"));
        store.set(ValueId::output("a.run", "r"), json!(1));

        let snapshot = store.snapshot();
        assert_eq!(snapshot.get("I.a.run.q"), Some(&json!("hi")));
        assert_eq!(snapshot.get("O.a.run.r"), Some(&json!(1)));
    }

    #[test]
    fn test_shared_across_threads() {
        let store: Arc<dyn ValueStore> = Arc::new(MemoryStore::new());
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let store = store.clone();
                std::thread::spawn(move || {
                    store.set(ValueId::output("n.s", &format!("k{}", i)), json!(i));
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(store.snapshot().len(), 4);
    }
}
