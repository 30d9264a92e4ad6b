//! The reactive key-value store the dispatcher writes into.
//!
//! The dispatcher never reads application state; it only forwards
//! [`StoreUpdate`] instructions and keeps one bookkeeping key of its own
//! (the last applied server update ID).

use std::collections::BTreeMap;

use courier_interchange::StoreUpdate;
use parking_lot::RwLock;
use serde_json::{Map, Value};

/// Sink for store-update instructions.
///
/// `update` must apply the batch in order. Implementations are called from
/// whatever task completes a request, so they must not block for long.
pub trait ReactiveStore: Send + Sync + 'static {
    /// Apply a batch of instructions, in order.
    fn update(&self, updates: &[StoreUpdate]);

    /// Current value at `key`.
    fn get(&self, key: &str) -> Option<Value>;

    /// Merge `value` into `key`. Invalid keys are ignored.
    fn merge(&self, key: &str, value: Value) {
        match StoreUpdate::merge(key, value) {
            Ok(update) => self.update(&[update]),
            Err(e) => tracing::warn!(key, error = %e, "ignoring invalid merge"),
        }
    }
}

/// An in-process `ReactiveStore` backed by a map.
///
/// Merges are deep for objects; a `null` member deletes the key it names.
/// Every applied batch is kept so tests can assert on ordering.
#[derive(Debug, Default)]
pub struct MemoryStore {
    values: RwLock<BTreeMap<String, Value>>,
    applied: RwLock<Vec<StoreUpdate>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every instruction applied so far, in application order.
    pub fn applied(&self) -> Vec<StoreUpdate> {
        self.applied.read().clone()
    }

    /// Snapshot of all keys and values.
    pub fn snapshot(&self) -> BTreeMap<String, Value> {
        self.values.read().clone()
    }

    fn apply_one(values: &mut BTreeMap<String, Value>, update: &StoreUpdate) {
        match update {
            StoreUpdate::Set { key, value } => {
                if value.is_null() {
                    values.remove(key);
                } else {
                    values.insert(key.clone(), value.clone());
                }
            }
            StoreUpdate::Merge { key, value } => merge_key(values, key, value),
            StoreUpdate::MergeCollection { value, .. } => {
                if let Value::Object(members) = value {
                    for (member, member_value) in members {
                        merge_key(values, member, member_value);
                    }
                }
            }
            StoreUpdate::Delete { key } => {
                values.remove(key);
            }
        }
    }
}

impl ReactiveStore for MemoryStore {
    fn update(&self, updates: &[StoreUpdate]) {
        if updates.is_empty() {
            return;
        }
        let mut values = self.values.write();
        for update in updates {
            Self::apply_one(&mut values, update);
        }
        self.applied.write().extend_from_slice(updates);
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.read().get(key).cloned()
    }
}

fn merge_key(values: &mut BTreeMap<String, Value>, key: &str, patch: &Value) {
    if patch.is_null() {
        values.remove(key);
        return;
    }
    match values.get_mut(key) {
        Some(existing) => merge_value(existing, patch),
        None => {
            let mut fresh = Value::Null;
            merge_value(&mut fresh, patch);
            values.insert(key.to_string(), fresh);
        }
    }
}

/// Deep-merge `patch` into `target`. Non-object patches replace.
fn merge_value(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(Map::new());
    }
    if let Value::Object(target_map) = target {
        for (k, v) in patch_map {
            if v.is_null() {
                target_map.remove(k);
            } else {
                merge_value(target_map.entry(k.clone()).or_insert(Value::Null), v);
            }
        }
    }
}
