//! Store-update instructions.
//!
//! A [`StoreUpdate`] is opaque to the queue: it is built by callers (or sent
//! by the server inside `onyxData`) and forwarded verbatim to the reactive
//! store. The only thing this crate guarantees is that an instruction is
//! well-formed.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EnvelopeError;

/// One instruction for the reactive store.
///
/// Serialized with an `onyxMethod` tag, e.g.
/// `{"onyxMethod": "merge", "key": "report_1", "value": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "onyxMethod", rename_all = "lowercase")]
pub enum StoreUpdate {
    /// Replace the value stored at `key`.
    Set { key: String, value: Value },
    /// Merge `value` into the value stored at `key`.
    Merge { key: String, value: Value },
    /// Merge several members of a collection at once. Every member key of
    /// `value` must start with the collection `key`.
    #[serde(rename = "mergecollection")]
    MergeCollection { key: String, value: Value },
    /// Remove `key` from the store.
    Delete { key: String },
}

impl StoreUpdate {
    pub fn set(key: impl Into<String>, value: Value) -> Result<Self, EnvelopeError> {
        let update = StoreUpdate::Set {
            key: key.into(),
            value,
        };
        update.validate()?;
        Ok(update)
    }

    pub fn merge(key: impl Into<String>, value: Value) -> Result<Self, EnvelopeError> {
        let update = StoreUpdate::Merge {
            key: key.into(),
            value,
        };
        update.validate()?;
        Ok(update)
    }

    pub fn merge_collection(key: impl Into<String>, value: Value) -> Result<Self, EnvelopeError> {
        let update = StoreUpdate::MergeCollection {
            key: key.into(),
            value,
        };
        update.validate()?;
        Ok(update)
    }

    pub fn delete(key: impl Into<String>) -> Result<Self, EnvelopeError> {
        let update = StoreUpdate::Delete { key: key.into() };
        update.validate()?;
        Ok(update)
    }

    /// The store key this instruction targets.
    pub fn key(&self) -> &str {
        match self {
            StoreUpdate::Set { key, .. }
            | StoreUpdate::Merge { key, .. }
            | StoreUpdate::MergeCollection { key, .. }
            | StoreUpdate::Delete { key } => key,
        }
    }

    /// Check that the instruction is well-formed.
    ///
    /// Deserialized instructions (for example server-provided `onyxData`)
    /// have not been through a constructor, so consumers call this before
    /// forwarding them.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.key().is_empty() {
            return Err(EnvelopeError::EmptyKey);
        }
        if let StoreUpdate::MergeCollection { key, value } = self {
            let members = value
                .as_object()
                .ok_or_else(|| EnvelopeError::CollectionNotObject {
                    collection: key.clone(),
                })?;
            if let Some(member) = members.keys().find(|m| !m.starts_with(key.as_str())) {
                return Err(EnvelopeError::ForeignCollectionMember {
                    collection: key.clone(),
                    member: member.clone(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn wire_shape_uses_onyx_method_tag() {
        let update = StoreUpdate::merge("report_1", json!({"total": 10})).unwrap();
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"onyxMethod": "merge", "key": "report_1", "value": {"total": 10}})
        );

        let parsed: StoreUpdate = serde_json::from_value(json!({
            "onyxMethod": "mergecollection",
            "key": "report_",
            "value": {"report_1": {"a": 1}}
        }))
        .unwrap();
        assert!(matches!(parsed, StoreUpdate::MergeCollection { .. }));
    }

    #[test]
    fn delete_has_no_value() {
        let update = StoreUpdate::delete("session").unwrap();
        assert_eq!(
            serde_json::to_value(&update).unwrap(),
            json!({"onyxMethod": "delete", "key": "session"})
        );
    }

    #[test]
    fn empty_key_rejected() {
        assert_eq!(
            StoreUpdate::set("", json!(1)).unwrap_err(),
            EnvelopeError::EmptyKey
        );
    }

    #[test]
    fn collection_members_must_share_prefix() {
        let err = StoreUpdate::merge_collection(
            "report_",
            json!({"report_1": {}, "transaction_9": {}}),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::ForeignCollectionMember {
                collection: "report_".to_string(),
                member: "transaction_9".to_string(),
            }
        );
    }

    #[test]
    fn collection_value_must_be_object() {
        let err = StoreUpdate::merge_collection("report_", json!([1, 2])).unwrap_err();
        assert!(matches!(err, EnvelopeError::CollectionNotObject { .. }));
    }

    #[test]
    fn deserialized_update_can_be_invalid_until_validated() {
        let parsed: StoreUpdate =
            serde_json::from_value(json!({"onyxMethod": "set", "key": "", "value": null}))
                .unwrap();
        assert!(parsed.validate().is_err());
    }
}
