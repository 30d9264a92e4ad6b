//! Server response shape.

use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::request::Request;
use crate::update::StoreUpdate;

/// Well-known `jsonCode` values.
pub mod json_code {
    /// The request succeeded.
    pub const SUCCESS: i64 = 200;
    /// The auth token expired; the client must reauthenticate.
    pub const NOT_AUTHENTICATED: i64 = 407;
}

/// A structured server response.
///
/// `json_code == 200` is success, anything else is a failure and `407`
/// means the auth token has to be refreshed. Fields the dispatcher does not
/// interpret are kept in `payload` so a response re-serializes unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub json_code: i64,
    /// Server-produced store updates. Entries that do not decode as a
    /// [`StoreUpdate`] are logged and dropped; the rest of the response
    /// still stands.
    #[serde(
        default,
        deserialize_with = "decode_updates",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub onyx_data: Vec<StoreUpdate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
    pub error_type: Option<String>,
    #[serde(
        default,
        rename = "previousUpdateID",
        skip_serializing_if = "Option::is_none"
    )]
    pub previous_update_id: Option<u64>,
    #[serde(
        default,
        rename = "lastUpdateID",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_update_id: Option<u64>,
    /// Set when the server already had an entity for the optimistic
    /// `reportID` the client sent, and ignored the client's ID.
    #[serde(
        default,
        rename = "preexistingReportID",
        skip_serializing_if = "Option::is_none"
    )]
    pub preexisting_report_id: Option<String>,
    /// Temporary ID → authoritative ID for IDs the server did not honor.
    #[serde(
        default,
        rename = "optimisticIDs",
        skip_serializing_if = "BTreeMap::is_empty"
    )]
    pub optimistic_ids: BTreeMap<String, String>,
    #[serde(flatten)]
    pub payload: Map<String, Value>,
}

impl Response {
    /// A bare response with the given code.
    pub fn with_code(json_code: i64) -> Self {
        Response {
            json_code,
            ..Default::default()
        }
    }

    pub fn success() -> Self {
        Self::with_code(json_code::SUCCESS)
    }

    pub fn is_success(&self) -> bool {
        self.json_code == json_code::SUCCESS
    }

    pub fn requires_reauthentication(&self) -> bool {
        self.json_code == json_code::NOT_AUTHENTICATED
    }

    /// Look up a command-specific payload field.
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }

    /// Identifier rewrites the server asks for, as `(temporary, authoritative)`.
    ///
    /// `preexistingReportID` pairs with the `reportID` parameter the request
    /// was sent with; the `optimisticIDs` map is taken as-is. Identity
    /// mappings are dropped.
    pub fn resolved_ids(&self, request: &Request) -> Vec<(String, String)> {
        let mut resolved: Vec<(String, String)> = Vec::new();
        if let (Some(real), Some(Value::String(temporary))) = (
            self.preexisting_report_id.as_ref(),
            request.data.get("reportID"),
        ) {
            resolved.push((temporary.clone(), real.clone()));
        }
        for (temporary, real) in &self.optimistic_ids {
            if !resolved.iter().any(|(t, _)| t == temporary) {
                resolved.push((temporary.clone(), real.clone()));
            }
        }
        resolved.retain(|(temporary, real)| temporary != real);
        resolved
    }
}

fn decode_updates<'de, D>(deserializer: D) -> Result<Vec<StoreUpdate>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Option::<Vec<Value>>::deserialize(deserializer)?.unwrap_or_default();
    Ok(raw
        .into_iter()
        .filter_map(|value| {
            let method = value
                .get("onyxMethod")
                .and_then(Value::as_str)
                .unwrap_or("<missing>")
                .to_string();
            match serde_json::from_value::<StoreUpdate>(value) {
                Ok(update) => Some(update),
                Err(e) => {
                    tracing::warn!(onyx_method = %method, error = %e, "skipping undecodable server update");
                    None
                }
            }
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::{RequestType, StoreData};
    use serde_json::json;

    #[test]
    fn parses_wire_shape_and_keeps_unknown_fields() {
        let raw = json!({
            "jsonCode": 200,
            "onyxData": [{"onyxMethod": "merge", "key": "report_1", "value": {"x": 1}}],
            "lastUpdateID": 12,
            "previousUpdateID": 11,
            "reportActions": [1, 2, 3]
        });
        let response: Response = serde_json::from_value(raw.clone()).unwrap();

        assert!(response.is_success());
        assert_eq!(response.onyx_data.len(), 1);
        assert_eq!(response.last_update_id, Some(12));
        assert_eq!(response.get("reportActions"), Some(&json!([1, 2, 3])));
        assert_eq!(serde_json::to_value(&response).unwrap(), raw);
    }

    #[test]
    fn undecodable_updates_are_dropped_not_fatal() {
        let raw = json!({
            "jsonCode": 200,
            "onyxData": [
                {"onyxMethod": "merge", "key": "report_1", "value": {"x": 1}},
                {"onyxMethod": "multiset", "value": {"a": 1}},
                {"onyxMethod": "merge", "key": "report_2"},
                {"onyxMethod": "set", "key": "report_3", "value": 3}
            ]
        });
        let response: Response = serde_json::from_value(raw).unwrap();

        assert!(response.is_success());
        let keys: Vec<&str> = response.onyx_data.iter().map(StoreUpdate::key).collect();
        assert_eq!(keys, vec!["report_1", "report_3"]);
    }

    #[test]
    fn null_onyx_data_is_empty() {
        let response: Response =
            serde_json::from_value(json!({"jsonCode": 200, "onyxData": null})).unwrap();
        assert!(response.onyx_data.is_empty());
    }

    #[test]
    fn reauthentication_code() {
        let response: Response = serde_json::from_value(json!({"jsonCode": 407})).unwrap();
        assert!(response.requires_reauthentication());
        assert!(!response.is_success());
    }

    #[test]
    fn resolved_ids_from_preexisting_report() {
        let (request, _) = Request::new(
            "OpenReport",
            json!({"reportID": "tmp_1"}).as_object().cloned().unwrap(),
            RequestType::Write,
            StoreData::new(),
        )
        .unwrap();
        let response: Response = serde_json::from_value(json!({
            "jsonCode": 200,
            "preexistingReportID": "real_42",
            "optimisticIDs": {"tmp_2": "real_43", "tmp_3": "tmp_3"}
        }))
        .unwrap();

        assert_eq!(
            response.resolved_ids(&request),
            vec![
                ("tmp_1".to_string(), "real_42".to_string()),
                ("tmp_2".to_string(), "real_43".to_string()),
            ]
        );
    }

    #[test]
    fn no_resolved_ids_without_request_report_id() {
        let (request, _) =
            Request::new("Cmd", Map::new(), RequestType::Write, StoreData::new()).unwrap();
        let response = Response {
            preexisting_report_id: Some("real".to_string()),
            ..Response::success()
        };
        assert!(response.resolved_ids(&request).is_empty());
    }
}
