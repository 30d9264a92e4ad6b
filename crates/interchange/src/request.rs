//! The request envelope.
//!
//! A [`Request`] is the normalized form of one API call: the command name,
//! its parameters (always tagged with the request type), and the store
//! updates to apply once the outcome is known. Optimistic updates are never
//! part of a `Request`; they are applied by the dispatcher before the request
//! exists and are not persisted or replayed.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::EnvelopeError;
use crate::update::StoreUpdate;

/// Parameter that carries the [`RequestType`] tag.
pub const REQUEST_TYPE_PARAM: &str = "apiRequestType";

/// How a request is routed by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RequestType {
    /// Durable: persisted to the write log and drained by the sequential queue.
    Write,
    /// One-shot read, dispatched behind the idle barrier.
    Read,
    /// One-shot request whose response the caller needs directly.
    MakeRequestWithSideEffects,
}

impl RequestType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestType::Write => "write",
            RequestType::Read => "read",
            RequestType::MakeRequestWithSideEffects => "makeRequestWithSideEffects",
        }
    }
}

/// Store updates attached to a call.
///
/// Either `success_data`/`failure_data` or `finally_data` describe the
/// outcome, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreData {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub optimistic_data: Vec<StoreUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_data: Vec<StoreUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_data: Vec<StoreUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finally_data: Vec<StoreUpdate>,
}

impl StoreData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn optimistic(mut self, update: StoreUpdate) -> Self {
        self.optimistic_data.push(update);
        self
    }

    pub fn on_success(mut self, update: StoreUpdate) -> Self {
        self.success_data.push(update);
        self
    }

    pub fn on_failure(mut self, update: StoreUpdate) -> Self {
        self.failure_data.push(update);
        self
    }

    pub fn finally(mut self, update: StoreUpdate) -> Self {
        self.finally_data.push(update);
        self
    }

    /// Validate every instruction and the outcome exclusivity rule.
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if !self.finally_data.is_empty()
            && (!self.success_data.is_empty() || !self.failure_data.is_empty())
        {
            return Err(EnvelopeError::AmbiguousOutcomeData);
        }
        self.optimistic_data
            .iter()
            .chain(&self.success_data)
            .chain(&self.failure_data)
            .chain(&self.finally_data)
            .try_for_each(StoreUpdate::validate)
    }
}

/// A normalized API request.
///
/// This is also the durable projection stored in the write log, which is
/// why it is `Serialize`/`Deserialize` and carries no optimistic data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub command: String,
    #[serde(default)]
    pub data: Map<String, Value>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub success_data: Vec<StoreUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failure_data: Vec<StoreUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub finally_data: Vec<StoreUpdate>,
    /// Temporary identifiers this request introduces.
    #[serde(
        default,
        rename = "optimisticIDs",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub optimistic_ids: Vec<String>,
}

impl Request {
    /// Build a request from caller input.
    ///
    /// Returns the request together with the optimistic updates that were
    /// split off `store_data`; the caller is responsible for applying them.
    pub fn new(
        command: impl Into<String>,
        params: Map<String, Value>,
        request_type: RequestType,
        store_data: StoreData,
    ) -> Result<(Self, Vec<StoreUpdate>), EnvelopeError> {
        let command = command.into();
        if command.is_empty() {
            return Err(EnvelopeError::EmptyCommand);
        }
        if params.contains_key(REQUEST_TYPE_PARAM) {
            return Err(EnvelopeError::ReservedParameter(
                REQUEST_TYPE_PARAM.to_string(),
            ));
        }
        store_data.validate()?;

        let mut data = params;
        data.insert(
            REQUEST_TYPE_PARAM.to_string(),
            Value::String(request_type.as_str().to_string()),
        );

        let StoreData {
            optimistic_data,
            success_data,
            failure_data,
            finally_data,
        } = store_data;

        Ok((
            Request {
                command,
                data,
                success_data,
                failure_data,
                finally_data,
                optimistic_ids: Vec::new(),
            },
            optimistic_data,
        ))
    }

    /// Declare temporary identifiers introduced by this request.
    pub fn with_optimistic_ids<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.optimistic_ids.extend(ids.into_iter().map(Into::into));
        self
    }

    /// The request type tag stored in `data.apiRequestType`.
    pub fn request_type(&self) -> Option<RequestType> {
        match self.data.get(REQUEST_TYPE_PARAM)?.as_str()? {
            "write" => Some(RequestType::Write),
            "read" => Some(RequestType::Read),
            "makeRequestWithSideEffects" => Some(RequestType::MakeRequestWithSideEffects),
            _ => None,
        }
    }

    /// Updates to apply for an outcome: `finally_data` when present,
    /// otherwise `success_data` or `failure_data`.
    pub fn outcome_updates(&self, success: bool) -> &[StoreUpdate] {
        if !self.finally_data.is_empty() {
            &self.finally_data
        } else if success {
            &self.success_data
        } else {
            &self.failure_data
        }
    }

    /// Whether any parameter value (at any depth) equals `id`.
    pub fn references(&self, id: &str) -> bool {
        self.data.values().any(|v| value_references(v, id))
    }

    /// Rewrite every parameter value equal to `old` into `new`, including
    /// the declared optimistic IDs. Returns whether anything changed.
    pub fn replace_id(&mut self, old: &str, new: &str) -> bool {
        let mut changed = false;
        for value in self.data.values_mut() {
            changed |= replace_in_value(value, old, new);
        }
        for id in self.optimistic_ids.iter_mut().filter(|id| *id == old) {
            *id = new.to_string();
            changed = true;
        }
        changed
    }
}

fn value_references(value: &Value, id: &str) -> bool {
    match value {
        Value::String(s) => s == id,
        Value::Array(items) => items.iter().any(|v| value_references(v, id)),
        Value::Object(map) => map.values().any(|v| value_references(v, id)),
        _ => false,
    }
}

fn replace_in_value(value: &mut Value, old: &str, new: &str) -> bool {
    match value {
        Value::String(s) if s == old => {
            *s = new.to_string();
            true
        }
        Value::Array(items) => items
            .iter_mut()
            .fold(false, |acc, v| replace_in_value(v, old, new) | acc),
        Value::Object(map) => map
            .values_mut()
            .fold(false, |acc, v| replace_in_value(v, old, new) | acc),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn new_tags_request_type_and_splits_optimistic() {
        let data = StoreData::new()
            .optimistic(StoreUpdate::set("balance", json!(100)).unwrap())
            .on_success(StoreUpdate::merge("balance_meta", json!({"pending": false})).unwrap());
        let (request, optimistic) =
            Request::new("SetBalance", params(json!({"amount": 100})), RequestType::Write, data)
                .unwrap();

        assert_eq!(request.data["apiRequestType"], json!("write"));
        assert_eq!(request.request_type(), Some(RequestType::Write));
        assert_eq!(optimistic.len(), 1);
        assert_eq!(request.success_data.len(), 1);

        let wire = serde_json::to_value(&request).unwrap();
        assert!(wire.get("optimisticData").is_none());
        assert!(wire.get("failureData").is_none());
    }

    #[test]
    fn finally_with_success_is_rejected() {
        let data = StoreData::new()
            .on_success(StoreUpdate::set("a", json!(1)).unwrap())
            .finally(StoreUpdate::set("b", json!(2)).unwrap());
        let err = Request::new("Cmd", Map::new(), RequestType::Read, data).unwrap_err();
        assert_eq!(err, EnvelopeError::AmbiguousOutcomeData);
    }

    #[test]
    fn reserved_param_rejected() {
        let err = Request::new(
            "Cmd",
            params(json!({"apiRequestType": "read"})),
            RequestType::Write,
            StoreData::new(),
        )
        .unwrap_err();
        assert_eq!(
            err,
            EnvelopeError::ReservedParameter("apiRequestType".to_string())
        );
    }

    #[test]
    fn empty_command_rejected() {
        let err = Request::new("", Map::new(), RequestType::Read, StoreData::new()).unwrap_err();
        assert_eq!(err, EnvelopeError::EmptyCommand);
    }

    #[test]
    fn outcome_updates_prefers_finally() {
        let (request, _) = Request::new(
            "Cmd",
            Map::new(),
            RequestType::Write,
            StoreData::new().finally(StoreUpdate::set("loading", json!(false)).unwrap()),
        )
        .unwrap();
        assert_eq!(request.outcome_updates(true), request.outcome_updates(false));
        assert_eq!(request.outcome_updates(true).len(), 1);
    }

    #[test]
    fn references_and_replaces_nested_ids() {
        let (request, _) = Request::new(
            "AddComment",
            params(json!({"reportID": "tmp_1", "mentions": [{"reportID": "tmp_1"}], "other": "x"})),
            RequestType::Write,
            StoreData::new(),
        )
        .unwrap();
        let mut request = request.with_optimistic_ids(["tmp_1"]);

        assert!(request.references("tmp_1"));
        assert!(!request.references("tmp_2"));

        assert!(request.replace_id("tmp_1", "real_42"));
        assert_eq!(request.data["reportID"], json!("real_42"));
        assert_eq!(request.data["mentions"][0]["reportID"], json!("real_42"));
        assert_eq!(request.optimistic_ids, vec!["real_42".to_string()]);
        assert!(!request.replace_id("tmp_1", "real_42"));
    }

    #[test]
    fn optimistic_ids_round_trip_under_wire_name() {
        let (request, _) =
            Request::new("Cmd", Map::new(), RequestType::Write, StoreData::new()).unwrap();
        let request = request.with_optimistic_ids(["tmp_9"]);
        let wire = serde_json::to_value(&request).unwrap();
        assert_eq!(wire["optimisticIDs"], json!(["tmp_9"]));
        let back: Request = serde_json::from_value(wire).unwrap();
        assert_eq!(back, request);
    }
}
