use courier_interchange::Request;
use serde::{Deserialize, Serialize};

/// One not-yet-confirmed write, as stored in the log.
///
/// `seq` is the stable insertion order: entries are processed in ascending
/// `seq` and it never changes, even when the request is rewritten in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersistedEntry {
    pub seq: u64,
    /// RFC 3339 timestamp of when the write was queued.
    pub queued_at: String,
    pub request: Request,
}

impl PersistedEntry {
    /// Stamp a request with `seq` and the current time.
    pub fn new(seq: u64, request: Request) -> Self {
        let queued_at = time::OffsetDateTime::now_utc()
            .format(&time::format_description::well_known::Rfc3339)
            .unwrap_or_else(|_| "unknown".to_string());
        PersistedEntry {
            seq,
            queued_at,
            request,
        }
    }
}
