//! Tracking of unresolved temporary identifiers.

use std::collections::BTreeSet;

use courier_interchange::Request;
use parking_lot::Mutex;
use tokio::sync::watch;

/// The set of temporary IDs whose creating request has not completed yet.
///
/// A queued write that references one of these IDs (without introducing it
/// itself) is deferred until the ID is resolved. Each resolution bumps a
/// generation that the queue watches so deferred entries get another turn.
#[derive(Debug)]
pub struct ConflictTracker {
    pending: Mutex<BTreeSet<String>>,
    resolved: watch::Sender<u64>,
}

impl Default for ConflictTracker {
    fn default() -> Self {
        ConflictTracker {
            pending: Mutex::new(BTreeSet::new()),
            resolved: watch::Sender::new(0),
        }
    }
}

impl ConflictTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark `id` as unresolved.
    pub fn reserve(&self, id: impl Into<String>) {
        self.pending.lock().insert(id.into());
    }

    /// Mark `id` as resolved. Returns whether it was pending.
    pub fn resolve(&self, id: &str) -> bool {
        let removed = self.pending.lock().remove(id);
        if removed {
            self.resolved.send_modify(|generation| *generation += 1);
        }
        removed
    }

    /// Resolve several IDs at once, notifying at most once.
    pub fn resolve_all<'a, I>(&self, ids: I)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let removed = {
            let mut pending = self.pending.lock();
            ids.into_iter().fold(false, |acc, id| pending.remove(id) | acc)
        };
        if removed {
            self.resolved.send_modify(|generation| *generation += 1);
        }
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().contains(id)
    }

    pub fn pending(&self) -> Vec<String> {
        self.pending.lock().iter().cloned().collect()
    }

    /// A pending ID that `request` references but does not introduce.
    pub fn first_unresolved(&self, request: &Request) -> Option<String> {
        let pending = self.pending.lock();
        pending
            .iter()
            .filter(|id| !request.optimistic_ids.iter().any(|own| own == *id))
            .find(|id| request.references(id))
            .cloned()
    }

    /// Receiver that changes whenever some ID gets resolved.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.resolved.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_interchange::{RequestType, StoreData};
    use serde_json::{json, Map};

    fn request(report_id: &str) -> Request {
        let mut params = Map::new();
        params.insert("reportID".to_string(), json!(report_id));
        Request::new("AddComment", params, RequestType::Write, StoreData::new())
            .unwrap()
            .0
    }

    #[test]
    fn own_ids_are_not_conflicts() {
        let tracker = ConflictTracker::new();
        tracker.reserve("tmp_1");

        let creator = request("tmp_1").with_optimistic_ids(["tmp_1"]);
        assert_eq!(tracker.first_unresolved(&creator), None);
        assert_eq!(
            tracker.first_unresolved(&request("tmp_1")),
            Some("tmp_1".to_string())
        );
    }

    #[test]
    fn resolve_notifies_subscribers() {
        let tracker = ConflictTracker::new();
        let mut rx = tracker.subscribe();
        tracker.reserve("tmp_1");
        assert!(!tracker.resolve("other"));
        assert!(!rx.has_changed().unwrap());

        assert!(tracker.resolve("tmp_1"));
        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        assert!(!tracker.is_pending("tmp_1"));
    }
}
