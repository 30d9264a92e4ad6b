//! In-memory mirror of the durable write log.
//!
//! The queue and the dispatcher read and mutate the mirror synchronously.
//! Every mutation is also sent, in order, to a single persistence task that
//! applies it to the [`WriteLog`], so the durable order always equals the
//! mirror order. Durable failures are logged; the mirror keeps working.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use courier_interchange::Request;
use courier_storage::{PersistedEntry, WriteLog};
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};

#[derive(Debug)]
enum PersistOp {
    Append(PersistedEntry),
    Remove(u64),
    Replace(u64, Request),
    Clear,
    Flush(oneshot::Sender<()>),
}

#[derive(Debug, Default)]
struct Mirror {
    entries: Vec<PersistedEntry>,
    /// `seq` of the entry currently going through the chain.
    in_flight: Option<u64>,
}

/// The ordered list of not-yet-confirmed writes.
#[derive(Debug)]
pub struct PersistedRequests {
    mirror: Mutex<Mirror>,
    next_seq: AtomicU64,
    len: watch::Sender<usize>,
    ops: mpsc::UnboundedSender<PersistOp>,
}

impl PersistedRequests {
    /// Load the entries of `log` and start the persistence task.
    ///
    /// An unreadable log is cleared and the mirror starts empty.
    pub async fn load(log: Arc<dyn WriteLog>) -> Arc<Self> {
        let entries = match log.all().await {
            Ok(entries) => entries,
            Err(e) => {
                tracing::error!(error = %e, "could not load persisted writes, starting empty");
                if let Err(e) = log.clear().await {
                    tracing::error!(error = %e, "could not clear unreadable write log");
                }
                Vec::new()
            }
        };
        if !entries.is_empty() {
            tracing::info!(count = entries.len(), "restored persisted writes");
        }

        let next_seq = entries.iter().map(|e| e.seq).max().map_or(1, |max| max + 1);
        let (ops, rx) = mpsc::unbounded_channel();
        tokio::spawn(persist(log, rx));

        Arc::new(PersistedRequests {
            len: watch::Sender::new(entries.len()),
            mirror: Mutex::new(Mirror {
                entries,
                in_flight: None,
            }),
            next_seq: AtomicU64::new(next_seq),
            ops,
        })
    }

    /// Append a request at the tail. Returns its sequence number.
    pub fn push(&self, request: Request) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let entry = PersistedEntry::new(seq, request);
        let mut mirror = self.mirror.lock();
        mirror.entries.push(entry.clone());
        self.send(PersistOp::Append(entry));
        self.len.send_replace(mirror.entries.len());
        seq
    }

    pub fn entries(&self) -> Vec<PersistedEntry> {
        self.mirror.lock().entries.clone()
    }

    pub fn len(&self) -> usize {
        self.mirror.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Mark the first entry `skip` does not reject as in flight and return it.
    pub fn claim_next<F>(&self, skip: F) -> Option<PersistedEntry>
    where
        F: Fn(&PersistedEntry) -> bool,
    {
        let mut mirror = self.mirror.lock();
        let entry = mirror.entries.iter().find(|e| !skip(e)).cloned()?;
        mirror.in_flight = Some(entry.seq);
        Some(entry)
    }

    /// The entry is no longer in flight but stays in the log.
    pub fn release(&self, seq: u64) {
        let mut mirror = self.mirror.lock();
        if mirror.in_flight == Some(seq) {
            mirror.in_flight = None;
        }
    }

    /// Current contents of entry `seq`.
    pub fn get(&self, seq: u64) -> Option<PersistedEntry> {
        self.mirror
            .lock()
            .entries
            .iter()
            .find(|e| e.seq == seq)
            .cloned()
    }

    /// Remove entry `seq` once its terminal outcome was applied.
    pub fn remove(&self, seq: u64) -> Option<PersistedEntry> {
        let mut mirror = self.mirror.lock();
        let index = mirror.entries.iter().position(|e| e.seq == seq)?;
        let entry = mirror.entries.remove(index);
        if mirror.in_flight == Some(seq) {
            mirror.in_flight = None;
        }
        self.send(PersistOp::Remove(seq));
        self.len.send_replace(mirror.entries.len());
        Some(entry)
    }

    /// Rewrite `old` into `new` in every entry that is not in flight,
    /// keeping positions. Returns how many entries changed.
    pub fn rewrite_id(&self, old: &str, new: &str) -> usize {
        let mut mirror = self.mirror.lock();
        let in_flight = mirror.in_flight;
        let mut changed = 0;
        for entry in mirror.entries.iter_mut() {
            if Some(entry.seq) == in_flight {
                continue;
            }
            if entry.request.replace_id(old, new) {
                changed += 1;
                self.send(PersistOp::Replace(entry.seq, entry.request.clone()));
            }
        }
        changed
    }

    /// Drop every entry.
    pub fn clear(&self) {
        let mut mirror = self.mirror.lock();
        mirror.entries.clear();
        mirror.in_flight = None;
        self.send(PersistOp::Clear);
        self.len.send_replace(0);
    }

    /// Receiver of the entry count.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.len.subscribe()
    }

    /// Wait until every entry has been removed.
    pub async fn wait_until_empty(&self) {
        let mut rx = self.subscribe();
        let _ = rx.wait_for(|len| *len == 0).await;
    }

    /// Wait until every mutation issued so far has reached the durable log.
    pub async fn flush(&self) {
        let (tx, rx) = oneshot::channel();
        self.send(PersistOp::Flush(tx));
        let _ = rx.await;
    }

    fn send(&self, op: PersistOp) {
        if self.ops.send(op).is_err() {
            tracing::error!("write log persistence task is gone, change kept in memory only");
        }
    }
}

async fn persist(log: Arc<dyn WriteLog>, mut rx: mpsc::UnboundedReceiver<PersistOp>) {
    while let Some(op) = rx.recv().await {
        let result = match op {
            PersistOp::Append(entry) => log.append(entry).await,
            PersistOp::Remove(seq) => log.remove(seq).await.map(|_| ()),
            PersistOp::Replace(seq, request) => log.replace(seq, request).await,
            PersistOp::Clear => log.clear().await,
            PersistOp::Flush(done) => {
                let _ = done.send(());
                Ok(())
            }
        };
        if let Err(e) = result {
            tracing::error!(error = %e, "write log mutation failed, continuing degraded");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use courier_interchange::{RequestType, StoreData};
    use courier_storage::MemoryWriteLog;
    use serde_json::{json, Map};

    fn request(command: &str, report_id: &str) -> Request {
        let mut params = Map::new();
        params.insert("reportID".to_string(), json!(report_id));
        Request::new(command, params, RequestType::Write, StoreData::new())
            .unwrap()
            .0
    }

    #[tokio::test]
    async fn mutations_reach_the_durable_log_in_order() {
        let log = Arc::new(MemoryWriteLog::new());
        let persisted = PersistedRequests::load(log.clone()).await;

        let a = persisted.push(request("A", "1"));
        persisted.push(request("B", "1"));
        persisted.push(request("C", "1"));
        persisted.remove(a);
        persisted.flush().await;

        let durable: Vec<String> = log
            .all()
            .await
            .unwrap()
            .into_iter()
            .map(|e| e.request.command)
            .collect();
        assert_eq!(durable, vec!["B", "C"]);
    }

    #[tokio::test]
    async fn sequence_continues_after_reload() {
        let log = Arc::new(MemoryWriteLog::new());
        {
            let persisted = PersistedRequests::load(log.clone()).await;
            persisted.push(request("A", "1"));
            persisted.push(request("B", "1"));
            persisted.flush().await;
        }
        let reloaded = PersistedRequests::load(log.clone()).await;
        assert_eq!(reloaded.len(), 2);
        assert_eq!(reloaded.push(request("C", "1")), 3);
    }

    #[tokio::test]
    async fn rewrite_skips_in_flight_entry() {
        let log = Arc::new(MemoryWriteLog::new());
        let persisted = PersistedRequests::load(log.clone()).await;
        let first = persisted.push(request("CreateReport", "tmp_1"));
        let second = persisted.push(request("AddComment", "tmp_1"));

        let claimed = persisted.claim_next(|_| false).unwrap();
        assert_eq!(claimed.seq, first);
        assert_eq!(persisted.rewrite_id("tmp_1", "real_42"), 1);
        persisted.flush().await;

        assert_eq!(
            persisted.get(first).unwrap().request.data["reportID"],
            json!("tmp_1")
        );
        let durable = log.all().await.unwrap();
        assert_eq!(durable[1].seq, second);
        assert_eq!(durable[1].request.data["reportID"], json!("real_42"));
    }

    #[tokio::test]
    async fn wait_until_empty_returns_after_last_removal() {
        let persisted = PersistedRequests::load(Arc::new(MemoryWriteLog::new())).await;
        let seq = persisted.push(request("A", "1"));
        let waiter = {
            let persisted = persisted.clone();
            tokio::spawn(async move { persisted.wait_until_empty().await })
        };
        tokio::task::yield_now().await;
        assert!(!waiter.is_finished());

        persisted.remove(seq);
        tokio::time::timeout(std::time::Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
