use std::collections::HashMap;

use crate::runtime::{MonitorRef, Pid};

/// A peer eligible for inclusion in a quorum roster.
#[derive(Debug, Clone)]
pub(crate) struct CandidateRecord {
    /// Monitor acquired when the peer was admitted.
    pub(crate) monitor: MonitorRef,
    /// The peer's self-reported data freshness, unix seconds.
    pub(crate) last_update: i64,
}

/// Reachable same-group peers, keyed by Pid. The owning process itself is
/// never an entry.
#[derive(Debug, Default)]
pub(crate) struct CandidateRegistry {
    records: HashMap<Pid, CandidateRecord>,
}

impl CandidateRegistry {
    pub(crate) fn new() -> CandidateRegistry {
        CandidateRegistry {
            records: HashMap::new(),
        }
    }

    /// Admits a previously unknown peer. Returns false and leaves the stored
    /// record untouched when the peer is already present.
    pub(crate) fn add(&mut self, peer: Pid, monitor: MonitorRef, last_update: i64) -> bool {
        if self.records.contains_key(&peer) {
            return false;
        }
        self.records.insert(
            peer,
            CandidateRecord {
                monitor,
                last_update,
            },
        );
        true
    }

    /// Removes the record when `expected` matches the stored monitor; `None`
    /// acts as a wildcard. Returns the removed record so the caller can
    /// release the monitor.
    pub(crate) fn remove(
        &mut self,
        peer: Pid,
        expected: Option<&MonitorRef>,
    ) -> Option<CandidateRecord> {
        match expected {
            Some(reference) if self.records.get(&peer).map(|r| &r.monitor) != Some(reference) => {
                None
            }
            _ => self.records.remove(&peer),
        }
    }

    pub(crate) fn get(&self, peer: Pid) -> Option<&CandidateRecord> {
        self.records.get(&peer)
    }

    pub(crate) fn contains(&self, peer: Pid) -> bool {
        self.records.contains_key(&peer)
    }

    pub(crate) fn len(&self) -> usize {
        self.records.len()
    }

    /// Candidates ordered freshest first. Ties break on Pid, keeping roster
    /// selection deterministic.
    pub(crate) fn list(&self) -> Vec<Pid> {
        let mut peers: Vec<(Pid, i64)> = self
            .records
            .iter()
            .map(|(pid, record)| (*pid, record.last_update))
            .collect();
        peers.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        peers.into_iter().map(|(pid, _)| pid).collect()
    }
}
