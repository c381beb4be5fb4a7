use std::collections::HashMap;

use crate::quorum::QuorumSize;
use crate::runtime::Pid;
use crate::utilities::time::QuorateTime;

/// "our vote reached this peer" bit.
pub(crate) const VOTE_SENT: u8 = 0b01;
/// "this peer's vote reached us" bit.
pub(crate) const VOTE_RECEIVED: u8 = 0b10;
pub(crate) const VOTE_BOTH: u8 = VOTE_SENT | VOTE_RECEIVED;

/// Upper bound on concurrently open vote entries, enforced by the engine.
pub(crate) const MAX_OPEN_VOTES: usize = 5;

/// An in-progress vote for one target quorum size.
#[derive(Debug)]
pub(crate) struct VoteEntry {
    pub(crate) state: QuorumSize,
    /// Candidate roster the vote covers; position 0 is the origin's self.
    pub(crate) peers: Vec<Pid>,
    /// Initiator of this vote; `None` until the origin's own vote arrives.
    pub(crate) origin: Option<Pid>,
    /// Per-peer sent/received flags. The owning process never appears here.
    pub(crate) votes: HashMap<Pid, u8>,
    /// Millisecond stamp of the most recent activity.
    pub(crate) last_vote: i64,
}

impl VoteEntry {
    pub(crate) fn new(state: QuorumSize, peers: Vec<Pid>, origin: Option<Pid>) -> VoteEntry {
        VoteEntry {
            state,
            peers,
            origin,
            votes: HashMap::new(),
            last_vote: QuorateTime::now_millis(),
        }
    }

    pub(crate) fn flags(&self, peer: Pid) -> u8 {
        self.votes.get(&peer).copied().unwrap_or(0)
    }

    pub(crate) fn mark_sent(&mut self, peer: Pid) {
        *self.votes.entry(peer).or_insert(0) |= VOTE_SENT;
    }

    pub(crate) fn mark_received(&mut self, peer: Pid) {
        *self.votes.entry(peer).or_insert(0) |= VOTE_RECEIVED;
    }

    pub(crate) fn touch(&mut self) {
        self.last_vote = QuorateTime::now_millis();
    }
}

/// In-flight vote entries keyed by their target size.
#[derive(Debug, Default)]
pub(crate) struct VoteLedger {
    entries: HashMap<QuorumSize, VoteEntry>,
}

impl VoteLedger {
    pub(crate) fn new() -> VoteLedger {
        VoteLedger {
            entries: HashMap::new(),
        }
    }

    pub(crate) fn get(&self, state: QuorumSize) -> Option<&VoteEntry> {
        self.entries.get(&state)
    }

    pub(crate) fn get_mut(&mut self, state: QuorumSize) -> Option<&mut VoteEntry> {
        self.entries.get_mut(&state)
    }

    pub(crate) fn put(&mut self, entry: VoteEntry) {
        self.entries.insert(entry.state, entry);
    }

    pub(crate) fn delete(&mut self, state: QuorumSize) -> Option<VoteEntry> {
        self.entries.remove(&state)
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
