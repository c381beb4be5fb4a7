//! Quorum formation over a group of actor processes.
//!
//! Every participating process runs the same state machine and exchanges five
//! asynchronous protocol messages with its group:
//!
//! JOIN:
//!      1. A process contacts a peer with a join request; the peer admits it
//!         as a candidate and replies with the candidates it already knows,
//!         so membership knowledge spreads transitively.
//!
//! VOTE:
//!     1. After a short randomized defer, a process proposes a quorum of the
//!        largest odd size (3, 5, 7, 9 or 11) its candidates allow and sends
//!        its vote to the proposed roster.
//!     2. Participants relay votes to each other and vote to the proposal's
//!        origin last; a vote entry completes when every roster member has
//!        both sent and received a vote.
//!
//! FORMED:
//!     1. A process that completes its vote entry commits the quorum and
//!        announces it to candidates left outside the roster, which may then
//!        track it as followers.
//!
//! A member going down sends the survivors back to square one; losing or
//! outgrowing a quorum schedules another formation attempt.
//!
//! Limitations:
//! - Formation is best-effort convergent. Concurrent conflicting proposals
//!   for the same size stall each other and are resolved by the vote cleanup
//!   timeout plus the randomized retry, not by a total order.
//! - Peers are not authenticated; a process believes any sender that quotes
//!   the right group name.

use std::fmt::{self, Display};

use serde_derive::{Deserialize, Serialize};

use crate::runtime::Pid;

pub(crate) mod behaviour;
pub(crate) mod candidates;
pub(crate) mod engine;
pub(crate) mod ledger;
pub(crate) mod process;
pub(crate) mod timers;

#[cfg(test)]
mod test;

/// Size of a formed quorum. `Unknown` doubles as the "no quorum" state and
/// orders below every concrete size.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum QuorumSize {
    Unknown,
    Three,
    Five,
    Seven,
    Nine,
    Eleven,
}

impl QuorumSize {
    pub fn numeric(self) -> usize {
        match self {
            QuorumSize::Unknown => 0,
            QuorumSize::Three => 3,
            QuorumSize::Five => 5,
            QuorumSize::Seven => 7,
            QuorumSize::Nine => 9,
            QuorumSize::Eleven => 11,
        }
    }

    pub(crate) fn from_wire(state: u32) -> Option<QuorumSize> {
        match state {
            3 => Some(QuorumSize::Three),
            5 => Some(QuorumSize::Five),
            7 => Some(QuorumSize::Seven),
            9 => Some(QuorumSize::Nine),
            11 => Some(QuorumSize::Eleven),
            _ => None,
        }
    }

    /// Largest target reachable with `candidates` known peers (self not
    /// counted).
    pub(crate) fn for_candidates(candidates: usize) -> QuorumSize {
        match candidates {
            0..=1 => QuorumSize::Unknown,
            2..=3 => QuorumSize::Three,
            4..=5 => QuorumSize::Five,
            6..=7 => QuorumSize::Seven,
            8..=9 => QuorumSize::Nine,
            _ => QuorumSize::Eleven,
        }
    }
}

impl Display for QuorumSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QuorumSize::Unknown => write!(f, "unknown"),
            other => write!(f, "{}", other.numeric()),
        }
    }
}

/// The committed quorum view of one process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Quorum {
    pub state: QuorumSize,
    /// True when this process only observes a quorum formed elsewhere.
    pub follow: bool,
    /// Members in roster order; empty iff `state` is `Unknown`.
    pub peers: Vec<Pid>,
}

impl Quorum {
    pub(crate) fn unknown() -> Quorum {
        Quorum {
            state: QuorumSize::Unknown,
            follow: false,
            peers: vec![],
        }
    }

    pub fn contains(&self, pid: Pid) -> bool {
        self.peers.contains(&pid)
    }
}

/// Wire messages exchanged between quorum processes. Every variant names its
/// sender and the group; traffic quoting a foreign group is dropped on
/// receipt. The proposed size travels as a raw integer and is validated at
/// the engine boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) enum ProtocolMessage {
    Join {
        from: Pid,
        quorum_id: String,
        last_update: i64,
    },
    JoinReply {
        from: Pid,
        quorum_id: String,
        last_update: i64,
        peers: Vec<Pid>,
    },
    Vote {
        from: Pid,
        quorum_id: String,
        state: u32,
        candidates: Vec<Pid>,
    },
    Formed {
        from: Pid,
        quorum_id: String,
        state: u32,
        peers: Vec<Pid>,
    },
    Leave {
        from: Pid,
        quorum_id: String,
        state: u32,
    },
}

impl ProtocolMessage {
    pub(crate) fn sender(&self) -> Pid {
        match self {
            ProtocolMessage::Join { from, .. }
            | ProtocolMessage::JoinReply { from, .. }
            | ProtocolMessage::Vote { from, .. }
            | ProtocolMessage::Formed { from, .. }
            | ProtocolMessage::Leave { from, .. } => *from,
        }
    }

    pub(crate) fn quorum_id(&self) -> &str {
        match self {
            ProtocolMessage::Join { quorum_id, .. }
            | ProtocolMessage::JoinReply { quorum_id, .. }
            | ProtocolMessage::Vote { quorum_id, .. }
            | ProtocolMessage::Formed { quorum_id, .. }
            | ProtocolMessage::Leave { quorum_id, .. } => quorum_id,
        }
    }
}

/// Deferred self-messages scheduled through the timer controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TimerEvent {
    QuorumChange,
    VoteCleanup(QuorumSize),
}
