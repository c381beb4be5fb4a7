//! # Quorate

//! Quorate elects a fixed-size quorum (3, 5, 7, 9 or 11 peers) among the
//! reachable member processes of a named group.
//!
//! Each process hosts an instance of the same state machine; instances
//! exchange asynchronous messages and discover each other transitively,
//! starting from a single bootstrap peer. After a short randomized defer, a
//! process proposes the largest quorum its known candidates allow and the
//! roster exchanges votes; when the exchange completes, every roster member
//! commits the quorum and the embedding behaviour is notified. Candidates
//! left outside the roster are told about the result and track it as
//! followers.
//!
//! The quorum is not forever: a member going down sends the group back to
//! square one, and newly arrived peers make a larger quorum possible, so
//! formation simply runs again. Proposals prefer the peers with the freshest
//! self-reported data, on the assumption that those will carry authoritative
//! state for whatever gets built on top of the membership.
//!
//! What Quorate deliberately does not do: leader election, log replication,
//! durable state (a restarted process rejoins from scratch) and peer
//! authentication.

pub use crate::quorum::behaviour::{QuorumBehaviour, QuorumOptions, Status};
pub use crate::quorum::process::spawn;
pub use crate::quorum::{Quorum, QuorumSize};
pub use crate::runtime::node::{Node, ProcessRef, TimerHandle};
pub use crate::runtime::{DownMessage, MonitorRef, Pid, RuntimeError, Term};

pub mod configuration {
    pub use crate::config::{ClusterConfig, Configuration, ConfigurationError, NodeConfig};
}

pub mod cli;
pub mod logging;

mod config;
mod quorum;
mod runtime;
mod utilities;
