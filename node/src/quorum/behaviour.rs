use std::fmt;

use log::warn;

use crate::quorum::QuorumSize;
use crate::runtime::node::ProcessRef;
use crate::runtime::{Pid, Term};

/// Outcome of a behaviour callback.
pub enum Status {
    /// Keep running.
    Ok,
    /// The message was not recognized; a cast returning it is re-delivered
    /// to `handle_info`.
    Unhandled(Term),
    /// Terminate the process.
    Stop,
}

impl fmt::Debug for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Ok => write!(f, "Ok"),
            Status::Unhandled(_) => write!(f, "Unhandled(..)"),
            Status::Stop => write!(f, "Stop"),
        }
    }
}

/// Options returned by [`QuorumBehaviour::init`].
#[derive(Debug, Clone)]
pub struct QuorumOptions {
    /// Name of the group this process participates in.
    pub quorum_id: String,
    /// Bootstrap peer to contact at startup; without one the process waits
    /// passively to be discovered.
    pub peer: Option<Pid>,
    /// Self-reported data freshness, unix seconds. Negative values and
    /// values in the future are normalized to 0.
    pub last_update: i64,
}

/// Callback surface of a quorum process.
///
/// Notes:
/// A) Callbacks run on the process's own task and are never re-entered.
/// B) They should be fast and must not block; slow work belongs on a
///    separate task messaging the process back.
pub trait QuorumBehaviour: Send + 'static {
    /// Called once before the process starts handling messages.
    fn init(&mut self, process: &ProcessRef) -> anyhow::Result<QuorumOptions>;

    /// Called on every transition of the committed quorum, including back to
    /// `Unknown`, and on every newly accepted follow.
    fn handle_quorum_change(&mut self, new_state: QuorumSize) -> anyhow::Result<Status> {
        log::debug!("quorum changed to {new_state}");
        Ok(Status::Ok)
    }

    fn handle_call(
        &mut self,
        from: Pid,
        _request: Term,
    ) -> anyhow::Result<(Option<Term>, Status)> {
        warn!("unhandled call from {from}");
        Ok((None, Status::Ok))
    }

    fn handle_cast(&mut self, _message: Term) -> anyhow::Result<Status> {
        warn!("unhandled cast message");
        Ok(Status::Ok)
    }

    fn handle_info(&mut self, _message: Term) -> anyhow::Result<Status> {
        warn!("unhandled info message");
        Ok(Status::Ok)
    }

    fn handle_direct(&mut self, _request: Term) -> anyhow::Result<Option<Term>> {
        Err(anyhow::anyhow!("unsupported request"))
    }
}
