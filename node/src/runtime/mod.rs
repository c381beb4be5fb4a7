//! A minimal in-process actor host.
//!
//! Every hosted process owns a mailbox drained by a single tokio task, so all
//! state owned by a process is mutated from one logical thread. Inter-process
//! communication is fire-and-forget message passing; delayed delivery is a
//! timer task that enqueues the message later. A process may monitor another
//! and receives a [`DownMessage`] when the monitored process terminates.

use std::any::Any;
use std::fmt::{self, Display};

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::oneshot;
use uuid::Uuid;

pub(crate) mod node;

/// Identifier of a process hosted by a [`node::Node`].
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Pid(u64);

impl Pid {
    pub(crate) fn new(raw: u64) -> Pid {
        Pid(raw)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<0.{}>", self.0)
    }
}

/// Token returned when a process starts monitoring another. Delivered back
/// inside the [`DownMessage`] when the monitored process terminates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MonitorRef {
    id: Uuid,
    target: Pid,
}

impl MonitorRef {
    pub(crate) fn new(target: Pid) -> MonitorRef {
        MonitorRef {
            id: Uuid::new_v4(),
            target,
        }
    }

    pub(crate) fn target(&self) -> Pid {
        self.target
    }
}

impl Display for MonitorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#Ref<{}>", self.id)
    }
}

/// Opaque message payload exchanged between processes.
pub type Term = Box<dyn Any + Send>;

/// Notification that a monitored process has terminated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownMessage {
    pub pid: Pid,
    pub reference: MonitorRef,
}

/// A single mailbox item.
#[derive(Debug)]
pub(crate) enum Message {
    Cast(Term),
    Info(Term),
    Call {
        from: Pid,
        request: Term,
        reply: oneshot::Sender<Option<Term>>,
    },
    Direct {
        request: Term,
        reply: oneshot::Sender<anyhow::Result<Option<Term>>>,
    },
    Down(DownMessage),
}

#[derive(Error, Debug)]
pub enum RuntimeError {
    #[error("process {0} is not alive")]
    NotAlive(Pid),
    #[error("request dropped before a reply was sent")]
    NoReply,
}
