use std::time::Duration;

use rand::Rng;

use crate::quorum::{QuorumSize, TimerEvent};
use crate::runtime::node::Node;
use crate::runtime::Pid;

/// Base delay before a deferred quorum-change attempt.
const QUORUM_CHANGE_DEFER_BASE: Duration = Duration::from_millis(50);
/// Width of the random jitter added on top of the base delay. The jitter
/// spreads concurrent proposals out so one of them can win.
const QUORUM_CHANGE_DEFER_JITTER_MS: u64 = 700;

/// Inactivity window after which a vote entry is discarded.
pub(crate) const VOTE_CLEANUP_AFTER: Duration = Duration::from_secs(1);

/// Schedules deferred engine work as delayed self-casts.
pub(crate) struct TimerController {
    node: Node,
    pid: Pid,
    /// A quorum-change defer is in flight; cleared when it fires.
    defer_pending: bool,
}

impl TimerController {
    pub(crate) fn new(node: Node, pid: Pid) -> TimerController {
        TimerController {
            node,
            pid,
            defer_pending: false,
        }
    }

    /// Arms a quorum-change attempt after a jittered delay. No-op while one
    /// is already pending.
    pub(crate) fn arm_quorum_change(&mut self) {
        if self.defer_pending {
            return;
        }
        self.defer_pending = true;
        let jitter = rand::thread_rng().gen_range(0..QUORUM_CHANGE_DEFER_JITTER_MS);
        let delay = QUORUM_CHANGE_DEFER_BASE + Duration::from_millis(jitter);
        self.node
            .cast_after(self.pid, Box::new(TimerEvent::QuorumChange), delay);
    }

    pub(crate) fn quorum_change_fired(&mut self) {
        self.defer_pending = false;
    }

    #[cfg(test)]
    pub(crate) fn quorum_change_pending(&self) -> bool {
        self.defer_pending
    }

    pub(crate) fn arm_vote_cleanup(&mut self, state: QuorumSize, delay: Duration) {
        self.node
            .cast_after(self.pid, Box::new(TimerEvent::VoteCleanup(state)), delay);
    }
}
