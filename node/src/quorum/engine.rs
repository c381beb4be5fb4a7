use std::collections::HashSet;
use std::time::Duration;

use log::{debug, info, trace, warn};

use crate::quorum::candidates::CandidateRegistry;
use crate::quorum::ledger::{VoteEntry, VoteLedger, MAX_OPEN_VOTES, VOTE_BOTH, VOTE_SENT};
use crate::quorum::timers::{TimerController, VOTE_CLEANUP_AFTER};
use crate::quorum::{ProtocolMessage, Quorum, QuorumSize, TimerEvent};
use crate::runtime::node::Node;
use crate::runtime::{DownMessage, Pid};
use crate::utilities::time::QuorateTime;

/// The quorum-formation state machine of a single process.
///
/// Mutated only from the owning process's task; every handler returns the
/// committed state to report through the quorum-change callback, or `None`
/// when the dispatch caused no transition.
pub(crate) struct QuorumEngine {
    node: Node,
    pid: Pid,
    quorum_id: String,
    /// Our own data freshness, advertised in join traffic.
    last_update: i64,
    registry: CandidateRegistry,
    ledger: VoteLedger,
    quorum: Quorum,
    timers: TimerController,
}

impl QuorumEngine {
    pub(crate) fn new(node: Node, pid: Pid, quorum_id: String, last_update: i64) -> QuorumEngine {
        let timers = TimerController::new(node.clone(), pid);
        QuorumEngine {
            node,
            pid,
            quorum_id,
            last_update,
            registry: CandidateRegistry::new(),
            ledger: VoteLedger::new(),
            quorum: Quorum::unknown(),
            timers,
        }
    }

    pub(crate) fn quorum(&self) -> &Quorum {
        &self.quorum
    }

    /// Contacts the bootstrap peer, if any.
    pub(crate) fn bootstrap(&self, peer: Pid) {
        self.send_join(peer);
    }

    pub(crate) fn handle_protocol(&mut self, message: ProtocolMessage) -> Option<QuorumSize> {
        if message.quorum_id() != self.quorum_id {
            trace!(
                "{}: dropping message from {} for foreign group {:?}",
                self.pid,
                message.sender(),
                message.quorum_id()
            );
            return None;
        }
        match message {
            ProtocolMessage::Join {
                from, last_update, ..
            } => {
                self.on_join(from, last_update);
                None
            }
            ProtocolMessage::JoinReply {
                from,
                last_update,
                peers,
                ..
            } => {
                self.on_join_reply(from, last_update, peers);
                None
            }
            ProtocolMessage::Vote {
                from,
                state,
                candidates,
                ..
            } => self.on_vote(from, state, candidates),
            ProtocolMessage::Formed {
                from, state, peers, ..
            } => self.on_formed(from, state, peers),
            ProtocolMessage::Leave { from, .. } => {
                debug!("{}: ignoring leave from {}", self.pid, from);
                None
            }
        }
    }

    pub(crate) fn handle_timeout(&mut self, event: TimerEvent) -> Option<QuorumSize> {
        match event {
            TimerEvent::QuorumChange => {
                self.timers.quorum_change_fired();
                self.attempt_change()
            }
            TimerEvent::VoteCleanup(state) => {
                self.cleanup_vote(state);
                None
            }
        }
    }

    /// Reacts to a monitored process going down. Gives the message back when
    /// it does not belong to a tracked candidate.
    pub(crate) fn handle_down(
        &mut self,
        down: DownMessage,
    ) -> Result<Option<QuorumSize>, DownMessage> {
        match self.registry.get(down.pid) {
            Some(record) if record.monitor == down.reference => {}
            _ => return Err(down),
        }
        self.registry.remove(down.pid, Some(&down.reference));
        debug!(
            "{}: candidate {} went down ({} left)",
            self.pid,
            down.pid,
            self.registry.len()
        );
        if self.quorum.state != QuorumSize::Unknown && self.quorum.contains(down.pid) {
            self.quorum = Quorum::unknown();
            self.timers.arm_quorum_change();
            return Ok(Some(QuorumSize::Unknown));
        }
        Ok(None)
    }

    fn on_join(&mut self, peer: Pid, last_update: i64) {
        // snapshot before admitting, so the reply does not echo the sender
        let known = self.registry.list();
        if !self.admit(peer, last_update) {
            return;
        }
        self.cast_protocol(
            peer,
            ProtocolMessage::JoinReply {
                from: self.pid,
                quorum_id: self.quorum_id.clone(),
                last_update: self.last_update,
                peers: known,
            },
        );
    }

    fn on_join_reply(&mut self, peer: Pid, last_update: i64, peers: Vec<Pid>) {
        if !self.admit(peer, last_update) {
            return;
        }
        for pid in peers {
            if pid != self.pid && !self.registry.contains(pid) {
                self.send_join(pid);
            }
        }
        self.timers.arm_quorum_change();
    }

    /// Admits `peer` as a candidate, acquiring a monitor on it. Returns
    /// false when the peer is already known.
    fn admit(&mut self, peer: Pid, last_update: i64) -> bool {
        if peer == self.pid || self.registry.contains(peer) {
            return false;
        }
        let monitor = self.node.monitor(self.pid, peer);
        self.registry.add(peer, monitor, last_update);
        debug!(
            "{}: admitted candidate {} ({} known)",
            self.pid,
            peer,
            self.registry.len()
        );
        true
    }

    /// Removes a protocol-violating peer and releases its monitor.
    fn evict(&mut self, peer: Pid) {
        if let Some(record) = self.registry.remove(peer, None) {
            self.node.demonitor(&record.monitor);
        }
    }

    /// Proposes the largest quorum the current candidates allow.
    pub(crate) fn attempt_change(&mut self) -> Option<QuorumSize> {
        let target = QuorumSize::for_candidates(self.registry.len());
        if target == QuorumSize::Unknown {
            if self.quorum.state != QuorumSize::Unknown {
                debug!("{}: not enough candidates left, back to unknown", self.pid);
                self.quorum = Quorum::unknown();
                return Some(QuorumSize::Unknown);
            }
            return None;
        }
        if self.quorum.state == target {
            return None;
        }
        if self.ledger.get(target).is_some() {
            // already in progress
            return None;
        }
        if self.ledger.len() >= MAX_OPEN_VOTES {
            warn!(
                "{}: {} votes already in progress, not proposing a quorum of {}",
                self.pid,
                self.ledger.len(),
                target
            );
            return None;
        }
        let mut roster = vec![self.pid];
        roster.extend(
            self.registry
                .list()
                .into_iter()
                .take(target.numeric() - 1),
        );
        debug!(
            "{}: proposing a quorum of {} with {:?}",
            self.pid, target, roster
        );
        self.ledger
            .put(VoteEntry::new(target, roster, Some(self.pid)));
        self.timers.arm_vote_cleanup(target, VOTE_CLEANUP_AFTER);
        self.send_votes(target);
        None
    }

    /// Sends our vote to roster members that have not seen it yet, voting to
    /// the origin last. Returns true when every peer other than self has
    /// both sent and received set, i.e. the quorum is fully voted.
    fn send_votes(&mut self, state: QuorumSize) -> bool {
        let Some(entry) = self.ledger.get_mut(state) else {
            return false;
        };
        // a participant holds its vote until the origin's own arrives; this
        // serializes concurrent proposals
        let Some(origin) = entry.origin else {
            return false;
        };
        let peers = entry.peers.clone();
        let mut all_voted = true;
        for pid in peers.iter().copied() {
            if pid == self.pid || pid == origin {
                continue;
            }
            let mut flags = entry.flags(pid);
            if flags & VOTE_SENT == 0 {
                self.node.cast(
                    pid,
                    Box::new(ProtocolMessage::Vote {
                        from: self.pid,
                        quorum_id: self.quorum_id.clone(),
                        state: entry.state.numeric() as u32,
                        candidates: entry.peers.clone(),
                    }),
                );
                entry.mark_sent(pid);
                flags |= VOTE_SENT;
            }
            if flags != VOTE_BOTH {
                all_voted = false;
            }
        }
        // the origin is voted last; it is the sequencing point that declares
        // formation
        if all_voted && origin != self.pid && entry.flags(origin) & VOTE_SENT == 0 {
            self.node.cast(
                origin,
                Box::new(ProtocolMessage::Vote {
                    from: self.pid,
                    quorum_id: self.quorum_id.clone(),
                    state: entry.state.numeric() as u32,
                    candidates: entry.peers.clone(),
                }),
            );
            entry.mark_sent(origin);
        }
        peers
            .iter()
            .filter(|pid| **pid != self.pid)
            .all(|pid| entry.flags(*pid) == VOTE_BOTH)
    }

    fn on_vote(&mut self, from: Pid, wire_state: u32, candidates: Vec<Pid>) -> Option<QuorumSize> {
        if wire_state as usize != candidates.len() {
            warn!(
                "{}: vote from {} proposes a quorum of {} with {} candidates, evicting peer",
                self.pid,
                from,
                wire_state,
                candidates.len()
            );
            self.evict(from);
            return None;
        }
        if !self.registry.contains(from) {
            // join traffic still in flight; the peer will retry
            trace!("{}: vote from unknown peer {}", self.pid, from);
            return None;
        }
        let Some(state) = QuorumSize::from_wire(wire_state) else {
            warn!(
                "{}: vote from {} with invalid quorum size {}, evicting peer",
                self.pid, from, wire_state
            );
            self.evict(from);
            return None;
        };
        if self.quorum.state != QuorumSize::Unknown && state <= self.quorum.state {
            // not an improvement; report the quorum we already have
            self.cast_protocol(
                from,
                ProtocolMessage::Formed {
                    from: self.pid,
                    quorum_id: self.quorum_id.clone(),
                    state: self.quorum.state.numeric() as u32,
                    peers: self.quorum.peers.clone(),
                },
            );
            self.timers.arm_quorum_change();
            return None;
        }

        let mut created = false;
        if self.ledger.get(state).is_none() {
            if self.ledger.len() >= MAX_OPEN_VOTES {
                warn!(
                    "{}: {} votes already in progress, dropping vote from {}",
                    self.pid,
                    self.ledger.len(),
                    from
                );
                return None;
            }
            let origin = (candidates[0] == from).then_some(from);
            self.ledger
                .put(VoteEntry::new(state, candidates.clone(), origin));
            created = true;
        } else if let Some(entry) = self.ledger.get_mut(state) {
            if entry.origin.is_none() && candidates[0] == from {
                // the delayed origin vote; adopt its roster
                entry.origin = Some(from);
                if entry.peers != candidates {
                    entry.peers = candidates.clone();
                    entry.votes.clear();
                }
            }
        }

        if !self.validate_vote(state, from, &candidates) {
            if created {
                self.ledger.delete(state);
            }
            return None;
        }
        if created {
            self.timers.arm_vote_cleanup(state, VOTE_CLEANUP_AFTER);
        }
        let entry = self.ledger.get_mut(state).expect("vote entry must exist");
        entry.touch();
        entry.mark_received(from);
        if self.send_votes(state) {
            return self.form(state);
        }
        None
    }

    /// Checks an inbound vote against the stored entry and our world view.
    /// Malformed votes evict the sender; votes that merely disagree with
    /// what we know are rejected without prejudice.
    fn validate_vote(&mut self, state: QuorumSize, from: Pid, candidates: &[Pid]) -> bool {
        let self_pid = self.pid;
        let mut join_targets = vec![];
        let mut valid_from = false;
        let mut valid_to = false;
        let mut candidates_match = true;
        let mut duplicate = false;
        {
            let Some(entry) = self.ledger.get_mut(state) else {
                return false;
            };
            let first_vote = entry.votes.is_empty();
            if entry.origin.is_some() && first_vote && candidates[0] != from {
                // a non-origin peer cannot seed a vote
                return false;
            }
            let mut seen = HashSet::with_capacity(candidates.len());
            for (position, pid) in candidates.iter().copied().enumerate() {
                if !seen.insert(pid) {
                    duplicate = true;
                    break;
                }
                if entry.peers.get(position) != Some(&pid) {
                    candidates_match = false;
                }
                if pid == self_pid {
                    valid_to = true;
                    continue;
                }
                if !entry.votes.contains_key(&pid) {
                    if first_vote {
                        entry.votes.insert(pid, 0);
                    } else {
                        candidates_match = false;
                    }
                }
                if pid == from {
                    valid_from = true;
                }
                if !self.registry.contains(pid) {
                    candidates_match = false;
                    join_targets.push(pid);
                }
            }
        }
        if duplicate {
            warn!(
                "{}: duplicate candidate in vote from {}, evicting peer",
                self_pid, from
            );
            self.evict(from);
            return false;
        }
        for pid in join_targets {
            self.send_join(pid);
        }
        if !candidates_match {
            trace!(
                "{}: vote from {} does not match our view of the group",
                self_pid,
                from
            );
            return false;
        }
        if !valid_from || !valid_to {
            warn!(
                "{}: malformed vote from {}, evicting peer",
                self_pid, from
            );
            self.evict(from);
            return false;
        }
        if let Some(entry) = self.ledger.get_mut(state) {
            entry.mark_received(from);
        }
        true
    }

    /// Commits a fully voted quorum and announces it to the candidates left
    /// outside the roster.
    fn form(&mut self, state: QuorumSize) -> Option<QuorumSize> {
        let entry = self.ledger.delete(state)?;
        self.quorum = Quorum {
            state,
            follow: false,
            peers: entry.peers,
        };
        info!(
            "{}: quorum of {} formed: {:?}",
            self.pid, state, self.quorum.peers
        );
        let members: HashSet<Pid> = self.quorum.peers.iter().copied().collect();
        for candidate in self.registry.list() {
            if !members.contains(&candidate) {
                self.cast_protocol(
                    candidate,
                    ProtocolMessage::Formed {
                        from: self.pid,
                        quorum_id: self.quorum_id.clone(),
                        state: state.numeric() as u32,
                        peers: self.quorum.peers.clone(),
                    },
                );
            }
        }
        Some(state)
    }

    fn on_formed(&mut self, from: Pid, wire_state: u32, peers: Vec<Pid>) -> Option<QuorumSize> {
        let mut seen = HashSet::with_capacity(peers.len());
        if !peers.iter().all(|pid| seen.insert(*pid)) {
            return None;
        }
        if peers.contains(&self.pid) {
            panic!(
                "{}: peer {} reports a formed quorum that includes us while we see none",
                self.pid, from
            );
        }
        let mut match_candidates = true;
        for pid in peers.iter().copied() {
            if !self.registry.contains(pid) {
                match_candidates = false;
                self.send_join(pid);
            }
        }
        if peers.len() != wire_state as usize {
            warn!(
                "{}: formed message from {} claims {} members but lists {}",
                self.pid,
                from,
                wire_state,
                peers.len()
            );
            return None;
        }
        let state = QuorumSize::from_wire(wire_state)?;
        // the joins above may still grow the registry
        self.timers.arm_quorum_change();
        if self.quorum.follow && self.quorum.state == state {
            return None;
        }
        if match_candidates {
            self.quorum = Quorum {
                state,
                follow: true,
                peers,
            };
            info!(
                "{}: following a quorum of {}: {:?}",
                self.pid, state, self.quorum.peers
            );
            return Some(state);
        }
        if self.quorum.state != QuorumSize::Unknown {
            // we cannot verifiably follow a quorum with unobserved members
            self.quorum = Quorum::unknown();
            return Some(QuorumSize::Unknown);
        }
        None
    }

    /// Discards a vote entry that saw no activity for a full cleanup window;
    /// an active entry is given the remainder of its window.
    fn cleanup_vote(&mut self, state: QuorumSize) {
        if let Some(entry) = self.ledger.get(state) {
            let age = QuorateTime::now_millis() - entry.last_vote;
            if age < VOTE_CLEANUP_AFTER.as_millis() as i64 {
                let remaining = VOTE_CLEANUP_AFTER - Duration::from_millis(age.max(0) as u64);
                self.timers.arm_vote_cleanup(state, remaining);
                return;
            }
            debug!(
                "{}: vote for a quorum of {} went stale, discarding",
                self.pid, state
            );
            self.ledger.delete(state);
        }
        if self.ledger.is_empty() && self.quorum.state == QuorumSize::Unknown {
            self.timers.arm_quorum_change();
        }
    }

    fn send_join(&self, peer: Pid) {
        trace!("{}: joining {:?} via {}", self.pid, self.quorum_id, peer);
        self.cast_protocol(
            peer,
            ProtocolMessage::Join {
                from: self.pid,
                quorum_id: self.quorum_id.clone(),
                last_update: self.last_update,
            },
        );
    }

    fn cast_protocol(&self, to: Pid, message: ProtocolMessage) {
        self.node.cast(to, Box::new(message));
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use tokio::sync::mpsc;

    use super::*;
    use crate::runtime::{Message, MonitorRef};

    const GROUP: &str = "testgroup";

    struct Peer {
        pid: Pid,
        mailbox: mpsc::UnboundedReceiver<Message>,
    }

    fn start_engine(node: &Node) -> (QuorumEngine, mpsc::UnboundedReceiver<Message>) {
        let (pid, mailbox) = node.register();
        (
            QuorumEngine::new(node.clone(), pid, GROUP.to_string(), 0),
            mailbox,
        )
    }

    fn start_peer(node: &Node) -> Peer {
        let (pid, mailbox) = node.register();
        Peer { pid, mailbox }
    }

    fn join(engine: &mut QuorumEngine, peer: &Peer, last_update: i64) {
        let transition = engine.handle_protocol(ProtocolMessage::Join {
            from: peer.pid,
            quorum_id: GROUP.to_string(),
            last_update,
        });
        assert_eq!(transition, None);
    }

    fn vote(
        engine: &mut QuorumEngine,
        from: Pid,
        state: u32,
        candidates: Vec<Pid>,
    ) -> Option<QuorumSize> {
        engine.handle_protocol(ProtocolMessage::Vote {
            from,
            quorum_id: GROUP.to_string(),
            state,
            candidates,
        })
    }

    fn formed(
        engine: &mut QuorumEngine,
        from: Pid,
        state: u32,
        peers: Vec<Pid>,
    ) -> Option<QuorumSize> {
        engine.handle_protocol(ProtocolMessage::Formed {
            from,
            quorum_id: GROUP.to_string(),
            state,
            peers,
        })
    }

    fn recv_protocol(peer: &mut Peer) -> Option<ProtocolMessage> {
        while let Ok(message) = peer.mailbox.try_recv() {
            if let Message::Cast(term) = message {
                if let Ok(protocol) = term.downcast::<ProtocolMessage>() {
                    return Some(*protocol);
                }
            }
        }
        None
    }

    fn drain(peer: &mut Peer) {
        while peer.mailbox.try_recv().is_ok() {}
    }

    /// Runs a full vote exchange for a quorum of three with `a` as origin.
    fn form_three(engine: &mut QuorumEngine, a: &Peer, b: &Peer) {
        let roster = vec![a.pid, engine.pid, b.pid];
        assert_eq!(vote(engine, a.pid, 3, roster.clone()), None);
        assert_eq!(vote(engine, b.pid, 3, roster), Some(QuorumSize::Three));
    }

    #[tokio::test]
    async fn join_admits_and_replies_without_echoing() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);

        join(&mut engine, &a, 5);
        assert_matches!(
            recv_protocol(&mut a),
            Some(ProtocolMessage::JoinReply { peers, .. }) if peers.is_empty()
        );

        join(&mut engine, &b, 3);
        assert_matches!(
            recv_protocol(&mut b),
            Some(ProtocolMessage::JoinReply { peers, .. }) if peers == vec![a.pid]
        );
        assert_eq!(engine.registry.len(), 2);
    }

    #[tokio::test]
    async fn repeated_join_is_ignored() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);

        join(&mut engine, &a, 5);
        drain(&mut a);

        join(&mut engine, &a, 99);
        assert!(recv_protocol(&mut a).is_none());
        assert_eq!(engine.registry.get(a.pid).unwrap().last_update, 5);
    }

    #[tokio::test]
    async fn foreign_group_traffic_is_dropped() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);

        let transition = engine.handle_protocol(ProtocolMessage::Join {
            from: a.pid,
            quorum_id: "somewhere-else".to_string(),
            last_update: 5,
        });

        assert_eq!(transition, None);
        assert_eq!(engine.registry.len(), 0);
        assert!(recv_protocol(&mut a).is_none());
    }

    #[tokio::test]
    async fn join_reply_discovers_peers_transitively() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let mut b = start_peer(&node);

        let transition = engine.handle_protocol(ProtocolMessage::JoinReply {
            from: a.pid,
            quorum_id: GROUP.to_string(),
            last_update: 1,
            peers: vec![b.pid, engine.pid],
        });

        assert_eq!(transition, None);
        assert!(engine.registry.contains(a.pid));
        assert_matches!(recv_protocol(&mut b), Some(ProtocolMessage::Join { .. }));
        assert!(engine.timers.quorum_change_pending());

        engine.handle_timeout(TimerEvent::QuorumChange);
        assert!(!engine.timers.quorum_change_pending());
    }

    #[tokio::test]
    async fn proposal_targets_the_freshest_candidates() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);
        let mut c = start_peer(&node);
        let mut d = start_peer(&node);
        let mut e = start_peer(&node);
        for (peer, last_update) in [(&a, 3), (&b, 9), (&c, 5), (&d, 1), (&e, 7)] {
            join(&mut engine, peer, last_update);
        }
        for peer in [&mut a, &mut b, &mut c, &mut d, &mut e] {
            drain(peer);
        }

        assert_eq!(engine.attempt_change(), None);

        let entry = engine.ledger.get(QuorumSize::Five).unwrap();
        assert_eq!(entry.origin, Some(engine.pid));
        assert_eq!(entry.peers, vec![engine.pid, b.pid, e.pid, c.pid, a.pid]);

        for peer in [&mut a, &mut b, &mut c, &mut e] {
            assert_matches!(
                recv_protocol(peer),
                Some(ProtocolMessage::Vote { state: 5, .. })
            );
        }
        assert!(recv_protocol(&mut d).is_none());
    }

    #[tokio::test]
    async fn attempt_is_a_noop_while_a_vote_is_in_progress() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);

        assert_eq!(engine.attempt_change(), None);
        drain(&mut a);
        drain(&mut b);

        assert_eq!(engine.attempt_change(), None);
        assert!(recv_protocol(&mut a).is_none());
        assert!(recv_protocol(&mut b).is_none());
    }

    #[tokio::test]
    async fn attempt_is_a_noop_when_the_target_is_already_committed() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        engine.quorum = Quorum {
            state: QuorumSize::Three,
            follow: false,
            peers: vec![engine.pid, a.pid, b.pid],
        };

        assert_eq!(engine.attempt_change(), None);
        assert!(engine.ledger.is_empty());
    }

    #[tokio::test]
    async fn losing_the_quorum_basis_downgrades_to_unknown() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        join(&mut engine, &a, 0);
        engine.quorum = Quorum {
            state: QuorumSize::Three,
            follow: false,
            peers: vec![engine.pid, a.pid, Pid::new(999)],
        };

        assert_eq!(engine.attempt_change(), Some(QuorumSize::Unknown));
        assert_eq!(engine.quorum, Quorum::unknown());
    }

    #[tokio::test]
    async fn full_vote_exchange_forms_the_quorum() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);
        let mut c = start_peer(&node);
        join(&mut engine, &a, 30);
        join(&mut engine, &b, 20);
        join(&mut engine, &c, 10);
        for peer in [&mut a, &mut b, &mut c] {
            drain(peer);
        }

        let roster = vec![a.pid, engine.pid, b.pid];
        assert_eq!(vote(&mut engine, a.pid, 3, roster.clone()), None);
        // our vote goes to the other participant first, not to the origin
        assert_matches!(recv_protocol(&mut b), Some(ProtocolMessage::Vote { .. }));
        assert!(recv_protocol(&mut a).is_none());

        assert_eq!(
            vote(&mut engine, b.pid, 3, roster.clone()),
            Some(QuorumSize::Three)
        );
        assert_matches!(recv_protocol(&mut a), Some(ProtocolMessage::Vote { .. }));

        assert_eq!(engine.quorum.state, QuorumSize::Three);
        assert!(!engine.quorum.follow);
        assert_eq!(engine.quorum.peers, roster);
        assert!(engine.ledger.is_empty());

        // the candidate outside the roster is told to follow
        assert_matches!(
            recv_protocol(&mut c),
            Some(ProtocolMessage::Formed { state: 3, peers, .. }) if peers == roster
        );
    }

    #[tokio::test]
    async fn participant_holds_its_vote_until_the_origin_is_heard() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        drain(&mut a);
        drain(&mut b);

        let roster = vec![a.pid, engine.pid, b.pid];
        assert_eq!(vote(&mut engine, b.pid, 3, roster.clone()), None);
        assert!(recv_protocol(&mut a).is_none());
        assert!(recv_protocol(&mut b).is_none());
        assert_eq!(engine.ledger.get(QuorumSize::Three).unwrap().origin, None);

        // the delayed origin vote releases ours and completes the exchange
        assert_eq!(
            vote(&mut engine, a.pid, 3, roster.clone()),
            Some(QuorumSize::Three)
        );
        assert_matches!(recv_protocol(&mut a), Some(ProtocolMessage::Vote { .. }));
        assert_matches!(recv_protocol(&mut b), Some(ProtocolMessage::Vote { .. }));
        assert_eq!(engine.quorum.peers, roster);
    }

    #[tokio::test]
    async fn conflicting_roster_vote_is_dropped() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);
        let mut c = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        join(&mut engine, &c, 0);

        let engine_pid = engine.pid;
        assert_eq!(vote(&mut engine, a.pid, 3, vec![a.pid, engine_pid, b.pid]), None);
        for peer in [&mut a, &mut b, &mut c] {
            drain(peer);
        }

        assert_eq!(vote(&mut engine, c.pid, 3, vec![c.pid, engine_pid, b.pid]), None);

        let entry = engine.ledger.get(QuorumSize::Three).unwrap();
        assert_eq!(entry.origin, Some(a.pid));
        assert_eq!(entry.peers, vec![a.pid, engine.pid, b.pid]);
        assert!(engine.registry.contains(c.pid));
    }

    #[tokio::test]
    async fn state_length_mismatch_evicts_the_sender() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        drain(&mut a);

        let short = vec![a.pid, engine.pid, b.pid, Pid::new(900)];
        assert_eq!(vote(&mut engine, a.pid, 5, short), None);
        assert!(!engine.registry.contains(a.pid));
        assert!(engine.ledger.is_empty());

        // a legitimate join re-admits the peer
        join(&mut engine, &a, 1);
        assert!(engine.registry.contains(a.pid));
        assert_matches!(recv_protocol(&mut a), Some(ProtocolMessage::JoinReply { .. }));
    }

    #[tokio::test]
    async fn invalid_quorum_size_evicts_the_sender() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);

        let roster = vec![a.pid, engine.pid, b.pid, Pid::new(900)];
        assert_eq!(vote(&mut engine, a.pid, 4, roster), None);
        assert!(!engine.registry.contains(a.pid));
    }

    #[tokio::test]
    async fn duplicate_roster_member_evicts_the_sender() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        join(&mut engine, &a, 0);

        let engine_pid = engine.pid;
        assert_eq!(vote(&mut engine, a.pid, 3, vec![a.pid, engine_pid, a.pid]), None);
        assert!(!engine.registry.contains(a.pid));
        assert!(engine.ledger.is_empty());
    }

    #[tokio::test]
    async fn roster_without_us_evicts_the_sender() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        let c = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        join(&mut engine, &c, 0);

        assert_eq!(vote(&mut engine, a.pid, 3, vec![a.pid, b.pid, c.pid]), None);
        assert!(!engine.registry.contains(a.pid));
        assert!(engine.ledger.is_empty());
    }

    #[tokio::test]
    async fn vote_from_unknown_sender_is_ignored() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let stranger = start_peer(&node);
        join(&mut engine, &a, 0);

        let roster = vec![stranger.pid, engine.pid, a.pid];
        assert_eq!(vote(&mut engine, stranger.pid, 3, roster), None);
        assert!(engine.ledger.is_empty());
        assert!(!engine.registry.contains(stranger.pid));
    }

    #[tokio::test]
    async fn unknown_roster_member_triggers_an_opportunistic_join() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut stranger = start_peer(&node);
        join(&mut engine, &a, 0);
        drain(&mut a);

        let roster = vec![a.pid, engine.pid, stranger.pid];
        assert_eq!(vote(&mut engine, a.pid, 3, roster), None);

        assert_matches!(recv_protocol(&mut stranger), Some(ProtocolMessage::Join { .. }));
        assert!(engine.ledger.is_empty());
        assert!(engine.registry.contains(a.pid));
    }

    #[tokio::test]
    async fn smaller_vote_is_answered_with_our_quorum() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);
        let mut c = start_peer(&node);
        join(&mut engine, &a, 30);
        join(&mut engine, &b, 20);
        join(&mut engine, &c, 10);
        form_three(&mut engine, &a, &b);
        drain(&mut c);

        let engine_pid = engine.pid;
        assert_eq!(vote(&mut engine, c.pid, 3, vec![c.pid, engine_pid, a.pid]), None);

        let expected = vec![a.pid, engine.pid, b.pid];
        assert_matches!(
            recv_protocol(&mut c),
            Some(ProtocolMessage::Formed { state: 3, peers, .. }) if peers == expected
        );
        assert!(engine.ledger.is_empty());
        assert!(engine.timers.quorum_change_pending());
    }

    #[tokio::test]
    async fn formed_from_a_known_roster_is_followed() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        let c = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        join(&mut engine, &c, 0);

        let members = vec![a.pid, b.pid, c.pid];
        assert_eq!(
            formed(&mut engine, a.pid, 3, members.clone()),
            Some(QuorumSize::Three)
        );
        assert!(engine.quorum.follow);
        assert_eq!(engine.quorum.state, QuorumSize::Three);
        assert_eq!(engine.quorum.peers, members);

        // the same announcement again is idempotent
        assert_eq!(formed(&mut engine, a.pid, 3, members), None);
    }

    #[tokio::test]
    async fn formed_with_unobserved_members_downgrades_a_committed_quorum() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let mut b = start_peer(&node);
        let mut c = start_peer(&node);
        let mut stranger = start_peer(&node);
        join(&mut engine, &a, 30);
        join(&mut engine, &b, 20);
        join(&mut engine, &c, 10);
        form_three(&mut engine, &a, &b);
        for peer in [&mut a, &mut b, &mut c] {
            drain(peer);
        }

        let transition = formed(
            &mut engine,
            c.pid,
            3,
            vec![c.pid, a.pid, stranger.pid],
        );

        assert_eq!(transition, Some(QuorumSize::Unknown));
        assert_eq!(engine.quorum, Quorum::unknown());
        assert_matches!(recv_protocol(&mut stranger), Some(ProtocolMessage::Join { .. }));
    }

    #[tokio::test]
    async fn formed_with_unobserved_members_leaves_unknown_untouched() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let mut stranger = start_peer(&node);
        join(&mut engine, &a, 0);

        let transition = formed(
            &mut engine,
            a.pid,
            3,
            vec![a.pid, stranger.pid, Pid::new(901)],
        );

        assert_eq!(transition, None);
        assert_eq!(engine.quorum, Quorum::unknown());
        assert_matches!(recv_protocol(&mut stranger), Some(ProtocolMessage::Join { .. }));
        assert!(engine.timers.quorum_change_pending());
    }

    #[tokio::test]
    #[should_panic(expected = "includes us")]
    async fn formed_listing_us_is_fatal() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);

        let engine_pid = engine.pid;
        formed(&mut engine, a.pid, 3, vec![a.pid, engine_pid, b.pid]);
    }

    #[tokio::test]
    async fn malformed_formed_announcements_are_ignored() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let mut a = start_peer(&node);
        let b = start_peer(&node);
        let c = start_peer(&node);
        let d = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        join(&mut engine, &c, 0);
        join(&mut engine, &d, 0);
        drain(&mut a);

        // duplicate member
        assert_eq!(formed(&mut engine, a.pid, 3, vec![a.pid, a.pid, b.pid]), None);
        assert!(recv_protocol(&mut a).is_none());

        // claimed size disagrees with the member list
        assert_eq!(formed(&mut engine, a.pid, 5, vec![a.pid, b.pid, c.pid]), None);

        // size outside the allowed set
        assert_eq!(
            formed(&mut engine, a.pid, 4, vec![a.pid, b.pid, c.pid, d.pid]),
            None
        );

        assert_eq!(engine.quorum, Quorum::unknown());
    }

    #[tokio::test]
    async fn down_of_a_quorum_member_resets_to_unknown() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        join(&mut engine, &a, 30);
        join(&mut engine, &b, 20);
        form_three(&mut engine, &a, &b);

        let reference = engine.registry.get(a.pid).unwrap().monitor.clone();
        let transition = engine.handle_down(DownMessage {
            pid: a.pid,
            reference,
        });

        assert_matches!(transition, Ok(Some(QuorumSize::Unknown)));
        assert!(!engine.registry.contains(a.pid));
        assert_eq!(engine.quorum, Quorum::unknown());
        assert!(engine.timers.quorum_change_pending());
    }

    #[tokio::test]
    async fn down_of_a_bystander_keeps_the_quorum() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        let c = start_peer(&node);
        join(&mut engine, &a, 30);
        join(&mut engine, &b, 20);
        join(&mut engine, &c, 10);
        form_three(&mut engine, &a, &b);

        let reference = engine.registry.get(c.pid).unwrap().monitor.clone();
        let transition = engine.handle_down(DownMessage {
            pid: c.pid,
            reference,
        });

        assert_matches!(transition, Ok(None));
        assert_eq!(engine.quorum.state, QuorumSize::Three);
    }

    #[tokio::test]
    async fn down_with_a_foreign_reference_is_handed_back() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        join(&mut engine, &a, 0);

        let foreign = DownMessage {
            pid: a.pid,
            reference: MonitorRef::new(a.pid),
        };
        assert_matches!(engine.handle_down(foreign), Err(_));
        assert!(engine.registry.contains(a.pid));
    }

    #[tokio::test]
    async fn stale_vote_entries_are_cleaned_up() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        engine.attempt_change();

        let entry = engine.ledger.get_mut(QuorumSize::Three).unwrap();
        entry.last_vote -= 2 * VOTE_CLEANUP_AFTER.as_millis() as i64;

        assert_eq!(engine.handle_timeout(TimerEvent::VoteCleanup(QuorumSize::Three)), None);
        assert!(engine.ledger.is_empty());
        assert!(engine.timers.quorum_change_pending());
    }

    #[tokio::test]
    async fn active_vote_entries_survive_cleanup() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        let b = start_peer(&node);
        join(&mut engine, &a, 0);
        join(&mut engine, &b, 0);
        engine.attempt_change();

        engine.handle_timeout(TimerEvent::VoteCleanup(QuorumSize::Three));
        assert!(engine.ledger.get(QuorumSize::Three).is_some());
    }

    #[tokio::test]
    async fn leave_is_accepted_and_ignored() {
        let node = Node::new("test");
        let (mut engine, _mailbox) = start_engine(&node);
        let a = start_peer(&node);
        join(&mut engine, &a, 0);

        let transition = engine.handle_protocol(ProtocolMessage::Leave {
            from: a.pid,
            quorum_id: GROUP.to_string(),
            state: 3,
        });

        assert_eq!(transition, None);
        assert!(engine.registry.contains(a.pid));
        assert_eq!(engine.quorum, Quorum::unknown());
    }
}
