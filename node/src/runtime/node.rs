use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use log::trace;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::runtime::{DownMessage, Message, MonitorRef, Pid, RuntimeError, Term};

struct MonitorEntry {
    owner: Pid,
    reference: MonitorRef,
}

struct ProcessEntry {
    sender: mpsc::UnboundedSender<Message>,
    /// Processes watching this one.
    monitors: Vec<MonitorEntry>,
}

struct NodeInner {
    name: String,
    next_pid: AtomicU64,
    processes: Mutex<HashMap<Pid, ProcessEntry>>,
}

/// The host of a set of local processes. Cheap to clone; all clones share
/// the same process table.
#[derive(Clone)]
pub struct Node {
    inner: Arc<NodeInner>,
}

impl Node {
    pub fn new(name: impl Into<String>) -> Node {
        Node {
            inner: Arc::new(NodeInner {
                name: name.into(),
                next_pid: AtomicU64::new(1),
                processes: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Allocates a fresh Pid and its mailbox.
    pub(crate) fn register(&self) -> (Pid, mpsc::UnboundedReceiver<Message>) {
        let pid = Pid::new(self.inner.next_pid.fetch_add(1, Ordering::Relaxed));
        let (sender, mailbox) = mpsc::unbounded_channel();
        let mut processes = self.inner.processes.lock().unwrap();
        processes.insert(
            pid,
            ProcessEntry {
                sender,
                monitors: vec![],
            },
        );
        (pid, mailbox)
    }

    /// Removes the process from the table and notifies everyone watching it.
    pub(crate) fn unregister(&self, pid: Pid) {
        let entry = self.inner.processes.lock().unwrap().remove(&pid);
        let Some(entry) = entry else {
            return;
        };
        for monitor in entry.monitors {
            self.route(
                monitor.owner,
                Message::Down(DownMessage {
                    pid,
                    reference: monitor.reference,
                }),
            );
        }
    }

    pub fn alive(&self, pid: Pid) -> bool {
        self.inner.processes.lock().unwrap().contains_key(&pid)
    }

    /// Enqueues a message; sends to a dead Pid are dropped.
    pub(crate) fn route(&self, to: Pid, message: Message) -> bool {
        let processes = self.inner.processes.lock().unwrap();
        match processes.get(&to) {
            Some(entry) => entry.sender.send(message).is_ok(),
            None => {
                trace!("dropping message to dead process {to}");
                false
            }
        }
    }

    pub fn cast(&self, to: Pid, term: Term) {
        self.route(to, Message::Cast(term));
    }

    pub fn send(&self, to: Pid, term: Term) {
        self.route(to, Message::Info(term));
    }

    /// Enqueues a cast after `delay`. The returned handle cancels the
    /// pending delivery, not an already-delivered one.
    pub fn cast_after(&self, to: Pid, term: Term, delay: Duration) -> TimerHandle {
        let node = self.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            node.cast(to, term);
        });
        TimerHandle { task }
    }

    /// Starts watching `target` on behalf of `owner`. Monitoring a dead
    /// process delivers the down notification immediately.
    pub(crate) fn monitor(&self, owner: Pid, target: Pid) -> MonitorRef {
        let reference = MonitorRef::new(target);
        let down = {
            let mut processes = self.inner.processes.lock().unwrap();
            match processes.get_mut(&target) {
                Some(entry) => {
                    entry.monitors.push(MonitorEntry {
                        owner,
                        reference: reference.clone(),
                    });
                    None
                }
                None => Some(DownMessage {
                    pid: target,
                    reference: reference.clone(),
                }),
            }
        };
        if let Some(down) = down {
            self.route(owner, Message::Down(down));
        }
        reference
    }

    /// Stops watching; idempotent.
    pub(crate) fn demonitor(&self, reference: &MonitorRef) {
        let mut processes = self.inner.processes.lock().unwrap();
        if let Some(entry) = processes.get_mut(&reference.target()) {
            entry.monitors.retain(|m| &m.reference != reference);
        }
    }
}

/// Handle to a pending delayed delivery.
pub struct TimerHandle {
    task: JoinHandle<()>,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.task.abort();
    }
}

/// Cheap-clone handle to a hosted process.
#[derive(Clone)]
pub struct ProcessRef {
    node: Node,
    pid: Pid,
}

impl ProcessRef {
    pub(crate) fn new(node: Node, pid: Pid) -> ProcessRef {
        ProcessRef { node, pid }
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn alive(&self) -> bool {
        self.node.alive(self.pid)
    }

    pub fn cast(&self, term: Term) {
        self.node.cast(self.pid, term);
    }

    pub fn send(&self, term: Term) {
        self.node.send(self.pid, term);
    }

    /// Synchronous request from another process; resolves with the reply.
    pub async fn call(&self, from: Pid, request: Term) -> Result<Option<Term>, RuntimeError> {
        let (tx, rx) = oneshot::channel();
        if !self.node.route(
            self.pid,
            Message::Call {
                from,
                request,
                reply: tx,
            },
        ) {
            return Err(RuntimeError::NotAlive(self.pid));
        }
        rx.await.map_err(|_| RuntimeError::NoReply)
    }

    /// Synchronous request from outside the process tree.
    pub async fn direct(&self, request: Term) -> anyhow::Result<Option<Term>> {
        let (tx, rx) = oneshot::channel();
        if !self.node.route(self.pid, Message::Direct { request, reply: tx }) {
            return Err(RuntimeError::NotAlive(self.pid).into());
        }
        rx.await.map_err(|_| RuntimeError::NoReply)?
    }

    /// Terminates the process. Monitors observing it fire.
    pub fn stop(&self) {
        self.node.unregister(self.pid);
    }
}
