use log::{debug, error, info};
use tokio::sync::mpsc;

use crate::quorum::behaviour::{QuorumBehaviour, QuorumOptions, Status};
use crate::quorum::engine::QuorumEngine;
use crate::quorum::{ProtocolMessage, Quorum, QuorumSize, TimerEvent};
use crate::runtime::node::{Node, ProcessRef};
use crate::runtime::{Message, Pid, RuntimeError, Term};
use crate::utilities::time::QuorateTime;

/// Request answered by the process itself with its current [`Quorum`] view.
struct QuorumQuery;

impl ProcessRef {
    /// Current committed quorum view of the process.
    pub async fn quorum(&self) -> Result<Quorum, RuntimeError> {
        let reply = self
            .direct(Box::new(QuorumQuery))
            .await
            .map_err(|_| RuntimeError::NoReply)?;
        reply
            .and_then(|term| term.downcast::<Quorum>().ok())
            .map(|quorum| *quorum)
            .ok_or(RuntimeError::NoReply)
    }
}

/// Spawns a quorum process hosting `behaviour` on `node`.
///
/// Registration and `init` run synchronously; an init failure unregisters
/// the fresh Pid and surfaces the error. The process then handles messages
/// on its own task until the behaviour asks to stop, a callback fails, or
/// [`ProcessRef::stop`] is called.
pub fn spawn<B: QuorumBehaviour>(node: &Node, mut behaviour: B) -> anyhow::Result<ProcessRef> {
    let (pid, mailbox) = node.register();
    let process = ProcessRef::new(node.clone(), pid);
    let options = match behaviour.init(&process) {
        Ok(options) => options,
        Err(err) => {
            node.unregister(pid);
            return Err(err);
        }
    };
    let last_update = normalize_last_update(&options);
    let engine = QuorumEngine::new(node.clone(), pid, options.quorum_id.clone(), last_update);
    if let Some(peer) = options.peer {
        engine.bootstrap(peer);
    }
    debug!("{pid}: starting in group {:?}", options.quorum_id);

    let worker = Worker {
        node: node.clone(),
        pid,
        engine,
        behaviour,
        mailbox,
    };
    tokio::spawn(worker.run());
    Ok(process)
}

/// Clamps the advertised freshness into the past.
fn normalize_last_update(options: &QuorumOptions) -> i64 {
    let now = QuorateTime::now_secs();
    if options.last_update < 0 || options.last_update > now {
        0
    } else {
        options.last_update
    }
}

enum Flow {
    Continue,
    Stop,
}

struct Worker<B: QuorumBehaviour> {
    node: Node,
    pid: Pid,
    engine: QuorumEngine,
    behaviour: B,
    mailbox: mpsc::UnboundedReceiver<Message>,
}

impl<B: QuorumBehaviour> Worker<B> {
    async fn run(mut self) {
        while let Some(message) = self.mailbox.recv().await {
            match self.dispatch(message) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => break,
                Err(err) => {
                    error!("{}: callback failed: {err:?}", self.pid);
                    break;
                }
            }
        }
        self.node.unregister(self.pid);
        debug!("{} stopped", self.pid);
    }

    fn dispatch(&mut self, message: Message) -> anyhow::Result<Flow> {
        match message {
            Message::Cast(term) => self.dispatch_cast(term),
            Message::Info(term) => {
                let status = self.behaviour.handle_info(term)?;
                Ok(apply(self.pid, status))
            }
            Message::Down(down) => match self.engine.handle_down(down) {
                Ok(transition) => self.notify(transition),
                Err(down) => {
                    let status = self.behaviour.handle_info(Box::new(down))?;
                    Ok(apply(self.pid, status))
                }
            },
            Message::Call {
                from,
                request,
                reply,
            } => {
                let (response, status) = self.behaviour.handle_call(from, request)?;
                let _ = reply.send(response);
                Ok(apply(self.pid, status))
            }
            Message::Direct { request, reply } => {
                match request.downcast::<QuorumQuery>() {
                    Ok(_) => {
                        let quorum = self.engine.quorum().clone();
                        let _ = reply.send(Ok(Some(Box::new(quorum))));
                    }
                    Err(request) => {
                        let _ = reply.send(self.behaviour.handle_direct(request));
                    }
                }
                Ok(Flow::Continue)
            }
        }
    }

    /// Casts are classified before they reach the behaviour: protocol
    /// traffic and timer events belong to the engine.
    fn dispatch_cast(&mut self, term: Term) -> anyhow::Result<Flow> {
        let term = match term.downcast::<ProtocolMessage>() {
            Ok(protocol) => {
                let transition = self.engine.handle_protocol(*protocol);
                return self.notify(transition);
            }
            Err(term) => term,
        };
        let term = match term.downcast::<TimerEvent>() {
            Ok(event) => {
                let transition = self.engine.handle_timeout(*event);
                return self.notify(transition);
            }
            Err(term) => term,
        };
        match self.behaviour.handle_cast(term)? {
            Status::Unhandled(term) => {
                let status = self.behaviour.handle_info(term)?;
                Ok(apply(self.pid, status))
            }
            status => Ok(apply(self.pid, status)),
        }
    }

    /// Reports a committed transition through the quorum-change callback.
    fn notify(&mut self, transition: Option<QuorumSize>) -> anyhow::Result<Flow> {
        let Some(state) = transition else {
            return Ok(Flow::Continue);
        };
        let status = self.behaviour.handle_quorum_change(state)?;
        Ok(apply(self.pid, status))
    }
}

fn apply(pid: Pid, status: Status) -> Flow {
    match status {
        Status::Ok | Status::Unhandled(_) => Flow::Continue,
        Status::Stop => {
            info!("{pid}: behaviour requested stop");
            Flow::Stop
        }
    }
}
