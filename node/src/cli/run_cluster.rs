use std::path::PathBuf;

use clap::Parser;
use log::info;

use crate::config::Configuration;
use crate::quorum::behaviour::{QuorumBehaviour, QuorumOptions, Status};
use crate::quorum::{process, QuorumSize};
use crate::runtime::node::{Node, ProcessRef};
use crate::runtime::Pid;

/// Spawns a local cluster of quorum processes and logs every quorum
/// transition until interrupted.
#[derive(Debug, Clone, Parser)]
pub struct RunClusterCmd {
    /// Configuration file; overrides the flags below.
    #[clap(short, long)]
    pub config_file: Option<String>,
    /// Number of processes to spawn.
    #[clap(short, long, default_value_t = 5)]
    pub size: usize,
    /// Group name shared by the processes.
    #[clap(short, long, default_value = "default")]
    pub quorum_id: String,
}

struct LoggingMember {
    quorum_id: String,
    peer: Option<Pid>,
    pid: Option<Pid>,
}

impl QuorumBehaviour for LoggingMember {
    fn init(&mut self, process: &ProcessRef) -> anyhow::Result<QuorumOptions> {
        self.pid = Some(process.pid());
        Ok(QuorumOptions {
            quorum_id: self.quorum_id.clone(),
            peer: self.peer,
            last_update: 0,
        })
    }

    fn handle_quorum_change(&mut self, new_state: QuorumSize) -> anyhow::Result<Status> {
        info!(
            "{}: quorum is now {new_state}",
            self.pid.expect("init ran")
        );
        Ok(Status::Ok)
    }
}

impl RunClusterCmd {
    pub async fn execute(&self) -> anyhow::Result<()> {
        let (size, quorum_id) = match &self.config_file {
            Some(file) => {
                let conf = Configuration::try_load(PathBuf::from(file))?;
                (conf.cluster.size, conf.cluster.quorum_id)
            }
            None => (self.size, self.quorum_id.clone()),
        };

        let node = Node::new("quorate");
        let mut processes: Vec<ProcessRef> = Vec::with_capacity(size);
        for _ in 0..size {
            let member = LoggingMember {
                quorum_id: quorum_id.clone(),
                peer: processes.first().map(ProcessRef::pid),
                pid: None,
            };
            processes.push(process::spawn(&node, member)?);
        }
        info!(
            "Started {} processes in group {:?}, ctrl-c to stop",
            processes.len(),
            quorum_id
        );

        tokio::signal::ctrl_c().await?;
        for process in &processes {
            process.stop();
        }
        Ok(())
    }
}
