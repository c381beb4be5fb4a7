//! Configuration options for the node.

use std::path::PathBuf;

use serde_derive::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Configuration {
    pub node: NodeConfig,
    pub cluster: ClusterConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NodeConfig {
    /// Name of the hosting node, used in logs.
    pub name: String,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ClusterConfig {
    /// Group name shared by all spawned processes. Processes only interact
    /// within one group.
    pub quorum_id: String,
    /// Number of processes to spawn.
    pub size: usize,
}

#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Configuration file does not exists: '{}'", .0)]
    FileDoesNotExist(String),
    #[error("{}", .0)]
    Other(String),
}

type Result<T> = std::result::Result<T, ConfigurationError>;

impl Configuration {
    pub fn try_load(path: PathBuf) -> Result<Configuration> {
        if !path.exists() {
            return Err(ConfigurationError::FileDoesNotExist(
                path.display().to_string(),
            ));
        }
        let config = config::Config::builder()
            .add_source(config::File::from(path))
            .build()
            .map_err(|e| ConfigurationError::Other(e.to_string()))?;

        config
            .try_deserialize()
            .map_err(|e| ConfigurationError::Other(e.to_string()))
    }
}
