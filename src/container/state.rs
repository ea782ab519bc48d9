//! The persisted status record and its lifecycle.

use std::collections::HashMap;
use std::fmt::Display;
use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use procfs::process::{ProcState, Process};
use serde::{Deserialize, Serialize};

/// Runtime status of a container. The variants are ordered: a record only
/// ever advances along creating → created → running → stopped.
#[derive(Serialize, Deserialize, Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Creating,
    Created,
    Running,
    Stopped,
}

impl Default for ContainerStatus {
    fn default() -> Self {
        ContainerStatus::Creating
    }
}

impl ContainerStatus {
    pub fn can_kill(&self) -> bool {
        matches!(self, ContainerStatus::Created | ContainerStatus::Running)
    }

    pub fn can_exec(&self) -> bool {
        matches!(self, ContainerStatus::Running)
    }
}

impl Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ContainerStatus::Creating => "creating",
            ContainerStatus::Created => "created",
            ContainerStatus::Running => "running",
            ContainerStatus::Stopped => "stopped",
        };
        name.fmt(f)
    }
}

/// One status record per container id. `pid` is zero until the container
/// process has been created.
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct State {
    pub id: String,
    pub pid: i32,
    pub status: ContainerStatus,
    pub bundle: PathBuf,
    pub created: DateTime<Utc>,
    pub owner: String,
    #[serde(default)]
    pub annotations: HashMap<String, String>,
}

impl State {
    pub fn new(id: &str, bundle: &Path, owner: String, annotations: HashMap<String, String>) -> Self {
        Self {
            id: id.to_string(),
            pid: 0,
            status: ContainerStatus::Creating,
            bundle: bundle.to_path_buf(),
            created: Utc::now(),
            owner,
            annotations,
        }
    }

    /// Moves the record forward; a backward transition is refused.
    pub fn advance(&mut self, status: ContainerStatus) -> Result<()> {
        if status < self.status {
            bail!(
                "container {} cannot transition from {} back to {}",
                self.id,
                self.status,
                status
            );
        }
        self.status = status;
        Ok(())
    }

    /// The status as observable right now: a recorded process that is gone
    /// or already a zombie means the container has stopped, whatever the
    /// record still says.
    pub fn effective_status(&self) -> ContainerStatus {
        if self.pid == 0 || self.status == ContainerStatus::Stopped {
            return self.status;
        }

        match Process::new(self.pid) {
            Ok(proc) => match proc.stat.state() {
                Ok(ProcState::Zombie) | Ok(ProcState::Dead) => ContainerStatus::Stopped,
                _ => self.status,
            },
            Err(_) => ContainerStatus::Stopped,
        }
    }
}
