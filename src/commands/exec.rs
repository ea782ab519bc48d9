//! Contains functionality of the exec command
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Clap;
use nix::unistd;

use crate::config::Process;
use crate::container::ContainerRef;
use crate::status::StatusDirectory;

/// Execute a process inside an existing container
#[derive(Clap, Debug)]
pub struct Exec {
    /// working directory for the executed process
    #[clap(long, default_value = "/")]
    cwd: PathBuf,
    #[clap(forbid_empty_values = true, required = true)]
    container_id: String,
    /// command to execute
    #[clap(required = true)]
    command: Vec<String>,
}

impl Exec {
    /// Replaces this process on success; the return type exists for the
    /// error path only.
    pub fn exec(&self, root_path: &Path) -> Result<i32> {
        let store = StatusDirectory::new(root_path)?;
        let container = ContainerRef::new(Box::new(store), &self.container_id);

        let process = Process {
            args: self.command.clone(),
            env: HashMap::new(),
            cwd: self.cwd.clone(),
            uid: unistd::geteuid().as_raw(),
            gid: unistd::getegid().as_raw(),
            additional_gids: None,
        };

        container.exec(&process)?;
        unreachable!("exec returns only on failure");
    }
}
