//! Contains functionality of the run container command
use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Clap;

use crate::container::Container;
use crate::status::StatusDirectory;

/// Create and start a container, blocking until its payload exits
#[derive(Clap, Debug)]
pub struct Run {
    /// bundle directory containing config.json and the root filesystem
    #[clap(short, long, default_value = ".")]
    bundle: PathBuf,
    #[clap(forbid_empty_values = true, required = true)]
    container_id: String,
}

impl Run {
    /// Returns the payload exit code.
    pub fn exec(&self, root_path: &Path) -> Result<i32> {
        let store = StatusDirectory::new(root_path)?;
        let mut container = Container::create(Box::new(store), &self.container_id, &self.bundle)?;
        container.run()
    }
}
