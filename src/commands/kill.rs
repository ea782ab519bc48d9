//! Contains functionality of the kill command
use std::path::Path;

use anyhow::{Context, Result};
use clap::Clap;

use crate::container::ContainerRef;
use crate::signal;
use crate::status::StatusDirectory;

/// Send a signal to a container's init process
#[derive(Clap, Debug)]
pub struct Kill {
    #[clap(forbid_empty_values = true, required = true)]
    container_id: String,
    signal: String,
}

impl Kill {
    pub fn exec(&self, root_path: &Path) -> Result<()> {
        let signal = signal::from_str(&self.signal)
            .with_context(|| format!("signal {} is unknown", self.signal))?;

        let store = StatusDirectory::new(root_path)?;
        let container = ContainerRef::new(Box::new(store), &self.container_id);
        container.kill(signal)
    }
}
