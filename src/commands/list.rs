//! Contains functionality of the list containers command
use std::path::Path;

use anyhow::{bail, Result};
use clap::Clap;

use crate::status::{JsonPrinter, StatusDirectory, StatusPrinter, StatusStore, TablePrinter};

/// List the containers known to the status directory
#[derive(Clap, Debug)]
pub struct List {
    /// output format, json or table
    #[clap(short, long, default_value = "json")]
    format: String,
}

impl List {
    pub fn exec(&self, root_path: &Path) -> Result<()> {
        let printer: Box<dyn StatusPrinter> = match self.format.as_str() {
            "json" => Box::new(JsonPrinter),
            "table" => Box::new(TablePrinter),
            other => bail!("unknown list format {:?}", other),
        };

        let store = StatusDirectory::new(root_path)?;

        let mut states = Vec::new();
        for id in store.list()? {
            match store.read(&id) {
                Ok(mut state) => {
                    // reflect reality even if the supervising process has
                    // not written its final transition yet
                    state.status = state.effective_status();
                    states.push(state);
                }
                Err(err) => log::warn!("skipping container {}: {:#}", id, err),
            }
        }
        states.sort_by(|a, b| a.id.cmp(&b.id));

        printer.print_statuses(&states)
    }
}
