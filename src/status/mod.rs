//! Persistence and presentation of container status records. The engine
//! only depends on these capabilities, not on the representation behind
//! them.

mod directory;
mod printer;

pub use directory::StatusDirectory;
pub use printer::{JsonPrinter, TablePrinter};

use anyhow::Result;

use crate::container::state::State;

/// Storage of one status record per container id.
pub trait StatusStore {
    fn write(&self, state: &State) -> Result<()>;
    fn read(&self, id: &str) -> Result<State>;
    fn remove(&self, id: &str) -> Result<()>;
    fn list(&self) -> Result<Vec<String>>;
}

/// Presentation of status records to the user.
pub trait StatusPrinter {
    fn print_statuses(&self, states: &[State]) -> Result<()>;
    fn print_status(&self, state: &State) -> Result<()>;
}
