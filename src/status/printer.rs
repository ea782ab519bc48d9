//! Status record presentation: JSON by default, a table for human eyes.

use std::io::{self, Write};

use anyhow::Result;
use chrono::{DateTime, Local, SecondsFormat};
use tabwriter::TabWriter;

use super::StatusPrinter;
use crate::container::state::State;

/// Pretty-printed JSON on standard output.
pub struct JsonPrinter;

impl StatusPrinter for JsonPrinter {
    fn print_statuses(&self, states: &[State]) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(states)?);
        Ok(())
    }

    fn print_status(&self, state: &State) -> Result<()> {
        println!("{}", serde_json::to_string_pretty(state)?);
        Ok(())
    }
}

/// Aligned table on standard output, in local time.
pub struct TablePrinter;

impl StatusPrinter for TablePrinter {
    fn print_statuses(&self, states: &[State]) -> Result<()> {
        let mut tab_writer = TabWriter::new(io::stdout());
        writeln!(tab_writer, "ID\tPID\tSTATUS\tBUNDLE\tCREATED\tOWNER")?;

        for state in states {
            let created: DateTime<Local> = DateTime::from(state.created);
            writeln!(
                tab_writer,
                "{}\t{}\t{}\t{}\t{}\t{}",
                state.id,
                state.pid,
                state.status,
                state.bundle.display(),
                created.to_rfc3339_opts(SecondsFormat::Secs, false),
                state.owner
            )?;
        }

        tab_writer.flush()?;
        Ok(())
    }

    fn print_status(&self, state: &State) -> Result<()> {
        self.print_statuses(std::slice::from_ref(state))
    }
}
