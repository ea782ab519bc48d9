//! The process-wide log backend. The level comes from
//! `LINYAPS_BOX_LOG_LEVEL`; lines go to standard error, or to the file
//! named on the command line.

use std::env;
use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Mutex;

use anyhow::{Context, Result};
use log::{LevelFilter, Log, Metadata, Record};
use once_cell::sync::OnceCell;

static LOGGER: OnceCell<EngineLogger> = OnceCell::new();

struct EngineLogger {
    level: LevelFilter,
    sink: Option<Mutex<File>>,
}

/// Installs the logger. Level and sink are resolved once, up front; a
/// missing or unparseable level falls back to warnings only.
pub fn init(log_file: Option<PathBuf>) -> Result<()> {
    let level = env::var("LINYAPS_BOX_LOG_LEVEL")
        .ok()
        .and_then(|value| LevelFilter::from_str(&value).ok())
        .unwrap_or(LevelFilter::Warn);

    let sink = match log_file {
        Some(path) => {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&path)
                .with_context(|| format!("failed to open log file {:?}", path))?;
            Some(Mutex::new(file))
        }
        None => None,
    };

    let logger = LOGGER.get_or_init(|| EngineLogger { level, sink });
    log::set_logger(logger)
        .map(|()| log::set_max_level(logger.level))
        .context("a logger is already installed")?;
    Ok(())
}

impl EngineLogger {
    fn write_line(&self, line: &str) {
        match &self.sink {
            Some(file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = writeln!(file, "{}", line);
                }
            }
            None => {
                let _ = writeln!(io::stderr(), "{}", line);
            }
        }
    }
}

impl Log for EngineLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        self.write_line(&format!(
            "[{}] {} {}",
            record.level(),
            chrono::Local::now().to_rfc3339(),
            record.args()
        ));
    }

    fn flush(&self) {
        match &self.sink {
            Some(file) => {
                if let Ok(mut file) = file.lock() {
                    let _ = file.flush();
                }
            }
            None => {
                let _ = io::stderr().flush();
            }
        }
    }
}
