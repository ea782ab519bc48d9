//! JSON status records, one `<id>.json` file per container.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use super::StatusStore;
use crate::container::state::State;

pub struct StatusDirectory {
    path: PathBuf,
}

impl StatusDirectory {
    /// Opens the directory, creating it when missing.
    pub fn new(path: &Path) -> Result<Self> {
        fs::create_dir_all(path)
            .with_context(|| format!("failed to create status directory {:?}", path))?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    fn record_path(&self, id: &str) -> PathBuf {
        self.path.join(format!("{}.json", id))
    }

    fn read_record(&self, path: &Path) -> Result<State> {
        let file = fs::File::open(path)
            .with_context(|| format!("failed to open status record {:?}", path))?;
        serde_json::from_reader(file)
            .with_context(|| format!("failed to decode status record {:?}", path))
    }
}

impl StatusStore for StatusDirectory {
    /// Records are replaced atomically: written to a temporary name in the
    /// same directory, then renamed over the target.
    fn write(&self, state: &State) -> Result<()> {
        let content = serde_json::to_vec(state).context("failed to encode status record")?;

        let target = self.record_path(&state.id);
        let temporary = self
            .path
            .join(format!(".{}.json.{:08x}", state.id, fastrand::u32(..)));

        fs::write(&temporary, &content)
            .with_context(|| format!("failed to write {:?}", temporary))?;
        fs::rename(&temporary, &target)
            .with_context(|| format!("failed to rename {:?} to {:?}", temporary, target))?;
        Ok(())
    }

    fn read(&self, id: &str) -> Result<State> {
        self.read_record(&self.record_path(id))
    }

    fn remove(&self, id: &str) -> Result<()> {
        let path = self.record_path(id);
        fs::remove_file(&path).with_context(|| format!("failed to remove {:?}", path))
    }

    /// Ids of every readable record. Entries without a `.json` extension
    /// are skipped; unreadable records are logged and skipped.
    fn list(&self) -> Result<Vec<String>> {
        let mut ids = Vec::new();

        for entry in fs::read_dir(&self.path)
            .with_context(|| format!("failed to read status directory {:?}", self.path))?
        {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    log::warn!("skipping unreadable directory entry: {}", err);
                    continue;
                }
            };

            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }

            match self.read_record(&path) {
                Ok(state) => ids.push(state.id),
                Err(err) => log::warn!("skipping {:?}: {:#}", path, err),
            }
        }

        Ok(ids)
    }
}
