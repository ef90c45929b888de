//! EventState — the durable `{resource-id: "*"}` trigger map that makes a
//! bundle apply resumable after a crash.

use crate::error::{FuselageError, Result};
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// File name of the persisted trigger map, relative to `state_path`.
const STATE_FILE: &str = "events.saved";

#[derive(Debug)]
pub struct EventState {
    path: PathBuf,
    simulate: bool,
    triggers: RefCell<Option<BTreeMap<String, String>>>,
}

impl EventState {
    /// `open()`: validate the resume/no-resume instruction, clear the file
    /// under `--no-resume`, and otherwise leave it for lazy loading.
    pub fn open(state_dir: &Path, simulate: bool, resume: bool, no_resume: bool) -> Result<Self> {
        if resume && no_resume {
            return Err(FuselageError::ParseError(
                "--resume and --no-resume are mutually exclusive".to_string(),
            ));
        }

        if !simulate {
            std::fs::create_dir_all(state_dir).map_err(|e| {
                FuselageError::ExecutionError(format!(
                    "cannot create state directory {}: {e}",
                    state_dir.display()
                ))
            })?;
        }

        let path = state_dir.join(STATE_FILE);
        let exists = path.exists();

        if exists && !resume && !no_resume {
            return Err(FuselageError::SavedEventsAndNoInstruction);
        }

        if no_resume && exists {
            std::fs::remove_file(&path).map_err(|e| {
                FuselageError::ExecutionError(format!("cannot remove {}: {e}", path.display()))
            })?;
        }

        Ok(EventState {
            path,
            simulate,
            triggers: RefCell::new(None),
        })
    }

    fn load(&self) -> BTreeMap<String, String> {
        if let Some(ref cached) = *self.triggers.borrow() {
            return cached.clone();
        }
        let map = if self.path.exists() {
            std::fs::read_to_string(&self.path)
                .ok()
                .and_then(|s| serde_json::from_str(&s).ok())
                .unwrap_or_default()
        } else {
            BTreeMap::new()
        };
        *self.triggers.borrow_mut() = Some(map.clone());
        map
    }

    fn persist(&self, map: BTreeMap<String, String>) -> Result<()> {
        if !self.simulate {
            let json = serde_json::to_string_pretty(&map).map_err(|e| {
                FuselageError::ExecutionError(format!("cannot serialise event state: {e}"))
            })?;
            std::fs::write(&self.path, json).map_err(|e| {
                FuselageError::ExecutionError(format!(
                    "cannot write {}: {e}",
                    self.path.display()
                ))
            })?;
        }
        *self.triggers.borrow_mut() = Some(map);
        Ok(())
    }

    pub fn set_trigger(&self, resource_id: &str) -> Result<()> {
        let mut map = self.load();
        map.insert(resource_id.to_string(), "*".to_string());
        self.persist(map)
    }

    pub fn unset_trigger(&self, resource_id: &str) -> Result<()> {
        let mut map = self.load();
        if map.remove(resource_id).is_some() {
            self.persist(map)?;
        }
        Ok(())
    }

    pub fn is_trigger_set(&self, resource_id: &str) -> bool {
        self.load().contains_key(resource_id)
    }

    /// Remove the state file entirely: called once a bundle apply finishes
    /// without error.
    pub fn success(&self) -> Result<()> {
        *self.triggers.borrow_mut() = Some(BTreeMap::new());
        if self.path.exists() {
            std::fs::remove_file(&self.path).map_err(|e| {
                FuselageError::ExecutionError(format!(
                    "cannot remove {}: {e}",
                    self.path.display()
                ))
            })?;
        }
        Ok(())
    }
}
