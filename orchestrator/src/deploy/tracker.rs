//! In-memory build tracker
//!
//! One entry per resource. An entry whose `exit_code` is `None` is a live
//! build; starting another one for the same resource is refused. Entries are
//! process-local; the persisted status is what survives a restart.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};

use crate::errors::DeployError;

/// Output kept per build, older bytes are dropped first
pub const MAX_OUTPUT_BYTES: usize = 256 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildEntry {
    pub started_at: DateTime<Utc>,
    pub output: String,
    pub exit_code: Option<i32>,
}

impl BuildEntry {
    fn new() -> Self {
        Self {
            started_at: Utc::now(),
            output: String::new(),
            exit_code: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.exit_code.is_none()
    }
}

/// Registry of builds keyed by resource name
#[derive(Debug, Default)]
pub struct BuildRegistry {
    entries: RwLock<HashMap<String, BuildEntry>>,
}

impl BuildRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a new entry, replacing a finished one. Fails if one is live.
    pub fn begin(&self, resource_name: &str) -> Result<(), DeployError> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if entries.get(resource_name).is_some_and(BuildEntry::is_running) {
            return Err(DeployError::Conflict(
                "a deploy is already in progress".to_string(),
            ));
        }
        entries.insert(resource_name.to_string(), BuildEntry::new());
        Ok(())
    }

    pub fn is_active(&self, resource_name: &str) -> bool {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries
            .get(resource_name)
            .is_some_and(BuildEntry::is_running)
    }

    pub fn get(&self, resource_name: &str) -> Option<BuildEntry> {
        let entries = self.entries.read().unwrap_or_else(|e| e.into_inner());
        entries.get(resource_name).cloned()
    }

    pub fn append(&self, resource_name: &str, chunk: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(resource_name) {
            entry.output.push_str(chunk);
            truncate_front(&mut entry.output, MAX_OUTPUT_BYTES);
        }
    }

    pub fn replace(&self, resource_name: &str, output: &str) {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        if let Some(entry) = entries.get_mut(resource_name) {
            entry.output = output.to_string();
            truncate_front(&mut entry.output, MAX_OUTPUT_BYTES);
        }
    }

    /// Close the entry. Returns the final output, `None` without an entry.
    pub fn finish(&self, resource_name: &str, exit_code: i32) -> Option<String> {
        let mut entries = self.entries.write().unwrap_or_else(|e| e.into_inner());
        entries.get_mut(resource_name).map(|entry| {
            entry.exit_code = Some(exit_code);
            entry.output.clone()
        })
    }
}

/// Drop bytes from the front until `text` fits, keeping a char boundary
fn truncate_front(text: &mut String, max: usize) {
    if text.len() <= max {
        return;
    }
    let mut cut = text.len() - max;
    while !text.is_char_boundary(cut) {
        cut += 1;
    }
    text.drain(..cut);
}
