//! Session-state file: the rotator's memory across restarts.

use std::fs;
use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::identity::SessionIdentity;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistedSession {
    pub identity: Option<SessionIdentity>,
    /// Ports that drew a block; skipped by port rotation.
    pub blocked_ports: Vec<u16>,
    pub request_count: u64,
    pub last_success_at: Option<DateTime<Utc>>,
    pub last_forced_rotation_at: Option<DateTime<Utc>>,
}

/// Load the state file. A missing or unreadable file yields a fresh state.
pub fn load(path: &Path) -> PersistedSession {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::debug!("no session state at {}, starting fresh", path.display());
            return PersistedSession::default();
        }
        Err(e) => {
            tracing::warn!("failed to read session state {}: {e}", path.display());
            return PersistedSession::default();
        }
    };

    match serde_json::from_slice(&data) {
        Ok(state) => state,
        Err(e) => {
            tracing::warn!(
                "ignoring corrupt session state {}: {e}",
                path.display()
            );
            PersistedSession::default()
        }
    }
}

/// Write the state file via temp file and rename.
pub fn save(path: &Path, state: &PersistedSession) -> Result<()> {
    crate::persist::write_json(path, state).context("failed to save session state")
}
