//! Whole-file JSON persistence shared by the small state files.

use std::fs::{self, File};
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

/// Serialize `value` and replace `path` with it via a synced temp file and rename.
pub(crate) fn write_json(path: &Path, value: &impl Serialize) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create dir: {}", parent.display()))?;
    }

    let data = serde_json::to_vec_pretty(value)
        .with_context(|| format!("failed to serialize {}", path.display()))?;
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));

    let written = (|| -> Result<()> {
        let mut file = File::create(&tmp)
            .with_context(|| format!("failed to create temp file: {}", tmp.display()))?;
        file.write_all(&data)
            .with_context(|| format!("failed to write temp file: {}", tmp.display()))?;
        file.sync_all()
            .with_context(|| format!("failed to sync temp file: {}", tmp.display()))?;
        fs::rename(&tmp, path).with_context(|| format!("failed to write {}", path.display()))
    })();

    if written.is_err() {
        let _ = fs::remove_file(&tmp);
    }
    written
}
