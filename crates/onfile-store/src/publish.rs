//! Atomic publication of serialized values
//!
//! Writes a value to a temp artifact in the destination directory (or
//! a caller-chosen one on the same filesystem), fsyncs it, and renames
//! it into place, so readers only ever observe a complete file. The
//! temp name follows the reserved convention, so a crash mid-write
//! leaves an artifact the reclaimer recognizes and deletes.

use onfile_common::types::tmp_obj_name;
use onfile_common::{Error, Result};
use serde::Serialize;
use std::fs;
use std::io::Write;
use std::path::Path;

/// Serialize `value` as JSON and publish it at `dest` atomically.
/// `tmp_dir`, when given, must live on the same filesystem as `dest`.
pub fn write_persistent<T: Serialize>(value: &T, dest: &Path, tmp_dir: Option<&Path>) -> Result<()> {
    let parent = dest
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let tmp_path = tmp_dir.unwrap_or(parent).join(tmp_obj_name());

    let payload = serde_json::to_vec(value).map_err(|err| Error::Serialization(err.to_string()))?;
    let mut file = fs::File::create(&tmp_path)
        .map_err(|err| Error::os("create", tmp_path.display().to_string(), err))?;
    file.write_all(&payload)
        .map_err(|err| Error::os("write", tmp_path.display().to_string(), err))?;
    file.sync_all()
        .map_err(|err| Error::os("fsync", tmp_path.display().to_string(), err))?;
    drop(file);
    fs::rename(&tmp_path, dest).map_err(|err| Error::os("rename", dest.display().to_string(), err))
}
