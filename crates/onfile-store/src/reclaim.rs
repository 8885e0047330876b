//! Directory reclamation
//!
//! Removes a directory tree that represents a logical storage object,
//! depth first, over a tree other processes may be mutating at the
//! same time. No locks are taken; every race is handled reactively by
//! classifying the errno. The recursion returns a tri-state outcome
//! rather than using errors for the common not-empty case:
//!
//! - `Removed`: the directory and all descendants are gone, or were
//!   already gone when we looked.
//! - `Blocked`: real content remains, a user file or a subdirectory
//!   explicitly stored as an object, which is opaque content and is
//!   never descended into. A normal result, not an error.
//! - `Err(_)`: an unexpected, non-racy filesystem failure.
//!
//! Temp artifacts left behind by in-progress writes are deleted on the
//! way; they are never user data.

use crate::obj::{MetaStore, dir_is_object};
use crate::xattrs::XattrBackend;
use nix::errno::Errno;
use onfile_common::error::{is_errno, is_path_gone};
use onfile_common::types::is_tmp_obj;
use onfile_common::{Error, Result, StoreConfig};
use std::fs;
use std::path::Path;
use tracing::debug;

/// Outcome of one directory's reclamation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Outcome {
    Removed,
    Blocked,
}

/// Result of one sweep over a directory's children
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Sweep {
    /// The directory itself vanished while enumerating
    Gone,
    /// Real content remains; the parent cannot be fully reclaimed
    Blocked,
    /// Every child was reclaimed or deleted
    Clean,
}

/// Reclaims directory trees, consulting the metadata store for the
/// object markers left on subdirectories
pub struct Reclaimer<'a, B> {
    meta: &'a MetaStore<B>,
    max_attempts: usize,
}

impl<'a, B: XattrBackend> Reclaimer<'a, B> {
    pub fn new(meta: &'a MetaStore<B>, config: &StoreConfig) -> Self {
        Self {
            meta,
            max_attempts: config.rmdir_retries.max(1),
        }
    }

    /// Remove `path` and everything under it.
    ///
    /// `Ok(true)` means the tree is fully gone, including the case
    /// where another remover already took it. `Ok(false)` means real
    /// content blocks reclamation and the blocking entries were left
    /// intact. Anything else is a fatal OS error with its original
    /// code attached.
    pub fn reclaim(&self, path: &Path) -> Result<bool> {
        Ok(self.reclaim_dir(path)? == Outcome::Removed)
    }

    fn reclaim_dir(&self, path: &Path) -> Result<Outcome> {
        // Fast path: an empty (or vanished) directory needs no sweep.
        if let Some(outcome) = try_rmdir(path)? {
            return Ok(outcome);
        }
        for _ in 0..self.max_attempts {
            match self.sweep(path)? {
                Sweep::Gone => return Ok(Outcome::Removed),
                Sweep::Blocked => return Ok(Outcome::Blocked),
                Sweep::Clean => {}
            }
            if let Some(outcome) = try_rmdir(path)? {
                return Ok(outcome);
            }
            // ENOTEMPTY again: something was created between the sweep
            // and the rmdir. Re-enumerate and try again.
            debug!(path = %path.display(), "directory refilled during reclaim, retrying");
        }
        Ok(Outcome::Blocked)
    }

    /// Enumerate `path` once, reclaiming subdirectories and deleting
    /// temp artifacts, and report whether anything real blocks removal
    fn sweep(&self, path: &Path) -> Result<Sweep> {
        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(err) if is_path_gone(&err) => return Ok(Sweep::Gone),
            Err(err) => return Err(Error::os("readdir", path.display().to_string(), err)),
        };

        let mut blocked = false;
        for entry in entries {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) if is_path_gone(&err) => continue,
                Err(err) => return Err(Error::os("readdir", path.display().to_string(), err)),
            };
            let child = entry.path();
            let file_type = match entry.file_type() {
                Ok(file_type) => file_type,
                Err(err) if is_path_gone(&err) => continue,
                Err(err) => return Err(Error::os("stat", child.display().to_string(), err)),
            };

            if file_type.is_dir() {
                // A vanished child reads as an empty record here; any
                // other metadata failure is fatal.
                let record = self.meta.read_metadata(child.as_path().into())?;
                if dir_is_object(&record) {
                    debug!(path = %child.display(), "subdirectory is a stored object, leaving intact");
                    blocked = true;
                    continue;
                }
                if self.reclaim_dir(&child)? == Outcome::Blocked {
                    blocked = true;
                }
            } else if is_tmp_obj(&child) {
                match fs::remove_file(&child) {
                    Ok(()) => {}
                    Err(err) if is_path_gone(&err) => {}
                    Err(err) => return Err(Error::os("unlink", child.display().to_string(), err)),
                }
            } else {
                blocked = true;
            }
        }
        Ok(if blocked { Sweep::Blocked } else { Sweep::Clean })
    }
}

/// One rmdir attempt. `Some(outcome)` is terminal for this directory;
/// `None` means not empty, keep working.
fn try_rmdir(path: &Path) -> Result<Option<Outcome>> {
    match fs::remove_dir(path) {
        Ok(()) => Ok(Some(Outcome::Removed)),
        // Raced away by another remover: the goal state holds.
        Err(err) if is_path_gone(&err) => Ok(Some(Outcome::Removed)),
        Err(err) if is_errno(&err, Errno::ENOTEMPTY) => Ok(None),
        Err(err) => Err(Error::os("rmdir", path.display().to_string(), err)),
    }
}
