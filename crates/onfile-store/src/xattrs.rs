//! Chunked extended-attribute storage
//!
//! Filesystems bound the size of one attribute value, so an unbounded
//! metadata payload is split across an ordered sequence of attribute
//! slots: slot 0 is the base key, slot i > 0 appends the decimal index.
//! Reassembly concatenates slots in ascending order and stops at the
//! first missing slot, which is the single termination rule for load
//! and remove alike.

use onfile_common::error::{is_no_attr, is_path_gone, no_attr_errno};
use onfile_common::{Error, Result};
use std::borrow::Cow;
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::Path;
use xattr::FileExt;

/// Base attribute key for object metadata; overflow slots append the
/// zero-based chunk index
pub const METADATA_KEY: &str = "user.onfile.metadata";

/// Maximum bytes stored in one attribute slot
pub const MAX_XATTR_SIZE: usize = 64 * 1024;

/// A filesystem entry attributes are attached to: a path, or an open
/// descriptor for callers that already hold the object file
#[derive(Clone, Copy)]
pub enum Target<'a> {
    Path(&'a Path),
    File(&'a File),
}

impl Target<'_> {
    /// Human-readable form for error messages
    #[must_use]
    pub fn describe(&self) -> String {
        match self {
            Self::Path(path) => path.display().to_string(),
            Self::File(file) => format!("fd {}", file.as_raw_fd()),
        }
    }
}

impl<'a> From<&'a Path> for Target<'a> {
    fn from(path: &'a Path) -> Self {
        Self::Path(path)
    }
}

impl<'a> From<&'a File> for Target<'a> {
    fn from(file: &'a File) -> Self {
        Self::File(file)
    }
}

/// Raw attribute operations, separated so tests can substitute an
/// in-memory attribute table with fault injection
pub trait XattrBackend {
    fn get(&self, target: Target<'_>, key: &str) -> io::Result<Vec<u8>>;
    fn set(&self, target: Target<'_>, key: &str, value: &[u8]) -> io::Result<()>;
    fn remove(&self, target: Target<'_>, key: &str) -> io::Result<()>;
}

impl<B: XattrBackend + ?Sized> XattrBackend for &B {
    fn get(&self, target: Target<'_>, key: &str) -> io::Result<Vec<u8>> {
        (**self).get(target, key)
    }

    fn set(&self, target: Target<'_>, key: &str, value: &[u8]) -> io::Result<()> {
        (**self).set(target, key, value)
    }

    fn remove(&self, target: Target<'_>, key: &str) -> io::Result<()> {
        (**self).remove(target, key)
    }
}

/// Backend speaking to the real filesystem through the xattr syscalls
#[derive(Clone, Copy, Debug, Default)]
pub struct SysXattr;

impl SysXattr {
    /// Run a descriptor operation, retrying once on a freshly duplicated
    /// descriptor if the original was invalidated underneath us. The
    /// duplicate is closed when it goes out of scope.
    fn with_fd_retry<T>(file: &File, op: impl Fn(&File) -> io::Result<T>) -> io::Result<T> {
        match op(file) {
            Err(err) if err.raw_os_error() == Some(nix::errno::Errno::EBADF as i32) => {
                let dup = file.try_clone()?;
                op(&dup)
            }
            other => other,
        }
    }
}

impl XattrBackend for SysXattr {
    fn get(&self, target: Target<'_>, key: &str) -> io::Result<Vec<u8>> {
        let found = match target {
            Target::Path(path) => xattr::get(path, key)?,
            Target::File(file) => Self::with_fd_retry(file, |f| f.get_xattr(key))?,
        };
        // The crate folds the missing-attribute errno into None; restore
        // it so every backend reports absence the same way.
        found.ok_or_else(|| io::Error::from_raw_os_error(no_attr_errno() as i32))
    }

    fn set(&self, target: Target<'_>, key: &str, value: &[u8]) -> io::Result<()> {
        match target {
            Target::Path(path) => xattr::set(path, key, value),
            Target::File(file) => Self::with_fd_retry(file, |f| f.set_xattr(key, value)),
        }
    }

    fn remove(&self, target: Target<'_>, key: &str) -> io::Result<()> {
        match target {
            Target::Path(path) => xattr::remove(path, key),
            Target::File(file) => Self::with_fd_retry(file, |f| f.remove_xattr(key)),
        }
    }
}

/// True for the error codes that terminate a slot scan: the attribute
/// is missing, or the entry itself vanished
fn is_missing(err: &io::Error) -> bool {
    is_no_attr(err) || is_path_gone(err)
}

/// Stores one logical payload as a sequence of bounded attribute slots
#[derive(Clone, Copy, Debug, Default)]
pub struct ChunkStore<B = SysXattr> {
    backend: B,
}

impl<B: XattrBackend> ChunkStore<B> {
    pub const fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Attribute key for the slot at `index`
    fn slot_key(base_key: &str, index: usize) -> Cow<'_, str> {
        if index == 0 {
            Cow::Borrowed(base_key)
        } else {
            Cow::Owned(format!("{base_key}{index}"))
        }
    }

    /// Write `payload` across ascending slots, one attribute write per
    /// slot. ENOSPC and EDQUOT surface as [`Error::NoSpace`]; any other
    /// failure propagates with its original code. Slots already written
    /// stay in place; there is no rollback.
    pub fn store(&self, target: Target<'_>, base_key: &str, payload: &[u8]) -> Result<()> {
        for (index, chunk) in payload.chunks(MAX_XATTR_SIZE).enumerate() {
            let key = Self::slot_key(base_key, index);
            self.backend.set(target, &key, chunk).map_err(|err| {
                if matches!(
                    err.raw_os_error().map(nix::errno::Errno::from_raw),
                    Some(nix::errno::Errno::ENOSPC | nix::errno::Errno::EDQUOT)
                ) {
                    Error::NoSpace {
                        target: target.describe(),
                        source: err,
                    }
                } else {
                    Error::os("setxattr", target.describe(), err)
                }
            })?;
        }
        Ok(())
    }

    /// Read ascending slots and concatenate until one is missing. No
    /// slots at all gives an empty payload without error. A chunk set
    /// truncated by a concurrent remover comes back partial; the decode
    /// layer discards it as empty.
    pub fn load(&self, target: Target<'_>, base_key: &str) -> Result<Vec<u8>> {
        let mut payload = Vec::new();
        for index in 0.. {
            let key = Self::slot_key(base_key, index);
            match self.backend.get(target, &key) {
                Ok(chunk) => payload.extend_from_slice(&chunk),
                Err(err) if is_missing(&err) => break,
                Err(err) => return Err(Error::os("getxattr", target.describe(), err)),
            }
        }
        Ok(payload)
    }

    /// Delete ascending slots until one is already missing, at which
    /// point removal is complete. Any other failure propagates and
    /// halts further deletion.
    pub fn remove(&self, target: Target<'_>, base_key: &str) -> Result<()> {
        for index in 0.. {
            let key = Self::slot_key(base_key, index);
            match self.backend.remove(target, &key) {
                Ok(()) => {}
                Err(err) if is_missing(&err) => break,
                Err(err) => return Err(Error::os("removexattr", target.describe(), err)),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockXattr;
    use nix::errno::Errno;

    #[test]
    fn test_slot_keys() {
        assert_eq!(ChunkStore::<SysXattr>::slot_key(METADATA_KEY, 0), METADATA_KEY);
        assert_eq!(
            ChunkStore::<SysXattr>::slot_key(METADATA_KEY, 2),
            "user.onfile.metadata2"
        );
    }

    #[test]
    fn test_store_single_slot() {
        let backend = MockXattr::default();
        let store = ChunkStore::new(&backend);
        let path = Path::new("/srv/node/a/o");

        store.store(path.into(), METADATA_KEY, b"payload").unwrap();
        assert_eq!(backend.attr_count(), 1);
        assert_eq!(backend.ops().set, 1);
        assert_eq!(store.load(path.into(), METADATA_KEY).unwrap(), b"payload");
    }

    #[test]
    fn test_store_splits_large_payload() {
        let backend = MockXattr::default();
        let store = ChunkStore::new(&backend);
        let path = Path::new("/srv/node/a/o");
        let payload = vec![b'x'; 150_000];

        store.store(path.into(), METADATA_KEY, &payload).unwrap();
        // ceil(150000 / 65536) slots
        assert_eq!(backend.attr_count(), 3);
        assert_eq!(backend.ops().set, 3);
        assert!(backend.attr_sizes().iter().all(|len| *len <= MAX_XATTR_SIZE));

        let loaded = store.load(path.into(), METADATA_KEY).unwrap();
        assert_eq!(loaded, payload);
        // one get per slot plus the terminating miss
        assert_eq!(backend.ops().get, 4);
    }

    #[test]
    fn test_load_absent_is_empty() {
        let backend = MockXattr::default();
        let store = ChunkStore::new(&backend);

        let payload = store
            .load(Path::new("/srv/node/a/bare").into(), METADATA_KEY)
            .unwrap();
        assert!(payload.is_empty());
        assert_eq!(backend.ops().get, 1);
    }

    #[test]
    fn test_load_truncated_chunk_set_is_partial() {
        let backend = MockXattr::default();
        let store = ChunkStore::new(&backend);
        let path = Path::new("/srv/node/a/o");
        let payload = vec![b'y'; 150_000];

        store.store(path.into(), METADATA_KEY, &payload).unwrap();
        // a concurrent remover took the middle slot
        backend.drop_attr(path, "user.onfile.metadata1");

        let loaded = store.load(path.into(), METADATA_KEY).unwrap();
        assert_eq!(loaded.len(), MAX_XATTR_SIZE);
    }

    #[test]
    fn test_remove_probes_one_past_end() {
        let backend = MockXattr::default();
        let store = ChunkStore::new(&backend);
        let path = Path::new("/srv/node/a/o");

        store
            .store(path.into(), METADATA_KEY, &vec![b'z'; 150_000])
            .unwrap();
        store.remove(path.into(), METADATA_KEY).unwrap();
        assert_eq!(backend.attr_count(), 0);
        // one remove per stored slot, plus the miss that stops the scan
        assert_eq!(backend.ops().remove, 4);
    }

    #[test]
    fn test_store_maps_enospc() {
        let backend = MockXattr::default();
        backend.fail_set("/srv/node/a/o", METADATA_KEY, Errno::ENOSPC);
        let store = ChunkStore::new(&backend);

        let err = store
            .store(Path::new("/srv/node/a/o").into(), METADATA_KEY, b"x")
            .unwrap_err();
        assert!(matches!(err, Error::NoSpace { .. }));
    }

    #[test]
    fn test_store_propagates_other_errors() {
        let backend = MockXattr::default();
        backend.fail_set("/srv/node/a/o", METADATA_KEY, Errno::EOPNOTSUPP);
        let store = ChunkStore::new(&backend);

        let err = store
            .store(Path::new("/srv/node/a/o").into(), METADATA_KEY, b"x")
            .unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EOPNOTSUPP as i32));
        assert_eq!(backend.ops().set, 1);
        assert_eq!(backend.attr_count(), 0);
    }

    #[test]
    fn test_remove_halts_on_unexpected_error() {
        let backend = MockXattr::default();
        let store = ChunkStore::new(&backend);
        let path = Path::new("/srv/node/a/o");

        store.store(path.into(), METADATA_KEY, b"x").unwrap();
        backend.fail_remove("/srv/node/a/o", METADATA_KEY, Errno::EOPNOTSUPP);

        let err = store.remove(path.into(), METADATA_KEY).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EOPNOTSUPP as i32));
        assert_eq!(backend.ops().remove, 1);
    }

    #[test]
    fn test_load_propagates_other_errors() {
        let backend = MockXattr::default();
        let store = ChunkStore::new(&backend);
        let path = Path::new("/srv/node/a/o");

        store.store(path.into(), METADATA_KEY, b"x").unwrap();
        backend.fail_get("/srv/node/a/o", METADATA_KEY, Errno::EOPNOTSUPP);

        let err = store.load(path.into(), METADATA_KEY).unwrap_err();
        assert_eq!(err.errno(), Some(Errno::EOPNOTSUPP as i32));
    }
}
