//! In-memory xattr backend for tests
//!
//! Keeps attributes in a map keyed by target and attribute name,
//! counts every raw operation, and injects errors on demand, so tests
//! can assert call counts and exercise the error paths without
//! depending on filesystem xattr support.

use crate::xattrs::{Target, XattrBackend};
use nix::errno::Errno;
use onfile_common::error::no_attr_errno;
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap};
use std::io;
use std::path::Path;

#[derive(Clone, Copy, Debug, Default)]
pub struct OpCounts {
    pub get: usize,
    pub set: usize,
    pub remove: usize,
}

#[derive(Default)]
pub struct MockXattr {
    attrs: RefCell<BTreeMap<String, Vec<u8>>>,
    ops: RefCell<OpCounts>,
    get_errors: RefCell<HashMap<String, Errno>>,
    set_errors: RefCell<HashMap<String, Errno>>,
    remove_errors: RefCell<HashMap<String, Errno>>,
}

fn attr_key(target: Target<'_>, key: &str) -> String {
    format!("{}:{}", target.describe(), key)
}

fn path_key(path: impl AsRef<Path>, key: &str) -> String {
    format!("{}:{}", path.as_ref().display(), key)
}

impl MockXattr {
    pub fn attr_count(&self) -> usize {
        self.attrs.borrow().len()
    }

    pub fn attr_sizes(&self) -> Vec<usize> {
        self.attrs.borrow().values().map(Vec::len).collect()
    }

    pub fn ops(&self) -> OpCounts {
        *self.ops.borrow()
    }

    pub fn raw_attr(&self, path: impl AsRef<Path>, key: &str) -> Option<Vec<u8>> {
        self.attrs.borrow().get(&path_key(path, key)).cloned()
    }

    pub fn set_raw_attr(&self, path: impl AsRef<Path>, key: &str, value: &[u8]) {
        self.attrs
            .borrow_mut()
            .insert(path_key(path, key), value.to_vec());
    }

    /// Drop one attribute behind the store's back, simulating a
    /// concurrent partial remove
    pub fn drop_attr(&self, path: impl AsRef<Path>, key: &str) {
        self.attrs.borrow_mut().remove(&path_key(path, key));
    }

    pub fn fail_get(&self, path: impl AsRef<Path>, key: &str, errno: Errno) {
        self.get_errors
            .borrow_mut()
            .insert(path_key(path, key), errno);
    }

    pub fn fail_set(&self, path: impl AsRef<Path>, key: &str, errno: Errno) {
        self.set_errors
            .borrow_mut()
            .insert(path_key(path, key), errno);
    }

    pub fn fail_remove(&self, path: impl AsRef<Path>, key: &str, errno: Errno) {
        self.remove_errors
            .borrow_mut()
            .insert(path_key(path, key), errno);
    }
}

impl XattrBackend for MockXattr {
    fn get(&self, target: Target<'_>, key: &str) -> io::Result<Vec<u8>> {
        self.ops.borrow_mut().get += 1;
        let xkey = attr_key(target, key);
        if let Some(errno) = self.get_errors.borrow().get(&xkey) {
            return Err(io::Error::from_raw_os_error(*errno as i32));
        }
        self.attrs
            .borrow()
            .get(&xkey)
            .cloned()
            .ok_or_else(|| io::Error::from_raw_os_error(no_attr_errno() as i32))
    }

    fn set(&self, target: Target<'_>, key: &str, value: &[u8]) -> io::Result<()> {
        self.ops.borrow_mut().set += 1;
        let xkey = attr_key(target, key);
        if let Some(errno) = self.set_errors.borrow().get(&xkey) {
            return Err(io::Error::from_raw_os_error(*errno as i32));
        }
        self.attrs.borrow_mut().insert(xkey, value.to_vec());
        Ok(())
    }

    fn remove(&self, target: Target<'_>, key: &str) -> io::Result<()> {
        self.ops.borrow_mut().remove += 1;
        let xkey = attr_key(target, key);
        if let Some(errno) = self.remove_errors.borrow().get(&xkey) {
            return Err(io::Error::from_raw_os_error(*errno as i32));
        }
        self.attrs
            .borrow_mut()
            .remove(&xkey)
            .map(|_| ())
            .ok_or_else(|| io::Error::from_raw_os_error(no_attr_errno() as i32))
    }
}
