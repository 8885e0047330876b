//! Metadata record types and naming constants for OnFile
//!
//! A metadata record is an ordered map of string keys to string or
//! integer values, attached to a filesystem entry through extended
//! attributes. The key names and sentinel values here are the wire
//! names and must not change.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Timestamp of the last content or metadata change
pub const X_TIMESTAMP: &str = "X-Timestamp";
/// MIME type of the object body
pub const X_CONTENT_TYPE: &str = "Content-Type";
/// Size of the object body in bytes
pub const X_CONTENT_LENGTH: &str = "Content-Length";
/// Content hash of the object body
pub const X_ETAG: &str = "ETag";
/// Record kind tag; always [`OBJECT`] for a valid record
pub const X_TYPE: &str = "X-Type";
/// Sub-type tag distinguishing files from the two directory kinds
pub const X_OBJECT_TYPE: &str = "X-Object-Type";

/// Sentinel value for [`X_TYPE`]
pub const OBJECT: &str = "Object";

/// [`X_OBJECT_TYPE`] value for a regular file
pub const FILE: &str = "file";
/// [`X_OBJECT_TYPE`] value for a directory that is not a storage object
pub const DIR_NON_OBJECT: &str = "dir_non_object";
/// [`X_OBJECT_TYPE`] value for a directory explicitly stored as an object
pub const DIR_OBJECT: &str = "dir_object";

/// Content type reported for directories
pub const DIR_TYPE: &str = "application/directory";
/// Content type reported for files without a declared type
pub const FILE_TYPE: &str = "application/octet-stream";

/// Keys a record must carry to be a valid object record
pub const REQUIRED_KEYS: [&str; 6] = [
    X_TIMESTAMP,
    X_CONTENT_TYPE,
    X_CONTENT_LENGTH,
    X_ETAG,
    X_TYPE,
    X_OBJECT_TYPE,
];

/// Name marker for transient entries created during in-progress writes
pub const TMP_OBJ_MARKER: &str = ".onfile.";

/// A single metadata value; records carry only strings and integers
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MetaValue {
    Int(i64),
    Str(String),
}

impl MetaValue {
    /// The value as an unsigned size, when it parses as one
    #[must_use]
    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Self::Int(n) => u64::try_from(*n).ok(),
            Self::Str(s) => s.parse().ok(),
        }
    }

    /// The value as a string slice, for string values
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s.as_str()),
            Self::Int(_) => None,
        }
    }
}

impl From<&str> for MetaValue {
    fn from(value: &str) -> Self {
        Self::Str(value.to_string())
    }
}

impl From<String> for MetaValue {
    fn from(value: String) -> Self {
        Self::Str(value)
    }
}

impl From<i64> for MetaValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<u64> for MetaValue {
    fn from(value: u64) -> Self {
        Self::Int(i64::try_from(value).unwrap_or(i64::MAX))
    }
}

/// An ordered metadata record
pub type Metadata = BTreeMap<String, MetaValue>;

/// Render a timestamp as the fixed-width wire form: seconds since the
/// epoch with five decimal places, zero padded to sixteen characters.
#[must_use]
pub fn normalize_timestamp(timestamp: f64) -> String {
    format!("{timestamp:016.5}")
}

/// Mint a fresh temp-artifact name
#[must_use]
pub fn tmp_obj_name() -> String {
    format!("{}{}", TMP_OBJ_MARKER, uuid::Uuid::new_v4().simple())
}

/// True when `path` names a transient entry rather than user data.
/// Matches the marker as a basename prefix or as a path segment prefix
/// anywhere in the path.
#[must_use]
pub fn is_tmp_obj(path: impl AsRef<Path>) -> bool {
    let raw = path.as_ref().to_string_lossy();
    raw.starts_with(TMP_OBJ_MARKER) || raw.contains(&format!("/{TMP_OBJ_MARKER}"))
}
