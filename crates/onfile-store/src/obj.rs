//! Object metadata manager
//!
//! Builds, persists, validates, and reconciles the canonical metadata
//! record for a filesystem object (a regular file or a directory)
//! using the codec and the chunked xattr store. The record carries the
//! object's timestamp, content type, length, etag, and type tags.

use crate::codec::MetadataCodec;
use crate::xattrs::{ChunkStore, METADATA_KEY, SysXattr, Target, XattrBackend};
use onfile_common::types::{
    DIR_NON_OBJECT, DIR_OBJECT, DIR_TYPE, FILE, FILE_TYPE, MetaValue, Metadata, OBJECT,
    REQUIRED_KEYS, X_CONTENT_LENGTH, X_CONTENT_TYPE, X_ETAG, X_OBJECT_TYPE, X_TIMESTAMP, X_TYPE,
    normalize_timestamp,
};
use onfile_common::{Error, Result, StoreConfig};
use std::fs;
use std::io::{Read, Seek, SeekFrom};
use std::os::unix::fs::MetadataExt;

/// Read granularity for content hashing
pub const CHUNK_SIZE: usize = 64 * 1024;

/// Metadata store for filesystem objects
#[derive(Clone, Debug)]
pub struct MetaStore<B = SysXattr> {
    chunks: ChunkStore<B>,
    codec: MetadataCodec,
}

impl MetaStore<SysXattr> {
    #[must_use]
    pub fn new(config: &StoreConfig) -> Self {
        Self::with_backend(config, SysXattr)
    }
}

impl<B: XattrBackend> MetaStore<B> {
    pub fn with_backend(config: &StoreConfig, backend: B) -> Self {
        Self {
            chunks: ChunkStore::new(backend),
            codec: MetadataCodec::new(config),
        }
    }

    /// Serialize `record` and persist it under the metadata key.
    /// Out-of-space failures surface as [`Error::NoSpace`].
    pub fn write_metadata(&self, target: Target<'_>, record: &Metadata) -> Result<()> {
        let payload = self.codec.serialize(record)?;
        self.chunks.store(target, METADATA_KEY, &payload)
    }

    /// Load and decode the record attached to `target`. A target with
    /// no stored metadata, or one whose payload does not decode as a
    /// complete record, yields an empty record; other failures
    /// propagate with their original code.
    pub fn read_metadata(&self, target: Target<'_>) -> Result<Metadata> {
        let payload = self.chunks.load(target, METADATA_KEY)?;
        Ok(self.codec.deserialize(&payload))
    }

    /// Remove every metadata slot attached to `target`
    pub fn clean_metadata(&self, target: Target<'_>) -> Result<()> {
        self.chunks.remove(target, METADATA_KEY)
    }

    /// Apply `updates` on top of `current` and persist the result,
    /// short-circuiting when nothing changes and `current` is already
    /// on disk. Updated keys win over same-named existing keys.
    pub fn restore_metadata(
        &self,
        target: Target<'_>,
        updates: Metadata,
        current: &Metadata,
    ) -> Result<Metadata> {
        let mut merged = current.clone();
        merged.extend(updates);
        if current.is_empty() || merged != *current {
            self.write_metadata(target, &merged)?;
        }
        Ok(merged)
    }

    /// Stat `target` and build a fresh record for it. A vanished target
    /// raises the typed OS error; [`Self::create_object_metadata`] is
    /// the lenient wrapper.
    pub fn get_object_metadata(&self, target: Target<'_>) -> Result<Metadata> {
        let st = match target {
            Target::Path(path) => fs::metadata(path),
            Target::File(file) => file.metadata(),
        }
        .map_err(|err| Error::os("stat", target.describe(), err))?;

        let timestamp = normalize_timestamp(ctime_seconds(&st));
        let mut record = Metadata::new();
        if st.is_dir() {
            record.insert(X_CONTENT_LENGTH.to_string(), MetaValue::Int(0));
            record.insert(X_CONTENT_TYPE.to_string(), MetaValue::from(DIR_TYPE));
            record.insert(X_OBJECT_TYPE.to_string(), MetaValue::from(DIR_NON_OBJECT));
            record.insert(X_ETAG.to_string(), MetaValue::Str(empty_etag()));
        } else {
            record.insert(X_CONTENT_LENGTH.to_string(), MetaValue::from(st.size()));
            record.insert(X_CONTENT_TYPE.to_string(), MetaValue::from(FILE_TYPE));
            record.insert(X_OBJECT_TYPE.to_string(), MetaValue::from(FILE));
            record.insert(X_ETAG.to_string(), MetaValue::Str(get_etag(target)?));
        }
        record.insert(X_TIMESTAMP.to_string(), MetaValue::Str(timestamp));
        record.insert(X_TYPE.to_string(), MetaValue::from(OBJECT));
        Ok(record)
    }

    /// Build and persist a fresh record for `target`, returning what
    /// was written. A target that no longer exists yields an empty
    /// record and writes nothing.
    pub fn create_object_metadata(&self, target: Target<'_>) -> Result<Metadata> {
        match self.get_object_metadata(target) {
            Ok(record) => {
                self.write_metadata(target, &record)?;
                Ok(record)
            }
            Err(err) if err.is_not_found() => Ok(Metadata::new()),
            Err(err) => Err(err),
        }
    }
}

/// Seconds-precision ctime of a stat result, with nanoseconds folded in
fn ctime_seconds(st: &fs::Metadata) -> f64 {
    st.ctime() as f64 + st.ctime_nsec() as f64 / 1e9
}

/// Hex digest of the empty input
fn empty_etag() -> String {
    format!("{:x}", md5::compute(b""))
}

/// Content hash of `target`, streamed in [`CHUNK_SIZE`] reads so the
/// whole file never has to fit in memory. A missing target hashes as
/// the empty input. Descriptor targets are read through a duplicated
/// descriptor, which shares the file offset, so the shared offset is
/// parked back at the start for the caller afterwards.
pub fn get_etag(target: Target<'_>) -> Result<String> {
    match target {
        Target::Path(path) => match fs::File::open(path) {
            Ok(file) => {
                read_for_etag(&file).map_err(|err| Error::os("read", target.describe(), err))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(empty_etag()),
            Err(err) => Err(Error::os("open", target.describe(), err)),
        },
        Target::File(file) => {
            let dup = file
                .try_clone()
                .map_err(|err| Error::os("dup", target.describe(), err))?;
            let etag =
                read_for_etag(&dup).map_err(|err| Error::os("read", target.describe(), err))?;
            drop(dup);
            (&*file)
                .seek(SeekFrom::Start(0))
                .map_err(|err| Error::os("lseek", target.describe(), err))?;
            Ok(etag)
        }
    }
}

fn read_for_etag(mut reader: impl Read) -> std::io::Result<String> {
    let mut context = md5::Context::new();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        context.consume(&buf[..n]);
    }
    Ok(format!("{:x}", context.compute()))
}

/// True when `record` is a complete, correctly tagged object record.
/// With a stat result, additionally requires the directory bit to agree
/// with the subtype tag and, for files, the exact size to match.
#[must_use]
pub fn validate_object(record: &Metadata, st: Option<&fs::Metadata>) -> bool {
    if REQUIRED_KEYS.iter().any(|key| !record.contains_key(*key)) {
        return false;
    }
    if record.get(X_TYPE).and_then(MetaValue::as_str) != Some(OBJECT) {
        return false;
    }
    if let Some(st) = st {
        match record.get(X_OBJECT_TYPE).and_then(MetaValue::as_str) {
            Some(DIR_NON_OBJECT | DIR_OBJECT) => {
                if !st.is_dir() {
                    return false;
                }
            }
            _ => {
                if st.is_dir() {
                    return false;
                }
                if record.get(X_CONTENT_LENGTH).and_then(MetaValue::as_u64) != Some(st.len()) {
                    return false;
                }
            }
        }
    }
    true
}

/// True when `record` tags its directory as a stored object, which
/// makes the directory opaque to reclamation
#[must_use]
pub fn dir_is_object(record: &Metadata) -> bool {
    record.get(X_OBJECT_TYPE).and_then(MetaValue::as_str) == Some(DIR_OBJECT)
}
