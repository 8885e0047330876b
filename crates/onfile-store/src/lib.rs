//! OnFile Store - Xattr-backed object metadata
//!
//! This crate implements the metadata core for OnFile:
//! - Chunked extended-attribute storage for unbounded payloads
//! - JSON metadata codec with a restricted reader for legacy pickles
//! - Object metadata records (etag, size, timestamps, type tags)
//! - Safe reclamation of directories representing storage objects
//! - Atomic publication of serialized values via temp artifacts
//!
//! Everything here is single-node and synchronous; concurrent access
//! by other processes is tolerated by classifying error codes, never
//! by locking.

pub mod codec;
pub mod obj;
pub mod pickle;
pub mod publish;
pub mod reclaim;
pub mod xattrs;

#[cfg(test)]
pub(crate) mod mock;

// Re-exports
pub use codec::MetadataCodec;
pub use obj::{CHUNK_SIZE, MetaStore, dir_is_object, get_etag, validate_object};
pub use publish::write_persistent;
pub use reclaim::Reclaimer;
pub use xattrs::{ChunkStore, MAX_XATTR_SIZE, METADATA_KEY, SysXattr, Target, XattrBackend};
