//! Metadata wire codec
//!
//! Records are written as JSON, the canonical order-independent format.
//! Reads additionally recognize the legacy pickled form when the store
//! is configured to, routing it through the restricted reader in
//! [`crate::pickle`]. Decoding never fails: anything that is not a
//! complete record in a recognized format comes back as an empty
//! record, which callers treat as "no metadata".

use crate::pickle;
use onfile_common::types::Metadata;
use onfile_common::{Error, Result, StoreConfig};
use tracing::{debug, warn};

/// Codec for the stored metadata payload
#[derive(Clone, Debug)]
pub struct MetadataCodec {
    read_pickled: bool,
}

impl MetadataCodec {
    /// Build a codec with the store's legacy-format policy
    #[must_use]
    pub const fn new(config: &StoreConfig) -> Self {
        Self {
            read_pickled: config.read_pickled_metadata,
        }
    }

    /// Encode a record in the canonical JSON format
    pub fn serialize(&self, record: &Metadata) -> Result<Vec<u8>> {
        serde_json::to_vec(record).map_err(|err| Error::Serialization(err.to_string()))
    }

    /// Decode a stored payload into a record.
    ///
    /// Returns an empty record for anything that does not decode as a
    /// complete record: unrecognized framing, malformed payloads,
    /// partial chunk reassemblies, and pickled payloads when the policy
    /// disallows them. An unsafe pickled payload also decodes to empty
    /// but is logged, since it may indicate a corrupted or adversarial
    /// store.
    #[must_use]
    pub fn deserialize(&self, payload: &[u8]) -> Metadata {
        if payload.starts_with(b"{") && payload.ends_with(b"}") {
            return match serde_json::from_slice(payload) {
                Ok(record) => record,
                Err(err) => {
                    debug!(%err, "discarding metadata payload that does not parse as json");
                    Metadata::new()
                }
            };
        }
        if payload.starts_with(b"\x80") && payload.ends_with(b".") && self.read_pickled {
            return match pickle::loads(payload) {
                Ok(record) => record,
                Err(err) if err.is_unsafe() => {
                    warn!(%err, "rejected unsafe pickled metadata payload");
                    Metadata::new()
                }
                Err(err) => {
                    debug!(%err, "discarding malformed pickled metadata payload");
                    Metadata::new()
                }
            };
        }
        Metadata::new()
    }
}
