//! Configuration for the OnFile metadata store
//!
//! The legacy-format policy is threaded into the codec at construction
//! time; there is no module-level mutable state.

use serde::{Deserialize, Serialize};

/// Store configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Permit decoding of legacy pickled metadata through the restricted
    /// reader. New writes always use the canonical JSON format.
    pub read_pickled_metadata: bool,
    /// Upper bound on rmdir retries while reclaiming a racy directory
    pub rmdir_retries: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            read_pickled_metadata: false,
            rmdir_retries: 10,
        }
    }
}
