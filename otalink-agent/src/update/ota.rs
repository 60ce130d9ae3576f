//! Release descriptor returned by the release service.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Artifact metadata key holding the byte offset of the A/B payload inside the package.
pub const PAYLOAD_OFFSET_KEY: &str = "_MFLT_PAYLOAD_OFFSET";

/// Artifact metadata key holding the byte size of the A/B payload.
pub const PAYLOAD_SIZE_KEY: &str = "_MFLT_PAYLOAD_SIZE";

/// Artifact metadata key holding the base64 SHA-256 digest of the package.
pub const FILE_HASH_KEY: &str = "FILE_HASH";

/// Release metadata key: devices built before this UTC timestamp (seconds) must update.
pub const MIN_BUILD_UTC_KEY: &str = "minBuildUtc";

/// An over-the-air update offered to this device.
///
/// Identity is the pair (`url`, `version`); the value is immutable once received.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ota {
    /// Where the package (or A/B payload container) can be fetched
    pub url: String,

    /// Software version the device reports after installing this release
    pub version: String,

    /// Human-readable release notes
    #[serde(default)]
    pub release_notes: String,

    /// Artifact metadata (payload offset/size, hashes, engine headers)
    #[serde(default)]
    pub artifact_metadata: BTreeMap<String, String>,

    /// Release-level metadata (e.g. `minBuildUtc`)
    #[serde(default)]
    pub release_metadata: BTreeMap<String, String>,

    /// Release flagged mandatory by the service. `None` means "not specified".
    #[serde(default)]
    pub is_forced: Option<bool>,
}

impl Ota {
    /// Create a release with no metadata and no forced flag.
    pub fn new(url: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            version: version.into(),
            release_notes: String::new(),
            artifact_metadata: BTreeMap::new(),
            release_metadata: BTreeMap::new(),
            is_forced: None,
        }
    }

    /// Whether two descriptors denote the same release.
    pub fn same_release(&self, other: &Ota) -> bool {
        self.url == other.url && self.version == other.version
    }

    /// Byte offset of the A/B payload, 0 when absent or malformed.
    pub fn payload_offset(&self) -> u64 {
        self.metadata_u64(PAYLOAD_OFFSET_KEY)
    }

    /// Byte size of the A/B payload, 0 when absent or malformed.
    pub fn payload_size(&self) -> u64 {
        self.metadata_u64(PAYLOAD_SIZE_KEY)
    }

    /// Artifact metadata as `KEY=VALUE` pairs, the form the update engine takes as headers.
    pub fn metadata_pairs(&self) -> Vec<String> {
        self.artifact_metadata
            .iter()
            .map(|(key, value)| format!("{}={}", key, value))
            .collect()
    }

    /// Expected SHA-256 digest of the package (base64), if the service sent one.
    pub fn file_hash(&self) -> Option<&str> {
        self.artifact_metadata
            .get(FILE_HASH_KEY)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }

    /// Minimum build timestamp required by this release, if any.
    pub fn min_build_utc(&self) -> Option<i64> {
        self.release_metadata
            .get(MIN_BUILD_UTC_KEY)
            .and_then(|v| v.trim().parse().ok())
    }

    fn metadata_u64(&self, key: &str) -> u64 {
        self.artifact_metadata
            .get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(0)
    }
}
