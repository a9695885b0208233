//! SHA-256 content digests and their on-disk sharding.

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::ContentError;

/// Length of a hex-encoded SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

/// Hex-encoded SHA-256 digest of an object's bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentDigest(String);

impl ContentDigest {
    /// Digest the full byte content.
    #[must_use]
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hex::encode(hasher.finalize()))
    }

    /// Validate a hex digest string.
    ///
    /// # Errors
    ///
    /// Returns [`ContentError::InvalidDigest`] unless `value` is 64 lowercase hex characters.
    pub fn parse(value: &str) -> Result<Self, ContentError> {
        let valid = value.len() == DIGEST_HEX_LEN
            && value
                .bytes()
                .all(|byte| byte.is_ascii_digit() || (b'a'..=b'f').contains(&byte));
        if valid {
            Ok(Self(value.to_string()))
        } else {
            Err(ContentError::InvalidDigest {
                value: value.to_string(),
            })
        }
    }

    /// Hex string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Two-level shard directory (`ab/cd`) under `root`.
    #[must_use]
    pub fn shard_dir(&self, root: &Path) -> PathBuf {
        root.join(&self.0[0..2]).join(&self.0[2..4])
    }
}

impl fmt::Display for ContentDigest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for ContentDigest {
    type Err = ContentError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        Self::parse(value)
    }
}

impl TryFrom<String> for ContentDigest {
    type Error = ContentError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ContentDigest> for String {
    fn from(digest: ContentDigest) -> Self {
        digest.0
    }
}
