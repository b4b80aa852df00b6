//! Source file identity used as the cache key seed

use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

/// Length of the hex digest at the start of every cache key
pub const DIGEST_LEN: usize = 64;

/// (absolute path, byte size, modification time) of a source file
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceIdentity {
    pub path: PathBuf,
    pub size: u64,
    pub modified: SystemTime,
}

impl SourceIdentity {
    /// Stat `path`. The path is canonicalized when possible.
    pub fn of(path: &Path) -> std::io::Result<Self> {
        let meta = std::fs::metadata(path)?;
        let path = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
        Ok(Self {
            path,
            size: meta.len(),
            modified: meta.modified()?,
        })
    }

    pub fn path_string(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    /// Hex SHA-256 over path, size and mtime (nanosecond resolution)
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.path_string().as_bytes());
        hasher.update(self.size.to_string().as_bytes());
        hasher.update(nanos_since_epoch(self.modified).to_string().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// `<digest><variant>`
    pub fn cache_key(&self, variant: &str) -> String {
        format!("{}{}", self.digest(), variant)
    }
}

/// Split a cache key into (digest, variant)
pub fn split_key(key: &str) -> Option<(&str, &str)> {
    if key.len() < DIGEST_LEN || !key.is_char_boundary(DIGEST_LEN) {
        return None;
    }
    Some(key.split_at(DIGEST_LEN))
}

fn nanos_since_epoch(t: SystemTime) -> u128 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos())
        .unwrap_or(0)
}

/// Seconds since the epoch as a float, the unit stored in the metadata index
pub fn unix_seconds(t: SystemTime) -> f64 {
    t.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn identity(size: u64, secs: u64) -> SourceIdentity {
        SourceIdentity {
            path: PathBuf::from("/art/poster.psd"),
            size,
            modified: UNIX_EPOCH + Duration::from_secs(secs),
        }
    }

    #[test]
    fn test_digest_is_stable() {
        assert_eq!(identity(10, 100).digest(), identity(10, 100).digest());
        assert_eq!(identity(10, 100).digest().len(), DIGEST_LEN);
    }

    #[test]
    fn test_digest_changes_with_size_and_mtime() {
        let base = identity(10, 100).digest();
        assert_ne!(base, identity(11, 100).digest());
        assert_ne!(base, identity(10, 101).digest());
    }

    #[test]
    fn test_cache_key_and_split() {
        let key = identity(1, 1).cache_key("_full");
        let (digest, variant) = split_key(&key).unwrap();
        assert_eq!(digest.len(), DIGEST_LEN);
        assert_eq!(variant, "_full");
        assert!(split_key("short").is_none());
    }

    #[test]
    fn test_identity_of_real_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.psd");
        std::fs::write(&path, b"8BPS").unwrap();

        let id = SourceIdentity::of(&path).unwrap();
        assert_eq!(id.size, 4);
        assert!(id.path.is_absolute());
    }
}
