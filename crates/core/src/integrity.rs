//! Streaming content hashing for downloaded originals.
//!
//! The digest doubles as the tile storage key, so the algorithm must stay
//! fixed for the lifetime of a store.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha1::Sha1;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs::File;
use tokio::io::{AsyncReadExt, BufReader};

/// Size of each read while hashing.
pub const HASH_BLOCK_SIZE: usize = 65536;

#[derive(Debug, Error)]
pub enum IntegrityError {
    #[error("Cannot open {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed reading {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Digest used for checksums.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    /// 40 hex characters.
    #[default]
    Sha1,
    /// 64 hex characters.
    Sha256,
    /// 32 hex characters.
    Md5,
}

impl ChecksumAlgorithm {
    pub fn hex_len(&self) -> usize {
        match self {
            ChecksumAlgorithm::Sha1 => 40,
            ChecksumAlgorithm::Sha256 => 64,
            ChecksumAlgorithm::Md5 => 32,
        }
    }
}

enum Hasher {
    Sha1(Sha1),
    Sha256(Sha256),
    Md5(md5::Context),
}

impl Hasher {
    fn new(algorithm: ChecksumAlgorithm) -> Self {
        match algorithm {
            ChecksumAlgorithm::Sha1 => Hasher::Sha1(Sha1::new()),
            ChecksumAlgorithm::Sha256 => Hasher::Sha256(Sha256::new()),
            ChecksumAlgorithm::Md5 => Hasher::Md5(md5::Context::new()),
        }
    }

    fn update(&mut self, data: &[u8]) {
        match self {
            Hasher::Sha1(h) => h.update(data),
            Hasher::Sha256(h) => h.update(data),
            Hasher::Md5(c) => c.consume(data),
        }
    }

    fn finish(self) -> String {
        match self {
            Hasher::Sha1(h) => format!("{:x}", h.finalize()),
            Hasher::Sha256(h) => format!("{:x}", h.finalize()),
            Hasher::Md5(c) => format!("{:x}", c.compute()),
        }
    }
}

/// Hashes a file in [`HASH_BLOCK_SIZE`] blocks and returns the lowercase hex digest.
///
/// Links are followed, so a deduplicated original hashes to the same value
/// as the file it points at.
pub async fn compute_checksum(
    path: &Path,
    algorithm: ChecksumAlgorithm,
) -> Result<String, IntegrityError> {
    let file = File::open(path).await.map_err(|e| IntegrityError::Open {
        path: path.to_path_buf(),
        source: e,
    })?;

    let mut reader = BufReader::with_capacity(HASH_BLOCK_SIZE, file);
    let mut buffer = vec![0u8; HASH_BLOCK_SIZE];
    let mut hasher = Hasher::new(algorithm);

    loop {
        let bytes_read = reader
            .read(&mut buffer)
            .await
            .map_err(|e| IntegrityError::Read {
                path: path.to_path_buf(),
                source: e,
            })?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_sha1_of_known_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        let digest = compute_checksum(&path, ChecksumAlgorithm::Sha1).await.unwrap();
        assert_eq!(digest, "2aae6c35c94fcfb415dbe95f408b9ce91ee846ed");
        assert_eq!(digest.len(), ChecksumAlgorithm::Sha1.hex_len());
    }

    #[tokio::test]
    async fn test_sha256_and_md5_of_known_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("hello.txt");
        tokio::fs::write(&path, b"hello world").await.unwrap();

        assert_eq!(
            compute_checksum(&path, ChecksumAlgorithm::Sha256).await.unwrap(),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
        assert_eq!(
            compute_checksum(&path, ChecksumAlgorithm::Md5).await.unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[tokio::test]
    async fn test_multi_block_file_matches_one_shot_digest() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("big.bin");
        let data: Vec<u8> = (0..(HASH_BLOCK_SIZE * 3 + 17)).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &data).await.unwrap();

        let streamed = compute_checksum(&path, ChecksumAlgorithm::Sha1).await.unwrap();
        let one_shot = format!("{:x}", Sha1::digest(&data));
        assert_eq!(streamed, one_shot);
    }

    #[tokio::test]
    async fn test_missing_file_is_open_error() {
        let temp = TempDir::new().unwrap();
        let result = compute_checksum(&temp.path().join("gone"), ChecksumAlgorithm::Sha1).await;
        assert!(matches!(result, Err(IntegrityError::Open { .. })));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_symlink_hashes_like_target() {
        let temp = TempDir::new().unwrap();
        let target = temp.path().join("target.bin");
        let link = temp.path().join("link.bin");
        tokio::fs::write(&target, b"same bytes").await.unwrap();
        std::os::unix::fs::symlink(&target, &link).unwrap();

        assert_eq!(
            compute_checksum(&target, ChecksumAlgorithm::Sha1).await.unwrap(),
            compute_checksum(&link, ChecksumAlgorithm::Sha1).await.unwrap()
        );
    }
}
