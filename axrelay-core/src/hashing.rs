//! Content hashing used as the file identity key.
//!
//! The identity and throttle logic only ever sees a [`ContentHash`]; which
//! digest produces it is decided by the [`ContentHasher`] handed to the
//! engine context.

use std::{fmt, io, path::Path, sync::Arc};

use async_trait::async_trait;
use md5::Md5;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::types::ContentHash;

const BLOCK_SIZE: usize = 64 * 1024;

/// Digest families the appliances report for detected samples.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    #[default]
    Md5,
    Sha256,
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Md5 => f.write_str("md5"),
            HashAlgorithm::Sha256 => f.write_str("sha256"),
        }
    }
}

#[async_trait]
pub trait ContentHasher: Send + Sync {
    fn algorithm(&self) -> HashAlgorithm;

    fn hash_bytes(&self, bytes: &[u8]) -> ContentHash;

    /// Streams the file in fixed-size blocks.
    async fn hash_file(&self, path: &Path) -> io::Result<ContentHash>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Md5Hasher;

#[derive(Debug, Clone, Copy, Default)]
pub struct Sha256Hasher;

async fn digest_file<D: Digest + Send>(path: &Path) -> io::Result<ContentHash> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = D::new();
    let mut buf = vec![0u8; BLOCK_SIZE];
    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(ContentHash::new(hex::encode(hasher.finalize())))
}

#[async_trait]
impl ContentHasher for Md5Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Md5
    }

    fn hash_bytes(&self, bytes: &[u8]) -> ContentHash {
        ContentHash::new(hex::encode(Md5::digest(bytes)))
    }

    async fn hash_file(&self, path: &Path) -> io::Result<ContentHash> {
        digest_file::<Md5>(path).await
    }
}

#[async_trait]
impl ContentHasher for Sha256Hasher {
    fn algorithm(&self) -> HashAlgorithm {
        HashAlgorithm::Sha256
    }

    fn hash_bytes(&self, bytes: &[u8]) -> ContentHash {
        ContentHash::new(hex::encode(Sha256::digest(bytes)))
    }

    async fn hash_file(&self, path: &Path) -> io::Result<ContentHash> {
        digest_file::<Sha256>(path).await
    }
}

pub fn hasher_for(algorithm: HashAlgorithm) -> Arc<dyn ContentHasher> {
    match algorithm {
        HashAlgorithm::Md5 => Arc::new(Md5Hasher),
        HashAlgorithm::Sha256 => Arc::new(Sha256Hasher),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_matches_known_digest() {
        assert_eq!(
            Md5Hasher.hash_bytes(b"abc").as_str(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn sha256_matches_known_digest() {
        assert_eq!(
            Sha256Hasher.hash_bytes(b"abc").as_str(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[tokio::test]
    async fn file_hash_equals_byte_hash_across_block_boundaries() {
        let dir = tempfile::tempdir().expect("tmpdir");
        let path = dir.path().join("sample.bin");
        let payload: Vec<u8> =
            (0..(BLOCK_SIZE * 2 + 17)).map(|i| (i % 251) as u8).collect();
        std::fs::write(&path, &payload).expect("write sample");

        let hashers = [
            hasher_for(HashAlgorithm::Md5),
            hasher_for(HashAlgorithm::Sha256),
        ];
        for hasher in hashers {
            let from_file = hasher.hash_file(&path).await.expect("hash file");
            assert_eq!(from_file, hasher.hash_bytes(&payload));
        }
    }
}
