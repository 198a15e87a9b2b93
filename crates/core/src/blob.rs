//! Blob storage with compression and content-addressing

use crate::error::{Error, Result};
use crate::hash::{hash_bytes, Digest};
use crate::store::atomic_write;
use dashmap::DashMap;
use std::path::PathBuf;

/// Blob header format (version 1)
#[derive(Debug, Clone)]
pub struct BlobHeaderV1 {
    /// Magic bytes: "CBB1"
    pub magic: [u8; 4],
    /// Flags: bit0=compressed, bit1-7=reserved
    pub flags: u8,
    /// Original size (before compression)
    pub orig_len: u64,
    /// Stored size (after compression, if compressed)
    pub stored_len: u64,
}

impl BlobHeaderV1 {
    const MAGIC: [u8; 4] = *b"CBB1";
    const FLAG_COMPRESSED: u8 = 0b0000_0001;
    pub const LEN: usize = 21;

    pub fn new(orig_len: u64, stored_len: u64, compressed: bool) -> Self {
        let flags = if compressed { Self::FLAG_COMPRESSED } else { 0 };
        Self {
            magic: Self::MAGIC,
            flags,
            orig_len,
            stored_len,
        }
    }

    pub fn is_compressed(&self) -> bool {
        (self.flags & Self::FLAG_COMPRESSED) != 0
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(Self::LEN);
        bytes.extend_from_slice(&self.magic);
        bytes.push(self.flags);
        bytes.extend_from_slice(&self.orig_len.to_le_bytes());
        bytes.extend_from_slice(&self.stored_len.to_le_bytes());
        bytes
    }

    /// Parse a header; `None` when the bytes are not a blob header
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < Self::LEN {
            return None;
        }

        let magic = [bytes[0], bytes[1], bytes[2], bytes[3]];
        if magic != Self::MAGIC {
            return None;
        }

        let flags = bytes[4];
        let orig_len = u64::from_le_bytes(bytes[5..13].try_into().ok()?);
        let stored_len = u64::from_le_bytes(bytes[13..21].try_into().ok()?);

        Some(Self {
            magic,
            flags,
            orig_len,
            stored_len,
        })
    }
}

/// Encode a payload as header + (possibly compressed) data.
///
/// Payloads larger than `threshold` are zstd-compressed at `level`, and kept
/// compressed only when that actually saves space.
pub fn encode_blob(data: &[u8], threshold: usize, level: i32) -> Vec<u8> {
    let orig_len = data.len() as u64;

    let compressed = if data.len() > threshold {
        zstd::encode_all(data, level)
            .ok()
            .filter(|compressed| compressed.len() < data.len())
    } else {
        None
    };

    let (header, stored) = match compressed {
        Some(compressed) => (
            BlobHeaderV1::new(orig_len, compressed.len() as u64, true),
            compressed,
        ),
        None => (BlobHeaderV1::new(orig_len, orig_len, false), data.to_vec()),
    };

    let mut serialized = header.to_bytes();
    serialized.extend_from_slice(&stored);
    serialized
}

/// Decode header + data back into the original payload.
///
/// Returns `None` when the serialized form is truncated or malformed.
pub fn decode_blob(serialized: &[u8]) -> Option<Vec<u8>> {
    let header = BlobHeaderV1::from_bytes(serialized)?;

    let data_start = BlobHeaderV1::LEN;
    let data_end = data_start.checked_add(usize::try_from(header.stored_len).ok()?)?;
    let stored = serialized.get(data_start..data_end)?;

    if header.is_compressed() {
        let decompressed = zstd::decode_all(stored).ok()?;
        (decompressed.len() as u64 == header.orig_len).then_some(decompressed)
    } else {
        Some(stored.to_vec())
    }
}

/// Content-addressed blob storage.
///
/// Layout: `<root>/objects/blobs/<first 2 hex chars>/<remaining 62>`.
/// Each distinct payload is stored at most once; writes are temp-file +
/// fsync + rename so a concurrent write of the same digest is harmless.
pub struct BlobStore {
    root: PathBuf,
    /// Digests known to be present, with their original size
    known: DashMap<Digest, u64>,
    compression_threshold: usize,
    compression_level: i32,
}

impl BlobStore {
    pub fn new(root: PathBuf) -> Self {
        Self {
            root,
            known: DashMap::new(),
            compression_threshold: 4096,
            compression_level: 3,
        }
    }

    /// Override compression settings
    pub fn with_compression(mut self, threshold: usize, level: i32) -> Self {
        self.compression_threshold = threshold;
        self.compression_level = level;
        self
    }

    /// Store a payload, returning its digest. Idempotent.
    pub fn put(&self, data: &[u8]) -> Result<Digest> {
        let digest = hash_bytes(data);
        if self.exists(&digest) {
            return Ok(digest);
        }

        let serialized = encode_blob(data, self.compression_threshold, self.compression_level);
        atomic_write(&self.tmp_dir(), &self.blob_path(&digest), &serialized)?;

        tracing::debug!(digest = %digest, size = data.len(), "stored blob");
        self.known.insert(digest, data.len() as u64);
        Ok(digest)
    }

    fn tmp_dir(&self) -> PathBuf {
        self.root.join("tmp").join("ingest")
    }

    /// Read a blob, verifying its content against the digest
    pub fn get(&self, digest: &Digest) -> Result<Vec<u8>> {
        let blob_path = self.blob_path(digest);
        let serialized = match std::fs::read(&blob_path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(format!("blob {}", digest)));
            }
            Err(e) => return Err(e.into()),
        };

        let data = decode_blob(&serialized).ok_or_else(|| Error::CorruptBlob {
            digest: *digest,
            actual: "undecodable payload".to_string(),
        })?;

        let actual = hash_bytes(&data);
        if actual != *digest {
            return Err(Error::CorruptBlob {
                digest: *digest,
                actual: actual.to_hex(),
            });
        }

        self.known.insert(*digest, data.len() as u64);
        Ok(data)
    }

    pub fn exists(&self, digest: &Digest) -> bool {
        if self.known.contains_key(digest) {
            return true;
        }
        self.blob_path(digest).is_file()
    }

    /// Number of distinct blobs on disk
    pub fn count(&self) -> Result<usize> {
        let blobs_dir = self.root.join("objects").join("blobs");
        if !blobs_dir.exists() {
            return Ok(0);
        }

        let mut count = 0;
        for prefix in std::fs::read_dir(&blobs_dir)? {
            let prefix = prefix?;
            if prefix.file_type()?.is_dir() {
                count += std::fs::read_dir(prefix.path())?.count();
            }
        }
        Ok(count)
    }

    fn blob_path(&self, digest: &Digest) -> PathBuf {
        let hex = digest.to_hex();
        let (prefix, rest) = hex.split_at(2);
        self.root.join("objects").join("blobs").join(prefix).join(rest)
    }
}
