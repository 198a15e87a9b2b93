//! BLAKE3 content digests for content-addressed storage

use crate::error::{Error, Result};
use std::path::Path;

/// Content address of a blob or tree: a BLAKE3 hash (32 bytes)
#[derive(Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Digest([u8; 32]);

impl Digest {
    pub const LEN: usize = 32;

    /// Create a new Digest from bytes
    pub const fn from_bytes(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }

    /// Get the digest as a byte slice
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to lowercase hex string
    pub fn to_hex(&self) -> String {
        encode_hex(&self.0)
    }

    /// Parse from a 64 character hex string
    pub fn from_hex(hex: &str) -> Result<Self> {
        if hex.len() != 64 {
            return Err(Error::corrupt(format!(
                "invalid digest length: expected 64 hex characters, got {}",
                hex.len()
            )));
        }
        let decoded = decode_hex(hex)?;
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }
}

/// Encode arbitrary bytes as lowercase hex
pub fn encode_hex(bytes: &[u8]) -> String {
    const HEX_CHARS: &[u8] = b"0123456789abcdef";
    let mut hex = String::with_capacity(bytes.len() * 2);
    for &byte in bytes {
        hex.push(HEX_CHARS[(byte >> 4) as usize] as char);
        hex.push(HEX_CHARS[(byte & 0xf) as usize] as char);
    }
    hex
}

/// Decode a hex string (either case) into bytes
pub fn decode_hex(hex: &str) -> Result<Vec<u8>> {
    if hex.len() % 2 != 0 {
        return Err(Error::corrupt(format!("odd hex length: {}", hex.len())));
    }
    hex.as_bytes()
        .chunks(2)
        .map(|pair| Ok((hex_char_to_nibble(pair[0])? << 4) | hex_char_to_nibble(pair[1])?))
        .collect()
}

fn hex_char_to_nibble(c: u8) -> Result<u8> {
    match c {
        b'0'..=b'9' => Ok(c - b'0'),
        b'a'..=b'f' => Ok(c - b'a' + 10),
        b'A'..=b'F' => Ok(c - b'A' + 10),
        _ => Err(Error::corrupt(format!("invalid hex character: {}", c as char))),
    }
}

impl std::fmt::Debug for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

impl std::fmt::Display for Digest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl std::str::FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_hex(s)
    }
}

impl serde::Serialize for Digest {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> serde::Deserialize<'de> for Digest {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let hex = String::deserialize(deserializer)?;
        Self::from_hex(&hex).map_err(serde::de::Error::custom)
    }
}

/// Files at or above this size are hashed through a memory map
pub const MMAP_THRESHOLD: u64 = 4 * 1024 * 1024;

/// Hash bytes using BLAKE3
pub fn hash_bytes(data: &[u8]) -> Digest {
    let hash = blake3::hash(data);
    Digest::from_bytes(*hash.as_bytes())
}

/// Hash a file using BLAKE3 (streaming)
pub fn hash_file(path: &Path) -> Result<Digest> {
    use std::fs::File;
    use std::io::{BufReader, Read};

    let file = File::open(path)?;
    let mut reader = BufReader::new(file);
    let mut hasher = IncrementalHasher::new();

    let mut buffer = [0u8; 8192];
    loop {
        let bytes_read = reader.read(&mut buffer)?;
        if bytes_read == 0 {
            break;
        }
        hasher.update(&buffer[..bytes_read]);
    }

    Ok(hasher.finalize())
}

/// Hash a file using memory-mapped I/O (for files > 4MB)
pub fn hash_file_mmap(path: &Path) -> Result<Digest> {
    use memmap2::Mmap;
    use std::fs::File;

    let file = File::open(path)?;
    // SAFETY: the map is read-only and dropped before returning; a concurrent
    // writer can at worst produce a digest that no longer matches the file.
    let mmap = unsafe { Mmap::map(&file)? };
    Ok(hash_bytes(&mmap))
}

/// Hash a file of known length, picking streaming or mmap by size
pub fn hash_file_sized(path: &Path, len: u64) -> Result<Digest> {
    if len >= MMAP_THRESHOLD {
        hash_file_mmap(path)
    } else {
        hash_file(path)
    }
}

/// Incremental hasher for building digests across multiple chunks
pub struct IncrementalHasher {
    inner: blake3::Hasher,
}

impl IncrementalHasher {
    pub fn new() -> Self {
        Self {
            inner: blake3::Hasher::new(),
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
    }

    pub fn finalize(self) -> Digest {
        let hash = self.inner.finalize();
        Digest::from_bytes(*hash.as_bytes())
    }
}

impl Default for IncrementalHasher {
    fn default() -> Self {
        Self::new()
    }
}
