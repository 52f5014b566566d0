//! Content hashes for files and rows.
//!
//! Both hashes are SHA-256, rendered as lowercase hex. They identify
//! content for deduplication; they are not a security boundary.
//!
//! The file hash covers the raw bytes actually read, so a read that fails
//! part way still yields a hash of the prefix that was consumed. The row
//! hash covers the normalized field sequence: each field is prefixed with
//! its byte length, and the sequence with its field count, so no choice of
//! separator can make two different rows collide.

use std::io::{self, Read};

use sha2::{Digest, Sha256};

/// Hash a complete in-memory byte buffer.
pub fn file_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// Hash a normalized field sequence.
pub fn row_hash<S: AsRef<str>>(fields: &[S]) -> String {
    let mut hasher = Sha256::new();
    hasher.update((fields.len() as u64).to_le_bytes());
    for field in fields {
        let bytes = field.as_ref().as_bytes();
        hasher.update((bytes.len() as u64).to_le_bytes());
        hasher.update(bytes);
    }
    format!("{:x}", hasher.finalize())
}

/// A reader adapter that hashes every byte passing through it.
pub struct HashingReader<R> {
    inner: R,
    hasher: Sha256,
    bytes_read: u64,
}

impl<R: Read> HashingReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            bytes_read: 0,
        }
    }

    pub fn bytes_read(&self) -> u64 {
        self.bytes_read
    }

    /// Consume the adapter and return the hex digest of everything read.
    pub fn finish(self) -> String {
        format!("{:x}", self.hasher.finalize())
    }
}

impl<R: Read> Read for HashingReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.bytes_read += n as u64;
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_hash_known_value() {
        assert_eq!(
            file_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_hashing_reader_matches_buffer_hash() {
        let data = b"id,name\n1,alice\n2,bob\n".to_vec();
        let mut reader = HashingReader::new(&data[..]);
        let mut sink = Vec::new();
        reader.read_to_end(&mut sink).unwrap();
        assert_eq!(reader.bytes_read(), data.len() as u64);
        assert_eq!(reader.finish(), file_hash(&data));
    }

    #[test]
    fn test_row_hash_is_deterministic() {
        assert_eq!(row_hash(&["a", "b"]), row_hash(&["a".to_string(), "b".to_string()]));
    }

    #[test]
    fn test_row_hash_has_no_separator_ambiguity() {
        assert_ne!(row_hash(&["a,b", "c"]), row_hash(&["a", "b,c"]));
        assert_ne!(row_hash(&["ab", ""]), row_hash(&["a", "b"]));
        assert_ne!(row_hash(&[""]), row_hash::<&str>(&[]));
        assert_ne!(row_hash(&["", ""]), row_hash(&[""]));
    }
}
