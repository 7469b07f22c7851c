//! Content hashing: SHA1 identity hash plus MD5 secondary hash.
//!
//! Two modes produce identical digests for identical bytes:
//! - buffer mode hashes an in-memory slice in one pass
//! - streaming mode feeds fixed-size chunks from an async reader
//!
//! Streaming can also tee every chunk into a sink, which is how one-shot
//! streams are spooled to disk while they are hashed.

use std::path::Path;

use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::defaults::HASH_CHUNK_SIZE;
use crate::Result;

/// Digest pair identifying a piece of content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentHashes {
    /// Lowercase hex SHA1 (40 chars). Primary identity.
    pub sha1: String,
    /// Lowercase hex MD5 (32 chars).
    pub md5: String,
}

/// Running state for both digests.
struct Digests {
    sha1: Sha1,
    md5: md5::Context,
    len: u64,
}

impl Digests {
    fn new() -> Self {
        Self {
            sha1: Sha1::new(),
            md5: md5::Context::new(),
            len: 0,
        }
    }

    fn update(&mut self, data: &[u8]) {
        self.sha1.update(data);
        self.md5.consume(data);
        self.len += data.len() as u64;
    }

    fn finish(self) -> (ContentHashes, u64) {
        let hashes = ContentHashes {
            sha1: hex::encode(self.sha1.finalize()),
            md5: format!("{:x}", self.md5.compute()),
        };
        (hashes, self.len)
    }
}

/// Computes content hashes in buffer or streaming mode.
#[derive(Debug, Clone)]
pub struct ContentHasher {
    chunk_size: usize,
}

impl Default for ContentHasher {
    fn default() -> Self {
        Self::new(HASH_CHUNK_SIZE)
    }
}

impl ContentHasher {
    /// Create a hasher reading `chunk_size` bytes per step in streaming mode.
    pub fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size: chunk_size.max(1),
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Hash a whole buffer.
    pub fn hash_bytes(data: &[u8]) -> ContentHashes {
        let mut digests = Digests::new();
        digests.update(data);
        digests.finish().0
    }

    /// Hash everything readable from `reader`. Returns the hashes and byte count.
    pub async fn hash_reader<R>(&self, reader: &mut R) -> Result<(ContentHashes, u64)>
    where
        R: AsyncRead + Unpin + ?Sized,
    {
        let mut sink = tokio::io::sink();
        self.hash_reader_into(reader, &mut sink).await
    }

    /// Hash `reader` while copying every byte into `sink`.
    ///
    /// The sink is flushed before returning. On error nothing is returned, so
    /// callers never observe a hash of partial content.
    pub async fn hash_reader_into<R, W>(
        &self,
        reader: &mut R,
        sink: &mut W,
    ) -> Result<(ContentHashes, u64)>
    where
        R: AsyncRead + Unpin + ?Sized,
        W: AsyncWrite + Unpin + ?Sized,
    {
        let mut digests = Digests::new();
        let mut buf = vec![0u8; self.chunk_size];
        loop {
            let n = reader.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            digests.update(&buf[..n]);
            sink.write_all(&buf[..n]).await?;
        }
        sink.flush().await?;
        Ok(digests.finish())
    }

    /// Hash a file on disk in streaming mode.
    pub async fn hash_file(&self, path: &Path) -> Result<(ContentHashes, u64)> {
        let mut file = tokio::fs::File::open(path).await?;
        self.hash_reader(&mut file).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ABC_SHA1: &str = "a9993e364706816aba3e25717850c26c9cd0d89d";
    const ABC_MD5: &str = "900150983cd24fb0d6963f7d28e17f72";

    #[test]
    fn test_hash_bytes_known_vector() {
        let hashes = ContentHasher::hash_bytes(b"abc");
        assert_eq!(hashes.sha1, ABC_SHA1);
        assert_eq!(hashes.md5, ABC_MD5);
    }

    #[test]
    fn test_hash_bytes_empty() {
        let hashes = ContentHasher::hash_bytes(b"");
        assert_eq!(hashes.sha1, "da39a3ee5e6b4b0d3255bfef95601890afd80709");
        assert_eq!(hashes.md5, "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[tokio::test]
    async fn test_streaming_matches_buffer_across_chunk_sizes() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let expected = ContentHasher::hash_bytes(&data);

        for chunk in [1, 7, 64, 4096, 1 << 20] {
            let hasher = ContentHasher::new(chunk);
            let mut reader = data.as_slice();
            let (hashes, len) = hasher.hash_reader(&mut reader).await.unwrap();
            assert_eq!(hashes, expected, "chunk size {} diverged", chunk);
            assert_eq!(len, data.len() as u64);
        }
    }

    #[tokio::test]
    async fn test_hash_reader_into_tees_bytes() {
        let hasher = ContentHasher::new(2);
        let mut reader: &[u8] = b"abc";
        let mut sink = Vec::new();
        let (hashes, len) = hasher.hash_reader_into(&mut reader, &mut sink).await.unwrap();
        assert_eq!(hashes.sha1, ABC_SHA1);
        assert_eq!(len, 3);
        assert_eq!(sink, b"abc");
    }

    #[tokio::test]
    async fn test_hash_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("abc.txt");
        tokio::fs::write(&path, b"abc").await.unwrap();

        let (hashes, len) = ContentHasher::default().hash_file(&path).await.unwrap();
        assert_eq!(hashes.sha1, ABC_SHA1);
        assert_eq!(len, 3);
    }

    #[tokio::test]
    async fn test_hash_file_missing_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let result = ContentHasher::default()
            .hash_file(&dir.path().join("missing"))
            .await;
        assert!(matches!(result, Err(crate::Error::Io(_))));
    }

    #[test]
    fn test_zero_chunk_size_is_clamped() {
        assert_eq!(ContentHasher::new(0).chunk_size(), 1);
    }
}
