//! Streaming digest computation.
//!
//! Every blob and layer operation in this crate needs both a trusted digest and a running
//! byte count, computed in a single pass over data that may be a local file, a network
//! stream, or an in-memory buffer. [`DigestWriter`] wraps any [`std::io::Write`] (or,
//! via [`DigestAsyncWriter`], any [`tokio::io::AsyncWrite`]) and keeps a hash updated on
//! every write while forwarding bytes through unchanged.

use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use sha2::{Digest as _, Sha256};
use tokio::io::AsyncWrite;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A synchronous write-through hasher. Wraps a sink `W`, updating a running sha256 digest
/// on every write and forwarding the bytes unchanged.
pub struct DigestWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

/// An async write-through hasher, for use with `tokio::io::copy` and registry streaming uploads.
pub struct DigestAsyncWriter<W> {
    inner: W,
    hasher: Sha256,
    written: u64,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<W> DigestWriter<W> {
    /// Wraps `inner`, starting a fresh sha256 digest.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes written through this wrapper so far.
    pub fn tell(&self) -> u64 {
        self.written
    }

    /// Consumes the wrapper, returning the inner sink and the final digest string (`sha256:<hex>`).
    pub fn finish(self) -> (W, String) {
        let hex = hex::encode(self.hasher.finalize());
        (self.inner, format!("sha256:{hex}"))
    }
}

impl<W: io::Write> io::Write for DigestWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

impl<W> DigestAsyncWriter<W> {
    /// Wraps `inner`, starting a fresh sha256 digest.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: Sha256::new(),
            written: 0,
        }
    }

    /// Number of bytes written through this wrapper so far.
    pub fn tell(&self) -> u64 {
        self.written
    }

    /// Consumes the wrapper, returning the inner sink and the final digest string (`sha256:<hex>`).
    pub fn finish(self) -> (W, String) {
        let hex = hex::encode(self.hasher.finalize());
        (self.inner, format!("sha256:{hex}"))
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for DigestAsyncWriter<W> {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let this = self.get_mut();
        match Pin::new(&mut this.inner).poll_write(cx, buf) {
            Poll::Ready(Ok(n)) => {
                this.hasher.update(&buf[..n]);
                this.written += n as u64;
                Poll::Ready(Ok(n))
            }
            other => other,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.get_mut().inner).poll_shutdown(cx)
    }
}

/// Computes the sha256 digest of an in-memory byte slice, in `sha256:<hex>` form.
pub fn sha256_digest(bytes: &[u8]) -> String {
    format!("sha256:{}", hex::encode(Sha256::digest(bytes)))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_digest_writer_forwards_and_hashes() {
        let mut sink = Vec::new();
        {
            let mut writer = DigestWriter::new(&mut sink);
            writer.write_all(b"hello world").unwrap();
            assert_eq!(writer.tell(), 11);
        }
        assert_eq!(sink, b"hello world");
    }

    #[test]
    fn test_digest_writer_finish_matches_known_digest() {
        let mut writer = DigestWriter::new(Vec::new());
        writer.write_all(b"").unwrap();
        let (_, digest) = writer.finish();
        assert_eq!(
            digest,
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_sha256_digest_empty() {
        assert_eq!(
            sha256_digest(b""),
            "sha256:e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
