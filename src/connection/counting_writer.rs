//! A thin `AsyncWrite` wrapper that tallies bytes written, so the simple
//! and extended query handlers (generic over `W: AsyncWrite`) need no
//! changes to feed the per-connection `bytes_out` counter.

use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::AsyncWrite;

pub struct CountingWriter<'a, W> {
    inner: &'a mut W,
    written: u64,
}

impl<'a, W: AsyncWrite + Unpin> CountingWriter<'a, W> {
    pub fn new(inner: &'a mut W) -> Self {
        CountingWriter { inner, written: 0 }
    }

    pub fn bytes_written(&self) -> u64 {
        self.written
    }
}

impl<W: AsyncWrite + Unpin> AsyncWrite for CountingWriter<'_, W> {
    fn poll_write(self: Pin<&mut Self>, cx: &mut Context<'_>, buf: &[u8]) -> Poll<std::io::Result<usize>> {
        let this = self.get_mut();
        let result = Pin::new(&mut *this.inner).poll_write(cx, buf);
        if let Poll::Ready(Ok(n)) = &result {
            this.written += *n as u64;
        }
        result
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_flush(cx)
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<std::io::Result<()>> {
        Pin::new(&mut *self.get_mut().inner).poll_shutdown(cx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn tallies_bytes_across_multiple_writes() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let mut counting = CountingWriter::new(&mut server);
        counting.write_all(b"hello").await.unwrap();
        counting.write_all(b" world").await.unwrap();
        counting.flush().await.unwrap();
        assert_eq!(counting.bytes_written(), 11);

        let mut buf = [0u8; 11];
        tokio::io::AsyncReadExt::read_exact(&mut client, &mut buf).await.unwrap();
        assert_eq!(&buf, b"hello world");
    }
}
