use std::io;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use crate::error::Error;
use crate::io::Encode;

// initial read-buffer capacity; the buffer grows past this when a single
// message is larger
const MIN_READ_BUF: usize = 4096;

/// A buffered duplex byte stream.
///
/// Reads deliver exactly-sized contiguous chunks out of an internal buffer
/// that is refilled from the underlying stream; short reads from the stream
/// are invisible to callers. Writes accumulate in a buffer until flushed.
///
/// The underlying stream is split so that a flush can drain incoming bytes
/// concurrently; without that, a large enough request could deadlock against
/// a server that is already producing replies.
pub struct BufStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    reader: ReadHalf<S>,
    writer: WriteHalf<S>,

    // writes with `write` are buffered until `flush`
    pub(crate) wbuf: Vec<u8>,

    // incoming bytes accumulate here until a whole frame can be split off
    rbuf: BytesMut,
}

impl<S> BufStream<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        let (reader, writer) = tokio::io::split(stream);

        Self {
            reader,
            writer,
            wbuf: Vec::with_capacity(512),
            rbuf: BytesMut::with_capacity(MIN_READ_BUF),
        }
    }

    #[inline]
    pub fn write<T: Encode>(&mut self, value: T) {
        value.encode(&mut self.wbuf);
    }

    pub fn wbuf_len(&self) -> usize {
        self.wbuf.len()
    }

    /// Write the entire write buffer to the stream and flush it.
    pub async fn flush(&mut self) -> Result<(), Error> {
        if self.wbuf.is_empty() {
            return Ok(());
        }

        let res = self.writer.write_all(&self.wbuf).await;

        // the buffer must not survive a failed write; a partially transmitted
        // message cannot be re-sent
        self.wbuf.clear();

        res?;
        self.writer.flush().await?;

        Ok(())
    }

    /// Like [`flush`][Self::flush], but concurrently reads whatever the
    /// server sends into the read buffer while our write is in progress.
    pub async fn flush_with_drain(&mut self) -> Result<(), Error> {
        let Self {
            reader,
            writer,
            wbuf,
            rbuf,
        } = self;

        let mut written = 0;

        while written < wbuf.len() {
            tokio::select! {
                res = writer.write(&wbuf[written..]) => {
                    match res {
                        Ok(0) => {
                            wbuf.clear();
                            return Err(io::Error::from(io::ErrorKind::WriteZero).into());
                        }
                        Ok(n) => written += n,
                        Err(e) => {
                            wbuf.clear();
                            return Err(e.into());
                        }
                    }
                }

                res = reader.read_buf(rbuf) => {
                    // a clean EOF here still fails the in-progress request
                    if res? == 0 {
                        wbuf.clear();
                        return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
                    }
                }
            }
        }

        wbuf.clear();
        self.writer.flush().await?;

        Ok(())
    }

    /// Return exactly `cnt` contiguous bytes consumed from the stream.
    ///
    /// The returned [`Bytes`] is never aliased by a later call; callers may
    /// hold it for as long as they like.
    pub async fn read_exact(&mut self, cnt: usize) -> Result<Bytes, Error> {
        while self.rbuf.len() < cnt {
            self.rbuf.reserve(cnt - self.rbuf.len());

            let n = self.reader.read_buf(&mut self.rbuf).await?;

            if n == 0 {
                // a clean close mid-frame is still unexpected
                return Err(io::Error::new(
                    io::ErrorKind::UnexpectedEof,
                    "connection closed while reading a message",
                )
                .into());
            }
        }

        Ok(self.rbuf.split_to(cnt).freeze())
    }

    pub async fn shutdown(&mut self) -> io::Result<()> {
        self.writer.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // the reader must deliver the same byte sequence no matter how the
    // stream fragments it
    #[tokio::test]
    async fn test_read_exact_across_fragments() {
        let (client, mut server) = tokio::io::duplex(8);

        tokio::spawn(async move {
            for chunk in [&b"he"[..], b"l", b"lo wor", b"ld!"] {
                server.write_all(chunk).await.unwrap();
                server.flush().await.unwrap();
                tokio::task::yield_now().await;
            }
        });

        let mut stream = BufStream::new(client);

        let hello = stream.read_exact(5).await.unwrap();
        let rest = stream.read_exact(7).await.unwrap();

        assert_eq!(&hello[..], b"hello");
        assert_eq!(&rest[..], b" world!");
    }

    // earlier chunks must stay valid and unmodified after later reads
    #[tokio::test]
    async fn test_chunks_are_not_reused() {
        let (client, mut server) = tokio::io::duplex(64);

        tokio::spawn(async move {
            server.write_all(b"aaaabbbbccccdddd").await.unwrap();
        });

        let mut stream = BufStream::new(client);

        let a = stream.read_exact(4).await.unwrap();
        let b = stream.read_exact(4).await.unwrap();
        let c = stream.read_exact(8).await.unwrap();

        assert_eq!(&a[..], b"aaaa");
        assert_eq!(&b[..], b"bbbb");
        assert_eq!(&c[..], b"ccccdddd");
    }

    #[tokio::test]
    async fn test_eof_mid_frame_is_an_error() {
        let (client, mut server) = tokio::io::duplex(64);

        tokio::spawn(async move {
            server.write_all(b"abc").await.unwrap();
            // server half drops here
        });

        let mut stream = BufStream::new(client);
        let err = stream.read_exact(8).await.unwrap_err();

        assert!(matches!(err, Error::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof));
    }

    #[tokio::test]
    async fn test_write_is_buffered_until_flush() {
        let (client, mut server) = tokio::io::duplex(64);

        let mut stream = BufStream::new(client);

        struct Raw<'a>(&'a [u8]);

        impl Encode for Raw<'_> {
            fn encode(&self, buf: &mut Vec<u8>) {
                buf.extend_from_slice(self.0);
            }
        }

        stream.write(Raw(b"ping"));
        assert_eq!(stream.wbuf_len(), 4);

        stream.flush().await.unwrap();
        assert_eq!(stream.wbuf_len(), 0);

        let mut out = [0u8; 4];
        server.read_exact(&mut out).await.unwrap();
        assert_eq!(&out, b"ping");
    }
}
