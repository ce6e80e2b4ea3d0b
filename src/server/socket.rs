//! Non-blocking stream wrapper with optional TLS.
//!
//! A `Socket` pairs the raw stream with the connection's input buffer: reads
//! append to the buffer, writes take an ordered list of buffer slices whose
//! refcounted holds stay alive until the write completes. At most one write
//! is in flight at a time — `&mut self` makes violating that a compile
//! error rather than the runtime assertion it used to be in C servers.

use std::future::Future;
use std::io::{self, IoSlice};
use std::net::SocketAddr;
use std::pin::Pin;

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::trace;

use crate::http::pipeline::SendBuf;
use crate::mem::buffer::InputBuffer;

const READ_CHUNK: usize = 4096;

/// Byte stream the socket runs over: plain TCP or a TLS session.
pub trait SocketIo: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> SocketIo for T {}

/// Outcome of a server-side TLS handshake.
pub struct TlsSession {
    /// The encrypted stream; reads and writes go through it transparently.
    pub io: Box<dyn SocketIo>,
    /// Negotiated ALPN identifier, if any.
    pub alpn: Option<String>,
}

/// Server-side TLS factory — an external collaborator. The core only needs
/// the handshake seam and the negotiated ALPN protocol.
pub trait TlsAcceptor: Send + Sync + 'static {
    fn handshake(
        &self,
        stream: TcpStream,
    ) -> Pin<Box<dyn Future<Output = io::Result<TlsSession>> + Send>>;
}

pub struct Socket {
    io: Box<dyn SocketIo>,
    pub(crate) input: InputBuffer,
    peer: Option<SocketAddr>,
    alpn: Option<String>,
    encrypted: bool,
}

impl Socket {
    /// Wraps an accepted plaintext stream. Construction only; reading does
    /// not start here.
    pub fn plain(stream: TcpStream) -> Self {
        let peer = stream.peer_addr().ok();
        let _ = stream.set_nodelay(true);
        Self {
            io: Box::new(stream),
            input: InputBuffer::new(),
            peer,
            alpn: None,
            encrypted: false,
        }
    }

    /// Wraps the outcome of a TLS handshake.
    pub fn tls(session: TlsSession, peer: Option<SocketAddr>) -> Self {
        Self {
            io: session.io,
            input: InputBuffer::new(),
            peer,
            alpn: session.alpn,
            encrypted: true,
        }
    }

    #[inline]
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer
    }

    #[inline]
    pub fn is_encrypted(&self) -> bool {
        self.encrypted
    }

    /// The ALPN identifier negotiated during the handshake, empty for
    /// plaintext connections.
    #[inline]
    pub fn selected_protocol(&self) -> Option<&str> {
        self.alpn.as_deref()
    }

    /// Reads once into the input buffer. Returns the number of bytes
    /// appended; zero means EOF.
    pub async fn read_some(&mut self) -> io::Result<usize> {
        let tail = self.input.tail(READ_CHUNK);
        let n = self.io.read(tail).await?;
        self.input.advance(n);
        trace!(bytes = n, "socket read");
        Ok(n)
    }

    /// Writes an ordered list of buffer slices, fully. The slices' backing
    /// entries are borrowed for the duration of the call, which is exactly
    /// the write-completion point at which their holds may be released.
    pub async fn write_bufs(&mut self, bufs: &[SendBuf]) -> io::Result<()> {
        let mut idx = 0;
        let mut offset = 0;

        while idx < bufs.len() {
            let slices: Vec<IoSlice<'_>> = std::iter::once(IoSlice::new(
                &bufs[idx].as_slice()[offset..],
            ))
            .chain(bufs[idx + 1..].iter().map(|b| IoSlice::new(b.as_slice())))
            .collect();

            let mut n = self.io.write_vectored(&slices).await?;
            if n == 0 && slices.iter().any(|s| !s.is_empty()) {
                return Err(io::ErrorKind::WriteZero.into());
            }

            n += offset;
            while idx < bufs.len() && n >= bufs[idx].len() {
                n -= bufs[idx].len();
                idx += 1;
            }
            offset = n;
        }

        self.io.flush().await
    }

    /// Deferred close: flags the peer and lets the stream drop cleanly.
    pub async fn shutdown(&mut self) {
        let _ = self.io.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn write_bufs_writes_all_slices_in_order() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            let mut got = Vec::new();
            peer.read_to_end(&mut got).await.unwrap();
            got
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut sock = Socket::plain(stream);
        let shared = crate::mem::shared::SharedBytes::copy_of(b" refcounted");
        sock.write_bufs(&[
            SendBuf::Static(b"static"),
            SendBuf::Shared(shared),
            SendBuf::Static(b" tail"),
        ])
        .await
        .unwrap();
        sock.shutdown().await;

        assert_eq!(client.await.unwrap(), b"static refcounted tail");
    }

    #[tokio::test]
    async fn read_appends_to_input_buffer() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut peer, _) = listener.accept().await.unwrap();
            peer.write_all(b"hello").await.unwrap();
            peer.write_all(b" world").await.unwrap();
        });

        let stream = TcpStream::connect(addr).await.unwrap();
        let mut sock = Socket::plain(stream);
        while sock.input.len() < 11 {
            let n = sock.read_some().await.unwrap();
            if n == 0 {
                break;
            }
        }
        assert_eq!(sock.input.bytes(), b"hello world");
    }
}
