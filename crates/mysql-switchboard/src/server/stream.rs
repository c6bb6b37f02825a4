//! Network stream abstraction for TCP and TLS connections
//!
//! `NetworkStream` carries both sides of the proxy: accepted client
//! connections (optionally upgraded after an SSLRequest) and connections the
//! proxy opens to upstream servers.

use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream as ClientTlsStream;
use tokio_rustls::server::TlsStream as ServerTlsStream;

/// A network stream that can be either plain TCP or TLS-encrypted
///
/// The TLS variants are boxed to keep the enum close to the size of a
/// `TcpStream`.
pub enum NetworkStream {
    /// Plain TCP connection
    Tcp(TcpStream),
    /// Client connection upgraded to TLS by the proxy's acceptor
    ServerTls(Box<ServerTlsStream<TcpStream>>),
    /// Upstream connection the proxy upgraded to TLS as a client
    ClientTls(Box<ClientTlsStream<TcpStream>>),
}

impl NetworkStream {
    /// Create a new TCP stream wrapper
    pub fn tcp(stream: TcpStream) -> Self {
        NetworkStream::Tcp(stream)
    }

    /// Check if this stream is TLS-encrypted
    pub fn is_encrypted(&self) -> bool {
        matches!(
            self,
            NetworkStream::ServerTls(_) | NetworkStream::ClientTls(_)
        )
    }

    /// Get the TLS protocol version if this is a TLS stream
    pub fn tls_version(&self) -> Option<&'static str> {
        let version = match self {
            NetworkStream::Tcp(_) => None,
            NetworkStream::ServerTls(tls) => tls.get_ref().1.protocol_version(),
            NetworkStream::ClientTls(tls) => tls.get_ref().1.protocol_version(),
        };
        version.map(|v| match v {
            rustls::ProtocolVersion::TLSv1_2 => "TLSv1.2",
            rustls::ProtocolVersion::TLSv1_3 => "TLSv1.3",
            _ => "TLS (unknown version)",
        })
    }

    /// Extract the TCP stream for a TLS upgrade
    ///
    /// Returns `Err(self)` if this is already a TLS stream.
    pub fn into_tcp(self) -> Result<TcpStream, Self> {
        match self {
            NetworkStream::Tcp(stream) => Ok(stream),
            other => Err(other),
        }
    }

    /// The underlying TCP stream, whatever the transport
    pub fn tcp_ref(&self) -> &TcpStream {
        match self {
            NetworkStream::Tcp(stream) => stream,
            NetworkStream::ServerTls(tls) => tls.get_ref().0,
            NetworkStream::ClientTls(tls) => tls.get_ref().0,
        }
    }

    /// Local address of the underlying socket
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.tcp_ref().local_addr()
    }

    /// Remote address of the underlying socket
    pub fn peer_addr(&self) -> io::Result<SocketAddr> {
        self.tcp_ref().peer_addr()
    }
}

impl AsyncRead for NetworkStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_read(cx, buf),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for NetworkStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_write(cx, buf),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_flush(cx),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            NetworkStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            NetworkStream::ServerTls(stream) => Pin::new(stream).poll_shutdown(cx),
            NetworkStream::ClientTls(stream) => Pin::new(stream).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_tcp_stream_passthrough() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = [0u8; 5];
            socket.read_exact(&mut buf).await.unwrap();
            socket.write_all(&buf).await.unwrap();
        });

        let mut stream = NetworkStream::tcp(TcpStream::connect(addr).await.unwrap());
        assert!(!stream.is_encrypted());
        assert_eq!(stream.tls_version(), None);
        assert_eq!(stream.peer_addr().unwrap(), addr);

        stream.write_all(b"hello").await.unwrap();
        let mut echoed = [0u8; 5];
        stream.read_exact(&mut echoed).await.unwrap();
        assert_eq!(&echoed, b"hello");

        assert!(stream.into_tcp().is_ok());
        server.await.unwrap();
    }
}
