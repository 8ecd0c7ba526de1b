// Byte-stream transport collaborator
// The core only opens, reads, writes and drops a link; it never looks at the endpoint

use async_trait::async_trait;
use log::debug;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

pub trait AsyncReadWrite: AsyncRead + AsyncWrite {}

impl<T> AsyncReadWrite for T where T: AsyncRead + AsyncWrite {}

/// An open duplex link; dropping it closes the underlying resource
pub type BoxedLink = Box<dyn AsyncReadWrite + Unpin + Send>;

#[async_trait]
pub trait Transport: Send + Sync {
    async fn open(&self, endpoint: &str) -> std::io::Result<BoxedLink>;
}

/// Radio bridge exposed as a TCP socket (serial-to-TCP adapters, emulators)
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpTransport;

#[async_trait]
impl Transport for TcpTransport {
    async fn open(&self, endpoint: &str) -> std::io::Result<BoxedLink> {
        debug!("Opening TCP bridge at {}", endpoint);
        let stream = TcpStream::connect(endpoint).await?;
        stream.set_nodelay(true)?;
        Ok(Box::new(stream))
    }
}
