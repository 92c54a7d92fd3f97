use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::{Framed, LengthDelimitedCodec};

use crate::error::{Result, SwarmError};
use crate::protocol::codec::{decode_frame, encode_frame};
use crate::protocol::Frame;

const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

fn codec() -> LengthDelimitedCodec {
    LengthDelimitedCodec::builder()
        .max_frame_length(MAX_FRAME_LEN)
        .new_codec()
}

fn timed_out(what: &str) -> SwarmError {
    SwarmError::Io(io::Error::new(
        io::ErrorKind::TimedOut,
        format!("rendezvous {what} timed out"),
    ))
}

/// Dispatcher side of a rendezvous: a listener on an OS-assigned port.
///
/// Dropping the listener closes the rendezvous; workers that pulled a stale
/// announcement then fail to connect.
#[derive(Debug)]
pub struct RendezvousListener {
    listener: TcpListener,
    port: u16,
}

impl RendezvousListener {
    pub async fn bind(host: IpAddr) -> Result<Self> {
        let listener = TcpListener::bind(SocketAddr::new(host, 0)).await?;
        let port = listener.local_addr()?.port();
        Ok(Self { listener, port })
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Wait for one worker to connect. `Ok(None)` on timeout.
    pub async fn accept(&self, timeout: Duration) -> Result<Option<RendezvousStream>> {
        match tokio::time::timeout(timeout, self.listener.accept()).await {
            Ok(Ok((stream, peer))) => Ok(Some(RendezvousStream::new(stream, peer))),
            Ok(Err(e)) => Err(e.into()),
            Err(_) => Ok(None),
        }
    }
}

/// One end of an established rendezvous.
#[derive(Debug)]
pub struct RendezvousStream {
    framed: Framed<TcpStream, LengthDelimitedCodec>,
    peer: SocketAddr,
}

impl RendezvousStream {
    fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self {
            framed: Framed::new(stream, codec()),
            peer,
        }
    }

    pub async fn connect(host: IpAddr, port: u16, timeout: Duration) -> Result<Self> {
        let addr = SocketAddr::new(host, port);
        let stream = tokio::time::timeout(timeout, TcpStream::connect(addr))
            .await
            .map_err(|_| timed_out("connect"))??;
        Ok(Self::new(stream, addr))
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub async fn send(&mut self, frame: &Frame) -> Result<()> {
        let bytes = encode_frame(frame)?;
        self.framed.send(bytes).await?;
        Ok(())
    }

    /// Wait for the next frame with no deadline. A peer that dies mid-wait
    /// closes the socket, which surfaces as a protocol error.
    pub async fn recv(&mut self) -> Result<Frame> {
        let next = self.framed.next().await;
        Self::into_frame(next)
    }

    pub async fn recv_timeout(&mut self, timeout: Duration) -> Result<Frame> {
        let next = tokio::time::timeout(timeout, self.framed.next())
            .await
            .map_err(|_| timed_out("read"))?;
        Self::into_frame(next)
    }

    fn into_frame(next: Option<io::Result<bytes::BytesMut>>) -> Result<Frame> {
        match next {
            Some(Ok(bytes)) => decode_frame(&bytes),
            Some(Err(e)) => Err(e.into()),
            None => Err(SwarmError::protocol(
                "peer closed rendezvous before sending a frame",
                Vec::new(),
            )),
        }
    }
}
