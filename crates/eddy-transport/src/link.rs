//! Framed message links
//!
//! TigerStyle: One reader task and one writer task per link, bounded queues
//! in both directions.
//!
//! A [`Link`] turns any byte stream into a pair of message queues. The same
//! code runs over TCP in production and over an in-memory duplex pipe in
//! tests.
//!
//! ```text
//!   outbound ──► writer task ──encode──► stream ──► peer
//!   inbound  ◄── reader task ◄─decode─── stream ◄── peer
//! ```

use crate::codec::{read_frame, write_frame, MessageCodec};
use crate::error::{TransportError, TransportResult};
use crate::message::{Message, ProtocolType};
use eddy_core::constants::CONNECTION_QUEUE_DEPTH_MAX;
use eddy_core::IoContext;
use std::net::SocketAddr;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// Buffer size of an in-memory link in bytes
pub const MEMORY_LINK_BUFFER_BYTES: usize = 64 * 1024;

/// Time the writer gets to flush queued messages after a link closes
pub const LINK_DRAIN_GRACE_MS: u64 = 1000;

/// A bidirectional message queue over a byte stream
///
/// Dropping the outbound sender shuts down the write side of the stream,
/// which the peer observes as a clean end of stream.
pub struct Link {
    name: String,
    codec: MessageCodec,
    outbound: mpsc::Sender<Message>,
    inbound: Inbound,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl Link {
    /// Spawn the reader and writer tasks over `stream`
    pub fn spawn<S>(name: impl Into<String>, stream: S, codec: MessageCodec) -> Self
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let name = name.into();
        let (read_half, write_half) = tokio::io::split(stream);
        let (outbound, outbound_rx) = mpsc::channel(CONNECTION_QUEUE_DEPTH_MAX);
        let (inbound_tx, inbound) = mpsc::channel(CONNECTION_QUEUE_DEPTH_MAX);

        let writer = tokio::spawn(writer_task(
            name.clone(),
            write_half,
            outbound_rx,
            codec.clone(),
        ));
        let reader = tokio::spawn(reader_task(
            name.clone(),
            read_half,
            inbound_tx,
            codec.clone(),
        ));

        Self {
            name,
            codec,
            outbound,
            inbound: Inbound {
                peeked: None,
                rx: inbound,
            },
            reader,
            writer,
        }
    }

    /// Two links joined by an in-memory pipe
    pub fn memory_pair(protocol: ProtocolType) -> (Link, Link) {
        let (left, right) = tokio::io::duplex(MEMORY_LINK_BUFFER_BYTES);
        (
            Link::spawn("memory-client", left, MessageCodec::new(protocol)),
            Link::spawn("memory-server", right, MessageCodec::new(protocol)),
        )
    }

    /// Link name for logs
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Protocol of the link, once known
    pub fn protocol(&self) -> Option<ProtocolType> {
        self.codec.protocol()
    }

    /// Wait for the first frame and report the protocol it declared
    ///
    /// The frame stays queued and is the next one [`recv`](Self::recv)
    /// returns. `None` if the peer closed before sending anything or the
    /// frame could not be decoded.
    pub async fn identify(&mut self) -> Option<ProtocolType> {
        if self.inbound.peeked.is_none() {
            self.inbound.peeked = Some(self.inbound.rx.recv().await?);
        }
        self.codec.protocol()
    }

    /// Split into the outbound sender and inbound receiver
    ///
    /// The returned guard aborts the I/O tasks when dropped.
    pub fn into_parts(self) -> (mpsc::Sender<Message>, Inbound, LinkTasks) {
        let Link {
            outbound,
            inbound,
            reader,
            writer,
            ..
        } = self;
        (outbound, inbound, LinkTasks { reader, writer })
    }

    /// Send one message
    pub async fn send(&self, message: Message) -> TransportResult<()> {
        self.outbound
            .send(message)
            .await
            .map_err(|_| TransportError::closed(&self.name))
    }

    /// Receive one message; `None` once the peer closed the stream
    pub async fn recv(&mut self) -> Option<TransportResult<Message>> {
        self.inbound.recv().await
    }
}

/// Receiving side of a [`Link`]
pub struct Inbound {
    peeked: Option<TransportResult<Message>>,
    rx: mpsc::Receiver<TransportResult<Message>>,
}

impl Inbound {
    /// Next decoded frame; `None` once the reader stopped
    pub async fn recv(&mut self) -> Option<TransportResult<Message>> {
        if let Some(item) = self.peeked.take() {
            return Some(item);
        }
        self.rx.recv().await
    }
}

/// I/O tasks of a split [`Link`]
pub struct LinkTasks {
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl LinkTasks {
    /// Wait up to `grace_ms` for the writer to flush, then stop both tasks
    ///
    /// The writer finishes once every outbound sender is dropped.
    pub async fn drain(mut self, io: &IoContext, grace_ms: u64) {
        tokio::select! {
            _ = &mut self.writer => {}
            _ = io.sleep_ms(grace_ms) => {
                debug!(grace_ms, "writer did not drain in time");
            }
        }
    }
}

impl Drop for LinkTasks {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn writer_task<W: AsyncWrite + Unpin>(
    name: String,
    mut write_half: W,
    mut outbound: mpsc::Receiver<Message>,
    codec: MessageCodec,
) {
    while let Some(message) = outbound.recv().await {
        let framed = match codec.encode(&message) {
            Ok(framed) => framed,
            Err(e) => {
                warn!(link = %name, kind = %message.kind(), error = %e, "dropping unencodable message");
                continue;
            }
        };
        if let Err(e) = write_frame(&mut write_half, &framed).await {
            debug!(link = %name, error = %e, "write failed");
            return;
        }
    }
    let _ = write_half.shutdown().await;
    debug!(link = %name, "writer task exiting");
}

async fn reader_task<R: AsyncRead + Unpin>(
    name: String,
    mut read_half: R,
    inbound: mpsc::Sender<TransportResult<Message>>,
    codec: MessageCodec,
) {
    loop {
        let item = match read_frame(&mut read_half).await {
            Ok(None) => break,
            Ok(Some(payload)) => codec.decode(&payload),
            Err(e) => Err(e),
        };
        let failed = item.is_err();
        if let Err(e) = &item {
            debug!(link = %name, error = %e, "read failed");
        }
        if inbound.send(item).await.is_err() || failed {
            break;
        }
    }
    debug!(link = %name, "reader task exiting");
}

// =============================================================================
// TCP
// =============================================================================

/// Connect to `addr` and speak `protocol`
pub async fn connect_tcp(
    addr: impl ToSocketAddrs,
    protocol: ProtocolType,
) -> TransportResult<Link> {
    let stream = TcpStream::connect(addr).await?;
    stream.set_nodelay(true)?;
    let name = stream
        .peer_addr()
        .map(|a| a.to_string())
        .unwrap_or_else(|_| "tcp".into());
    Ok(Link::spawn(name, stream, MessageCodec::new(protocol)))
}

/// Accepts framed links on a TCP port
///
/// Accepted links use an unbound codec: the protocol is whatever the client
/// declares in its first frame.
pub struct LinkListener {
    listener: TcpListener,
}

impl LinkListener {
    /// Bind to `addr`
    pub async fn bind(addr: impl ToSocketAddrs) -> TransportResult<Self> {
        Ok(Self {
            listener: TcpListener::bind(addr).await?,
        })
    }

    /// Local address the listener is bound to
    pub fn local_addr(&self) -> TransportResult<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Accept the next connection
    pub async fn accept(&self) -> TransportResult<(Link, SocketAddr)> {
        let (stream, peer) = self.listener.accept().await?;
        stream.set_nodelay(true)?;
        Ok((
            Link::spawn(peer.to_string(), stream, MessageCodec::unbound()),
            peer,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use eddy_core::Interest;

    #[tokio::test]
    async fn test_memory_pair_delivers_in_order() {
        let (client, mut server) = Link::memory_pair(ProtocolType::Interest);

        client
            .send(Message::InterestRegistration(Interest::All))
            .await
            .unwrap();
        client.send(Message::Heartbeat).await.unwrap();

        assert_eq!(
            server.recv().await.unwrap().unwrap(),
            Message::InterestRegistration(Interest::All)
        );
        assert_eq!(server.recv().await.unwrap().unwrap(), Message::Heartbeat);
    }

    #[tokio::test]
    async fn test_dropping_sender_ends_peer_stream() {
        let (client, mut server) = Link::memory_pair(ProtocolType::Registration);
        let (outbound, _inbound, _tasks) = client.into_parts();
        drop(outbound);

        assert!(server.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_identify_keeps_first_frame() {
        let listener = LinkListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = connect_tcp(addr, ProtocolType::Registration).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        client.send(Message::Heartbeat).await.unwrap();
        client.send(Message::unregister(None)).await.unwrap();

        assert_eq!(server.identify().await, Some(ProtocolType::Registration));
        assert_eq!(server.identify().await, Some(ProtocolType::Registration));
        assert_eq!(server.recv().await.unwrap().unwrap(), Message::Heartbeat);
        assert_eq!(
            server.recv().await.unwrap().unwrap(),
            Message::unregister(None)
        );
    }

    #[tokio::test]
    async fn test_identify_on_closed_link() {
        let (client, mut server) = Link::memory_pair(ProtocolType::Interest);
        drop(client);
        assert_eq!(server.identify().await, None);
    }

    #[tokio::test]
    async fn test_tcp_link_adopts_client_protocol() {
        let listener = LinkListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = connect_tcp(addr, ProtocolType::Interest).await.unwrap();
        let (mut server, _) = listener.accept().await.unwrap();
        assert_eq!(server.protocol(), None);

        client.send(Message::UnregisterInterestSet).await.unwrap();
        assert_eq!(
            server.recv().await.unwrap().unwrap(),
            Message::UnregisterInterestSet
        );
        assert_eq!(server.protocol(), Some(ProtocolType::Interest));

        server.send(Message::Acknowledgement).await.unwrap();
        let mut client = client;
        assert_eq!(
            client.recv().await.unwrap().unwrap(),
            Message::Acknowledgement
        );
    }
}
