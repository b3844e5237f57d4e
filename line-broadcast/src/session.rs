use std::{net::SocketAddr, sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite, BufReader},
    net::{TcpStream, tcp::OwnedReadHalf},
    time::timeout,
};
use tracing::{debug, info, warn};

use crate::{
    broadcast::Broadcaster,
    error::SessionError,
    message::read_line,
    registry::{ClientRegistry, Sink},
};

/// Why a session's read loop stopped.
#[derive(Debug)]
pub enum SessionEnd {
    /// The peer closed its side of the connection.
    EndOfStream,
    /// Reading failed; treated as a disconnect.
    ReadFailed(SessionError),
}

/// Handles one accepted connection from registration to teardown.
pub struct ClientSession<R> {
    peer: Option<SocketAddr>,
    reader: BufReader<R>,
    sink: Arc<Sink>,
    registry: Arc<ClientRegistry>,
    broadcaster: Broadcaster,
    close_timeout: Duration,
}

impl ClientSession<OwnedReadHalf> {
    pub fn from_stream(
        stream: TcpStream,
        registry: Arc<ClientRegistry>,
        broadcaster: Broadcaster,
        close_timeout: Duration,
    ) -> Self {
        let peer = stream.peer_addr().ok();
        let (reader, writer) = stream.into_split();
        Self::new(peer, reader, writer, registry, broadcaster, close_timeout)
    }
}

impl<R> ClientSession<R>
where
    R: AsyncRead + Unpin,
{
    pub fn new<W>(
        peer: Option<SocketAddr>,
        reader: R,
        writer: W,
        registry: Arc<ClientRegistry>,
        broadcaster: Broadcaster,
        close_timeout: Duration,
    ) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            peer,
            reader: BufReader::new(reader),
            sink: Arc::new(Sink::new(peer, writer)),
            registry,
            broadcaster,
            close_timeout,
        }
    }

    /// Registers the client, relays its lines until it goes away, then
    /// unregisters it and closes the connection.
    pub async fn run(self) -> SessionEnd {
        let ClientSession {
            peer,
            mut reader,
            sink,
            registry,
            broadcaster,
            close_timeout,
        } = self;

        let registration = registry.register(Arc::clone(&sink));
        let client_id = registration.id();
        info!(?peer, client_id, "client connected");

        let end = relay_lines(&mut reader, &registry, broadcaster, peer).await;

        drop(registration);
        debug_assert!(!registry.contains(client_id));
        if let Err(err) = close_sink(&sink, close_timeout).await {
            debug!(?peer, client_id, error = %err, "connection did not close cleanly");
        }
        drop(reader);

        match &end {
            SessionEnd::EndOfStream => info!(?peer, client_id, "client disconnected"),
            SessionEnd::ReadFailed(err) => {
                info!(?peer, client_id, error = %err, "client disconnected after read error")
            }
        }
        end
    }
}

async fn relay_lines<R>(
    reader: &mut BufReader<R>,
    registry: &ClientRegistry,
    broadcaster: Broadcaster,
    peer: Option<SocketAddr>,
) -> SessionEnd
where
    R: AsyncRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        match read_line(reader, &mut buf).await {
            Ok(Some(message)) => {
                info!(?peer, %message, "message received");
                let report = broadcaster.broadcast(&message, registry).await;
                if report.failed > 0 {
                    warn!(
                        ?peer,
                        failed = report.failed,
                        recipients = report.recipients(),
                        "some recipients missed a message"
                    );
                }
            }
            Ok(None) => return SessionEnd::EndOfStream,
            Err(err) => return SessionEnd::ReadFailed(SessionError::Read(err)),
        }
    }
}

async fn close_sink(sink: &Sink, close_timeout: Duration) -> Result<(), SessionError> {
    match timeout(close_timeout, sink.close()).await {
        Ok(result) => result.map_err(SessionError::Close),
        Err(_) => Err(SessionError::Close(std::io::ErrorKind::TimedOut.into())),
    }
}
