use std::{io, net::SocketAddr, sync::Arc, time::Duration};

use tokio::net::{TcpListener, TcpStream};
use tracing::{error, info, warn};

use crate::{
    broadcast::Broadcaster,
    config::ServerConfig,
    error::ServerError,
    pool::WorkerPool,
    registry::ClientRegistry,
    session::ClientSession,
};

const ACCEPT_BACKOFF: Duration = Duration::from_millis(100);

/// Binds `port` on every interface with default settings and serves until
/// the listening socket fails. Only returns on error.
pub async fn start_server(port: u16) -> Result<(), ServerError> {
    Server::bind(ServerConfig::with_port(port)).await?.run().await
}

/// Accepts connections and hands each one to the worker pool as a session.
pub struct Server {
    listener: TcpListener,
    registry: Arc<ClientRegistry>,
    pool: WorkerPool,
    broadcaster: Broadcaster,
    write_timeout: Duration,
}

impl Server {
    pub async fn bind(config: ServerConfig) -> Result<Self, ServerError> {
        let addr = config.socket_addr();
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;

        Ok(Self {
            listener,
            registry: Arc::new(ClientRegistry::new()),
            pool: WorkerPool::new(config.workers),
            broadcaster: Broadcaster::new(config.write_timeout),
            write_timeout: config.write_timeout,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    pub fn registry(&self) -> Arc<ClientRegistry> {
        Arc::clone(&self.registry)
    }

    /// Runs the accept loop. Never returns while the listening socket is healthy.
    pub async fn run(self) -> Result<(), ServerError> {
        if let Ok(addr) = self.local_addr() {
            info!(workers = self.pool.size(), "server listening on {}", addr);
        }

        loop {
            match self.listener.accept().await {
                Ok((stream, peer)) => self.dispatch(stream, peer),
                Err(err) => self.handle_accept_error(err).await?,
            }
        }
    }

    fn dispatch(&self, stream: TcpStream, peer: SocketAddr) {
        info!(%peer, queued = self.pool.queued(), "accepted connection");
        let session = ClientSession::from_stream(
            stream,
            Arc::clone(&self.registry),
            self.broadcaster,
            self.write_timeout,
        );
        self.pool.submit(async move {
            session.run().await;
        });
    }

    async fn handle_accept_error(&self, err: io::Error) -> Result<(), ServerError> {
        match classify_accept_error(&err) {
            AcceptFailure::Connection => {
                warn!(error = ?err, "failed to accept connection");
                Ok(())
            }
            AcceptFailure::Resource => {
                if let Err(socket_err) = self.listener.local_addr() {
                    error!(error = ?socket_err, "listening socket became unusable");
                    return Err(ServerError::Listener(err));
                }
                warn!(error = ?err, "failed to accept connection; backing off");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
                Ok(())
            }
            AcceptFailure::Listener => {
                error!(error = ?err, "listening socket became unusable");
                Err(ServerError::Listener(err))
            }
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum AcceptFailure {
    /// The pending connection died before we got to it.
    Connection,
    /// Typically descriptor or memory exhaustion; worth retrying after a pause.
    Resource,
    /// The listening socket itself is broken.
    Listener,
}

fn classify_accept_error(err: &io::Error) -> AcceptFailure {
    match err.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::Interrupted
        | io::ErrorKind::WouldBlock
        | io::ErrorKind::TimedOut => AcceptFailure::Connection,
        io::ErrorKind::InvalidInput | io::ErrorKind::NotConnected | io::ErrorKind::Unsupported => {
            AcceptFailure::Listener
        }
        _ => AcceptFailure::Resource,
    }
}
