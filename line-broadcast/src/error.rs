use std::{io, net::SocketAddr, time::Duration};

use thiserror::Error;

/// Failures that stop the acceptor. Nothing else in the server is fatal.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    #[error("listening socket is no longer usable: {0}")]
    Listener(#[source] io::Error),
}

/// Ends one session and nothing else.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("failed to read from client: {0}")]
    Read(#[source] io::Error),
    #[error("failed to close client connection: {0}")]
    Close(#[source] io::Error),
}

/// A single recipient missed a single broadcast.
#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("write failed: {0}")]
    Write(#[source] io::Error),
    #[error("write did not finish within {0:?}")]
    TimedOut(Duration),
}
