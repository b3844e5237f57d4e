use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use crate::pool::DEFAULT_WORKERS;

pub const DEFAULT_WRITE_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interface to listen on. Defaults to every IPv4 interface.
    pub bind_addr: IpAddr,
    pub port: u16,
    /// Number of sessions served at once; further clients wait in the queue.
    pub workers: usize,
    /// Upper bound on a single line write to a single recipient.
    pub write_timeout: Duration,
}

impl ServerConfig {
    pub fn with_port(port: u16) -> Self {
        Self {
            port,
            ..Self::default()
        }
    }

    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_addr, self.port)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: 0,
            workers: DEFAULT_WORKERS,
            write_timeout: DEFAULT_WRITE_TIMEOUT,
        }
    }
}
