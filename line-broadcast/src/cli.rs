use std::{net::IpAddr, ops::RangeInclusive, time::Duration};

use clap::{Args, Parser};
use rand::Rng;

use crate::{
    config::{DEFAULT_WRITE_TIMEOUT, ServerConfig},
    pool::DEFAULT_WORKERS,
};

/// Dynamic/private port range the server is allowed to listen on.
pub const PORT_RANGE: RangeInclusive<u16> = 49152..=65535;

#[derive(Parser, Debug)]
#[command(author, version, about = "Relay every received text line to every connected client", long_about = None)]
pub struct Cli {
    #[command(flatten)]
    pub port: PortSelection,

    /// Address of the interface to listen on.
    #[arg(long, default_value = "0.0.0.0")]
    pub bind: IpAddr,

    /// Number of clients served concurrently; extra clients wait in a queue.
    #[arg(long, default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Milliseconds allowed for one line write to one client.
    #[arg(long, default_value_t = DEFAULT_WRITE_TIMEOUT.as_millis() as u64)]
    pub write_timeout_ms: u64,
}

#[derive(Args, Debug, Clone, Copy)]
#[group(required = true, multiple = false)]
pub struct PortSelection {
    /// Port to listen on (49152-65535).
    #[arg(long, value_parser = parse_port)]
    pub port: Option<u16>,

    /// Pick a random port in 49152-65535.
    #[arg(long)]
    pub random_port: bool,
}

impl PortSelection {
    pub fn resolve(self) -> u16 {
        match self.port {
            Some(port) => port,
            None => random_port(),
        }
    }
}

impl Cli {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            bind_addr: self.bind,
            port: self.port.resolve(),
            workers: self.workers,
            write_timeout: Duration::from_millis(self.write_timeout_ms),
        }
    }
}

pub fn random_port() -> u16 {
    rand::thread_rng().gen_range(PORT_RANGE)
}

fn parse_port(raw: &str) -> Result<u16, String> {
    let port: u16 = raw
        .parse()
        .map_err(|_| format!("'{raw}' is not a port number"))?;
    if PORT_RANGE.contains(&port) {
        Ok(port)
    } else {
        Err(format!(
            "port must be between {} and {}",
            PORT_RANGE.start(),
            PORT_RANGE.end()
        ))
    }
}
