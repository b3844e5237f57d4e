//! Line-broadcast server: every newline-terminated line a client sends is
//! relayed to every connected client, the sender included.
//!
//! Each module focuses on a concrete responsibility:
//!
//! - [`server`] binds the listening socket and runs the accept loop, handing
//!   each connection to the [`pool`] of session workers.
//! - [`session`] owns one connection: registers it, reads lines, broadcasts
//!   them, and tears everything down when the peer goes away.
//! - [`registry`] is the shared set of client sinks, the only state sessions
//!   share with each other.
//! - [`broadcast`] fans one line out to every registered sink with a bounded
//!   write per recipient.
//! - [`message`] provides the ISO-8859-1 line codec.
//! - [`config`], [`cli`], and [`error`] hold settings, argument parsing, and
//!   error types.
//!
//! Wire protocol: plain text lines terminated by `\n`. Nothing else is added
//! to a message on its way through, so `nc` or `telnet` work as clients.

pub mod broadcast;
pub mod cli;
pub mod config;
pub mod error;
pub mod message;
pub mod pool;
pub mod registry;
pub mod server;
pub mod session;

pub use error::{DeliveryError, ServerError, SessionError};
pub use server::{Server, start_server};
