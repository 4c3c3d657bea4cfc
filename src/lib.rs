//! pcc: a printable character counting server.
//!
//! Clients send a file as one length-prefixed frame; the server replies
//! with the number of printable ASCII bytes (32..=126) in it and keeps a
//! running per-character histogram across all clients.
//!
//! Features:
//! - Sequential, one-connection-at-a-time accept loop
//! - Bounded streaming of arbitrarily large payloads
//! - Interrupt-driven shutdown that never cuts a transfer short
//! - Configuration via CLI arguments or TOML file

pub mod client;
pub mod config;
pub mod connection;
pub mod histogram;
pub mod logging;
pub mod protocol;
pub mod server;
pub mod shutdown;

pub use histogram::{Histogram, Tally};
pub use server::{Server, ServerError};
pub use shutdown::Shutdown;
