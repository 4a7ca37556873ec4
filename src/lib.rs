//! # popmqtt
//!
//! `popmqtt` is a minimal MQTT 3.1.1 client built with Rust and tokio.
//! It frames and serializes CONNECT, PUBLISH (QoS 0), SUBSCRIBE and
//! DISCONNECT, parses CONNACK and PUBLISH, and drives one client session
//! through connect → operate → disconnect over TCP.
//!
//! ## Core Modules
//!
//! The library is structured into several modules, each with a distinct responsibility:
//!
//! - `protocol`: Packet types and the byte-exact wire codec.
//! - `transport`: `tcp://host:port` parsing and the shared TCP connection.
//! - `client`: The `Session` controller, background reader loop and dispatcher.
//! - `config`: Loading client settings from files and the environment.
//! - `utils`: Shared utilities, such as error handling and logging.

pub mod client;
pub mod config;
pub mod protocol;
pub mod transport;
pub mod utils;

pub use client::{Session, SessionOptions, SessionState};
pub use protocol::{ConnectReturnCode, Packet, PacketId, Publish, QoS};
pub use utils::error::{Error, Result};

#[cfg(test)]
mod tests;
