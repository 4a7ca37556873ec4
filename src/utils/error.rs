//! The `error` module defines the error type shared by every layer of `popmqtt`.
//!
//! Codec, transport and session failures all surface as [`Error`], so callers
//! of `Session::connect`, `publish`, `subscribe` and `disconnect` match on a
//! single enum.

use std::io;

use thiserror::Error;

use crate::protocol::ConnectReturnCode;

/// Crate-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid URL: {0}")]
    InvalidUrl(String),

    #[error("unsupported scheme: {0}")]
    UnsupportedScheme(String),

    #[error("failed to connect to {addr}: {source}")]
    TransportDial {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("transport I/O error: {0}")]
    TransportIo(#[source] io::Error),

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("transport closed")]
    Closed,

    #[error("malformed remaining length")]
    MalformedLength,

    #[error("malformed packet: {0}")]
    MalformedPacket(String),

    #[error("connection refused: {0}")]
    ConnectionRefused(ConnectReturnCode),

    #[error("unsupported packet type {0}")]
    UnsupportedPacketType(u8),

    #[error("string of {0} bytes does not fit a 16-bit length prefix")]
    StringTooLong(usize),

    #[error("remaining length {0} exceeds the protocol maximum")]
    PacketTooLarge(usize),

    #[error("session is not connected")]
    NotConnected,

    #[error("session has already been connected")]
    AlreadyConnected,

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::UnexpectedEof,
            _ => Error::TransportIo(err),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
