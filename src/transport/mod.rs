//! The `transport` module is responsible for the byte stream between this
//! client and the broker.
//!
//! It parses `tcp://host:port` broker URLs and wraps a TCP connection with the
//! two primitives the session needs: a serialized `write_all` and a
//! cancellable `read_exact`.

pub mod tcp;
pub mod url;

pub use tcp::Transport;
pub use url::parse_url;
