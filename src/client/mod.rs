//! The `client` module drives an MQTT session against a broker.
//!
//! It provides the `Session` controller, which owns the connection, the
//! packet-id counter and the inbound queue, together with the background
//! reader loop that frames packets off the wire and the dispatcher that
//! hands them to user callbacks.

pub mod dispatcher;
pub mod packet_id;
pub mod reader;
pub mod session;

pub use dispatcher::{Dispatcher, PublishHandler};
pub use packet_id::PacketIdCounter;
pub use session::{Session, SessionOptions, SessionState};
