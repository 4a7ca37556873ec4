//! The `protocol` module implements the subset of MQTT 3.1.1 this client speaks.
//!
//! `packet` holds the strongly typed control packets and `codec` turns them
//! into (and back from) their exact wire layout: fixed header with a
//! variable-length remaining length, length-prefixed strings and big-endian
//! integers.

pub mod codec;
pub mod packet;

pub use codec::{MAX_REMAINING_LENGTH, RemainingLength, decode, encode};
pub use packet::{
    ConnAck, Connect, ConnectReturnCode, Packet, PacketId, PacketType, Publish, QoS, Subscribe,
};
