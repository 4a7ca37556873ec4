use std::fmt;

use bytes::Bytes;

/// MQTT control packet types (high nibble of the fixed header).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum PacketType {
    Connect = 1,
    ConnAck = 2,
    Publish = 3,
    PubAck = 4,
    PubRec = 5,
    PubRel = 6,
    PubComp = 7,
    Subscribe = 8,
    SubAck = 9,
    Unsubscribe = 10,
    UnsubAck = 11,
    PingReq = 12,
    PingResp = 13,
    Disconnect = 14,
}

impl PacketType {
    /// Maps a header nibble to a packet type. Returns `None` for 0 and 15,
    /// which MQTT 3.1.1 reserves.
    pub fn from_u8(value: u8) -> Option<Self> {
        let ty = match value {
            1 => PacketType::Connect,
            2 => PacketType::ConnAck,
            3 => PacketType::Publish,
            4 => PacketType::PubAck,
            5 => PacketType::PubRec,
            6 => PacketType::PubRel,
            7 => PacketType::PubComp,
            8 => PacketType::Subscribe,
            9 => PacketType::SubAck,
            10 => PacketType::Unsubscribe,
            11 => PacketType::UnsubAck,
            12 => PacketType::PingReq,
            13 => PacketType::PingResp,
            14 => PacketType::Disconnect,
            _ => return None,
        };
        Some(ty)
    }
}

/// Quality of Service levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
#[allow(clippy::enum_variant_names)]
pub enum QoS {
    /// Fire and forget.
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(other),
        }
    }
}

/// Non-zero 16-bit identifier carried by SUBSCRIBE and QoS >= 1 PUBLISH.
pub type PacketId = u16;

/// The return code a broker places in CONNACK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReturnCode {
    Accepted,
    UnacceptableProtocolVersion,
    IdentifierRejected,
    ServerUnavailable,
    BadCredentials,
    NotAuthorized,
    Unknown(u8),
}

impl From<u8> for ConnectReturnCode {
    fn from(code: u8) -> Self {
        match code {
            0 => ConnectReturnCode::Accepted,
            1 => ConnectReturnCode::UnacceptableProtocolVersion,
            2 => ConnectReturnCode::IdentifierRejected,
            3 => ConnectReturnCode::ServerUnavailable,
            4 => ConnectReturnCode::BadCredentials,
            5 => ConnectReturnCode::NotAuthorized,
            other => ConnectReturnCode::Unknown(other),
        }
    }
}

impl fmt::Display for ConnectReturnCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectReturnCode::Accepted => write!(f, "accepted"),
            ConnectReturnCode::UnacceptableProtocolVersion => {
                write!(f, "unacceptable protocol version")
            }
            ConnectReturnCode::IdentifierRejected => write!(f, "identifier rejected"),
            ConnectReturnCode::ServerUnavailable => write!(f, "server unavailable"),
            ConnectReturnCode::BadCredentials => write!(f, "bad user name or password"),
            ConnectReturnCode::NotAuthorized => write!(f, "not authorized"),
            ConnectReturnCode::Unknown(code) => write!(f, "unknown return code {code}"),
        }
    }
}

/// CONNECT. Protocol name and level are fixed to MQTT 3.1.1; will and
/// credentials are never set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Connect {
    pub client_id: String,
    pub keep_alive: u16,
    pub clean_session: bool,
}

impl Connect {
    /// A CONNECT with a clean session and a 10 second keep-alive.
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive: 10,
            clean_session: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnAck {
    /// Connect-acknowledge flags. Bit 0 is session-present, the rest are reserved.
    pub flags: u8,
    pub return_code: u8,
}

impl ConnAck {
    pub fn session_present(&self) -> bool {
        self.flags & 0x01 != 0
    }

    pub fn code(&self) -> ConnectReturnCode {
        ConnectReturnCode::from(self.return_code)
    }
}

/// PUBLISH in either direction. `packet_id` is `Some` exactly when `qos` is
/// above [`QoS::AtMostOnce`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Publish {
    pub topic: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub packet_id: Option<PacketId>,
    pub dup: bool,
    pub retain: bool,
}

impl Publish {
    /// A QoS 0 publish with no flags set.
    pub fn at_most_once(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            qos: QoS::AtMostOnce,
            packet_id: None,
            dup: false,
            retain: false,
        }
    }
}

/// Single-filter SUBSCRIBE.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subscribe {
    pub packet_id: PacketId,
    pub topic: String,
    pub qos: QoS,
}

/// Every packet this client sends or receives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    Connect(Connect),
    ConnAck(ConnAck),
    Publish(Publish),
    Subscribe(Subscribe),
    Disconnect,
}

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::Connect(_) => PacketType::Connect,
            Packet::ConnAck(_) => PacketType::ConnAck,
            Packet::Publish(_) => PacketType::Publish,
            Packet::Subscribe(_) => PacketType::Subscribe,
            Packet::Disconnect => PacketType::Disconnect,
        }
    }

    pub fn packet_id(&self) -> Option<PacketId> {
        match self {
            Packet::Publish(publish) => publish.packet_id,
            Packet::Subscribe(subscribe) => Some(subscribe.packet_id),
            _ => None,
        }
    }
}
