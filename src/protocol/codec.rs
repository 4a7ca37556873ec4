//! Byte-exact MQTT 3.1.1 encoding and decoding.
//!
//! Encoding produces a complete packet (fixed header, variable header and
//! payload) in one buffer so it can be written with a single `write_all`.
//! Decoding works on a packet body whose length has already been framed by
//! the fixed header.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::packet::{ConnAck, Connect, Packet, PacketType, Publish, QoS, Subscribe};
use crate::utils::error::{Error, Result};

/// Largest value a four byte remaining length can carry.
pub const MAX_REMAINING_LENGTH: usize = 268_435_455;

const PROTOCOL_NAME: &str = "MQTT";
const PROTOCOL_LEVEL: u8 = 4;
const CLEAN_SESSION: u8 = 0x02;
const SUBSCRIBE_FLAGS: u8 = 0x02;

/// Appends the variable-length encoding of `len` to `buf`.
///
/// Returns the number of bytes written (1 to 4).
pub fn encode_remaining_length(mut len: usize, buf: &mut BytesMut) -> Result<usize> {
    if len > MAX_REMAINING_LENGTH {
        return Err(Error::PacketTooLarge(len));
    }
    let start = buf.len();
    loop {
        let mut digit = (len % 128) as u8;
        len /= 128;
        if len > 0 {
            digit |= 0x80;
        }
        buf.put_u8(digit);
        if len == 0 {
            break;
        }
    }
    Ok(buf.len() - start)
}

/// Incremental remaining-length decoder, fed one byte at a time.
///
/// Used both for in-memory buffers and for reading straight off a stream.
#[derive(Debug)]
pub struct RemainingLength {
    value: usize,
    multiplier: usize,
    consumed: usize,
}

impl Default for RemainingLength {
    fn default() -> Self {
        Self::new()
    }
}

impl RemainingLength {
    pub fn new() -> Self {
        Self {
            value: 0,
            multiplier: 1,
            consumed: 0,
        }
    }

    /// Feeds the next byte. Returns `Some(length)` once the final byte has
    /// been seen, `None` if another byte is needed.
    pub fn push(&mut self, byte: u8) -> Result<Option<usize>> {
        if self.consumed == 4 {
            return Err(Error::MalformedLength);
        }
        self.consumed += 1;
        self.value += (byte & 0x7F) as usize * self.multiplier;
        if byte & 0x80 == 0 {
            return Ok(Some(self.value));
        }
        if self.consumed == 4 {
            return Err(Error::MalformedLength);
        }
        self.multiplier *= 128;
        Ok(None)
    }

    /// Bytes fed so far.
    pub fn consumed(&self) -> usize {
        self.consumed
    }
}

/// Decodes a remaining length from the front of `buf`.
///
/// Returns `Ok(Some((value, bytes_consumed)))`, or `Ok(None)` if `buf` ends
/// before the final length byte.
pub fn decode_remaining_length(buf: &[u8]) -> Result<Option<(usize, usize)>> {
    let mut decoder = RemainingLength::new();
    for &byte in buf {
        if let Some(value) = decoder.push(byte)? {
            return Ok(Some((value, decoder.consumed())));
        }
    }
    Ok(None)
}

/// Appends a two-byte big-endian length followed by the bytes themselves.
pub fn put_bytes(buf: &mut BytesMut, bytes: &[u8]) -> Result<()> {
    let len = u16::try_from(bytes.len()).map_err(|_| Error::StringTooLong(bytes.len()))?;
    buf.put_u16(len);
    buf.put_slice(bytes);
    Ok(())
}

pub fn put_string(buf: &mut BytesMut, s: &str) -> Result<()> {
    put_bytes(buf, s.as_bytes())
}

fn string_len(s: &str) -> Result<usize> {
    if s.len() > u16::MAX as usize {
        return Err(Error::StringTooLong(s.len()));
    }
    Ok(2 + s.len())
}

fn fixed_header(
    buf: &mut BytesMut,
    packet_type: PacketType,
    flags: u8,
    remaining: usize,
) -> Result<()> {
    buf.put_u8(((packet_type as u8) << 4) | (flags & 0x0F));
    encode_remaining_length(remaining, buf)?;
    Ok(())
}

/// Serializes `packet` into a freshly allocated buffer.
pub fn encode(packet: &Packet) -> Result<BytesMut> {
    match packet {
        Packet::Connect(connect) => encode_connect(connect),
        Packet::ConnAck(connack) => Ok(encode_connack(connack)),
        Packet::Publish(publish) => encode_publish(publish),
        Packet::Subscribe(subscribe) => encode_subscribe(subscribe),
        Packet::Disconnect => Ok(encode_disconnect()),
    }
}

fn encode_connect(connect: &Connect) -> Result<BytesMut> {
    // name + level + flags + keep-alive
    let variable_header = 2 + PROTOCOL_NAME.len() + 1 + 1 + 2;
    let remaining = variable_header + string_len(&connect.client_id)?;

    let mut buf = BytesMut::with_capacity(5 + remaining);
    fixed_header(&mut buf, PacketType::Connect, 0, remaining)?;
    put_string(&mut buf, PROTOCOL_NAME)?;
    buf.put_u8(PROTOCOL_LEVEL);
    buf.put_u8(if connect.clean_session { CLEAN_SESSION } else { 0 });
    buf.put_u16(connect.keep_alive);
    put_string(&mut buf, &connect.client_id)?;
    Ok(buf)
}

fn encode_connack(connack: &ConnAck) -> BytesMut {
    let mut buf = BytesMut::with_capacity(4);
    buf.put_u8((PacketType::ConnAck as u8) << 4);
    buf.put_u8(2);
    buf.put_u8(connack.flags);
    buf.put_u8(connack.return_code);
    buf
}

fn encode_publish(publish: &Publish) -> Result<BytesMut> {
    let mut flags = (publish.qos as u8) << 1;
    if publish.dup {
        flags |= 0x08;
    }
    if publish.retain {
        flags |= 0x01;
    }

    let packet_id = match (publish.qos, publish.packet_id) {
        (QoS::AtMostOnce, _) => None,
        (_, Some(id)) if id != 0 => Some(id),
        _ => {
            return Err(Error::MalformedPacket(
                "PUBLISH above QoS 0 needs a non-zero packet id".to_string(),
            ));
        }
    };

    let mut remaining = string_len(&publish.topic)? + publish.payload.len();
    if packet_id.is_some() {
        remaining += 2;
    }

    let mut buf = BytesMut::with_capacity(5 + remaining);
    fixed_header(&mut buf, PacketType::Publish, flags, remaining)?;
    put_string(&mut buf, &publish.topic)?;
    if let Some(id) = packet_id {
        buf.put_u16(id);
    }
    buf.put_slice(&publish.payload);
    Ok(buf)
}

fn encode_subscribe(subscribe: &Subscribe) -> Result<BytesMut> {
    if subscribe.packet_id == 0 {
        return Err(Error::MalformedPacket(
            "SUBSCRIBE needs a non-zero packet id".to_string(),
        ));
    }
    let remaining = 2 + string_len(&subscribe.topic)? + 1;

    let mut buf = BytesMut::with_capacity(5 + remaining);
    fixed_header(&mut buf, PacketType::Subscribe, SUBSCRIBE_FLAGS, remaining)?;
    buf.put_u16(subscribe.packet_id);
    put_string(&mut buf, &subscribe.topic)?;
    buf.put_u8(subscribe.qos as u8);
    Ok(buf)
}

fn encode_disconnect() -> BytesMut {
    let mut buf = BytesMut::with_capacity(2);
    buf.put_u8((PacketType::Disconnect as u8) << 4);
    buf.put_u8(0);
    buf
}

/// Decodes an inbound packet from its first header byte and framed body.
///
/// Only CONNACK and PUBLISH travel from broker to this client; any other
/// type yields [`Error::UnsupportedPacketType`].
pub fn decode(header: u8, body: &[u8]) -> Result<Packet> {
    let code = header >> 4;
    let flags = header & 0x0F;
    match PacketType::from_u8(code) {
        Some(PacketType::ConnAck) => decode_connack(body).map(Packet::ConnAck),
        Some(PacketType::Publish) => decode_publish(flags, body).map(Packet::Publish),
        _ => Err(Error::UnsupportedPacketType(code)),
    }
}

pub fn decode_connack(body: &[u8]) -> Result<ConnAck> {
    if body.len() != 2 {
        return Err(Error::MalformedPacket(format!(
            "CONNACK remaining length is {}, expected 2",
            body.len()
        )));
    }
    Ok(ConnAck {
        flags: body[0],
        return_code: body[1],
    })
}

pub fn decode_publish(flags: u8, mut body: &[u8]) -> Result<Publish> {
    let qos = QoS::try_from((flags >> 1) & 0x03)
        .map_err(|bits| Error::MalformedPacket(format!("invalid QoS bits {bits}")))?;
    let dup = flags & 0x08 != 0;
    let retain = flags & 0x01 != 0;

    let topic = read_string(&mut body)?;
    let packet_id = if qos == QoS::AtMostOnce {
        None
    } else {
        if body.remaining() < 2 {
            return Err(Error::MalformedPacket(
                "PUBLISH truncated before packet id".to_string(),
            ));
        }
        match body.get_u16() {
            0 => {
                return Err(Error::MalformedPacket(
                    "PUBLISH packet id is zero".to_string(),
                ));
            }
            id => Some(id),
        }
    };

    Ok(Publish {
        topic,
        payload: Bytes::copy_from_slice(body),
        qos,
        packet_id,
        dup,
        retain,
    })
}

/// Reads a length-prefixed UTF-8 string, advancing `buf` past it.
pub fn read_string(buf: &mut &[u8]) -> Result<String> {
    if buf.remaining() < 2 {
        return Err(Error::MalformedPacket(
            "string length prefix truncated".to_string(),
        ));
    }
    let len = buf.get_u16() as usize;
    if buf.remaining() < len {
        return Err(Error::MalformedPacket(format!(
            "string of {len} bytes truncated to {}",
            buf.remaining()
        )));
    }
    let data: &[u8] = *buf;
    let (raw, rest) = data.split_at(len);
    let s = std::str::from_utf8(raw)
        .map_err(|e| Error::MalformedPacket(format!("string is not UTF-8: {e}")))?
        .to_string();
    *buf = rest;
    Ok(s)
}
