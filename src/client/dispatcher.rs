use std::fmt;

use crate::protocol::{Packet, PacketType, Publish};
use crate::utils::error::{Error, Result};

/// Callback invoked for every inbound PUBLISH.
pub type PublishHandler = Box<dyn Fn(Publish) + Send + Sync>;

/// Routes packets taken off the inbound queue to a handler chosen by type.
///
/// Without a registered handler every packet is reported as unsupported.
#[derive(Default)]
pub struct Dispatcher {
    on_publish: Option<PublishHandler>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_publish_handler(&mut self, handler: PublishHandler) {
        self.on_publish = Some(handler);
    }

    pub fn dispatch(&self, packet: Packet) -> Result<()> {
        match packet {
            Packet::Publish(publish) => match &self.on_publish {
                Some(handler) => {
                    handler(publish);
                    Ok(())
                }
                None => Err(Error::UnsupportedPacketType(PacketType::Publish as u8)),
            },
            other => Err(Error::UnsupportedPacketType(other.packet_type() as u8)),
        }
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("on_publish", &self.on_publish.is_some())
            .finish()
    }
}
