use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::protocol::{Packet, PacketType, RemainingLength, decode};
use crate::transport::Transport;
use crate::utils::error::{Error, Result};

/// Reads one complete packet off the transport.
///
/// The whole body is always consumed, so the stream stays framed. Bodies of
/// packet types this client does not decode are drained without buffering
/// and reported as [`Error::UnsupportedPacketType`].
pub async fn read_packet(transport: &Transport) -> Result<Packet> {
    let header = transport.read_u8().await?;

    let mut decoder = RemainingLength::new();
    let len = loop {
        if let Some(len) = decoder.push(transport.read_u8().await?)? {
            break len;
        }
    };

    let code = header >> 4;
    if !matches!(
        PacketType::from_u8(code),
        Some(PacketType::ConnAck | PacketType::Publish)
    ) {
        transport.discard(len).await?;
        return Err(Error::UnsupportedPacketType(code));
    }

    let mut body = vec![0u8; len];
    transport.read_exact(&mut body).await?;
    decode(header, &body)
}

/// Frames inbound packets and queues them until the transport fails, the
/// queue's consumer goes away, or `cancel` fires.
pub async fn run(
    transport: Arc<Transport>,
    inbound: mpsc::Sender<Packet>,
    cancel: CancellationToken,
) {
    loop {
        let res = tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            res = read_packet(&transport) => res,
        };

        let packet = match res {
            Ok(packet) => packet,
            Err(Error::UnsupportedPacketType(code)) => {
                warn!(
                    "skipping unsupported packet type {code} from {}",
                    transport.peer()
                );
                continue;
            }
            Err(e) => {
                debug!("reader for {} stopped: {e}", transport.peer());
                break;
            }
        };

        debug!("received {:?}", packet.packet_type());
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            sent = inbound.send(packet) => {
                if sent.is_err() {
                    break;
                }
            }
        }
    }
    debug!("reader loop for {} exited", transport.peer());
}
