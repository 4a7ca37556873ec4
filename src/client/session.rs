use std::sync::{Arc, OnceLock};

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::client::dispatcher::Dispatcher;
use crate::client::packet_id::PacketIdCounter;
use crate::client::reader;
use crate::protocol::codec::{decode_connack, encode};
use crate::protocol::{
    ConnAck, Connect, ConnectReturnCode, Packet, PacketId, PacketType, Publish, QoS, Subscribe,
};
use crate::transport::{Transport, parse_url};
use crate::utils::error::{Error, Result};

/// Where a session is in its single connect → operate → close lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Connecting,
    Connected,
    Closed,
}

/// Tunables applied when the session connects.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub keep_alive_secs: u16,
    pub clean_session: bool,
    /// Bound of the inbound packet queue.
    pub queue_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            keep_alive_secs: 10,
            clean_session: true,
            queue_capacity: 64,
        }
    }
}

type Inbound = (mpsc::Sender<Packet>, mpsc::Receiver<Packet>);

/// A single-use MQTT client session.
///
/// [`connect`](Session::connect) performs the handshake and then drives the
/// session until cancelled, so it is usually run on its own task while other
/// tasks share the session through an `Arc` to publish, subscribe and
/// disconnect.
///
/// ```rust,no_run
/// use std::sync::Arc;
/// use popmqtt::{QoS, Session};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> popmqtt::Result<()> {
/// let session = Arc::new(Session::new("sensor-01"));
/// let cancel = CancellationToken::new();
///
/// let driver = {
///     let session = session.clone();
///     let cancel = cancel.clone();
///     tokio::spawn(async move { session.connect(cancel, "tcp://localhost:1883").await })
/// };
///
/// session.ready().await;
/// session.publish("sensors/temperature", "23.5").await?;
/// session.subscribe("commands/#", QoS::AtMostOnce).await?;
/// session.disconnect().await?;
/// cancel.cancel();
/// # let _ = driver.await;
/// # Ok(())
/// # }
/// ```
#[derive(Debug)]
pub struct Session {
    client_id: String,
    options: SessionOptions,
    transport: OnceLock<Arc<Transport>>,
    packet_ids: PacketIdCounter,
    inbound: Mutex<Option<Inbound>>,
    dispatcher: Dispatcher,
    state: watch::Sender<SessionState>,
}

impl Session {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self::with_options(client_id, SessionOptions::default())
    }

    pub fn with_options(client_id: impl Into<String>, options: SessionOptions) -> Self {
        let inbound = mpsc::channel(options.queue_capacity.max(1));
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            client_id: client_id.into(),
            options,
            transport: OnceLock::new(),
            packet_ids: PacketIdCounter::new(),
            inbound: Mutex::new(Some(inbound)),
            dispatcher: Dispatcher::new(),
            state,
        }
    }

    pub fn client_id(&self) -> &str {
        &self.client_id
    }

    pub fn options(&self) -> &SessionOptions {
        &self.options
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    /// Waits until the session is either connected or closed.
    pub async fn ready(&self) -> SessionState {
        let mut rx = self.state.subscribe();
        match rx
            .wait_for(|s| matches!(s, SessionState::Connected | SessionState::Closed))
            .await
        {
            Ok(state) => *state,
            Err(_) => SessionState::Closed,
        }
    }

    /// Registers the callback that receives every inbound PUBLISH.
    pub fn on_publish<F>(&mut self, handler: F)
    where
        F: Fn(Publish) + Send + Sync + 'static,
    {
        self.dispatcher.set_publish_handler(Box::new(handler));
    }

    /// Connects to `url`, completes the CONNECT/CONNACK handshake and then
    /// dispatches inbound packets until `cancel` fires or the connection ends.
    ///
    /// Returns `Ok(())` on cancellation, including while still dialing or
    /// waiting for CONNACK, and when the broker goes away after a successful
    /// handshake. A refused handshake returns
    /// [`Error::ConnectionRefused`].
    pub async fn connect(&self, cancel: CancellationToken, url: &str) -> Result<()> {
        let addr = parse_url(url)?;
        let (inbound_tx, mut inbound_rx) = self
            .inbound
            .lock()
            .await
            .take()
            .ok_or(Error::AlreadyConnected)?;

        self.state.send_replace(SessionState::Connecting);
        // dropping an unfinished handshake drops its transport, closing the socket
        let handshake = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!("{} cancelled before CONNACK", self.client_id);
                self.state.send_replace(SessionState::Closed);
                return Ok(());
            }
            res = self.handshake(addr) => res,
        };
        let transport = match handshake {
            Ok(transport) => transport,
            Err(e) => {
                self.state.send_replace(SessionState::Closed);
                return Err(e);
            }
        };
        info!("{} connected to {addr}", self.client_id);
        self.state.send_replace(SessionState::Connected);

        let reader_cancel = cancel.child_token();
        let reader = tokio::spawn(reader::run(
            transport.clone(),
            inbound_tx,
            reader_cancel.clone(),
        ));

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!("{} cancelled", self.client_id);
                    break;
                }
                packet = inbound_rx.recv() => match packet {
                    Some(packet) => {
                        let packet_type = packet.packet_type();
                        if let Err(e) = self.dispatcher.dispatch(packet) {
                            debug!("dropped inbound {packet_type:?}: {e}");
                        }
                    }
                    None => {
                        debug!("inbound queue for {} closed", self.client_id);
                        break;
                    }
                },
            }
        }

        reader_cancel.cancel();
        transport.close().await;
        if let Err(e) = reader.await {
            warn!("reader task for {} failed: {e}", self.client_id);
        }
        self.state.send_replace(SessionState::Closed);
        info!("{} session closed", self.client_id);
        Ok(())
    }

    async fn handshake(&self, addr: &str) -> Result<Arc<Transport>> {
        let transport = Arc::new(Transport::dial(addr).await?);

        let connect = Connect {
            client_id: self.client_id.clone(),
            keep_alive: self.options.keep_alive_secs,
            clean_session: self.options.clean_session,
        };
        let result = async {
            transport.write_all(&encode(&Packet::Connect(connect))?).await?;
            read_connack(&transport).await
        }
        .await;

        let connack = match result {
            Ok(connack) => connack,
            Err(e) => {
                transport.close().await;
                return Err(e);
            }
        };
        match connack.code() {
            ConnectReturnCode::Accepted => {}
            code => {
                warn!("{addr} refused {}: {code}", self.client_id);
                transport.close().await;
                return Err(Error::ConnectionRefused(code));
            }
        }
        if connack.session_present() {
            debug!("{addr} resumed a stored session for {}", self.client_id);
        }

        if self.transport.set(transport.clone()).is_err() {
            transport.close().await;
            return Err(Error::AlreadyConnected);
        }
        Ok(transport)
    }

    async fn send(&self, packet: &Packet) -> Result<()> {
        let transport = self.transport.get().ok_or(Error::NotConnected)?;
        let bytes = encode(packet)?;
        transport.write_all(&bytes).await?;
        debug!(
            "sent {:?} ({} bytes) to {}",
            packet.packet_type(),
            bytes.len(),
            transport.peer()
        );
        Ok(())
    }

    /// Publishes `payload` to `topic` at QoS 0. Returns once the bytes are
    /// written; no acknowledgement is awaited.
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<()> {
        self.send(&Packet::Publish(Publish::at_most_once(topic, payload)))
            .await
    }

    /// Subscribes to a single topic filter and returns the packet id used.
    ///
    /// The SUBACK is not awaited.
    pub async fn subscribe(&self, topic: &str, qos: QoS) -> Result<PacketId> {
        if self.transport.get().is_none() {
            return Err(Error::NotConnected);
        }
        let packet_id = self.packet_ids.next_id();
        self.send(&Packet::Subscribe(Subscribe {
            packet_id,
            topic: topic.to_string(),
            qos,
        }))
        .await?;
        Ok(packet_id)
    }

    /// Sends DISCONNECT. The connection itself closes when the broker drops
    /// it or the session's cancellation fires.
    pub async fn disconnect(&self) -> Result<()> {
        self.send(&Packet::Disconnect).await
    }
}

/// Reads the four-byte CONNACK that must answer CONNECT.
async fn read_connack(transport: &Transport) -> Result<ConnAck> {
    let mut buf = [0u8; 4];
    transport.read_exact(&mut buf).await?;
    if buf[0] >> 4 != PacketType::ConnAck as u8 {
        return Err(Error::MalformedPacket(format!(
            "expected CONNACK, got packet type {}",
            buf[0] >> 4
        )));
    }
    if buf[1] != 2 {
        return Err(Error::MalformedPacket(format!(
            "CONNACK remaining length is {}, expected 2",
            buf[1]
        )));
    }
    decode_connack(&buf[2..])
}
