use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::utils::error::{Error, Result};

const DISCARD_CHUNK: usize = 4096;

/// A TCP connection to the broker shared by the reader loop and every sender.
///
/// The stream is split so reads never wait on writes. Each half sits behind
/// its own mutex: writers take the write lock for a whole packet, so the bytes
/// of one packet are never interleaved with another's.
#[derive(Debug)]
pub struct Transport {
    peer: String,
    reader: Mutex<BufReader<OwnedReadHalf>>,
    writer: Mutex<OwnedWriteHalf>,
    closed: CancellationToken,
}

impl Transport {
    /// Opens a TCP connection to `addr` (`host:port`).
    pub async fn dial(addr: &str) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|source| Error::TransportDial {
                addr: addr.to_string(),
                source,
            })?;
        if let Err(e) = stream.set_nodelay(true) {
            debug!("set_nodelay failed for {addr}: {e}");
        }
        debug!("dialed {addr}");
        Ok(Self::from_stream(addr, stream))
    }

    pub fn from_stream(peer: &str, stream: TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self {
            peer: peer.to_string(),
            reader: Mutex::new(BufReader::new(read_half)),
            writer: Mutex::new(write_half),
            closed: CancellationToken::new(),
        }
    }

    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Writes every byte of `buf`, then flushes.
    pub async fn write_all(&self, buf: &[u8]) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Closed);
        }
        let mut writer = self.writer.lock().await;
        writer.write_all(buf).await.map_err(Error::TransportIo)?;
        writer.flush().await.map_err(Error::TransportIo)?;
        Ok(())
    }

    /// Fills `buf` completely. A short stream yields [`Error::UnexpectedEof`];
    /// a local [`close`](Self::close) yields [`Error::Closed`].
    pub async fn read_exact(&self, buf: &mut [u8]) -> Result<()> {
        let mut reader = self.reader.lock().await;
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(Error::Closed),
            res = reader.read_exact(buf) => res.map(|_| ()).map_err(Error::from),
        }
    }

    pub async fn read_u8(&self) -> Result<u8> {
        let mut byte = [0u8; 1];
        self.read_exact(&mut byte).await?;
        Ok(byte[0])
    }

    /// Reads and drops the next `len` bytes, a chunk at a time.
    pub async fn discard(&self, mut len: usize) -> Result<()> {
        let mut scratch = [0u8; DISCARD_CHUNK];
        while len > 0 {
            let n = len.min(DISCARD_CHUNK);
            self.read_exact(&mut scratch[..n]).await?;
            len -= n;
        }
        Ok(())
    }

    /// Closes the connection. Safe to call more than once.
    pub async fn close(&self) {
        if self.closed.is_cancelled() {
            return;
        }
        self.closed.cancel();
        let mut writer = self.writer.lock().await;
        if let Err(e) = writer.shutdown().await {
            debug!("shutdown of {} failed: {e}", self.peer);
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}
