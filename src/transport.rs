//! The byte-stream abstraction the framing and chunk-emitter layers sit on
//! top of. A real deployment backs this with a BLE GATT notify
//! characteristic; tests back it with an in-memory channel.

use async_trait::async_trait;

/// A notification-capable byte stream to the mobile client.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Sends one already-framed chunk. Errors are logged by the caller and
    /// otherwise ignored — there is no reliable-delivery layer beneath
    /// this (spec §4.3 describes pacing, not retransmission).
    async fn send(&self, bytes: &[u8]) -> std::io::Result<()>;
}

/// An in-memory transport used by unit tests throughout the crate to
/// observe framed output without a real BLE stack.
pub struct ChannelTransport {
    tx: tokio::sync::mpsc::UnboundedSender<Vec<u8>>,
}

impl ChannelTransport {
    pub fn new() -> (Self, tokio::sync::mpsc::UnboundedReceiver<Vec<u8>>) {
        let (tx, rx) = tokio::sync::mpsc::unbounded_channel();
        (ChannelTransport { tx }, rx)
    }
}

#[async_trait]
impl Transport for ChannelTransport {
    async fn send(&self, bytes: &[u8]) -> std::io::Result<()> {
        self.tx
            .send(bytes.to_vec())
            .map_err(|_| std::io::Error::new(std::io::ErrorKind::BrokenPipe, "receiver dropped"))
    }
}
