//! Outbound framing and pacing (spec §4.3, §5).
//!
//! Mirrors inbound framing: a message larger than [`MAX_CHUNK_SIZE`] is
//! split into consecutively-numbered chunks sharing one random chunk-id.
//! Emission is serialized under a dedicated mutex so two messages' chunks
//! never interleave, and inter-chunk emission is paced to give a slow BLE
//! transport time to drain.

use std::time::Duration;

use rand::Rng;
use tokio::sync::Mutex;
use tokio::time::sleep;

use crate::framing::{encode_frame, MAX_CHUNK_SIZE};
use crate::transport::Transport;

const INTER_CHUNK_DELAY: Duration = Duration::from_millis(30);
const FIRST_CHUNK_DELAY: Duration = Duration::from_millis(50);

/// Acquire timeout for the chunk-emitter mutex (spec §5): on timeout the
/// chunk is dropped with a log rather than blocking the caller forever.
const MUTEX_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(100);

/// Serializes the outbound TX-chunk builder's static buffer (spec §5).
pub struct ChunkEmitter {
    lock: Mutex<()>,
}

impl ChunkEmitter {
    pub fn new() -> Self {
        ChunkEmitter { lock: Mutex::new(()) }
    }

    /// Splits `message` into one or more chunks and sends them in order
    /// through `transport`, holding the emitter mutex for the whole
    /// message so no other caller's chunks can interleave.
    pub async fn emit(&self, transport: &dyn Transport, message: &[u8]) {
        let guard = match tokio::time::timeout(MUTEX_ACQUIRE_TIMEOUT, self.lock.lock()).await {
            Ok(guard) => guard,
            Err(_) => {
                crate::log::warn!("chunk-emitter mutex timed out, dropping message ({} bytes)", message.len());
                return;
            }
        };

        let chunk_id: u8 = rand::rng().random();
        let chunks: Vec<&[u8]> = if message.is_empty() {
            vec![&[]]
        } else {
            message.chunks(MAX_CHUNK_SIZE).collect()
        };
        let total = chunks.len() as u8;

        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_num = (i + 1) as u8;
            let mut out = Vec::with_capacity(chunk.len() + 8);
            encode_frame(chunk_id, chunk_num, total, chunk, &mut out);
            if let Err(e) = transport.send(&out).await {
                crate::log::warn!("transport send failed: {}", e);
                break;
            }
            if chunk_num == 1 {
                sleep(FIRST_CHUNK_DELAY).await;
            } else if chunk_num < total {
                sleep(INTER_CHUNK_DELAY).await;
            }
        }

        drop(guard);
    }
}

impl Default for ChunkEmitter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::ChannelTransport;

    #[tokio::test]
    async fn message_at_exactly_max_chunk_size_is_one_chunk() {
        let (transport, mut rx) = ChannelTransport::new();
        let emitter = ChunkEmitter::new();
        let msg = vec![0xAB; MAX_CHUNK_SIZE];
        emitter.emit(&transport, &msg).await;
        let first = rx.recv().await.unwrap();
        assert!(rx.try_recv().is_err());
        // total chunks field is byte index 4
        assert_eq!(first[4], 1);
    }

    #[tokio::test]
    async fn oversized_message_splits_into_multiple_chunks() {
        let (transport, mut rx) = ChannelTransport::new();
        let emitter = ChunkEmitter::new();
        let msg = vec![0xCD; MAX_CHUNK_SIZE + 10];
        emitter.emit(&transport, &msg).await;
        let first = rx.recv().await.unwrap();
        assert_eq!(first[4], 2);
        let second = rx.recv().await.unwrap();
        assert_eq!(second[2], first[2]); // same chunk id
        assert_eq!(second[3], 2); // chunk num 2
    }
}
