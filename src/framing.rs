//! Inbound wire framing and chunk reassembly (spec §4.3).
//!
//! Wire frame: `[magic:0xAA][type:u8][chunkId:u8][chunkNum:u8][totalChunks:u8]
//! [dataLen:u16 LE][payload[dataLen]][xorChecksum:u8]`. A frame that fails
//! any of the magic/type/length/checksum checks produces no state change —
//! it is simply dropped (spec §4.3, §7).

use std::collections::HashSet;

use crate::bytes::ByteReader;
use crate::error::FrameError;

pub const MAGIC: u8 = 0xAA;
pub const TYPE_DATA: u8 = 0x01;

/// Opcode that starts a chunked file upload (spec §6: `0x0D upload`). It is
/// the only opcode whose subsequent chunks get appended rather than
/// dropped (spec §4.3).
pub const UPLOAD_OPCODE: u8 = 0x0D;

/// Maximum payload bytes per outbound chunk (spec §4.3).
pub const MAX_CHUNK_SIZE: usize = 500;

struct RawFrame<'a> {
    chunk_id: u8,
    chunk_num: u8,
    total_chunks: u8,
    payload: &'a [u8],
}

fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, b| acc ^ b)
}

fn decode_frame(bytes: &[u8]) -> Result<RawFrame<'_>, FrameError> {
    let mut r = ByteReader::new(bytes);
    let magic = r.read_u8().map_err(|_| FrameError::Truncated)?;
    if magic != MAGIC {
        return Err(FrameError::BadMagic);
    }
    let ty = r.read_u8().map_err(|_| FrameError::Truncated)?;
    if ty != TYPE_DATA {
        return Err(FrameError::BadType);
    }
    let chunk_id = r.read_u8().map_err(|_| FrameError::Truncated)?;
    let chunk_num = r.read_u8().map_err(|_| FrameError::Truncated)?;
    let total_chunks = r.read_u8().map_err(|_| FrameError::Truncated)?;
    let data_len = r.read_u16_le().map_err(|_| FrameError::Truncated)? as usize;

    // Checksum is XOR over every byte preceding it, so it must be computed
    // before consuming the payload.
    // 7 header bytes (magic, type, chunkId, chunkNum, totalChunks, dataLen)
    // precede the payload; one checksum byte follows it.
    let without_checksum = bytes.len().checked_sub(1).ok_or(FrameError::Truncated)?;
    if without_checksum != 7 + data_len {
        return Err(FrameError::LengthMismatch);
    }

    let payload = r.read_slice(data_len).map_err(|_| FrameError::LengthMismatch)?;
    let wire_checksum = r.read_u8().map_err(|_| FrameError::Truncated)?;
    let computed = checksum(&bytes[..bytes.len() - 1]);
    if computed != wire_checksum {
        return Err(FrameError::ChecksumMismatch);
    }

    Ok(RawFrame {
        chunk_id,
        chunk_num,
        total_chunks,
        payload,
    })
}

/// Encodes one outbound frame into `out`, appending to whatever is already
/// there.
pub fn encode_frame(chunk_id: u8, chunk_num: u8, total_chunks: u8, payload: &[u8], out: &mut Vec<u8>) {
    let start = out.len();
    out.push(MAGIC);
    out.push(TYPE_DATA);
    out.push(chunk_id);
    out.push(chunk_num);
    out.push(total_chunks);
    out.extend_from_slice(&(payload.len() as u16).to_le_bytes());
    out.extend_from_slice(payload);
    let cksum = checksum(&out[start..]);
    out.push(cksum);
}

/// What a freshly-decoded frame means for the dispatcher.
pub enum Inbound<'a> {
    /// A fully-formed command ready to dispatch: either a single-packet
    /// frame, or the first chunk of a multi-chunk message (which spec
    /// requires be dispatched immediately for forward compatibility, and
    /// which doubles as the upload-initiation packet for `UPLOAD_OPCODE`).
    Command { chunk_id: u8, opcode: u8, payload: &'a [u8], total_chunks: u8 },
    /// A continuation chunk of an in-progress upload.
    UploadChunk {
        chunk_id: u8,
        chunk_num: u8,
        total_chunks: u8,
        payload: &'a [u8],
        /// True when `chunk_num == total_chunks`: the caller should close
        /// the file after appending this chunk.
        done: bool,
    },
    /// A continuation chunk of some other chunked opcode, or a chunk
    /// belonging to no known upload. Per spec §4.3 these are silently
    /// dropped.
    Dropped,
}

/// Tracks which chunk-ids are mid-upload so later chunks route correctly.
#[derive(Default)]
pub struct FrameReassembler {
    active_uploads: HashSet<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed<'a>(&mut self, bytes: &'a [u8]) -> Result<Inbound<'a>, FrameError> {
        let frame = decode_frame(bytes)?;

        if frame.total_chunks <= 1 {
            self.active_uploads.remove(&frame.chunk_id);
            let (opcode, rest) = frame
                .payload
                .split_first()
                .ok_or(FrameError::LengthMismatch)?;
            return Ok(Inbound::Command {
                chunk_id: frame.chunk_id,
                opcode: *opcode,
                payload: rest,
                total_chunks: frame.total_chunks,
            });
        }

        if frame.chunk_num <= 1 {
            let (opcode, rest) = frame
                .payload
                .split_first()
                .ok_or(FrameError::LengthMismatch)?;
            if *opcode == UPLOAD_OPCODE {
                self.active_uploads.insert(frame.chunk_id);
            } else {
                self.active_uploads.remove(&frame.chunk_id);
            }
            return Ok(Inbound::Command {
                chunk_id: frame.chunk_id,
                opcode: *opcode,
                payload: rest,
                total_chunks: frame.total_chunks,
            });
        }

        if self.active_uploads.contains(&frame.chunk_id) {
            let done = frame.chunk_num == frame.total_chunks;
            if done {
                self.active_uploads.remove(&frame.chunk_id);
            }
            return Ok(Inbound::UploadChunk {
                chunk_id: frame.chunk_id,
                chunk_num: frame.chunk_num,
                total_chunks: frame.total_chunks,
                payload: frame.payload,
                done,
            });
        }

        Ok(Inbound::Dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build(chunk_id: u8, chunk_num: u8, total: u8, payload: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        encode_frame(chunk_id, chunk_num, total, payload, &mut out);
        out
    }

    #[test]
    fn single_packet_dispatches_immediately() {
        let frame = build(1, 1, 1, &[0x01, 0x02, 0x03]);
        let mut r = FrameReassembler::new();
        match r.feed(&frame).unwrap() {
            Inbound::Command { opcode, payload, .. } => {
                assert_eq!(opcode, 0x01);
                assert_eq!(payload, &[0x02, 0x03]);
            }
            _ => panic!("expected Command"),
        }
    }

    #[test]
    fn bad_magic_is_rejected() {
        let mut frame = build(1, 1, 1, &[0x01]);
        frame[0] = 0xAB;
        let mut r = FrameReassembler::new();
        assert_eq!(r.feed(&frame).unwrap_err(), FrameError::BadMagic);
    }

    #[test]
    fn bad_checksum_is_rejected() {
        let mut frame = build(1, 1, 1, &[0x01]);
        *frame.last_mut().unwrap() ^= 0xFF;
        let mut r = FrameReassembler::new();
        assert_eq!(r.feed(&frame).unwrap_err(), FrameError::ChecksumMismatch);
    }

    #[test]
    fn upload_continuation_is_appended() {
        let mut r = FrameReassembler::new();
        let first = build(7, 1, 2, &[UPLOAD_OPCODE, 1, 2, 3]);
        match r.feed(&first).unwrap() {
            Inbound::Command { opcode, .. } => assert_eq!(opcode, UPLOAD_OPCODE),
            _ => panic!("expected Command"),
        }
        let second = build(7, 2, 2, &[9, 9, 9]);
        match r.feed(&second).unwrap() {
            Inbound::UploadChunk {
                chunk_id,
                done,
                payload,
                ..
            } => {
                assert_eq!(chunk_id, 7);
                assert!(done);
                assert_eq!(payload, &[9, 9, 9]);
            }
            _ => panic!("expected UploadChunk"),
        }
    }

    #[test]
    fn non_upload_continuation_is_dropped() {
        let mut r = FrameReassembler::new();
        let first = build(3, 1, 2, &[0x05, 1, 2]);
        r.feed(&first).unwrap();
        let second = build(3, 2, 2, &[9, 9]);
        match r.feed(&second).unwrap() {
            Inbound::Dropped => {}
            _ => panic!("expected Dropped"),
        }
    }
}
