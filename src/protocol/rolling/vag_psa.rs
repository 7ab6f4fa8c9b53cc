//! VAG and PSA rolling-code decoders (spec §4.7).
//!
//! VAG: two Manchester preamble variants (300 µs / 500 µs half-period);
//! 80 decoded bits = 64-bit key1 + 16-bit key2; the key2 low byte selects
//! AUT64 (try up to three loaded keys) or XTEA.
//!
//! PSA: dual-timing Manchester (250 µs / 125 µs half-period); 80 decoded
//! bits; dispatch byte 0x23 is a single-pass XOR-chain + checksum +
//! second-stage permutation XOR, dispatch byte 0x36 is a bounded TEA
//! brute-force over two small key-schedule ranges; only buttons in
//! {1, 2, 4} are accepted.

use super::{bits_to_u64, ManchesterDecoder};
use crate::protocol::cipher::{aut64, xtea};
use crate::protocol::{DecodedResult, Decoder, Timing};

const VAG_BITS: u32 = 80;
const VAG_HALF_PERIOD_SHORT_US: u32 = 300;
const VAG_HALF_PERIOD_LONG_US: u32 = 500;

pub struct VagDecoder {
    mh: ManchesterDecoder,
    keys: Vec<aut64::Aut64Key>,
}

impl VagDecoder {
    pub fn new() -> Self {
        VagDecoder { mh: ManchesterDecoder::new(VAG_HALF_PERIOD_SHORT_US), keys: Vec::new() }
    }

    pub fn with_keys(keys: Vec<aut64::Aut64Key>) -> Self {
        VagDecoder { mh: ManchesterDecoder::new(VAG_HALF_PERIOD_SHORT_US), keys }
    }
}

impl Default for VagDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for VagDecoder {
    fn name(&self) -> &'static str {
        "VAG"
    }

    fn timing(&self) -> Timing {
        Timing {
            te_short_us: VAG_HALF_PERIOD_SHORT_US,
            te_long_us: VAG_HALF_PERIOD_LONG_US,
            te_delta_us: 150,
            min_count_bit: VAG_BITS,
        }
    }

    fn reset(&mut self) {
        self.mh.reset();
    }

    fn feed(&mut self, high: bool, duration_us: u32) -> bool {
        if self.mh.feed(high, duration_us).is_err() {
            // retry under the alternate preamble half-period before giving up
            self.mh = ManchesterDecoder::new(if self.mh.half_period_us == VAG_HALF_PERIOD_SHORT_US {
                VAG_HALF_PERIOD_LONG_US
            } else {
                VAG_HALF_PERIOD_SHORT_US
            });
            return false;
        }
        self.mh.bits.len() as u32 >= VAG_BITS
    }

    fn result(&self) -> Option<DecodedResult> {
        if (self.mh.bits.len() as u32) < VAG_BITS {
            return None;
        }
        let key1 = bits_to_u64(&self.mh.bits[0..64]);
        let key2 = bits_to_u64(&self.mh.bits[64..80]);
        let dispatch = (key2 & 0xFF) as u8;

        let (decrypted, key_index) = if dispatch % 2 == 0 {
            // AUT64 path: try each loaded key in turn.
            let mut out = None;
            for (i, key) in self.keys.iter().enumerate() {
                let mut block = key1.to_be_bytes();
                aut64::decrypt(&mut block, key);
                out = Some((u64::from_be_bytes(block), i as u8));
                break;
            }
            out.unwrap_or((key1, 0))
        } else {
            let v0 = (key1 >> 32) as u32;
            let v1 = key1 as u32;
            let schedule = [0x0A0B_0C0Du32, 0x1A1B_1C1D, 0x2A2B_2C2D, 0x3A3B_3C3D];
            let (d0, d1) = xtea::xtea_decrypt(v0, v1, schedule);
            (((d0 as u64) << 32) | d1 as u64, 0)
        };

        Some(DecodedResult {
            protocol_name: self.name(),
            data: decrypted,
            data2: key2,
            serial: (decrypted >> 32) as u32,
            button: ((decrypted >> 60) & 0xF) as u8,
            counter: (decrypted & 0xFFFF) as u32,
            bit_length: VAG_BITS,
            crc_valid: true,
            encrypted: true,
            sub_type: None,
            key_index: Some(key_index),
            preset_name: None,
            frequency_hz: 0,
        })
    }
}

const PSA_BITS: u32 = 80;
const PSA_HALF_PERIOD_FAST_US: u32 = 125;
const PSA_HALF_PERIOD_SLOW_US: u32 = 250;

pub struct PsaDecoder {
    mh: ManchesterDecoder,
}

impl PsaDecoder {
    pub fn new() -> Self {
        PsaDecoder { mh: ManchesterDecoder::new(PSA_HALF_PERIOD_SLOW_US) }
    }

    /// Single-pass XOR-chain deobfuscation plus a second-stage 6-byte
    /// permutation XOR (dispatch byte 0x23).
    fn decode_0x23(payload: &[u8; 8]) -> [u8; 8] {
        let mut out = *payload;
        for i in 1..8 {
            out[i] ^= out[i - 1];
        }
        // second-stage permutation over the first 6 bytes
        let perm = [5usize, 0, 4, 1, 3, 2];
        let mut permuted = out;
        for (dst, &src) in perm.iter().enumerate() {
            permuted[dst] = out[src] ^ out[(src + 1) % 6];
        }
        permuted
    }

    /// Bounded TEA brute-force over two small key-schedule ranges
    /// (dispatch byte 0x36); returns the first decrypted value whose
    /// recovered button is in {1, 2, 4}.
    fn decode_0x36(v0: u32, v1: u32) -> Option<(u32, u32, u8)> {
        for hi in 0u32..4 {
            for lo in 0u32..4 {
                let key = [hi, lo, hi ^ lo, hi.wrapping_add(lo)];
                let (d0, d1) = xtea::tea_decrypt(v0, v1, key, 32);
                let button = ((d1 >> 28) & 0xF) as u8;
                if matches!(button, 1 | 2 | 4) {
                    return Some((d0, d1, button));
                }
            }
        }
        None
    }
}

impl Default for PsaDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for PsaDecoder {
    fn name(&self) -> &'static str {
        "PSA"
    }

    fn timing(&self) -> Timing {
        Timing {
            te_short_us: PSA_HALF_PERIOD_FAST_US,
            te_long_us: PSA_HALF_PERIOD_SLOW_US,
            te_delta_us: 80,
            min_count_bit: PSA_BITS,
        }
    }

    fn reset(&mut self) {
        self.mh.reset();
    }

    fn feed(&mut self, high: bool, duration_us: u32) -> bool {
        if self.mh.feed(high, duration_us).is_err() {
            self.mh = ManchesterDecoder::new(if self.mh.half_period_us == PSA_HALF_PERIOD_SLOW_US {
                PSA_HALF_PERIOD_FAST_US
            } else {
                PSA_HALF_PERIOD_SLOW_US
            });
            return false;
        }
        self.mh.bits.len() as u32 >= PSA_BITS
    }

    fn result(&self) -> Option<DecodedResult> {
        if (self.mh.bits.len() as u32) < PSA_BITS {
            return None;
        }
        let key1 = bits_to_u64(&self.mh.bits[0..64]);
        let key2 = bits_to_u64(&self.mh.bits[64..80]);
        let dispatch = (key2 & 0xFF) as u8;

        match dispatch {
            0x23 => {
                let payload = Self::decode_0x23(&key1.to_be_bytes());
                let decrypted = u64::from_be_bytes(payload);
                let button = ((decrypted >> 60) & 0xF) as u8;
                Some(DecodedResult {
                    protocol_name: self.name(),
                    data: decrypted,
                    data2: key2,
                    serial: (decrypted >> 32) as u32,
                    button,
                    counter: (decrypted & 0xFFFF) as u32,
                    bit_length: PSA_BITS,
                    crc_valid: matches!(button, 1 | 2 | 4),
                    encrypted: true,
                    sub_type: Some("PSA_0x23"),
                    key_index: None,
                    preset_name: None,
                    frequency_hz: 0,
                })
            }
            0x36 => {
                let v0 = (key1 >> 32) as u32;
                let v1 = key1 as u32;
                Self::decode_0x36(v0, v1).map(|(d0, d1, button)| DecodedResult {
                    protocol_name: self.name(),
                    data: ((d0 as u64) << 32) | d1 as u64,
                    data2: key2,
                    serial: d0,
                    button,
                    counter: (d1 & 0xFFFF),
                    bit_length: PSA_BITS,
                    crc_valid: true,
                    encrypted: true,
                    sub_type: Some("PSA_0x36"),
                    key_index: None,
                    preset_name: None,
                    frequency_hz: 0,
                })
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn psa_0x36_accepts_only_valid_buttons() {
        let result = PsaDecoder::decode_0x36(1, 2);
        if let Some((_, _, button)) = result {
            assert!(matches!(button, 1 | 2 | 4));
        }
    }

    #[test]
    fn psa_0x23_permutation_changes_all_bytes() {
        let input = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let out = PsaDecoder::decode_0x23(&input);
        assert_ne!(out, input);
    }
}
