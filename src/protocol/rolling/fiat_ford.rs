//! Fiat V0 and Ford V0 rolling-code decoders (spec §4.7), both
//! differential-Manchester: a transition always happens at the bit
//! boundary, and an *additional* mid-bit transition encodes a '0'; its
//! absence encodes a '1'. This module's `DiffManchesterDecoder` takes
//! consecutive half-period pulses and recovers one bit per two pulses,
//! mirroring the plain `ManchesterDecoder` but keyed by "did the level
//! change twice or once" rather than by absolute phase.

use crate::protocol::{DecodedResult, Decoder, Timing};

const HALF_PERIOD_US: u32 = 250;
const DELTA_US: u32 = 150;

fn close_enough(actual: u32, expected: u32) -> bool {
    actual.abs_diff(expected) <= DELTA_US
}

struct DiffManchesterDecoder {
    bits: Vec<bool>,
    pending_first: Option<u32>,
}

impl DiffManchesterDecoder {
    fn new() -> Self {
        DiffManchesterDecoder { bits: Vec::new(), pending_first: None }
    }

    fn reset(&mut self) {
        self.bits.clear();
        self.pending_first = None;
    }

    /// Accepts either a single full-period pulse (no mid-bit transition,
    /// i.e. bit '1') or two half-period pulses (mid-bit transition, bit
    /// '0'). Returns `Err` on a pulse matching neither half nor full
    /// period.
    fn feed(&mut self, duration_us: u32) -> Result<(), ()> {
        if let Some(first) = self.pending_first {
            if close_enough(duration_us, HALF_PERIOD_US) {
                self.bits.push(false);
                self.pending_first = None;
                let _ = first;
                return Ok(());
            }
            return Err(());
        }
        if close_enough(duration_us, HALF_PERIOD_US * 2) {
            self.bits.push(true);
            return Ok(());
        }
        if close_enough(duration_us, HALF_PERIOD_US) {
            self.pending_first = Some(duration_us);
            return Ok(());
        }
        Err(())
    }
}

fn bits_to_u64(bits: &[bool]) -> u64 {
    bits.iter().fold(0u64, |acc, &b| (acc << 1) | b as u64)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Preamble,
    Gap,
    Body,
    Done,
}

const FIAT_BODY_BITS: u32 = 70; // 64 data + 6 button

pub struct FiatV0Decoder {
    phase: Phase,
    dm: DiffManchesterDecoder,
    preamble_edges: u32,
}

impl FiatV0Decoder {
    pub fn new() -> Self {
        FiatV0Decoder { phase: Phase::Preamble, dm: DiffManchesterDecoder::new(), preamble_edges: 0 }
    }
}

impl Default for FiatV0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FiatV0Decoder {
    fn name(&self) -> &'static str {
        "Fiat_V0"
    }

    fn timing(&self) -> Timing {
        Timing { te_short_us: HALF_PERIOD_US, te_long_us: HALF_PERIOD_US * 2, te_delta_us: DELTA_US, min_count_bit: FIAT_BODY_BITS }
    }

    fn reset(&mut self) {
        self.phase = Phase::Preamble;
        self.dm.reset();
        self.preamble_edges = 0;
    }

    fn feed(&mut self, _high: bool, duration_us: u32) -> bool {
        match self.phase {
            Phase::Preamble => {
                if close_enough(duration_us, HALF_PERIOD_US) {
                    self.preamble_edges += 1;
                    if self.preamble_edges >= 8 {
                        self.phase = Phase::Gap;
                    }
                    false
                } else if duration_us > HALF_PERIOD_US * 3 {
                    // silence gap marker between preamble and body
                    self.phase = Phase::Body;
                    false
                } else {
                    self.reset();
                    false
                }
            }
            Phase::Gap => {
                if duration_us > HALF_PERIOD_US * 3 {
                    self.phase = Phase::Body;
                }
                false
            }
            Phase::Body => {
                if self.dm.feed(duration_us).is_err() {
                    self.reset();
                    return false;
                }
                if self.dm.bits.len() as u32 >= FIAT_BODY_BITS {
                    self.phase = Phase::Done;
                    return true;
                }
                false
            }
            Phase::Done => false,
        }
    }

    fn result(&self) -> Option<DecodedResult> {
        if self.phase != Phase::Done {
            return None;
        }
        let all_bits = &self.dm.bits;
        let data = bits_to_u64(&all_bits[..64]);
        // top 6 bits are the button field, with a trailing "1" fixup bit
        let mut button_bits = all_bits[64..70].to_vec();
        *button_bits.last_mut().unwrap() = true;
        let button = bits_to_u64(&button_bits) as u8;
        Some(DecodedResult {
            protocol_name: self.name(),
            data,
            data2: 0,
            serial: (data >> 32) as u32,
            button,
            counter: (data & 0xFFFF) as u32,
            bit_length: FIAT_BODY_BITS,
            crc_valid: true,
            encrypted: true,
            sub_type: None,
            key_index: None,
            preset_name: None,
            frequency_hz: 0,
        })
    }
}

const FORD_BODY_BITS: u32 = 79; // 63 + 16

/// 64x64 GF(2) parity-check matrix rows used by Ford V0's CRC (spec
/// §4.7: "CRC is a GF(2) matrix-vector product over the payload").
/// Populated with a fixed pseudo-random-looking but deterministic
/// pattern; the exact vendor matrix is proprietary and not reconstructed
/// here, only the computation shape.
const FORD_CRC_MATRIX: [u64; 16] = [
    0x0102_0304_0506_0708,
    0x1112_1314_1516_1718,
    0x2122_2324_2526_2728,
    0x3132_3334_3536_3738,
    0x4142_4344_4546_4748,
    0x5152_5354_5556_5758,
    0x6162_6364_6566_6768,
    0x7172_7374_7576_7778,
    0x8182_8384_8586_8788,
    0x9192_9394_9596_9798,
    0xA1A2_A3A4_A5A6_A7A8,
    0xB1B2_B3B4_B5B6_B7B8,
    0xC1C2_C3C4_C5C6_C7C8,
    0xD1D2_D3D4_D5D6_D7D8,
    0xE1E2_E3E4_E5E6_E7E8,
    0xF1F2_F3F4_F5F6_F7F8,
];

fn ford_crc(payload: u64) -> u16 {
    let mut out = 0u16;
    for (i, row) in FORD_CRC_MATRIX.iter().enumerate() {
        let parity = (payload & row).count_ones() & 1;
        out |= (parity as u16) << i;
    }
    out
}

/// XOR-chain deobfuscation keyed by a bit selector, plus a nibble swap
/// between bytes 6 and 7 (spec §4.7).
fn ford_deobfuscate(mut bytes: [u8; 8]) -> [u8; 8] {
    let selector = bytes[0] & 0x07;
    for i in 1..8 {
        bytes[i] ^= bytes[i - 1].rotate_left(selector as u32);
    }
    bytes.swap(6, 7);
    bytes
}

pub struct FordV0Decoder {
    dm: DiffManchesterDecoder,
}

impl FordV0Decoder {
    pub fn new() -> Self {
        FordV0Decoder { dm: DiffManchesterDecoder::new() }
    }
}

impl Default for FordV0Decoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for FordV0Decoder {
    fn name(&self) -> &'static str {
        "Ford_V0"
    }

    fn timing(&self) -> Timing {
        Timing { te_short_us: HALF_PERIOD_US, te_long_us: HALF_PERIOD_US * 2, te_delta_us: DELTA_US, min_count_bit: FORD_BODY_BITS }
    }

    fn reset(&mut self) {
        self.dm.reset();
    }

    fn feed(&mut self, _high: bool, duration_us: u32) -> bool {
        if self.dm.feed(duration_us).is_err() {
            self.reset();
            return false;
        }
        self.dm.bits.len() as u32 >= FORD_BODY_BITS
    }

    fn result(&self) -> Option<DecodedResult> {
        if (self.dm.bits.len() as u32) < FORD_BODY_BITS {
            return None;
        }
        let payload = bits_to_u64(&self.dm.bits[..63]);
        let raw_bytes = payload.to_be_bytes();
        let mut bytes = [0u8; 8];
        bytes.copy_from_slice(&raw_bytes);
        let deob = ford_deobfuscate(bytes);
        let deob_value = u64::from_be_bytes(deob);
        let crc = ford_crc(deob_value);
        let transmitted_crc = bits_to_u64(&self.dm.bits[63..79]) as u16;
        Some(DecodedResult {
            protocol_name: self.name(),
            data: deob_value,
            data2: 0,
            serial: (deob_value >> 32) as u32,
            button: ((deob_value >> 60) & 0xF) as u8,
            counter: (deob_value & 0xFFFF) as u32,
            bit_length: FORD_BODY_BITS,
            crc_valid: crc == transmitted_crc,
            encrypted: true,
            sub_type: None,
            key_index: None,
            preset_name: None,
            frequency_hz: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diff_manchester_decodes_full_period_as_one_and_two_halves_as_zero() {
        let mut d = DiffManchesterDecoder::new();
        d.feed(HALF_PERIOD_US * 2).unwrap();
        d.feed(HALF_PERIOD_US).unwrap();
        d.feed(HALF_PERIOD_US).unwrap();
        assert_eq!(d.bits, vec![true, false]);
    }

    #[test]
    fn ford_deobfuscate_swaps_bytes_six_and_seven() {
        let input = [0, 1, 2, 3, 4, 5, 6, 7];
        let out = ford_deobfuscate(input);
        // swap happened on the already-XORed bytes; just confirm positions 6/7 differ from a non-swapped XOR chain
        assert_ne!(out[6], 6);
    }

    #[test]
    fn fiat_button_fixup_forces_trailing_bit_high() {
        let mut d = FiatV0Decoder::new();
        d.phase = Phase::Body;
        for _ in 0..70 {
            d.dm.bits.push(false);
        }
        d.phase = Phase::Done;
        let result = d.result().unwrap();
        assert_eq!(result.button & 0x01, 1);
    }
}
