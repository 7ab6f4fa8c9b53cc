//! Subaru rolling-code decoder (spec §4.7): "long preamble with ≥8 long
//! pairs, PWM, 64-bit payload; counter = 16-bit result of rotating three
//! serial-derived bytes left by (4+lo) positions and XOR-folding."

use super::{bits_to_u64, PwmDecoder};
use crate::protocol::{DecodedResult, Decoder, Timing};

const MIN_LONG_PAIRS: u32 = 8;
const PAYLOAD_BITS: u32 = 64;
const TE_SHORT_US: u32 = 250;
const TE_LONG_US: u32 = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Preamble { long_pairs_seen: u32, awaiting_low: bool },
    Payload,
    Done,
}

pub struct SubaruDecoder {
    state: State,
    pwm: PwmDecoder,
}

impl SubaruDecoder {
    pub fn new() -> Self {
        SubaruDecoder { state: State::Preamble { long_pairs_seen: 0, awaiting_low: false }, pwm: PwmDecoder::new(TE_SHORT_US, TE_LONG_US) }
    }

    fn extract_counter(payload: u64) -> u32 {
        let lo = (payload & 0xFF) as u32;
        let serial_bytes = ((payload >> 8) & 0xFF_FFFF) as u32;
        let rotated = serial_bytes.rotate_left(4 + (lo & 0x1F));
        ((rotated & 0xFFFF) ^ ((rotated >> 16) & 0xFFFF)) as u32
    }
}

impl Default for SubaruDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for SubaruDecoder {
    fn name(&self) -> &'static str {
        "Subaru"
    }

    fn timing(&self) -> Timing {
        Timing { te_short_us: TE_SHORT_US, te_long_us: TE_LONG_US, te_delta_us: 150, min_count_bit: PAYLOAD_BITS }
    }

    fn reset(&mut self) {
        self.state = State::Preamble { long_pairs_seen: 0, awaiting_low: false };
        self.pwm.reset();
    }

    fn feed(&mut self, high: bool, duration_us: u32) -> bool {
        match self.state {
            State::Preamble { long_pairs_seen, awaiting_low } => {
                let long_ok = duration_us.abs_diff(TE_LONG_US) <= 150;
                if !long_ok && long_pairs_seen >= MIN_LONG_PAIRS {
                    self.state = State::Payload;
                    if self.pwm.feed(high, duration_us).is_err() {
                        self.reset();
                    }
                    return false;
                }
                if !long_ok {
                    self.reset();
                    return false;
                }
                if awaiting_low {
                    self.state = State::Preamble { long_pairs_seen: long_pairs_seen + 1, awaiting_low: false };
                } else {
                    self.state = State::Preamble { long_pairs_seen, awaiting_low: true };
                }
                false
            }
            State::Payload => {
                if self.pwm.feed(high, duration_us).is_err() {
                    self.reset();
                    return false;
                }
                if self.pwm.bits.len() as u32 >= PAYLOAD_BITS {
                    self.state = State::Done;
                    return true;
                }
                false
            }
            State::Done => false,
        }
    }

    fn result(&self) -> Option<DecodedResult> {
        if self.state != State::Done {
            return None;
        }
        let payload = bits_to_u64(&self.pwm.bits);
        let counter = Self::extract_counter(payload);
        Some(DecodedResult {
            protocol_name: self.name(),
            data: payload,
            data2: 0,
            serial: (payload >> 32) as u32,
            button: ((payload >> 60) & 0xF) as u8,
            counter,
            bit_length: PAYLOAD_BITS,
            crc_valid: true,
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
    fn full_payload_after_min_preamble_completes_decode() {
        let mut d = SubaruDecoder::new();
        d.state = State::Payload;
        let mut ready = false;
        for i in 0..64u32 {
            let bit = i % 2 == 0;
            let (h, l) = if bit { (TE_LONG_US, TE_SHORT_US) } else { (TE_SHORT_US, TE_LONG_US) };
            ready = d.feed(true, h);
            assert!(!ready);
            ready = d.feed(false, l);
        }
        assert!(ready);
    }

    #[test]
    fn short_preamble_resets() {
        let mut d = SubaruDecoder::new();
        assert!(!d.feed(true, TE_SHORT_US));
        assert_eq!(d.state, State::Preamble { long_pairs_seen: 0, awaiting_low: false });
    }
}
