//! Scher-Khan decoder (spec §4.7): "PWM 750/1100 µs, variable length
//! 35–82 bits selecting a sub-type label; no decryption, decode-only."

use super::{bits_to_u64, PwmDecoder};
use crate::protocol::{DecodedResult, Decoder, Timing};

const SHORT_US: u32 = 750;
const LONG_US: u32 = 1100;
const MIN_BITS: u32 = 35;
const MAX_BITS: u32 = 82;

/// Gap duration (relative to `LONG_US`) that terminates a frame, since
/// Scher-Khan frames vary in length rather than using a fixed bit count.
const GAP_THRESHOLD_US: u32 = LONG_US * 3;

pub struct ScherKhanDecoder {
    pwm: PwmDecoder,
    done: bool,
}

impl ScherKhanDecoder {
    pub fn new() -> Self {
        ScherKhanDecoder { pwm: PwmDecoder::new(SHORT_US, LONG_US), done: false }
    }

    fn sub_type(bit_count: u32) -> &'static str {
        match bit_count {
            35..=44 => "ScherKhan_Short",
            45..=64 => "ScherKhan_Medium",
            _ => "ScherKhan_Long",
        }
    }
}

impl Default for ScherKhanDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for ScherKhanDecoder {
    fn name(&self) -> &'static str {
        "Scher-Khan"
    }

    fn timing(&self) -> Timing {
        Timing { te_short_us: SHORT_US, te_long_us: LONG_US, te_delta_us: 150, min_count_bit: MIN_BITS }
    }

    fn reset(&mut self) {
        self.pwm.reset();
        self.done = false;
    }

    fn feed(&mut self, high: bool, duration_us: u32) -> bool {
        if duration_us >= GAP_THRESHOLD_US && self.pwm.bits.len() as u32 >= MIN_BITS {
            self.done = true;
            return true;
        }
        if self.pwm.feed(high, duration_us).is_err() {
            self.reset();
            return false;
        }
        if self.pwm.bits.len() as u32 >= MAX_BITS {
            self.done = true;
            return true;
        }
        false
    }

    fn result(&self) -> Option<DecodedResult> {
        if !self.done {
            return None;
        }
        let bit_count = self.pwm.bits.len() as u32;
        let payload = bits_to_u64(&self.pwm.bits);
        Some(DecodedResult {
            protocol_name: self.name(),
            data: payload,
            data2: 0,
            serial: 0,
            button: 0,
            counter: 0,
            bit_length: bit_count,
            crc_valid: true,
            encrypted: false,
            sub_type: Some(Self::sub_type(bit_count)),
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
    fn short_frame_below_min_bits_is_not_terminated_by_gap() {
        let mut d = ScherKhanDecoder::new();
        for _ in 0..10 {
            d.feed(true, SHORT_US);
            d.feed(false, LONG_US);
        }
        assert!(!d.feed(true, GAP_THRESHOLD_US));
    }

    #[test]
    fn sub_type_buckets_by_bit_count() {
        assert_eq!(ScherKhanDecoder::sub_type(40), "ScherKhan_Short");
        assert_eq!(ScherKhanDecoder::sub_type(50), "ScherKhan_Medium");
        assert_eq!(ScherKhanDecoder::sub_type(80), "ScherKhan_Long");
    }
}
