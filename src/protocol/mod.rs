//! Protocol engine: pulse-level decoders/encoders and the router that
//! feeds a completed capture to all of them (spec §4.7).

pub mod cipher;
pub mod fixed;
pub mod rolling;

use std::collections::VecDeque;
use std::time::Instant;

use crate::types::Pulse;

/// Timing constants a decoder declares so the router (and, eventually,
/// an auto-detect sweep) can reject candidates cheaply before invoking
/// `feed` (spec §4.7 "Decoder contract").
#[derive(Debug, Clone, Copy)]
pub struct Timing {
    pub te_short_us: u32,
    pub te_long_us: u32,
    pub te_delta_us: u32,
    pub min_count_bit: u32,
}

/// One decoded transmission (spec §3 `DecodedResult`).
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedResult {
    pub protocol_name: &'static str,
    pub data: u64,
    pub data2: u64,
    pub serial: u32,
    pub button: u8,
    pub counter: u32,
    pub bit_length: u32,
    pub crc_valid: bool,
    pub encrypted: bool,
    pub sub_type: Option<&'static str>,
    pub key_index: Option<u8>,
    pub preset_name: Option<&'static str>,
    pub frequency_hz: u32,
}

/// A pulse-level protocol decoder: an independent state machine fed one
/// `(level, duration)` pair at a time.
pub trait Decoder: Send {
    fn name(&self) -> &'static str;
    fn timing(&self) -> Timing;
    /// Resets all internal state machine progress back to its initial
    /// state (spec §4.7: "any timing violation forces reset to state
    /// 0").
    fn reset(&mut self);
    /// Advances the state machine by one pulse. Returns `true` exactly
    /// when a complete, decodable frame is ready and `result()` will
    /// return `Some`.
    fn feed(&mut self, high: bool, duration_us: u32) -> bool;
    fn result(&self) -> Option<DecodedResult>;
    /// Whether this decoder can also drive TX of the protocol it
    /// decodes (most fixed-code protocols can; most rolling-code
    /// decoders cannot, since transmitting requires the original
    /// secret key material, not just the ability to recognize a
    /// frame).
    fn can_emulate(&self) -> bool {
        false
    }
    /// Builds the raw pulse sequence to transmit `result` back out,
    /// if `can_emulate()` is true.
    fn generate_pulse_data(&self, _result: &DecodedResult) -> Vec<Pulse> {
        Vec::new()
    }
}

/// Circular dedup history of recent decodes (spec §3 `DecodeHistory`).
pub struct DecodeHistory {
    entries: VecDeque<(DecodedResult, Instant)>,
    capacity: usize,
    dedup_window: std::time::Duration,
}

impl DecodeHistory {
    pub fn new() -> Self {
        DecodeHistory {
            entries: VecDeque::with_capacity(20),
            capacity: 20,
            dedup_window: std::time::Duration::from_millis(500),
        }
    }

    fn dedup_key(r: &DecodedResult) -> (u64, u64, &'static str) {
        (r.data, r.data2, r.protocol_name)
    }

    /// Offers `result` to the history. Returns `true` if this is a new
    /// entry (router should emit a notification) or `false` if it
    /// collapsed into an existing entry within the dedup window (the
    /// existing entry's timestamp is refreshed either way).
    pub fn offer(&mut self, result: DecodedResult, now: Instant) -> bool {
        let key = Self::dedup_key(&result);
        for (existing, ts) in self.entries.iter_mut() {
            if Self::dedup_key(existing) == key && now.duration_since(*ts) <= self.dedup_window {
                *ts = now;
                return false;
            }
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back((result, now));
        true
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for DecodeHistory {
    fn default() -> Self {
        Self::new()
    }
}

/// Feeds a completed pulse capture to every registered decoder and
/// routes the first successful result through the dedup history (spec
/// §4.7 "Router").
pub struct Router {
    decoders: Vec<Box<dyn Decoder>>,
    history: DecodeHistory,
}

impl Router {
    pub fn new(decoders: Vec<Box<dyn Decoder>>) -> Self {
        Router { decoders, history: DecodeHistory::new() }
    }

    /// Feeds `samples` (unsigned durations, edge polarity determined by
    /// position parity: even index = high, odd = low, per spec §4.7) to
    /// every decoder, returning any *new* (non-deduped) results tagged
    /// with `frequency_hz`.
    pub fn feed_samples(&mut self, samples: &[u32], frequency_hz: u32, now: Instant) -> Vec<DecodedResult> {
        let mut fresh = Vec::new();
        for decoder in &mut self.decoders {
            decoder.reset();
            let mut ready = false;
            for (i, &duration) in samples.iter().enumerate() {
                let high = i % 2 == 0;
                if decoder.feed(high, duration) {
                    ready = true;
                    break;
                }
            }
            if ready {
                if let Some(mut result) = decoder.result() {
                    result.frequency_hz = frequency_hz;
                    if self.history.offer(result.clone(), now) {
                        fresh.push(result);
                    }
                }
            }
        }
        fresh
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct AlwaysOnThirdPulse {
        count: u32,
    }

    impl Decoder for AlwaysOnThirdPulse {
        fn name(&self) -> &'static str {
            "TestProto"
        }
        fn timing(&self) -> Timing {
            Timing { te_short_us: 300, te_long_us: 900, te_delta_us: 100, min_count_bit: 3 }
        }
        fn reset(&mut self) {
            self.count = 0;
        }
        fn feed(&mut self, _high: bool, _duration_us: u32) -> bool {
            self.count += 1;
            self.count >= 3
        }
        fn result(&self) -> Option<DecodedResult> {
            Some(DecodedResult {
                protocol_name: self.name(),
                data: 0xABCD,
                data2: 0,
                serial: 0,
                button: 0,
                counter: 0,
                bit_length: 12,
                crc_valid: true,
                encrypted: false,
                sub_type: None,
                key_index: None,
                preset_name: None,
                frequency_hz: 0,
            })
        }
    }

    #[test]
    fn router_tags_frequency_and_emits_fresh_result() {
        let mut router = Router::new(vec![Box::new(AlwaysOnThirdPulse { count: 0 })]);
        let results = router.feed_samples(&[300, 300, 300, 300], 433_920_000, Instant::now());
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].frequency_hz, 433_920_000);
    }

    #[test]
    fn dedup_collapses_identical_result_within_window() {
        let mut history = DecodeHistory::new();
        let r = DecodedResult {
            protocol_name: "CAME",
            data: 42,
            data2: 0,
            serial: 0,
            button: 0,
            counter: 0,
            bit_length: 12,
            crc_valid: true,
            encrypted: false,
            sub_type: None,
            key_index: None,
            preset_name: None,
            frequency_hz: 0,
        };
        let now = Instant::now();
        assert!(history.offer(r.clone(), now));
        assert!(!history.offer(r, now));
    }
}
