//! Pulse capture ISR (spec §4.1).
//!
//! On real hardware this is a GPIO edge interrupt; here it is a plain
//! method call (`PulseRing::on_edge`) driven by whatever produces edges —
//! a radio's DIO pin in a real deployment, or a scripted sequence in
//! tests. The ring itself never allocates, matching the "the ISR never
//! allocates" constraint: its backing store is a `heapless::Vec` fixed at
//! `CAPACITY`, so a full ring rejects further pushes instead of growing.

use crate::types::TimestampUs;

/// Inter-frame silence gap (spec §3/§4.1): a longer-than-this gap between
/// edges means the previous signal is complete and the ring resets.
pub const MAX_SIGNAL_DURATION_US: u64 = 100_000;

/// Durations shorter than this are glitches and are dropped without
/// affecting `last_edge_time` or the ring (spec §4.1).
pub const MIN_PULSE_DURATION_US: u64 = 1;

/// Bounded capacity of one module's received-sample ring (spec §3).
pub const CAPACITY: usize = 2048;

/// Per-module received-sample buffer (spec §3's `ReceivedSamples`).
///
/// Only ever touched from within [`PulseRing::on_edge`] (the "ISR") or
/// under the caller's critical section via [`PulseRing::drain`] — spec's
/// "only accessed under the per-module critical section" invariant is
/// upheld by construction: there is no other way to read or mutate
/// `samples` than through these two entry points, and a real embedded
/// port would wrap both in `critical_section::with`.
pub struct PulseRing {
    samples: heapless::Vec<u32, CAPACITY>,
    last_edge_time: Option<TimestampUs>,
    full: bool,
}

impl PulseRing {
    pub fn new() -> Self {
        PulseRing {
            samples: heapless::Vec::new(),
            last_edge_time: None,
            full: false,
        }
    }

    /// Edge-triggered callback. `now` is the timestamp of this edge.
    pub fn on_edge(&mut self, now: TimestampUs) {
        let Some(last) = self.last_edge_time else {
            // First edge after reset: initializes `last_edge_time`, yields
            // no sample (spec §4.1).
            self.last_edge_time = Some(now);
            return;
        };

        let duration = now.saturating_diff(last);
        self.last_edge_time = Some(now);

        if duration > MAX_SIGNAL_DURATION_US {
            // Inter-frame gap: clear and start fresh. The edge that
            // triggered the gap is itself dropped, matching the reference
            // behavior of treating a too-long gap as noise rather than
            // data.
            self.samples.clear();
            self.full = false;
            return;
        }

        if duration < MIN_PULSE_DURATION_US {
            // Glitch: dropped, ring and `last_edge_time` otherwise
            // unaffected (already updated above).
            return;
        }

        if self.samples.push(duration as u32).is_err() {
            // Ring full: drop additional edges until the next gap.
            self.full = true;
        }
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn last_edge_time(&self) -> Option<TimestampUs> {
        self.last_edge_time
    }

    /// True once the ring has dropped at least one edge due to capacity.
    pub fn is_full(&self) -> bool {
        self.full
    }

    /// A consumer infers "signal complete" when the gap since the last
    /// edge exceeds `MAX_SIGNAL_DURATION_US` and at least two samples are
    /// buffered (spec §4.1).
    pub fn is_signal_complete(&self, now: TimestampUs) -> bool {
        if self.samples.len() < 2 {
            return false;
        }
        match self.last_edge_time {
            Some(last) => now.saturating_diff(last) > MAX_SIGNAL_DURATION_US,
            None => false,
        }
    }

    /// Copy-and-clear under the caller's critical section.
    pub fn drain(&mut self) -> heapless::Vec<u32, CAPACITY> {
        self.full = false;
        std::mem::replace(&mut self.samples, heapless::Vec::new())
    }

    pub fn reset(&mut self) {
        self.samples.clear();
        self.last_edge_time = None;
        self.full = false;
    }
}

impl Default for PulseRing {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_edge_yields_no_sample() {
        let mut ring = PulseRing::new();
        ring.on_edge(TimestampUs(1_000));
        assert_eq!(ring.len(), 0);
        assert_eq!(ring.last_edge_time(), Some(TimestampUs(1_000)));
    }

    #[test]
    fn glitch_is_dropped() {
        let mut ring = PulseRing::new();
        ring.on_edge(TimestampUs(0));
        ring.on_edge(TimestampUs(0)); // duration 0 < MIN_PULSE_DURATION_US
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn gap_clears_ring() {
        let mut ring = PulseRing::new();
        ring.on_edge(TimestampUs(0));
        ring.on_edge(TimestampUs(500));
        assert_eq!(ring.len(), 1);
        ring.on_edge(TimestampUs(500 + MAX_SIGNAL_DURATION_US + 1));
        assert_eq!(ring.len(), 0);
    }

    #[test]
    fn ring_drops_once_full() {
        let mut ring = PulseRing::new();
        let mut t = 0u64;
        ring.on_edge(TimestampUs(t));
        for _ in 0..CAPACITY + 10 {
            t += 100;
            ring.on_edge(TimestampUs(t));
        }
        assert_eq!(ring.len(), CAPACITY);
        assert!(ring.is_full());
    }

    #[test]
    fn signal_complete_requires_two_samples_and_gap() {
        let mut ring = PulseRing::new();
        ring.on_edge(TimestampUs(0));
        ring.on_edge(TimestampUs(500));
        assert!(!ring.is_signal_complete(TimestampUs(600)));
        assert!(ring.is_signal_complete(TimestampUs(500 + MAX_SIGNAL_DURATION_US + 1)));
    }

    #[test]
    fn drain_clears_ring() {
        let mut ring = PulseRing::new();
        ring.on_edge(TimestampUs(0));
        ring.on_edge(TimestampUs(500));
        let samples = ring.drain();
        assert_eq!(samples.as_slice(), &[500]);
        assert_eq!(ring.len(), 0);
    }
}
