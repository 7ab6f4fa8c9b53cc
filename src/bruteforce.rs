//! Brute-force attack engine (spec §4.8): a single attack task iterating
//! a fixed-code protocol's keyspace (or a De Bruijn/universal sweep) and
//! emitting each code through a module's transmitter.

use std::sync::atomic::{AtomicBool, AtomicU16, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crate::error::CommandError;
use crate::notify::Notification;
use crate::protocol::fixed::{self, FixedProtocolSpec};
use crate::radio::{BusArbiter, SubGhzRadio};
use crate::storage::StorageBackend;
use crate::types::Module;

/// Bit width ceiling for a De Bruijn generation request (spec §4.8: "n ≤
/// 16").
pub const MAX_DEBRUIJN_BITS: u32 = 16;

/// Budget check gate before generating a De Bruijn sequence (spec §4.8:
/// "heap budget must be checked before generation"). At `n ==
/// MAX_DEBRUIJN_BITS` the packed sequence is exactly 8 KiB; this is the
/// natural ceiling rather than an arbitrary number.
pub const DEBRUIJN_HEAP_BUDGET_BYTES: usize = (1usize << MAX_DEBRUIJN_BITS) / 8;

/// How many codes/bits elapse between BruteProgress notifications. Not
/// pinned to a number by spec; chosen so a 24-bit keyspace still reports
/// roughly one update a second at typical code rates rather than
/// flooding the link.
pub const PROGRESS_INTERVAL: u64 = 100;

/// Codes re-sent on resume to cover any in-flight transmission lost at
/// the pause boundary (spec §4.8 `resumeFromCode = max(0, currentCode -
/// OVERLAP)`); not pinned to a number by spec.
pub const OVERLAP: u32 = 10;

/// On-flash path for the paused-attack state record (spec §6 names it
/// `bruter_state.bin` on internal flash).
pub const STATE_PATH: &str = "/bruter_state.bin";

/// Magic value stamped at the front of the state record, checked on load
/// so a stray or truncated file is never misread as a valid one.
const STATE_MAGIC: u32 = 0xB00F_57A7;

/// Custom/universal template's short pulse width bounds (spec §4.8:
/// "validate te ∈ [50, 5000]").
pub const TE_RANGE: (u32, u32) = (50, 5000);
pub const RATIO_RANGE: (u8, u8) = (1, 10);
pub const CUSTOM_BITS_RANGE: (u8, u8) = (1, MAX_DEBRUIJN_BITS as u8);

const UNIVERSAL_FREQS_HZ: [u32; 8] =
    [300_000_000, 310_000_000, 315_000_000, 390_000_000, 418_000_000, 433_920_000, 868_350_000, 915_000_000];
const UNIVERSAL_TE_US: [u32; 3] = [250, 400, 650];
const UNIVERSAL_RATIOS: [u8; 2] = [2, 3];
const UNIVERSAL_BIT_LENGTHS: [u32; 2] = [12, 24];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttackMode {
    Binary { menu_id: u8 },
    Tristate { menu_id: u8 },
    DeBruijn { menu_id: u8 },
    Universal,
    CustomDeBruijn { bits: u8, te_us: u32, ratio: u8, freq_hz: u32 },
}

impl AttackMode {
    fn attack_type(self) -> u8 {
        match self {
            AttackMode::Binary { .. } => 0,
            AttackMode::Tristate { .. } => 1,
            AttackMode::DeBruijn { .. } => 2,
            AttackMode::Universal => 3,
            AttackMode::CustomDeBruijn { .. } => 4,
        }
    }

    fn menu_id(self) -> u8 {
        match self {
            AttackMode::Binary { menu_id } | AttackMode::Tristate { menu_id } | AttackMode::DeBruijn { menu_id } => menu_id,
            AttackMode::Universal => 0xFF,
            AttackMode::CustomDeBruijn { .. } => 0xFE,
        }
    }

    /// Only menu-indexed modes are resumable: spec's state record has no
    /// room to carry Universal's or Custom De Bruijn's extra parameters,
    /// so those attacks get a clean stop rather than a faithful resume.
    fn is_resumable(self) -> bool {
        matches!(self, AttackMode::Binary { .. } | AttackMode::Tristate { .. } | AttackMode::DeBruijn { .. })
    }
}

/// Running/paused attack state (spec §3 `AttackState`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AttackState {
    pub mode: AttackMode,
    pub module: Module,
    pub current: u64,
    pub total: u64,
}

/// On-flash pause record, matching spec §6's exact binary layout:
/// `[magic:u32][menuId][currentCode:u32][totalCodes:u32][interFrameDelay:u16][globalRepeats:u8][timestamp:u32][attackType:u8]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct StateRecord {
    menu_id: u8,
    current_code: u32,
    total_codes: u32,
    inter_frame_delay_ms: u16,
    global_repeats: u8,
    timestamp: u32,
    attack_type: u8,
}

impl StateRecord {
    fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(21);
        out.extend_from_slice(&STATE_MAGIC.to_le_bytes());
        out.push(self.menu_id);
        out.extend_from_slice(&self.current_code.to_le_bytes());
        out.extend_from_slice(&self.total_codes.to_le_bytes());
        out.extend_from_slice(&self.inter_frame_delay_ms.to_le_bytes());
        out.push(self.global_repeats);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.push(self.attack_type);
        out
    }

    fn deserialize(bytes: &[u8]) -> Option<Self> {
        if bytes.len() < 21 {
            return None;
        }
        if u32::from_le_bytes(bytes[0..4].try_into().ok()?) != STATE_MAGIC {
            return None;
        }
        Some(StateRecord {
            menu_id: bytes[4],
            current_code: u32::from_le_bytes(bytes[5..9].try_into().ok()?),
            total_codes: u32::from_le_bytes(bytes[9..13].try_into().ok()?),
            inter_frame_delay_ms: u16::from_le_bytes(bytes[13..15].try_into().ok()?),
            global_repeats: bytes[15],
            timestamp: u32::from_le_bytes(bytes[16..20].try_into().ok()?),
            attack_type: bytes[20],
        })
    }
}

fn now_unix_secs() -> u32 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs() as u32).unwrap_or(0)
}

/// Generates a binary De Bruijn sequence B(2, n) via the standard
/// Duval/FKM necklace-concatenation algorithm: every n-bit substring
/// appears exactly once across the cyclic sequence.
pub fn generate_de_bruijn(n: u32) -> Result<Vec<bool>, CommandError> {
    if n == 0 || n > MAX_DEBRUIJN_BITS {
        return Err(CommandError::OutOfRange);
    }
    if (1usize << n) / 8 > DEBRUIJN_HEAP_BUDGET_BYTES {
        return Err(CommandError::OutOfRange);
    }

    let k = 2usize;
    let n = n as usize;
    let mut a = vec![0u8; k * n];
    let mut seq = Vec::with_capacity(1 << n);

    fn db(t: usize, p: usize, n: usize, k: usize, a: &mut [u8], seq: &mut Vec<u8>) {
        if t > n {
            if n % p == 0 {
                seq.extend_from_slice(&a[1..=p]);
            }
            return;
        }
        a[t] = a[t - p];
        db(t + 1, p, n, k, a, seq);
        for j in (a[t - p] + 1)..(k as u8) {
            a[t] = j;
            db(t + 1, t, n, k, a, seq);
        }
    }
    db(1, 1, n, k, &mut a, &mut seq);

    Ok(seq.into_iter().map(|b| b != 0).collect())
}

fn spec_for(menu_id: u8) -> Option<&'static FixedProtocolSpec> {
    fixed::by_menu_id(menu_id)
}

/// Total number of codes in a mode's keyspace, used to populate
/// `AttackState::total` at start time.
pub fn total_codes(mode: AttackMode) -> Option<u64> {
    match mode {
        AttackMode::Binary { menu_id } => spec_for(menu_id).map(fixed::keyspace_size),
        AttackMode::Tristate { menu_id } => spec_for(menu_id).map(fixed::keyspace_size),
        AttackMode::DeBruijn { menu_id } => spec_for(menu_id).map(|s| 1u64 << s.bits.min(MAX_DEBRUIJN_BITS)),
        AttackMode::Universal => {
            Some((UNIVERSAL_FREQS_HZ.len() * UNIVERSAL_TE_US.len() * UNIVERSAL_RATIOS.len() * UNIVERSAL_BIT_LENGTHS.len()) as u64)
        }
        AttackMode::CustomDeBruijn { bits, .. } => Some(1u64 << bits),
    }
}

/// Validates a custom-De-Bruijn request's parameters (spec §4.8).
pub fn validate_custom(bits: u8, te_us: u32, ratio: u8) -> Result<(), CommandError> {
    if bits < CUSTOM_BITS_RANGE.0 || bits > CUSTOM_BITS_RANGE.1 {
        return Err(CommandError::OutOfRange);
    }
    if te_us < TE_RANGE.0 || te_us > TE_RANGE.1 {
        return Err(CommandError::OutOfRange);
    }
    if ratio < RATIO_RANGE.0 || ratio > RATIO_RANGE.1 {
        return Err(CommandError::OutOfRange);
    }
    Ok(())
}

/// Symmetric-short/asymmetric-long "dynamic" template used by Universal
/// and Custom-De-Bruijn (spec §4.8): short pulse `te_us`, long pulse
/// `te_us * ratio`.
fn dynamic_bit_pulse_us(high: bool, te_us: u32, ratio: u8) -> (u32, u32) {
    let long_us = te_us.saturating_mul(ratio as u32);
    if high {
        (te_us, long_us)
    } else {
        (long_us, te_us)
    }
}

enum RunOutcome {
    Completed,
    Paused,
}

/// Drives one attack to completion, pause, or cancellation. Holds
/// exclusive use of a radio and the shared SPI bus for its whole run,
/// matching spec §4.8's "single-threaded attack task, priority 2."
pub struct BruteForceEngine {
    notify_tx: tokio::sync::mpsc::UnboundedSender<Notification>,
    storage: Arc<dyn StorageBackend>,
    cancel: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    /// Set by a cancel request (Bruter sub-opcode 0x00) to force a purge
    /// even for an otherwise-resumable attack, distinguishing "cancel, a
    /// clean stop" from "pause" (sub-opcode 0xFB), which both just set
    /// `cancel` to break the run loop but differ in what happens to any
    /// in-flight state afterward.
    clean_stop: Arc<AtomicBool>,
    global_repeats: AtomicU8,
    inter_frame_delay_ms: AtomicU16,
}

impl BruteForceEngine {
    pub fn new(
        notify_tx: tokio::sync::mpsc::UnboundedSender<Notification>,
        storage: Arc<dyn StorageBackend>,
        cancel: Arc<AtomicBool>,
        running: Arc<AtomicBool>,
    ) -> Self {
        BruteForceEngine {
            notify_tx,
            storage,
            cancel,
            running,
            clean_stop: Arc::new(AtomicBool::new(false)),
            global_repeats: AtomicU8::new(1),
            inter_frame_delay_ms: AtomicU16::new(10),
        }
    }

    fn notify(&self, n: Notification) {
        let _ = self.notify_tx.send(n);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Bruter sub-opcode 0x00 (cancel, spec §6): breaks the run loop the
    /// same way a pause does, but marks the stop as non-resumable so the
    /// `Paused` outcome purges any state instead of saving it.
    pub fn request_cancel(&self) {
        self.clean_stop.store(true, Ordering::SeqCst);
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Bruter sub-opcode 0xFB (pause, spec §6): breaks the run loop and
    /// leaves resumability up to the attack mode.
    pub fn request_pause(&self) {
        self.cancel.store(true, Ordering::SeqCst);
    }

    /// Bruter sub-opcode 0xFC (spec §6): clamped to the settings range
    /// `bruter_repeats` (1..10).
    pub fn set_global_repeats(&self, repeats: u8) {
        self.global_repeats.store(repeats.clamp(1, 10), Ordering::SeqCst);
    }

    /// Bruter sub-opcode 0xFE (spec §6): clamped to the settings range
    /// `bruter_delay` (1..1000).
    pub fn set_inter_frame_delay_ms(&self, delay_ms: u16) {
        self.inter_frame_delay_ms.store(delay_ms.clamp(1, 1000), Ordering::SeqCst);
    }

    fn purge_state(&self) {
        let _ = self.storage.remove_file(STATE_PATH);
    }

    /// The pending state record, if any (drives the reconnect-time
    /// StateAvailable notification, spec §4.8/§8).
    pub fn saved_state(&self) -> Option<(u8, u32, u32)> {
        let bytes = self.storage.read(STATE_PATH).ok()?;
        let rec = StateRecord::deserialize(&bytes)?;
        Some((rec.menu_id, rec.current_code, rec.total_codes))
    }

    /// Resumes a saved attack, subtracting the overlap window (spec
    /// §4.8, §8 scenario 4: "resumeCode = savedCode − OVERLAP").
    pub async fn resume(&self, module: Module, mut radio: Box<dyn SubGhzRadio>, bus: Arc<BusArbiter>) -> Result<(), CommandError> {
        let bytes = self.storage.read(STATE_PATH).map_err(|_| CommandError::NoSavedState)?;
        let rec = StateRecord::deserialize(&bytes).ok_or(CommandError::NoSavedState)?;

        let mode = match rec.attack_type {
            0 => AttackMode::Binary { menu_id: rec.menu_id },
            1 => AttackMode::Tristate { menu_id: rec.menu_id },
            2 => AttackMode::DeBruijn { menu_id: rec.menu_id },
            _ => return Err(CommandError::NoSavedState),
        };
        self.global_repeats.store(rec.global_repeats.max(1), Ordering::SeqCst);
        self.inter_frame_delay_ms.store(rec.inter_frame_delay_ms.max(1), Ordering::SeqCst);

        let resume_code = rec.current_code.saturating_sub(OVERLAP);
        self.purge_state();
        self.notify(Notification::BruteResumed { menu_id: rec.menu_id, resume_code, total: rec.total_codes });

        radio.enter_idle();
        let state = AttackState { mode, module, current: resume_code as u64, total: rec.total_codes as u64 };
        self.run(radio, bus, state).await;
        Ok(())
    }

    /// Starts a fresh attack (spec §4.8's binary/tristate/De Bruijn/
    /// universal/custom modes).
    pub async fn start(&self, mut radio: Box<dyn SubGhzRadio>, bus: Arc<BusArbiter>, mode: AttackMode, module: Module) -> Result<(), CommandError> {
        if self.is_running() {
            return Err(CommandError::AlreadyRunning);
        }
        let total = total_codes(mode).ok_or(CommandError::InvalidChoice)?;
        radio.enter_idle();
        let state = AttackState { mode, module, current: 0, total };
        self.run(radio, bus, state).await;
        Ok(())
    }

    /// Pre-run per spec §4.8: always re-assert TX configuration, going
    /// through Idle first to force PLL recalibration.
    fn prime_transmitter(&self, radio: &mut dyn SubGhzRadio, freq_hz: u32) {
        radio.enter_idle();
        radio.set_frequency(freq_hz);
        radio.enter_tx();
    }

    async fn run(&self, mut radio: Box<dyn SubGhzRadio>, bus: Arc<BusArbiter>, mut state: AttackState) {
        self.running.store(true, Ordering::SeqCst);
        self.cancel.store(false, Ordering::SeqCst);
        self.clean_stop.store(false, Ordering::SeqCst);

        let Some(token) = bus.acquire().await else {
            self.running.store(false, Ordering::SeqCst);
            return;
        };

        let start = Instant::now();
        let mut last_progress_at = 0u64;

        let outcome = match state.mode {
            AttackMode::Binary { menu_id } => match spec_for(menu_id) {
                Some(spec) => {
                    self.prime_transmitter(radio.as_mut(), spec.freq_hz);
                    self.run_keyspace(&mut radio, &mut state, spec, false, start, &mut last_progress_at).await
                }
                None => RunOutcome::Completed,
            },
            AttackMode::Tristate { menu_id } => match spec_for(menu_id) {
                Some(spec) => {
                    self.prime_transmitter(radio.as_mut(), spec.freq_hz);
                    self.run_keyspace(&mut radio, &mut state, spec, true, start, &mut last_progress_at).await
                }
                None => RunOutcome::Completed,
            },
            AttackMode::DeBruijn { menu_id } => match spec_for(menu_id) {
                Some(spec) => {
                    self.prime_transmitter(radio.as_mut(), spec.freq_hz);
                    let ratio = (spec.te_long_us / spec.te_short_us.max(1)).max(1);
                    self.run_de_bruijn(
                        &mut radio,
                        &mut state,
                        spec.bits.min(MAX_DEBRUIJN_BITS),
                        spec.te_short_us,
                        ratio,
                        Some(spec),
                        start,
                        &mut last_progress_at,
                    )
                    .await
                }
                None => RunOutcome::Completed,
            },
            AttackMode::CustomDeBruijn { bits, te_us, ratio, freq_hz } => {
                self.prime_transmitter(radio.as_mut(), freq_hz);
                self.run_de_bruijn(&mut radio, &mut state, bits as u32, te_us, ratio as u32, None, start, &mut last_progress_at).await
            }
            AttackMode::Universal => {
                self.prime_transmitter(radio.as_mut(), UNIVERSAL_FREQS_HZ[0]);
                self.run_universal(&mut radio, &mut state, start, &mut last_progress_at).await
            }
        };

        radio.enter_idle();
        drop(token);
        self.running.store(false, Ordering::SeqCst);

        match outcome {
            RunOutcome::Completed => {
                self.purge_state();
                self.notify(Notification::BruteComplete { menu_id: state.mode.menu_id(), total: state.total as u32 });
            }
            RunOutcome::Paused => {
                let clean_stop = self.clean_stop.swap(false, Ordering::SeqCst);
                if state.mode.is_resumable() && !clean_stop {
                    let record = StateRecord {
                        menu_id: state.mode.menu_id(),
                        current_code: state.current as u32,
                        total_codes: state.total as u32,
                        inter_frame_delay_ms: self.inter_frame_delay_ms.load(Ordering::SeqCst),
                        global_repeats: self.global_repeats.load(Ordering::SeqCst),
                        timestamp: now_unix_secs(),
                        attack_type: state.mode.attack_type(),
                    };
                    let _ = self.storage.write(STATE_PATH, &record.serialize());
                } else {
                    self.purge_state();
                }
                self.notify(Notification::BrutePaused {
                    menu_id: state.mode.menu_id(),
                    current: state.current as u32,
                    total: state.total as u32,
                });
            }
        }
    }

    fn progress_percent(current: u64, total: u64) -> u8 {
        if total == 0 {
            100
        } else {
            ((current.saturating_mul(100)) / total).min(100) as u8
        }
    }

    /// Emits a BruteProgress notification every `PROGRESS_INTERVAL`
    /// units of work (spec §4.8: "Progress notifications every
    /// PROGRESS_INTERVAL codes").
    fn maybe_progress(&self, state: &AttackState, start: Instant, last_progress_at: &mut u64) {
        if state.current != 0 && state.current < *last_progress_at + PROGRESS_INTERVAL {
            return;
        }
        *last_progress_at = state.current;
        let elapsed = start.elapsed().as_secs_f64().max(0.001);
        let codes_per_sec = (state.current as f64 / elapsed) as u32;
        self.notify(Notification::BruteProgress {
            menu_id: state.mode.menu_id(),
            current: state.current as u32,
            total: state.total as u32,
            percentage: Self::progress_percent(state.current, state.total),
            codes_per_sec,
        });
    }

    async fn run_keyspace(
        &self,
        radio: &mut Box<dyn SubGhzRadio>,
        state: &mut AttackState,
        spec: &'static FixedProtocolSpec,
        tristate: bool,
        start: Instant,
        last_progress_at: &mut u64,
    ) -> RunOutcome {
        let positions = spec.bits;
        while state.current < state.total {
            if self.cancel.load(Ordering::SeqCst) {
                return RunOutcome::Paused;
            }
            let pulses =
                if tristate { fixed::encode_tristate(spec, state.current, positions) } else { fixed::encode_binary(spec, state.current) };

            let repeats = self.global_repeats.load(Ordering::SeqCst).max(1);
            let gap = Duration::from_millis(self.inter_frame_delay_ms.load(Ordering::SeqCst).max(1) as u64);
            for rep in 0..repeats {
                for p in &pulses {
                    radio.drive_line(p.is_high());
                    tokio::time::sleep(Duration::from_micros(p.duration_us() as u64)).await;
                }
                if rep + 1 < repeats {
                    tokio::time::sleep(gap).await;
                }
            }
            state.current += 1;
            self.maybe_progress(state, start, last_progress_at);
        }
        RunOutcome::Completed
    }

    /// Streams a De Bruijn sequence's bits. When `spec` is given (the
    /// menu-indexed case) each bit is emitted through that protocol's own
    /// symbol transposition table (`sym0`/`sym1`) rather than a generic
    /// short/long template, matching how `encode_binary`/`encode_tristate`
    /// drive the same protocol for keyspace attacks. `CustomDeBruijn` has
    /// no such table and falls back to [`dynamic_bit_pulse_us`].
    async fn run_de_bruijn(
        &self,
        radio: &mut Box<dyn SubGhzRadio>,
        state: &mut AttackState,
        bits: u32,
        te_short_us: u32,
        ratio: u32,
        spec: Option<&'static FixedProtocolSpec>,
        start: Instant,
        last_progress_at: &mut u64,
    ) -> RunOutcome {
        let sequence = match generate_de_bruijn(bits) {
            Ok(s) => s,
            Err(_) => return RunOutcome::Completed,
        };
        let ratio_u8 = ratio.clamp(1, u8::MAX as u32) as u8;

        // Pilot, then the bit stream runs continuously with no per-code
        // gap (spec §4.8).
        radio.drive_line(true);
        tokio::time::sleep(Duration::from_micros(te_short_us as u64 * 10)).await;

        while (state.current as usize) < sequence.len() {
            if self.cancel.load(Ordering::SeqCst) {
                return RunOutcome::Paused;
            }
            let bit = sequence[state.current as usize];
            let (hi_us, lo_us) = match spec {
                Some(spec) => {
                    let sym = if bit { spec.sym1 } else { spec.sym0 };
                    (sym.high_us, sym.low_us)
                }
                None => dynamic_bit_pulse_us(bit, te_short_us, ratio_u8),
            };
            radio.drive_line(true);
            tokio::time::sleep(Duration::from_micros(hi_us as u64)).await;
            radio.drive_line(false);
            tokio::time::sleep(Duration::from_micros(lo_us as u64)).await;
            state.current += 1;
            self.maybe_progress(state, start, last_progress_at);
        }
        // Stop bit.
        radio.drive_line(true);
        tokio::time::sleep(Duration::from_micros(te_short_us as u64)).await;
        radio.drive_line(false);
        RunOutcome::Completed
    }

    async fn run_universal(&self, radio: &mut Box<dyn SubGhzRadio>, state: &mut AttackState, start: Instant, last_progress_at: &mut u64) -> RunOutcome {
        while (state.current as usize) < (state.total as usize) {
            if self.cancel.load(Ordering::SeqCst) {
                return RunOutcome::Paused;
            }
            let idx = state.current as usize;
            let freq = UNIVERSAL_FREQS_HZ[idx % UNIVERSAL_FREQS_HZ.len()];
            let te = UNIVERSAL_TE_US[(idx / UNIVERSAL_FREQS_HZ.len()) % UNIVERSAL_TE_US.len()];
            let ratio = UNIVERSAL_RATIOS[(idx / (UNIVERSAL_FREQS_HZ.len() * UNIVERSAL_TE_US.len())) % UNIVERSAL_RATIOS.len()];
            let bits = UNIVERSAL_BIT_LENGTHS
                [(idx / (UNIVERSAL_FREQS_HZ.len() * UNIVERSAL_TE_US.len() * UNIVERSAL_RATIOS.len())) % UNIVERSAL_BIT_LENGTHS.len()];

            radio.set_frequency(freq);
            for i in 0..bits {
                let high_bit = i % 2 == 0;
                let (hi_us, lo_us) = dynamic_bit_pulse_us(high_bit, te, ratio);
                radio.drive_line(true);
                tokio::time::sleep(Duration::from_micros(hi_us as u64)).await;
                radio.drive_line(false);
                tokio::time::sleep(Duration::from_micros(lo_us as u64)).await;
            }
            state.current += 1;
            self.maybe_progress(state, start, last_progress_at);
        }
        RunOutcome::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn de_bruijn_b2_3_contains_every_3bit_substring_exactly_once() {
        let seq = generate_de_bruijn(3).unwrap();
        assert_eq!(seq.len(), 8);
        let mut seen = std::collections::HashSet::new();
        for i in 0..seq.len() {
            let mut window = 0u8;
            for j in 0..3 {
                window = (window << 1) | (seq[(i + j) % seq.len()] as u8);
            }
            seen.insert(window);
        }
        assert_eq!(seen.len(), 8);
    }

    #[test]
    fn de_bruijn_rejects_zero_and_oversized_n() {
        assert_eq!(generate_de_bruijn(0), Err(CommandError::OutOfRange));
        assert_eq!(generate_de_bruijn(MAX_DEBRUIJN_BITS + 1), Err(CommandError::OutOfRange));
    }

    #[test]
    fn state_record_round_trips_through_serialize() {
        let rec = StateRecord {
            menu_id: 1,
            current_code: 50,
            total_codes: 4096,
            inter_frame_delay_ms: 10,
            global_repeats: 1,
            timestamp: 1_234_567,
            attack_type: 0,
        };
        let bytes = rec.serialize();
        assert_eq!(bytes.len(), 21);
        let parsed = StateRecord::deserialize(&bytes).unwrap();
        assert_eq!(parsed, rec);
    }

    #[test]
    fn state_record_rejects_bad_magic() {
        let bytes = vec![0u8; 21];
        assert!(StateRecord::deserialize(&bytes).is_none());
    }

    #[test]
    fn custom_de_bruijn_validates_documented_ranges() {
        assert!(validate_custom(8, 100, 3).is_ok());
        assert_eq!(validate_custom(0, 100, 3), Err(CommandError::OutOfRange));
        assert_eq!(validate_custom(8, 10, 3), Err(CommandError::OutOfRange));
        assert_eq!(validate_custom(8, 100, 11), Err(CommandError::OutOfRange));
    }

    #[tokio::test]
    async fn start_twice_returns_already_running() {
        use crate::radio::MockRadio;
        use crate::storage::MemBackend;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemBackend::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(true));
        let engine = BruteForceEngine::new(tx, storage, cancel, running);
        let bus = Arc::new(BusArbiter::new());
        let err = engine.start(Box::new(MockRadio::new()), bus, AttackMode::Binary { menu_id: 1 }, Module::A).await.unwrap_err();
        assert_eq!(err, CommandError::AlreadyRunning);
    }

    #[tokio::test]
    async fn resume_without_saved_state_errors() {
        use crate::radio::MockRadio;
        use crate::storage::MemBackend;
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemBackend::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let engine = BruteForceEngine::new(tx, storage, cancel, running);
        let bus = Arc::new(BusArbiter::new());
        let err = engine.resume(Module::A, Box::new(MockRadio::new()), bus).await.unwrap_err();
        assert_eq!(err, CommandError::NoSavedState);
    }

    #[tokio::test]
    async fn pause_then_resume_subtracts_overlap_and_purges_state() {
        use crate::radio::MockRadio;
        use crate::storage::MemBackend;
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let storage: Arc<dyn StorageBackend> = Arc::new(MemBackend::new());
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let engine = Arc::new(BruteForceEngine::new(tx, storage.clone(), cancel.clone(), running));
        let bus = Arc::new(BusArbiter::new());

        let eng2 = engine.clone();
        let bus2 = bus.clone();
        let handle = tokio::spawn(async move {
            let _ = eng2.start(Box::new(MockRadio::new()), bus2, AttackMode::Binary { menu_id: 1 }, Module::A).await;
        });
        tokio::time::sleep(Duration::from_millis(5)).await;
        cancel.store(true, Ordering::SeqCst);
        handle.await.unwrap();

        assert!(storage.exists(STATE_PATH));
        let (menu_id, current, _total) = engine.saved_state().expect("state saved on pause");
        assert_eq!(menu_id, 1);

        let resumed = engine.resume(Module::A, Box::new(MockRadio::new()), bus).await;
        assert!(resumed.is_ok());
        assert!(!storage.exists(STATE_PATH));

        let mut saw_resumed = false;
        while let Ok(n) = rx.try_recv() {
            if let Notification::BruteResumed { resume_code, .. } = n {
                assert_eq!(resume_code, current.saturating_sub(OVERLAP));
                saw_resumed = true;
            }
        }
        assert!(saw_resumed);
    }
}
