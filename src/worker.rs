//! The CC1101 Worker (spec §4.2): a single cooperative loop owning both
//! sub-GHz transceivers, arbitrating the ISR-driven pulse-capture
//! pipeline, and hosting the mutually-exclusive per-module modes.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::isr::PulseRing;
use crate::notify::Notification;
use crate::protocol::Router;
use crate::pulsefile::{Preset, SubFileHeader, SubFileWriter};
use crate::radio::{BusArbiter, SubGhzRadio};
use crate::storage::StorageBackend;
use crate::types::{Module, PathType};

/// Per-module RF mode (spec §3 `RadioModeState`). The discriminant order
/// doubles as the wire value used in `ModeSwitch`/`Status` notifications
/// (spec §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioModeState {
    Idle,
    Detecting,
    Recording,
    Transmitting,
    Analyzing,
    Jamming,
    LiveDecode,
}

impl RadioModeState {
    pub fn wire(self) -> u8 {
        match self {
            RadioModeState::Idle => 0,
            RadioModeState::Detecting => 1,
            RadioModeState::Recording => 2,
            RadioModeState::Transmitting => 3,
            RadioModeState::Analyzing => 4,
            RadioModeState::Jamming => 5,
            RadioModeState::LiveDecode => 6,
        }
    }

    /// An ISR is attached in exactly these four modes (spec §8 invariant).
    /// Jamming and Transmitting drive the output pin directly and never
    /// attach the capture ISR.
    fn needs_isr(self) -> bool {
        matches!(
            self,
            RadioModeState::Detecting | RadioModeState::Recording | RadioModeState::Analyzing | RadioModeState::LiveDecode
        )
    }
}

/// A jam waveform shape; spec §4.2 leaves the exact pattern set
/// unspecified beyond "output the configured pattern".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JamPattern {
    Continuous,
    Pulsed { on_us: u32, off_us: u32 },
}

/// Work item for the Worker (spec §3 `Task`), deep-copied by the caller
/// before enqueue — every field here is owned, never borrowed.
#[derive(Debug, Clone)]
pub enum Task {
    StartDetect { module: Module, rssi_threshold: i16, is_background: bool },
    StartRecord { module: Module, freq_hz: u32, preset: Preset },
    Transmit { module: Module, filename: String, repeat: u32, path_type: PathType },
    StartAnalyzer { module: Module, start_freq_hz: u32, end_freq_hz: u32, step_hz: u32, dwell_ms: u32 },
    StartJam { module: Module, freq_hz: u32, power: i8, pattern: JamPattern, duration_ms: u32, cooldown_ms: u32 },
    /// Enters live-decode: arms the ISR pulse ring and feeds completed
    /// captures through the protocol [`Router`] as they arrive, without
    /// persisting anything to storage (the ProtoPirate live-decode group,
    /// spec §6 opcode `0x60`).
    StartLiveDecode { module: Module, freq_hz: u32 },
    StopDetect(Module),
    StopRecord(Module),
    StopAnalyzer(Module),
    StopJam(Module),
    StopLiveDecode(Module),
    GoIdle(Module),
}

/// Fixed 18-entry detect sweep list (spec §4.2: "sweep a fixed 18-frequency
/// list at 650 kHz bandwidth"), spanning the common sub-GHz ISM bands.
pub const DETECT_FREQS_HZ: [u32; 18] = [
    300_000_000,
    303_875_000,
    304_250_000,
    310_000_000,
    315_000_000,
    318_000_000,
    330_000_000,
    345_000_000,
    390_000_000,
    418_000_000,
    433_075_000,
    433_420_000,
    433_920_000,
    434_420_000,
    438_900_000,
    868_350_000,
    868_950_000,
    915_000_000,
];

const DETECT_SETTLE: Duration = Duration::from_micros(500);
const ANALYZE_SETTLE: Duration = Duration::from_micros(200);
/// Placeholder roll threshold (spec §4.2 "roll the file when size
/// threshold is crossed" does not name a number); one megabyte of `.sub`
/// text is a generous single-capture-session size.
const ROLL_THRESHOLD_BYTES: usize = 1_000_000;
const TRANSMIT_REPEAT_GAP: Duration = Duration::from_millis(10);

#[derive(Debug, Clone, Copy)]
pub enum SendErrorCode {
    ReadFailed = 1,
    ParseFailed = 2,
    Busy = 3,
}

struct DetectState {
    rssi_threshold: i16,
    is_background: bool,
    freq_idx: usize,
}

struct RecordState {
    path: String,
    header: SubFileHeader,
    writer: SubFileWriter,
    header_written: bool,
    file_seq: u32,
}

struct AnalyzeState {
    start_hz: u32,
    end_hz: u32,
    step_hz: u32,
    dwell: Duration,
    current_hz: u32,
}

struct JamState {
    pattern: JamPattern,
    duration: Duration,
    cooldown: Duration,
    elapsed: Duration,
    in_cooldown: bool,
}

struct ModuleRuntime {
    module: Module,
    mode: RadioModeState,
    radio: Box<dyn SubGhzRadio>,
    ring: PulseRing,
    isr_attached: bool,
    detect: Option<DetectState>,
    record: Option<RecordState>,
    analyze: Option<AnalyzeState>,
    jam: Option<JamState>,
}

impl ModuleRuntime {
    fn new(module: Module, radio: Box<dyn SubGhzRadio>) -> Self {
        ModuleRuntime {
            module,
            mode: RadioModeState::Idle,
            radio,
            ring: PulseRing::new(),
            isr_attached: false,
            detect: None,
            record: None,
            analyze: None,
            jam: None,
        }
    }
}

/// The Worker (spec §4.2). Owns both modules' radios and the shared
/// Protocol Router; consumes `Task`s; runs the per-mode step loop.
pub struct Worker {
    modules: [ModuleRuntime; 2],
    router: Router,
    notify_tx: mpsc::UnboundedSender<Notification>,
    task_rx: mpsc::Receiver<Task>,
    bus: Arc<BusArbiter>,
    storage: Arc<dyn StorageBackend>,
    is_executing: Arc<AtomicBool>,
    mode_mirror: Arc<ModeMirror>,
    start: Instant,
    last_heartbeat: Instant,
    last_heap_log: Instant,
}

/// Lock-free read-only view of each module's [`RadioModeState`], kept in
/// step by [`Worker::transition`]. The dispatcher holds a clone of this so
/// it can answer `GetState`/status queries without owning the `Worker`
/// itself, which runs as its own task once [`Worker::run`] is spawned.
pub struct ModeMirror {
    modes: [AtomicU8; 2],
}

impl ModeMirror {
    pub fn new() -> Self {
        ModeMirror { modes: [AtomicU8::new(RadioModeState::Idle.wire()), AtomicU8::new(RadioModeState::Idle.wire())] }
    }

    fn set(&self, module: Module, mode: RadioModeState) {
        self.modes[module.index() as usize].store(mode.wire(), Ordering::Release);
    }

    /// Wire-encoded mode byte, per spec §3/§6 (same encoding as
    /// [`RadioModeState::wire`]).
    pub fn wire(&self, module: Module) -> u8 {
        self.modes[module.index() as usize].load(Ordering::Acquire)
    }
}

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);
const HEAP_LOG_INTERVAL: Duration = Duration::from_secs(60);

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        radio_a: Box<dyn SubGhzRadio>,
        radio_b: Box<dyn SubGhzRadio>,
        router: Router,
        notify_tx: mpsc::UnboundedSender<Notification>,
        task_rx: mpsc::Receiver<Task>,
        bus: Arc<BusArbiter>,
        storage: Arc<dyn StorageBackend>,
        is_executing: Arc<AtomicBool>,
    ) -> Self {
        let now = Instant::now();
        Worker {
            modules: [ModuleRuntime::new(Module::A, radio_a), ModuleRuntime::new(Module::B, radio_b)],
            router,
            notify_tx,
            task_rx,
            bus,
            storage,
            is_executing,
            mode_mirror: Arc::new(ModeMirror::new()),
            start: now,
            last_heartbeat: now,
            last_heap_log: now,
        }
    }

    /// Hands out a shared, thread-safe view of per-module modes. Call this
    /// before moving `self` into [`Worker::run`]'s spawned task.
    pub fn mode_mirror(&self) -> Arc<ModeMirror> {
        self.mode_mirror.clone()
    }

    fn module_mut(&mut self, module: Module) -> &mut ModuleRuntime {
        &mut self.modules[module.index() as usize]
    }

    fn notify(&self, n: Notification) {
        let _ = self.notify_tx.send(n);
    }

    pub fn mode_of(&self, module: Module) -> RadioModeState {
        self.modules[module.index() as usize].mode
    }

    pub fn isr_attached(&self, module: Module) -> bool {
        self.modules[module.index() as usize].isr_attached
    }

    /// Edge callback driving a module's capture ring — the stand-in for a
    /// real GPIO ISR (spec §4.1). A no-op if that module currently has no
    /// ISR attached, matching "if modeState = Idle then no ISR is
    /// attached."
    pub fn on_edge(&mut self, module: Module, now_us: crate::types::TimestampUs) {
        let m = self.module_mut(module);
        if m.isr_attached {
            m.ring.on_edge(now_us);
        }
    }

    fn transition(&mut self, module: Module, new_mode: RadioModeState) {
        let idx = module.index() as usize;
        let prev = self.modules[idx].mode;
        // Notification must be emitted before the state field is
        // overwritten (spec §3/§4.2: "the observer sees the transition
        // atomically").
        self.notify(Notification::ModeSwitch { module, new_mode: new_mode.wire(), prev_mode: prev.wire() });
        self.modules[idx].mode = new_mode;
        self.modules[idx].isr_attached = new_mode.needs_isr();
        self.mode_mirror.set(module, new_mode);
    }

    /// Drives `module` to Idle: detaches any ISR, parks the radio in
    /// standby, and clears samples and per-mode state. Idempotent (spec
    /// §4.2/§8: "`GoIdle` twice equals once").
    fn go_idle(&mut self, module: Module) {
        let idx = module.index() as usize;
        if self.modules[idx].mode == RadioModeState::Idle {
            return;
        }
        self.transition(module, RadioModeState::Idle);
        let m = &mut self.modules[idx];
        m.radio.enter_idle();
        m.ring.reset();
        m.detect = None;
        m.record = None;
        m.analyze = None;
        m.jam = None;
    }

    pub async fn handle_task(&mut self, task: Task) {
        match task {
            Task::GoIdle(module)
            | Task::StopDetect(module)
            | Task::StopRecord(module)
            | Task::StopAnalyzer(module)
            | Task::StopJam(module)
            | Task::StopLiveDecode(module) => {
                self.go_idle(module);
            }
            Task::StartLiveDecode { module, freq_hz } => {
                self.go_idle(module);
                let m = self.module_mut(module);
                m.radio.set_frequency(freq_hz);
                m.radio.enter_rx();
                self.transition(module, RadioModeState::LiveDecode);
            }
            Task::StartDetect { module, rssi_threshold, is_background } => {
                self.go_idle(module);
                self.module_mut(module).detect =
                    Some(DetectState { rssi_threshold, is_background, freq_idx: 0 });
                self.transition(module, RadioModeState::Detecting);
            }
            Task::StartRecord { module, freq_hz, preset } => {
                self.go_idle(module);
                let path = self.next_record_path(module, 0);
                let header = SubFileHeader { frequency_hz: freq_hz, preset: preset.clone() };
                let m = self.module_mut(module);
                m.radio.set_frequency(freq_hz);
                m.radio.load_preset(preset.register_bytes());
                m.radio.enter_rx();
                m.record = Some(RecordState {
                    path,
                    writer: SubFileWriter::new(&header),
                    header,
                    header_written: false,
                    file_seq: 0,
                });
                self.transition(module, RadioModeState::Recording);
            }
            Task::StartAnalyzer { module, start_freq_hz, end_freq_hz, step_hz, dwell_ms } => {
                self.go_idle(module);
                self.module_mut(module).analyze = Some(AnalyzeState {
                    start_hz: start_freq_hz,
                    end_hz: end_freq_hz,
                    step_hz: step_hz.max(1),
                    dwell: Duration::from_millis(dwell_ms as u64),
                    current_hz: start_freq_hz,
                });
                self.transition(module, RadioModeState::Analyzing);
            }
            Task::StartJam { module, freq_hz, power: _power, pattern, duration_ms, cooldown_ms } => {
                self.go_idle(module);
                let m = self.module_mut(module);
                m.radio.set_frequency(freq_hz);
                m.jam = Some(JamState {
                    pattern,
                    duration: Duration::from_millis(duration_ms as u64),
                    cooldown: Duration::from_millis(cooldown_ms as u64),
                    elapsed: Duration::ZERO,
                    in_cooldown: false,
                });
                self.transition(module, RadioModeState::Jamming);
            }
            Task::Transmit { module, filename, repeat, path_type } => {
                self.go_idle(module);
                self.transition(module, RadioModeState::Transmitting);
                self.run_transmit(module, &filename, repeat, path_type).await;
                self.go_idle(module);
            }
        }
    }

    fn next_record_path(&self, module: Module, seq: u32) -> String {
        format!("{}/capture_{}_{}.sub", PathType::Records.base_dir(), module.index(), seq)
    }

    async fn run_transmit(&mut self, module: Module, filename: &str, repeat: u32, path_type: PathType) {
        let base = path_type.base_dir();
        let path = if base.is_empty() { filename.to_string() } else { format!("{base}/{filename}") };

        let Some(token) = self.bus.acquire().await else {
            self.notify(Notification::SignalSendError {
                module,
                error_code: SendErrorCode::Busy as u8,
                name: filename.to_string(),
            });
            return;
        };

        let bytes = match self.storage.read(&path) {
            Ok(b) => b,
            Err(_) => {
                self.notify(Notification::SignalSendError {
                    module,
                    error_code: SendErrorCode::ReadFailed as u8,
                    name: filename.to_string(),
                });
                drop(token);
                return;
            }
        };
        let text = String::from_utf8_lossy(&bytes).into_owned();

        let (header, offset) = match crate::pulsefile::parse_header(&text) {
            Ok(h) => h,
            Err(_) => {
                self.notify(Notification::SignalSendError {
                    module,
                    error_code: SendErrorCode::ParseFailed as u8,
                    name: filename.to_string(),
                });
                drop(token);
                return;
            }
        };

        let mut pulses = Vec::new();
        crate::pulsefile::stream_body(&text[offset..], |d, h| pulses.push((d, h)));

        let m = self.module_mut(module);
        m.radio.set_frequency(header.frequency_hz);
        m.radio.load_preset(header.preset.register_bytes());
        m.radio.enter_tx();

        for rep in 0..repeat.max(1) {
            for &(duration_us, high) in &pulses {
                self.module_mut(module).radio.drive_line(high);
                tokio::time::sleep(Duration::from_micros(duration_us as u64)).await;
            }
            if rep + 1 < repeat.max(1) {
                tokio::time::sleep(TRANSMIT_REPEAT_GAP).await;
            }
        }
        self.module_mut(module).radio.enter_idle();
        drop(token);

        self.notify(Notification::SignalSent { module, name: filename.to_string() });
    }

    async fn detect_step(&mut self, module: Module) {
        let idx = module.index() as usize;
        let Some(detect) = self.modules[idx].detect.as_mut() else { return };
        let freq = DETECT_FREQS_HZ[detect.freq_idx % DETECT_FREQS_HZ.len()];
        let threshold = detect.rssi_threshold;
        let is_background = detect.is_background;
        detect.freq_idx = (detect.freq_idx + 1) % DETECT_FREQS_HZ.len();

        let m = &mut self.modules[idx];
        m.radio.set_frequency(freq);
        drop(m);
        tokio::time::sleep(DETECT_SETTLE).await;
        let m = &mut self.modules[idx];
        let rssi = m.radio.read_rssi_dbm();
        let samples = m.ring.len() as u16;

        if rssi >= threshold {
            self.notify(Notification::SignalDetected { module, samples, freq_hz: freq, rssi_dbm: rssi });
            if !is_background {
                self.go_idle(module);
            }
        }
    }

    fn record_step(&mut self, module: Module, now: Instant) {
        let idx = module.index() as usize;
        let m = &mut self.modules[idx];
        if !m.ring.is_signal_complete(crate::types::TimestampUs(now.elapsed().as_micros() as u64)) {
            return;
        }
        let samples = m.ring.drain();
        let Some(record) = m.record.as_mut() else { return };

        if !record.header_written {
            let _ = self.storage.write(&record.path, record.writer.snapshot().as_bytes());
            record.header_written = true;
        }
        let mut high = true;
        for &d in &samples {
            record.writer.push_pulse(d, high);
            high = !high;
        }
        let _ = self.storage.write(&record.path, record.writer.snapshot().as_bytes());

        let name = record.path.rsplit('/').next().unwrap_or(&record.path).to_string();
        self.notify(Notification::SignalRecorded { module, name });

        if record.writer.snapshot().len() > ROLL_THRESHOLD_BYTES {
            record.file_seq += 1;
            let new_path = format!("{}/capture_{}_{}.sub", PathType::Records.base_dir(), module.index(), record.file_seq);
            record.path = new_path;
            record.writer = SubFileWriter::new(&record.header);
            record.header_written = false;
        }
    }

    fn live_decode_step(&mut self, module: Module, now: Instant) {
        let idx = module.index() as usize;
        let m = &mut self.modules[idx];
        if !m.ring.is_signal_complete(crate::types::TimestampUs(now.elapsed().as_micros() as u64)) {
            return;
        }
        let samples = m.ring.drain();
        let freq = m.radio.frequency();
        let results = self.router.feed_samples(&samples, freq, now);
        for r in results {
            self.notify(Notification::DecodeResult(r));
        }
    }

    async fn analyze_step(&mut self, module: Module) {
        let idx = module.index() as usize;
        let Some(analyze) = self.modules[idx].analyze.as_mut() else { return };
        let freq = analyze.current_hz;
        let dwell = analyze.dwell;
        let mut next = analyze.current_hz.saturating_add(analyze.step_hz);
        if next > analyze.end_hz {
            next = analyze.start_hz;
        }
        analyze.current_hz = next;

        let m = &mut self.modules[idx];
        m.radio.set_frequency(freq);
        drop(m);
        tokio::time::sleep(dwell.max(ANALYZE_SETTLE)).await;
        let m = &mut self.modules[idx];
        let rssi = m.radio.read_rssi_dbm();
        self.notify(Notification::AnalyzerPoint { module, freq_hz: freq, rssi_dbm: rssi });
    }

    async fn jam_step(&mut self, module: Module, dt: Duration) {
        let idx = module.index() as usize;
        let Some(jam) = self.modules[idx].jam.as_mut() else { return };

        if jam.in_cooldown {
            jam.elapsed += dt;
            if jam.elapsed >= jam.cooldown {
                jam.elapsed = Duration::ZERO;
                jam.in_cooldown = false;
                self.modules[idx].radio.enter_tx();
            }
            return;
        }

        jam.elapsed += dt;
        let pattern = jam.pattern;
        let done = jam.elapsed >= jam.duration;
        let m = &mut self.modules[idx];
        match pattern {
            JamPattern::Continuous => m.radio.drive_line(true),
            JamPattern::Pulsed { on_us, off_us } => {
                m.radio.drive_line(true);
                tokio::time::sleep(Duration::from_micros(on_us as u64)).await;
                m.radio.drive_line(false);
                tokio::time::sleep(Duration::from_micros(off_us as u64)).await;
            }
        }
        if done {
            let jam = self.modules[idx].jam.as_mut().unwrap();
            jam.elapsed = Duration::ZERO;
            jam.in_cooldown = true;
            self.modules[idx].radio.enter_idle();
        }
    }

    async fn step_module(&mut self, module: Module, now: Instant, dt: Duration) {
        match self.mode_of(module) {
            RadioModeState::Idle | RadioModeState::Transmitting => {}
            RadioModeState::Detecting => self.detect_step(module).await,
            RadioModeState::Recording => self.record_step(module, now),
            RadioModeState::Analyzing => self.analyze_step(module).await,
            RadioModeState::Jamming => self.jam_step(module, dt).await,
            RadioModeState::LiveDecode => self.live_decode_step(module, now),
        }
    }

    /// One full loop iteration: housekeeping, a non-blocking task
    /// dequeue, then a per-mode step for each module (spec §4.2). Exposed
    /// separately from [`Worker::run`] so tests can drive iterations
    /// deterministically without a real sleep-based scheduler.
    pub async fn tick(&mut self) {
        let now = Instant::now();
        if now.duration_since(self.last_heartbeat) >= HEARTBEAT_INTERVAL {
            self.last_heartbeat = now;
            if !self.is_executing.load(Ordering::SeqCst) {
                self.notify(Notification::Heartbeat { uptime_ms: now.duration_since(self.start).as_millis() as u32 });
            }
        }
        if now.duration_since(self.last_heap_log) >= HEAP_LOG_INTERVAL {
            self.last_heap_log = now;
            crate::log::debug!("heap/fragmentation check (hosted build: no-op)");
        }

        if let Ok(task) = self.task_rx.try_recv() {
            self.handle_task(task).await;
        }

        for module in [Module::A, Module::B] {
            self.step_module(module, now, Duration::from_millis(10)).await;
        }
    }

    /// Runs until the task channel closes. Priority 5, queue-recv(10ms)
    /// per spec §5's task table.
    pub async fn run(mut self) {
        loop {
            if self.task_rx.is_closed() && self.task_rx.try_recv().is_err() {
                break;
            }
            self.tick().await;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::radio::MockRadio;
    use crate::storage::MemBackend;

    fn make_worker() -> (Worker, mpsc::UnboundedReceiver<Notification>, mpsc::Sender<Task>) {
        let (ntx, nrx) = mpsc::unbounded_channel();
        let (ttx, trx) = mpsc::channel(16);
        let storage: Arc<dyn StorageBackend> = Arc::new(MemBackend::new());
        let worker = Worker::new(
            Box::new(MockRadio::new()),
            Box::new(MockRadio::new()),
            Router::new(Vec::new()),
            ntx,
            trx,
            Arc::new(BusArbiter::new()),
            storage,
            Arc::new(AtomicBool::new(false)),
        );
        (worker, nrx, ttx)
    }

    #[tokio::test]
    async fn go_idle_twice_is_idempotent() {
        let (mut worker, mut nrx, _ttx) = make_worker();
        worker.handle_task(Task::StartDetect { module: Module::A, rssi_threshold: -80, is_background: true }).await;
        // Drain the Idle->Detecting transition.
        let _ = nrx.recv().await.unwrap();
        worker.handle_task(Task::GoIdle(Module::A)).await;
        let _ = nrx.recv().await.unwrap(); // Detecting->Idle
        worker.handle_task(Task::GoIdle(Module::A)).await;
        assert!(nrx.try_recv().is_err(), "second GoIdle must not emit another transition");
        assert_eq!(worker.mode_of(Module::A), RadioModeState::Idle);
    }

    #[tokio::test]
    async fn mode_switch_notified_before_state_overwritten() {
        let (mut worker, mut nrx, _ttx) = make_worker();
        worker.handle_task(Task::StartJam {
            module: Module::B,
            freq_hz: 433_920_000,
            power: 7,
            pattern: JamPattern::Continuous,
            duration_ms: 100,
            cooldown_ms: 50,
        })
        .await;
        match nrx.recv().await.unwrap() {
            Notification::ModeSwitch { module, new_mode, prev_mode } => {
                assert_eq!(module, Module::B);
                assert_eq!(prev_mode, RadioModeState::Idle.wire());
                assert_eq!(new_mode, RadioModeState::Jamming.wire());
            }
            other => panic!("expected ModeSwitch, got {other:?}"),
        }
        assert_eq!(worker.mode_of(Module::B), RadioModeState::Jamming);
    }

    #[tokio::test]
    async fn isr_attached_only_in_the_four_documented_modes() {
        let (mut worker, mut nrx, _ttx) = make_worker();
        worker.handle_task(Task::StartJam {
            module: Module::A,
            freq_hz: 433_920_000,
            power: 0,
            pattern: JamPattern::Continuous,
            duration_ms: 10,
            cooldown_ms: 10,
        })
        .await;
        let _ = nrx.recv().await.unwrap();
        assert!(!worker.isr_attached(Module::A));

        worker.handle_task(Task::GoIdle(Module::A)).await;
        let _ = nrx.recv().await.unwrap();
        worker.handle_task(Task::StartDetect { module: Module::A, rssi_threshold: -80, is_background: true }).await;
        let _ = nrx.recv().await.unwrap();
        assert!(worker.isr_attached(Module::A));
    }

    #[tokio::test]
    async fn detect_emits_signal_when_rssi_meets_threshold() {
        let (mut worker, mut nrx, _ttx) = make_worker();
        // Force the first swept frequency to read above threshold.
        worker.modules[0].radio = Box::new({
            let mut r = MockRadio::new();
            r.set_rssi_for(DETECT_FREQS_HZ[0], -30);
            r
        });
        worker.handle_task(Task::StartDetect { module: Module::A, rssi_threshold: -80, is_background: false }).await;
        let _ = nrx.recv().await.unwrap(); // ModeSwitch
        worker.detect_step(Module::A).await;
        match nrx.recv().await.unwrap() {
            Notification::SignalDetected { module, freq_hz, rssi_dbm, .. } => {
                assert_eq!(module, Module::A);
                assert_eq!(freq_hz, DETECT_FREQS_HZ[0]);
                assert_eq!(rssi_dbm, -30);
            }
            other => panic!("expected SignalDetected, got {other:?}"),
        }
        // Foreground detect returns to Idle after a hit.
        let _ = nrx.recv().await.unwrap(); // ModeSwitch back to Idle
        assert_eq!(worker.mode_of(Module::A), RadioModeState::Idle);
    }

    #[tokio::test]
    async fn transmit_missing_file_emits_send_error_and_settles_idle() {
        let (mut worker, mut nrx, _ttx) = make_worker();
        worker
            .handle_task(Task::Transmit {
                module: Module::A,
                filename: "nope.sub".to_string(),
                repeat: 1,
                path_type: PathType::Signals,
            })
            .await;
        let _ = nrx.recv().await.unwrap(); // Idle -> Transmitting
        match nrx.recv().await.unwrap() {
            Notification::SignalSendError { error_code, name, .. } => {
                assert_eq!(error_code, SendErrorCode::ReadFailed as u8);
                assert_eq!(name, "nope.sub");
            }
            other => panic!("expected SignalSendError, got {other:?}"),
        }
        let _ = nrx.recv().await.unwrap(); // Transmitting -> Idle
        assert_eq!(worker.mode_of(Module::A), RadioModeState::Idle);
    }

    #[tokio::test]
    async fn transmit_happy_path_drives_pulses_and_reports_sent() {
        let (mut worker, mut nrx, _ttx) = make_worker();
        let text = "Filetype: Flipper SubGhz RAW File\nFrequency: 433920000\nPreset: FuriHalSubGhzPresetOok650Async\nRAW_Data: 10 -10\n";
        worker.storage.write("/DATA/SIGNALS/test.sub", text.as_bytes()).unwrap();

        worker
            .handle_task(Task::Transmit {
                module: Module::A,
                filename: "test.sub".to_string(),
                repeat: 1,
                path_type: PathType::Signals,
            })
            .await;
        let _ = nrx.recv().await.unwrap(); // Idle -> Transmitting
        match nrx.recv().await.unwrap() {
            Notification::SignalSent { module, name } => {
                assert_eq!(module, Module::A);
                assert_eq!(name, "test.sub");
            }
            other => panic!("expected SignalSent, got {other:?}"),
        }
        let _ = nrx.recv().await.unwrap(); // Transmitting -> Idle
        assert_eq!(worker.mode_of(Module::A), RadioModeState::Idle);
    }
}
