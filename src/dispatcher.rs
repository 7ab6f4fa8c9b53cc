//! Command dispatcher (spec §4.4, §6): the single entry point that turns a
//! reassembled inbound command into calls against every other subsystem,
//! and the notifications those calls must always produce.
//!
//! Every handler here ultimately emits exactly one of `CommandSuccess`,
//! `CommandError{code}`, or a richer typed response in its place (spec
//! §4.4: "Handlers return a boolean outcome but always produce an
//! explicit CommandSuccess or CommandError{code} notification"). The
//! `isExecuting` flag is raised for the duration of every call into
//! [`Dispatcher::dispatch`] so the heartbeat task (see [`crate::worker`])
//! can suppress itself while a handler runs.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, Mutex as AsyncMutex};

use crate::bruteforce::{self, AttackMode, BruteForceEngine};
use crate::bytes::ByteReader;
use crate::error::{CommandError, FsError};
use crate::fileio::{self, FileIo};
use crate::framing::{FrameReassembler, Inbound, UPLOAD_OPCODE};
use crate::notify::Notification;
use crate::nrf::NrfScanner;
use crate::protocol::fixed;
use crate::radio::{BusArbiter, RadioFactory};
use crate::settings::{self, PersistentSettings, SettingsStore};
use crate::storage::StorageBackend;
use crate::types::{Module, PathType};
use crate::worker::{ModeMirror, Task};

/// Inbound opcodes (spec §6). Named to match the client-facing verb, not
/// the internal handler.
pub mod opcode {
    pub const GET_STATE: u8 = 0x01;
    pub const REQUEST_SCAN: u8 = 0x02;
    pub const REQUEST_IDLE: u8 = 0x03;
    pub const BRUTER: u8 = 0x04;
    pub const GET_FILE_LIST: u8 = 0x05;
    pub const START_RECORD: u8 = 0x06;
    pub const STOP_RECORD: u8 = 0x07;
    pub const TRANSMIT: u8 = 0x08;
    pub const LOAD_FILE: u8 = 0x09;
    pub const MKDIR: u8 = 0x0A;
    pub const RM: u8 = 0x0B;
    pub const RENAME: u8 = 0x0C;
    pub const UPLOAD: u8 = super::UPLOAD_OPCODE;
    pub const COPY: u8 = 0x0E;
    pub const MOVE: u8 = 0x0F;
    pub const SAVE_TO_SIGNALS: u8 = 0x10;
    pub const SET_TIME: u8 = 0x13;
    pub const GET_DIRECTORY_TREE: u8 = 0x14;
    pub const REBOOT: u8 = 0x15;
    pub const FACTORY_RESET: u8 = 0x16;
    pub const SET_DEVICE_NAME: u8 = 0x17;
    pub const FORMAT_SD: u8 = 0x18;
    pub const NRF_START_SCAN: u8 = 0x20;
    pub const NRF_STOP_SCAN: u8 = 0x21;
    pub const HW_BUTTON_CONFIG: u8 = 0x40;
    pub const PROTO_PIRATE: u8 = 0x60;
    pub const SETTINGS_UPDATE: u8 = 0xC1;
}

/// `Bruter` (opcode `0x04`) sub-opcodes.
pub mod bruter_sub {
    pub const CANCEL: u8 = 0x00;
    pub const SET_MODULE: u8 = 0xF8;
    pub const QUERY_STATE: u8 = 0xF9;
    pub const RESUME: u8 = 0xFA;
    pub const PAUSE: u8 = 0xFB;
    pub const SET_REPEATS: u8 = 0xFC;
    pub const START_CUSTOM_DEBRUIJN: u8 = 0xFD;
    pub const SET_INTER_FRAME_DELAY: u8 = 0xFE;
    /// Not in the documented sub-opcode list (spec §6 enumerates
    /// `0..40`, `0xF8..0xFE`, leaving the universal auto-attack with no
    /// assigned trigger). Claimed as the next free sub-opcode; see
    /// DESIGN.md.
    pub const START_UNIVERSAL: u8 = 0xFF;
}

/// External collaborator seam for the battery ADC monitor (spec §1: out
/// of scope as hardware, but `GetState`'s optional `BatteryStatus`
/// notification still needs a value to report when one is wired up).
pub trait PowerMonitor: Send + Sync {
    fn millivolts(&self) -> u16;
    fn percent(&self) -> u8;
    fn charging(&self) -> bool;
}

fn read_name<'a>(r: &mut ByteReader<'a>) -> Result<&'a str, CommandError> {
    let len = r.read_u8().map_err(|_| CommandError::BadLength)? as usize;
    let bytes = r.read_slice(len).map_err(|_| CommandError::BadLength)?;
    std::str::from_utf8(bytes).map_err(|_| CommandError::BadLength)
}

fn read_module(r: &mut ByteReader<'_>) -> Result<Module, CommandError> {
    let idx = r.read_u8().map_err(|_| CommandError::BadLength)?;
    Module::from_index(idx).ok_or(CommandError::InvalidChoice)
}

fn read_path_type(r: &mut ByteReader<'_>) -> Result<PathType, CommandError> {
    let b = r.read_u8().map_err(|_| CommandError::BadLength)?;
    PathType::from_wire(b).ok_or(CommandError::InvalidChoice)
}

/// Everything the dispatcher needs handed to it at construction (spec §9:
/// "settings -> storage -> notification queue -> worker task -> command
/// dispatcher -> transport"). The dispatcher is the last collaborator
/// built and holds no ownership the others don't already share.
pub struct Dispatcher {
    task_tx: mpsc::Sender<Task>,
    mode_mirror: Arc<ModeMirror>,
    file_io: Arc<FileIo>,
    storage: Arc<dyn StorageBackend>,
    settings_store: Arc<dyn SettingsStore>,
    settings: AsyncMutex<PersistentSettings>,
    bruteforce: Arc<BruteForceEngine>,
    bruter_module: AtomicU8,
    nrf_running: Arc<AtomicBool>,
    nrf_stop: Arc<AtomicBool>,
    radios: Arc<dyn RadioFactory>,
    bus: Arc<BusArbiter>,
    notify_tx: mpsc::UnboundedSender<Notification>,
    power: Option<Arc<dyn PowerMonitor>>,
    is_executing: Arc<AtomicBool>,
    reassembler: AsyncMutex<FrameReassembler>,
    start: Instant,
}

impl Dispatcher {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        task_tx: mpsc::Sender<Task>,
        mode_mirror: Arc<ModeMirror>,
        file_io: Arc<FileIo>,
        storage: Arc<dyn StorageBackend>,
        settings_store: Arc<dyn SettingsStore>,
        bruteforce: Arc<BruteForceEngine>,
        radios: Arc<dyn RadioFactory>,
        bus: Arc<BusArbiter>,
        notify_tx: mpsc::UnboundedSender<Notification>,
        is_executing: Arc<AtomicBool>,
        power: Option<Arc<dyn PowerMonitor>>,
    ) -> Self {
        let settings = settings::load(settings_store.as_ref());
        Dispatcher {
            task_tx,
            mode_mirror,
            file_io,
            storage,
            settings_store,
            settings: AsyncMutex::new(settings),
            bruteforce,
            bruter_module: AtomicU8::new(0),
            nrf_running: Arc::new(AtomicBool::new(false)),
            nrf_stop: Arc::new(AtomicBool::new(false)),
            radios,
            bus,
            notify_tx,
            power,
            is_executing,
            reassembler: AsyncMutex::new(FrameReassembler::new()),
            start: Instant::now(),
        }
    }

    fn notify(&self, n: Notification) {
        let _ = self.notify_tx.send(n);
    }

    fn ok(&self) {
        self.notify(Notification::CommandSuccess);
    }

    fn err(&self, e: CommandError) {
        self.notify(Notification::CommandError { code: e.code() });
    }

    async fn send_task(&self, task: Task) {
        let _ = self.task_tx.send(task).await;
    }

    /// Feeds one raw wire frame through reassembly and, if it completes a
    /// command or upload chunk, dispatches it. Malformed frames are
    /// logged and otherwise produce no state change (spec §4.3).
    pub async fn handle_frame(&self, bytes: &[u8]) {
        let inbound = {
            let mut r = self.reassembler.lock().await;
            r.feed(bytes)
        };
        match inbound {
            Ok(Inbound::Command { chunk_id, opcode, payload, total_chunks }) if opcode == UPLOAD_OPCODE => {
                self.begin_upload(chunk_id, payload, total_chunks <= 1).await;
            }
            Ok(Inbound::Command { opcode, payload, .. }) => {
                self.is_executing.store(true, Ordering::SeqCst);
                self.dispatch(opcode, payload).await;
                self.is_executing.store(false, Ordering::SeqCst);
            }
            Ok(Inbound::UploadChunk { chunk_id, payload, done, .. }) => {
                // Destination was already resolved when the upload slot
                // opened; path_type/rel_path here only label errors.
                self.file_io.handle_upload_chunk(chunk_id, PathType::Temp, "<continuation>", payload, false, done);
            }
            Ok(Inbound::Dropped) => {}
            Err(e) => crate::log::debug!("dispatcher: dropped malformed frame: {}", e),
        }
    }

    async fn begin_upload(&self, chunk_id: u8, payload: &[u8], done: bool) {
        let mut r = ByteReader::new(payload);
        let (path_type, rel) = match (|| -> Result<(PathType, &str), CommandError> {
            let path_type = read_path_type(&mut r)?;
            let rel = read_name(&mut r)?;
            Ok((path_type, rel))
        })() {
            Ok(v) => v,
            Err(e) => {
                self.err(e);
                return;
            }
        };
        // Any data bytes trailing the path in this first frame belong to
        // the file itself (a whole small file can arrive in one frame).
        let data = r.read_rest();
        self.file_io.handle_upload_chunk(chunk_id, path_type, rel, data, true, done);
    }

    async fn dispatch(&self, opcode: u8, payload: &[u8]) {
        let mut r = ByteReader::new(payload);
        match opcode {
            opcode::GET_STATE => self.get_state().await,
            opcode::REQUEST_SCAN => self.request_scan().await,
            opcode::REQUEST_IDLE => match read_module(&mut r) {
                Ok(module) => {
                    self.send_task(Task::GoIdle(module)).await;
                    self.ok();
                }
                Err(e) => self.err(e),
            },
            opcode::BRUTER => self.bruter(payload).await,
            opcode::GET_FILE_LIST => self.get_file_list(&mut r).await,
            opcode::START_RECORD => self.start_record(&mut r).await,
            opcode::STOP_RECORD => match read_module(&mut r) {
                Ok(module) => {
                    self.send_task(Task::StopRecord(module)).await;
                    self.ok();
                }
                Err(e) => self.err(e),
            },
            opcode::TRANSMIT => self.transmit(&mut r).await,
            opcode::LOAD_FILE => self.load_file(&mut r).await,
            opcode::MKDIR => match (read_path_type(&mut r), read_name(&mut r)) {
                (Ok(pt), Ok(rel)) => self.file_io.mkdir(pt, rel),
                _ => self.err(CommandError::BadLength),
            },
            opcode::RM => match (read_path_type(&mut r), read_name(&mut r)) {
                (Ok(pt), Ok(rel)) => self.file_io.remove(pt, rel).await,
                _ => self.err(CommandError::BadLength),
            },
            opcode::RENAME => self.two_names(&mut r, |ft, from, to| {
                self.file_io.rename(ft, from, to);
            }),
            opcode::COPY => self.two_names(&mut r, |ft, from, to| {
                self.file_io.copy(ft, from, to);
            }),
            opcode::MOVE => self.two_names(&mut r, |ft, from, to| {
                self.file_io.move_file(ft, from, to);
            }),
            opcode::SAVE_TO_SIGNALS => self.save_to_signals(&mut r),
            opcode::SET_TIME => self.ok(), // RTC is an external collaborator (spec §1).
            opcode::GET_DIRECTORY_TREE => match read_path_type(&mut r) {
                Ok(pt) => self.file_io.get_directory_tree(pt).await,
                Err(e) => self.err(e),
            },
            opcode::REBOOT => self.ok(), // no real reset vector in a hosted build.
            opcode::FACTORY_RESET => self.factory_reset(&mut r).await,
            opcode::SET_DEVICE_NAME => self.set_device_name(&mut r).await,
            opcode::FORMAT_SD => self.format_sd(&mut r).await,
            opcode::NRF_START_SCAN => self.nrf_start_scan().await,
            opcode::NRF_STOP_SCAN => self.nrf_stop_scan(),
            opcode::HW_BUTTON_CONFIG => self.hw_button_config(&mut r).await,
            opcode::PROTO_PIRATE => self.proto_pirate(payload).await,
            opcode::SETTINGS_UPDATE => self.settings_update(&mut r).await,
            0x41..=0x45 => self.ok(), // nRF jammer tuning: RF choreography is an external collaborator (spec §1).
            0xE0..=0xE2 => self.ok(), // OTA: the update writer is an external collaborator (spec §1).
            0x20..=0x2F => self.ok(), // remaining nRF group opcodes: acknowledged, no further state.
            _ => self.err(CommandError::InvalidChoice),
        }
    }

    // -----------------------------------------------------------------
    // Helpers shared by several file-action handlers
    // -----------------------------------------------------------------

    fn two_names(&self, r: &mut ByteReader<'_>, f: impl FnOnce(PathType, &str, &str)) {
        let parsed = (|| -> Result<(PathType, String, String), CommandError> {
            let pt = read_path_type(r)?;
            let from = read_name(r)?.to_string();
            let to = read_name(r)?.to_string();
            Ok((pt, from, to))
        })();
        match parsed {
            Ok((pt, from, to)) => f(pt, &from, &to),
            Err(e) => self.err(e),
        }
    }

    // -----------------------------------------------------------------
    // GetState (opcode 0x01, spec §8 scenario 1)
    // -----------------------------------------------------------------

    async fn get_state(&self) {
        let mode0 = self.mode_mirror.wire(Module::A);
        let mode1 = self.mode_mirror.wire(Module::B);
        self.notify(Notification::Status(crate::notify::StatusPayload {
            mode0,
            mode1,
            free_heap: 0,
            cpu_temp_deci: 0,
            core0_mhz: 240,
            core1_mhz: 240,
            mod0_regs: [0u8; 47],
            mod1_regs: [0u8; 47],
        }));

        let settings = self.settings.lock().await.clone();
        self.notify(Notification::SettingsSync((&settings).into()));
        self.notify(Notification::VersionInfo { major: 1, minor: 0, patch: 0 });
        self.notify(Notification::DeviceName { name: settings.device_name.clone() });
        if let Some(power) = &self.power {
            self.notify(Notification::BatteryStatus {
                millivolts: power.millivolts(),
                percent: power.percent(),
                charging: power.charging(),
            });
        }
        self.notify(Notification::HwButtonStatus {
            btn1_action: settings.button1.action,
            btn2_action: settings.button2.action,
            btn1_path_type: settings.button1.signal_path_type,
            btn2_path_type: settings.button2.signal_path_type,
        });
        self.notify(Notification::SdStatus { mounted: true, total_mb: 0, free_mb: (self.storage.free_bytes() / (1024 * 1024)) as u16 });
        self.notify(Notification::NrfStatus { present: true, initialized: true, active_state: self.nrf_running.load(Ordering::SeqCst) as u8 });
    }

    /// RequestScan (opcode 0x02): no module/parameters are documented on
    /// the wire for this opcode, so it is mapped to a background detect
    /// sweep on module A using the persisted scanner RSSI threshold; see
    /// DESIGN.md.
    async fn request_scan(&self) {
        let threshold = self.settings.lock().await.scanner_rssi;
        self.send_task(Task::StartDetect { module: Module::A, rssi_threshold: threshold, is_background: true }).await;
        self.ok();
    }

    // -----------------------------------------------------------------
    // Bruter (opcode 0x04)
    // -----------------------------------------------------------------

    async fn bruter(&self, payload: &[u8]) {
        let Some((&sub, rest)) = payload.split_first() else {
            self.err(CommandError::BadLength);
            return;
        };
        match sub {
            bruter_sub::CANCEL => {
                if !self.bruteforce.is_running() {
                    self.err(CommandError::NotRunning);
                    return;
                }
                self.bruteforce.request_cancel();
                self.ok();
            }
            bruter_sub::PAUSE => {
                if !self.bruteforce.is_running() {
                    self.err(CommandError::NotRunning);
                    return;
                }
                self.bruteforce.request_pause();
                self.ok();
            }
            bruter_sub::RESUME => {
                let module = self.current_module();
                let radio = self.radios.make_subghz(module);
                let bus = self.bus.clone();
                let engine = self.bruteforce.clone();
                match engine.saved_state() {
                    Some(_) => {
                        self.ok();
                        tokio::spawn(async move {
                            let _ = engine.resume(module, radio, bus).await;
                        });
                    }
                    None => self.err(CommandError::NoSavedState),
                }
            }
            bruter_sub::SET_MODULE => {
                let mut r = ByteReader::new(rest);
                match read_module(&mut r) {
                    Ok(module) => {
                        self.bruter_module.store(module.index(), Ordering::SeqCst);
                        self.ok();
                    }
                    Err(e) => self.err(e),
                }
            }
            bruter_sub::QUERY_STATE => {
                match self.bruteforce.saved_state() {
                    Some((menu_id, current, total)) => {
                        self.notify(Notification::BruteStateAvailable { menu_id, current, total });
                    }
                    None => self.ok(),
                }
            }
            bruter_sub::SET_REPEATS => {
                let mut r = ByteReader::new(rest);
                match r.read_u8() {
                    Ok(v) => {
                        self.bruteforce.set_global_repeats(v);
                        self.ok();
                    }
                    Err(_) => self.err(CommandError::BadLength),
                }
            }
            bruter_sub::SET_INTER_FRAME_DELAY => {
                let mut r = ByteReader::new(rest);
                match r.read_u16_le() {
                    Ok(v) => {
                        self.bruteforce.set_inter_frame_delay_ms(v);
                        self.ok();
                    }
                    Err(_) => self.err(CommandError::BadLength),
                }
            }
            bruter_sub::START_CUSTOM_DEBRUIJN => {
                let mut r = ByteReader::new(rest);
                let parsed = (|| -> Result<(u8, u32, u8, u32), CommandError> {
                    let bits = r.read_u8().map_err(|_| CommandError::BadLength)?;
                    let te_us = r.read_u32_le().map_err(|_| CommandError::BadLength)?;
                    let ratio = r.read_u8().map_err(|_| CommandError::BadLength)?;
                    let freq_hz = r.read_u32_le().map_err(|_| CommandError::BadLength)?;
                    Ok((bits, te_us, ratio, freq_hz))
                })();
                match parsed {
                    Ok((bits, te_us, ratio, freq_hz)) => {
                        if let Err(e) = bruteforce::validate_custom(bits, te_us, ratio) {
                            self.err(e);
                            return;
                        }
                        self.start_attack(AttackMode::CustomDeBruijn { bits, te_us, ratio, freq_hz }).await;
                    }
                    Err(e) => self.err(e),
                }
            }
            bruter_sub::START_UNIVERSAL => self.start_attack(AttackMode::Universal).await,
            1..=40 => match fixed::by_menu_id(sub) {
                Some(spec) => {
                    let mode = match spec.kind {
                        fixed::EncoderKind::Binary => AttackMode::Binary { menu_id: sub },
                        fixed::EncoderKind::Tristate => AttackMode::Tristate { menu_id: sub },
                    };
                    self.start_attack(mode).await;
                }
                None => self.err(CommandError::InvalidChoice),
            },
            _ => self.err(CommandError::InvalidChoice),
        }
    }

    fn current_module(&self) -> Module {
        Module::from_index(self.bruter_module.load(Ordering::SeqCst)).unwrap_or(Module::A)
    }

    async fn start_attack(&self, mode: AttackMode) {
        if self.bruteforce.is_running() {
            self.err(CommandError::AlreadyRunning);
            return;
        }
        if bruteforce::total_codes(mode).is_none() {
            self.err(CommandError::InvalidChoice);
            return;
        }
        let module = self.current_module();
        let radio = self.radios.make_subghz(module);
        let bus = self.bus.clone();
        let engine = self.bruteforce.clone();
        self.ok();
        tokio::spawn(async move {
            let _ = engine.start(radio, bus, mode, module).await;
        });
    }

    // -----------------------------------------------------------------
    // File & stream pipeline (spec §4.5)
    // -----------------------------------------------------------------

    async fn get_file_list(&self, r: &mut ByteReader<'_>) {
        match (read_path_type(r), read_name(r)) {
            (Ok(pt), Ok(rel)) => self.file_io.list_files(pt, rel).await,
            _ => self.err(CommandError::BadLength),
        }
    }

    async fn load_file(&self, r: &mut ByteReader<'_>) {
        match (read_path_type(r), read_name(r)) {
            (Ok(pt), Ok(rel)) => self.file_io.download(pt, rel).await,
            _ => self.err(CommandError::BadLength),
        }
    }

    fn save_to_signals(&self, r: &mut ByteReader<'_>) {
        // Not itemized beyond its opcode byte in spec §6; treated as
        // "promote a Temp capture into Signals", matching the button
        // replay flow's own source area (spec §3 `signalPathType`). See
        // DESIGN.md.
        let Ok(rel) = read_name(r) else {
            self.err(CommandError::BadLength);
            return;
        };
        let from = crate::storage::join(PathType::Temp.base_dir(), rel);
        let to = crate::storage::join(PathType::Signals.base_dir(), rel);
        match self.storage.rename(&from, &to) {
            Ok(()) => self.notify(Notification::FileActionResult {
                action: opcode::SAVE_TO_SIGNALS,
                status: 0,
                error_code: 0,
                path: to,
            }),
            Err(_) => self.notify(Notification::FileActionResult {
                action: opcode::SAVE_TO_SIGNALS,
                status: 1,
                error_code: FsError::NotFound.code(),
                path: from,
            }),
        }
    }

    async fn format_sd(&self, r: &mut ByteReader<'_>) {
        match read_name(r) {
            Ok(guard) => {
                if let Err(e) = self.file_io.format(guard).await {
                    self.err(e);
                }
            }
            Err(e) => self.err(e),
        }
    }

    async fn factory_reset(&self, r: &mut ByteReader<'_>) {
        let guard = read_name(r);
        if guard != Ok("FR") {
            self.err(CommandError::InvalidChoice);
            return;
        }
        let defaults = PersistentSettings::default();
        if settings::save(self.settings_store.as_ref(), &defaults).is_err() {
            self.err(CommandError::OutOfRange);
            return;
        }
        *self.settings.lock().await = defaults;
        self.ok();
    }

    async fn set_device_name(&self, r: &mut ByteReader<'_>) {
        match read_name(r) {
            Ok(name) => {
                let mut settings = self.settings.lock().await;
                settings.device_name = name.chars().take(crate::settings::ranges::DEVICE_NAME_MAX_LEN).collect();
                let _ = settings::save(self.settings_store.as_ref(), &settings);
                self.notify(Notification::DeviceName { name: settings.device_name.clone() });
            }
            Err(e) => self.err(e),
        }
    }

    // -----------------------------------------------------------------
    // Worker tasks: record / transmit (spec §8 scenario 2)
    // -----------------------------------------------------------------

    async fn start_record(&self, r: &mut ByteReader<'_>) {
        let parsed = (|| -> Result<(Module, u32, crate::pulsefile::Preset), CommandError> {
            let module = read_module(r)?;
            let freq_hz = r.read_u32_le().map_err(|_| CommandError::BadLength)?;
            let preset_id = r.read_u8().map_err(|_| CommandError::BadLength)?;
            let preset = preset_from_wire(preset_id).ok_or(CommandError::InvalidChoice)?;
            Ok((module, freq_hz, preset))
        })();
        match parsed {
            Ok((module, freq_hz, preset)) => {
                self.send_task(Task::StartRecord { module, freq_hz, preset }).await;
                self.ok();
            }
            Err(e) => self.err(e),
        }
    }

    async fn transmit(&self, r: &mut ByteReader<'_>) {
        let parsed = (|| -> Result<(Module, u32, PathType, String), CommandError> {
            let module = read_module(r)?;
            let repeat = r.read_u32_le().map_err(|_| CommandError::BadLength)?;
            let path_type = read_path_type(r)?;
            let filename = read_name(r)?.to_string();
            Ok((module, repeat, path_type, filename))
        })();
        match parsed {
            Ok((module, repeat, path_type, filename)) => {
                self.send_task(Task::Transmit { module, filename, repeat: repeat.max(1), path_type }).await;
                self.ok();
            }
            Err(e) => self.err(e),
        }
    }

    // -----------------------------------------------------------------
    // nRF scan (spec §4.9, opcode group 0x20..0x2F)
    // -----------------------------------------------------------------

    async fn nrf_start_scan(&self) {
        if self.nrf_running.swap(true, Ordering::SeqCst) {
            self.err(CommandError::AlreadyRunning);
            return;
        }
        self.nrf_stop.store(false, Ordering::SeqCst);
        let radio = self.radios.make_nrf();
        let bus = self.bus.clone();
        let notify_tx = self.notify_tx.clone();
        let stop = self.nrf_stop.clone();
        let running = self.nrf_running.clone();
        self.ok();
        tokio::spawn(async move {
            let mut scanner = NrfScanner::new(notify_tx, stop);
            scanner.run(radio, bus).await;
            running.store(false, Ordering::SeqCst);
        });
    }

    fn nrf_stop_scan(&self) {
        self.nrf_stop.store(true, Ordering::SeqCst);
        self.ok();
    }

    // -----------------------------------------------------------------
    // HW button config (opcode 0x40)
    // -----------------------------------------------------------------

    async fn hw_button_config(&self, r: &mut ByteReader<'_>) {
        let parsed = (|| -> Result<(u8, u8, u8, String), CommandError> {
            let btn = r.read_u8().map_err(|_| CommandError::BadLength)?;
            let action = r.read_u8().map_err(|_| CommandError::BadLength)?;
            let path_type = r.read_u8().map_err(|_| CommandError::BadLength)?;
            let path = read_name(r)?.to_string();
            Ok((btn, action, path_type, path))
        })();
        let (btn, action, path_type, path) = match parsed {
            Ok(v) => v,
            Err(e) => {
                self.err(e);
                return;
            }
        };
        if action > settings::ranges::BUTTON_ACTION.1 || path_type > settings::ranges::BUTTON_PATH_TYPE.1 {
            self.err(CommandError::OutOfRange);
            return;
        }
        let mut settings = self.settings.lock().await;
        let binding = match btn {
            0 => &mut settings.button1,
            1 => &mut settings.button2,
            _ => {
                drop(settings);
                self.err(CommandError::InvalidChoice);
                return;
            }
        };
        binding.action = action;
        binding.signal_path_type = path_type;
        binding.signal_path = path;
        let _ = settings::save(self.settings_store.as_ref(), &settings);
        self.notify(Notification::HwButtonStatus {
            btn1_action: settings.button1.action,
            btn2_action: settings.button2.action,
            btn1_path_type: settings.button1.signal_path_type,
            btn2_path_type: settings.button2.signal_path_type,
        });
    }

    // -----------------------------------------------------------------
    // ProtoPirate group (opcode 0x60, sub-opcodes 0x01..0x0B)
    // -----------------------------------------------------------------

    async fn proto_pirate(&self, payload: &[u8]) {
        let Some((&sub, rest)) = payload.split_first() else {
            self.err(CommandError::BadLength);
            return;
        };
        let mut r = ByteReader::new(rest);
        match sub {
            0x01 => {
                let parsed = (|| -> Result<(Module, u32), CommandError> {
                    let module = read_module(&mut r)?;
                    let freq_hz = r.read_u32_le().map_err(|_| CommandError::BadLength)?;
                    Ok((module, freq_hz))
                })();
                match parsed {
                    Ok((module, freq_hz)) => {
                        self.send_task(Task::StartLiveDecode { module, freq_hz }).await;
                        self.ok();
                    }
                    Err(e) => self.err(e),
                }
            }
            0x02 => match read_module(&mut r) {
                Ok(module) => {
                    self.send_task(Task::StopLiveDecode(module)).await;
                    self.ok();
                }
                Err(e) => self.err(e),
            },
            // The remaining sub-opcodes (0x03..0x0B) are not further
            // itemized in spec §6; acknowledged with no additional state
            // change. See DESIGN.md.
            0x03..=0x0B => self.ok(),
            _ => self.err(CommandError::InvalidChoice),
        }
    }

    // -----------------------------------------------------------------
    // SettingsUpdate (opcode 0xC1)
    // -----------------------------------------------------------------

    async fn settings_update(&self, r: &mut ByteReader<'_>) {
        let mut settings = self.settings.lock().await;
        let parsed = (|| -> Result<(), CommandError> {
            settings.scanner_rssi = r.read_i16_le().map_err(|_| CommandError::BadLength)?;
            settings.bruter_power = r.read_u8().map_err(|_| CommandError::BadLength)?;
            settings.bruter_delay = r.read_u16_le().map_err(|_| CommandError::BadLength)?;
            settings.bruter_repeats = r.read_u8().map_err(|_| CommandError::BadLength)?;
            settings.radio_power_mod1 = r.read_i8().map_err(|_| CommandError::BadLength)?;
            settings.radio_power_mod2 = r.read_i8().map_err(|_| CommandError::BadLength)?;
            settings.cpu_temp_offset_decic = r.read_i16_le().map_err(|_| CommandError::BadLength)?;
            Ok(())
        })();
        if let Err(e) = parsed {
            self.err(e);
            return;
        }
        *settings = PersistentSettings::parse(&settings.serialize());
        self.bruteforce.set_global_repeats(settings.bruter_repeats);
        self.bruteforce.set_inter_frame_delay_ms(settings.bruter_delay);
        let _ = settings::save(self.settings_store.as_ref(), &settings);
        self.notify(Notification::SettingsSync((&*settings).into()));
    }
}

fn preset_from_wire(id: u8) -> Option<crate::pulsefile::Preset> {
    use crate::pulsefile::Preset;
    Some(match id {
        0 => Preset::Ook270,
        1 => Preset::Ook650,
        2 => Preset::TwoFskDev238,
        3 => Preset::TwoFskDev476,
        4 => Preset::Msk99_97Kb,
        5 => Preset::Gfsk9_99Kb,
        _ => return None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chunker::ChunkEmitter;
    use crate::radio::MockRadioFactory;
    use crate::storage::MemBackend;
    use crate::transport::ChannelTransport;
    use std::sync::Mutex as StdMutex;

    struct MemSettingsStore(StdMutex<Option<String>>);
    impl SettingsStore for MemSettingsStore {
        fn read(&self) -> Result<Option<String>, crate::error::SettingsError> {
            Ok(self.0.lock().unwrap().clone())
        }
        fn write(&self, contents: &str) -> Result<(), crate::error::SettingsError> {
            *self.0.lock().unwrap() = Some(contents.to_string());
            Ok(())
        }
    }

    fn make_dispatcher() -> (Dispatcher, mpsc::UnboundedReceiver<Notification>, mpsc::Receiver<Task>) {
        let storage: Arc<dyn StorageBackend> = Arc::new(MemBackend::new());
        let (notify_tx, notify_rx) = mpsc::unbounded_channel();
        let (task_tx, task_rx) = mpsc::channel(32);
        let (transport, _trx) = ChannelTransport::new();
        let file_io = Arc::new(FileIo::new(storage.clone(), notify_tx.clone(), Arc::new(ChunkEmitter::new()), Arc::new(transport)));
        let settings_store: Arc<dyn SettingsStore> = Arc::new(MemSettingsStore(StdMutex::new(None)));
        let cancel = Arc::new(AtomicBool::new(false));
        let running = Arc::new(AtomicBool::new(false));
        let bruteforce = Arc::new(BruteForceEngine::new(notify_tx.clone(), storage.clone(), cancel, running));
        let bus = Arc::new(BusArbiter::new());
        let is_executing = Arc::new(AtomicBool::new(false));
        let mode_mirror = Arc::new(ModeMirror::new());
        let dispatcher = Dispatcher::new(
            task_tx,
            mode_mirror,
            file_io,
            storage,
            settings_store,
            bruteforce,
            Arc::new(MockRadioFactory),
            bus,
            notify_tx,
            is_executing,
            None,
        );
        (dispatcher, notify_rx, task_rx)
    }

    #[tokio::test]
    async fn unknown_opcode_yields_command_error() {
        let (d, mut nrx, _trx) = make_dispatcher();
        d.dispatch(0xAB, &[]).await;
        match nrx.try_recv().unwrap() {
            Notification::CommandError { code } => assert_eq!(code, CommandError::InvalidChoice.code()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn request_idle_forwards_go_idle_task() {
        let (d, mut nrx, mut trx) = make_dispatcher();
        d.dispatch(opcode::REQUEST_IDLE, &[0]).await;
        assert!(matches!(trx.try_recv().unwrap(), Task::GoIdle(Module::A)));
        assert!(matches!(nrx.try_recv().unwrap(), Notification::CommandSuccess));
    }

    #[tokio::test]
    async fn bruter_pause_without_running_attack_errors() {
        let (d, mut nrx, _trx) = make_dispatcher();
        d.dispatch(opcode::BRUTER, &[bruter_sub::PAUSE]).await;
        match nrx.try_recv().unwrap() {
            Notification::CommandError { code } => assert_eq!(code, CommandError::NotRunning.code()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn bruter_start_unknown_menu_errors() {
        let (d, mut nrx, _trx) = make_dispatcher();
        d.dispatch(opcode::BRUTER, &[99]).await;
        match nrx.try_recv().unwrap() {
            Notification::CommandError { code } => assert_eq!(code, CommandError::InvalidChoice.code()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn settings_update_round_trips_into_sync_notification() {
        let (d, mut nrx, _trx) = make_dispatcher();
        let mut payload = Vec::new();
        payload.extend_from_slice(&(-70i16).to_le_bytes());
        payload.push(5);
        payload.extend_from_slice(&200u16.to_le_bytes());
        payload.push(3);
        payload.extend_from_slice(&(7i8).to_le_bytes());
        payload.extend_from_slice(&(7i8).to_le_bytes());
        payload.extend_from_slice(&(10i16).to_le_bytes());
        d.dispatch(opcode::SETTINGS_UPDATE, &payload).await;
        match nrx.try_recv().unwrap() {
            Notification::SettingsSync(s) => {
                assert_eq!(s.scanner_rssi, -70);
                assert_eq!(s.bruter_repeats, 3);
            }
            other => panic!("unexpected {other:?}"),
        }
    }
}
