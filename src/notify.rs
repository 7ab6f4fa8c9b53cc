//! Outbound notifications (spec §5, §6).
//!
//! Every component that wants to talk to the client builds a
//! [`Notification`], sends it down an `mpsc` channel to the notification
//! sender task, which serializes it to wire bytes and hands it to the
//! [`crate::chunker::ChunkEmitter`]. `mpsc::UnboundedSender` already gives
//! the per-channel FIFO ordering spec §5 requires within one
//! `NotificationType`; ordering *between* types is explicitly unspecified,
//! so a single shared queue (rather than one queue per type) is sufficient
//! and is what this implements.

use crate::chunker::ChunkEmitter;
use crate::transport::Transport;
use crate::types::{Module, NotificationType};

bitflags::bitflags! {
    /// Per-message flags byte shared by every paginated listing
    /// notification (`FileList`, `DirectoryTree`; spec §6, §4.5).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct ListFlags: u8 {
        const MORE_FOLLOWS = 0x01;
    }
}

bitflags::bitflags! {
    /// Per-entry flags byte within a `FileList` chunk (spec §6).
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    struct EntryFlags: u8 {
        const IS_DIR = 0x02;
    }
}

/// One outbound message, pre-framing. The wire `type` byte used per spec
/// §6's table is returned by [`Notification::type_byte`]; the payload
/// layout is produced by [`Notification::encode`].
#[derive(Debug, Clone)]
pub enum Notification {
    ModeSwitch { module: Module, new_mode: u8, prev_mode: u8 },
    Status(StatusPayload),
    Heartbeat { uptime_ms: u32 },
    SignalDetected { module: Module, samples: u16, freq_hz: u32, rssi_dbm: i16 },
    SignalRecorded { module: Module, name: String },
    SignalSent { module: Module, name: String },
    SignalSendError { module: Module, error_code: u8, name: String },
    /// Not itemized in spec §6's outbound table (which only documents
    /// `0x90..0x93` for the `Signal` group plus the reserved `0x94`
    /// slot spec §9 explicitly says must stay reserved); §4.7 requires a
    /// DecodeResult notification on every fresh router hit, so this
    /// claims the next free byte in that group (`0x95`) rather than the
    /// reserved one. See DESIGN.md.
    DecodeResult(crate::protocol::DecodedResult),
    /// Same gap as `DecodeResult`: §4.2's Analyzing mode must "emit
    /// per-point RSSI chunks" but no wire type is enumerated. Claims
    /// `0x96`, the next free Signal-group byte.
    AnalyzerPoint { module: Module, freq_hz: u32, rssi_dbm: i16 },
    FileContentHeader { path: String, size: u32 },
    FileList(FileListPayload),
    DirectoryTree(DirTreePayload),
    FileActionResult { action: u8, status: u8, error_code: u8, path: String },
    BruteProgress { menu_id: u8, current: u32, total: u32, percentage: u8, codes_per_sec: u32 },
    BruteComplete { menu_id: u8, total: u32 },
    BrutePaused { menu_id: u8, current: u32, total: u32 },
    BruteResumed { menu_id: u8, resume_code: u32, total: u32 },
    BruteStateAvailable { menu_id: u8, current: u32, total: u32 },
    SettingsSync(SettingsSyncPayload),
    VersionInfo { major: u8, minor: u8, patch: u8 },
    BatteryStatus { millivolts: u16, percent: u8, charging: bool },
    DeviceName { name: String },
    HwButtonStatus { btn1_action: u8, btn2_action: u8, btn1_path_type: u8, btn2_path_type: u8 },
    SdStatus { mounted: bool, total_mb: u16, free_mb: u16 },
    NrfStatus { present: bool, initialized: bool, active_state: u8 },
    /// First two of the documented `0xD0..0xD7` nRF event range (spec
    /// §6); scan/fingerprint is the only nRF subsystem this crate drives
    /// (spec §4.9), so jammer/spectrum/mode-config events are not
    /// modeled here.
    NrfTargetFound { address: [u8; 5], classification: u8, channel: u8 },
    NrfScanComplete { targets_found: u8 },
    Error { code: u8, message: String },
    CommandSuccess,
    CommandError { code: u8 },
}

#[derive(Debug, Clone)]
pub struct StatusPayload {
    pub mode0: u8,
    pub mode1: u8,
    pub free_heap: u32,
    pub cpu_temp_deci: i16,
    pub core0_mhz: u16,
    pub core1_mhz: u16,
    pub mod0_regs: [u8; 47],
    pub mod1_regs: [u8; 47],
}

#[derive(Debug, Clone)]
pub struct FileListEntry {
    pub name: String,
    pub is_dir: bool,
    pub size: u32,
    pub mtime: u32,
}

#[derive(Debug, Clone)]
pub struct FileListPayload {
    pub path: String,
    pub more_follows: bool,
    /// `0xFFFF` while more chunks remain; the true count only on the
    /// terminal chunk (spec §4.5).
    pub total_files: u16,
    pub entries: Vec<FileListEntry>,
}

#[derive(Debug, Clone)]
pub struct DirTreePayload {
    pub path_type: u8,
    pub more_follows: bool,
    pub total_dirs: u16,
    pub paths: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SettingsSyncPayload {
    pub scanner_rssi: i16,
    pub bruter_power: u8,
    pub bruter_delay: u16,
    pub bruter_repeats: u8,
    pub radio_power_mod1: i8,
    pub radio_power_mod2: i8,
    pub cpu_temp_offset_decic: i16,
}

impl From<&crate::settings::PersistentSettings> for SettingsSyncPayload {
    fn from(s: &crate::settings::PersistentSettings) -> Self {
        SettingsSyncPayload {
            scanner_rssi: s.scanner_rssi,
            bruter_power: s.bruter_power,
            bruter_delay: s.bruter_delay,
            bruter_repeats: s.bruter_repeats,
            radio_power_mod1: s.radio_power_mod1,
            radio_power_mod2: s.radio_power_mod2,
            cpu_temp_offset_decic: s.cpu_temp_offset_decic,
        }
    }
}

impl Notification {
    pub fn notification_type(&self) -> NotificationType {
        match self {
            Notification::ModeSwitch { .. } => NotificationType::ModeSwitch,
            Notification::Status(_) => NotificationType::Status,
            Notification::Heartbeat { .. } => NotificationType::Heartbeat,
            Notification::SignalDetected { .. }
            | Notification::SignalRecorded { .. }
            | Notification::SignalSent { .. }
            | Notification::SignalSendError { .. }
            | Notification::DecodeResult(_)
            | Notification::AnalyzerPoint { .. } => NotificationType::Signal,
            Notification::FileContentHeader { .. }
            | Notification::FileList(_)
            | Notification::DirectoryTree(_)
            | Notification::FileActionResult { .. } => NotificationType::File,
            Notification::BruteProgress { .. }
            | Notification::BruteComplete { .. }
            | Notification::BrutePaused { .. }
            | Notification::BruteResumed { .. }
            | Notification::BruteStateAvailable { .. } => NotificationType::BruteForce,
            Notification::SettingsSync(_) => NotificationType::Settings,
            Notification::VersionInfo { .. } => NotificationType::Version,
            Notification::BatteryStatus { .. } => NotificationType::Battery,
            Notification::DeviceName { .. } => NotificationType::DeviceName,
            Notification::HwButtonStatus { .. } => NotificationType::HwButton,
            Notification::SdStatus { .. } => NotificationType::Sd,
            Notification::NrfStatus { .. } | Notification::NrfTargetFound { .. } | Notification::NrfScanComplete { .. } => {
                NotificationType::Nrf
            }
            Notification::Error { .. } => NotificationType::Error,
            Notification::CommandSuccess | Notification::CommandError { .. } => {
                NotificationType::Command
            }
        }
    }

    fn write_name(w: &mut Vec<u8>, name: &str) {
        w.push(name.len() as u8);
        w.extend_from_slice(name.as_bytes());
    }

    /// Encodes this notification's full wire payload, type byte first.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        match self {
            Notification::ModeSwitch { module, new_mode, prev_mode } => {
                out.push(0x80);
                out.push(module.index());
                out.push(*new_mode);
                out.push(*prev_mode);
            }
            Notification::Status(s) => {
                out.push(0x81);
                out.push(s.mode0);
                out.push(s.mode1);
                out.push(0x2E); // numRegs
                out.extend_from_slice(&s.free_heap.to_le_bytes());
                out.extend_from_slice(&s.cpu_temp_deci.to_le_bytes());
                out.extend_from_slice(&s.core0_mhz.to_le_bytes());
                out.extend_from_slice(&s.core1_mhz.to_le_bytes());
                out.extend_from_slice(&s.mod0_regs);
                out.extend_from_slice(&s.mod1_regs);
            }
            Notification::Heartbeat { uptime_ms } => {
                out.push(0x82);
                out.extend_from_slice(&uptime_ms.to_le_bytes());
            }
            Notification::SignalDetected { module, samples, freq_hz, rssi_dbm } => {
                out.push(0x90);
                out.push(module.index());
                out.extend_from_slice(&samples.to_le_bytes());
                out.extend_from_slice(&freq_hz.to_le_bytes());
                out.extend_from_slice(&rssi_dbm.to_le_bytes());
                out.extend_from_slice(&0u16.to_le_bytes()); // reserved
            }
            Notification::SignalRecorded { module, name } => {
                out.push(0x91);
                out.push(module.index());
                Self::write_name(&mut out, name);
            }
            Notification::SignalSent { module, name } => {
                out.push(0x92);
                out.push(module.index());
                Self::write_name(&mut out, name);
            }
            Notification::SignalSendError { module, error_code, name } => {
                out.push(0x93);
                out.push(module.index());
                out.push(*error_code);
                Self::write_name(&mut out, name);
            }
            Notification::DecodeResult(r) => {
                out.push(0x95);
                Self::write_name(&mut out, r.protocol_name);
                out.extend_from_slice(&r.data.to_le_bytes());
                out.extend_from_slice(&r.data2.to_le_bytes());
                out.extend_from_slice(&r.serial.to_le_bytes());
                out.push(r.button);
                out.extend_from_slice(&r.counter.to_le_bytes());
                out.extend_from_slice(&r.bit_length.to_le_bytes());
                out.push(r.crc_valid as u8);
                out.push(r.encrypted as u8);
                out.extend_from_slice(&r.frequency_hz.to_le_bytes());
            }
            Notification::AnalyzerPoint { module, freq_hz, rssi_dbm } => {
                out.push(0x96);
                out.push(module.index());
                out.extend_from_slice(&freq_hz.to_le_bytes());
                out.extend_from_slice(&rssi_dbm.to_le_bytes());
            }
            Notification::FileContentHeader { path, size } => {
                out.push(0xA0);
                Self::write_name(&mut out, path);
                out.extend_from_slice(&size.to_le_bytes());
            }
            Notification::FileList(p) => {
                out.push(0xA1);
                Self::write_name(&mut out, &p.path);
                let flags = if p.more_follows { ListFlags::MORE_FOLLOWS } else { ListFlags::empty() };
                out.push(flags.bits());
                out.extend_from_slice(&p.total_files.to_le_bytes());
                out.push(p.entries.len() as u8);
                for e in &p.entries {
                    Self::write_name(&mut out, &e.name);
                    let entry_flags = if e.is_dir { EntryFlags::IS_DIR } else { EntryFlags::empty() };
                    out.push(entry_flags.bits());
                    if !e.is_dir {
                        out.extend_from_slice(&e.size.to_le_bytes());
                        out.extend_from_slice(&e.mtime.to_le_bytes());
                    }
                }
            }
            Notification::DirectoryTree(p) => {
                out.push(0xA2);
                out.push(p.path_type);
                let flags = if p.more_follows { ListFlags::MORE_FOLLOWS } else { ListFlags::empty() };
                out.push(flags.bits());
                out.extend_from_slice(&p.total_dirs.to_le_bytes());
                out.extend_from_slice(&(p.paths.len() as u16).to_le_bytes());
                for path in &p.paths {
                    Self::write_name(&mut out, path);
                }
            }
            Notification::FileActionResult { action, status, error_code, path } => {
                out.push(0xA3);
                out.push(*action);
                out.push(*status);
                out.push(*error_code);
                Self::write_name(&mut out, path);
            }
            Notification::BruteProgress { menu_id, current, total, percentage, codes_per_sec } => {
                out.push(0xB0);
                out.push(*menu_id);
                out.extend_from_slice(&current.to_le_bytes());
                out.extend_from_slice(&total.to_le_bytes());
                out.push(*percentage);
                out.extend_from_slice(&codes_per_sec.to_le_bytes());
            }
            Notification::BruteComplete { menu_id, total } => {
                out.push(0xB1);
                out.push(*menu_id);
                out.extend_from_slice(&total.to_le_bytes());
            }
            Notification::BrutePaused { menu_id, current, total } => {
                out.push(0xB2);
                out.push(*menu_id);
                out.extend_from_slice(&current.to_le_bytes());
                out.extend_from_slice(&total.to_le_bytes());
            }
            Notification::BruteResumed { menu_id, resume_code, total } => {
                out.push(0xB3);
                out.push(*menu_id);
                out.extend_from_slice(&resume_code.to_le_bytes());
                out.extend_from_slice(&total.to_le_bytes());
            }
            Notification::BruteStateAvailable { menu_id, current, total } => {
                out.push(0xB4);
                out.push(*menu_id);
                out.extend_from_slice(&current.to_le_bytes());
                out.extend_from_slice(&total.to_le_bytes());
            }
            Notification::SettingsSync(s) => {
                out.push(0xC0);
                out.extend_from_slice(&s.scanner_rssi.to_le_bytes());
                out.push(s.bruter_power);
                out.extend_from_slice(&s.bruter_delay.to_le_bytes());
                out.push(s.bruter_repeats);
                out.push(s.radio_power_mod1 as u8);
                out.push(s.radio_power_mod2 as u8);
                out.extend_from_slice(&s.cpu_temp_offset_decic.to_le_bytes());
            }
            Notification::VersionInfo { major, minor, patch } => {
                out.push(0xC2);
                out.push(*major);
                out.push(*minor);
                out.push(*patch);
            }
            Notification::BatteryStatus { millivolts, percent, charging } => {
                out.push(0xC3);
                out.extend_from_slice(&millivolts.to_le_bytes());
                out.push(*percent);
                out.push(*charging as u8);
            }
            Notification::DeviceName { name } => {
                out.push(0xC7);
                Self::write_name(&mut out, name);
            }
            Notification::HwButtonStatus { btn1_action, btn2_action, btn1_path_type, btn2_path_type } => {
                out.push(0xC8);
                out.push(*btn1_action);
                out.push(*btn2_action);
                out.push(*btn1_path_type);
                out.push(*btn2_path_type);
            }
            Notification::SdStatus { mounted, total_mb, free_mb } => {
                out.push(0xC9);
                out.push(*mounted as u8);
                out.extend_from_slice(&total_mb.to_le_bytes());
                out.extend_from_slice(&free_mb.to_le_bytes());
            }
            Notification::NrfStatus { present, initialized, active_state } => {
                out.push(0xCA);
                out.push(*present as u8);
                out.push(*initialized as u8);
                out.push(*active_state);
            }
            Notification::NrfTargetFound { address, classification, channel } => {
                out.push(0xD0);
                out.extend_from_slice(address);
                out.push(*classification);
                out.push(*channel);
            }
            Notification::NrfScanComplete { targets_found } => {
                out.push(0xD1);
                out.push(*targets_found);
            }
            Notification::Error { code, message } => {
                out.push(0xF0);
                out.push(*code);
                out.extend_from_slice(message.as_bytes());
            }
            Notification::CommandSuccess => {
                out.push(0xF2);
            }
            Notification::CommandError { code } => {
                out.push(0xF3);
                out.push(*code);
            }
        }
        out
    }
}

/// Drains a channel of `Notification`s, framing and pacing each one
/// through the shared [`ChunkEmitter`]. Runs as its own task (spec §5's
/// "Notification sender", priority 1).
pub struct NotificationSender {
    rx: tokio::sync::mpsc::UnboundedReceiver<Notification>,
    emitter: std::sync::Arc<ChunkEmitter>,
    transport: std::sync::Arc<dyn Transport>,
}

impl NotificationSender {
    pub fn new(
        rx: tokio::sync::mpsc::UnboundedReceiver<Notification>,
        emitter: std::sync::Arc<ChunkEmitter>,
        transport: std::sync::Arc<dyn Transport>,
    ) -> Self {
        NotificationSender { rx, emitter, transport }
    }

    /// Runs until the channel closes (all senders dropped).
    pub async fn run(mut self) {
        while let Some(notification) = self.rx.recv().await {
            let bytes = notification.encode();
            self.emitter.emit(self.transport.as_ref(), &bytes).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mode_switch_encodes_module_and_both_states() {
        let n = Notification::ModeSwitch { module: Module::A, new_mode: 2, prev_mode: 0 };
        let bytes = n.encode();
        assert_eq!(bytes, vec![0x80, 0, 2, 0]);
    }

    #[test]
    fn command_error_carries_code() {
        let n = Notification::CommandError { code: 4 };
        assert_eq!(n.encode(), vec![0xF3, 4]);
    }

    #[test]
    fn file_list_sentinel_total_while_more_chunks_remain() {
        let n = Notification::FileList(FileListPayload {
            path: "/".into(),
            more_follows: true,
            total_files: 0xFFFF,
            entries: vec![],
        });
        let bytes = n.encode();
        // opcode, pathLen, '/', flags, totalFiles(2), fileCount
        assert_eq!(bytes[0], 0xA1);
        let total_files_offset = 1 + 1 + 1 + 1;
        assert_eq!(
            u16::from_le_bytes([bytes[total_files_offset], bytes[total_files_offset + 1]]),
            0xFFFF
        );
    }
}
