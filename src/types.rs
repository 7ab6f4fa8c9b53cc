//! Core data model shared across subsystems (spec §3).

use std::time::Instant;

/// One of the two physically distinct CC1101 transceivers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Module {
    A,
    B,
}

impl Module {
    pub fn index(self) -> u8 {
        match self {
            Module::A => 0,
            Module::B => 1,
        }
    }

    pub fn from_index(i: u8) -> Option<Self> {
        match i {
            0 => Some(Module::A),
            1 => Some(Module::B),
            _ => None,
        }
    }
}

/// The client's enumerated storage area selector (Glossary).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PathType {
    Records,
    Signals,
    Presets,
    Temp,
    InternalFlash,
    RootSD,
}

impl PathType {
    pub fn from_wire(b: u8) -> Option<Self> {
        match b {
            0 => Some(PathType::Records),
            1 => Some(PathType::Signals),
            2 => Some(PathType::Presets),
            3 => Some(PathType::Temp),
            4 => Some(PathType::InternalFlash),
            5 => Some(PathType::RootSD),
            _ => None,
        }
    }

    pub fn to_wire(self) -> u8 {
        match self {
            PathType::Records => 0,
            PathType::Signals => 1,
            PathType::Presets => 2,
            PathType::Temp => 3,
            PathType::InternalFlash => 4,
            PathType::RootSD => 5,
        }
    }

    /// The base directory this area maps to on storage.
    ///
    /// `InternalFlash` and `RootSD` have no base prefix: they address the
    /// filesystem root directly and are never auto-created (spec §4.5).
    pub fn base_dir(self) -> &'static str {
        match self {
            PathType::Records => "/DATA/RECORDS",
            PathType::Signals => "/DATA/SIGNALS",
            PathType::Presets => "/DATA/PRESETS",
            PathType::Temp => "/DATA/TEMP",
            PathType::InternalFlash => "",
            PathType::RootSD => "",
        }
    }

    /// Whether this area is auto-created if missing (spec §4.5).
    pub fn auto_create(self) -> bool {
        matches!(
            self,
            PathType::Records | PathType::Signals | PathType::Presets | PathType::Temp
        )
    }
}

/// RSSI reading in dBm.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct RssiDbm(pub i16);

/// A frequency in Hz.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct FreqHz(pub u32);

/// One signed microsecond duration; sign encodes transmitter line state
/// (positive = high, negative = low). Spec §3, Glossary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pulse(pub i32);

impl Pulse {
    pub fn high(duration_us: u32) -> Self {
        Pulse(duration_us as i32)
    }

    pub fn low(duration_us: u32) -> Self {
        Pulse(-(duration_us as i32))
    }

    pub fn is_high(self) -> bool {
        self.0 > 0
    }

    pub fn duration_us(self) -> u32 {
        self.0.unsigned_abs()
    }
}

/// Monotonic timestamp used throughout the ISR/worker/decoder path. A thin
/// wrapper over `std::time::Instant` so call sites read like the
/// microsecond-timestamp arithmetic in spec §4.1 rather than bare
/// `Instant` math.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimestampUs(pub u64);

impl TimestampUs {
    pub fn since(self, epoch: Instant) -> Self {
        TimestampUs(epoch.elapsed().as_micros() as u64 - self.0)
    }

    pub fn saturating_diff(self, other: TimestampUs) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

/// The discriminant used for the per-`NotificationType` FIFO ordering
/// guarantee in spec §5 ("within a single NotificationType, emissions
/// preserve FIFO order; between types, no order is guaranteed").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NotificationType {
    ModeSwitch,
    Status,
    Heartbeat,
    Signal,
    File,
    BruteForce,
    Settings,
    Version,
    Battery,
    DeviceName,
    HwButton,
    Sd,
    Nrf,
    Ota,
    Error,
    Command,
}
