//! Error taxonomy for the firmware core.
//!
//! Each subsystem defines its own narrow error enum (mirroring the error
//! codes the wire protocol actually carries, see spec §7) and this module
//! composes them into a single top-level [`Error`] for code that crosses
//! subsystem boundaries. Handlers at the dispatcher boundary convert any
//! `Error` into a `CommandError` notification rather than letting it
//! propagate further — see [`crate::dispatcher`].

use thiserror::Error;

/// Errors arising while decoding or encoding a wire frame (spec §4.3).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FrameError {
    #[error("bad magic byte")]
    BadMagic,
    #[error("unsupported frame type")]
    BadType,
    #[error("declared length does not match available bytes")]
    LengthMismatch,
    #[error("checksum mismatch")]
    ChecksumMismatch,
    #[error("frame shorter than the fixed header")]
    Truncated,
}

/// Errors surfaced to the client as `CommandError{code}` (spec §7).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum CommandError {
    #[error("payload shorter than required")]
    BadLength = 1,
    #[error("invalid choice or module index")]
    InvalidChoice = 2,
    #[error("value out of documented range")]
    OutOfRange = 3,
    #[error("an operation of this kind is already running")]
    AlreadyRunning = 4,
    #[error("nothing is running to pause")]
    NotRunning = 5,
    #[error("no saved state to resume from")]
    NoSavedState = 6,
}

impl CommandError {
    /// The numeric code placed in the `CommandError{code}` notification.
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Errors surfaced as `FileActionResult{errorCode}` (spec §7).
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
pub enum FsError {
    #[error("low memory")]
    LowMemory = 1,
    #[error("remove failed")]
    RemoveFailed = 4,
    #[error("not found")]
    NotFound = 3,
    #[error("mkdir failed")]
    MkdirFailed = 7,
    #[error("open failed")]
    OpenFailed = 10,
    #[error("open failed (write)")]
    OpenFailedWrite = 11,
    #[error("open failed (other)")]
    OpenFailedOther = 13,
    #[error("path too long")]
    PathTooLong = 14,
}

impl FsError {
    pub fn code(self) -> u8 {
        self as u8
    }
}

/// Internal-only: a decoder's timing state machine hit a violation and must
/// reset. Never surfaced to the client, only used to drive `Decoder::reset`.
#[derive(Debug, Error, PartialEq, Eq, Clone, Copy)]
#[error("timing violation, decoder state reset")]
pub struct DecodeError;

/// Errors from loading or saving the persistent settings file.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
pub enum SettingsError {
    #[error("underlying storage error: {0}")]
    Storage(String),
}

/// Top-level error type for code that crosses more than one subsystem.
#[derive(Debug, Error)]
pub enum Error {
    #[error("framing: {0}")]
    Frame(#[from] FrameError),
    #[error("command: {0}")]
    Command(#[from] CommandError),
    #[error("filesystem: {0}")]
    Fs(#[from] FsError),
    #[error("settings: {0}")]
    Settings(#[from] SettingsError),
    #[error("buffer too small or input exhausted")]
    Eof,
    #[error("radio bus timeout")]
    BusTimeout,
}
