//! Error types shared by the translator, the program directory and the
//! device session.

use std::time::Duration;

use thiserror::Error;

use crate::pattern::ProgramId;

/// Invalid switch pattern or alert string. Always the caller's fault; never
/// retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatternError {
    /// Empty or absent input.
    #[error("parameter not found")]
    Missing,

    /// Input has the wrong number of characters.
    #[error("invalid parameter length: expected {expected}, got {actual}")]
    WrongLength { expected: usize, actual: usize },

    /// Input contains something other than 0, 1 or 9.
    #[error("parameter contains invalid character {0:?}")]
    InvalidCharacter(char),

    /// Computed program id does not fit the switch range.
    #[error("program id {0} out of range")]
    OutOfRange(u16),
}

impl PatternError {
    /// Stable tag reported to HTTP clients.
    pub fn tag(&self) -> &'static str {
        match self {
            Self::Missing => "Parameter_not_found",
            Self::WrongLength { .. } => "Invalid_parameter_length",
            Self::InvalidCharacter(_) => "Parameter_contains_invalid_value",
            Self::OutOfRange(_) => "Program_out_of_range",
        }
    }
}

/// Lookup and validation failures of the program directory.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DirectoryError {
    #[error("no command configured for program {0}")]
    UnknownProgram(ProgramId),

    #[error("no command configured for volume {0}%")]
    UnsupportedVolume(u8),

    #[error("volume level {0} is not a multiple of 10 within 0-100")]
    InvalidVolumeLevel(u16),
}

/// Device session failures.
#[derive(Debug, Error)]
pub enum SessionError {
    /// All connect attempts failed (including login).
    #[error("unable to connect to device after {attempts} attempts")]
    ConnectFailed { attempts: u32 },

    #[error("login failed: {0}")]
    AuthFailed(String),

    #[error("no connection to device")]
    NotConnected,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("payload is not valid hex: {0}")]
    InvalidPayload(#[from] hex::FromHexError),

    /// Raw send kept failing for the whole retry budget.
    #[error("command not delivered after {attempts} attempts")]
    SendFailed { attempts: u32 },

    /// Device worker task is not running anymore.
    #[error("device worker stopped")]
    WorkerGone,
}

/// Result of a controller operation.
#[derive(Debug, Error)]
pub enum ControlError {
    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error("delivery failed: {0}")]
    Delivery(#[from] SessionError),
}

/// Program id outside "01"-"20" or not two digits.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid program id {0:?}, expected two digits 01-20")]
pub struct InvalidProgramId(pub String);
