//! Error kinds shared across the engine (spec Sec 7).

use num_derive::{FromPrimitive, ToPrimitive};

/// Error kinds the engine can surface, matching spec.md Sec 7. `Ok` is a
/// valid value here because it also doubles as the error-channel's "no
/// error pending" state (see `channel::CommandChannel`).
#[derive(Debug, Copy, Clone, Eq, PartialEq, FromPrimitive, ToPrimitive)]
pub enum IecError {
    Ok,
    Timeout,
    FrameError,
    DeviceNotPresent,
    BuffersFull,
    FileNotFound,
    WriteProtect,
    FileExists,
    DriveNotReady,
    DiskFull,
    SyntaxUnknown,
    SyntaxUnable,
    RecordMissing,
    ReadNoHeader,
    WriteVerify,
}

impl IecError {
    /// The two-digit code and message used on the DOS error channel, e.g.
    /// `"00, OK,00,00\r"` (spec S3). Track/sector fields are filled in by
    /// the caller, since only it knows which buffer's backend raised them.
    pub fn code_and_text(self) -> (u8, &'static str) {
        match self {
            IecError::Ok => (0, "OK"),
            IecError::Timeout => (28, "WRITE TIMEOUT"),
            IecError::FrameError => (24, "SERIAL DATA CHECKSUM"),
            IecError::DeviceNotPresent => (74, "DRIVE NOT READY"),
            IecError::BuffersFull => (70, "NO CHANNEL"),
            IecError::FileNotFound => (62, "FILE NOT FOUND"),
            IecError::WriteProtect => (26, "WRITE PROTECT ON"),
            IecError::FileExists => (63, "FILE EXISTS"),
            IecError::DriveNotReady => (74, "DRIVE NOT READY"),
            IecError::DiskFull => (72, "DISK FULL"),
            IecError::SyntaxUnknown => (30, "SYNTAX ERROR"),
            IecError::SyntaxUnable => (34, "SYNTAX ERROR"),
            IecError::RecordMissing => (51, "RECORD NOT PRESENT"),
            IecError::ReadNoHeader => (27, "READ ERROR (NO HEADER)"),
            IecError::WriteVerify => (25, "WRITE ERROR"),
        }
    }
}

impl Default for IecError {
    fn default() -> Self { IecError::Ok }
}

pub type IecResult<T> = Result<T, IecError>;
