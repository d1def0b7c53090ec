//! Session context (spec Sec 3 "Session context"): the state that lives
//! for one LISTEN/TALK session and is cleared on every ATN rising edge
//! that completes an UNLISTEN to all devices.

use crate::error::IecError;

pub struct SessionContext {
    /// Device address carried by the most recent LISTEN/TALK ATN command,
    /// regardless of whether it matched ours.
    pub addressed_device: u8,
    pub secondary: u8,
    pub current_command: u8,
    pub last_atn_command: u8,
    /// Accumulates bytes written to secondary 15 until EOI, then handed to
    /// the DOS command parser (spec Sec 6, external collaborator).
    pub command_line: Vec<u8>,
    pub last_error: IecError,
}

impl SessionContext {
    pub fn new() -> Self {
        SessionContext {
            addressed_device: 0,
            secondary: 0,
            current_command: 0,
            last_atn_command: 0,
            command_line: Vec::new(),
            last_error: IecError::Ok,
        }
    }

    /// Cleared on every ATN rising edge that completes an UNLISTEN to all
    /// devices (spec Sec 3 "Lifecycle"). `last_error` survives: the error
    /// channel is single-shot but independent of the session that set it.
    pub fn reset(&mut self) {
        self.addressed_device = 0;
        self.secondary = 0;
        self.current_command = 0;
        self.last_atn_command = 0;
        self.command_line.clear();
    }

    pub fn push_command_byte(&mut self, byte: u8, cmd_buf_size: u16) {
        if self.command_line.len() < cmd_buf_size as usize {
            self.command_line.push(byte);
        }
    }
}

impl Default for SessionContext {
    fn default() -> Self { Self::new() }
}
