//! Bus state machine (spec Sec 4.3). Runs cooperatively on the main task;
//! only the ATN/CLOCK ISRs preempt it, and only to flip the `IrqFlag` bit
//! consumed in `mainloop.rs`, the same split `llio`'s I2C state machine
//! (interrupt posts a byte, `handle_event` on the task drives the rest)
//! draws between ISR and task.

use crate::atn::{secondary_role, AtnCommand, SecondaryRole};
use crate::backend::FilesystemBackend;
use crate::bitio::{BitEngine, ByteEvent};
use crate::buffer::ChannelKey;
use crate::channel;
use crate::channel::OpenMode;
use crate::error::IecError;
use crate::flags::IecFlags;
use crate::line::LineDriver;
use crate::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BusState {
    Sleep,
    Idle,
    FoundATN,
    ATNActive,
    ForMe,
    NotForMe,
    ATNFinish,
    ATNProcess,
    Cleanup,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    Idle,
    Listen,
    Talk,
}

impl<L: LineDriver, B: FilesystemBackend, const N: usize> Engine<L, B, N> {
    /// Entry point from the main loop once ATN has been observed asserted.
    /// Drives FoundATN through Cleanup and leaves `bus_state` at Idle (or
    /// Sleep, never reached from here since an active ATN session implies
    /// recent bus activity).
    pub fn service_atn(&mut self) {
        log::trace!("ATN asserted, entering FoundATN");
        self.bus_state = BusState::FoundATN;
        self.lines.pull_data(true);

        loop {
            self.bus_state = match self.bus_state {
                BusState::FoundATN => BusState::ATNActive,
                BusState::ATNActive => self.run_atn_active(),
                BusState::ForMe => self.run_for_me(),
                BusState::NotForMe => self.run_not_for_me(),
                BusState::ATNFinish => self.run_atn_finish(),
                BusState::ATNProcess => BusState::Cleanup,
                BusState::Cleanup => {
                    self.run_cleanup();
                    break;
                }
                other => other,
            };
        }
        self.bus_state = BusState::Idle;
    }

    /// FoundATN -> ATNActive -> {ForMe, NotForMe}. ATN stays asserted for
    /// every command byte the host sends this pass (S1/S2 show LISTEN and
    /// OPEN arriving back to back under one ATN assertion), so this loops
    /// receiving ATN command bytes until the host releases ATN, then
    /// decides ForMe/NotForMe from the most recent LISTEN/TALK address.
    fn run_atn_active(&mut self) -> BusState {
        let mut ours = self.device_state != DeviceState::Idle
            && self.session.addressed_device == self.config.device_address;

        while self.lines.read_atn() {
            let mut bit_engine = BitEngine::new(&mut self.lines, self.config);
            let byte = match bit_engine.recv_atn_byte() {
                Ok(byte) => byte,
                Err(_) => return BusState::Cleanup,
            };

            match AtnCommand::decode(byte) {
                Some(AtnCommand::Listen(device)) => {
                    self.session.addressed_device = device;
                    self.session.last_atn_command = byte;
                    ours = device == self.config.device_address;
                    if ours {
                        self.device_state = DeviceState::Listen;
                    }
                }
                Some(AtnCommand::Talk(device)) => {
                    self.session.addressed_device = device;
                    self.session.last_atn_command = byte;
                    ours = device == self.config.device_address;
                    if ours {
                        self.device_state = DeviceState::Talk;
                    }
                }
                Some(AtnCommand::UnlistenAll) => {
                    if self.device_state == DeviceState::Listen {
                        self.device_state = DeviceState::Idle;
                        self.session.reset();
                    }
                    ours = false;
                }
                Some(AtnCommand::UntalkAll) => {
                    if self.device_state == DeviceState::Talk {
                        self.device_state = DeviceState::Idle;
                        self.session.reset();
                    }
                    ours = false;
                }
                Some(AtnCommand::Data(secondary))
                | Some(AtnCommand::Open(secondary))
                | Some(AtnCommand::Close(secondary)) => {
                    if ours && self.device_state != DeviceState::Idle {
                        self.session.secondary = secondary;
                        self.session.current_command = byte;
                    }
                }
                None => {}
            }
        }

        if ours { BusState::ForMe } else { BusState::NotForMe }
    }

    /// NotForMe: `run_atn_active` only returns this state once ATN has
    /// already been released; release DATA and head to Cleanup.
    fn run_not_for_me(&mut self) -> BusState {
        self.lines.pull_data(false);
        BusState::Cleanup
    }

    /// ForMe: `run_atn_active` only returns this state once ATN has
    /// already been released by the host, so the secondary address and
    /// device state captured there are final; proceed to the data phase.
    fn run_for_me(&mut self) -> BusState {
        BusState::ATNFinish
    }

    /// ATNFinish: run the LISTEN or TALK byte-transfer loop per spec Sec
    /// 4.3 "Per-session byte flow", then fall through to ATNProcess.
    fn run_atn_finish(&mut self) -> BusState {
        let key = ChannelKey { device: self.config.device_address, secondary: self.session.secondary };

        if let Some(AtnCommand::Open(secondary)) = AtnCommand::decode(self.session.current_command) {
            return self.run_open(secondary);
        }
        if let Some(AtnCommand::Close(secondary)) = AtnCommand::decode(self.session.current_command) {
            let _ = channel::close_channel(&mut self.backend, &mut self.pool, ChannelKey { device: self.config.device_address, secondary });
            return BusState::ATNProcess;
        }

        match self.device_state {
            DeviceState::Listen => self.run_listen_loop(key),
            DeviceState::Talk => self.run_talk_loop(key),
            DeviceState::Idle => BusState::ATNProcess,
        }
    }

    /// An OPEN ATN command's filename arrives as ordinary LISTEN data;
    /// collect it, then hand it to the multiplexer to resolve and open.
    fn run_open(&mut self, secondary: u8) -> BusState {
        let mut name = Vec::new();
        loop {
            let mut bit_engine = BitEngine::new(&mut self.lines, self.config);
            match bit_engine.recv_byte() {
                Ok(ByteEvent::Done((byte, eoi))) => {
                    name.push(byte);
                    if eoi {
                        break;
                    }
                }
                Ok(ByteEvent::AtnAsserted) => return BusState::Cleanup,
                Err(_) => return BusState::Cleanup,
            }
        }

        if secondary == 15 {
            self.session.command_line = name;
            return BusState::ATNProcess;
        }

        let default_mode = match secondary_role(secondary) {
            SecondaryRole::Load => OpenMode::Read,
            SecondaryRole::Save => OpenMode::Write { append: false },
            SecondaryRole::User | SecondaryRole::Command => OpenMode::Read,
        };
        let key = ChannelKey { device: self.config.device_address, secondary };
        match channel::open_channel(&mut self.backend, &mut self.pool, self.partition, key, &name, default_mode) {
            Ok(_) => {}
            Err(error) => self.arm_error(error),
        }
        BusState::ATNProcess
    }

    fn run_listen_loop(&mut self, key: ChannelKey) -> BusState {
        loop {
            let mut bit_engine = BitEngine::new(&mut self.lines, self.config);
            match bit_engine.recv_byte() {
                Ok(ByteEvent::Done((byte, eoi))) => {
                    if key.secondary == 15 {
                        self.session.push_command_byte(byte, self.config.cmd_buf_size);
                    } else if let Err(error) = channel::listen_byte(&mut self.backend, &mut self.pool, key, byte) {
                        self.arm_error(error);
                    }
                    if eoi {
                        self.flags.insert(IecFlags::EOI_RECVD);
                        return BusState::ATNProcess;
                    }
                }
                Ok(ByteEvent::AtnAsserted) => return BusState::Cleanup,
                Err(error) => {
                    self.arm_error(error);
                    return BusState::Cleanup;
                }
            }
        }
    }

    fn run_talk_loop(&mut self, key: ChannelKey) -> BusState {
        loop {
            let next = match channel::talk_byte(&mut self.backend, &mut self.pool, key) {
                Ok(Some((byte, eoi))) => (byte, eoi),
                Ok(None) => return BusState::ATNProcess,
                Err(error) => {
                    self.arm_error(error);
                    self.lines.release_all();
                    return BusState::Cleanup;
                }
            };
            let mut bit_engine = BitEngine::new(&mut self.lines, self.config);
            match bit_engine.send_byte(next.0, next.1) {
                Ok(ByteEvent::Done(())) => {
                    if next.1 {
                        return BusState::ATNProcess;
                    }
                }
                Ok(ByteEvent::AtnAsserted) => return BusState::Cleanup,
                Err(error) => {
                    self.arm_error(error);
                    return BusState::Cleanup;
                }
            }
        }
    }

    /// Cleanup: release all lines and free non-sticky buffers (spec Sec
    /// 4.3 "Failure policy", Sec 5 "Cancellation").
    fn run_cleanup(&mut self) {
        self.lines.release_all();
        if self.device_state == DeviceState::Idle {
            self.pool.free_all_non_sticky();
        }
        log::debug!("ATN session done, bus returning to Idle");
    }

    fn arm_error(&mut self, error: IecError) {
        if error != IecError::Ok {
            log::warn!("device error: {:?}", error);
        }
        self.session.last_error = error;
        let key = self.command_channel_key();
        channel::arm_error_message(&mut self.pool, key, error);
    }
}
