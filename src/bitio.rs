//! The bit engine (spec Sec 4.2): encode/decode one byte on the bus using
//! the documented 1541 handshake, plus the JiffyDOS fast path and VC20
//! timing widening.

use crate::config::EngineConfig;
use crate::error::{IecError, IecResult};
use crate::flags::IecFlags;
use crate::line::LineDriver;

/// Constants from spec Sec 4.2 that are not part of the configurable
/// control surface (spec Sec 6 only exposes t_bit_us/t_eoi_us/t_frame_us/
/// t_sleep_ms).
const T_ACK_US: u32 = 60;
const T_LISTENER_US: u32 = 1_000_000;
const T_BIT_VALID_US: u32 = 60; // T_SETUP + T_HOLD
/// Sec 9 open question (a): the source's VC20 timing margin isn't
/// enumerated; a single tunable margin is preserved here rather than
/// guessed at finer grain.
const VC20_MARGIN_US: u32 = 60;

#[cfg(feature = "jiffydos")]
const JIFFY_QUERY_MAX_US: u32 = 400;
#[cfg(feature = "jiffydos")]
const JIFFY_PAIR_US: u32 = 8;

/// Outcome of a single-byte transfer attempt: either it completed, or ATN
/// was asserted mid-transfer and the byte was abandoned (spec Sec 5, S5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ByteEvent<T> {
    Done(T),
    AtnAsserted,
}

enum WaitResult {
    Ready,
    Atn,
}

pub struct BitEngine<'a, L: LineDriver> {
    lines: &'a mut L,
    config: EngineConfig,
}

impl<'a, L: LineDriver> BitEngine<'a, L> {
    pub fn new(lines: &'a mut L, config: EngineConfig) -> Self {
        BitEngine { lines, config }
    }

    fn bit_valid_window_us(&self) -> u32 {
        if self.config.vc20_mode { T_BIT_VALID_US + VC20_MARGIN_US } else { T_BIT_VALID_US }
    }

    /// Busy-wait (no yielding, spec Sec 5) until `cond` holds or `timeout_us`
    /// elapses, checking ATN on every iteration so any in-flight wait can be
    /// preempted at any line transition.
    fn wait_for<F>(&mut self, timeout_us: u32, mut cond: F) -> IecResult<WaitResult>
    where
        F: FnMut(&L) -> bool,
    {
        self.lines.start_timeout(timeout_us);
        loop {
            if self.lines.read_atn() {
                return Ok(WaitResult::Atn);
            }
            if cond(self.lines) {
                return Ok(WaitResult::Ready);
            }
            if self.lines.timed_out() {
                log::trace!("bit-engine wait timed out after {}us", timeout_us);
                return Err(IecError::Timeout);
            }
        }
    }

    fn abort_to_atn<T>(&mut self) -> IecResult<ByteEvent<T>> {
        self.lines.release_all();
        Ok(ByteEvent::AtnAsserted)
    }

    /// Like [`Self::wait_for`] but without the ATN check: used to receive
    /// ATN command bytes themselves, where ATN being held low for the
    /// whole byte is the expected condition, not a preemption signal.
    fn wait_plain<F>(&mut self, timeout_us: u32, mut cond: F) -> IecResult<()>
    where
        F: FnMut(&L) -> bool,
    {
        self.lines.start_timeout(timeout_us);
        loop {
            if cond(self.lines) {
                return Ok(());
            }
            if self.lines.timed_out() {
                return Err(IecError::Timeout);
            }
        }
    }

    /// Receives one ATN command byte (spec Sec 4.3): the same bit
    /// handshake as [`Self::recv_byte`], minus EOI detection (ATN command
    /// bytes never carry EOI) and minus the mid-byte ATN-abort check,
    /// since ATN is expected to stay asserted for the whole byte.
    pub fn recv_atn_byte(&mut self) -> IecResult<u8> {
        self.lines.pull_data(false);
        self.wait_plain(self.config.t_frame_us, |l| !l.read_clock())?;
        let mut value: u8 = 0;
        for bit in 0..8u8 {
            self.wait_plain(self.bit_valid_window_us().max(self.config.t_bit_us), |l| l.read_clock())?;
            self.wait_plain(self.config.t_bit_us, |l| !l.read_clock())?;
            if !self.lines.read_data() {
                value |= 1 << bit;
            }
        }
        self.lines.pull_data(true);
        Ok(value)
    }

    /// `iec_getc` (spec Sec 4.2).
    pub fn recv_byte(&mut self) -> IecResult<ByteEvent<(u8, bool)>> {
        // Step 1: talker-ready, then release DATA.
        self.lines.pull_data(false);
        match self.wait_for(self.config.t_frame_us, |l| !l.read_clock())? {
            WaitResult::Atn => return self.abort_to_atn(),
            WaitResult::Ready => {}
        }

        // Step 2: CLOCK held released past T_EOI signals EOI.
        let mut eoi = false;
        self.lines.start_timeout(self.config.t_eoi_us);
        loop {
            if self.lines.read_atn() {
                return self.abort_to_atn();
            }
            if self.lines.read_clock() {
                break; // talker pulled CLOCK again: bit 0 is starting, not EOI
            }
            if self.lines.timed_out() {
                eoi = true;
                self.lines.pull_data(true);
                self.lines.delay_us(T_ACK_US);
                self.lines.pull_data(false);
                match self.wait_for(self.config.t_frame_us, |l| l.read_clock())? {
                    WaitResult::Atn => return self.abort_to_atn(),
                    WaitResult::Ready => {}
                }
                break;
            }
        }

        // Step 3: 8 bits, LSB first. released(false)=1, pulled(true)=0.
        let mut value: u8 = 0;
        for bit in 0..8u8 {
            match self.wait_for(self.bit_valid_window_us().max(self.config.t_bit_us), |l| l.read_clock())? {
                WaitResult::Atn => return self.abort_to_atn(),
                WaitResult::Ready => {}
            }
            match self.wait_for(self.config.t_bit_us, |l| !l.read_clock())? {
                WaitResult::Atn => return self.abort_to_atn(),
                WaitResult::Ready => {}
            }
            if !self.lines.read_data() {
                value |= 1 << bit;
            }
        }

        // Step 4: acknowledge within T_ACK.
        self.lines.pull_data(true);

        Ok(ByteEvent::Done((value, eoi)))
    }

    /// `iec_putc` (spec Sec 4.2). Only valid while Talk.
    pub fn send_byte(&mut self, byte: u8, eoi: bool) -> IecResult<ByteEvent<()>> {
        // Step 1: talker-ready, wait for every listener to release DATA.
        self.lines.pull_clock(false);
        match self.wait_for(T_LISTENER_US, |l| !l.read_data()).map_err(|_| IecError::DeviceNotPresent)? {
            WaitResult::Atn => return self.abort_to_atn(),
            WaitResult::Ready => {}
        }

        // Step 2: EOI handshake -- listener pulls DATA, then releases again.
        if eoi {
            match self.wait_for(self.config.t_eoi_us, |l| l.read_data()).map_err(|_| IecError::FrameError)? {
                WaitResult::Atn => return self.abort_to_atn(),
                WaitResult::Ready => {}
            }
            match self.wait_for(self.config.t_eoi_us, |l| !l.read_data()).map_err(|_| IecError::FrameError)? {
                WaitResult::Atn => return self.abort_to_atn(),
                WaitResult::Ready => {}
            }
        }

        // Step 3: 8 bits, LSB first.
        self.lines.pull_clock(true);
        for bit in 0..8u8 {
            if self.lines.read_atn() {
                return self.abort_to_atn();
            }
            let one = (byte >> bit) & 1 != 0;
            self.lines.pull_data(!one); // released(false)=1, pulled(true)=0
            self.lines.pull_clock(false);
            self.lines.delay_us(self.bit_valid_window_us());
            self.lines.pull_clock(true);
        }
        self.lines.pull_data(false);

        // Step 4: frame-ack.
        match self.wait_for(self.config.t_frame_us, |l| l.read_data()).map_err(|_| IecError::FrameError)? {
            WaitResult::Atn => return self.abort_to_atn(),
            WaitResult::Ready => {}
        }

        Ok(ByteEvent::Done(()))
    }

    /// JiffyDOS query detection (spec Sec 4.2, S6): CLOCK pulled for no
    /// more than `JIFFY_QUERY_MAX_US` while DATA stays released. Gated on
    /// `jiffy_enabled` so a disabled build/config never mistakes line
    /// noise for the query (spec Sec 6).
    #[cfg(feature = "jiffydos")]
    pub fn detect_jiffydos(&mut self) -> bool {
        if !self.config.jiffy_enabled {
            return false;
        }
        self.lines.start_timeout(JIFFY_QUERY_MAX_US);
        loop {
            if self.lines.read_clock() {
                return !self.lines.read_data();
            }
            if self.lines.timed_out() {
                return false;
            }
        }
    }

    /// JiffyDOS fast receive: implicit clocking, two bits sampled per
    /// 8us interval, four intervals for the byte and a fifth carrying the
    /// EOI bit and the load-under-JIFFY flag (spec Sec 4.2). Polls ATN
    /// between bit-pairs and aborts to FoundATN (spec Sec 9 open question
    /// c), rather than mid-pair where a partial sample would be undefined.
    #[cfg(feature = "jiffydos")]
    pub fn jiffy_recv_byte(&mut self) -> IecResult<ByteEvent<(u8, bool, bool)>> {
        let mut value: u8 = 0;
        for pair in 0..4u8 {
            if self.lines.read_atn() {
                return self.abort_to_atn();
            }
            self.lines.delay_us(JIFFY_PAIR_US);
            if !self.lines.read_data() {
                value |= 1 << (pair * 2);
            }
            if !self.lines.read_clock() {
                value |= 1 << (pair * 2 + 1);
            }
        }
        if self.lines.read_atn() {
            return self.abort_to_atn();
        }
        self.lines.delay_us(JIFFY_PAIR_US);
        let eoi = !self.lines.read_data();
        let load_under_jiffy = !self.lines.read_clock();
        Ok(ByteEvent::Done((value, eoi, load_under_jiffy)))
    }

    /// JiffyDOS fast send, the mirror of [`Self::jiffy_recv_byte`].
    #[cfg(feature = "jiffydos")]
    pub fn jiffy_send_byte(&mut self, byte: u8, eoi: bool, load_under_jiffy: bool) -> IecResult<ByteEvent<()>> {
        for pair in 0..4u8 {
            if self.lines.read_atn() {
                return self.abort_to_atn();
            }
            let data_bit = (byte >> (pair * 2)) & 1 != 0;
            let clock_bit = (byte >> (pair * 2 + 1)) & 1 != 0;
            self.lines.pull_data(!data_bit);
            self.lines.pull_clock(!clock_bit);
            self.lines.delay_us(JIFFY_PAIR_US);
        }
        if self.lines.read_atn() {
            return self.abort_to_atn();
        }
        self.lines.pull_data(!eoi);
        self.lines.pull_clock(!load_under_jiffy);
        self.lines.delay_us(JIFFY_PAIR_US);
        self.lines.release_all();
        Ok(ByteEvent::Done(()))
    }
}

/// Widen or narrow the JIFFY_ACTIVE/JIFFY_LOAD/VC20_TIMING session flags
/// based on a detection result, the small bit of bookkeeping the bus FSM
/// delegates here because it mirrors the flag definitions in `flags.rs`.
pub fn note_jiffy_detected(flags: &mut IecFlags) {
    flags.insert(IecFlags::JIFFY_ACTIVE);
}
