//! Main loop (spec Sec 4.5): single cooperative task that sleeps waiting
//! for ATN, drives the bus FSM through one full ATN session, then runs
//! any pending DOS command and refreshes LED state.

use crate::backend::FilesystemBackend;
use crate::bus::BusState;
use crate::channel;
use crate::channel::CommandParser;
use crate::error::IecError;
use crate::line::LineDriver;
use crate::Engine;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Atn,
    /// `t_sleep_ms` elapsed with no activity: transition to Sleep.
    Timeout,
}

/// LED state the embedder (an external collaborator, spec Sec 6) should
/// render: busy while any non-command buffer is allocated, dirty while
/// the last error is not OK.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedState {
    pub busy: bool,
    pub dirty: bool,
}

/// Interval between `read_atn`/`timed_out` polls inside `system_sleep`.
/// Short enough that ATN assertion is noticed well inside T_BIT, long
/// enough not to spin uselessly fast in the hosted simulation.
const SLEEP_POLL_US: u32 = 100;

impl<L: LineDriver, B: FilesystemBackend, const N: usize> Engine<L, B, N> {
    /// `system_sleep()` (spec Sec 4.5 step 1): block until ATN is
    /// asserted or `t_sleep_ms` elapses. The only suspension point in the
    /// whole engine (spec Sec 5) -- everywhere else busy-waits bounded by
    /// a tighter deadline instead of yielding here.
    pub fn system_sleep(&mut self) -> WakeReason {
        self.lines.start_timeout(self.config.t_sleep_ms.saturating_mul(1000));
        loop {
            if self.lines.read_atn() {
                return WakeReason::Atn;
            }
            if self.lines.timed_out() {
                return WakeReason::Timeout;
            }
            self.lines.delay_us(SLEEP_POLL_US);
        }
    }

    /// Any state / line-idle longer than T_SLEEP -> Sleep (spec Sec 4.3):
    /// release all outputs, leave the ATN IRQ armed so a later edge still
    /// wakes the task.
    fn enter_sleep(&mut self) {
        self.bus_state = BusState::Sleep;
        self.lines.release_all();
        self.lines.arm_atn_irq(true);
    }

    /// Runs the DOS command parser (spec Sec 6, external collaborator)
    /// over an accumulated command line and arms the resulting error for
    /// the next read of the command channel (spec Sec 4.5 step 3).
    fn process_command_channel<P: CommandParser<B>>(&mut self, parser: &mut P) {
        if self.session.command_line.is_empty() {
            return;
        }
        let command = std::mem::take(&mut self.session.command_line);
        let error = parser.execute(&mut self.backend, self.partition, &command);
        self.session.last_error = error;
        let key = self.command_channel_key();
        channel::arm_error_message(&mut self.pool, key, error);
    }

    /// Busy when any buffer besides the permanent command-channel buffer
    /// is allocated; dirty when the last error is not OK (spec Sec 4.5
    /// step 4).
    pub fn led_state(&self) -> LedState {
        LedState { busy: self.pool.allocated_count() > 1, dirty: self.session.last_error != IecError::Ok }
    }

    /// One full iteration of the main loop (spec Sec 4.5): sleep, service
    /// an ATN session if one arrived, process any pending command, and
    /// report the LED state the embedder should render.
    pub fn step<P: CommandParser<B>>(&mut self, parser: &mut P) -> LedState {
        match self.system_sleep() {
            WakeReason::Atn => {
                self.service_atn();
                self.process_command_channel(parser);
            }
            WakeReason::Timeout => {
                self.enter_sleep();
            }
        }
        self.led_state()
    }
}
