//! Hardware line driver.
//!
//! Real GPIO and platform-timer access are external collaborators (spec.md
//! Sec 1, Sec 6) supplied by the firmware this engine is linked into -- the
//! same boundary `llio_hw.rs` draws against `utralib`'s generated CSR
//! structs, except here the register map is not ours to define, so the
//! boundary is a trait instead of a concrete `utralib::CSR`.
//!
//! `HwLines` is the thin adapter the bus FSM and bit engine actually see;
//! it owns nothing but the ISR-visible flag and delegates every line
//! operation to the injected [`GpioBackend`].

use super::{LineDriver, LineEvent};
use crate::timing::Deadline;
use core::sync::atomic::{AtomicU8, Ordering};

const FLAG_NONE: u8 = 0;
const FLAG_ATN: u8 = 1;
const FLAG_CLOCK: u8 = 2;
const FLAG_WAKE: u8 = 4;

/// One instance per engine, `'static` so an ISR can reach it through a raw
/// pointer the way `handle_gpio_irq` in `llio_hw.rs` reaches its `Llio`.
/// Only this byte is written from interrupt context; everything else in
/// the engine is task-owned (spec.md Sec 5).
pub struct IrqFlag(AtomicU8);

impl IrqFlag {
    pub const fn new() -> Self { IrqFlag(AtomicU8::new(FLAG_NONE)) }

    /// Called from the ATN/CLOCK ISR. Must complete in well under T_BIT.
    pub fn post(&self, event: LineEvent) {
        let bit = match event {
            LineEvent::Atn => FLAG_ATN,
            LineEvent::Clock => FLAG_CLOCK,
            LineEvent::Wake => FLAG_WAKE,
        };
        critical_section::with(|_| {
            self.0.fetch_or(bit, Ordering::SeqCst);
        });
    }

    /// Called from the main task in `system_sleep` (spec Sec 4.5) to test
    /// and clear the pending flag in one step.
    pub fn take(&self) -> u8 {
        critical_section::with(|_| self.0.swap(FLAG_NONE, Ordering::SeqCst))
    }
}

/// GPIO/timer primitives a platform supplies for the four IEC lines. A
/// real implementation wraps register access (level-sensitive reads,
/// open-drain pulls) and a free-running microsecond counter; none of that
/// is specified here, matching spec.md's "out of scope: platform timer and
/// GPIO drivers".
pub trait GpioBackend {
    fn read_atn(&self) -> bool;
    fn read_clock(&self) -> bool;
    fn read_data(&self) -> bool;
    fn read_srq(&self) -> bool;
    fn pull_clock(&mut self, pulled: bool);
    fn pull_data(&mut self, pulled: bool);
    fn pull_srq(&mut self, pulled: bool);
    fn enable_atn_irq(&mut self, enabled: bool);
    fn enable_clock_irq(&mut self, enabled: bool);
    /// Free-running microsecond counter, read-only here; busy-wait loops
    /// poll it directly rather than yielding (spec Sec 5).
    fn now_us(&self) -> u32;
    fn delay_us(&self, us: u32);
}

pub struct HwLines<G: GpioBackend> {
    gpio: G,
    deadline: Option<Deadline>,
}

impl<G: GpioBackend> HwLines<G> {
    /// Sets all output-capable lines to released and enables pull-ups
    /// (spec Sec 4.1), then installs the caller-provided ISR dispatch
    /// (done by the platform, not here -- this only prepares line state).
    pub fn new(mut gpio: G) -> Self {
        gpio.pull_clock(false);
        gpio.pull_data(false);
        gpio.pull_srq(false);
        HwLines { gpio, deadline: None }
    }
}

impl<G: GpioBackend> LineDriver for HwLines<G> {
    fn read_atn(&self) -> bool { self.gpio.read_atn() }
    fn read_clock(&self) -> bool { self.gpio.read_clock() }
    fn read_data(&self) -> bool { self.gpio.read_data() }
    fn read_srq(&self) -> bool { self.gpio.read_srq() }

    fn pull_clock(&mut self, pulled: bool) { self.gpio.pull_clock(pulled); }
    fn pull_data(&mut self, pulled: bool) { self.gpio.pull_data(pulled); }
    fn pull_srq(&mut self, pulled: bool) { self.gpio.pull_srq(pulled); }

    fn arm_atn_irq(&mut self, enabled: bool) { self.gpio.enable_atn_irq(enabled); }
    fn arm_clock_irq(&mut self, enabled: bool) { self.gpio.enable_clock_irq(enabled); }

    fn delay_us(&self, us: u32) { self.gpio.delay_us(us); }

    fn start_timeout(&mut self, us: u32) {
        self.deadline = Some(Deadline::arm(self.gpio.now_us(), us));
    }

    fn timed_out(&self) -> bool {
        self.deadline.map(|d| d.has_elapsed(self.gpio.now_us())).unwrap_or(false)
    }
}
