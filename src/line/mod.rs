//! Line driver (spec Sec 4.1): a thin capability over the four
//! open-collector lines. Modelled as a trait so the bit engine and bus FSM
//! never touch a register directly, the same seam `llio` draws between its
//! `llio_hw`/`llio_hosted` implementations and everything above them.

#[cfg(feature = "hardware")]
pub mod hw;
pub mod hosted;

/// Which line an edge interrupt fired on, or the main-loop wake notification
/// posted by `arm_*_irq` callers (spec Sec 4.1, Sec 5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineEvent {
    Atn,
    Clock,
    Wake,
}

/// The line driver contract (spec Sec 4.1). Implementors must be safe to
/// call from both the main task and an interrupt handler; writes are
/// idempotent.
pub trait LineDriver {
    fn read_atn(&self) -> bool;
    fn read_clock(&self) -> bool;
    fn read_data(&self) -> bool;
    fn read_srq(&self) -> bool;

    fn pull_clock(&mut self, pulled: bool);
    fn pull_data(&mut self, pulled: bool);
    fn pull_srq(&mut self, pulled: bool);

    fn arm_atn_irq(&mut self, enabled: bool);
    fn arm_clock_irq(&mut self, enabled: bool);

    /// Busy-wait for at least `us` microseconds. Bit-engine handshake waits
    /// never yield (spec Sec 5) so this must not sleep or block on an OS
    /// primitive that could be descheduled.
    fn delay_us(&self, us: u32);

    /// Arm a deadline `us` microseconds in the future.
    fn start_timeout(&mut self, us: u32);
    /// True once the most recently armed deadline has elapsed. Comparison
    /// must be wrap-safe (spec Sec 5): implementors compare with signed
    /// subtraction modulo 2^32, not a plain `>`.
    fn timed_out(&self) -> bool;

    /// Release all output-capable lines (the idle convention), used on
    /// init, in `NotForMe`, and during `Cleanup`.
    fn release_all(&mut self) {
        self.pull_clock(false);
        self.pull_data(false);
        self.pull_srq(false);
    }
}
