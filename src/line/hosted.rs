//! An in-memory simulated bus, the `LineDriver` counterpart to
//! `llio_hosted.rs`'s stubbed-out register access: good enough to drive the
//! bit engine and bus FSM under test, without any real GPIO or timer.
//!
//! The bus is wired-OR (spec Sec 3): each side tracks only the lines *it*
//! pulls, and a read reflects the OR of both sides. Tests drive the "host"
//! side directly through `HostedLines::host_mut()`.

use super::LineDriver;
use crate::timing::Deadline;
use core::cell::Cell;

#[derive(Debug, Clone, Copy, Default)]
pub struct PeerLines {
    pub atn: bool,
    pub clock: bool,
    pub data: bool,
    pub srq: bool,
}

pub struct HostedLines {
    own_clock: bool,
    own_data: bool,
    own_srq: bool,
    peer: PeerLines,
    atn_irq_armed: bool,
    clock_irq_armed: bool,
    /// Virtual microsecond clock, advanced by `delay_us` and by tests that
    /// want to simulate the host taking its time.
    now_us: Cell<u32>,
    deadline: Cell<Option<Deadline>>,
}

impl HostedLines {
    pub fn new() -> Self {
        HostedLines {
            own_clock: false,
            own_data: false,
            own_srq: false,
            peer: PeerLines::default(),
            atn_irq_armed: false,
            clock_irq_armed: false,
            now_us: Cell::new(0),
            deadline: Cell::new(None),
        }
    }

    pub fn host_mut(&mut self) -> &mut PeerLines {
        &mut self.peer
    }

    pub fn atn_irq_armed(&self) -> bool {
        self.atn_irq_armed
    }

    pub fn clock_irq_armed(&self) -> bool {
        self.clock_irq_armed
    }

    /// Advance the virtual clock without a line-level effect, for tests
    /// that want to simulate host-side latency directly.
    pub fn advance_us(&self, us: u32) {
        self.now_us.set(self.now_us.get().wrapping_add(us));
    }

    pub fn now_us(&self) -> u32 {
        self.now_us.get()
    }
}

impl Default for HostedLines {
    fn default() -> Self { Self::new() }
}

impl LineDriver for HostedLines {
    fn read_atn(&self) -> bool { self.peer.atn }
    fn read_clock(&self) -> bool { self.own_clock || self.peer.clock }
    fn read_data(&self) -> bool { self.own_data || self.peer.data }
    fn read_srq(&self) -> bool { self.own_srq || self.peer.srq }

    fn pull_clock(&mut self, pulled: bool) { self.own_clock = pulled; }
    fn pull_data(&mut self, pulled: bool) { self.own_data = pulled; }
    fn pull_srq(&mut self, pulled: bool) { self.own_srq = pulled; }

    fn arm_atn_irq(&mut self, enabled: bool) { self.atn_irq_armed = enabled; }
    fn arm_clock_irq(&mut self, enabled: bool) { self.clock_irq_armed = enabled; }

    /// A bare virtual-clock bump has no real-world duration. The bit
    /// engine only ever calls `delay_us` between two line toggles meant to
    /// be observed by the other side (a bit-valid window, an EOI-ack
    /// pulse, a JiffyDOS pair), so a multi-threaded scenario test sharing
    /// one `HostedLines` behind a mutex needs an actual scheduling gap
    /// here or the peer thread can acquire the lock twice in a row and
    /// never see the transient state.
    fn delay_us(&self, us: u32) {
        self.advance_us(us);
        std::thread::sleep(std::time::Duration::from_micros(5));
    }

    fn start_timeout(&mut self, us: u32) {
        self.deadline.set(Some(Deadline::arm(self.now_us.get(), us)));
    }

    /// Real hardware's free-running counter advances on its own while a
    /// busy-wait loop polls it; this simulation has no such counter, so
    /// each poll ticks the virtual clock by one microsecond to stand in
    /// for that elapsed time. Without this an unresponsive peer would spin
    /// `wait_for` forever instead of timing out.
    fn timed_out(&self) -> bool {
        self.now_us.set(self.now_us.get().wrapping_add(1));
        match self.deadline.get() {
            Some(d) => d.has_elapsed(self.now_us.get()),
            None => false,
        }
    }
}
