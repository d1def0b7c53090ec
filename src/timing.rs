//! Wrap-safe microsecond deadlines (spec Sec 5 "Timers").
//!
//! `start_timeout`/`timed_out` are specified to compare a free-running
//! cycle counter modulo 2^32 using signed subtraction, so a deadline armed
//! just before the counter wraps is still honored correctly. The counter
//! itself is owned by the line driver (it is platform timer hardware,
//! itself an external collaborator per spec.md Sec 1); this module is the
//! pure comparison logic shared by both the `hw` and `hosted` drivers, kept
//! separate so property test #3 (spec Sec 8) can exercise it directly
//! without going through a `LineDriver`.

#[derive(Debug, Clone, Copy, Default)]
pub struct Deadline {
    target: u32,
}

impl Deadline {
    /// Arm a deadline `span_us` microseconds after `now`.
    pub fn arm(now: u32, span_us: u32) -> Deadline {
        Deadline { target: now.wrapping_add(span_us) }
    }

    /// True once `now` has reached or passed the armed deadline, correct
    /// across a wrap of the underlying counter.
    pub fn has_elapsed(&self, now: u32) -> bool {
        // signed subtraction modulo 2^32: negative means "not yet".
        (now.wrapping_sub(self.target) as i32) >= 0
    }
}
