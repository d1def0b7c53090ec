//! Accumulated session and buffer flag sets (spec Sec 3), modelled with
//! `bitflags` the way `llio`'s RTC status word is.

use bitflags::bitflags;

bitflags! {
    /// IEC flags, accumulated across a session (spec Sec 3 "IEC flags").
    #[derive(Default)]
    pub struct IecFlags: u8 {
        /// Set on the last byte received in a LISTEN stream.
        const EOI_RECVD    = 0b0000_0001;
        /// Set once a full ATN command byte has been received.
        const COMMAND_RECVD = 0b0000_0010;
        /// Set for the remainder of the session once JiffyDOS is detected.
        const JIFFY_ACTIVE = 0b0000_0100;
        /// Set when the in-flight transfer is a JiffyDOS-accelerated load.
        const JIFFY_LOAD   = 0b0000_1000;
        /// VC20-class host: widen setup/hold margins (spec Sec 4.2, Sec 9a).
        const VC20_TIMING  = 0b0001_0000;
    }
}

bitflags! {
    /// Per-buffer flags (spec Sec 3 "Buffer").
    #[derive(Default)]
    pub struct BufferFlags: u8 {
        const ALLOCATED  = 0b0000_0001;
        const READ       = 0b0000_0010;
        const WRITE      = 0b0000_0100;
        const DIRTY      = 0b0000_1000;
        const STICKY     = 0b0001_0000;
        const MUSTFLUSH  = 0b0010_0000;
    }
}
