//! IEC serial bus peripheral engine for a Commodore 1541-class disk-drive
//! emulator (see SPEC_FULL.md). Five layers, leaf first: the line driver
//! (`line`), the bit engine (`bitio`), the bus/device state machine
//! (`bus`), the channel/buffer multiplexer (`channel`, `buffer`), and the
//! main loop (`mainloop`), tied together by the [`Engine`] context.

pub mod atn;
pub mod backend;
pub mod bitio;
pub mod buffer;
pub mod bus;
pub mod channel;
pub mod config;
pub mod error;
pub mod flags;
pub mod line;
pub mod mainloop;
pub mod session;
pub mod timing;

pub use error::{IecError, IecResult};

use backend::FilesystemBackend;
use buffer::{BufferPool, ChannelKey};
use bus::{BusState, DeviceState};
use config::EngineConfig;
use flags::{BufferFlags, IecFlags};
use line::LineDriver;
use session::SessionContext;

/// The engine context (spec Sec 9 "Global mutable state"): everything the
/// bus FSM, bit engine and channel multiplexer need, created once and
/// passed by reference through the `impl Engine` blocks in `bus.rs`,
/// `channel.rs` and `mainloop.rs` -- the single-struct-not-module-globals
/// shape `llio::Llio` and `susres::SusRes` use for their own state.
pub struct Engine<L: LineDriver, B: FilesystemBackend, const N: usize> {
    pub lines: L,
    pub backend: B,
    pub pool: BufferPool<N>,
    pub config: EngineConfig,
    pub flags: IecFlags,
    pub session: SessionContext,
    pub bus_state: BusState,
    pub device_state: DeviceState,
    pub partition: usize,
    /// Microsecond timestamp of the last bus activity, compared against
    /// `config.t_sleep_ms` in `mainloop.rs` to drive Idle -> Sleep.
    pub idle_since_us: u32,
}

impl<L: LineDriver, B: FilesystemBackend, const N: usize> Engine<L, B, N> {
    /// Builds a fresh engine and pre-allocates the sticky command-channel
    /// buffer (spec Sec 3 invariant e), armed with the initial OK message.
    pub fn new(lines: L, backend: B, config: EngineConfig) -> Self {
        let mut pool = BufferPool::new();
        let cmd_key = ChannelKey { device: config.device_address, secondary: 15 };
        let index = pool
            .alloc_buffer(cmd_key, 0)
            .expect("a fresh pool with buffer_count>=8 always has room for the command buffer");
        pool.get_mut(index).unwrap().flags.insert(BufferFlags::STICKY | BufferFlags::READ);

        let mut engine = Engine {
            lines,
            backend,
            pool,
            config,
            flags: IecFlags::empty(),
            session: SessionContext::new(),
            bus_state: BusState::Idle,
            device_state: DeviceState::Idle,
            partition: 0,
            idle_since_us: 0,
        };
        channel::arm_error_message(&mut engine.pool, cmd_key, IecError::Ok);
        engine
    }

    pub fn command_channel_key(&self) -> ChannelKey {
        ChannelKey { device: self.config.device_address, secondary: 15 }
    }
}
