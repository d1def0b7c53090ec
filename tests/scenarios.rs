//! End-to-end wire-level scenarios from spec.md Sec 8 (S1-S3), driven
//! against a real two-sided `HostedLines` shared across threads: one
//! thread runs the engine's main loop, the other plays the host computer,
//! hand-rolling the opposite side of the same bit handshake `bitio.rs`
//! implements. `HostedLines` has no real concurrency of its own, so the
//! two sides only make progress by actually racing on the shared mutex,
//! the same way two real chips race on open-collector lines.

use iec_drive::backend::{DirEntry, FilesystemBackend, FileType, RefillOutcome};
use iec_drive::channel::CommandParser;
use iec_drive::config::EngineConfig;
use iec_drive::error::{IecError, IecResult};
use iec_drive::line::hosted::HostedLines;
use iec_drive::line::LineDriver;
use iec_drive::Engine;

use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};

/// A `LineDriver` over a `HostedLines` shared between the engine thread
/// and the host-simulating test thread. Every call locks the mutex for
/// the duration of one register access, mirroring how two real chips
/// each see an instantaneous snapshot of the wired-OR lines.
#[derive(Clone)]
struct SharedLines(Arc<Mutex<HostedLines>>);

impl SharedLines {
    fn new() -> Self {
        SharedLines(Arc::new(Mutex::new(HostedLines::new())))
    }

    fn with_host<R>(&self, f: impl FnOnce(&mut HostedLines) -> R) -> R {
        f(&mut self.0.lock().unwrap())
    }
}

impl LineDriver for SharedLines {
    fn read_atn(&self) -> bool { self.0.lock().unwrap().read_atn() }
    fn read_clock(&self) -> bool { self.0.lock().unwrap().read_clock() }
    fn read_data(&self) -> bool { self.0.lock().unwrap().read_data() }
    fn read_srq(&self) -> bool { self.0.lock().unwrap().read_srq() }

    fn pull_clock(&mut self, pulled: bool) { self.0.lock().unwrap().pull_clock(pulled); }
    fn pull_data(&mut self, pulled: bool) { self.0.lock().unwrap().pull_data(pulled); }
    fn pull_srq(&mut self, pulled: bool) { self.0.lock().unwrap().pull_srq(pulled); }

    fn arm_atn_irq(&mut self, enabled: bool) { self.0.lock().unwrap().arm_atn_irq(enabled); }
    fn arm_clock_irq(&mut self, enabled: bool) { self.0.lock().unwrap().arm_clock_irq(enabled); }

    fn delay_us(&self, us: u32) { self.0.lock().unwrap().delay_us(us); }

    fn start_timeout(&mut self, us: u32) { self.0.lock().unwrap().start_timeout(us); }
    fn timed_out(&self) -> bool { self.0.lock().unwrap().timed_out() }
}

const WAIT_DEADLINE: Duration = Duration::from_secs(5);

/// Spin-poll `cond` against real wall-clock time, independent of the
/// engine's virtual microsecond clock -- the host side of these tests
/// times itself the way a real computer would, not the way the simulated
/// peripheral does.
fn wait_until(mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + WAIT_DEADLINE;
    while !cond() {
        assert!(Instant::now() < deadline, "scenario test timed out waiting for a line transition");
        thread::yield_now();
    }
}

/// Watches for a pull-then-release pulse on DATA within `window`, the
/// host-side half of the EOI handshake in `recv_byte`'s step 2 / the ack
/// pulse in its step 4 equivalent. Polls continuously rather than
/// sleeping blind, since the pulse itself carries no scheduling delay.
fn watch_pulse(lines: &SharedLines, window: Duration) {
    let deadline = Instant::now() + window;
    let mut seen_pulled = false;
    loop {
        let pulled = lines.read_data();
        if pulled {
            seen_pulled = true;
        }
        if seen_pulled && !pulled {
            return;
        }
        assert!(Instant::now() < deadline, "expected EOI ack pulse not observed");
        thread::yield_now();
    }
}

/// Host-as-talker: send one byte using the mirror image of `recv_byte` /
/// `recv_atn_byte`'s listener-side handshake. `eoi` plays the same role
/// it does in `BitEngine::send_byte` -- pass `false` for ATN command
/// bytes, which never carry it.
fn host_send_byte(lines: &SharedLines, byte: u8, eoi: bool) {
    lines.with_host(|h| h.host_mut().clock = false); // talker-ready
    wait_until(|| !lines.read_data()); // listener releases DATA
    if eoi {
        watch_pulse(lines, WAIT_DEADLINE); // listener's EOI ack pulse
    }
    lines.with_host(|h| h.host_mut().clock = true);
    for bit in 0..8u8 {
        let one = (byte >> bit) & 1 != 0;
        lines.with_host(|h| h.host_mut().data = !one); // released(false)=1, pulled(true)=0
        lines.with_host(|h| h.host_mut().clock = false); // data-valid window
        thread::sleep(Duration::from_micros(50));
        lines.with_host(|h| h.host_mut().clock = true);
    }
    lines.with_host(|h| h.host_mut().data = false); // release DATA
    wait_until(|| lines.read_data()); // frame-ack
}

/// Host-as-talker: assert ATN, send every command byte in `bytes` back to
/// back under that one assertion (S1/S2 show LISTEN and OPEN arriving
/// this way), then release ATN.
fn host_send_atn_command(lines: &SharedLines, bytes: &[u8]) {
    lines.with_host(|h| h.host_mut().atn = true);
    for &byte in bytes {
        host_send_byte(lines, byte, false);
    }
    lines.with_host(|h| h.host_mut().atn = false);
}

/// Host-as-listener: receive one byte using the mirror image of
/// `send_byte`'s talker-side handshake, including its own EOI detection
/// (CLOCK held released past a real-time window stands in for T_EOI).
fn host_recv_byte(lines: &SharedLines) -> (u8, bool) {
    lines.with_host(|h| h.host_mut().data = false); // listener-ready
    wait_until(|| !lines.read_clock()); // talker releases CLOCK

    let eoi_window = Duration::from_millis(200);
    let deadline = Instant::now() + eoi_window;
    let mut eoi = false;
    loop {
        if lines.read_clock() {
            break; // talker pulled CLOCK again: bit 0 is starting, not EOI
        }
        if Instant::now() >= deadline {
            eoi = true;
            lines.with_host(|h| h.host_mut().data = true);
            thread::sleep(Duration::from_micros(50));
            lines.with_host(|h| h.host_mut().data = false);
            wait_until(|| lines.read_clock());
            break;
        }
        thread::yield_now();
    }

    let mut value = 0u8;
    for bit in 0..8u8 {
        wait_until(|| !lines.read_clock()); // data-valid sample point
        if !lines.read_data() {
            value |= 1 << bit;
        }
        wait_until(|| lines.read_clock()); // back to pulled, ready for next bit
    }
    lines.with_host(|h| h.host_mut().data = true); // frame-ack
    (value, eoi)
}

struct ThreadBackend {
    file: Vec<u8>,
    cursor: usize,
}

impl ThreadBackend {
    fn new() -> Self {
        ThreadBackend { file: Vec::new(), cursor: 0 }
    }

    fn dir_entry() -> DirEntry {
        DirEntry { name: [0; 16], name_len: 0, size_blocks: 0, kind: FileType::Prg, locked: false }
    }
}

impl FilesystemBackend for ThreadBackend {
    fn open_read(&mut self, _p: usize, _d: u8, _s: u8, _n: &[u8]) -> IecResult<DirEntry> {
        self.cursor = 0;
        Ok(Self::dir_entry())
    }
    fn open_write(&mut self, _p: usize, _d: u8, _s: u8, _n: &[u8], _k: FileType, _a: bool) -> IecResult<DirEntry> {
        Ok(Self::dir_entry())
    }
    fn open_relative(&mut self, _p: usize, _d: u8, _s: u8, _n: &[u8], _r: u16, _e: bool) -> IecResult<DirEntry> {
        Err(IecError::FileNotFound)
    }
    fn readdir(&mut self, _p: usize, _path: &[u8]) -> IecResult<Vec<DirEntry>> { Ok(Vec::new()) }
    fn delete(&mut self, _p: usize, _path: &[u8], _n: &[u8]) -> IecResult<()> { Ok(()) }
    fn mkdir(&mut self, _p: usize, _path: &[u8], _n: &[u8]) -> IecResult<()> { Ok(()) }
    fn chdir(&mut self, _p: usize, _path: &[u8]) -> IecResult<()> { Ok(()) }
    fn rename(&mut self, _p: usize, _path: &[u8], _f: &[u8], _t: &[u8]) -> IecResult<()> { Ok(()) }
    fn freeblocks(&mut self, _p: usize) -> IecResult<u32> { Ok(0) }
    fn diskname(&mut self, _p: usize) -> IecResult<[u8; 16]> { Ok([0; 16]) }
    fn diskid(&mut self, _p: usize) -> IecResult<[u8; 5]> { Ok([0; 5]) }
    fn read_sector(&mut self, _p: usize, _t: u8, _s: u8, _o: &mut [u8]) -> IecResult<()> { Ok(()) }
    fn write_sector(&mut self, _p: usize, _t: u8, _s: u8, _d: &[u8]) -> IecResult<()> { Ok(()) }
    fn refill_read(&mut self, _d: u8, _s: u8, buf: &mut [u8]) -> IecResult<RefillOutcome> {
        let remaining = &self.file[self.cursor..];
        let n = remaining.len().min(buf.len());
        buf[..n].copy_from_slice(&remaining[..n]);
        self.cursor += n;
        Ok(RefillOutcome { filled: n, eof: self.cursor >= self.file.len() })
    }
    fn flush_write(&mut self, _d: u8, _s: u8, _b: &[u8]) -> IecResult<()> { Ok(()) }
    fn seek(&mut self, _d: u8, _s: u8, _r: u32) -> IecResult<()> { Ok(()) }
    fn close(&mut self, _d: u8, _s: u8) -> IecResult<()> { Ok(()) }
}

struct NoopParser;
impl CommandParser<ThreadBackend> for NoopParser {
    fn execute(&mut self, _backend: &mut ThreadBackend, _partition: usize, _command: &[u8]) -> IecError {
        IecError::Ok
    }
}

fn test_config() -> EngineConfig {
    EngineConfig { t_sleep_ms: 5_000, ..EngineConfig::default() }
}

/// S2 (pool/round-trip properties, spec Sec 8): LISTEN 8 + OPEN 0 with
/// filename "TEST" loads a write-mode channel is not under test here --
/// the LOAD path opens for read against a backend file already holding
/// "ABC", then TALK 8 + secondary 0 reads it back byte for byte with EOI
/// on the last byte.
#[test]
fn s2_load_a_short_file_over_the_wire() {
    let engine_lines = SharedLines::new();
    let host_lines = engine_lines.clone();

    let mut backend = ThreadBackend::new();
    backend.file = b"ABC".to_vec();
    let mut engine: Engine<SharedLines, ThreadBackend, 8> = Engine::new(engine_lines, backend, test_config());

    let handle = thread::spawn(move || {
        let mut parser = NoopParser;
        // Session A: LISTEN 8, OPEN 0 ("LOAD" secondary), filename "TEST".
        engine.step(&mut parser);
        // Session B: TALK 8, secondary 0 -- read the file back.
        engine.step(&mut parser);
    });

    // Session A.
    host_send_atn_command(&host_lines, &[0x28, 0xF0]); // LISTEN 8, OPEN 0
    for (i, &b) in b"TEST".iter().enumerate() {
        host_send_byte(&host_lines, b, i == 3);
    }

    // Session B.
    host_send_atn_command(&host_lines, &[0x48, 0x60]); // TALK 8, secondary 0
    let mut received = Vec::new();
    loop {
        let (byte, eoi) = host_recv_byte(&host_lines);
        received.push(byte);
        if eoi {
            break;
        }
    }

    handle.join().unwrap();
    assert_eq!(received, b"ABC");
}

struct ScenarioParser;
impl CommandParser<ThreadBackend> for ScenarioParser {
    fn execute(&mut self, _backend: &mut ThreadBackend, _partition: usize, command: &[u8]) -> IecError {
        if command == b"I" { IecError::Ok } else { IecError::SyntaxUnknown }
    }
}

/// S3 (error channel, spec Sec 7): a command sent to secondary 15 is
/// accumulated as the DOS command line, executed once EOI arrives, and
/// the resulting status formats onto the error channel for the next TALK
/// of secondary 15.
#[test]
fn s3_command_channel_round_trip() {
    let engine_lines = SharedLines::new();
    let host_lines = engine_lines.clone();

    let mut engine: Engine<SharedLines, ThreadBackend, 8> = Engine::new(engine_lines, ThreadBackend::new(), test_config());

    let handle = thread::spawn(move || {
        let mut parser = ScenarioParser;
        // Session A: LISTEN 8, OPEN 15, command text "I".
        engine.step(&mut parser);
        // Session B: TALK 8, secondary 15 -- read the error channel.
        engine.step(&mut parser);
    });

    host_send_atn_command(&host_lines, &[0x28, 0xFF]); // LISTEN 8, OPEN 15
    host_send_byte(&host_lines, b'I', true);

    host_send_atn_command(&host_lines, &[0x48, 0x6F]); // TALK 8, secondary 15
    let mut received = Vec::new();
    loop {
        let (byte, eoi) = host_recv_byte(&host_lines);
        received.push(byte);
        if eoi {
            break;
        }
    }

    handle.join().unwrap();
    assert_eq!(received, b"00, OK,00,00\r");
}
