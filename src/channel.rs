//! Channel / buffer multiplexer (spec Sec 4.4): binds a fixed buffer to a
//! (device, secondary) pair and is the only caller of backend file
//! operations during a transfer. The bit engine and bus FSM only ever
//! touch buffer memory through this module.

use crate::backend::{FileType, FilesystemBackend};
use crate::buffer::{BufferPool, ChannelKey};
use crate::error::{IecError, IecResult};
use crate::flags::BufferFlags;

/// Mode decoded from the comma-separated suffix of an OPEN filename, e.g.
/// `"TEST,P,W"` (spec Sec 4.4: "name-decoded mode (R/W/A/L) and file type
/// PRG/SEQ/USR/REL/DEL)").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    Read,
    Write { append: bool },
    Relative { recordlen: u16, existing: bool },
}

pub struct ParsedOpen<'a> {
    pub name: &'a [u8],
    pub kind: FileType,
    pub mode: OpenMode,
}

/// Splits `"NAME,TYPE,MODE"` (or `"NAME,L,recordlen"` for relative files)
/// into its parts. Defaults to PRG/Read when a field is omitted, matching
/// real CBM DOS's default for a bare LOAD-style filename.
pub fn parse_open_name(raw: &[u8], default_mode: OpenMode) -> ParsedOpen<'_> {
    let mut parts = raw.split(|&b| b == b',');
    let name = parts.next().unwrap_or(raw);
    let type_field = parts.next();
    let third_field = parts.next();

    if type_field == Some(b"L") {
        let recordlen = third_field
            .map(|f| {
                f.iter().fold(0u16, |acc, &b| {
                    if b.is_ascii_digit() { acc.saturating_mul(10).saturating_add((b - b'0') as u16) } else { acc }
                })
            })
            .unwrap_or(0);
        return ParsedOpen {
            name,
            kind: FileType::Rel,
            mode: OpenMode::Relative { recordlen, existing: third_field.is_none() },
        };
    }

    let kind = match type_field {
        Some(b"P") => FileType::Prg,
        Some(b"S") => FileType::Seq,
        Some(b"U") => FileType::Usr,
        Some(b"D") => FileType::Del,
        _ => FileType::Prg,
    };
    let mode = match third_field {
        Some(b"R") => OpenMode::Read,
        Some(b"W") => OpenMode::Write { append: false },
        Some(b"A") => OpenMode::Write { append: true },
        _ => default_mode,
    };
    ParsedOpen { name, kind, mode }
}

/// Opens a channel against `backend`, resolving `raw_name` per
/// [`parse_open_name`] and allocating a buffer from `pool` bound to
/// `key`. `default_mode` comes from the secondary's role (spec Sec 4.3:
/// 0=LOAD defaults Read, 1=SAVE defaults Write).
pub fn open_channel<B: FilesystemBackend, const N: usize>(
    backend: &mut B,
    pool: &mut BufferPool<N>,
    partition: usize,
    key: ChannelKey,
    raw_name: &[u8],
    default_mode: OpenMode,
) -> IecResult<usize> {
    let parsed = parse_open_name(raw_name, default_mode);
    match parsed.mode {
        OpenMode::Read => {
            backend.open_read(partition, key.device, key.secondary, parsed.name)?;
            let index = pool.alloc_buffer(key, partition)?;
            pool.get_mut(index).unwrap().flags.insert(BufferFlags::READ);
            Ok(index)
        }
        OpenMode::Write { append } => {
            backend.open_write(partition, key.device, key.secondary, parsed.name, parsed.kind, append)?;
            let index = pool.alloc_buffer(key, partition)?;
            pool.get_mut(index).unwrap().flags.insert(BufferFlags::WRITE);
            Ok(index)
        }
        OpenMode::Relative { recordlen, existing } => {
            backend.open_relative(partition, key.device, key.secondary, parsed.name, recordlen, existing)?;
            let index = pool.alloc_buffer(key, partition)?;
            let buf = pool.get_mut(index).unwrap();
            buf.flags.insert(BufferFlags::READ | BufferFlags::WRITE);
            buf.recordlen = recordlen;
            Ok(index)
        }
    }
}

/// Runs the close callback, flushes a dirty write buffer, and frees the
/// buffer unless it is sticky (spec Sec 4.4).
pub fn close_channel<B: FilesystemBackend, const N: usize>(
    backend: &mut B,
    pool: &mut BufferPool<N>,
    key: ChannelKey,
) -> IecResult<()> {
    if let Some(index) = pool.find_buffer(key) {
        let buf = pool.get_mut(index).unwrap();
        if buf.flags.contains(BufferFlags::WRITE) && buf.flags.contains(BufferFlags::DIRTY) {
            let start = crate::buffer::HEADER_LEN;
            let end = buf.position as usize;
            let payload: Vec<u8> = buf.data[start..end].to_vec();
            backend.flush_write(key.device, key.secondary, &payload)?;
        }
        backend.close(key.device, key.secondary)?;
        pool.free_buffer(index);
    }
    Ok(())
}

/// One byte arriving while the device is Listen (spec Sec 4.3 "Addressed
/// as LISTENER"). Secondary 15 never gets a generic buffer: its incoming
/// bytes are the DOS command line, tracked in [`crate::session::SessionContext`]
/// rather than buffer memory, so the error-channel's dedicated sticky
/// buffer (invariant e) stays reserved for the outgoing error string.
pub fn listen_byte<B: FilesystemBackend, const N: usize>(
    backend: &mut B,
    pool: &mut BufferPool<N>,
    key: ChannelKey,
    byte: u8,
) -> IecResult<()> {
    let index = match pool.find_buffer(key) {
        Some(index) => index,
        None => return Ok(()), // no open channel: drop silently (spec Sec 7)
    };
    let buf = pool.get_mut(index).unwrap();
    if buf.is_full() {
        log::debug!("buffer full for device {} secondary {}, flushing before accepting more", key.device, key.secondary);
        let start = crate::buffer::HEADER_LEN;
        let end = buf.position as usize;
        let payload: Vec<u8> = buf.data[start..end].to_vec();
        backend.flush_write(key.device, key.secondary, &payload)?;
        buf.reset_cursor();
    }
    let pos = buf.position as usize;
    buf.data[pos] = byte;
    buf.position += 1;
    buf.lastused = buf.position - 1;
    buf.flags.insert(BufferFlags::DIRTY);
    Ok(())
}

/// Next byte to send while the device is Talk (spec Sec 4.3 "Addressed as
/// TALKER"). Refills from the backend when the buffer is drained; the
/// returned `bool` is the per-byte EOI flag the bit engine must signal.
pub fn talk_byte<B: FilesystemBackend, const N: usize>(
    backend: &mut B,
    pool: &mut BufferPool<N>,
    key: ChannelKey,
) -> IecResult<Option<(u8, bool)>> {
    let index = pool.find_buffer(key).ok_or(IecError::FileNotFound)?;
    {
        let buf = pool.get_mut(index).unwrap();
        if buf.is_drained() && !buf.sendeoi {
            let start = crate::buffer::HEADER_LEN;
            let outcome = backend.refill_read(key.device, key.secondary, &mut buf.data[start..])?;
            buf.position = start as u16;
            buf.lastused = (start + outcome.filled).saturating_sub(1) as u16;
            buf.sendeoi = outcome.eof;
            if outcome.filled == 0 && outcome.eof {
                return Ok(None);
            }
        }
    }
    let buf = pool.get_mut(index).unwrap();
    if buf.is_drained() {
        return Ok(None);
    }
    let pos = buf.position as usize;
    let byte = buf.data[pos];
    let is_last = buf.position == buf.lastused;
    let eoi = is_last && buf.sendeoi;
    buf.position += 1;
    Ok(Some((byte, eoi)))
}

/// Formats the DOS error-channel message (spec Sec 7, S3), e.g.
/// `"00, OK,00,00\r"`. Track/sector are supplied by the caller since only
/// the buffer that raised the error knows them; they default to 0.
pub fn format_error_message(error: IecError, track: u8, sector: u8) -> Vec<u8> {
    let (code, text) = error.code_and_text();
    format!("{:02}, {},{:02},{:02}\r", code, text, track, sector).into_bytes()
}

/// Writes a freshly formatted error message into the sticky command-channel
/// buffer's payload (invariant e), replacing whatever was there.
pub fn arm_error_message<const N: usize>(pool: &mut BufferPool<N>, key: ChannelKey, error: IecError) {
    if let Some(buf) = pool.find_buffer_mut(key) {
        let message = format_error_message(error, 0, 0);
        let start = crate::buffer::HEADER_LEN;
        let end = (start + message.len()).min(crate::buffer::BUFFER_SIZE);
        buf.data[start..end].copy_from_slice(&message[..end - start]);
        buf.position = start as u16;
        buf.lastused = (end - 1) as u16;
        buf.sendeoi = true;
    }
}

/// The DOS command parser (spec Sec 6, external collaborator): executes a
/// command line accumulated on the command channel and returns the error
/// kind to arm for the next read of secondary 15.
pub trait CommandParser<B: FilesystemBackend> {
    fn execute(&mut self, backend: &mut B, partition: usize, command: &[u8]) -> IecError;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{DirEntry, RefillOutcome};

    struct MemBackend {
        file: Vec<u8>,
        write_calls: Vec<Vec<u8>>,
        cursor: usize,
    }

    impl FilesystemBackend for MemBackend {
        fn open_read(&mut self, _p: usize, _d: u8, _s: u8, _name: &[u8]) -> IecResult<DirEntry> {
            self.cursor = 0;
            Ok(DirEntry { name: [0; 16], name_len: 0, size_blocks: 0, kind: FileType::Prg, locked: false })
        }
        fn open_write(&mut self, _p: usize, _d: u8, _s: u8, _name: &[u8], _k: FileType, _a: bool) -> IecResult<DirEntry> {
            Ok(DirEntry { name: [0; 16], name_len: 0, size_blocks: 0, kind: FileType::Prg, locked: false })
        }
        fn open_relative(&mut self, _p: usize, _d: u8, _s: u8, _name: &[u8], _r: u16, _e: bool) -> IecResult<DirEntry> {
            Ok(DirEntry { name: [0; 16], name_len: 0, size_blocks: 0, kind: FileType::Rel, locked: false })
        }
        fn readdir(&mut self, _p: usize, _path: &[u8]) -> IecResult<Vec<DirEntry>> { Ok(Vec::new()) }
        fn delete(&mut self, _p: usize, _path: &[u8], _name: &[u8]) -> IecResult<()> { Ok(()) }
        fn mkdir(&mut self, _p: usize, _path: &[u8], _name: &[u8]) -> IecResult<()> { Ok(()) }
        fn chdir(&mut self, _p: usize, _path: &[u8]) -> IecResult<()> { Ok(()) }
        fn rename(&mut self, _p: usize, _path: &[u8], _f: &[u8], _t: &[u8]) -> IecResult<()> { Ok(()) }
        fn freeblocks(&mut self, _p: usize) -> IecResult<u32> { Ok(0) }
        fn diskname(&mut self, _p: usize) -> IecResult<[u8; 16]> { Ok([0; 16]) }
        fn diskid(&mut self, _p: usize) -> IecResult<[u8; 5]> { Ok([0; 5]) }
        fn read_sector(&mut self, _p: usize, _t: u8, _s: u8, _out: &mut [u8]) -> IecResult<()> { Ok(()) }
        fn write_sector(&mut self, _p: usize, _t: u8, _s: u8, _data: &[u8]) -> IecResult<()> { Ok(()) }
        fn refill_read(&mut self, _d: u8, _s: u8, buf: &mut [u8]) -> IecResult<RefillOutcome> {
            let remaining = &self.file[self.cursor..];
            let n = remaining.len().min(buf.len());
            buf[..n].copy_from_slice(&remaining[..n]);
            self.cursor += n;
            Ok(RefillOutcome { filled: n, eof: self.cursor >= self.file.len() })
        }
        fn flush_write(&mut self, _d: u8, _s: u8, buf: &[u8]) -> IecResult<()> {
            self.write_calls.push(buf.to_vec());
            Ok(())
        }
        fn seek(&mut self, _d: u8, _s: u8, _record: u32) -> IecResult<()> { Ok(()) }
        fn close(&mut self, _d: u8, _s: u8) -> IecResult<()> { Ok(()) }
    }

    fn key() -> ChannelKey { ChannelKey { device: 8, secondary: 2 } }

    #[test]
    fn parses_name_type_and_mode_suffix() {
        let parsed = parse_open_name(b"TEST,P,W", OpenMode::Read);
        assert_eq!(parsed.name, b"TEST");
        assert_eq!(parsed.kind, FileType::Prg);
        assert_eq!(parsed.mode, OpenMode::Write { append: false });
    }

    #[test]
    fn bare_name_falls_back_to_default_mode() {
        let parsed = parse_open_name(b"TEST", OpenMode::Read);
        assert_eq!(parsed.name, b"TEST");
        assert_eq!(parsed.kind, FileType::Prg);
        assert_eq!(parsed.mode, OpenMode::Read);
    }

    #[test]
    fn write_then_read_round_trips_through_backend() {
        let mut backend = MemBackend { file: Vec::new(), write_calls: Vec::new(), cursor: 0 };
        let mut pool: BufferPool<8> = BufferPool::new();

        let idx = open_channel(&mut backend, &mut pool, 0, key(), b"TEST,P,W", OpenMode::Write { append: false }).unwrap();
        for &b in b"ABC" {
            listen_byte(&mut backend, &mut pool, key(), b).unwrap();
        }
        let _ = idx;
        close_channel(&mut backend, &mut pool, key()).unwrap();
        assert_eq!(backend.write_calls[0], b"ABC");

        backend.file = b"ABC".to_vec();
        backend.cursor = 0;
        open_channel(&mut backend, &mut pool, 0, key(), b"TEST,P,R", OpenMode::Read).unwrap();
        let mut out = Vec::new();
        loop {
            match talk_byte(&mut backend, &mut pool, key()).unwrap() {
                Some((b, eoi)) => {
                    out.push(b);
                    if eoi { break; }
                }
                None => break,
            }
        }
        assert_eq!(out, b"ABC");
    }

    #[test]
    fn unopened_secondary_drops_listen_bytes() {
        let mut backend = MemBackend { file: Vec::new(), write_calls: Vec::new(), cursor: 0 };
        let mut pool: BufferPool<8> = BufferPool::new();
        assert!(listen_byte(&mut backend, &mut pool, key(), 0x41).is_ok());
    }

    #[test]
    fn error_message_matches_ok_format() {
        let msg = format_error_message(IecError::Ok, 0, 0);
        assert_eq!(msg, b"00, OK,00,00\r");
    }
}
