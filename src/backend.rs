//! Filesystem backend contract (spec Sec 6) -- the external collaborator
//! that owns storage, image containers (D64/M2I) and the P00 wrapper. The
//! channel multiplexer (`channel.rs`) is the *only* caller of these methods
//! during a transfer; the bit engine only ever touches buffer memory.

use crate::error::IecResult;

/// Commodore file type, decoded from the OPEN filename by the (external)
/// name parser before `open_*` is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Prg,
    Seq,
    Usr,
    Rel,
    Del,
}

/// Which concrete container a partition is backed by (spec Sec 9 design
/// note: "a small tagged variant with a dispatch table per variant"). The
/// engine only ever calls through [`FilesystemBackend`]; this tag is
/// carried alongside a partition purely so the main loop and command
/// parser can special-case things like the C128 boot sector per backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    Vfs,
    D64,
    M2I,
    EepromFs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    pub name: [u8; 16],
    pub name_len: u8,
    /// Size in 254-byte blocks, as shown in a Commodore directory listing.
    pub size_blocks: u16,
    pub kind: FileType,
    pub locked: bool,
}

impl DirEntry {
    pub fn name(&self) -> &[u8] {
        &self.name[..self.name_len as usize]
    }
}

/// Result of a read-side refill (spec Sec 4.4): how many bytes landed in
/// the buffer, and whether the backend has no more payload after them.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefillOutcome {
    pub filled: usize,
    pub eof: bool,
}

/// The filesystem backend contract (spec Sec 6). Implementations own
/// per-(device,secondary) open-file state internally -- buffers never hold
/// backend state directly (spec Sec 9 "cyclic dependencies": buffers refer
/// to backends only through this trait plus the (device,secondary) key,
/// never through a stored reference).
pub trait FilesystemBackend {
    fn open_read(&mut self, partition: usize, device: u8, secondary: u8, name: &[u8]) -> IecResult<DirEntry>;
    fn open_write(
        &mut self,
        partition: usize,
        device: u8,
        secondary: u8,
        name: &[u8],
        kind: FileType,
        append: bool,
    ) -> IecResult<DirEntry>;
    fn open_relative(
        &mut self,
        partition: usize,
        device: u8,
        secondary: u8,
        name: &[u8],
        recordlen: u16,
        existing: bool,
    ) -> IecResult<DirEntry>;

    fn readdir(&mut self, partition: usize, path: &[u8]) -> IecResult<Vec<DirEntry>>;
    fn delete(&mut self, partition: usize, path: &[u8], name: &[u8]) -> IecResult<()>;
    fn mkdir(&mut self, partition: usize, path: &[u8], name: &[u8]) -> IecResult<()>;
    fn chdir(&mut self, partition: usize, path: &[u8]) -> IecResult<()>;
    fn rename(&mut self, partition: usize, path: &[u8], from: &[u8], to: &[u8]) -> IecResult<()>;
    fn freeblocks(&mut self, partition: usize) -> IecResult<u32>;
    fn diskname(&mut self, partition: usize) -> IecResult<[u8; 16]>;
    fn diskid(&mut self, partition: usize) -> IecResult<[u8; 5]>;

    /// Direct-sector access for the single special file serving as the
    /// C128 boot sector (spec Sec 6).
    fn read_sector(&mut self, partition: usize, track: u8, sector: u8, out: &mut [u8]) -> IecResult<()>;
    fn write_sector(&mut self, partition: usize, track: u8, sector: u8, data: &[u8]) -> IecResult<()>;

    /// Producer for a read buffer (spec Sec 4.4): fill as much of `buf` as
    /// is available for this open channel.
    fn refill_read(&mut self, device: u8, secondary: u8, buf: &mut [u8]) -> IecResult<RefillOutcome>;
    /// Consumer for a write buffer: accept a full (or final, partial)
    /// buffer's worth of payload.
    fn flush_write(&mut self, device: u8, secondary: u8, buf: &[u8]) -> IecResult<()>;
    /// Random-access seek for a REL-file buffer.
    fn seek(&mut self, device: u8, secondary: u8, record: u32) -> IecResult<()>;
    /// Close/cleanup callback, run once on channel close.
    fn close(&mut self, device: u8, secondary: u8) -> IecResult<()>;
}
