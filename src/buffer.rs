//! The buffer pool (spec Sec 3 "Buffer", invariants a-d) -- a fixed array
//! of `N` slots scanned linearly on allocate/free, the same shape
//! `xous-api-susres`'s `RegManager<const N: usize>` uses for its own fixed
//! pool of managed registers.

use crate::flags::BufferFlags;

/// Payload area size (spec Sec 3): byte 0 and 1 are a 2-byte header,
/// payload occupies 2..256.
pub const BUFFER_SIZE: usize = 256;
pub const HEADER_LEN: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelKey {
    pub device: u8,
    pub secondary: u8,
}

#[derive(Clone, Copy)]
pub struct Buffer {
    pub data: [u8; BUFFER_SIZE],
    /// Next payload byte to consume (read) or fill (write).
    pub position: u16,
    /// Index of the final valid payload byte.
    pub lastused: u16,
    /// Set when the last byte of the final record is about to be sent.
    pub sendeoi: bool,
    pub owner: Option<ChannelKey>,
    pub flags: BufferFlags,
    /// Relative-file record size; 0 for sequential.
    pub recordlen: u16,
    /// Logical file position, excluding any container/wrapper header.
    pub fptr: u32,
    /// Which partition this buffer's channel was opened against, so the
    /// multiplexer knows where to route directory-level operations.
    pub partition: usize,
}

impl Buffer {
    fn empty() -> Self {
        Buffer {
            data: [0u8; BUFFER_SIZE],
            position: HEADER_LEN as u16,
            lastused: HEADER_LEN as u16 - 1,
            sendeoi: false,
            owner: None,
            flags: BufferFlags::empty(),
            recordlen: 0,
            fptr: 0,
            partition: 0,
        }
    }

    pub fn payload(&self) -> &[u8] {
        &self.data[self.position as usize..=self.lastused as usize]
    }

    pub fn is_drained(&self) -> bool {
        self.position as usize > self.lastused as usize
    }

    pub fn is_full(&self) -> bool {
        self.position as usize > BUFFER_SIZE - 1
    }

    /// Reset the payload cursors for a fresh fill, keeping the binding and
    /// flags. Used by OPEN and by refill after a flush.
    pub fn reset_cursor(&mut self) {
        self.position = HEADER_LEN as u16;
        self.lastused = HEADER_LEN as u16 - 1;
        self.sendeoi = false;
    }
}

/// Fixed pool of `N` buffers (spec Sec 3: "N>=8, config"). `alloc_buffer`
/// and `find_buffer` scan linearly the way `RegManager::push` scans its
/// `[Option<ManagedReg>; N]` for the first free slot.
pub struct BufferPool<const N: usize> {
    slots: [Option<Buffer>; N],
}

impl<const N: usize> BufferPool<N> {
    pub fn new() -> Self {
        BufferPool { slots: [None; N] }
    }

    pub fn find_buffer(&self, key: ChannelKey) -> Option<usize> {
        self.slots.iter().position(|slot| matches!(slot, Some(b) if b.owner == Some(key)))
    }

    pub fn find_buffer_mut(&mut self, key: ChannelKey) -> Option<&mut Buffer> {
        self.slots.iter_mut().flatten().find(|b| b.owner == Some(key))
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut Buffer> {
        self.slots.get_mut(index).and_then(|s| s.as_mut())
    }

    /// Invariant (a): at most one buffer per (device,secondary) may be
    /// allocated at a time.
    pub fn alloc_buffer(&mut self, key: ChannelKey, partition: usize) -> Result<usize, crate::error::IecError> {
        if self.find_buffer(key).is_some() {
            return Err(crate::error::IecError::FileExists);
        }
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if slot.is_none() {
                let mut buf = Buffer::empty();
                buf.owner = Some(key);
                buf.partition = partition;
                buf.flags.insert(BufferFlags::ALLOCATED);
                *slot = Some(buf);
                return Ok(index);
            }
        }
        Err(crate::error::IecError::BuffersFull)
    }

    /// No-op if the buffer is sticky (spec Sec 3 invariant d) or absent.
    pub fn free_buffer(&mut self, index: usize) {
        if let Some(buf) = &self.slots[index] {
            if buf.flags.contains(BufferFlags::STICKY) {
                return;
            }
        }
        self.slots[index] = None;
    }

    /// Free every non-sticky buffer (ATN-session reset or bus reset, spec
    /// Sec 3 "Lifecycle", Sec 5 "Cancellation").
    pub fn free_all_non_sticky(&mut self) {
        for slot in self.slots.iter_mut() {
            let sticky = slot.as_ref().map(|b| b.flags.contains(BufferFlags::STICKY)).unwrap_or(false);
            if !sticky {
                *slot = None;
            }
        }
    }

    pub fn allocated_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }
}

impl<const N: usize> Default for BufferPool<N> {
    fn default() -> Self { Self::new() }
}
