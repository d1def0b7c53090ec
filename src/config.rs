//! The engine's configuration blob (spec Sec 6 "Control surface").
//!
//! Persisted configuration is guarded by a struct-size check and a CRC32
//! checksum, the same two-gate pattern `pddb`'s `fastspace.rs` uses to
//! reject a partially-written `SpaceUpdate` record before trusting it.

use crc::{crc32, Hasher32};

/// Device addresses below this are reserved on a real IEC bus.
pub const MIN_DEVICE_ADDRESS: u8 = 8;
pub const MAX_DEVICE_ADDRESS: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    pub device_address: u8,
    pub jiffy_enabled: bool,
    pub vc20_mode: bool,
    pub buffer_count: u8,
    pub err_buf_size: u16,
    pub cmd_buf_size: u16,
    pub t_bit_us: u32,
    pub t_eoi_us: u32,
    pub t_frame_us: u32,
    pub t_sleep_ms: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            device_address: MIN_DEVICE_ADDRESS,
            jiffy_enabled: true,
            vc20_mode: false,
            buffer_count: 8,
            err_buf_size: 64,
            cmd_buf_size: 128,
            t_bit_us: 150,
            t_eoi_us: 200,
            t_frame_us: 1_000,
            t_sleep_ms: 1_000,
        }
    }
}

impl EngineConfig {
    /// Struct-size guard value baked into the persisted blob; bumped
    /// whenever a field is added or reordered so stale blobs are rejected
    /// instead of misread.
    const STRUCTSIZE: u16 = core::mem::size_of::<EngineConfig>() as u16;

    fn serialize_fields(&self) -> [u8; 12] {
        let mut buf = [0u8; 12];
        buf[0] = self.device_address;
        buf[1] = self.jiffy_enabled as u8;
        buf[2] = self.vc20_mode as u8;
        buf[3] = self.buffer_count;
        buf[4..6].copy_from_slice(&self.err_buf_size.to_le_bytes());
        buf[6..8].copy_from_slice(&self.cmd_buf_size.to_le_bytes());
        buf[8..12].copy_from_slice(&self.t_bit_us.to_le_bytes());
        buf
    }

    /// Encode this config plus its structsize guard and CRC32 into a flat
    /// byte blob suitable for handing to persistent storage (an external
    /// collaborator per spec.md Sec 6).
    pub fn to_blob(&self) -> ConfigBlob {
        let mut digest = crc32::Digest::new(crc32::IEEE);
        let fields = self.serialize_fields();
        digest.write(&fields);
        digest.write(&self.t_eoi_us.to_le_bytes());
        digest.write(&self.t_frame_us.to_le_bytes());
        digest.write(&self.t_sleep_ms.to_le_bytes());
        ConfigBlob { structsize: Self::STRUCTSIZE, config: *self, checksum: digest.sum32() }
    }

    /// Validate a persisted blob's structsize and checksum guards (spec
    /// Sec 8 property 6). Either mismatch yields `None`, and the caller
    /// (main loop init) falls back to `EngineConfig::default()`.
    pub fn from_blob(blob: &ConfigBlob) -> Option<EngineConfig> {
        if blob.structsize != Self::STRUCTSIZE {
            return None;
        }
        let recomputed = blob.config.to_blob();
        if recomputed.checksum != blob.checksum {
            return None;
        }
        if blob.config.device_address < MIN_DEVICE_ADDRESS
            || blob.config.device_address > MAX_DEVICE_ADDRESS
        {
            return None;
        }
        Some(blob.config)
    }
}

/// The on-the-wire/on-disk representation: structsize guard, payload, then
/// a checksum over both. A consumer loads this from NVM and calls
/// `EngineConfig::from_blob`.
#[derive(Debug, Clone, Copy)]
pub struct ConfigBlob {
    pub structsize: u16,
    pub config: EngineConfig,
    pub checksum: u32,
}
