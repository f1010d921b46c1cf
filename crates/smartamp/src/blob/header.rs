//! `HEADR` payload.
//!
//! ```text
//! [0..4]    version          u32   (checked before anything else)
//! [4..68]   name             [u8; 64] NUL-padded UTF-8
//! [68..72]  timestamp        u32
//! [72..76]  channel_count    u32   (1..=MAX_CHANNELS)
//! ...       channel_count × { device_id u32, bus_address u32 }
//! ...       iv_width         u8
//! ...       vbat_enabled     u8
//! ...       features         u32   (bit 0: interrupts supported)
//! ...       reserved         ignored up to the section length
//! ```

use alloc::string::String;

use heapless::Vec as HVec;

use crate::blob::cursor::{ByteCursor, NAME_LEN};
use crate::config::{MAX_CHANNELS, MAX_SUPPORTED_VERSION};
use crate::error::ParseError;

/// Feature bit: the blob carries interrupt tables the driver should use.
pub const FEATURE_INTERRUPTS: u32 = 1 << 0;

const CHANNEL_COUNT_OFFSET: usize = 4 + NAME_LEN + 4;

/// Identity of one amplifier channel as declared by the blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelInfo {
    /// Device identifier.
    pub device_id: u32,
    /// Bus address the channel answers on.
    pub bus_address: u32,
}

/// Parsed blob header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHeader {
    /// Format version.
    pub version: u32,
    /// Free-form name.
    pub name: String,
    /// Authoring timestamp (seconds).
    pub timestamp: u32,
    /// Declared channels, in channel order.
    pub channels: HVec<ChannelInfo, MAX_CHANNELS>,
    /// Current-sense bit width.
    pub iv_width: u8,
    /// Voltage-sense enabled.
    pub vbat_enabled: bool,
    /// Feature bitmask.
    pub features: u32,
}

impl BlobHeader {
    /// Decode a `HEADR` payload.
    ///
    /// The version is checked first; a newer blob is rejected before any
    /// other field is read.
    pub fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let version = c.u32_le()?;
        if version > MAX_SUPPORTED_VERSION {
            return Err(ParseError::UnsupportedVersion {
                found: version,
                supported: MAX_SUPPORTED_VERSION,
            });
        }
        let name = c.name64()?;
        let timestamp = c.u32_le()?;
        let count = c.u32_le()?;
        if count == 0 || usize::try_from(count).map_or(true, |n| n > MAX_CHANNELS) {
            return Err(ParseError::BadChannelCount(count));
        }
        let mut channels = HVec::new();
        for _ in 0..count {
            let info = ChannelInfo {
                device_id: c.u32_le()?,
                bus_address: c.u32_le()?,
            };
            channels
                .push(info)
                .map_err(|_| ParseError::BadChannelCount(count))?;
        }
        let iv_width = c.u8()?;
        let vbat_enabled = c.u8()? != 0;
        let features = c.u32_le()?;
        // Reserved tail.
        c.rest();
        Ok(Self {
            version,
            name,
            timestamp,
            channels,
            iv_width,
            vbat_enabled,
            features,
        })
    }

    /// Number of declared channels.
    #[must_use]
    pub fn channel_count(&self) -> u8 {
        // Bounded by MAX_CHANNELS.
        u8::try_from(self.channels.len()).unwrap_or(u8::MAX)
    }

    /// `true` when the blob carries interrupt tables.
    #[must_use]
    pub fn interrupts_supported(&self) -> bool {
        self.features & FEATURE_INTERRUPTS != 0
    }

    /// Channel count read straight from a `HEADR` payload without validating
    /// anything else.
    #[must_use]
    pub fn peek_channel_count(payload: &[u8]) -> Option<u32> {
        let mut c = ByteCursor::new(payload);
        c.skip(CHANNEL_COUNT_OFFSET).ok()?;
        c.u32_le().ok()
    }
}
