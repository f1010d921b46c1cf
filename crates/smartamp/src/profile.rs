//! Profiles: named power-transition command blocks plus capability bits.
//!
//! `PROFP` payload: `u32 n, n × { name, u32 capabilities, CommandBlock × 4 }`
//! with the blocks in [`ProfilePhase`] order.
//!
//! Capability bits:
//!
//! | Bits  | Meaning                                               |
//! |-------|-------------------------------------------------------|
//! | 0..=3 | channels taking part in power requests (0 = all)      |
//! | 4     | algorithm-control bypass                              |
//! | 5     | clear and re-arm current/voltage sense on power-up    |
//!
//! Every channel stores its own copy of the table; channel 0's copy is the
//! authority for the capability bits.

use alloc::string::String;
use alloc::vec::Vec;

use platform::RegisterBus;

use crate::blob::cursor::{ByteCursor, NAME_LEN};
use crate::blob::ParsedBlob;
use crate::cmdblock::CommandBlock;
use crate::error::{OpError, ParseError, RangeError};
use crate::interpreter::Interpreter;

/// Channel-mask bits of the capability word.
pub const CAP_CHANNEL_MASK: u32 = 0x0F;
/// Algorithm-control bypass.
pub const CAP_ALGO_BYPASS: u32 = 1 << 4;
/// Clear and re-arm IV/VBat sense before powering up.
pub const CAP_REARM_IV_SENSE: u32 = 1 << 5;

/// Power-transition point a profile block belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfilePhase {
    /// Before the core power-up sequence.
    PrePowerUp,
    /// After the core power-up sequence.
    PostPowerUp,
    /// Before the core power-down sequence.
    PrePowerDown,
    /// After the core power-down sequence.
    PostPowerDown,
}

impl ProfilePhase {
    /// Phases in on-disk order.
    pub const ALL: [Self; 4] = [
        Self::PrePowerUp,
        Self::PostPowerUp,
        Self::PrePowerDown,
        Self::PostPowerDown,
    ];
}

/// One named profile.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Profile {
    /// Display name.
    pub name: String,
    /// Capability bits (see module docs).
    pub capabilities: u32,
    /// Blocks indexed by [`ProfilePhase`].
    pub blocks: [CommandBlock; 4],
}

impl Profile {
    /// Block for `phase`.
    #[must_use]
    pub fn block(&self, phase: ProfilePhase) -> &CommandBlock {
        match phase {
            ProfilePhase::PrePowerUp => &self.blocks[0],
            ProfilePhase::PostPowerUp => &self.blocks[1],
            ProfilePhase::PrePowerDown => &self.blocks[2],
            ProfilePhase::PostPowerDown => &self.blocks[3],
        }
    }

    /// Channel mask with "0 means all" expanded for `channel_count` channels.
    #[must_use]
    pub fn channel_mask(&self, channel_count: u8) -> u8 {
        let all = all_channels(channel_count);
        // Masked to 4 bits.
        #[allow(clippy::cast_possible_truncation)]
        let mask = (self.capabilities & CAP_CHANNEL_MASK) as u8;
        if mask == 0 {
            all
        } else {
            mask & all
        }
    }
}

/// Bitmask with the low `channel_count` bits set.
#[must_use]
pub fn all_channels(channel_count: u8) -> u8 {
    1u8.checked_shl(u32::from(channel_count))
        .map_or(u8::MAX, |b| b.wrapping_sub(1))
}

/// A channel's profiles in authoring order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProfileTable {
    /// Profiles.
    pub profiles: Vec<Profile>,
}

impl ProfileTable {
    /// Number of profiles.
    #[must_use]
    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    /// `true` with no profiles.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }

    /// Profile at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Profile> {
        self.profiles.get(index)
    }

    /// Decode a `PROFP` payload.
    pub fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let n = c.count()?;
        let mut profiles = Vec::with_capacity(n);
        for _ in 0..n {
            let name = c.name64()?;
            let capabilities = c.u32_le()?;
            let blocks = [
                CommandBlock::decode(c)?,
                CommandBlock::decode(c)?,
                CommandBlock::decode(c)?,
                CommandBlock::decode(c)?,
            ];
            profiles.push(Profile {
                name,
                capabilities,
                blocks,
            });
        }
        Ok(Self { profiles })
    }

    /// Append the `PROFP` payload encoding.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&u32::try_from(self.profiles.len()).unwrap_or(u32::MAX).to_le_bytes());
        for p in &self.profiles {
            out.extend_from_slice(&encode_name(&p.name));
            out.extend_from_slice(&p.capabilities.to_le_bytes());
            for block in &p.blocks {
                block.encode(out);
            }
        }
    }
}

/// NUL-padded 64-byte name field (longer names are cut).
#[must_use]
pub fn encode_name(name: &str) -> [u8; NAME_LEN] {
    let mut raw = [0u8; NAME_LEN];
    for (dst, src) in raw.iter_mut().zip(name.as_bytes()) {
        *dst = *src;
    }
    raw
}

/// Applies the active profile's blocks through the interpreter.
pub struct ProfileManager<'a, B> {
    blob: &'a ParsedBlob,
    active: usize,
    interp: Interpreter<'a, B>,
}

impl<'a, B: RegisterBus> ProfileManager<'a, B> {
    /// Manager for `blob` with `active` selected.
    pub fn new(blob: &'a ParsedBlob, active: usize, interp: Interpreter<'a, B>) -> Self {
        Self {
            blob,
            active,
            interp,
        }
    }

    /// Selected profile index.
    pub fn active(&self) -> usize {
        self.active
    }

    /// Number of profiles (channel 0's table).
    pub fn profile_count(&self) -> usize {
        self.blob.channel(0).map_or(0, |t| t.profiles.len())
    }

    /// Select profile `index`.
    pub fn set_active(&mut self, index: usize) -> Result<(), RangeError> {
        let count = self.profile_count();
        if index >= count {
            return Err(RangeError::Profile { index, count });
        }
        self.active = index;
        Ok(())
    }

    /// Capability bits of the active profile (channel 0's copy).
    pub fn capability_bitmask(&self) -> u32 {
        self.blob
            .channel(0)
            .and_then(|t| t.profiles.get(self.active))
            .map_or(0, |p| p.capabilities)
    }

    /// Channels the active profile lets power requests touch.
    pub fn channel_mask(&self) -> u8 {
        let count = self.blob.header.channel_count();
        self.blob
            .channel(0)
            .and_then(|t| t.profiles.get(self.active))
            .map_or(all_channels(count), |p| p.channel_mask(count))
    }

    /// Execute the active profile's `phase` block on `channel`.
    ///
    /// A channel without the active profile (shorter table) is a no-op.
    pub async fn apply(&self, phase: ProfilePhase, channel: u8) -> Result<(), OpError> {
        let Some(profile) = self
            .blob
            .channel(channel)
            .and_then(|t| t.profiles.get(self.active))
        else {
            return Ok(());
        };
        tracing::debug!(channel, profile = %profile.name, ?phase, "apply profile block");
        self.interp.execute(profile.block(phase), channel).await
    }

    /// Pre-power-up block.
    pub async fn apply_pre_power_up(&self, channel: u8) -> Result<(), OpError> {
        self.apply(ProfilePhase::PrePowerUp, channel).await
    }

    /// Post-power-up block.
    pub async fn apply_post_power_up(&self, channel: u8) -> Result<(), OpError> {
        self.apply(ProfilePhase::PostPowerUp, channel).await
    }

    /// Pre-power-down block.
    pub async fn apply_pre_power_down(&self, channel: u8) -> Result<(), OpError> {
        self.apply(ProfilePhase::PrePowerDown, channel).await
    }

    /// Post-power-down block.
    pub async fn apply_post_power_down(&self, channel: u8) -> Result<(), OpError> {
        self.apply(ProfilePhase::PostPowerDown, channel).await
    }
}
