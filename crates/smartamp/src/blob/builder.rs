//! BlobBuilder — assemble tuning blobs for tests and tooling.
//!
//! Produces bit-exact payloads in the layout the parser reads. Every channel
//! gets a small, recognisable default configuration so tests only spell out
//! what they care about:
//!
//! | Register            | Written by                                  |
//! |---------------------|---------------------------------------------|
//! | [`INIT_MARKER_REG`] | `INITP`: `0xA0 + channel`                   |
//! | [`RESET_REG`]       | `BLKOP.sw_reset`: `0x01`                    |
//! | [`MODE_REG`]        | power-up / mute / power-down: `MODE_*`      |
//! | [`PROFILE_MARKER_REG`] | [`ProfileSpec::marked`] blocks           |
//!
//! `BLKOP.power_check` verifies `MODE_REG == MODE_ACTIVE`.

use alloc::string::String;
use alloc::vec::Vec;

use platform::RegAddr;

use crate::blob::header::{ChannelInfo, FEATURE_INTERRUPTS};
use crate::blob::parsed::{AlgoParam, BlockOps};
use crate::blob::section::SectionTag;
use crate::cmdblock::{CommandBlock, Op};
use crate::config::MAX_SUPPORTED_VERSION;
use crate::hw_params::HardwareParamSet;
use crate::interrupt::InterruptTable;
use crate::kcontrol::{ControlTable, KControl};
use crate::profile::{encode_name, Profile, ProfileTable};

/// Written by the default `INITP` block.
pub const INIT_MARKER_REG: RegAddr = RegAddr::new(0, 0, 0x7E);
/// Written by the default software-reset block.
pub const RESET_REG: RegAddr = RegAddr::new(0, 0, 0x01);
/// Power mode register driven by the default `BLKOP` blocks.
pub const MODE_REG: RegAddr = RegAddr::new(0, 0, 0x02);
/// Written by [`ProfileSpec::marked`] blocks.
pub const PROFILE_MARKER_REG: RegAddr = RegAddr::new(0, 0, 0x7F);

/// [`MODE_REG`] value after power-up.
pub const MODE_ACTIVE: u8 = 0x02;
/// [`MODE_REG`] value after mute.
pub const MODE_MUTE: u8 = 0x01;
/// [`MODE_REG`] value after power-down.
pub const MODE_SHUTDOWN: u8 = 0x03;

/// Single-write block.
#[must_use]
pub fn write_block(addr: RegAddr, value: u8) -> CommandBlock {
    CommandBlock::new(alloc::vec![Op::SingleWrite { addr, value }])
}

/// Header fields to encode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderSpec {
    /// Format version.
    pub version: u32,
    /// Name.
    pub name: String,
    /// Timestamp.
    pub timestamp: u32,
    /// Declared channels.
    pub channels: Vec<ChannelInfo>,
    /// Current-sense width.
    pub iv_width: u8,
    /// Voltage sense enabled.
    pub vbat_enabled: bool,
    /// Feature bits.
    pub features: u32,
    /// Reserved bytes appended after the fields.
    pub reserved: usize,
}

impl HeaderSpec {
    /// Header declaring `channels` channels at addresses `0x4C + n`.
    #[must_use]
    pub fn new(channels: u8) -> Self {
        Self {
            version: MAX_SUPPORTED_VERSION,
            name: String::from("test-blob"),
            timestamp: 0,
            channels: (0..channels)
                .map(|n| ChannelInfo {
                    device_id: 0x2572,
                    bus_address: 0x4C_u32.saturating_add(u32::from(n)),
                })
                .collect(),
            iv_width: 16,
            vbat_enabled: true,
            features: FEATURE_INTERRUPTS,
            reserved: 0,
        }
    }

    /// `HEADR` payload bytes.
    #[must_use]
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&self.version.to_le_bytes());
        out.extend_from_slice(&encode_name(&self.name));
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&u32::try_from(self.channels.len()).unwrap_or(u32::MAX).to_le_bytes());
        for ch in &self.channels {
            out.extend_from_slice(&ch.device_id.to_le_bytes());
            out.extend_from_slice(&ch.bus_address.to_le_bytes());
        }
        out.push(self.iv_width);
        out.push(u8::from(self.vbat_enabled));
        out.extend_from_slice(&self.features.to_le_bytes());
        out.resize(out.len().saturating_add(self.reserved), 0);
        out
    }
}

/// Profile to add to every channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSpec {
    /// Profile contents.
    pub profile: Profile,
}

impl ProfileSpec {
    /// Profile with empty blocks.
    #[must_use]
    pub fn empty(name: &str, capabilities: u32) -> Self {
        Self {
            profile: Profile {
                name: String::from(name),
                capabilities,
                blocks: Default::default(),
            },
        }
    }

    /// Profile whose phase `n` block writes `marker + n` to
    /// [`PROFILE_MARKER_REG`] (pre-up 0, post-up 1, pre-down 2, post-down 3).
    #[must_use]
    pub fn marked(name: &str, capabilities: u32, marker: u8) -> Self {
        let block = |n: u8| write_block(PROFILE_MARKER_REG, marker.wrapping_add(n));
        Self {
            profile: Profile {
                name: String::from(name),
                capabilities,
                blocks: [block(0), block(1), block(2), block(3)],
            },
        }
    }
}

#[derive(Debug, Clone)]
struct ChannelSpec {
    init: CommandBlock,
    hw_params: Option<HardwareParamSet>,
    interrupts: Option<InterruptTable>,
    block_ops: BlockOps,
}

impl ChannelSpec {
    fn new(channel: u8) -> Self {
        Self {
            init: write_block(INIT_MARKER_REG, 0xA0_u8.wrapping_add(channel)),
            hw_params: None,
            interrupts: None,
            block_ops: default_block_ops(),
        }
    }
}

/// Default core sequences (see module docs).
#[must_use]
pub fn default_block_ops() -> BlockOps {
    BlockOps {
        sw_reset: write_block(RESET_REG, 0x01),
        power_up: write_block(MODE_REG, MODE_ACTIVE),
        power_down: write_block(MODE_REG, MODE_SHUTDOWN),
        mute: write_block(MODE_REG, MODE_MUTE),
        power_check: write_block(MODE_REG, MODE_ACTIVE),
    }
}

/// Fluent builder for revision payloads.
///
/// ```
/// use smartamp::blob::builder::BlobBuilder;
/// use smartamp::blob::BlobParser;
///
/// let raw = BlobBuilder::new(2).build();
/// let blob = BlobParser::new().parse(&raw).unwrap();
/// assert_eq!(blob.channel_count(), 2);
/// ```
#[derive(Debug, Clone)]
pub struct BlobBuilder {
    header: HeaderSpec,
    channels: Vec<ChannelSpec>,
    profiles: Vec<Profile>,
    controls: Vec<KControl>,
    algo_params: Option<Vec<AlgoParam>>,
    raw_sections: Vec<([u8; 5], Vec<u8>)>,
}

impl BlobBuilder {
    /// Builder emitting `channels` channels with default content.
    #[must_use]
    pub fn new(channels: u8) -> Self {
        Self {
            header: HeaderSpec::new(channels),
            channels: (0..channels).map(ChannelSpec::new).collect(),
            profiles: Vec::new(),
            controls: Vec::new(),
            algo_params: None,
            raw_sections: Vec::new(),
        }
    }

    /// Replace the header (the emitted channel sections are unchanged).
    #[must_use]
    pub fn header(mut self, header: HeaderSpec) -> Self {
        self.header = header;
        self
    }

    /// Add a profile to every channel. Without any, one empty `"default"`
    /// profile is emitted.
    #[must_use]
    pub fn profile(mut self, spec: ProfileSpec) -> Self {
        self.profiles.push(spec.profile);
        self
    }

    /// Replace a channel's `INITP` block.
    #[must_use]
    pub fn init(mut self, channel: u8, block: CommandBlock) -> Self {
        if let Some(ch) = self.channels.get_mut(usize::from(channel)) {
            ch.init = block;
        }
        self
    }

    /// Emit an `HWPRM` section for a channel.
    #[must_use]
    pub fn hw_params(mut self, channel: u8, set: HardwareParamSet) -> Self {
        if let Some(ch) = self.channels.get_mut(usize::from(channel)) {
            ch.hw_params = Some(set);
        }
        self
    }

    /// Emit an `INTRP` section for a channel.
    #[must_use]
    pub fn interrupts(mut self, channel: u8, table: InterruptTable) -> Self {
        if let Some(ch) = self.channels.get_mut(usize::from(channel)) {
            ch.interrupts = Some(table);
        }
        self
    }

    /// Replace a channel's `BLKOP` blocks.
    #[must_use]
    pub fn block_ops(mut self, channel: u8, ops: BlockOps) -> Self {
        if let Some(ch) = self.channels.get_mut(usize::from(channel)) {
            ch.block_ops = ops;
        }
        self
    }

    /// Add a control (emits `KCNTR`).
    #[must_use]
    pub fn control(mut self, control: KControl) -> Self {
        self.controls.push(control);
        self
    }

    /// Add an algorithm parameter (emits `ALGOP`).
    #[must_use]
    pub fn algo_param(mut self, id: u32, value: u32) -> Self {
        self.algo_params
            .get_or_insert_with(Vec::new)
            .push(AlgoParam { id, value });
        self
    }

    /// Append an arbitrary section after everything else.
    #[must_use]
    pub fn raw_section(mut self, tag: [u8; 5], payload: Vec<u8>) -> Self {
        self.raw_sections.push((tag, payload));
        self
    }

    /// Encode the payload.
    #[must_use]
    pub fn build(&self) -> Vec<u8> {
        let mut out = Vec::new();
        push_section(&mut out, SectionTag::Header.as_bytes(), &self.header.encode());

        let profiles = if self.profiles.is_empty() {
            ProfileTable {
                profiles: alloc::vec![ProfileSpec::empty("default", 0).profile],
            }
        } else {
            ProfileTable {
                profiles: self.profiles.clone(),
            }
        };

        for ch in &self.channels {
            let mut buf = Vec::new();
            ch.init.encode(&mut buf);
            push_section(&mut out, SectionTag::Init.as_bytes(), &buf);

            if let Some(set) = &ch.hw_params {
                buf.clear();
                set.encode(&mut buf);
                push_section(&mut out, SectionTag::HwParams.as_bytes(), &buf);
            }

            buf.clear();
            profiles.encode(&mut buf);
            push_section(&mut out, SectionTag::Profiles.as_bytes(), &buf);

            if let Some(table) = &ch.interrupts {
                buf.clear();
                table.encode(&mut buf);
                push_section(&mut out, SectionTag::Interrupts.as_bytes(), &buf);
            }

            buf.clear();
            ch.block_ops.encode(&mut buf);
            push_section(&mut out, SectionTag::BlockOps.as_bytes(), &buf);
        }

        if !self.controls.is_empty() {
            let mut buf = Vec::new();
            ControlTable {
                controls: self.controls.clone(),
            }
            .encode(&mut buf);
            push_section(&mut out, SectionTag::Controls.as_bytes(), &buf);
        }

        if let Some(params) = &self.algo_params {
            let mut buf = Vec::new();
            buf.extend_from_slice(&u32::try_from(params.len()).unwrap_or(u32::MAX).to_le_bytes());
            for p in params {
                buf.extend_from_slice(&p.id.to_le_bytes());
                buf.extend_from_slice(&p.value.to_le_bytes());
            }
            push_section(&mut out, SectionTag::AlgoParams.as_bytes(), &buf);
        }

        for (tag, payload) in &self.raw_sections {
            push_section(&mut out, tag, payload);
        }
        out
    }
}

/// Append `[tag][u32 len][payload]`.
pub fn push_section(out: &mut Vec<u8>, tag: &[u8; 5], payload: &[u8]) {
    out.extend_from_slice(tag);
    out.extend_from_slice(&u32::try_from(payload.len()).unwrap_or(u32::MAX).to_le_bytes());
    out.extend_from_slice(payload);
}
