//! Hardware-parameter tables and IV/VBat slot negotiation.
//!
//! `HWPRM` payload:
//! ```text
//! 8 × (one per HwField, in HwField::ALL order):
//!     u32 default_index, u32 count, count × { u32 variant, CommandBlock }
//! u32 n, n × { [u8; 16] key, CommandBlock }      IV/VBat slot configurations
//! ```
//!
//! The resolver only picks blocks; callers hand them to the interpreter.

use alloc::vec::Vec;
use core::fmt;
use core::fmt::Write as _;

use heapless::String as HString;

use crate::blob::cursor::ByteCursor;
use crate::cmdblock::CommandBlock;
use crate::error::{DeviceError, ParseError};

/// Length of an IV/VBat slot-configuration key field.
pub const SLOT_KEY_LEN: usize = 16;

/// Slot key, sized to the on-disk field so every key survives encoding.
pub type SlotKey = HString<SLOT_KEY_LEN>;

/// Current-sense widths tried, widest first, when the requested one is not
/// authored.
pub const IV_WIDTH_LADDER: [u8; 3] = [16, 12, 8];

/// Audio-interface parameter with per-variant command blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HwField {
    /// Sample rate in Hz.
    SampleRate,
    /// Clock / frame-sync inversion.
    FmtInversion,
    /// Interface format (I²S, left-justified, DSP...).
    FmtMask,
    /// Receive slot count.
    RxSlots,
    /// Transmit slot count.
    TxSlots,
    /// Receive sample bit width.
    RxBitwidth,
    /// Receive slot length.
    RxSlotLen,
    /// Transmit slot length.
    TxSlotLen,
}

impl HwField {
    /// Fields in on-disk order.
    pub const ALL: [Self; 8] = [
        Self::SampleRate,
        Self::FmtInversion,
        Self::FmtMask,
        Self::RxSlots,
        Self::TxSlots,
        Self::RxBitwidth,
        Self::RxSlotLen,
        Self::TxSlotLen,
    ];

    /// Position in [`HwField::ALL`].
    #[must_use]
    pub const fn index(self) -> usize {
        self as usize
    }

    /// Short lowercase name.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::SampleRate => "sample-rate",
            Self::FmtInversion => "fmt-inversion",
            Self::FmtMask => "fmt-mask",
            Self::RxSlots => "rx-slots",
            Self::TxSlots => "tx-slots",
            Self::RxBitwidth => "rx-bitwidth",
            Self::RxSlotLen => "rx-slot-length",
            Self::TxSlotLen => "tx-slot-length",
        }
    }
}

impl fmt::Display for HwField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Requested variant of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Variant {
    /// A concrete value (e.g. 48000 for the sample rate).
    Value(u32),
    /// The blob's designated default entry.
    Default,
}

/// Variant blocks for one field.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ParamTable {
    /// Index into `entries` used for [`Variant::Default`].
    pub default_index: u32,
    /// `(variant value, block)` in authoring order.
    pub entries: Vec<(u32, CommandBlock)>,
}

impl ParamTable {
    /// Block for `variant`, if authored.
    #[must_use]
    pub fn select(&self, variant: Variant) -> Option<&CommandBlock> {
        match variant {
            Variant::Value(v) => self.entries.iter().find(|(value, _)| *value == v).map(|(_, b)| b),
            Variant::Default => usize::try_from(self.default_index)
                .ok()
                .and_then(|i| self.entries.get(i))
                .map(|(_, b)| b),
        }
    }

    fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let default_index = c.u32_le()?;
        let count = c.count()?;
        let mut entries = Vec::with_capacity(count);
        for _ in 0..count {
            let value = c.u32_le()?;
            entries.push((value, CommandBlock::decode(c)?));
        }
        Ok(Self {
            default_index,
            entries,
        })
    }

    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&self.default_index.to_le_bytes());
        out.extend_from_slice(&len_u32(self.entries.len()).to_le_bytes());
        for (value, block) in &self.entries {
            out.extend_from_slice(&value.to_le_bytes());
            block.encode(out);
        }
    }
}

/// Pre-authored IV/VBat slot configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IvSlotConfig {
    /// Key such as `"12_TDM_02_12_1"`.
    pub key: SlotKey,
    /// Block programming that configuration.
    pub block: CommandBlock,
}

/// Per-channel hardware-parameter tables.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HardwareParamSet {
    tables: [ParamTable; 8],
    /// Authored IV/VBat slot configurations, in authoring order.
    pub slot_configs: Vec<IvSlotConfig>,
}

impl HardwareParamSet {
    /// Set built from per-field tables (in [`HwField::ALL`] order).
    #[must_use]
    pub fn new(tables: [ParamTable; 8], slot_configs: Vec<IvSlotConfig>) -> Self {
        Self {
            tables,
            slot_configs,
        }
    }

    /// Table for one field.
    #[must_use]
    pub fn table(&self, field: HwField) -> Option<&ParamTable> {
        self.tables.get(field.index())
    }

    /// Resolve `variant` of `field` to its block.
    ///
    /// Unmapped values are an error, never a silent fallback to the default.
    pub fn select(&self, field: HwField, variant: Variant) -> Result<&CommandBlock, DeviceError> {
        self.table(field)
            .and_then(|t| t.select(variant))
            .ok_or_else(|| DeviceError::UnsupportedParameter {
                field,
                value: match variant {
                    Variant::Value(v) => v,
                    Variant::Default => self.table(field).map_or(0, |t| t.default_index),
                },
            })
    }

    /// Default block of every field that has one, in field order.
    pub fn defaults(&self) -> impl Iterator<Item = (HwField, &CommandBlock)> + '_ {
        HwField::ALL
            .into_iter()
            .filter_map(move |f| self.table(f).and_then(|t| t.select(Variant::Default)).map(|b| (f, b)))
    }

    /// Decode an `HWPRM` payload.
    pub fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let mut tables: [ParamTable; 8] = Default::default();
        for table in &mut tables {
            *table = ParamTable::decode(c)?;
        }
        let n = c.count()?;
        let mut slot_configs = Vec::with_capacity(n);
        for _ in 0..n {
            let raw: [u8; SLOT_KEY_LEN] = c.array()?;
            let text = crate::blob::cursor::decode_name(&raw)?;
            let mut key = SlotKey::new();
            key.push_str(&text).map_err(|_| ParseError::BadName)?;
            slot_configs.push(IvSlotConfig {
                key,
                block: CommandBlock::decode(c)?,
            });
        }
        Ok(Self {
            tables,
            slot_configs,
        })
    }

    /// Append the `HWPRM` payload encoding.
    pub fn encode(&self, out: &mut Vec<u8>) {
        for table in &self.tables {
            table.encode(out);
        }
        out.extend_from_slice(&len_u32(self.slot_configs.len()).to_le_bytes());
        for cfg in &self.slot_configs {
            let mut raw = [0u8; SLOT_KEY_LEN];
            for (dst, src) in raw.iter_mut().zip(cfg.key.as_bytes()) {
                *dst = *src;
            }
            out.extend_from_slice(&raw);
            cfg.block.encode(out);
        }
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

// ── IV/VBat slot negotiation ────────────────────────────────────────────────

/// Digital audio interface framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DaiMode {
    /// Two-slot I²S.
    I2s,
    /// Multi-slot TDM.
    #[default]
    Tdm,
}

impl DaiMode {
    /// Key fragment.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::I2s => "I2S",
            Self::Tdm => "TDM",
        }
    }
}

/// Inputs to IV/VBat slot negotiation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IvVbatRequest {
    /// Audio slot width negotiated by the interface.
    pub slot_width: u8,
    /// Interface framing.
    pub mode: DaiMode,
    /// Channel count.
    pub channels: u8,
    /// Preferred current-sense width.
    pub iv_width: u8,
    /// Voltage sense requested.
    pub vbat: bool,
}

/// Compose a slot-configuration key: `"{slot:02}_{mode}_{channels:02}_{iv:02}_{vbat}"`
/// with `slot = min(slot_width, iv_width)`.
///
/// `None` when the key would not fit the [`SLOT_KEY_LEN`]-byte field; such a
/// key can never be authored, so it never matches.
#[must_use]
pub fn slot_config_key(
    slot_width: u8,
    mode: DaiMode,
    channels: u8,
    iv_width: u8,
    vbat: bool,
) -> Option<SlotKey> {
    let mut key = SlotKey::new();
    write!(
        key,
        "{:02}_{}_{:02}_{:02}_{}",
        slot_width.min(iv_width),
        mode.as_str(),
        channels,
        iv_width,
        u8::from(vbat)
    )
    .ok()?;
    Some(key)
}

/// `(iv_width, vbat)` pairs tried, in order.
///
/// The requested width first, then each narrower ladder width, all with the
/// requested vbat; if vbat was requested the same sequence repeats with vbat
/// off. Width degrades before vbat does.
pub fn degradation_ladder(iv_width: u8, vbat: bool) -> impl Iterator<Item = (u8, bool)> {
    let widths = move || {
        core::iter::once(iv_width).chain(
            IV_WIDTH_LADDER
                .into_iter()
                .filter(move |&w| w < iv_width),
        )
    };
    let with_vbat = widths().map(move |w| (w, vbat));
    let without = widths().filter(move |_| vbat).map(|w| (w, false));
    with_vbat.chain(without)
}

/// Best authored configuration for `req`, following [`degradation_ladder`].
///
/// Among configurations sharing a key, the first in authoring order wins.
#[must_use]
pub fn resolve_iv_vbat_slot_config<'a>(
    authored: &'a [IvSlotConfig],
    req: &IvVbatRequest,
) -> Option<&'a IvSlotConfig> {
    degradation_ladder(req.iv_width, req.vbat).find_map(|(iv, vbat)| {
        let key = slot_config_key(req.slot_width, req.mode, req.channels, iv, vbat)?;
        authored.iter().find(|cfg| cfg.key == key)
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::cmdblock::Op;
    use platform::RegAddr;

    fn block(tag: u8) -> CommandBlock {
        CommandBlock::new(vec![Op::SingleWrite {
            addr: RegAddr::new(0, 0, 0x10),
            value: tag,
        }])
    }

    fn cfg(key: &str, tag: u8) -> IvSlotConfig {
        let mut k = SlotKey::new();
        k.push_str(key).unwrap();
        IvSlotConfig { key: k, block: block(tag) }
    }

    fn rates() -> HardwareParamSet {
        let mut tables: [ParamTable; 8] = Default::default();
        tables[HwField::SampleRate.index()] = ParamTable {
            default_index: 1,
            entries: vec![(44_100, block(1)), (48_000, block(2)), (96_000, block(3))],
        };
        HardwareParamSet::new(tables, Vec::new())
    }

    #[test]
    fn test_select_value_and_default() {
        let set = rates();
        assert_eq!(set.select(HwField::SampleRate, Variant::Value(96_000)).unwrap(), &block(3));
        assert_eq!(set.select(HwField::SampleRate, Variant::Default).unwrap(), &block(2));
    }

    #[test]
    fn test_unmapped_value_is_unsupported() {
        let err = rates()
            .select(HwField::SampleRate, Variant::Value(22_050))
            .unwrap_err();
        assert_eq!(
            err,
            DeviceError::UnsupportedParameter {
                field: HwField::SampleRate,
                value: 22_050
            }
        );
    }

    #[test]
    fn test_empty_field_has_no_default() {
        assert!(rates().select(HwField::TxSlots, Variant::Default).is_err());
        assert_eq!(rates().defaults().count(), 1);
    }

    #[test]
    fn test_key_format() {
        let key = |slot, mode, ch, iv, vbat| slot_config_key(slot, mode, ch, iv, vbat).unwrap();
        assert_eq!(key(16, DaiMode::Tdm, 2, 12, true).as_str(), "12_TDM_02_12_1");
        assert_eq!(key(32, DaiMode::I2s, 1, 16, false).as_str(), "16_I2S_01_16_0");
        // Exactly fills the field.
        assert_eq!(key(100, DaiMode::I2s, 16, 100, true).as_str(), "100_I2S_16_100_1");
    }

    #[test]
    fn test_key_longer_than_field_is_rejected() {
        assert_eq!(slot_config_key(255, DaiMode::Tdm, 255, 255, true), None);

        let authored = [cfg("16_TDM_02_16_1", 1)];
        let req = IvVbatRequest {
            slot_width: 255,
            mode: DaiMode::Tdm,
            channels: 255,
            iv_width: 255,
            vbat: true,
        };
        assert!(resolve_iv_vbat_slot_config(&authored, &req).is_none());
    }

    #[test]
    fn test_every_key_survives_encoding() {
        let mut set = rates();
        set.slot_configs.push(IvSlotConfig {
            key: slot_config_key(100, DaiMode::I2s, 16, 100, true).unwrap(),
            block: block(3),
        });
        let mut raw = Vec::new();
        set.encode(&mut raw);
        let decoded = HardwareParamSet::decode(&mut ByteCursor::new(&raw)).unwrap();
        assert_eq!(decoded.slot_configs[0].key.as_str(), "100_I2S_16_100_1");
    }

    #[test]
    fn test_ladder_order() {
        let steps: Vec<_> = degradation_ladder(16, true).collect();
        assert_eq!(
            steps,
            [(16, true), (12, true), (8, true), (16, false), (12, false), (8, false)]
        );
        let steps: Vec<_> = degradation_ladder(12, false).collect();
        assert_eq!(steps, [(12, false), (8, false)]);
    }

    #[test]
    fn test_width_degrades_before_vbat() {
        let authored = [cfg("12_TDM_02_12_1", 1), cfg("08_TDM_02_08_0", 2)];
        let req = IvVbatRequest {
            slot_width: 16,
            mode: DaiMode::Tdm,
            channels: 2,
            iv_width: 16,
            vbat: true,
        };
        let hit = resolve_iv_vbat_slot_config(&authored, &req).unwrap();
        assert_eq!(hit.key.as_str(), "12_TDM_02_12_1");
    }

    #[test]
    fn test_vbat_dropped_when_no_width_matches() {
        let authored = [cfg("08_TDM_02_08_0", 2)];
        let req = IvVbatRequest {
            slot_width: 16,
            mode: DaiMode::Tdm,
            channels: 2,
            iv_width: 16,
            vbat: true,
        };
        let hit = resolve_iv_vbat_slot_config(&authored, &req).unwrap();
        assert_eq!(hit.block, block(2));
    }

    #[test]
    fn test_first_authored_duplicate_wins() {
        let authored = [cfg("16_I2S_02_16_0", 7), cfg("16_I2S_02_16_0", 8)];
        let req = IvVbatRequest {
            slot_width: 24,
            mode: DaiMode::I2s,
            channels: 2,
            iv_width: 16,
            vbat: false,
        };
        assert_eq!(resolve_iv_vbat_slot_config(&authored, &req).unwrap().block, block(7));
    }

    #[test]
    fn test_no_match() {
        let authored = [cfg("16_TDM_04_16_1", 1)];
        let req = IvVbatRequest {
            slot_width: 16,
            mode: DaiMode::Tdm,
            channels: 2,
            iv_width: 16,
            vbat: true,
        };
        assert!(resolve_iv_vbat_slot_config(&authored, &req).is_none());
    }

    #[test]
    fn test_decode_encoded_set() {
        let mut set = rates();
        set.slot_configs.push(cfg("12_TDM_02_12_1", 9));
        let mut raw = Vec::new();
        set.encode(&mut raw);
        let mut c = ByteCursor::new(&raw);
        assert_eq!(HardwareParamSet::decode(&mut c).unwrap(), set);
        assert!(c.is_empty());
    }
}
