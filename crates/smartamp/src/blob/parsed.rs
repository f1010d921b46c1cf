//! Structured view of one revision payload.

use alloc::sync::Arc;
use alloc::vec::Vec;

use crate::blob::container::select_revision;
use crate::blob::cursor::ByteCursor;
use crate::blob::header::BlobHeader;
use crate::blob::section::{find_section, walk_sections, ChannelSelector, Section, SectionTag};
use crate::cmdblock::CommandBlock;
use crate::error::{BlobError, ParseError};
use crate::hw_params::HardwareParamSet;
use crate::interrupt::InterruptTable;
use crate::kcontrol::ControlTable;
use crate::profile::ProfileTable;

/// Core per-channel sequences (`BLKOP`).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BlockOps {
    /// Software reset.
    pub sw_reset: CommandBlock,
    /// Core power-up sequence.
    pub power_up: CommandBlock,
    /// Core power-down sequence.
    pub power_down: CommandBlock,
    /// Mute.
    pub mute: CommandBlock,
    /// Read-and-compare check that the channel is powered.
    pub power_check: CommandBlock,
}

impl BlockOps {
    /// Decode a `BLKOP` payload.
    pub fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        Ok(Self {
            sw_reset: CommandBlock::decode(c)?,
            power_up: CommandBlock::decode(c)?,
            power_down: CommandBlock::decode(c)?,
            mute: CommandBlock::decode(c)?,
            power_check: CommandBlock::decode(c)?,
        })
    }

    /// Append the `BLKOP` payload encoding.
    pub fn encode(&self, out: &mut Vec<u8>) {
        for block in [
            &self.sw_reset,
            &self.power_up,
            &self.power_down,
            &self.mute,
            &self.power_check,
        ] {
            block.encode(out);
        }
    }
}

/// Opaque parameter for the external algorithm collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AlgoParam {
    /// Parameter id.
    pub id: u32,
    /// Value.
    pub value: u32,
}

/// Everything parsed for one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelTables {
    /// Initialisation sequence.
    pub init: CommandBlock,
    /// Hardware-parameter tables, if authored.
    pub hw_params: Option<HardwareParamSet>,
    /// Profiles.
    pub profiles: ProfileTable,
    /// Interrupt table, if authored.
    pub interrupts: Option<InterruptTable>,
    /// Core sequences.
    pub block_ops: BlockOps,
}

/// A fully parsed revision payload.
///
/// Immutable once built; shared behind an [`Arc`] so a reload can swap in a
/// new generation while in-flight users finish with the old one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedBlob {
    bytes: Vec<u8>,
    /// Header.
    pub header: BlobHeader,
    /// Per-channel tables, indexed by channel.
    pub channels: Vec<ChannelTables>,
    /// Generated controls.
    pub controls: ControlTable,
    /// Algorithm parameters.
    pub algo_params: Vec<AlgoParam>,
}

impl ParsedBlob {
    /// Raw payload bytes.
    #[must_use]
    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// Tables for `channel`.
    #[must_use]
    pub fn channel(&self, channel: u8) -> Option<&ChannelTables> {
        self.channels.get(usize::from(channel))
    }

    /// Number of channels.
    #[must_use]
    pub fn channel_count(&self) -> u8 {
        self.header.channel_count()
    }

    /// Interrupt table for `channel`, when the blob enables interrupts.
    #[must_use]
    pub fn interrupts(&self, channel: u8) -> Option<&InterruptTable> {
        if !self.header.interrupts_supported() {
            return None;
        }
        self.channel(channel).and_then(|t| t.interrupts.as_ref())
    }

    /// Locate a raw section in the payload.
    #[must_use]
    pub fn section(&self, tag: SectionTag, selector: ChannelSelector) -> Option<Section<'_>> {
        find_section(&self.bytes, tag, selector)
    }

    /// Profile names (channel 0).
    #[must_use]
    pub fn profile_names(&self) -> Vec<&str> {
        self.channel(0)
            .map(|t| t.profiles.profiles.iter().map(|p| p.name.as_str()).collect())
            .unwrap_or_default()
    }
}

#[derive(Default)]
struct PendingChannel {
    init: CommandBlock,
    hw_params: Option<HardwareParamSet>,
    profiles: Option<ProfileTable>,
    interrupts: Option<InterruptTable>,
    block_ops: Option<BlockOps>,
}

/// Turns payload bytes into a [`ParsedBlob`].
///
/// Counts the sections it decoded, so callers can tell how far a failed
/// parse got.
#[derive(Debug, Default)]
pub struct BlobParser {
    sections_parsed: usize,
}

impl BlobParser {
    /// Fresh parser.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sections successfully decoded by the most recent parse.
    #[must_use]
    pub fn sections_parsed(&self) -> usize {
        self.sections_parsed
    }

    /// Select `revision_id` from `image` and parse it.
    pub fn parse_image(&mut self, image: &[u8], revision_id: u32) -> Result<Arc<ParsedBlob>, BlobError> {
        self.sections_parsed = 0;
        let payload = select_revision(image, revision_id)?;
        Ok(Arc::new(self.parse(&payload)?))
    }

    /// Parse a revision payload.
    pub fn parse(&mut self, payload: &[u8]) -> Result<ParsedBlob, ParseError> {
        self.sections_parsed = 0;
        let mut sections = walk_sections(payload);

        let header = match sections.next() {
            Some(Ok(s)) if s.tag == SectionTag::Header => {
                let h = BlobHeader::decode(&mut s.cursor())?;
                self.sections_parsed = 1;
                h
            }
            Some(Err(e)) if !payload.starts_with(SectionTag::Header.as_bytes()) => {
                tracing::debug!(error = %e, "no header");
                return Err(ParseError::MissingHeader);
            }
            Some(Err(e)) => return Err(e),
            Some(Ok(_)) | None => return Err(ParseError::MissingHeader),
        };
        let declared = usize::from(header.channel_count());

        let mut channels: Vec<PendingChannel> = Vec::with_capacity(declared);
        let mut controls: Option<ControlTable> = None;
        let mut algo_params: Option<Vec<AlgoParam>> = None;

        for section in sections {
            let section = section?;
            let mut c = section.cursor();
            let globals_seen = controls.is_some() || algo_params.is_some();
            match section.tag {
                SectionTag::Header => return Err(duplicate(section)),
                SectionTag::Init => {
                    if channels.len() >= declared || globals_seen {
                        return Err(ParseError::InvalidRecord {
                            what: "channel beyond declared count",
                            value: u32::try_from(channels.len()).unwrap_or(u32::MAX),
                        });
                    }
                    channels.push(PendingChannel {
                        init: CommandBlock::decode(&mut c)?,
                        ..PendingChannel::default()
                    });
                }
                SectionTag::HwParams | SectionTag::Profiles | SectionTag::Interrupts | SectionTag::BlockOps => {
                    let pending = match channels.last_mut() {
                        Some(p) if !globals_seen => p,
                        _ => return Err(misplaced(section)),
                    };
                    match section.tag {
                        SectionTag::HwParams => {
                            set_once(&mut pending.hw_params, HardwareParamSet::decode(&mut c)?, section)?;
                        }
                        SectionTag::Profiles => {
                            set_once(&mut pending.profiles, ProfileTable::decode(&mut c)?, section)?;
                        }
                        SectionTag::Interrupts => {
                            set_once(&mut pending.interrupts, InterruptTable::decode(&mut c)?, section)?;
                        }
                        _ => {
                            set_once(&mut pending.block_ops, BlockOps::decode(&mut c)?, section)?;
                        }
                    }
                }
                SectionTag::Controls => {
                    set_once(&mut controls, ControlTable::decode(&mut c)?, section)?;
                }
                SectionTag::AlgoParams => {
                    set_once(&mut algo_params, decode_algo_params(&mut c)?, section)?;
                }
            }
            if !c.is_empty() {
                return Err(ParseError::InvalidRecord {
                    what: "trailing section bytes",
                    value: u32::try_from(c.remaining()).unwrap_or(u32::MAX),
                });
            }
            self.sections_parsed = self.sections_parsed.saturating_add(1);
        }

        let channels = finish_channels(channels, declared)?;
        let controls = controls.unwrap_or_default();
        if let Some(bad) = controls.controls.iter().find(|k| usize::from(k.channel()) >= declared) {
            return Err(ParseError::InvalidRecord {
                what: "control channel",
                value: u32::from(bad.channel()),
            });
        }
        tracing::info!(
            name = %header.name,
            version = header.version,
            channels = declared,
            controls = controls.controls.len(),
            "tuning blob parsed"
        );
        Ok(ParsedBlob {
            bytes: payload.to_vec(),
            header,
            channels,
            controls,
            algo_params: algo_params.unwrap_or_default(),
        })
    }
}

fn finish_channels(pending: Vec<PendingChannel>, declared: usize) -> Result<Vec<ChannelTables>, ParseError> {
    if pending.len() < declared {
        return Err(ParseError::MissingSection {
            tag: SectionTag::Init,
            channel: u8::try_from(pending.len()).unwrap_or(u8::MAX),
        });
    }
    pending
        .into_iter()
        .zip(0u8..)
        .map(|(p, channel)| {
            let missing = |tag| ParseError::MissingSection { tag, channel };
            Ok(ChannelTables {
                init: p.init,
                hw_params: p.hw_params,
                profiles: p.profiles.ok_or_else(|| missing(SectionTag::Profiles))?,
                interrupts: p.interrupts,
                block_ops: p.block_ops.ok_or_else(|| missing(SectionTag::BlockOps))?,
            })
        })
        .collect()
}

fn decode_algo_params(c: &mut ByteCursor<'_>) -> Result<Vec<AlgoParam>, ParseError> {
    let n = c.count()?;
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(AlgoParam {
            id: c.u32_le()?,
            value: c.u32_le()?,
        });
    }
    Ok(out)
}

fn set_once<T>(slot: &mut Option<T>, value: T, section: Section<'_>) -> Result<(), ParseError> {
    if slot.is_some() {
        return Err(duplicate(section));
    }
    *slot = Some(value);
    Ok(())
}

fn duplicate(section: Section<'_>) -> ParseError {
    ParseError::InvalidRecord {
        what: "duplicate section",
        value: u32::try_from(section.offset).unwrap_or(u32::MAX),
    }
}

fn misplaced(section: Section<'_>) -> ParseError {
    ParseError::InvalidRecord {
        what: "misplaced section",
        value: u32::try_from(section.offset).unwrap_or(u32::MAX),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::blob::builder::{BlobBuilder, HeaderSpec};
    use crate::config::MAX_SUPPORTED_VERSION;

    #[test]
    fn parses_minimal_two_channel_blob() {
        let raw = BlobBuilder::new(2).build();
        let mut parser = BlobParser::new();
        let blob = parser.parse(&raw).unwrap();
        assert_eq!(blob.channel_count(), 2);
        assert_eq!(blob.channels.len(), 2);
        assert_eq!(blob.profile_names(), ["default"]);
        // HEADR + 2 × (INITP, PROFP, BLKOP)
        assert_eq!(parser.sections_parsed(), 7);
    }

    #[test]
    fn unsupported_version_parses_no_sections() {
        let raw = BlobBuilder::new(2)
            .header(HeaderSpec {
                version: MAX_SUPPORTED_VERSION + 1,
                ..HeaderSpec::new(2)
            })
            .build();
        let mut parser = BlobParser::new();
        let err = parser.parse(&raw).unwrap_err();
        assert!(matches!(err, ParseError::UnsupportedVersion { .. }));
        assert_eq!(parser.sections_parsed(), 0);
    }

    #[test]
    fn missing_channel_reported() {
        let raw = BlobBuilder::new(2)
            .header(HeaderSpec::new(3))
            .build();
        let err = BlobParser::new().parse(&raw).unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingSection {
                tag: SectionTag::Init,
                channel: 2
            }
        );
    }

    #[test]
    fn missing_header_reported() {
        let err = BlobParser::new().parse(b"INITP\0\0\0\0").unwrap_err();
        assert_eq!(err, ParseError::MissingHeader);
        assert_eq!(BlobParser::new().parse(b"").unwrap_err(), ParseError::MissingHeader);
    }

    #[test]
    fn container_wraps_payload() {
        let payload = BlobBuilder::new(1).build();
        let image = crate::blob::container::wrap_revisions(&[(4, b"junk".to_vec()), (5, payload)]);
        let blob = BlobParser::new().parse_image(&image, 5).unwrap();
        assert_eq!(blob.channel_count(), 1);
        let err = BlobParser::new().parse_image(&image, 6).unwrap_err();
        assert!(err.is_retryable());
        let err = BlobParser::new().parse_image(&image, 4).unwrap_err();
        assert!(!err.is_retryable());
    }

    #[test]
    fn interrupts_hidden_without_feature_bit() {
        let raw = BlobBuilder::new(1)
            .header(HeaderSpec {
                features: 0,
                ..HeaderSpec::new(1)
            })
            .interrupts(0, InterruptTable::default())
            .build();
        let blob = BlobParser::new().parse(&raw).unwrap();
        assert!(blob.channels[0].interrupts.is_some());
        assert!(blob.interrupts(0).is_none());
    }
}
