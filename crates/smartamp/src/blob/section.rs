//! Section framing and location.
//!
//! Every section is `[5-byte tag][u32 length][length bytes payload]`. The
//! payload begins with `HEADR`, then each channel's sections starting with
//! its own `INITP`, then the optional global sections:
//!
//! ```text
//! HEADR
//! INITP HWPRM? PROFP INTRP? BLKOP      channel 0
//! INITP HWPRM? PROFP INTRP? BLKOP      channel 1 ...
//! KCNTR? ALGOP?                        global
//! ```
//!
//! Sections vary in size, so the `INITP` occurrences are the only channel
//! boundaries. A section's channel is the number of `INITP` tags seen so far
//! (including its own) minus one.

use core::fmt;

use crate::blob::cursor::{ByteCursor, TAG_LEN};
use crate::blob::header::BlobHeader;
use crate::error::ParseError;

/// Known section tags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SectionTag {
    /// Blob header.
    Header,
    /// Channel initialisation block; also the channel delimiter.
    Init,
    /// Hardware-parameter tables.
    HwParams,
    /// Profiles.
    Profiles,
    /// Interrupt table.
    Interrupts,
    /// Core power / reset blocks.
    BlockOps,
    /// Generated controls (global).
    Controls,
    /// Algorithm parameters (global).
    AlgoParams,
}

impl SectionTag {
    /// Every tag, in canonical order.
    pub const ALL: [Self; 8] = [
        Self::Header,
        Self::Init,
        Self::HwParams,
        Self::Profiles,
        Self::Interrupts,
        Self::BlockOps,
        Self::Controls,
        Self::AlgoParams,
    ];

    /// On-disk tag bytes.
    #[must_use]
    pub const fn as_bytes(self) -> &'static [u8; TAG_LEN] {
        match self {
            Self::Header => b"HEADR",
            Self::Init => b"INITP",
            Self::HwParams => b"HWPRM",
            Self::Profiles => b"PROFP",
            Self::Interrupts => b"INTRP",
            Self::BlockOps => b"BLKOP",
            Self::Controls => b"KCNTR",
            Self::AlgoParams => b"ALGOP",
        }
    }

    /// Tag for on-disk bytes, if known.
    #[must_use]
    pub fn from_bytes(raw: &[u8; TAG_LEN]) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_bytes() == raw)
    }

    /// `true` for sections that appear once per blob rather than per channel.
    #[must_use]
    pub const fn is_global(self) -> bool {
        matches!(self, Self::Header | Self::Controls | Self::AlgoParams)
    }
}

impl fmt::Display for SectionTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tags are ASCII by construction.
        let s = core::str::from_utf8(self.as_bytes()).map_err(|_| fmt::Error)?;
        f.write_str(s)
    }
}

/// Which instance of a per-channel section to return.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSelector {
    /// First occurrence anywhere.
    Any,
    /// The occurrence inside this channel's region.
    Channel(u8),
}

/// View of one section inside the blob bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Section<'a> {
    /// Section tag.
    pub tag: SectionTag,
    /// Channel region the section sits in (`None` before the first `INITP`).
    pub channel: Option<u8>,
    /// Offset of the tag within the blob.
    pub offset: usize,
    /// Payload bytes (borrowed, never copied).
    pub payload: &'a [u8],
}

impl<'a> Section<'a> {
    /// Cursor over the payload, reporting blob-relative offsets.
    #[must_use]
    pub fn cursor(&self) -> ByteCursor<'a> {
        ByteCursor::with_base(self.payload, self.payload_offset())
    }

    /// Offset of the first payload byte within the blob.
    #[must_use]
    pub fn payload_offset(&self) -> usize {
        self.offset.saturating_add(TAG_LEN).saturating_add(4)
    }
}

/// Iterator over every section, validating framing as it goes.
///
/// Yields `Err` once (and then stops) on truncation or an unknown tag.
#[derive(Debug, Clone)]
pub struct SectionWalker<'a> {
    cursor: ByteCursor<'a>,
    inits_seen: u8,
    failed: bool,
}

/// Walk all sections of a revision payload.
#[must_use]
pub fn walk_sections(blob: &[u8]) -> SectionWalker<'_> {
    SectionWalker {
        cursor: ByteCursor::new(blob),
        inits_seen: 0,
        failed: false,
    }
}

impl<'a> SectionWalker<'a> {
    fn next_section(&mut self) -> Result<Section<'a>, ParseError> {
        let offset = self.cursor.offset();
        let raw = self.cursor.tag()?;
        let tag = SectionTag::from_bytes(&raw).ok_or(ParseError::UnknownTag(raw, offset))?;
        let payload = self.cursor.length_prefixed()?;
        if tag == SectionTag::Init {
            self.inits_seen = self.inits_seen.saturating_add(1);
        }
        Ok(Section {
            tag,
            channel: self.inits_seen.checked_sub(1),
            offset,
            payload,
        })
    }
}

impl<'a> Iterator for SectionWalker<'a> {
    type Item = Result<Section<'a>, ParseError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.cursor.is_empty() {
            return None;
        }
        let item = self.next_section();
        self.failed = item.is_err();
        Some(item)
    }
}

/// Locate a section by tag and channel.
///
/// Scans from the start of `blob`. With [`ChannelSelector::Any`] the first
/// section carrying `tag` is returned; with [`ChannelSelector::Channel`] only
/// the one inside that channel's `INITP`-delimited region. Returns `None` when
/// the tag is absent, the blob declares zero channels, the channel is beyond
/// the declared count, or the framing breaks before a match.
///
/// Pure: repeated calls return the same slice.
#[must_use]
pub fn find_section(blob: &[u8], tag: SectionTag, selector: ChannelSelector) -> Option<Section<'_>> {
    let channels = declared_channel_count(blob);
    if channels == 0 {
        return None;
    }
    if let ChannelSelector::Channel(ch) = selector {
        if u32::from(ch) >= channels {
            return None;
        }
    }
    walk_sections(blob)
        .map_while(Result::ok)
        .filter(|s| s.tag == tag)
        .find(|s| match selector {
            ChannelSelector::Any => true,
            ChannelSelector::Channel(ch) => s.channel == Some(ch),
        })
}

/// Channel count from the header, or 0 when the header is unreadable.
fn declared_channel_count(blob: &[u8]) -> u32 {
    walk_sections(blob)
        .next()
        .and_then(Result::ok)
        .filter(|s| s.tag == SectionTag::Header)
        .and_then(|s| BlobHeader::peek_channel_count(s.payload))
        .unwrap_or(0)
}
