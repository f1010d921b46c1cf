//! Error taxonomy.
//!
//! | Error             | Origin                         | Policy                         |
//! |-------------------|--------------------------------|--------------------------------|
//! | [`ContainerError`]| outer revision wrapper         | retryable during load          |
//! | [`ParseError`]    | revision payload structure     | terminal (`ParseFailed`)       |
//! | [`OpError`]       | transport failure on a channel | accumulated, escalated         |
//! | [`RangeError`]    | control / profile index        | rejected locally               |
//! | [`ConfigError`]   | invalid [`DriverConfig`]       | rejected at construction       |
//! | [`DeviceError`]   | any device-level operation     | wraps all of the above         |
//!
//! [`DriverConfig`]: crate::config::DriverConfig

use alloc::string::String;

use thiserror::Error;

use crate::blob::section::SectionTag;
use crate::device::FirmwareState;
use crate::hw_params::HwField;

/// Structural problem inside a revision payload. Never retried.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// A read ran past the end of the available bytes.
    #[error("truncated at offset {offset}: needed {needed} bytes, {available} available")]
    Truncated {
        /// Offset of the failed read, relative to the payload start.
        offset: usize,
        /// Bytes requested.
        needed: usize,
        /// Bytes left at `offset`.
        available: usize,
    },
    /// Payload does not start with the `HEADR` tag.
    #[error("payload does not start with HEADR")]
    MissingHeader,
    /// A section tag that is not part of the format.
    #[error("unknown section tag {0:?} at offset {1}")]
    UnknownTag([u8; 5], usize),
    /// Mandatory section absent for a channel.
    #[error("mandatory section {tag} missing for channel {channel}")]
    MissingSection {
        /// Tag that was expected.
        tag: SectionTag,
        /// Channel it was expected for.
        channel: u8,
    },
    /// Header version newer than this implementation understands.
    #[error("blob version {found} exceeds supported version {supported}")]
    UnsupportedVersion {
        /// Version declared by the blob.
        found: u32,
        /// Highest version understood.
        supported: u32,
    },
    /// Header channel count outside `1..=MAX_CHANNELS`.
    #[error("unsupported channel count {0}")]
    BadChannelCount(u32),
    /// Command-block opcode outside the known set.
    #[error("unknown opcode {opcode:#04x} at offset {offset}")]
    UnknownOpcode {
        /// Opcode byte.
        opcode: u8,
        /// Offset of the opcode inside its block.
        offset: usize,
    },
    /// A command block's last opcode overruns its declared length.
    #[error("command block overruns its declared length of {declared} bytes")]
    BlockLengthMismatch {
        /// Declared byte length.
        declared: u32,
    },
    /// A record field holds a value the format does not allow.
    #[error("invalid {what}: {value}")]
    InvalidRecord {
        /// Field description.
        what: &'static str,
        /// Offending value.
        value: u32,
    },
    /// A name field is not valid UTF-8.
    #[error("name field is not valid UTF-8")]
    BadName,
}

/// Problem with the optional `MDATA` revision wrapper. Retryable.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ContainerError {
    /// The image is empty.
    #[error("firmware image is empty")]
    Empty,
    /// The wrapper declares zero revisions.
    #[error("container holds no revisions")]
    NoRevisions,
    /// No record for the requested revision id.
    #[error("revision {0} not present in container")]
    RevisionNotFound(u32),
    /// Record table or payloads run past the end of the image.
    #[error("container truncated")]
    Truncated,
}

/// Outcome of turning a raw image into a [`ParsedBlob`](crate::blob::ParsedBlob).
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BlobError {
    /// Wrapper problem (absent/corrupt container).
    #[error(transparent)]
    Container(#[from] ContainerError),
    /// Payload problem (bad header, unsupported version, truncation).
    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl BlobError {
    /// `true` when another load attempt may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Container(_))
    }
}

/// Accumulated transport failures.
///
/// After [`merge`](Self::merge) across channels, `channel` names the first
/// failing one only; the per-channel picture is the device's
/// [`ErrorCode`](crate::device::ErrorCode).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("{failed} transport operation(s) failed, first on channel {channel}")]
pub struct OpError {
    /// First channel that failed.
    pub channel: u8,
    /// Number of failed transport calls.
    pub failed: u32,
}

impl OpError {
    /// Single failed transport call on `channel`.
    #[must_use]
    pub fn single(channel: u8) -> Self {
        Self { channel, failed: 1 }
    }

    /// Fold another failure count into this one, keeping the first channel.
    #[must_use]
    pub fn merge(self, other: Self) -> Self {
        Self {
            channel: self.channel,
            failed: self.failed.saturating_add(other.failed),
        }
    }
}

/// Index or value outside its permitted range.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RangeError {
    /// Profile index not below the profile count.
    #[error("profile index {index} out of range (count {count})")]
    Profile {
        /// Requested index.
        index: usize,
        /// Profiles available.
        count: usize,
    },
    /// Control id does not name a control.
    #[error("no control with id {0}")]
    UnknownControl(usize),
    /// Control name does not name a control.
    #[error("no control named {0:?}")]
    UnknownControlName(String),
    /// Value rejected by the control's range/step/count.
    #[error("value {value} rejected by control {name:?}")]
    ControlValue {
        /// Control name.
        name: String,
        /// Rejected value.
        value: i64,
    },
}

/// Invalid [`DriverConfig`](crate::config::DriverConfig) field.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// `firmware_name` is empty.
    #[error("firmware name must not be empty")]
    EmptyFirmwareName,
    /// A retry budget is zero.
    #[error("{0} must be at least 1")]
    ZeroTries(&'static str),
    /// Storm detection limit or window is zero.
    #[error("interrupt storm limit and window must be non-zero")]
    ZeroStormLimit,
}

/// Error returned by [`Device`](crate::device::Device) operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeviceError {
    /// Transport failure while executing command blocks.
    #[error(transparent)]
    Op(#[from] OpError),
    /// Rejected index or value.
    #[error(transparent)]
    Range(#[from] RangeError),
    /// Blob could not be loaded.
    #[error(transparent)]
    Blob(#[from] BlobError),
    /// Configuration rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// Requested hardware-parameter variant has no authored block.
    #[error("unsupported {field} value {value}")]
    UnsupportedParameter {
        /// Parameter field.
        field: HwField,
        /// Requested variant value.
        value: u32,
    },
    /// No IV/VBat slot configuration matches after degradation.
    #[error("no IV/VBat slot configuration for slot width {slot_width}")]
    NoSlotConfig {
        /// Requested slot width.
        slot_width: u8,
    },
    /// The tuning blob is not loaded.
    #[error("device not ready (firmware {0})")]
    NotReady(FirmwareState),
    /// Channel index beyond the blob's channel count.
    #[error("channel {0} does not exist")]
    InvalidChannel(u8),
    /// Channel permanently shut down after repeated failed restarts.
    #[error("channel {0} locked out after repeated faults")]
    LockedOut(u8),
}
