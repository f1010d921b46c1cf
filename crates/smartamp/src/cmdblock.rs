//! Command blocks: length-prefixed register opcode streams.
//!
//! Layout (all integers little-endian):
//! ```text
//! u32 byte_len
//! byte_len bytes of opcodes:
//!   0x01 SingleWrite  book u8, page u8, reg u8, value u8
//!   0x02 BurstWrite   book u8, page u8, reg u8, count u16, count bytes
//!   0x03 UpdateBits   book u8, page u8, reg u8, mask u8, value u8
//!   0x04 Delay        ms u16
//! ```
//!
//! Blocks are decoded and validated once, when the blob is parsed. An
//! opcode that overruns the declared length is a parse error, never a
//! partially executed block.

use alloc::vec::Vec;

use platform::RegAddr;

use crate::blob::cursor::ByteCursor;
use crate::error::ParseError;

/// `SingleWrite` opcode byte.
pub const OP_SINGLE_WRITE: u8 = 0x01;
/// `BurstWrite` opcode byte.
pub const OP_BURST_WRITE: u8 = 0x02;
/// `UpdateBits` opcode byte.
pub const OP_UPDATE_BITS: u8 = 0x03;
/// `Delay` opcode byte.
pub const OP_DELAY: u8 = 0x04;

/// One register opcode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    /// Write one register.
    SingleWrite {
        /// Target register.
        addr: RegAddr,
        /// Value written.
        value: u8,
    },
    /// Write consecutive registers.
    BurstWrite {
        /// First register.
        addr: RegAddr,
        /// Bytes written from `addr` onward.
        data: Vec<u8>,
    },
    /// Read-modify-write the bits selected by `mask`.
    UpdateBits {
        /// Target register.
        addr: RegAddr,
        /// Bits affected.
        mask: u8,
        /// New bit values.
        value: u8,
    },
    /// Suspend without touching the bus.
    Delay {
        /// Milliseconds.
        ms: u16,
    },
}

impl Op {
    /// Register addressed by this opcode, if any.
    #[must_use]
    pub fn addr(&self) -> Option<RegAddr> {
        match self {
            Self::SingleWrite { addr, .. }
            | Self::BurstWrite { addr, .. }
            | Self::UpdateBits { addr, .. } => Some(*addr),
            Self::Delay { .. } => None,
        }
    }

    fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let offset = c.offset();
        let opcode = c.u8()?;
        match opcode {
            OP_SINGLE_WRITE => {
                let addr = read_addr(c)?;
                let value = c.u8()?;
                Ok(Self::SingleWrite { addr, value })
            }
            OP_BURST_WRITE => {
                let addr = read_addr(c)?;
                let count = c.u16_le()?;
                let data = c.bytes(usize::from(count))?.to_vec();
                Ok(Self::BurstWrite { addr, data })
            }
            OP_UPDATE_BITS => {
                let addr = read_addr(c)?;
                let mask = c.u8()?;
                let value = c.u8()?;
                Ok(Self::UpdateBits { addr, mask, value })
            }
            OP_DELAY => Ok(Self::Delay { ms: c.u16_le()? }),
            _ => Err(ParseError::UnknownOpcode { opcode, offset }),
        }
    }

    fn encode(&self, out: &mut Vec<u8>) {
        match self {
            Self::SingleWrite { addr, value } => {
                out.push(OP_SINGLE_WRITE);
                push_addr(out, *addr);
                out.push(*value);
            }
            Self::BurstWrite { addr, data } => {
                out.push(OP_BURST_WRITE);
                push_addr(out, *addr);
                let count = u16::try_from(data.len()).unwrap_or(u16::MAX);
                out.extend_from_slice(&count.to_le_bytes());
                out.extend(data.iter().take(usize::from(count)));
            }
            Self::UpdateBits { addr, mask, value } => {
                out.push(OP_UPDATE_BITS);
                push_addr(out, *addr);
                out.push(*mask);
                out.push(*value);
            }
            Self::Delay { ms } => {
                out.push(OP_DELAY);
                out.extend_from_slice(&ms.to_le_bytes());
            }
        }
    }
}

fn read_addr(c: &mut ByteCursor<'_>) -> Result<RegAddr, ParseError> {
    let [book, page, reg] = c.array::<3>()?;
    if reg >= 0x80 {
        return Err(ParseError::InvalidRecord {
            what: "register offset",
            value: u32::from(reg),
        });
    }
    Ok(RegAddr::new(book, page, reg))
}

fn push_addr(out: &mut Vec<u8>, addr: RegAddr) {
    let (book, page) = addr.bank();
    out.extend_from_slice(&[book, page, addr.reg()]);
}

/// Ordered opcode sequence executed by the interpreter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandBlock {
    ops: Vec<Op>,
}

impl CommandBlock {
    /// Block holding `ops` in order.
    #[must_use]
    pub fn new(ops: Vec<Op>) -> Self {
        Self { ops }
    }

    /// Opcodes in execution order.
    #[must_use]
    pub fn ops(&self) -> &[Op] {
        &self.ops
    }

    /// `true` for a block with no opcodes (executing it is a no-op).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Number of opcodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// Decode one length-prefixed block from `c`.
    pub fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let base = c.offset().saturating_add(4);
        let body = c.length_prefixed()?;
        let declared = u32::try_from(body.len()).unwrap_or(u32::MAX);
        let mut inner = ByteCursor::with_base(body, base);
        let mut ops = Vec::new();
        while !inner.is_empty() {
            let op = Op::decode(&mut inner).map_err(|e| match e {
                ParseError::Truncated { .. } => ParseError::BlockLengthMismatch { declared },
                other => other,
            })?;
            ops.push(op);
        }
        Ok(Self { ops })
    }

    /// Append the length-prefixed encoding of this block to `out`.
    pub fn encode(&self, out: &mut Vec<u8>) {
        let mut body = Vec::new();
        for op in &self.ops {
            op.encode(&mut body);
        }
        let len = u32::try_from(body.len()).unwrap_or(u32::MAX);
        out.extend_from_slice(&len.to_le_bytes());
        out.extend_from_slice(&body);
    }
}

impl FromIterator<Op> for CommandBlock {
    fn from_iter<I: IntoIterator<Item = Op>>(iter: I) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    fn sample() -> CommandBlock {
        CommandBlock::new(vec![
            Op::SingleWrite {
                addr: RegAddr::new(0, 0, 0x02),
                value: 0x0E,
            },
            Op::Delay { ms: 5 },
            Op::BurstWrite {
                addr: RegAddr::new(0x8C, 0x1E, 0x20),
                data: vec![1, 2, 3, 4],
            },
            Op::UpdateBits {
                addr: RegAddr::new(0, 1, 0x21),
                mask: 0x30,
                value: 0x10,
            },
        ])
    }

    #[test]
    fn test_encoding_layout() {
        let mut out = Vec::new();
        CommandBlock::new(vec![Op::SingleWrite {
            addr: RegAddr::new(1, 2, 3),
            value: 4,
        }])
        .encode(&mut out);
        assert_eq!(out, [5, 0, 0, 0, 0x01, 1, 2, 3, 4]);
    }

    #[test]
    fn test_decode_recovers_ops() {
        let mut out = Vec::new();
        sample().encode(&mut out);
        let mut c = ByteCursor::new(&out);
        assert_eq!(CommandBlock::decode(&mut c).unwrap(), sample());
        assert!(c.is_empty());
    }

    #[test]
    fn test_empty_block() {
        let mut c = ByteCursor::new(&[0, 0, 0, 0]);
        let block = CommandBlock::decode(&mut c).unwrap();
        assert!(block.is_empty());
    }

    #[test]
    fn test_unknown_opcode_rejected() {
        let raw = [1, 0, 0, 0, 0x7F];
        let err = CommandBlock::decode(&mut ByteCursor::new(&raw)).unwrap_err();
        assert_eq!(
            err,
            ParseError::UnknownOpcode {
                opcode: 0x7F,
                offset: 4
            }
        );
    }

    #[test]
    fn test_opcode_overrunning_block_length() {
        // Declared length 3, SingleWrite needs 5.
        let raw = [3, 0, 0, 0, 0x01, 0, 0, 0, 0];
        let err = CommandBlock::decode(&mut ByteCursor::new(&raw)).unwrap_err();
        assert_eq!(err, ParseError::BlockLengthMismatch { declared: 3 });
    }

    #[test]
    fn test_block_longer_than_input() {
        let raw = [9, 0, 0, 0, 0x04, 1, 0];
        let err = CommandBlock::decode(&mut ByteCursor::new(&raw)).unwrap_err();
        assert!(matches!(err, ParseError::Truncated { .. }));
    }

    #[test]
    fn test_register_offset_must_fit_page() {
        let raw = [5, 0, 0, 0, 0x01, 0, 0, 0x80, 1];
        let err = CommandBlock::decode(&mut ByteCursor::new(&raw)).unwrap_err();
        assert!(matches!(err, ParseError::InvalidRecord { .. }));
    }
}
