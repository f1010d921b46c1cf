//! Generated user controls.
//!
//! `KCNTR` payload: `u32 n`, then n records
//! ```text
//! u8 kind (0 integer, 1 enumerated), name, u8 channel,
//! u8 timing (0 anytime, 1 pre-power-up, 2 post-power-up)
//! integer:    u32 reg, u8 mode (0 single, 1 burst, 2 masked), u32 mask,
//!             i32 min, i32 max, i32 step, i32 default,
//!             u8 element (0 bytes, 1 words), u32 count, count × (u8 | u32)
//! enumerated: u32 default, u32 count, count × { label, CommandBlock }
//! ```
//!
//! An integer control's value `v` selects candidate `(v - min) / step`; an
//! enumerated control's value is the item index. Values live in
//! [`ControlValues`], apart from the immutable blob.

use alloc::string::String;
use alloc::vec::Vec;

use platform::{RegAddr, RegisterBus};

use crate::blob::cursor::ByteCursor;
use crate::cmdblock::CommandBlock;
use crate::error::{DeviceError, OpError, ParseError, RangeError};
use crate::interpreter::Interpreter;
use crate::profile::encode_name;

/// Index into the control list.
pub type ControlId = usize;

/// When a stored value reaches the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyTiming {
    /// On every write.
    Anytime,
    /// While powering up, before the core sequence.
    PrePowerUp,
    /// In the deferred post-power-up task.
    PostPowerUp,
}

impl ApplyTiming {
    fn from_u8(raw: u8) -> Result<Self, ParseError> {
        match raw {
            0 => Ok(Self::Anytime),
            1 => Ok(Self::PrePowerUp),
            2 => Ok(Self::PostPowerUp),
            _ => Err(invalid("apply timing", raw)),
        }
    }

    fn to_u8(self) -> u8 {
        match self {
            Self::Anytime => 0,
            Self::PrePowerUp => 1,
            Self::PostPowerUp => 2,
        }
    }
}

/// How an integer control's candidate reaches its register.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// `write`.
    Single,
    /// `bulk_write` of the candidate's bytes.
    Burst,
    /// `update_bits` under the control's mask.
    Masked,
}

/// Width of an integer control's candidates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ElementKind {
    /// One byte each.
    Bytes,
    /// One 32-bit word each, written big-endian in bursts.
    Words,
}

/// Control selecting one of a candidate array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegerControl {
    /// Stable name.
    pub name: String,
    /// Owning channel.
    pub channel: u8,
    /// Apply timing.
    pub timing: ApplyTiming,
    /// Target register.
    pub reg: RegAddr,
    /// Dispatch mode.
    pub mode: WriteMode,
    /// Mask for [`WriteMode::Masked`].
    pub mask: u32,
    /// Lowest value.
    pub min: i32,
    /// Highest value.
    pub max: i32,
    /// Value step (> 0).
    pub step: i32,
    /// Value at load.
    pub default: i32,
    /// Candidate width.
    pub element: ElementKind,
    /// Candidates, indexed by `(value - min) / step`.
    pub values: Vec<u32>,
}

impl IntegerControl {
    /// Candidate index for `value`, or `None` when the value is off-range,
    /// off-step or past the candidate array.
    #[must_use]
    pub fn index_of(&self, value: i64) -> Option<usize> {
        let (min, max, step) = (i64::from(self.min), i64::from(self.max), i64::from(self.step));
        if value < min || value > max || step <= 0 {
            return None;
        }
        let offset = value.checked_sub(min)?;
        if offset.checked_rem(step)? != 0 {
            return None;
        }
        let index = usize::try_from(offset.checked_div(step)?).ok()?;
        (index < self.values.len()).then_some(index)
    }
}

/// Control selecting one of a list of labelled command blocks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumControl {
    /// Stable name.
    pub name: String,
    /// Owning channel.
    pub channel: u8,
    /// Apply timing.
    pub timing: ApplyTiming,
    /// Index at load.
    pub default: u32,
    /// `(label, block)` items.
    pub items: Vec<(String, CommandBlock)>,
}

/// A generated control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KControl {
    /// Integer / candidate-array control.
    Integer(IntegerControl),
    /// Enumerated / command-block control.
    Enumerated(EnumControl),
}

impl KControl {
    /// Stable name.
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Integer(c) => &c.name,
            Self::Enumerated(c) => &c.name,
        }
    }

    /// Owning channel.
    #[must_use]
    pub fn channel(&self) -> u8 {
        match self {
            Self::Integer(c) => c.channel,
            Self::Enumerated(c) => c.channel,
        }
    }

    /// Apply timing.
    #[must_use]
    pub fn timing(&self) -> ApplyTiming {
        match self {
            Self::Integer(c) => c.timing,
            Self::Enumerated(c) => c.timing,
        }
    }

    /// Value at load.
    #[must_use]
    pub fn default_value(&self) -> i64 {
        match self {
            Self::Integer(c) => i64::from(c.default),
            Self::Enumerated(c) => i64::from(c.default),
        }
    }

    /// Index dispatched for `value`, if the control accepts it.
    #[must_use]
    pub fn index_of(&self, value: i64) -> Option<usize> {
        match self {
            Self::Integer(c) => c.index_of(value),
            Self::Enumerated(c) => usize::try_from(value).ok().filter(|&i| i < c.items.len()),
        }
    }

    /// Check `value`, returning the index it selects.
    pub fn validate(&self, value: i64) -> Result<usize, RangeError> {
        self.index_of(value).ok_or_else(|| RangeError::ControlValue {
            name: String::from(self.name()),
            value,
        })
    }

    /// Send the candidate / block at `index` to the hardware.
    pub async fn dispatch<B: RegisterBus>(&self, interp: &Interpreter<'_, B>, index: usize) -> Result<(), OpError> {
        match self {
            Self::Integer(c) => {
                let Some(&candidate) = c.values.get(index) else {
                    return Ok(());
                };
                tracing::debug!(control = %c.name, channel = c.channel, index, candidate, "dispatch");
                match c.mode {
                    WriteMode::Single => interp.write(c.channel, c.reg, candidate).await,
                    WriteMode::Masked => interp.update_bits(c.channel, c.reg, c.mask, candidate).await,
                    WriteMode::Burst => match c.element {
                        ElementKind::Bytes => {
                            // Byte candidates were stored from one byte.
                            #[allow(clippy::cast_possible_truncation)]
                            let byte = candidate as u8;
                            interp.bulk_write(c.channel, c.reg, &[byte]).await
                        }
                        ElementKind::Words => {
                            interp
                                .bulk_write(c.channel, c.reg, &candidate.to_be_bytes())
                                .await
                        }
                    },
                }
            }
            Self::Enumerated(c) => {
                let Some((label, block)) = c.items.get(index) else {
                    return Ok(());
                };
                tracing::debug!(control = %c.name, channel = c.channel, %label, "dispatch");
                interp.execute(block, c.channel).await
            }
        }
    }
}

/// Kind and range of a control, as exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlKind {
    /// Integer range.
    Integer {
        /// Lowest value.
        min: i32,
        /// Highest value.
        max: i32,
        /// Step.
        step: i32,
    },
    /// Enumerated; values are label indices.
    Enumerated,
}

/// Description of one control for enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlInfo {
    /// Id for [`ControlPlane::get`] / [`ControlPlane::put`].
    pub id: ControlId,
    /// Stable name.
    pub name: String,
    /// Owning channel.
    pub channel: u8,
    /// Apply timing.
    pub timing: ApplyTiming,
    /// Kind and range.
    pub kind: ControlKind,
    /// Item labels (enumerated controls only).
    pub labels: Vec<String>,
}

// ── Table ────────────────────────────────────────────────────────────────────

/// All controls declared by the blob.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlTable {
    /// Controls, in declaration order (the order defines [`ControlId`]s).
    pub controls: Vec<KControl>,
}

impl ControlTable {
    /// Control `id`.
    #[must_use]
    pub fn get(&self, id: ControlId) -> Option<&KControl> {
        self.controls.get(id)
    }

    /// Id of the control called `name`.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<ControlId> {
        self.controls.iter().position(|c| c.name() == name)
    }

    /// Enumerate the controls.
    #[must_use]
    pub fn infos(&self) -> Vec<ControlInfo> {
        self.controls
            .iter()
            .enumerate()
            .map(|(id, c)| ControlInfo {
                id,
                name: String::from(c.name()),
                channel: c.channel(),
                timing: c.timing(),
                kind: match c {
                    KControl::Integer(i) => ControlKind::Integer {
                        min: i.min,
                        max: i.max,
                        step: i.step,
                    },
                    KControl::Enumerated(_) => ControlKind::Enumerated,
                },
                labels: match c {
                    KControl::Integer(_) => Vec::new(),
                    KControl::Enumerated(e) => e.items.iter().map(|(l, _)| l.clone()).collect(),
                },
            })
            .collect()
    }

    /// Decode a `KCNTR` payload.
    pub fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let n = c.count()?;
        let mut controls = Vec::with_capacity(n);
        for _ in 0..n {
            controls.push(decode_control(c)?);
        }
        Ok(Self { controls })
    }

    /// Append the `KCNTR` payload encoding.
    pub fn encode(&self, out: &mut Vec<u8>) {
        push_u32(out, len_u32(self.controls.len()));
        for control in &self.controls {
            encode_control(control, out);
        }
    }
}

fn decode_control(c: &mut ByteCursor<'_>) -> Result<KControl, ParseError> {
    let kind = c.u8()?;
    let name = c.name64()?;
    let channel = c.u8()?;
    let timing = ApplyTiming::from_u8(c.u8()?)?;
    match kind {
        0 => {
            let reg = RegAddr::from_raw(c.u32_le()?);
            let mode = match c.u8()? {
                0 => WriteMode::Single,
                1 => WriteMode::Burst,
                2 => WriteMode::Masked,
                other => return Err(invalid("write mode", other)),
            };
            let mask = c.u32_le()?;
            let min = c.i32_le()?;
            let max = c.i32_le()?;
            let step = c.i32_le()?;
            let default = c.i32_le()?;
            if step <= 0 {
                return Err(ParseError::InvalidRecord {
                    what: "control step",
                    value: step.unsigned_abs(),
                });
            }
            if min > max {
                return Err(ParseError::InvalidRecord {
                    what: "control range",
                    value: min.unsigned_abs(),
                });
            }
            let element = match c.u8()? {
                0 => ElementKind::Bytes,
                1 => ElementKind::Words,
                other => return Err(invalid("element kind", other)),
            };
            let count = c.count()?;
            let mut values = Vec::with_capacity(count);
            for _ in 0..count {
                values.push(match element {
                    ElementKind::Bytes => u32::from(c.u8()?),
                    ElementKind::Words => c.u32_le()?,
                });
            }
            Ok(KControl::Integer(IntegerControl {
                name,
                channel,
                timing,
                reg,
                mode,
                mask,
                min,
                max,
                step,
                default,
                element,
                values,
            }))
        }
        1 => {
            let default = c.u32_le()?;
            let count = c.count()?;
            let mut items = Vec::with_capacity(count);
            for _ in 0..count {
                let label = c.name64()?;
                items.push((label, CommandBlock::decode(c)?));
            }
            Ok(KControl::Enumerated(EnumControl {
                name,
                channel,
                timing,
                default,
                items,
            }))
        }
        other => Err(invalid("control kind", other)),
    }
}

fn encode_control(control: &KControl, out: &mut Vec<u8>) {
    match control {
        KControl::Integer(i) => {
            out.push(0);
            out.extend_from_slice(&encode_name(&i.name));
            out.push(i.channel);
            out.push(i.timing.to_u8());
            push_u32(out, i.reg.raw());
            out.push(match i.mode {
                WriteMode::Single => 0,
                WriteMode::Burst => 1,
                WriteMode::Masked => 2,
            });
            push_u32(out, i.mask);
            for v in [i.min, i.max, i.step, i.default] {
                out.extend_from_slice(&v.to_le_bytes());
            }
            out.push(match i.element {
                ElementKind::Bytes => 0,
                ElementKind::Words => 1,
            });
            push_u32(out, len_u32(i.values.len()));
            for &v in &i.values {
                match i.element {
                    ElementKind::Bytes => out.push(u8::try_from(v).unwrap_or(u8::MAX)),
                    ElementKind::Words => push_u32(out, v),
                }
            }
        }
        KControl::Enumerated(e) => {
            out.push(1);
            out.extend_from_slice(&encode_name(&e.name));
            out.push(e.channel);
            out.push(e.timing.to_u8());
            push_u32(out, e.default);
            push_u32(out, len_u32(e.items.len()));
            for (label, block) in &e.items {
                out.extend_from_slice(&encode_name(label));
                block.encode(out);
            }
        }
    }
}

fn push_u32(out: &mut Vec<u8>, v: u32) {
    out.extend_from_slice(&v.to_le_bytes());
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

fn invalid(what: &'static str, value: u8) -> ParseError {
    ParseError::InvalidRecord {
        what,
        value: u32::from(value),
    }
}

// ── Runtime ──────────────────────────────────────────────────────────────────

/// Current value of every control, indexed by [`ControlId`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlValues {
    values: Vec<i64>,
}

impl ControlValues {
    /// Values initialised from the controls' defaults.
    #[must_use]
    pub fn from_defaults(table: &ControlTable) -> Self {
        Self {
            values: table.controls.iter().map(KControl::default_value).collect(),
        }
    }

    /// Value of control `id`.
    #[must_use]
    pub fn get(&self, id: ControlId) -> Option<i64> {
        self.values.get(id).copied()
    }

    fn set(&mut self, id: ControlId, value: i64) {
        if let Some(v) = self.values.get_mut(id) {
            *v = value;
        }
    }
}

/// Whether a `put` reached the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutOutcome {
    /// Dispatched now.
    Applied,
    /// Stored; replayed at the control's power transition.
    Deferred,
}

/// Control get/put/replay over one blob and its runtime values.
pub struct ControlPlane<'a, B> {
    table: &'a ControlTable,
    values: &'a mut ControlValues,
    interp: Interpreter<'a, B>,
}

impl<'a, B: RegisterBus> ControlPlane<'a, B> {
    /// Control plane over `table` with `values`.
    pub fn new(table: &'a ControlTable, values: &'a mut ControlValues, interp: Interpreter<'a, B>) -> Self {
        Self { table, values, interp }
    }

    /// Enumerate the controls.
    pub fn controls(&self) -> Vec<ControlInfo> {
        self.table.infos()
    }

    /// Current value of control `id`.
    pub fn get(&self, id: ControlId) -> Result<i64, RangeError> {
        self.values.get(id).ok_or(RangeError::UnknownControl(id))
    }

    /// Set control `id` to `value`.
    ///
    /// Invalid values are rejected before anything changes. Otherwise the
    /// value is stored and, when the control applies any time or its channel
    /// is in `active_mask`, dispatched immediately. A dispatch failure is
    /// returned but the stored value is kept for later replay.
    pub async fn put(&mut self, id: ControlId, value: i64, active_mask: u8) -> Result<PutOutcome, DeviceError> {
        let control = self.table.get(id).ok_or(RangeError::UnknownControl(id))?;
        let index = control.validate(value)?;
        self.values.set(id, value);
        let channel_active = 1u8
            .checked_shl(u32::from(control.channel()))
            .is_some_and(|bit| active_mask & bit != 0);
        if control.timing() == ApplyTiming::Anytime || channel_active {
            control.dispatch(&self.interp, index).await?;
            Ok(PutOutcome::Applied)
        } else {
            tracing::debug!(control = control.name(), value, "stored for replay");
            Ok(PutOutcome::Deferred)
        }
    }

    /// [`put`](Self::put) by control name.
    pub async fn put_by_name(&mut self, name: &str, value: i64, active_mask: u8) -> Result<PutOutcome, DeviceError> {
        let id = self
            .table
            .find(name)
            .ok_or_else(|| RangeError::UnknownControlName(String::from(name)))?;
        self.put(id, value, active_mask).await
    }

    /// Dispatch the stored value of every `channel` control with `timing`.
    ///
    /// Every matching control is attempted; failures are folded together.
    pub async fn replay_all(&self, channel: u8, timing: ApplyTiming) -> Result<(), OpError> {
        let mut failure: Option<OpError> = None;
        let matching = self
            .table
            .controls
            .iter()
            .enumerate()
            .filter(|(_, c)| c.channel() == channel && c.timing() == timing);
        for (id, control) in matching {
            let Some(index) = self.values.get(id).and_then(|v| control.index_of(v)) else {
                tracing::warn!(control = control.name(), "stored value not dispatchable, skipped");
                continue;
            };
            if let Err(e) = control.dispatch(&self.interp, index).await {
                failure = Some(failure.map_or(e, |f| f.merge(e)));
            }
        }
        failure.map_or(Ok(()), Err)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use crate::cmdblock::Op;
    use crate::interpreter::{BusAccess, BusLock};
    use embassy_sync::mutex::Mutex;
    use platform::mocks::{BusOp, MockBus};

    const GAIN_REG: RegAddr = RegAddr::new(0, 0, 0x03);

    fn gain(mode: WriteMode, element: ElementKind, timing: ApplyTiming) -> KControl {
        KControl::Integer(IntegerControl {
            name: "gain".into(),
            channel: 0,
            timing,
            reg: GAIN_REG,
            mode,
            mask: 0x3E,
            min: -6,
            max: 6,
            step: 3,
            default: 0,
            element,
            values: vec![0x02, 0x04, 0x06, 0x08, 0x0A],
        })
    }

    fn mode_enum() -> KControl {
        KControl::Enumerated(EnumControl {
            name: "mode".into(),
            channel: 1,
            timing: ApplyTiming::PostPowerUp,
            default: 0,
            items: vec![
                ("speaker".into(), CommandBlock::new(vec![Op::SingleWrite { addr: RegAddr::new(0, 0, 0x10), value: 1 }])),
                ("receiver".into(), CommandBlock::new(vec![Op::SingleWrite { addr: RegAddr::new(0, 0, 0x10), value: 2 }])),
            ],
        })
    }

    #[test]
    fn test_integer_index_rules() {
        let KControl::Integer(c) = gain(WriteMode::Single, ElementKind::Bytes, ApplyTiming::Anytime) else {
            unreachable!()
        };
        assert_eq!(c.index_of(-6), Some(0));
        assert_eq!(c.index_of(6), Some(4));
        assert_eq!(c.index_of(-7), None);
        assert_eq!(c.index_of(7), None);
        assert_eq!(c.index_of(1), None);
        let short = IntegerControl {
            values: vec![1, 2],
            ..c
        };
        // In range and on step, but past the candidate array.
        assert_eq!(short.index_of(3), None);
    }

    #[test]
    fn test_enumerated_index_rules() {
        let c = mode_enum();
        assert_eq!(c.index_of(1), Some(1));
        assert_eq!(c.index_of(2), None);
        assert_eq!(c.index_of(-1), None);
    }

    #[tokio::test]
    async fn test_put_round_trip_dispatches_once() {
        let bus = MockBus::new();
        let lock: BusLock<MockBus> = Mutex::new(BusAccess::new(bus.clone()));
        let table = ControlTable {
            controls: vec![gain(WriteMode::Single, ElementKind::Bytes, ApplyTiming::PostPowerUp)],
        };
        let mut values = ControlValues::from_defaults(&table);
        let mut plane = ControlPlane::new(&table, &mut values, Interpreter::new(&lock));

        let outcome = plane.put(0, 3, 0b01).await.unwrap();
        assert_eq!(outcome, PutOutcome::Applied);
        assert_eq!(plane.get(0).unwrap(), 3);
        assert_eq!(bus.writes_to(0, GAIN_REG), 1);
        assert_eq!(bus.register(0, GAIN_REG), 0x08);
    }

    #[tokio::test]
    async fn test_rejected_value_changes_nothing() {
        let bus = MockBus::new();
        let lock: BusLock<MockBus> = Mutex::new(BusAccess::new(bus.clone()));
        let table = ControlTable {
            controls: vec![gain(WriteMode::Single, ElementKind::Bytes, ApplyTiming::Anytime)],
        };
        let mut values = ControlValues::from_defaults(&table);
        let mut plane = ControlPlane::new(&table, &mut values, Interpreter::new(&lock));

        let err = plane.put(0, 2, 0xFF).await.unwrap_err();
        assert!(matches!(err, DeviceError::Range(RangeError::ControlValue { .. })));
        assert_eq!(plane.get(0).unwrap(), 0);
        assert!(bus.ops().is_empty());
        assert!(matches!(plane.put(9, 0, 0).await, Err(DeviceError::Range(RangeError::UnknownControl(9)))));
    }

    #[tokio::test]
    async fn test_timed_control_deferred_until_replay() {
        let bus = MockBus::new();
        let lock: BusLock<MockBus> = Mutex::new(BusAccess::new(bus.clone()));
        let table = ControlTable {
            controls: vec![mode_enum()],
        };
        let mut values = ControlValues::from_defaults(&table);
        let mut plane = ControlPlane::new(&table, &mut values, Interpreter::new(&lock));

        assert_eq!(plane.put_by_name("mode", 1, 0b01).await.unwrap(), PutOutcome::Deferred);
        assert!(bus.ops().is_empty());

        plane.replay_all(1, ApplyTiming::PrePowerUp).await.unwrap();
        assert!(bus.ops().is_empty());
        plane.replay_all(1, ApplyTiming::PostPowerUp).await.unwrap();
        assert_eq!(bus.register(1, RegAddr::new(0, 0, 0x10)), 2);
    }

    #[tokio::test]
    async fn test_burst_words_big_endian() {
        let bus = MockBus::new();
        let lock: BusLock<MockBus> = Mutex::new(BusAccess::new(bus.clone()));
        let mut control = gain(WriteMode::Burst, ElementKind::Words, ApplyTiming::Anytime);
        if let KControl::Integer(c) = &mut control {
            c.values = vec![0x0102_0304];
            c.max = -6;
        }
        let table = ControlTable { controls: vec![control] };
        let mut values = ControlValues::from_defaults(&table);
        let mut plane = ControlPlane::new(&table, &mut values, Interpreter::new(&lock));

        plane.put(0, -6, 0).await.unwrap();
        let burst = bus.ops().into_iter().find_map(|op| match op {
            BusOp::BulkWrite { data, .. } => Some(data),
            _ => None,
        });
        assert_eq!(burst.unwrap(), [1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_masked_dispatch_uses_update_bits() {
        let bus = MockBus::new();
        let lock: BusLock<MockBus> = Mutex::new(BusAccess::new(bus.clone()));
        let table = ControlTable {
            controls: vec![gain(WriteMode::Masked, ElementKind::Bytes, ApplyTiming::Anytime)],
        };
        bus.set_register(0, GAIN_REG, 0xC1);
        let mut values = ControlValues::from_defaults(&table);
        let mut plane = ControlPlane::new(&table, &mut values, Interpreter::new(&lock));
        plane.put(0, 6, 0).await.unwrap();
        assert_eq!(bus.register(0, GAIN_REG), 0xC1 & !0x3E | 0x0A);
    }

    #[test]
    fn test_decode_encoded_table() {
        let table = ControlTable {
            controls: vec![
                gain(WriteMode::Masked, ElementKind::Bytes, ApplyTiming::PrePowerUp),
                gain(WriteMode::Burst, ElementKind::Words, ApplyTiming::Anytime),
                mode_enum(),
            ],
        };
        let mut raw = Vec::new();
        table.encode(&mut raw);
        let mut c = ByteCursor::new(&raw);
        assert_eq!(ControlTable::decode(&mut c).unwrap(), table);
        assert!(c.is_empty());
        let infos = table.infos();
        assert_eq!(infos[2].labels, ["speaker", "receiver"]);
    }

    #[test]
    fn test_zero_step_rejected() {
        let mut control = gain(WriteMode::Single, ElementKind::Bytes, ApplyTiming::Anytime);
        if let KControl::Integer(c) = &mut control {
            c.step = 0;
        }
        let mut raw = Vec::new();
        ControlTable { controls: vec![control] }.encode(&mut raw);
        assert!(matches!(
            ControlTable::decode(&mut ByteCursor::new(&raw)),
            Err(ParseError::InvalidRecord { what: "control step", .. })
        ));
    }
}
