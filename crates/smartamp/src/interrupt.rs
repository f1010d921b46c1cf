//! Interrupt tables, classification and storm debounce.
//!
//! `INTRP` payload:
//! ```text
//! u32 n, n × { name, u32 reg, u32 mask, u32 actions, u8 clock_based }
//! CommandBlock enable, CommandBlock disable, CommandBlock clear
//! u32 processing_delay_ms
//! u32 m, m × u32 dump_register
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use embassy_time::{Duration, Instant};
use platform::{RegAddr, RegisterBus};

use crate::blob::cursor::ByteCursor;
use crate::cmdblock::CommandBlock;
use crate::error::{OpError, ParseError};
use crate::interpreter::Interpreter;
use crate::profile::encode_name;

/// Recovery action: software reset of the channel.
pub const ACTION_SW_RESET: u32 = 1 << 0;
/// Recovery action: hardware reset of every channel.
pub const ACTION_HW_RESET: u32 = 1 << 1;
/// Recovery action: make sure the channel is powered.
pub const ACTION_FORCE_POWER_ON: u32 = 1 << 2;

/// One interrupt source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterruptDescriptor {
    /// Diagnostic name.
    pub name: String,
    /// Status register.
    pub reg: RegAddr,
    /// Bits signalling this source.
    pub mask: u32,
    /// `ACTION_*` bits.
    pub actions: u32,
    /// Expected during normal clocking; not a fault by itself.
    pub clock_based: bool,
}

/// A channel's interrupt sources and their control blocks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptTable {
    /// Sources in authoring order.
    pub descriptors: Vec<InterruptDescriptor>,
    /// Unmask interrupts.
    pub enable: CommandBlock,
    /// Mask interrupts.
    pub disable: CommandBlock,
    /// Clear latched status.
    pub clear: CommandBlock,
    /// Wait after clearing before acting.
    pub processing_delay_ms: u32,
    /// Registers dumped when a channel is stuck.
    pub dump_registers: Vec<RegAddr>,
}

impl InterruptTable {
    /// Decode an `INTRP` payload.
    pub fn decode(c: &mut ByteCursor<'_>) -> Result<Self, ParseError> {
        let n = c.count()?;
        let mut descriptors = Vec::with_capacity(n);
        for _ in 0..n {
            let name = c.name64()?;
            let reg = RegAddr::from_raw(c.u32_le()?);
            let mask = c.u32_le()?;
            let actions = c.u32_le()?;
            let clock_based = c.u8()? != 0;
            descriptors.push(InterruptDescriptor {
                name,
                reg,
                mask,
                actions,
                clock_based,
            });
        }
        let enable = CommandBlock::decode(c)?;
        let disable = CommandBlock::decode(c)?;
        let clear = CommandBlock::decode(c)?;
        let processing_delay_ms = c.u32_le()?;
        let m = c.count()?;
        let mut dump_registers = Vec::with_capacity(m);
        for _ in 0..m {
            dump_registers.push(RegAddr::from_raw(c.u32_le()?));
        }
        Ok(Self {
            descriptors,
            enable,
            disable,
            clear,
            processing_delay_ms,
            dump_registers,
        })
    }

    /// Append the `INTRP` payload encoding.
    pub fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&len_u32(self.descriptors.len()).to_le_bytes());
        for d in &self.descriptors {
            out.extend_from_slice(&encode_name(&d.name));
            out.extend_from_slice(&d.reg.raw().to_le_bytes());
            out.extend_from_slice(&d.mask.to_le_bytes());
            out.extend_from_slice(&d.actions.to_le_bytes());
            out.push(u8::from(d.clock_based));
        }
        self.enable.encode(out);
        self.disable.encode(out);
        self.clear.encode(out);
        out.extend_from_slice(&self.processing_delay_ms.to_le_bytes());
        out.extend_from_slice(&len_u32(self.dump_registers.len()).to_le_bytes());
        for reg in &self.dump_registers {
            out.extend_from_slice(&reg.raw().to_le_bytes());
        }
    }
}

fn len_u32(len: usize) -> u32 {
    u32::try_from(len).unwrap_or(u32::MAX)
}

// ── Counters ─────────────────────────────────────────────────────────────────

/// Per-descriptor detection counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqCounters {
    /// Detections since the counters were last read (saturates at 255).
    pub since_read: u8,
    /// Detections since the blob was loaded (saturating).
    pub total: u64,
}

impl IrqCounters {
    /// Count one detection.
    pub fn record(&mut self) {
        self.since_read = self.since_read.saturating_add(1);
        self.total = self.total.saturating_add(1);
    }

    /// Snapshot, resetting `since_read`.
    pub fn take(&mut self) -> Self {
        let snapshot = *self;
        self.since_read = 0;
        snapshot
    }
}

// ── Classification ───────────────────────────────────────────────────────────

/// Outcome of polling a channel's interrupt registers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InterruptReadResult {
    /// OR of the detected descriptors' actions.
    pub actions: u32,
    /// At least one clock-based source fired.
    pub clock_fired: bool,
    /// At least one non-clock source fired.
    pub non_clock_fired: bool,
    /// Indices of detected descriptors.
    pub detected: Vec<usize>,
}

impl InterruptReadResult {
    /// Anything fired.
    #[must_use]
    pub fn any(&self) -> bool {
        !self.detected.is_empty()
    }

    /// Only clock-based sources fired.
    #[must_use]
    pub fn clock_only(&self) -> bool {
        self.clock_fired && !self.non_clock_fired
    }

    /// A software or hardware reset is requested.
    #[must_use]
    pub fn requires_reset(&self) -> bool {
        self.actions & (ACTION_SW_RESET | ACTION_HW_RESET) != 0
    }

    /// A hardware reset is requested.
    #[must_use]
    pub fn requires_hw_reset(&self) -> bool {
        self.actions & ACTION_HW_RESET != 0
    }

    /// The channel must be powered.
    #[must_use]
    pub fn requires_power_on(&self) -> bool {
        self.actions & ACTION_FORCE_POWER_ON != 0
    }
}

/// Interrupt operations for one channel.
pub struct InterruptManager<'a, B> {
    table: &'a InterruptTable,
    interp: Interpreter<'a, B>,
}

impl<'a, B: RegisterBus> InterruptManager<'a, B> {
    /// Manager for `table`.
    pub fn new(table: &'a InterruptTable, interp: Interpreter<'a, B>) -> Self {
        Self { table, interp }
    }

    /// Poll the status registers and classify what fired.
    ///
    /// Each distinct register is read once, in first-seen order. Clock-based
    /// sources are not polled while the channel is unpowered. `counters`
    /// is indexed like the descriptors; detections bump them.
    pub async fn read_and_classify(
        &self,
        channel: u8,
        powered: bool,
        counters: &mut [IrqCounters],
    ) -> Result<InterruptReadResult, OpError> {
        let mut values: Vec<(RegAddr, Option<u32>)> = Vec::new();
        let mut failed: u32 = 0;
        let polled = self
            .table
            .descriptors
            .iter()
            .enumerate()
            .filter(|(_, d)| powered || !d.clock_based);

        let mut result = InterruptReadResult::default();
        for (index, desc) in polled {
            let value = match values.iter().find(|(reg, _)| *reg == desc.reg) {
                Some((_, v)) => *v,
                None => {
                    let v = match self.interp.read(channel, desc.reg).await {
                        Ok(v) => Some(v),
                        Err(e) => {
                            failed = failed.saturating_add(e.failed);
                            None
                        }
                    };
                    values.push((desc.reg, v));
                    v
                }
            };
            let Some(value) = value else { continue };
            if value & desc.mask == 0 {
                continue;
            }
            tracing::debug!(channel, source = %desc.name, value, "interrupt detected");
            if let Some(c) = counters.get_mut(index) {
                c.record();
            }
            result.actions |= desc.actions;
            if desc.clock_based {
                result.clock_fired = true;
            } else {
                result.non_clock_fired = true;
            }
            result.detected.push(index);
        }
        if failed == 0 {
            Ok(result)
        } else {
            Err(OpError { channel, failed })
        }
    }

    /// Unmask interrupts.
    pub async fn enable(&self, channel: u8) -> Result<(), OpError> {
        self.interp.execute(&self.table.enable, channel).await
    }

    /// Mask interrupts.
    pub async fn disable(&self, channel: u8) -> Result<(), OpError> {
        self.interp.execute(&self.table.disable, channel).await
    }

    /// Clear latched status.
    pub async fn clear(&self, channel: u8) -> Result<(), OpError> {
        self.interp.execute(&self.table.clear, channel).await
    }

    /// Read and log the diagnostic registers; returns what could be read.
    pub async fn dump_registers(&self, channel: u8) -> Vec<(RegAddr, u32)> {
        let mut out = Vec::with_capacity(self.table.dump_registers.len());
        for &reg in &self.table.dump_registers {
            match self.interp.read(channel, reg).await {
                Ok(value) => {
                    tracing::error!(channel, %reg, value, "stuck interrupt dump");
                    out.push((reg, value));
                }
                Err(_) => tracing::error!(channel, %reg, "stuck interrupt dump: read failed"),
            }
        }
        out
    }
}

// ── Debounce ─────────────────────────────────────────────────────────────────

/// What to do with a detection after debounce.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebounceVerdict {
    /// Handle it.
    Act,
    /// Too many detections within the window: dump and skip.
    Stuck,
}

/// Detection counter over a sliding start window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IrqDebounce {
    count: u32,
    window_start: Option<Instant>,
}

impl IrqDebounce {
    /// Record a detection at `now`.
    ///
    /// The window opens at the first detection; more than `limit` detections
    /// before it expires mark the channel stuck. The window then restarts on
    /// the first detection after expiry.
    pub fn on_detection(&mut self, now: Instant, limit: u32, window: Duration) -> DebounceVerdict {
        let expired = self
            .window_start
            .map_or(true, |start| now.checked_duration_since(start).map_or(false, |d| d > window));
        if expired {
            self.window_start = Some(now);
            self.count = 1;
        } else {
            self.count = self.count.saturating_add(1);
        }
        if self.count > limit {
            DebounceVerdict::Stuck
        } else {
            DebounceVerdict::Act
        }
    }

    /// Detections counted in the current window.
    #[must_use]
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Forget all history.
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
