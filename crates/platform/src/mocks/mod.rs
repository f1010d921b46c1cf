//! Mock implementations for testing
//!
//! This module provides mock implementations of the platform traits
//! for use in unit and integration tests.
//!
//! Both mocks are cheap handles over shared state: keep a clone in the test
//! after handing the other one to the code under test.

#![cfg(any(test, feature = "std"))]

use alloc::collections::{BTreeMap, BTreeSet, VecDeque};
use alloc::string::{String, ToString};
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::cell::RefCell;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;

use crate::firmware::{FirmwareCompletion, FirmwareSource};
use crate::regmap::{RegAddr, RegisterBus};

// ── MockBus ──────────────────────────────────────────────────────────────────

/// One recorded transport call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BusOp {
    /// `select_page(channel, book, page)`
    SelectPage {
        /// Channel
        channel: u8,
        /// Book
        book: u8,
        /// Page
        page: u8,
    },
    /// `read(channel, addr)`
    Read {
        /// Channel
        channel: u8,
        /// Address
        addr: RegAddr,
    },
    /// `write(channel, addr, value)`
    Write {
        /// Channel
        channel: u8,
        /// Address
        addr: RegAddr,
        /// Value
        value: u32,
    },
    /// `bulk_write(channel, addr, data)`
    BulkWrite {
        /// Channel
        channel: u8,
        /// Start address
        addr: RegAddr,
        /// Payload
        data: Vec<u8>,
    },
    /// `update_bits(channel, addr, mask, value)`
    UpdateBits {
        /// Channel
        channel: u8,
        /// Address
        addr: RegAddr,
        /// Mask
        mask: u32,
        /// Value
        value: u32,
    },
    /// `hw_reset()`
    HwReset,
}

impl BusOp {
    /// Channel addressed by this call (`None` for a hardware reset).
    pub fn channel(&self) -> Option<u8> {
        match self {
            Self::SelectPage { channel, .. }
            | Self::Read { channel, .. }
            | Self::Write { channel, .. }
            | Self::BulkWrite { channel, .. }
            | Self::UpdateBits { channel, .. } => Some(*channel),
            Self::HwReset => None,
        }
    }

    /// Register addressed by this call, if any.
    pub fn addr(&self) -> Option<RegAddr> {
        match self {
            Self::Read { addr, .. }
            | Self::Write { addr, .. }
            | Self::BulkWrite { addr, .. }
            | Self::UpdateBits { addr, .. } => Some(*addr),
            Self::SelectPage { .. } | Self::HwReset => None,
        }
    }
}

/// Error returned by [`MockBus`] for injected failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MockBusError {
    /// Channel the failing call addressed.
    pub channel: u8,
}

#[derive(Default)]
struct BusState {
    registers: BTreeMap<(u8, RegAddr), u32>,
    log: Vec<BusOp>,
    failing_channels: BTreeSet<u8>,
    failing_registers: BTreeSet<(u8, RegAddr)>,
}

impl BusState {
    fn check(&self, channel: u8, addr: Option<RegAddr>) -> Result<(), MockBusError> {
        let reg_fails = addr.is_some_and(|a| self.failing_registers.contains(&(channel, a)));
        if self.failing_channels.contains(&channel) || reg_fails {
            Err(MockBusError { channel })
        } else {
            Ok(())
        }
    }
}

/// In-memory register file that records every call.
///
/// Writes land in the register file, reads return it (zero when never
/// written). Failures are injected per channel or per register; a failing
/// call is still recorded in the log.
#[derive(Clone)]
pub struct MockBus {
    state: Arc<Mutex<CriticalSectionRawMutex, RefCell<BusState>>>,
}

impl MockBus {
    /// Create an empty mock bus.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RefCell::new(BusState::default()))),
        }
    }

    fn with<R>(&self, f: impl FnOnce(&mut BusState) -> R) -> R {
        self.state.lock(|cell| f(&mut cell.borrow_mut()))
    }

    /// Preset a register value (e.g. an interrupt latch).
    pub fn set_register(&self, channel: u8, addr: RegAddr, value: u32) {
        self.with(|s| {
            s.registers.insert((channel, addr), value);
        });
    }

    /// Current register value.
    pub fn register(&self, channel: u8, addr: RegAddr) -> u32 {
        self.with(|s| s.registers.get(&(channel, addr)).copied().unwrap_or(0))
    }

    /// Make every call addressing `channel` fail.
    pub fn fail_channel(&self, channel: u8) {
        self.with(|s| {
            s.failing_channels.insert(channel);
        });
    }

    /// Make every call addressing `addr` on `channel` fail.
    pub fn fail_register(&self, channel: u8, addr: RegAddr) {
        self.with(|s| {
            s.failing_registers.insert((channel, addr));
        });
    }

    /// Remove all injected failures.
    pub fn clear_failures(&self) {
        self.with(|s| {
            s.failing_channels.clear();
            s.failing_registers.clear();
        });
    }

    /// Snapshot of the call log.
    pub fn ops(&self) -> Vec<BusOp> {
        self.with(|s| s.log.clone())
    }

    /// Forget recorded calls (register contents are kept).
    pub fn clear_log(&self) {
        self.with(|s| s.log.clear());
    }

    /// Number of writes of any kind (`write`, `bulk_write`, `update_bits`)
    /// that addressed `addr` on `channel`.
    pub fn writes_to(&self, channel: u8, addr: RegAddr) -> usize {
        self.with(|s| {
            s.log
                .iter()
                .filter(|op| {
                    matches!(
                        op,
                        BusOp::Write { .. } | BusOp::BulkWrite { .. } | BusOp::UpdateBits { .. }
                    ) && op.channel() == Some(channel)
                        && op.addr() == Some(addr)
                })
                .count()
        })
    }

    /// Number of bank switches issued for `channel`.
    pub fn page_selects(&self, channel: u8) -> usize {
        self.with(|s| {
            s.log
                .iter()
                .filter(|op| matches!(op, BusOp::SelectPage { channel: c, .. } if *c == channel))
                .count()
        })
    }

    /// Number of hardware resets issued.
    pub fn hw_resets(&self) -> usize {
        self.with(|s| s.log.iter().filter(|op| **op == BusOp::HwReset).count())
    }
}

impl RegisterBus for MockBus {
    type Error = MockBusError;

    async fn select_page(&mut self, channel: u8, book: u8, page: u8) -> Result<(), Self::Error> {
        self.with(|s| {
            s.log.push(BusOp::SelectPage {
                channel,
                book,
                page,
            });
            s.check(channel, None)
        })
    }

    async fn read(&mut self, channel: u8, addr: RegAddr) -> Result<u32, Self::Error> {
        self.with(|s| {
            s.log.push(BusOp::Read { channel, addr });
            s.check(channel, Some(addr))?;
            Ok(s.registers.get(&(channel, addr)).copied().unwrap_or(0))
        })
    }

    async fn write(&mut self, channel: u8, addr: RegAddr, value: u32) -> Result<(), Self::Error> {
        self.with(|s| {
            s.log.push(BusOp::Write {
                channel,
                addr,
                value,
            });
            s.check(channel, Some(addr))?;
            s.registers.insert((channel, addr), value);
            Ok(())
        })
    }

    async fn bulk_write(
        &mut self,
        channel: u8,
        addr: RegAddr,
        data: &[u8],
    ) -> Result<(), Self::Error> {
        self.with(|s| {
            s.log.push(BusOp::BulkWrite {
                channel,
                addr,
                data: data.to_vec(),
            });
            s.check(channel, Some(addr))?;
            for (offset, byte) in (0u32..).zip(data) {
                let reg = RegAddr::from_raw(addr.raw().saturating_add(offset));
                s.registers.insert((channel, reg), u32::from(*byte));
            }
            Ok(())
        })
    }

    async fn update_bits(
        &mut self,
        channel: u8,
        addr: RegAddr,
        mask: u32,
        value: u32,
    ) -> Result<(), Self::Error> {
        self.with(|s| {
            s.log.push(BusOp::UpdateBits {
                channel,
                addr,
                mask,
                value,
            });
            s.check(channel, Some(addr))?;
            let reg = s.registers.entry((channel, addr)).or_insert(0);
            *reg = (*reg & !mask) | (value & mask);
            Ok(())
        })
    }

    async fn hw_reset(&mut self) -> Result<(), Self::Error> {
        self.with(|s| {
            s.log.push(BusOp::HwReset);
            s.registers.clear();
        });
        Ok(())
    }
}

impl Default for MockBus {
    fn default() -> Self {
        Self::new()
    }
}

// ── MockFirmware ─────────────────────────────────────────────────────────────

#[derive(Default)]
struct FirmwareState {
    responses: VecDeque<Option<Vec<u8>>>,
    fallback: Option<Vec<u8>>,
    requests: Vec<String>,
}

/// Firmware source that answers synchronously from a queue of responses.
///
/// Each request pops the next queued response; once the queue is empty the
/// fallback image (if any) is served.
#[derive(Clone)]
pub struct MockFirmware {
    state: Arc<Mutex<CriticalSectionRawMutex, RefCell<FirmwareState>>>,
}

impl MockFirmware {
    /// Source with no image at all: every request completes with `None`.
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(RefCell::new(FirmwareState::default()))),
        }
    }

    /// Source that always serves `image`.
    pub fn with_image(image: Vec<u8>) -> Self {
        let fw = Self::new();
        fw.set_fallback(Some(image));
        fw
    }

    /// Queue one response for the next request.
    pub fn push_response(&self, image: Option<Vec<u8>>) {
        self.state
            .lock(|cell| cell.borrow_mut().responses.push_back(image));
    }

    /// Replace the image served once the queue is drained.
    pub fn set_fallback(&self, image: Option<Vec<u8>>) {
        self.state.lock(|cell| cell.borrow_mut().fallback = image);
    }

    /// Number of requests received so far.
    pub fn request_count(&self) -> usize {
        self.state.lock(|cell| cell.borrow().requests.len())
    }

    /// Names requested so far.
    pub fn requested_names(&self) -> Vec<String> {
        self.state.lock(|cell| cell.borrow().requests.clone())
    }
}

impl FirmwareSource for MockFirmware {
    fn request(&mut self, name: &str, completion: &FirmwareCompletion) {
        let image = self.state.lock(|cell| {
            let mut s = cell.borrow_mut();
            s.requests.push(name.to_string());
            match s.responses.pop_front() {
                Some(queued) => queued,
                None => s.fallback.clone(),
            }
        });
        completion.complete(image);
    }
}

impl Default for MockFirmware {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_mock_bus_register_file() {
        let mut bus = MockBus::new();
        let addr = RegAddr::new(0, 0, 0x02);

        bus.write(0, addr, 0x0D).await.unwrap();
        assert_eq!(bus.read(0, addr).await.unwrap(), 0x0D);

        bus.update_bits(0, addr, 0x03, 0x00).await.unwrap();
        assert_eq!(bus.register(0, addr), 0x0C);

        // Channels have separate register files.
        assert_eq!(bus.read(1, addr).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_mock_bus_failure_is_logged() {
        let mut bus = MockBus::new();
        let addr = RegAddr::new(0, 0, 0x10);
        bus.fail_register(1, addr);

        assert!(bus.write(1, addr, 1).await.is_err());
        assert!(bus.write(0, addr, 1).await.is_ok());
        assert_eq!(bus.writes_to(1, addr), 1);
        assert_eq!(bus.register(1, addr), 0);

        bus.clear_failures();
        assert!(bus.write(1, addr, 1).await.is_ok());
    }

    #[tokio::test]
    async fn test_mock_bus_hw_reset_clears_registers() {
        let mut bus = MockBus::new();
        let addr = RegAddr::new(0, 0, 0x10);
        bus.write(0, addr, 7).await.unwrap();
        bus.hw_reset().await.unwrap();
        assert_eq!(bus.register(0, addr), 0);
        assert_eq!(bus.hw_resets(), 1);
    }

    #[tokio::test]
    async fn test_mock_firmware_queue_then_fallback() {
        let mut fw = MockFirmware::with_image(vec![1, 2, 3]);
        fw.push_response(None);
        let done = FirmwareCompletion::new();

        fw.request("amp.bin", &done);
        assert_eq!(done.wait().await, None);

        fw.request("amp.bin", &done);
        assert_eq!(done.wait().await, Some(vec![1, 2, 3]));
        assert_eq!(fw.request_count(), 2);
    }
}
