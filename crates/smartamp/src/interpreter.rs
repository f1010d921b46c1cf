//! Command-block interpreter.
//!
//! The transport sits behind the bus lock together with the per-channel
//! `(book, page)` cursor, so bank switches are only issued when the cursor
//! actually changes. The lock is taken per opcode and released across
//! `Delay`, letting other channels' I/O proceed while one block sleeps.
//!
//! Transport failures never short-circuit a block: every opcode runs and the
//! failures are counted into a single [`OpError`].

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_time::Timer;
use platform::{RegAddr, RegisterBus};

use crate::cmdblock::{CommandBlock, Op};
use crate::config::MAX_CHANNELS;
use crate::error::OpError;

/// Channel value reported for failures of the shared reset line.
pub const SHARED_LINE: u8 = u8::MAX;

/// Transport plus the per-channel bank cursor.
#[derive(Debug)]
pub struct BusAccess<B> {
    bus: B,
    cursors: [Option<(u8, u8)>; MAX_CHANNELS],
}

/// Bus lock shared by every user of the transport.
pub type BusLock<B> = Mutex<CriticalSectionRawMutex, BusAccess<B>>;

impl<B: RegisterBus> BusAccess<B> {
    /// Wrap a transport; every cursor starts unknown.
    pub fn new(bus: B) -> Self {
        Self {
            bus,
            cursors: [None; MAX_CHANNELS],
        }
    }

    /// Underlying transport.
    pub fn bus(&self) -> &B {
        &self.bus
    }

    /// Forget every cursor (after a hardware reset).
    pub fn invalidate_all(&mut self) {
        self.cursors = [None; MAX_CHANNELS];
    }

    /// Forget one channel's cursor (after a software reset).
    pub fn invalidate(&mut self, channel: u8) {
        if let Some(c) = self.cursors.get_mut(usize::from(channel)) {
            *c = None;
        }
    }

    /// Cached bank for `channel`.
    pub fn cursor(&self, channel: u8) -> Option<(u8, u8)> {
        self.cursors.get(usize::from(channel)).copied().flatten()
    }

    async fn select(&mut self, channel: u8, addr: RegAddr) -> Result<(), B::Error> {
        let bank = addr.bank();
        if self.cursor(channel) == Some(bank) {
            return Ok(());
        }
        let (book, page) = bank;
        let slot = self.cursors.get_mut(usize::from(channel));
        match self.bus.select_page(channel, book, page).await {
            Ok(()) => {
                if let Some(c) = slot {
                    *c = Some(bank);
                }
                Ok(())
            }
            Err(e) => {
                if let Some(c) = slot {
                    *c = None;
                }
                Err(e)
            }
        }
    }

    /// Read one register.
    pub async fn read(&mut self, channel: u8, addr: RegAddr) -> Result<u32, B::Error> {
        self.select(channel, addr).await?;
        self.bus.read(channel, addr).await
    }

    /// Write one register.
    pub async fn write(&mut self, channel: u8, addr: RegAddr, value: u32) -> Result<(), B::Error> {
        self.select(channel, addr).await?;
        self.bus.write(channel, addr, value).await
    }

    /// Write consecutive registers.
    pub async fn bulk_write(&mut self, channel: u8, addr: RegAddr, data: &[u8]) -> Result<(), B::Error> {
        self.select(channel, addr).await?;
        self.bus.bulk_write(channel, addr, data).await
    }

    /// Read-modify-write.
    pub async fn update_bits(
        &mut self,
        channel: u8,
        addr: RegAddr,
        mask: u32,
        value: u32,
    ) -> Result<(), B::Error> {
        self.select(channel, addr).await?;
        self.bus.update_bits(channel, addr, mask, value).await
    }

    /// Pulse the shared reset line; every cursor is invalid afterwards.
    pub async fn hw_reset(&mut self) -> Result<(), B::Error> {
        let result = self.bus.hw_reset().await;
        self.invalidate_all();
        result
    }

    async fn apply(&mut self, channel: u8, op: &Op) -> Result<(), B::Error> {
        match op {
            Op::SingleWrite { addr, value } => self.write(channel, *addr, u32::from(*value)).await,
            Op::BurstWrite { addr, data } => self.bulk_write(channel, *addr, data).await,
            Op::UpdateBits { addr, mask, value } => {
                self.update_bits(channel, *addr, u32::from(*mask), u32::from(*value))
                    .await
            }
            Op::Delay { .. } => Ok(()),
        }
    }
}

/// Executes command blocks through the bus lock.
pub struct Interpreter<'a, B> {
    bus: &'a BusLock<B>,
}

impl<B> Clone for Interpreter<'_, B> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<B> Copy for Interpreter<'_, B> {}

impl<'a, B: RegisterBus> Interpreter<'a, B> {
    /// Interpreter over a shared bus lock.
    pub fn new(bus: &'a BusLock<B>) -> Self {
        Self { bus }
    }

    /// Execute `block` on `channel`, strictly in order.
    ///
    /// Every opcode runs even after failures; the returned error counts them.
    pub async fn execute(&self, block: &CommandBlock, channel: u8) -> Result<(), OpError> {
        let mut failed: u32 = 0;
        for op in block.ops() {
            log_op(channel, op);
            if let Op::Delay { ms } = op {
                Timer::after_millis(u64::from(*ms)).await;
                continue;
            }
            let result = self.bus.lock().await.apply(channel, op).await;
            if let Err(e) = result {
                failed = failed.saturating_add(1);
                tracing::warn!(channel, addr = op.addr().map_or(0, RegAddr::raw), error = ?e, "register op failed");
            }
        }
        if failed == 0 {
            Ok(())
        } else {
            Err(OpError { channel, failed })
        }
    }

    /// Read-and-compare: `true` when every `SingleWrite` register equals its
    /// value and every `UpdateBits` register matches under its mask.
    ///
    /// Bursts and delays are ignored. Read failures are counted like
    /// [`execute`](Self::execute) failures.
    pub async fn verify(&self, block: &CommandBlock, channel: u8) -> Result<bool, OpError> {
        let mut failed: u32 = 0;
        let mut matches = true;
        for op in block.ops() {
            let (addr, mask, expected) = match op {
                Op::SingleWrite { addr, value } => (*addr, 0xFF, *value),
                Op::UpdateBits { addr, mask, value } => (*addr, *mask, *value),
                Op::BurstWrite { .. } | Op::Delay { .. } => continue,
            };
            let result = self.bus.lock().await.read(channel, addr).await;
            match result {
                Ok(actual) => {
                    let ok = actual & u32::from(mask) == u32::from(expected & mask);
                    tracing::trace!(channel, %addr, actual, expected, ok, "verify");
                    matches &= ok;
                }
                Err(e) => {
                    failed = failed.saturating_add(1);
                    tracing::warn!(channel, %addr, error = ?e, "verify read failed");
                }
            }
        }
        if failed == 0 {
            Ok(matches)
        } else {
            Err(OpError { channel, failed })
        }
    }

    /// Read one register.
    pub async fn read(&self, channel: u8, addr: RegAddr) -> Result<u32, OpError> {
        let result = self.bus.lock().await.read(channel, addr).await;
        result.map_err(|e| {
            tracing::warn!(channel, %addr, error = ?e, "read failed");
            OpError::single(channel)
        })
    }

    /// Write one register.
    pub async fn write(&self, channel: u8, addr: RegAddr, value: u32) -> Result<(), OpError> {
        tracing::trace!(channel, %addr, value, "write");
        let result = self.bus.lock().await.write(channel, addr, value).await;
        result.map_err(|e| {
            tracing::warn!(channel, %addr, error = ?e, "write failed");
            OpError::single(channel)
        })
    }

    /// Write consecutive registers.
    pub async fn bulk_write(&self, channel: u8, addr: RegAddr, data: &[u8]) -> Result<(), OpError> {
        tracing::trace!(channel, %addr, len = data.len(), "bulk write");
        let result = self.bus.lock().await.bulk_write(channel, addr, data).await;
        result.map_err(|e| {
            tracing::warn!(channel, %addr, error = ?e, "bulk write failed");
            OpError::single(channel)
        })
    }

    /// Read-modify-write.
    pub async fn update_bits(&self, channel: u8, addr: RegAddr, mask: u32, value: u32) -> Result<(), OpError> {
        tracing::trace!(channel, %addr, mask, value, "update bits");
        let result = self.bus.lock().await.update_bits(channel, addr, mask, value).await;
        result.map_err(|e| {
            tracing::warn!(channel, %addr, error = ?e, "update bits failed");
            OpError::single(channel)
        })
    }

    /// Pulse the shared reset line and invalidate every cursor.
    pub async fn hw_reset(&self) -> Result<(), OpError> {
        tracing::debug!("hardware reset");
        let result = self.bus.lock().await.hw_reset().await;
        result.map_err(|e| {
            tracing::error!(error = ?e, "hardware reset failed");
            OpError::single(SHARED_LINE)
        })
    }
}

fn log_op(channel: u8, op: &Op) {
    match op {
        Op::SingleWrite { addr, value } => {
            let (book, page) = addr.bank();
            tracing::trace!(channel, book, page, reg = addr.reg(), value, "single write");
        }
        Op::BurstWrite { addr, data } => {
            let (book, page) = addr.bank();
            tracing::trace!(channel, book, page, reg = addr.reg(), len = data.len(), "burst write");
        }
        Op::UpdateBits { addr, mask, value } => {
            let (book, page) = addr.bank();
            tracing::trace!(channel, book, page, reg = addr.reg(), mask, value, "update bits");
        }
        Op::Delay { ms } => tracing::trace!(channel, ms, "delay"),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;
    use platform::mocks::{BusOp, MockBus};

    fn lock(bus: &MockBus) -> BusLock<MockBus> {
        Mutex::new(BusAccess::new(bus.clone()))
    }

    #[tokio::test]
    async fn test_page_select_only_on_bank_change() {
        let bus = MockBus::new();
        let access = lock(&bus);
        let interp = Interpreter::new(&access);
        let block = CommandBlock::new(vec![
            Op::SingleWrite { addr: RegAddr::new(0, 0, 1), value: 1 },
            Op::SingleWrite { addr: RegAddr::new(0, 0, 2), value: 2 },
            Op::SingleWrite { addr: RegAddr::new(0, 1, 2), value: 3 },
            Op::SingleWrite { addr: RegAddr::new(0, 1, 3), value: 4 },
        ]);
        interp.execute(&block, 0).await.unwrap();
        assert_eq!(bus.page_selects(0), 2);
        // Second run starts on page 1, so the first op switches back.
        interp.execute(&block, 0).await.unwrap();
        assert_eq!(bus.page_selects(0), 4);
    }

    #[tokio::test]
    async fn test_cursor_is_per_channel() {
        let bus = MockBus::new();
        let access = lock(&bus);
        let interp = Interpreter::new(&access);
        let addr = RegAddr::new(0, 4, 0);
        interp.write(0, addr, 1).await.unwrap();
        interp.write(1, addr, 1).await.unwrap();
        interp.write(0, addr, 2).await.unwrap();
        assert_eq!(bus.page_selects(0), 1);
        assert_eq!(bus.page_selects(1), 1);
    }

    #[tokio::test]
    async fn test_hw_reset_invalidates_cursors() {
        let bus = MockBus::new();
        let access = lock(&bus);
        let interp = Interpreter::new(&access);
        let addr = RegAddr::new(0, 4, 0);
        interp.write(0, addr, 1).await.unwrap();
        interp.hw_reset().await.unwrap();
        assert_eq!(access.lock().await.cursor(0), None);
        interp.write(0, addr, 1).await.unwrap();
        assert_eq!(bus.page_selects(0), 2);
    }

    #[tokio::test]
    async fn test_delay_issues_no_bus_io() {
        let bus = MockBus::new();
        let access = lock(&bus);
        let interp = Interpreter::new(&access);
        interp
            .execute(&CommandBlock::new(vec![Op::Delay { ms: 1 }]), 0)
            .await
            .unwrap();
        assert!(bus.ops().is_empty());
    }

    #[tokio::test]
    async fn test_burst_and_update_dispatch() {
        let bus = MockBus::new();
        let access = lock(&bus);
        let interp = Interpreter::new(&access);
        let base = RegAddr::new(0, 0, 0x10);
        bus.set_register(0, base, 0xF0);
        let block = CommandBlock::new(vec![
            Op::UpdateBits { addr: base, mask: 0x0F, value: 0x05 },
            Op::BurstWrite { addr: RegAddr::new(0, 0, 0x20), data: vec![9, 8] },
        ]);
        interp.execute(&block, 0).await.unwrap();
        assert_eq!(bus.register(0, base), 0xF5);
        assert_eq!(bus.register(0, RegAddr::new(0, 0, 0x21)), 8);
        assert!(bus
            .ops()
            .iter()
            .any(|op| matches!(op, BusOp::BulkWrite { data, .. } if data == &[9, 8])));
    }

    #[tokio::test]
    async fn test_verify_compares_under_mask() {
        let bus = MockBus::new();
        let access = lock(&bus);
        let interp = Interpreter::new(&access);
        let reg = RegAddr::new(0, 0, 0x02);
        bus.set_register(0, reg, 0x80);
        let check = CommandBlock::new(vec![Op::UpdateBits { addr: reg, mask: 0x03, value: 0x00 }]);
        assert!(interp.verify(&check, 0).await.unwrap());
        bus.set_register(0, reg, 0x81);
        assert!(!interp.verify(&check, 0).await.unwrap());
        // Verification never writes.
        assert!(bus.ops().iter().all(|op| !matches!(op, BusOp::Write { .. })));
    }
}
