//! Interrupt recovery and fail-safe escalation.
//!
//! One recovery pass:
//!
//! 1. mask interrupts on every channel
//! 2. per channel: poll + classify; storm debounce; clear; processing delay
//! 3. act on the first matching branch:
//!
//! | Fired                       | Action                                           |
//! |-----------------------------|--------------------------------------------------|
//! | clock sources only          | unmask                                           |
//! | reset requested             | sw reset + re-init (hw reset: every channel), restore `Active` / `Mute` |
//! | power-on forced             | verify power check; re-run `→Active` on mismatch |
//! | any other non-clock source  | `→Shutdown` (nothing if already shut down)       |
//!
//! 4. unmask channels that nothing fired on and that were unmasked before.
//!
//! Only `Active` channels are ever unmasked here; muted and shut-down
//! channels keep their interrupts masked until they next reach `Active`.
//!
//! When every channel has a latched transport error the device is hardware
//! reset and re-initialised, up to `max_auto_restarts` times; after that the
//! channels are shut down and locked out.

use embassy_time::{Duration, Instant, Timer};
use platform::{FirmwareSource, RegisterBus};

use super::{channel_bit, channels_in, Device, DeviceState, ErrorClass, PowerState};
use crate::blob::ParsedBlob;
use crate::error::{DeviceError, OpError};
use crate::interrupt::{DebounceVerdict, InterruptManager, InterruptReadResult};
use crate::profile::all_channels;

/// Channel masks describing what one recovery pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Something fired.
    pub detected: u8,
    /// Classified as stuck and skipped.
    pub stuck: u8,
    /// Only clock sources fired; unmasked again.
    pub clock_only: u8,
    /// Software or hardware reset performed.
    pub reset: u8,
    /// Power check failed; `→Active` re-run.
    pub repowered: u8,
    /// Shut down because of a non-clock fault.
    pub shut_down: u8,
}

impl<B: RegisterBus, F: FirmwareSource> Device<B, F> {
    /// Called from the interrupt line; schedules a recovery pass.
    pub fn notify_interrupt(&self) {
        self.irq_pending.signal(());
    }

    /// Interrupt loop. Never returns.
    pub async fn run_interrupts(&self) {
        loop {
            self.irq_pending.wait().await;
            Timer::after_millis(self.config.irq_debounce_delay_ms).await;
            match self.handle_interrupt().await {
                Ok(report) => tracing::debug!(?report, "interrupt pass done"),
                Err(e) => tracing::warn!(error = %e, "interrupt ignored"),
            }
        }
    }

    /// One recovery pass over every channel.
    pub async fn handle_interrupt(&self) -> Result<RecoveryReport, DeviceError> {
        let mut st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let count = blob.channel_count();
        let mut report = RecoveryReport::default();
        if !blob.header.interrupts_supported() {
            return Ok(report);
        }

        let enabled_before = (0..count)
            .filter(|&ch| st.runtime(ch).is_some_and(|r| r.irq_enabled))
            .fold(0u8, |mask, ch| mask | channel_bit(ch));

        let mut acc = None;
        for ch in 0..count {
            if let Some(table) = blob.interrupts(ch) {
                let masked = InterruptManager::new(table, self.interp()).disable(ch).await;
                st.note(masked, &mut acc);
                st.set_irq_enabled(ch, false);
            }
        }

        let now = Instant::now();
        let window = Duration::from_millis(self.config.irq_storm_window_ms);
        for ch in 0..count {
            let Some(table) = blob.interrupts(ch) else {
                continue;
            };
            let irq = InterruptManager::new(table, self.interp());
            let powered = st.power(ch) == PowerState::Active;

            let mut counters = st
                .runtime_mut(ch)
                .map(|r| core::mem::take(&mut r.counters))
                .unwrap_or_default();
            let read = irq.read_and_classify(ch, powered, &mut counters).await;
            if let Some(r) = st.runtime_mut(ch) {
                r.counters = counters;
            }
            let result = match read {
                Ok(result) => result,
                Err(e) => {
                    st.note(Err(e), &mut acc);
                    continue;
                }
            };
            if !result.any() {
                continue;
            }
            report.detected |= channel_bit(ch);

            let limit = self.config.irq_storm_limit;
            let verdict = st
                .runtime_mut(ch)
                .map_or(DebounceVerdict::Act, |r| r.debounce.on_detection(now, limit, window));
            if verdict == DebounceVerdict::Stuck {
                st.stats.stuck_detections = st.stats.stuck_detections.saturating_add(1);
                st.errors.set(ErrorClass::StuckInterrupt, ch);
                report.stuck |= channel_bit(ch);
                tracing::error!(channel = ch, limit, "interrupt storm, channel skipped");
                irq.dump_registers(ch).await;
                continue;
            }

            st.stats.recoveries = st.stats.recoveries.saturating_add(1);
            let cleared = irq.clear(ch).await;
            st.note(cleared, &mut acc);
            if table.processing_delay_ms > 0 {
                Timer::after_millis(u64::from(table.processing_delay_ms)).await;
            }
            let recovered = self.recover_channel(&mut st, &blob, ch, &result, &mut report).await;
            st.note(recovered, &mut acc);
        }

        for ch in channels_in(enabled_before & !report.detected, count) {
            // Channels being restored are unmasked by their deferred task.
            if st.deferred.is_pending(ch) || st.runtime(ch).is_some_and(|r| r.irq_enabled) {
                continue;
            }
            if let Some(table) = blob.interrupts(ch) {
                let unmasked = InterruptManager::new(table, self.interp()).enable(ch).await;
                st.note(unmasked, &mut acc);
                st.set_irq_enabled(ch, true);
            }
        }

        if let Some(e) = acc {
            tracing::warn!(error = %e, "transport errors during interrupt handling");
            self.escalate_if_needed(&mut st, &blob).await;
        }
        Ok(report)
    }

    async fn unmask(&self, st: &mut DeviceState, blob: &ParsedBlob, channel: u8) -> Result<(), OpError> {
        let Some(table) = blob.interrupts(channel) else {
            return Ok(());
        };
        st.set_irq_enabled(channel, true);
        InterruptManager::new(table, self.interp()).enable(channel).await
    }

    /// Unmask `channel` if it is playing and not waiting on its deferred
    /// task. Muted and shut-down channels stay masked.
    async fn resume_interrupts(&self, st: &mut DeviceState, blob: &ParsedBlob, channel: u8) -> Result<(), OpError> {
        if st.power(channel) != PowerState::Active || st.deferred.is_pending(channel) {
            return Ok(());
        }
        self.unmask(st, blob, channel).await
    }

    async fn recover_channel(
        &self,
        st: &mut DeviceState,
        blob: &ParsedBlob,
        channel: u8,
        result: &InterruptReadResult,
        report: &mut RecoveryReport,
    ) -> Result<(), OpError> {
        let bit = channel_bit(channel);
        let entry = st.power(channel);

        if result.clock_only() {
            tracing::debug!(channel, "clock interrupt only");
            report.clock_only |= bit;
            return self.resume_interrupts(st, blob, channel).await;
        }

        if result.requires_reset() {
            report.reset |= bit;
            st.stats.resets = st.stats.resets.saturating_add(1);
            if result.requires_hw_reset() {
                tracing::warn!(channel, "fault requests hardware reset");
                self.restart_all(st, blob).await?;
                return self.resume_interrupts(st, blob, channel).await;
            }
            tracing::warn!(channel, ?entry, "fault requests software reset");
            let mut acc = None;
            let reset = self.software_reset(blob, channel).await;
            st.note(reset, &mut acc);
            let init = self.reinit_channel(st, blob, channel).await;
            st.note(init, &mut acc);
            // The reset left the amplifier shut down; walk it back to where it was.
            match entry {
                PowerState::Active => {
                    let up = self.power_up_channel(st, blob, channel).await;
                    st.note(up, &mut acc);
                }
                PowerState::Mute => {
                    let up = self.power_up_channel(st, blob, channel).await;
                    st.note(up, &mut acc);
                    let muted = self.mute_channel(st, blob, channel).await;
                    st.note(muted, &mut acc);
                }
                PowerState::Shutdown => {}
            }
            return acc.map_or(Ok(()), Err);
        }

        if result.requires_power_on() {
            let Some(tables) = blob.channel(channel) else {
                return Ok(());
            };
            if entry != PowerState::Active {
                return Ok(());
            }
            if self.interp().verify(&tables.block_ops.power_check, channel).await? {
                return self.resume_interrupts(st, blob, channel).await;
            }
            tracing::warn!(channel, "power check failed, powering up again");
            report.repowered |= bit;
            return self.power_up_channel(st, blob, channel).await;
        }

        if entry == PowerState::Shutdown {
            tracing::debug!(channel, sources = ?result.detected, "fault on a channel already shut down");
            return Ok(());
        }
        tracing::warn!(channel, sources = ?result.detected, "fault interrupt, shutting channel down");
        report.shut_down |= bit;
        self.power_down_channel(st, blob, channel).await
    }

    /// Hardware reset, re-initialise every channel and bring previously
    /// `Active` and `Mute` channels back to the same state.
    async fn restart_all(&self, st: &mut DeviceState, blob: &ParsedBlob) -> Result<(), OpError> {
        let count = blob.channel_count();
        let active = st.active_mask();
        let muted = (0..count)
            .filter(|&ch| st.power(ch) == PowerState::Mute)
            .fold(0u8, |mask, ch| mask | channel_bit(ch));
        let mut acc = None;

        let reset = self.interp().hw_reset().await;
        st.note(reset, &mut acc);
        for ch in 0..count {
            st.deferred.cancel(ch);
            if let Some(r) = st.runtime_mut(ch) {
                r.power = PowerState::Shutdown;
                r.irq_enabled = false;
                r.debounce.reset();
            }
            let init = self.reinit_channel(st, blob, ch).await;
            st.note(init, &mut acc);
        }
        for ch in channels_in(active & !st.locked_out, count) {
            let up = self.power_up_channel(st, blob, ch).await;
            st.note(up, &mut acc);
        }
        for ch in channels_in(muted & !st.locked_out, count) {
            let up = self.power_up_channel(st, blob, ch).await;
            st.note(up, &mut acc);
            let muted = self.mute_channel(st, blob, ch).await;
            st.note(muted, &mut acc);
        }
        acc.map_or(Ok(()), Err)
    }

    /// Restart or lock out once every channel has a latched transport error.
    pub(super) async fn escalate_if_needed(&self, st: &mut DeviceState, blob: &ParsedBlob) {
        let count = blob.channel_count();
        let all = all_channels(count);
        if count == 0 || st.errors.channels(ErrorClass::Transport) & all != all {
            return;
        }

        if st.restarts < self.config.max_auto_restarts {
            st.restarts = st.restarts.saturating_add(1);
            st.stats.restarts = st.stats.restarts.saturating_add(1);
            tracing::warn!(attempt = st.restarts, max = self.config.max_auto_restarts, "all channels failing, restarting");
            st.errors.clear_class(ErrorClass::Transport);
            if let Err(e) = self.restart_all(st, blob).await {
                tracing::error!(error = %e, "restart incomplete");
            }
            return;
        }

        tracing::error!(restarts = st.restarts, "restart budget spent, locking channels out");
        for ch in channels_in(all & !st.locked_out, count) {
            if let Err(e) = self.power_down_channel(st, blob, ch).await {
                tracing::error!(channel = ch, error = %e, "shutdown of failing channel incomplete");
            }
            st.locked_out |= channel_bit(ch);
            st.errors.set(ErrorClass::LockedOut, ch);
        }
    }
}
