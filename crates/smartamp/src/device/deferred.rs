//! Deferred post-power-up work.
//!
//! `→Active` schedules one item per channel, `post_power_up_delay_ms` in the
//! future. The worker runs due items under the state lock and only while
//! the channel is still `Active`. Cancellation also happens under the state
//! lock, so a cancel returning means no run is in flight and none will start.

use embassy_futures::select::select;
use embassy_time::{Duration, Instant, Timer};
use platform::{FirmwareSource, RegisterBus};

use super::{Device, DeviceState, ErrorClass, PowerState};
use crate::blob::ParsedBlob;
use crate::config::MAX_CHANNELS;
use crate::interrupt::InterruptManager;
use crate::kcontrol::{ApplyTiming, ControlPlane};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct DeferredItem {
    due: Instant,
    generation: u32,
}

/// At most one pending item per channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeferredQueue {
    slots: [Option<DeferredItem>; MAX_CHANNELS],
    next_generation: u32,
}

impl DeferredQueue {
    /// Schedule `channel` at `due`, replacing any pending item. Returns the
    /// item's generation.
    pub fn schedule(&mut self, channel: u8, due: Instant) -> u32 {
        let generation = self.next_generation;
        self.next_generation = self.next_generation.wrapping_add(1);
        if let Some(slot) = self.slots.get_mut(usize::from(channel)) {
            *slot = Some(DeferredItem { due, generation });
        }
        generation
    }

    /// Drop the pending item for `channel`; `true` if there was one.
    pub fn cancel(&mut self, channel: u8) -> bool {
        self.slots
            .get_mut(usize::from(channel))
            .and_then(Option::take)
            .is_some()
    }

    /// Drop everything.
    pub fn cancel_all(&mut self) {
        self.slots = [None; MAX_CHANNELS];
    }

    /// `true` if `channel` has a pending item.
    #[must_use]
    pub fn is_pending(&self, channel: u8) -> bool {
        self.slots.get(usize::from(channel)).is_some_and(Option::is_some)
    }

    /// Earliest due time.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.slots.iter().flatten().map(|item| item.due).min()
    }

    /// Remove and return the earliest item due at `now`.
    pub fn take_due(&mut self, now: Instant) -> Option<(u8, u32)> {
        let (channel, item) = (0u8..)
            .zip(self.slots.iter())
            .filter_map(|(ch, slot)| slot.map(|item| (ch, item)))
            .filter(|(_, item)| item.due <= now)
            .min_by_key(|(_, item)| item.due)?;
        self.cancel(channel);
        Some((channel, item.generation))
    }
}

impl<B: RegisterBus, F: FirmwareSource> Device<B, F> {
    /// Queue the post-power-up task for `channel` and wake the worker.
    pub(super) fn schedule_deferred(&self, st: &mut DeviceState, channel: u8) {
        let due = Instant::now()
            .checked_add(Duration::from_millis(self.config.post_power_up_delay_ms))
            .unwrap_or(Instant::MAX);
        let generation = st.deferred.schedule(channel, due);
        tracing::trace!(channel, generation, "deferred post-power-up scheduled");
        self.deferred_wake.signal(());
    }

    /// Deferred-work loop. Never returns.
    pub async fn run_deferred(&self) {
        loop {
            let next = self.state.lock().await.deferred.next_due();
            match next {
                Some(due) => {
                    select(Timer::at(due), self.deferred_wake.wait()).await;
                }
                None => self.deferred_wake.wait().await,
            }
            self.run_due_deferred().await;
        }
    }

    /// Run every deferred item that is due now; returns how many ran.
    pub async fn run_due_deferred(&self) -> usize {
        let mut ran: usize = 0;
        loop {
            let mut st = self.state.lock().await;
            let Some((channel, generation)) = st.deferred.take_due(Instant::now()) else {
                break;
            };
            let Ok(blob) = st.ready_blob() else {
                st.deferred.cancel_all();
                break;
            };
            if st.power(channel) != PowerState::Active {
                tracing::debug!(channel, generation, "channel left Active, deferred work skipped");
                continue;
            }
            self.deferred_post_power_up(&mut st, &blob, channel).await;
            ran = ran.saturating_add(1);
        }
        ran
    }

    /// Clear and unmask interrupts, then replay post-power-up controls.
    async fn deferred_post_power_up(&self, st: &mut DeviceState, blob: &ParsedBlob, channel: u8) {
        let mut acc = None;
        if let Some(table) = blob.interrupts(channel) {
            let irq = InterruptManager::new(table, self.interp());
            let mut counters = st
                .runtime_mut(channel)
                .map(|r| core::mem::take(&mut r.counters))
                .unwrap_or_default();
            match irq.read_and_classify(channel, true, &mut counters).await {
                Ok(result) if result.non_clock_fired => {
                    tracing::warn!(channel, sources = ?result.detected, "interrupts pending after power-up");
                }
                Ok(_) => {}
                Err(e) => st.note(Err(e), &mut acc),
            }
            if let Some(r) = st.runtime_mut(channel) {
                r.counters = counters;
            }
            let cleared = irq.clear(channel).await;
            st.note(cleared, &mut acc);
            let enabled = irq.enable(channel).await;
            st.note(enabled, &mut acc);
            st.set_irq_enabled(channel, true);
        }

        let plane = ControlPlane::new(&blob.controls, &mut st.control_values, self.interp());
        let replayed = plane.replay_all(channel, ApplyTiming::PostPowerUp).await;
        st.note(replayed, &mut acc);

        st.stats.deferred_runs = st.stats.deferred_runs.saturating_add(1);
        match acc {
            None => tracing::debug!(channel, "deferred post-power-up done"),
            Some(e) => {
                st.errors.set(ErrorClass::Transport, channel);
                tracing::warn!(channel, error = %e, "deferred post-power-up incomplete");
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    #[test]
    fn take_due_returns_earliest_and_removes_it() {
        let t0 = Instant::from_millis(100);
        let mut q = DeferredQueue::default();
        q.schedule(1, Instant::from_millis(120));
        q.schedule(0, Instant::from_millis(110));
        assert_eq!(q.next_due(), Some(Instant::from_millis(110)));
        assert_eq!(q.take_due(t0), None);
        assert_eq!(q.take_due(Instant::from_millis(130)).map(|(c, _)| c), Some(0));
        assert_eq!(q.take_due(Instant::from_millis(130)).map(|(c, _)| c), Some(1));
        assert_eq!(q.next_due(), None);
    }

    #[test]
    fn cancel_and_reschedule() {
        let mut q = DeferredQueue::default();
        let g1 = q.schedule(0, Instant::from_millis(5));
        let g2 = q.schedule(0, Instant::from_millis(9));
        assert_ne!(g1, g2);
        assert!(q.is_pending(0));
        assert!(q.cancel(0));
        assert!(!q.cancel(0));
        assert_eq!(q.take_due(Instant::from_millis(50)), None);
    }
}
