//! Per-channel power transitions.
//!
//! ```text
//!             ┌──────────── →Active ────────────┐
//!             ▼                                 │
//! Shutdown ──────▶ Active ──→Mute──▶ Mute ──────┘
//!     ▲              │                 │
//!     └── →Shutdown ─┴─────────────────┘
//! ```
//!
//! `→Active`: mask interrupts, re-arm sense (profile capability), profile
//! pre-power-up + pre-power-up controls, core power-up, profile
//! post-power-up, schedule the deferred task.
//!
//! `→Shutdown`: mask interrupts, cancel the deferred task, profile
//! pre-power-down, core power-down, profile post-power-down.
//!
//! `→Mute`: mask interrupts, cancel the deferred task, core mute.

use platform::{FirmwareSource, RegisterBus};

use super::{channel_bit, channels_in, finish, Device, DeviceState, PowerState};
use crate::blob::ParsedBlob;
use crate::error::{DeviceError, OpError};
use crate::interrupt::InterruptManager;
use crate::kcontrol::{ApplyTiming, ControlPlane};
use crate::profile::{ProfileManager, CAP_REARM_IV_SENSE};

impl<B: RegisterBus, F: FirmwareSource> Device<B, F> {
    /// Move the channels in `mask` to `target`.
    ///
    /// The mask is narrowed to the active profile's channel mask; locked-out
    /// channels are skipped. Every selected channel is attempted and
    /// transport failures are reported together.
    pub async fn request_power(&self, mask: u8, target: PowerState) -> Result<(), DeviceError> {
        self.ensure_ready().await?;
        let mut st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let count = blob.channel_count();

        let allowed = ProfileManager::new(&blob, st.active_profile, self.interp()).channel_mask();
        let selected = mask & allowed;
        if selected != mask {
            tracing::debug!(mask, allowed, "request narrowed by profile channel mask");
        }
        let locked = selected & st.locked_out;
        if locked != 0 && target != PowerState::Shutdown {
            let first = channels_in(locked, count).next().unwrap_or(0);
            if selected == locked {
                return Err(DeviceError::LockedOut(first));
            }
            tracing::warn!(locked, "skipping locked-out channels");
        }
        let effective = if target == PowerState::Shutdown {
            selected
        } else {
            selected & !st.locked_out
        };

        let mut acc = None;
        for ch in channels_in(effective, count) {
            let result = self.transition(&mut st, &blob, ch, target).await;
            st.note(result, &mut acc);
        }
        if acc.is_some() {
            self.escalate_if_needed(&mut st, &blob).await;
        }
        finish(acc)
    }

    /// Power state transition for one channel.
    pub(super) async fn transition(
        &self,
        st: &mut DeviceState,
        blob: &ParsedBlob,
        channel: u8,
        target: PowerState,
    ) -> Result<(), OpError> {
        match (st.power(channel), target) {
            (PowerState::Active, PowerState::Active) | (PowerState::Shutdown, PowerState::Shutdown) => Ok(()),
            (PowerState::Mute, PowerState::Mute) => Ok(()),
            (PowerState::Shutdown, PowerState::Mute) => {
                tracing::debug!(channel, "mute ignored while shut down");
                Ok(())
            }
            (_, PowerState::Active) => self.power_up_channel(st, blob, channel).await,
            (_, PowerState::Shutdown) => self.power_down_channel(st, blob, channel).await,
            (PowerState::Active, PowerState::Mute) => self.mute_channel(st, blob, channel).await,
        }
    }

    async fn disable_interrupts(&self, st: &mut DeviceState, blob: &ParsedBlob, channel: u8) -> Result<(), OpError> {
        st.set_irq_enabled(channel, false);
        match blob.interrupts(channel) {
            Some(table) => InterruptManager::new(table, self.interp()).disable(channel).await,
            None => Ok(()),
        }
    }

    /// Full `→Active` sequence; also used by recovery.
    pub(super) async fn power_up_channel(
        &self,
        st: &mut DeviceState,
        blob: &ParsedBlob,
        channel: u8,
    ) -> Result<(), OpError> {
        let Some(tables) = blob.channel(channel) else {
            return Ok(());
        };
        let mut acc = None;

        let masked = self.disable_interrupts(st, blob, channel).await;
        st.note(masked, &mut acc);

        let profiles = ProfileManager::new(blob, st.active_profile, self.interp());
        if profiles.capability_bitmask() & CAP_REARM_IV_SENSE != 0 {
            if let Some(table) = blob.interrupts(channel) {
                let cleared = InterruptManager::new(table, self.interp()).clear(channel).await;
                st.note(cleared, &mut acc);
            }
            let rearmed = self.rearm_iv_sense(st, blob, channel).await;
            st.note(rearmed, &mut acc);
        }

        let pre = profiles.apply_pre_power_up(channel).await;
        st.note(pre, &mut acc);
        let plane = ControlPlane::new(&blob.controls, &mut st.control_values, self.interp());
        let replayed = plane.replay_all(channel, ApplyTiming::PrePowerUp).await;
        st.note(replayed, &mut acc);

        let up = self.interp().execute(&tables.block_ops.power_up, channel).await;
        st.note(up, &mut acc);
        let post = profiles.apply_post_power_up(channel).await;
        st.note(post, &mut acc);

        st.set_power(channel, PowerState::Active);
        self.schedule_deferred(st, channel);
        tracing::info!(channel, profile = st.active_profile, "channel active");
        acc.map_or(Ok(()), Err)
    }

    /// Full `→Shutdown` sequence.
    pub(super) async fn power_down_channel(
        &self,
        st: &mut DeviceState,
        blob: &ParsedBlob,
        channel: u8,
    ) -> Result<(), OpError> {
        let Some(tables) = blob.channel(channel) else {
            return Ok(());
        };
        let mut acc = None;

        let masked = self.disable_interrupts(st, blob, channel).await;
        st.note(masked, &mut acc);
        if st.deferred.cancel(channel) {
            tracing::debug!(channel, "pending deferred work cancelled");
        }

        let profiles = ProfileManager::new(blob, st.active_profile, self.interp());
        let pre = profiles.apply_pre_power_down(channel).await;
        st.note(pre, &mut acc);
        let down = self.interp().execute(&tables.block_ops.power_down, channel).await;
        st.note(down, &mut acc);
        let post = profiles.apply_post_power_down(channel).await;
        st.note(post, &mut acc);

        st.set_power(channel, PowerState::Shutdown);
        tracing::info!(channel, "channel shut down");
        acc.map_or(Ok(()), Err)
    }

    /// `Active → Mute`; also used by recovery to restore a muted channel.
    pub(super) async fn mute_channel(
        &self,
        st: &mut DeviceState,
        blob: &ParsedBlob,
        channel: u8,
    ) -> Result<(), OpError> {
        let Some(tables) = blob.channel(channel) else {
            return Ok(());
        };
        let mut acc = None;
        let masked = self.disable_interrupts(st, blob, channel).await;
        st.note(masked, &mut acc);
        st.deferred.cancel(channel);
        let muted = self.interp().execute(&tables.block_ops.mute, channel).await;
        st.note(muted, &mut acc);
        st.set_power(channel, PowerState::Mute);
        tracing::info!(channel, "channel muted");
        acc.map_or(Ok(()), Err)
    }

    /// `true` if `channel` is in the active profile's channel mask.
    pub async fn channel_allowed(&self, channel: u8) -> Result<bool, DeviceError> {
        let st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let mask = ProfileManager::new(&blob, st.active_profile, self.interp()).channel_mask();
        Ok(mask & channel_bit(channel) != 0)
    }
}
