//! Device handle: the power / interrupt state machine.
//!
//! # Locks
//!
//! | Lock           | Guards                                  | Held for                        |
//! |----------------|-----------------------------------------|---------------------------------|
//! | firmware       | the [`FirmwareSource`], load sequencing | one whole load (with retries)   |
//! | state          | [`DeviceState`]                         | a transition, control write, recovery pass or deferred run |
//! | bus            | transport + bank cursors                | one opcode                      |
//!
//! Acquisition order is firmware → state → bus. The bus lock is never held
//! across a `Delay` opcode.
//!
//! # Workers
//!
//! [`Device::run`] drives two loops: deferred post-power-up work and
//! interrupt recovery. Tests can call the single-pass entry points
//! ([`Device::run_due_deferred`], [`Device::handle_interrupt`]) directly.

mod deferred;
mod loader;
mod power;
mod recovery;

use alloc::string::String;
use alloc::sync::Arc;
use alloc::vec::Vec;
use core::fmt;

use embassy_futures::join::join;
use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::mutex::Mutex;
use embassy_sync::signal::Signal;
use heapless::Vec as HVec;
use platform::{FirmwareCompletion, FirmwareSource, RegisterBus};

use crate::blob::{AlgoParam, ParsedBlob};
use crate::config::{DriverConfig, MAX_CHANNELS};
use crate::error::{DeviceError, OpError};
use crate::hw_params::{resolve_iv_vbat_slot_config, DaiMode, HwField, IvVbatRequest, SlotKey, Variant};
use crate::interpreter::{BusAccess, BusLock, Interpreter, SHARED_LINE};
use crate::interrupt::{IrqCounters, IrqDebounce};
use crate::kcontrol::{ControlId, ControlInfo, ControlPlane, ControlValues, PutOutcome};
use crate::profile::ProfileManager;

pub use deferred::DeferredQueue;
pub use recovery::RecoveryReport;

// ── Public state types ───────────────────────────────────────────────────────

/// Per-channel power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PowerState {
    /// Powered down (initial state).
    #[default]
    Shutdown,
    /// Playing.
    Active,
    /// Powered, output muted, interrupts masked.
    Mute,
}

/// Tuning-blob load state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FirmwareState {
    /// Never requested.
    #[default]
    None,
    /// A load is in progress.
    Loading,
    /// The blob was malformed or unsupported.
    ParseFailed,
    /// The blob could not be obtained within the retry budget.
    LoadFailed,
    /// Parsed and applied.
    Ready,
}

impl fmt::Display for FirmwareState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::None => "not loaded",
            Self::Loading => "loading",
            Self::ParseFailed => "parse failed",
            Self::LoadFailed => "load failed",
            Self::Ready => "ready",
        })
    }
}

/// Failure class latched in the [`ErrorCode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bus failure while executing on the channel.
    Transport,
    /// Interrupt storm; channel skipped by recovery.
    StuckInterrupt,
    /// Channel shut down for good after repeated restarts.
    LockedOut,
}

impl ErrorClass {
    const fn shift(self) -> u32 {
        match self {
            Self::Transport => 0,
            Self::StuckInterrupt => 8,
            Self::LockedOut => 16,
        }
    }
}

/// Device-wide error bitmask: one bit per channel per [`ErrorClass`].
///
/// ```text
/// bits  0..8   transport error on channel n
/// bits  8..16  stuck interrupt on channel n
/// bits 16..24  channel n locked out
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorCode(u32);

impl ErrorCode {
    fn bit(class: ErrorClass, channel: u8) -> u32 {
        1u32.checked_shl(class.shift().saturating_add(u32::from(channel.min(7))))
            .unwrap_or(0)
    }

    /// Latch `class` for `channel`.
    pub fn set(&mut self, class: ErrorClass, channel: u8) {
        self.0 |= Self::bit(class, channel);
    }

    /// `true` if `class` is latched for `channel`.
    #[must_use]
    pub fn contains(self, class: ErrorClass, channel: u8) -> bool {
        self.0 & Self::bit(class, channel) != 0
    }

    /// Channel mask latched for `class`.
    #[must_use]
    pub fn channels(self, class: ErrorClass) -> u8 {
        // Masked to 8 bits.
        #[allow(clippy::cast_possible_truncation)]
        let mask = (self.0.checked_shr(class.shift()).unwrap_or(0) & 0xFF) as u8;
        mask
    }

    /// Clear `class` for every channel.
    pub fn clear_class(&mut self, class: ErrorClass) {
        self.0 &= !(0xFF_u32.checked_shl(class.shift()).unwrap_or(0));
    }

    /// Raw value.
    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }

    /// `true` when nothing is latched.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// Counters for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DeviceStats {
    /// Successful blob loads.
    pub loads: u32,
    /// Deferred post-power-up tasks that ran to completion.
    pub deferred_runs: u32,
    /// Interrupt recovery actions taken on a channel.
    pub recoveries: u32,
    /// Detections classified as stuck.
    pub stuck_detections: u32,
    /// Software or hardware resets performed by recovery.
    pub resets: u32,
    /// Automatic restarts by fail-safe escalation.
    pub restarts: u32,
}

/// Runtime state of one channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChannelRuntime {
    /// Power state.
    pub power: PowerState,
    /// Interrupts currently unmasked.
    pub irq_enabled: bool,
    /// Storm debounce.
    pub debounce: IrqDebounce,
    /// Per-descriptor counters, indexed like the interrupt table.
    pub counters: Vec<IrqCounters>,
}

/// Everything guarded by the state-transition lock.
#[derive(Debug, Default)]
pub struct DeviceState {
    blob: Option<Arc<ParsedBlob>>,
    firmware: FirmwareState,
    active_profile: usize,
    channels: HVec<ChannelRuntime, MAX_CHANNELS>,
    errors: ErrorCode,
    control_values: ControlValues,
    pending_controls: Vec<(String, i64)>,
    deferred: DeferredQueue,
    restarts: u32,
    locked_out: u8,
    dai_mode: DaiMode,
    iv_slot: Option<SlotKey>,
    stats: DeviceStats,
}

impl DeviceState {
    fn runtime(&self, channel: u8) -> Option<&ChannelRuntime> {
        self.channels.get(usize::from(channel))
    }

    fn runtime_mut(&mut self, channel: u8) -> Option<&mut ChannelRuntime> {
        self.channels.get_mut(usize::from(channel))
    }

    fn power(&self, channel: u8) -> PowerState {
        self.runtime(channel).map_or(PowerState::Shutdown, |r| r.power)
    }

    fn set_power(&mut self, channel: u8, power: PowerState) {
        if let Some(r) = self.runtime_mut(channel) {
            r.power = power;
        }
    }

    fn set_irq_enabled(&mut self, channel: u8, enabled: bool) {
        if let Some(r) = self.runtime_mut(channel) {
            r.irq_enabled = enabled;
        }
    }

    /// Mask of channels currently `Active`.
    fn active_mask(&self) -> u8 {
        (0u8..)
            .zip(self.channels.iter())
            .filter(|(_, r)| r.power == PowerState::Active)
            .fold(0, |mask, (ch, _)| mask | channel_bit(ch))
    }

    fn ready_blob(&self) -> Result<Arc<ParsedBlob>, DeviceError> {
        match (&self.blob, self.firmware) {
            (Some(blob), FirmwareState::Ready) => Ok(Arc::clone(blob)),
            (_, state) => Err(DeviceError::NotReady(state)),
        }
    }

    /// Fold `result` into `acc`, latching a transport error for its channel.
    fn note(&mut self, result: Result<(), OpError>, acc: &mut Option<OpError>) {
        if let Err(e) = result {
            if e.channel != SHARED_LINE {
                self.errors.set(ErrorClass::Transport, e.channel);
            }
            *acc = Some(acc.map_or(e, |prev| prev.merge(e)));
        }
    }
}

/// Bit for `channel` in a channel mask (0 past bit 7).
#[must_use]
pub fn channel_bit(channel: u8) -> u8 {
    1u8.checked_shl(u32::from(channel)).unwrap_or(0)
}

/// Channels of `mask` below `count`, ascending.
pub fn channels_in(mask: u8, count: u8) -> impl Iterator<Item = u8> {
    (0..count).filter(move |&ch| mask & channel_bit(ch) != 0)
}

fn finish(acc: Option<OpError>) -> Result<(), DeviceError> {
    acc.map_or(Ok(()), |e| Err(DeviceError::Op(e)))
}

// ── Device ───────────────────────────────────────────────────────────────────

/// Multi-channel smart-amplifier device.
///
/// Generic over the register transport `B` and the firmware provider `F`;
/// both are external collaborators.
pub struct Device<B, F> {
    config: DriverConfig,
    bus: BusLock<B>,
    state: Mutex<CriticalSectionRawMutex, DeviceState>,
    firmware: Mutex<CriticalSectionRawMutex, F>,
    completion: FirmwareCompletion,
    deferred_wake: Signal<CriticalSectionRawMutex, ()>,
    irq_pending: Signal<CriticalSectionRawMutex, ()>,
}

impl<B: RegisterBus, F: FirmwareSource> Device<B, F> {
    /// Create a device; nothing is loaded until [`load`](Self::load) or
    /// first use.
    pub fn new(bus: B, firmware: F, config: DriverConfig) -> Result<Self, DeviceError> {
        config.validate()?;
        Ok(Self {
            config,
            bus: Mutex::new(BusAccess::new(bus)),
            state: Mutex::new(DeviceState::default()),
            firmware: Mutex::new(firmware),
            completion: FirmwareCompletion::new(),
            deferred_wake: Signal::new(),
            irq_pending: Signal::new(),
        })
    }

    /// Configuration in use.
    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    fn interp(&self) -> Interpreter<'_, B> {
        Interpreter::new(&self.bus)
    }

    /// Run the deferred-work and interrupt loops forever.
    pub async fn run(&self) {
        join(self.run_deferred(), self.run_interrupts()).await;
    }

    // ── Introspection ────────────────────────────────────────────────────────

    /// Blob load state.
    pub async fn firmware_state(&self) -> FirmwareState {
        self.state.lock().await.firmware
    }

    /// Current blob generation, if loaded.
    pub async fn blob(&self) -> Option<Arc<ParsedBlob>> {
        self.state.lock().await.blob.clone()
    }

    /// Power state of `channel`.
    pub async fn power_state(&self, channel: u8) -> PowerState {
        self.state.lock().await.power(channel)
    }

    /// Statistics snapshot.
    pub async fn stats(&self) -> DeviceStats {
        self.state.lock().await.stats
    }

    /// Latched errors, without clearing them.
    pub async fn error_code(&self) -> ErrorCode {
        self.state.lock().await.errors
    }

    /// Latched errors, clearing all but lock-outs.
    pub async fn take_error_code(&self) -> ErrorCode {
        let mut st = self.state.lock().await;
        let code = st.errors;
        st.errors.clear_class(ErrorClass::Transport);
        st.errors.clear_class(ErrorClass::StuckInterrupt);
        code
    }

    /// Mask of channels locked out by fail-safe escalation.
    pub async fn locked_out(&self) -> u8 {
        self.state.lock().await.locked_out
    }

    /// `(descriptor name, counters)` for `channel`; resets the since-read
    /// counts.
    pub async fn interrupt_counters(&self, channel: u8) -> Result<Vec<(String, IrqCounters)>, DeviceError> {
        let mut st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let Some(table) = blob.interrupts(channel) else {
            return Ok(Vec::new());
        };
        let runtime = st.runtime_mut(channel).ok_or(DeviceError::InvalidChannel(channel))?;
        Ok(table
            .descriptors
            .iter()
            .zip(runtime.counters.iter_mut())
            .map(|(d, c)| (d.name.clone(), c.take()))
            .collect())
    }

    /// Algorithm parameters of the loaded blob.
    pub async fn algo_params(&self) -> Result<Vec<AlgoParam>, DeviceError> {
        Ok(self.state.lock().await.ready_blob()?.algo_params.clone())
    }

    // ── Profiles ─────────────────────────────────────────────────────────────

    /// Profile names, in index order.
    pub async fn profile_names(&self) -> Result<Vec<String>, DeviceError> {
        self.ensure_ready().await?;
        let blob = self.state.lock().await.ready_blob()?;
        Ok(blob.profile_names().into_iter().map(String::from).collect())
    }

    /// Selected profile index.
    pub async fn active_profile(&self) -> usize {
        self.state.lock().await.active_profile
    }

    /// Select the profile used by subsequent power transitions.
    pub async fn set_active_profile(&self, index: usize) -> Result<(), DeviceError> {
        self.ensure_ready().await?;
        let mut st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let mut pm = ProfileManager::new(&blob, st.active_profile, self.interp());
        pm.set_active(index)?;
        st.active_profile = pm.active();
        tracing::debug!(index, "active profile changed");
        Ok(())
    }

    /// Capability bits of the active profile.
    pub async fn capability_bitmask(&self) -> Result<u32, DeviceError> {
        let st = self.state.lock().await;
        let blob = st.ready_blob()?;
        Ok(ProfileManager::new(&blob, st.active_profile, self.interp()).capability_bitmask())
    }

    // ── Controls ─────────────────────────────────────────────────────────────

    /// Enumerate the generated controls.
    pub async fn controls(&self) -> Result<Vec<ControlInfo>, DeviceError> {
        self.ensure_ready().await?;
        Ok(self.state.lock().await.ready_blob()?.controls.infos())
    }

    /// Current value of control `id`.
    pub async fn get_control(&self, id: ControlId) -> Result<i64, DeviceError> {
        self.ensure_ready().await?;
        let st = self.state.lock().await;
        st.ready_blob()?;
        st.control_values
            .get(id)
            .ok_or(DeviceError::Range(crate::error::RangeError::UnknownControl(id)))
    }

    /// Set control `id`.
    pub async fn put_control(&self, id: ControlId, value: i64) -> Result<PutOutcome, DeviceError> {
        self.ensure_ready().await?;
        let mut st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let active = st.active_mask();
        let mut plane = ControlPlane::new(&blob.controls, &mut st.control_values, self.interp());
        let result = plane.put(id, value, active).await;
        if let Err(DeviceError::Op(e)) = &result {
            st.errors.set(ErrorClass::Transport, e.channel);
        }
        result
    }

    /// Set a control by name.
    ///
    /// When the blob cannot be loaded yet the write is cached and applied
    /// once a load succeeds.
    pub async fn put_control_by_name(&self, name: &str, value: i64) -> Result<PutOutcome, DeviceError> {
        if let Err(e) = self.ensure_ready().await {
            tracing::info!(control = name, value, error = %e, "device not ready, caching control write");
            let mut st = self.state.lock().await;
            st.pending_controls.retain(|(n, _)| n != name);
            st.pending_controls.push((String::from(name), value));
            return Ok(PutOutcome::Deferred);
        }
        let id = {
            let st = self.state.lock().await;
            st.ready_blob()?
                .controls
                .find(name)
                .ok_or_else(|| crate::error::RangeError::UnknownControlName(String::from(name)))?
        };
        self.put_control(id, value).await
    }

    // ── Hardware parameters ──────────────────────────────────────────────────

    /// Execute the block for `variant` of `field` on every channel that
    /// authors the field.
    pub async fn apply_hw_param(&self, field: HwField, variant: Variant) -> Result<(), DeviceError> {
        self.ensure_ready().await?;
        let mut st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let mut acc = None;
        for ch in 0..blob.channel_count() {
            let Some(set) = blob.channel(ch).and_then(|t| t.hw_params.as_ref()) else {
                continue;
            };
            let block = set.select(field, variant)?;
            let result = self.interp().execute(block, ch).await;
            st.note(result, &mut acc);
        }
        finish(acc)
    }

    /// Record the interface framing used for IV/VBat negotiation.
    pub async fn set_dai_mode(&self, mode: DaiMode) -> Result<(), DeviceError> {
        self.ensure_ready().await?;
        self.state.lock().await.dai_mode = mode;
        Ok(())
    }

    /// Pick and program the IV/VBat slot configuration for `slot_width`.
    ///
    /// Channel count, sense width and vbat come from the blob header, the
    /// framing from [`set_dai_mode`](Self::set_dai_mode). The chosen key is
    /// remembered and re-applied on re-initialisation and re-arm.
    pub async fn negotiate_iv_vbat(&self, slot_width: u8) -> Result<SlotKey, DeviceError> {
        self.ensure_ready().await?;
        let mut st = self.state.lock().await;
        let blob = st.ready_blob()?;
        let req = IvVbatRequest {
            slot_width,
            mode: st.dai_mode,
            channels: blob.channel_count(),
            iv_width: blob.header.iv_width,
            vbat: blob.header.vbat_enabled,
        };
        let mut acc = None;
        let mut chosen: Option<SlotKey> = None;
        for ch in 0..blob.channel_count() {
            let Some(set) = blob.channel(ch).and_then(|t| t.hw_params.as_ref()) else {
                continue;
            };
            let cfg = resolve_iv_vbat_slot_config(&set.slot_configs, &req)
                .ok_or(DeviceError::NoSlotConfig { slot_width })?;
            let result = self.interp().execute(&cfg.block, ch).await;
            st.note(result, &mut acc);
            chosen = Some(cfg.key.clone());
        }
        let key = chosen.ok_or(DeviceError::NoSlotConfig { slot_width })?;
        tracing::debug!(key = key.as_str(), "IV/VBat slot configuration selected");
        st.iv_slot = Some(key.clone());
        finish(acc)?;
        Ok(key)
    }

    /// Execute the remembered IV/VBat slot block on `channel`.
    async fn rearm_iv_sense(&self, st: &mut DeviceState, blob: &ParsedBlob, channel: u8) -> Result<(), OpError> {
        let Some(key) = st.iv_slot.as_ref() else {
            return Ok(());
        };
        let block = blob
            .channel(channel)
            .and_then(|t| t.hw_params.as_ref())
            .and_then(|set| set.slot_configs.iter().find(|c| &c.key == key))
            .map(|c| &c.block);
        match block {
            Some(block) => self.interp().execute(block, channel).await,
            None => Ok(()),
        }
    }
}
