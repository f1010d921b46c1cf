//! Blob loading and (re-)initialisation.
//!
//! ```text
//!            ┌──────── retryable (container) ────────┐
//!            ▼                                       │
//! None ──▶ Loading ──request──▶ image ──parse_image──┤
//!                                                    ├── Ok ─────────▶ Ready
//!                                                    ├── Parse error ─▶ ParseFailed
//!                                                    └── tries spent ─▶ LoadFailed
//! ```
//!
//! Installing a blob replaces the previous generation in one step under the
//! state lock; readers holding the old `Arc` keep a consistent view.

use alloc::sync::Arc;
use alloc::vec::Vec;

use embassy_time::Timer;
use heapless::Vec as HVec;
use platform::{FirmwareSource, RegisterBus};

use super::{ChannelRuntime, Device, DeviceState, FirmwareState};
use crate::blob::{BlobParser, ParsedBlob};
use crate::config::MAX_CHANNELS;
use crate::error::{BlobError, ContainerError, DeviceError, OpError};
use crate::kcontrol::{ApplyTiming, ControlPlane, ControlValues};

impl<B: RegisterBus, F: FirmwareSource> Device<B, F> {
    /// Load with the probe-time retry budget.
    pub async fn probe(&self) -> Result<(), DeviceError> {
        self.load(self.config.load_tries).await
    }

    /// Request, parse and install the tuning blob, trying up to
    /// `max_tries` times on retryable failures.
    ///
    /// Always reloads, even when a blob is already installed.
    pub async fn load(&self, max_tries: u32) -> Result<(), DeviceError> {
        let mut source = self.firmware.lock().await;
        self.load_locked(&mut source, max_tries).await
    }

    /// Load lazily if no blob is installed yet.
    pub async fn ensure_ready(&self) -> Result<(), DeviceError> {
        if self.state.lock().await.firmware == FirmwareState::Ready {
            return Ok(());
        }
        let mut source = self.firmware.lock().await;
        // Another caller may have finished a load while we waited.
        if self.state.lock().await.firmware == FirmwareState::Ready {
            return Ok(());
        }
        tracing::info!("blob not loaded, loading on first use");
        match self.load_locked(&mut source, self.config.lazy_load_tries).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::warn!(error = %e, "lazy load failed");
                Err(DeviceError::NotReady(self.state.lock().await.firmware))
            }
        }
    }

    async fn load_locked(&self, source: &mut F, max_tries: u32) -> Result<(), DeviceError> {
        self.state.lock().await.firmware = FirmwareState::Loading;
        let tries = max_tries.max(1);
        let mut parser = BlobParser::new();
        let mut last = BlobError::Container(ContainerError::Empty);

        for attempt in 1..=tries {
            self.completion.reset();
            source.request(&self.config.firmware_name, &self.completion);
            let outcome = match self.completion.wait().await {
                Some(image) => parser.parse_image(&image, self.config.revision_id),
                None => Err(BlobError::Container(ContainerError::Empty)),
            };

            match outcome {
                Ok(blob) => {
                    tracing::info!(
                        attempt,
                        name = %blob.header.name,
                        channels = blob.channel_count(),
                        sections = parser.sections_parsed(),
                        "tuning blob loaded"
                    );
                    return self.install(blob).await;
                }
                Err(e) if e.is_retryable() => {
                    tracing::warn!(attempt, tries, error = %e, "firmware image unusable");
                    if attempt < tries {
                        Timer::after_millis(self.config.load_retry_delay_ms).await;
                    }
                    last = e;
                }
                Err(e) => {
                    tracing::error!(sections = parser.sections_parsed(), error = %e, "tuning blob rejected");
                    self.state.lock().await.firmware = FirmwareState::ParseFailed;
                    return Err(e.into());
                }
            }
        }

        tracing::error!(tries, "giving up on firmware load");
        self.state.lock().await.firmware = FirmwareState::LoadFailed;
        Err(last.into())
    }

    /// Swap in `blob`, reset runtime state and initialise every channel.
    ///
    /// Hardware failures during initialisation are latched in the error
    /// code; the blob stays installed.
    async fn install(&self, blob: Arc<ParsedBlob>) -> Result<(), DeviceError> {
        let mut st = self.state.lock().await;
        let count = blob.channel_count();

        st.deferred.cancel_all();
        st.channels = (0..count)
            .map(|ch| ChannelRuntime {
                counters: alloc::vec![Default::default(); blob.interrupts(ch).map_or(0, |t| t.descriptors.len())],
                ..ChannelRuntime::default()
            })
            .collect::<HVec<_, MAX_CHANNELS>>();
        st.control_values = ControlValues::from_defaults(&blob.controls);
        if st.active_profile >= blob.channel(0).map_or(0, |t| t.profiles.len()) {
            st.active_profile = 0;
        }
        st.blob = Some(Arc::clone(&blob));

        let mut acc = None;
        for ch in 0..count {
            let reset = self.software_reset(&blob, ch).await;
            st.note(reset, &mut acc);
            let init = self.reinit_channel(&mut st, &blob, ch).await;
            st.note(init, &mut acc);
        }
        self.apply_pending_controls(&mut st, &blob).await;

        st.firmware = FirmwareState::Ready;
        st.stats.loads = st.stats.loads.saturating_add(1);
        if let Some(e) = acc {
            tracing::warn!(error = %e, "initialisation incomplete");
        }
        Ok(())
    }

    /// Run the channel's software-reset block.
    pub(super) async fn software_reset(&self, blob: &ParsedBlob, channel: u8) -> Result<(), OpError> {
        match blob.channel(channel) {
            Some(tables) => self.interp().execute(&tables.block_ops.sw_reset, channel).await,
            None => Ok(()),
        }
    }

    /// Initialisation sequence: `INITP`, hardware-parameter defaults, the
    /// remembered IV/VBat slot block and the any-time controls.
    pub(super) async fn reinit_channel(
        &self,
        st: &mut DeviceState,
        blob: &ParsedBlob,
        channel: u8,
    ) -> Result<(), OpError> {
        let Some(tables) = blob.channel(channel) else {
            return Ok(());
        };
        let interp = self.interp();
        let mut acc = None;

        let init = interp.execute(&tables.init, channel).await;
        st.note(init, &mut acc);
        if let Some(set) = &tables.hw_params {
            for (field, block) in set.defaults() {
                let applied = interp.execute(block, channel).await;
                if applied.is_err() {
                    tracing::warn!(channel, %field, "hardware parameter default failed");
                }
                st.note(applied, &mut acc);
            }
        }
        let rearm = self.rearm_iv_sense(st, blob, channel).await;
        st.note(rearm, &mut acc);

        let plane = ControlPlane::new(&blob.controls, &mut st.control_values, interp);
        let replayed = plane.replay_all(channel, ApplyTiming::Anytime).await;
        st.note(replayed, &mut acc);

        tracing::debug!(channel, ok = acc.is_none(), "channel initialised");
        acc.map_or(Ok(()), Err)
    }

    /// Apply control writes cached while no blob was loaded.
    async fn apply_pending_controls(&self, st: &mut DeviceState, blob: &ParsedBlob) {
        let pending: Vec<_> = core::mem::take(&mut st.pending_controls);
        for (name, value) in pending {
            let mut plane = ControlPlane::new(&blob.controls, &mut st.control_values, self.interp());
            match plane.put_by_name(&name, value, 0).await {
                Ok(outcome) => tracing::debug!(control = %name, value, ?outcome, "cached control write applied"),
                Err(e) => tracing::warn!(control = %name, value, error = %e, "cached control write dropped"),
            }
        }
    }
}
