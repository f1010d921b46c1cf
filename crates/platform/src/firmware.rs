//! Firmware (tuning blob) provisioning seam.
//!
//! The provisioning collaborator (a filesystem loader on the host, a request
//! to the OS firmware loader on target) answers asynchronously. The
//! driver starts a request through [`FirmwareSource::request`] and then parks
//! on the shared [`FirmwareCompletion`] until the collaborator reports the
//! image (or its absence).

use alloc::sync::Arc;
use alloc::vec::Vec;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

/// One-shot completion shared between the driver and the provisioning
/// collaborator.
///
/// `None` means the image is absent or could not be read. Cloning yields a
/// second handle to the same completion.
#[derive(Clone)]
pub struct FirmwareCompletion {
    signal: Arc<Signal<CriticalSectionRawMutex, Option<Vec<u8>>>>,
}

impl FirmwareCompletion {
    /// Create a completion with no pending result.
    #[must_use]
    pub fn new() -> Self {
        Self {
            signal: Arc::new(Signal::new()),
        }
    }

    /// Report the outcome of the outstanding request.
    pub fn complete(&self, image: Option<Vec<u8>>) {
        self.signal.signal(image);
    }

    /// Wait until [`complete`](Self::complete) is called, consuming the result.
    pub async fn wait(&self) -> Option<Vec<u8>> {
        self.signal.wait().await
    }

    /// Drop any stale result left from a previous request.
    pub fn reset(&self) {
        self.signal.reset();
    }

    /// `true` if a result is waiting to be consumed.
    pub fn is_complete(&self) -> bool {
        self.signal.signaled()
    }
}

impl Default for FirmwareCompletion {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for FirmwareCompletion {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("FirmwareCompletion")
            .field("complete", &self.is_complete())
            .finish()
    }
}

/// Provider of tuning blobs.
pub trait FirmwareSource {
    /// Start loading `name`.
    ///
    /// Must not block. The implementation keeps (a clone of) `completion` and
    /// calls [`FirmwareCompletion::complete`] exactly once, either before
    /// returning or later from another task.
    fn request(&mut self, name: &str, completion: &FirmwareCompletion);
}
