//! Host audio platform backed by cpal
//!
//! Desktop hosts have no communication mode and no SCO control; a headset
//! shows up as an ordinary input device. Pinning records the device name so
//! the capture engine opens it instead of the default input.

use std::sync::{Arc, RwLock};

use cpal::traits::{DeviceTrait, HostTrait};

use super::{AudioMode, AudioPlatform, InputDevice};
use crate::{Error, Result};

/// Device name chosen by the route manager, shared with capture
pub type PinnedDevice = Arc<RwLock<Option<String>>>;

/// cpal-backed [`AudioPlatform`]
#[derive(Default)]
pub struct HostPlatform {
    pinned: PinnedDevice,
}

impl HostPlatform {
    /// Create a platform over the default cpal host
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle to the pinned input device name
    #[must_use]
    pub fn pinned(&self) -> PinnedDevice {
        Arc::clone(&self.pinned)
    }

    fn set_pinned(&self, name: Option<String>) -> Result<()> {
        let mut pinned = self
            .pinned
            .write()
            .map_err(|_| Error::Audio("pinned device lock poisoned".to_string()))?;
        *pinned = name;
        Ok(())
    }
}

impl AudioPlatform for HostPlatform {
    fn input_devices(&self) -> Result<Vec<InputDevice>> {
        let host = cpal::default_host();
        let devices = host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?;

        Ok(devices
            .filter_map(|device| device.name().ok())
            .map(|name| InputDevice::from_name(&name))
            .collect())
    }

    fn set_mode(&self, mode: AudioMode) -> Result<()> {
        tracing::trace!(?mode, "audio mode is implicit on this host");
        Ok(())
    }

    fn supports_route_pinning(&self) -> bool {
        true
    }

    fn pin_communication_device(&self, device: &InputDevice) -> Result<()> {
        tracing::debug!(device = %device.name, "pinning input device");
        self.set_pinned(Some(device.name.clone()))
    }

    fn clear_communication_device(&self) -> Result<()> {
        self.set_pinned(None)
    }

    fn start_sco(&self) -> Result<()> {
        Err(Error::Audio("SCO link control is not available on this host".to_string()))
    }

    fn stop_sco(&self) -> Result<()> {
        Ok(())
    }
}

/// Find an input device by name, falling back to the default input
///
/// # Errors
///
/// Returns error if no input device is available
pub fn input_device(name: Option<&str>) -> Result<cpal::Device> {
    let host = cpal::default_host();

    if let Some(name) = name {
        let found = host
            .input_devices()
            .map_err(|e| Error::Audio(e.to_string()))?
            .find(|d| d.name().is_ok_and(|n| n == name));
        if let Some(device) = found {
            return Ok(device);
        }
        tracing::warn!(device = name, "pinned input device disappeared, using default");
    }

    host.default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))
}
