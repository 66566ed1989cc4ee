//! Audio route management
//!
//! Capture and playback share one physical path. Before every listening
//! attempt the arbiter asks the [`AudioRouteManager`] to select and lock a
//! route: a wireless headset when one is connected, else the built-in
//! microphone. The lock switches the platform into communication mode and
//! either pins the headset (platforms with explicit routing) or brings up a
//! legacy SCO link. Releasing restores normal mode.

#[cfg(feature = "host-audio")]
pub mod host;

use std::fmt;
use std::sync::{Arc, Mutex};

use crate::Result;

/// Physical audio path kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteKind {
    /// Device microphone and speaker
    BuiltIn,
    /// Wireless headset over a voice (SCO-class) link
    WirelessSco,
}

impl fmt::Display for RouteKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BuiltIn => write!(f, "built-in"),
            Self::WirelessSco => write!(f, "wireless"),
        }
    }
}

/// Selected audio path
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRoute {
    /// Route kind
    pub kind: RouteKind,
    /// Input device backing the route, when one was enumerated
    pub device: Option<InputDevice>,
    /// Whether the route is currently locked for communication
    pub locked: bool,
}

impl AudioRoute {
    /// Built-in route with no specific device
    #[must_use]
    pub const fn built_in() -> Self {
        Self {
            kind: RouteKind::BuiltIn,
            device: None,
            locked: false,
        }
    }

    /// Whether `other` is the same physical path
    #[must_use]
    pub fn same_path(&self, other: &Self) -> bool {
        self.kind == other.kind
            && self.device.as_ref().map(|d| &d.name) == other.device.as_ref().map(|d| &d.name)
    }
}

/// Kind of an enumerated input device
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// Device microphone or a wired input
    BuiltIn,
    /// Bluetooth hands-free / headset profile
    Sco,
    /// Bluetooth media profile
    A2dp,
}

impl DeviceKind {
    /// Whether the device is a wireless headset
    #[must_use]
    pub const fn is_wireless(self) -> bool {
        matches!(self, Self::Sco | Self::A2dp)
    }
}

/// One input device reported by the platform
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputDevice {
    /// Platform device name
    pub name: String,
    /// Device kind
    pub kind: DeviceKind,
}

impl InputDevice {
    /// Describe a device, classifying it from its name
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: classify_device(name),
        }
    }
}

/// Name fragments of hands-free headset inputs
const SCO_HINTS: [&str; 7] = ["bluez", "bluetooth", "headset", "hands-free", "hfp", "hsp", "sco"];

/// Guess a device's kind from its platform name
#[must_use]
pub fn classify_device(name: &str) -> DeviceKind {
    let name = name.to_lowercase();
    if name.contains("a2dp") {
        return DeviceKind::A2dp;
    }
    if SCO_HINTS.iter().any(|hint| name.contains(hint)) {
        DeviceKind::Sco
    } else {
        DeviceKind::BuiltIn
    }
}

/// Platform audio mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioMode {
    /// Media playback mode
    Normal,
    /// Two-way voice mode
    Communication,
}

/// Platform audio controls
pub trait AudioPlatform: Send + Sync {
    /// Currently connected input devices
    ///
    /// # Errors
    ///
    /// Returns error if the platform cannot enumerate devices
    fn input_devices(&self) -> Result<Vec<InputDevice>>;

    /// Switch the audio mode
    ///
    /// # Errors
    ///
    /// Returns error if the platform rejects the mode
    fn set_mode(&self, mode: AudioMode) -> Result<()>;

    /// Whether the platform can pin a communication device explicitly
    fn supports_route_pinning(&self) -> bool;

    /// Route communication audio to `device`
    ///
    /// # Errors
    ///
    /// Returns error if the device cannot be pinned
    fn pin_communication_device(&self, device: &InputDevice) -> Result<()>;

    /// Undo [`AudioPlatform::pin_communication_device`]
    ///
    /// # Errors
    ///
    /// Returns error if the platform fails to clear the pin
    fn clear_communication_device(&self) -> Result<()>;

    /// Bring up the legacy SCO voice link
    ///
    /// # Errors
    ///
    /// Returns error if the link cannot be started
    fn start_sco(&self) -> Result<()>;

    /// Tear down the legacy SCO voice link
    ///
    /// # Errors
    ///
    /// Returns error if the link cannot be stopped
    fn stop_sco(&self) -> Result<()>;
}

/// Selects, locks and releases the shared audio path
pub struct AudioRouteManager {
    platform: Arc<dyn AudioPlatform>,
    current: Option<AudioRoute>,
}

impl AudioRouteManager {
    /// Create a manager over a platform
    #[must_use]
    pub fn new(platform: Arc<dyn AudioPlatform>) -> Self {
        Self {
            platform,
            current: None,
        }
    }

    /// The locked route, if any
    #[must_use]
    pub const fn current(&self) -> Option<&AudioRoute> {
        self.current.as_ref()
    }

    /// Whether a route is locked
    #[must_use]
    pub const fn is_locked(&self) -> bool {
        self.current.is_some()
    }

    /// Pick the route a capture should use right now
    ///
    /// Prefers a hands-free headset, then a media-profile headset, then the
    /// built-in path. Enumeration failures fall back to built-in.
    #[must_use]
    pub fn select_input_route(&self) -> AudioRoute {
        let devices = match self.platform.input_devices() {
            Ok(devices) => devices,
            Err(e) => {
                tracing::warn!(error = %e, "input device enumeration failed, using built-in route");
                return AudioRoute::built_in();
            }
        };

        let wireless = devices
            .iter()
            .find(|d| d.kind == DeviceKind::Sco)
            .or_else(|| devices.iter().find(|d| d.kind.is_wireless()));

        match wireless {
            Some(device) => AudioRoute {
                kind: RouteKind::WirelessSco,
                device: Some(device.clone()),
                locked: false,
            },
            None => AudioRoute {
                kind: RouteKind::BuiltIn,
                device: devices.into_iter().next(),
                locked: false,
            },
        }
    }

    /// Select and lock the communication route
    ///
    /// Safe to call before every capture: re-locking the same path re-asserts
    /// the mode and link, and a different path is released first.
    ///
    /// # Errors
    ///
    /// Returns error if the platform rejects communication mode. A failed
    /// headset link degrades to the built-in route instead.
    pub fn lock_communication_route(&mut self) -> Result<AudioRoute> {
        let mut route = self.select_input_route();

        if let Some(current) = &self.current
            && !current.same_path(&route)
        {
            tracing::info!(from = %current.kind, to = %route.kind, "audio route changed");
            self.release_route();
        }

        self.platform.set_mode(AudioMode::Communication)?;

        if route.kind == RouteKind::WirelessSco
            && let Err(e) = self.engage_wireless(&route)
        {
            tracing::warn!(error = %e, "wireless link failed, falling back to built-in route");
            route = AudioRoute::built_in();
        }

        route.locked = true;
        tracing::debug!(
            kind = %route.kind,
            device = route.device.as_ref().map_or("default", |d| d.name.as_str()),
            "audio route locked"
        );
        self.current = Some(route.clone());
        Ok(route)
    }

    fn engage_wireless(&self, route: &AudioRoute) -> Result<()> {
        match (&route.device, self.platform.supports_route_pinning()) {
            (Some(device), true) => self.platform.pin_communication_device(device),
            _ => self.platform.start_sco(),
        }
    }

    /// Restore normal mode and drop any headset link
    ///
    /// Failures are logged; releasing never fails the caller.
    pub fn release_route(&mut self) {
        let Some(route) = self.current.take() else {
            return;
        };

        if route.kind == RouteKind::WirelessSco {
            let result = if route.device.is_some() && self.platform.supports_route_pinning() {
                self.platform.clear_communication_device()
            } else {
                self.platform.stop_sco()
            };
            if let Err(e) = result {
                tracing::warn!(error = %e, "failed to drop wireless link");
            }
        }

        if let Err(e) = self.platform.set_mode(AudioMode::Normal) {
            tracing::warn!(error = %e, "failed to restore normal audio mode");
        }

        tracing::debug!(kind = %route.kind, "audio route released");
    }
}

impl Drop for AudioRouteManager {
    fn drop(&mut self) {
        self.release_route();
    }
}

/// Platform with a fixed device list and no real routing
///
/// Used for console sessions and as the base for tests. Mode and link calls
/// are recorded so callers can inspect what was requested.
#[derive(Debug, Default)]
pub struct StaticPlatform {
    devices: Vec<InputDevice>,
    pinning: bool,
    log: Mutex<Vec<String>>,
}

impl StaticPlatform {
    /// Create a platform reporting `devices`
    #[must_use]
    pub fn new(devices: Vec<InputDevice>, pinning: bool) -> Self {
        Self {
            devices,
            pinning,
            log: Mutex::new(Vec::new()),
        }
    }

    /// Calls made so far, oldest first
    #[must_use]
    pub fn calls(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }

    fn record(&self, call: String) {
        if let Ok(mut log) = self.log.lock() {
            log.push(call);
        }
    }
}

impl AudioPlatform for StaticPlatform {
    fn input_devices(&self) -> Result<Vec<InputDevice>> {
        Ok(self.devices.clone())
    }

    fn set_mode(&self, mode: AudioMode) -> Result<()> {
        self.record(format!("mode:{mode:?}"));
        Ok(())
    }

    fn supports_route_pinning(&self) -> bool {
        self.pinning
    }

    fn pin_communication_device(&self, device: &InputDevice) -> Result<()> {
        self.record(format!("pin:{}", device.name));
        Ok(())
    }

    fn clear_communication_device(&self) -> Result<()> {
        self.record("unpin".to_string());
        Ok(())
    }

    fn start_sco(&self) -> Result<()> {
        self.record("sco:start".to_string());
        Ok(())
    }

    fn stop_sco(&self) -> Result<()> {
        self.record("sco:stop".to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager(devices: &[&str], pinning: bool) -> (AudioRouteManager, Arc<StaticPlatform>) {
        let platform = Arc::new(StaticPlatform::new(
            devices.iter().map(|n| InputDevice::from_name(n)).collect(),
            pinning,
        ));
        (AudioRouteManager::new(platform.clone()), platform)
    }

    #[test]
    fn test_classify_device() {
        assert_eq!(classify_device("bluez_input.AA_BB.headset-head-unit"), DeviceKind::Sco);
        assert_eq!(classify_device("Jabra Bluetooth Headset"), DeviceKind::Sco);
        assert_eq!(classify_device("bluez_source.a2dp_source"), DeviceKind::A2dp);
        assert_eq!(classify_device("Built-in Microphone"), DeviceKind::BuiltIn);
    }

    #[test]
    fn test_select_prefers_wireless() {
        let (routes, _) = manager(&["Built-in Microphone", "Jabra Bluetooth Headset"], true);
        let route = routes.select_input_route();
        assert_eq!(route.kind, RouteKind::WirelessSco);
        assert!(!route.locked);

        let (routes, _) = manager(&["Built-in Microphone"], true);
        assert_eq!(routes.select_input_route().kind, RouteKind::BuiltIn);

        let (routes, _) = manager(&[], true);
        assert_eq!(routes.select_input_route(), AudioRoute::built_in());
    }

    #[test]
    fn test_lock_pins_when_supported() {
        let (mut routes, platform) = manager(&["Jabra Bluetooth Headset"], true);
        let route = routes.lock_communication_route().unwrap();
        assert!(route.locked);
        assert_eq!(
            platform.calls(),
            vec!["mode:Communication", "pin:Jabra Bluetooth Headset"]
        );

        routes.release_route();
        assert!(!routes.is_locked());
        assert_eq!(platform.calls()[2..].to_vec(), vec!["unpin", "mode:Normal"]);
    }

    #[test]
    fn test_lock_uses_sco_without_pinning() {
        let (mut routes, platform) = manager(&["Jabra Bluetooth Headset"], false);
        routes.lock_communication_route().unwrap();
        routes.release_route();
        assert_eq!(
            platform.calls(),
            vec!["mode:Communication", "sco:start", "sco:stop", "mode:Normal"]
        );
    }

    #[test]
    fn test_relock_same_route_does_not_release() {
        let (mut routes, platform) = manager(&["Built-in Microphone"], true);
        routes.lock_communication_route().unwrap();
        routes.lock_communication_route().unwrap();
        assert_eq!(platform.calls(), vec!["mode:Communication", "mode:Communication"]);
    }

    #[test]
    fn test_release_without_lock_is_noop() {
        let (mut routes, platform) = manager(&["Built-in Microphone"], true);
        routes.release_route();
        assert!(platform.calls().is_empty());
    }

    #[test]
    fn test_drop_releases() {
        let (mut routes, platform) = manager(&[], false);
        routes.lock_communication_route().unwrap();
        drop(routes);
        assert_eq!(platform.calls().last().map(String::as_str), Some("mode:Normal"));
    }
}
