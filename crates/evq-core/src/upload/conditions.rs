//! System conditions gating uploads.
//!
//! Before each cycle the worker asks its [`UploadConditions`] for blockers.
//! Any blocker turns the cycle into a soft failure: nothing is read and no
//! network call is made.

use std::sync::Arc;

use serde::Serialize;

/// Minimum battery level (fraction) for uploading while unplugged.
pub const MIN_BATTERY_LEVEL: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatteryState {
    Unknown,
    Unplugged,
    Charging,
    Full,
}

/// Battery snapshot reported by the host.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatteryStatus {
    pub state: BatteryState,
    /// Charge as a fraction in `[0, 1]`.
    pub level: f32,
    pub low_power_mode: bool,
}

pub trait BatteryStatusProvider: Send + Sync {
    /// `None` when the platform has no battery information.
    fn battery_status(&self) -> Option<BatteryStatus>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Reachability {
    Yes,
    /// Reachability could not be determined; uploads are attempted.
    Maybe,
    No,
}

pub trait NetworkStatusProvider: Send + Sync {
    /// `None` when the platform has no network information.
    fn reachability(&self) -> Option<Reachability>;
}

/// Reason an upload cycle was skipped.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "blocker", rename_all = "snake_case")]
pub enum UploadBlocker {
    Battery { level: f32, state: BatteryState },
    LowPowerModeOn,
    NetworkReachability { reachability: Reachability },
}

impl std::fmt::Display for UploadBlocker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UploadBlocker::Battery { level, state } => {
                write!(f, "battery {:?} at {:.0}%", state, level * 100.0)
            }
            UploadBlocker::LowPowerModeOn => write!(f, "low power mode enabled"),
            UploadBlocker::NetworkReachability { reachability } => {
                write!(f, "network reachability {:?}", reachability)
            }
        }
    }
}

/// Gate consulted before every upload cycle.
pub trait UploadConditions: Send + Sync {
    fn blockers_for_upload(&self) -> Vec<UploadBlocker>;

    fn can_upload_now(&self) -> bool {
        self.blockers_for_upload().is_empty()
    }
}

/// Conditions that never block.
#[derive(Debug, Default, Clone, Copy)]
pub struct AlwaysUpload;

impl UploadConditions for AlwaysUpload {
    fn blockers_for_upload(&self) -> Vec<UploadBlocker> {
        Vec::new()
    }
}

/// Battery and network checks against host-provided status.
///
/// Uploads are blocked when the device runs on a low battery (at or below
/// [`MIN_BATTERY_LEVEL`] and not charging), when low power mode is on, or
/// when the network is known to be unreachable. Missing providers never
/// block.
#[derive(Default, Clone)]
pub struct SystemUploadConditions {
    battery: Option<Arc<dyn BatteryStatusProvider>>,
    network: Option<Arc<dyn NetworkStatusProvider>>,
}

impl SystemUploadConditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_battery(mut self, provider: Arc<dyn BatteryStatusProvider>) -> Self {
        self.battery = Some(provider);
        self
    }

    pub fn with_network(mut self, provider: Arc<dyn NetworkStatusProvider>) -> Self {
        self.network = Some(provider);
        self
    }

    fn battery_blockers(status: BatteryStatus) -> Vec<UploadBlocker> {
        if status.state == BatteryState::Unknown {
            // Simulators and desktops report no battery.
            return Vec::new();
        }
        let mut blockers = Vec::new();
        let charging = matches!(status.state, BatteryState::Charging | BatteryState::Full);
        if !charging && status.level <= MIN_BATTERY_LEVEL {
            blockers.push(UploadBlocker::Battery {
                level: status.level,
                state: status.state,
            });
        }
        if status.low_power_mode {
            blockers.push(UploadBlocker::LowPowerModeOn);
        }
        blockers
    }
}

impl UploadConditions for SystemUploadConditions {
    fn blockers_for_upload(&self) -> Vec<UploadBlocker> {
        let mut blockers = self
            .battery
            .as_ref()
            .and_then(|p| p.battery_status())
            .map(Self::battery_blockers)
            .unwrap_or_default();

        if let Some(Reachability::No) = self.network.as_ref().and_then(|p| p.reachability()) {
            blockers.push(UploadBlocker::NetworkReachability {
                reachability: Reachability::No,
            });
        }
        blockers
    }
}

impl std::fmt::Debug for SystemUploadConditions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemUploadConditions")
            .field("battery", &self.battery.is_some())
            .field("network", &self.network.is_some())
            .finish()
    }
}
