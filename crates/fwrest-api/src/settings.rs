//! Device settings consumed by the handlers
//!
//! These are plain values loaded once at startup, except [`LogSettings`]
//! which the API itself changes at runtime.

use fwrest_core::{CoreError, CoreResult, FlashRegion};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

fn default_page_size() -> usize {
    fwrest_core::flash::DEFAULT_PAGE_SIZE
}

fn default_ota_start() -> u32 {
    0x13_2000
}

/// Flash address map used by the raw flash endpoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlashLayout {
    /// Transfer page size in bytes
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    /// Lowest address raw flash writes may start at
    #[serde(default = "default_ota_start")]
    pub ota_start: u32,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            ota_start: default_ota_start(),
        }
    }
}

/// Placement of the file store block region.
///
/// The region ends at `blocks_end` and grows down by `size` bytes, never
/// below `blocks_start_min`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LfsLayout {
    pub blocks_start_min: u32,
    pub blocks_end: u32,
    pub size: u32,
    pub block_size: u32,
}

impl Default for LfsLayout {
    fn default() -> Self {
        Self {
            blocks_start_min: 0x12_B000,
            blocks_end: 0x1D_0000,
            size: 0x8000,
            block_size: 4096,
        }
    }
}

impl LfsLayout {
    /// Block region of the store, checked against the configured limits
    pub fn block_region(&self) -> CoreResult<FlashRegion> {
        let block = self.block_size.max(1);
        let size = self.size / block * block;
        if size == 0 {
            return Err(CoreError::Bounds(format!(
                "LFS size 0x{:X} smaller than one block",
                self.size
            )));
        }

        let start = self
            .blocks_end
            .checked_sub(size)
            .filter(|&start| start >= self.blocks_start_min)
            .ok_or_else(|| {
                CoreError::Bounds(format!(
                    "LFS size mismatch: 0x{:X} bytes do not fit between 0x{:06X} and 0x{:06X}",
                    size, self.blocks_start_min, self.blocks_end
                ))
            })?;

        let region = FlashRegion::new(start, size);
        if region.end() > self.blocks_end as u64 {
            return Err(CoreError::Bounds("LFS size mismatch".to_string()));
        }
        Ok(region)
    }
}

/// Identity reported by `api/info` and the app page
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceInfo {
    pub name: String,
    pub build: String,
    pub chipset: String,
    pub ip: String,
    pub mac: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    /// Root URL of the hosted web app, if any
    pub webapp_root: Option<String>,
    pub supports_ssdp: bool,
}

impl Default for DeviceInfo {
    fn default() -> Self {
        Self {
            name: "fwrest".to_string(),
            build: format!("fwrest {}", env!("CARGO_PKG_VERSION")),
            chipset: "SIM".to_string(),
            ip: "127.0.0.1".to_string(),
            mac: "00:00:00:00:00:00".to_string(),
            mqtt_host: String::new(),
            mqtt_port: 1883,
            mqtt_topic: "fwrest".to_string(),
            webapp_root: None,
            supports_ssdp: false,
        }
    }
}

pub const LEVEL_NAMES: &[&str] = &["Disabled", "Error", "Warn", "Info", "Debug", "ExtraDebug", "All"];

pub const FEATURE_NAMES: &[&str] = &[
    "HTTP", "MQTT", "CFG", "HTTP_CLIENT", "OTA", "PINS", "MAIN", "GEN", "API", "LFS", "CMD",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LogState {
    pub level: i64,
    pub features: i64,
    pub direct_serial: bool,
}

/// Operator log configuration, shared by every request
#[derive(Debug)]
pub struct LogSettings {
    state: RwLock<LogState>,
}

impl LogSettings {
    pub fn new(level: i64, features: i64) -> Self {
        Self {
            state: RwLock::new(LogState {
                level,
                features,
                direct_serial: false,
            }),
        }
    }

    pub fn snapshot(&self) -> LogState {
        *self.state.read()
    }

    pub fn set_level(&self, level: i64) {
        self.state.write().level = level;
    }

    pub fn set_features(&self, features: i64) {
        self.state.write().features = features;
    }

    pub fn set_direct_serial(&self, enabled: bool) {
        self.state.write().direct_serial = enabled;
    }
}

impl Default for LogSettings {
    fn default() -> Self {
        Self::new(3, (1 << FEATURE_NAMES.len()) - 1)
    }
}
