//! Daemon configuration
//!
//! Loaded from an optional TOML file. Every section and field has a default,
//! so an empty file (or none at all) gives a working simulated device.
//! Addresses may be written as TOML hex integers (`ota_start = 0x132000`).

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use fwrest_api::{ApiSettings, DeviceInfo, FlashLayout, LfsLayout};
use fwrest_core::{FlashRegion, ImageFormat, OtaDestination, OtaTarget};
use fwrest_sim::AbPartitions;
use serde::Deserialize;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub flash: FlashConfig,
    pub lfs: LfsConfig,
    pub ota: OtaConfig,
    pub partitions: PartitionsConfig,
    pub device: DeviceConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: 8080,
        }
    }
}

/// Simulated flash chip
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct FlashConfig {
    pub capacity: u32,
    pub page_size: usize,
    pub erase_size: u32,
    /// Lowest address raw flash writes may start at
    pub ota_start: u32,
    /// Image file mirroring the chip; in memory only when unset
    pub image: Option<PathBuf>,
}

impl FlashConfig {
    /// Reject chip geometries the simulated flash cannot erase
    pub fn validate(&self) -> anyhow::Result<()> {
        anyhow::ensure!(self.erase_size > 0, "flash.erase_size must be non-zero");
        anyhow::ensure!(self.page_size > 0, "flash.page_size must be non-zero");
        anyhow::ensure!(
            self.capacity % self.erase_size == 0,
            "flash.capacity 0x{:X} is not a multiple of flash.erase_size 0x{:X}",
            self.capacity,
            self.erase_size
        );
        Ok(())
    }
}

impl Default for FlashConfig {
    fn default() -> Self {
        let layout = FlashLayout::default();
        Self {
            capacity: 0x20_0000,
            page_size: layout.page_size,
            erase_size: 0x1000,
            ota_start: layout.ota_start,
            image: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LfsConfig {
    /// Host directory holding the store's files
    pub root: PathBuf,
    pub blocks_start_min: u32,
    pub blocks_end: u32,
    pub size: u32,
    pub block_size: u32,
}

impl Default for LfsConfig {
    fn default() -> Self {
        let layout = LfsLayout::default();
        Self {
            root: PathBuf::from("lfs"),
            blocks_start_min: layout.blocks_start_min,
            blocks_end: layout.blocks_end,
            size: layout.size,
            block_size: layout.block_size,
        }
    }
}

impl LfsConfig {
    pub fn layout(&self) -> LfsLayout {
        LfsLayout {
            blocks_start_min: self.blocks_start_min,
            blocks_end: self.blocks_end,
            size: self.size,
            block_size: self.block_size,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormatKind {
    Raw,
    #[default]
    Headered,
    Booter,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestinationKind {
    #[default]
    Region,
    PartitionTable,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OtaConfig {
    pub format: FormatKind,
    /// Header magic of `headered` images
    pub magic: String,
    pub header_len: usize,
    pub destination: DestinationKind,
    /// Region start; defaults to `flash.ota_start`
    pub start: Option<u32>,
    /// Region end; defaults to the start of the file store blocks
    pub end: Option<u32>,
    /// Reset delay after a committed update; `0` disables the reset
    pub reboot_delay_secs: u64,
}

impl Default for OtaConfig {
    fn default() -> Self {
        Self {
            format: FormatKind::default(),
            magic: fwrest_core::ota::HEADERED_DEFAULT_MAGIC.to_string(),
            header_len: fwrest_core::ota::HEADERED_DEFAULT_LEN,
            destination: DestinationKind::default(),
            start: None,
            end: None,
            reboot_delay_secs: 3,
        }
    }
}

impl OtaConfig {
    pub fn image_format(&self) -> ImageFormat {
        match self.format {
            FormatKind::Raw => ImageFormat::Raw,
            FormatKind::Headered => ImageFormat::Headered {
                magic: self.magic.clone(),
                header_len: self.header_len,
            },
            FormatKind::Booter => ImageFormat::Booter,
        }
    }
}

#[derive(Debug, Clone, Copy, Deserialize)]
pub struct SlotConfig {
    pub start: u32,
    pub len: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PartitionsConfig {
    pub slots: Vec<SlotConfig>,
    pub active: usize,
}

impl Default for PartitionsConfig {
    fn default() -> Self {
        Self {
            slots: vec![
                SlotConfig {
                    start: 0x1_0000,
                    len: 0x9_0000,
                },
                SlotConfig {
                    start: 0xA_0000,
                    len: 0x9_0000,
                },
            ],
            active: 0,
        }
    }
}

impl PartitionsConfig {
    pub fn build(&self) -> anyhow::Result<AbPartitions> {
        let [a, b] = self.slots.as_slice() else {
            anyhow::bail!("partitions.slots needs exactly 2 entries, got {}", self.slots.len());
        };
        let slots = [FlashRegion::new(a.start, a.len), FlashRegion::new(b.start, b.len)];
        Ok(AbPartitions::new(slots, self.active)?)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    pub name: String,
    pub build: String,
    pub chipset: String,
    pub ip: String,
    pub mac: String,
    pub mqtt_host: String,
    pub mqtt_port: u16,
    pub mqtt_topic: String,
    pub webapp_root: Option<String>,
    pub supports_ssdp: bool,
    pub gpio_count: usize,
    pub channel_count: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        let info = DeviceInfo::default();
        Self {
            name: info.name,
            build: info.build,
            chipset: info.chipset,
            ip: info.ip,
            mac: info.mac,
            mqtt_host: info.mqtt_host,
            mqtt_port: info.mqtt_port,
            mqtt_topic: info.mqtt_topic,
            webapp_root: info.webapp_root,
            supports_ssdp: info.supports_ssdp,
            gpio_count: 32,
            channel_count: 64,
        }
    }
}

impl DeviceConfig {
    pub fn info(&self) -> DeviceInfo {
        DeviceInfo {
            name: self.name.clone(),
            build: self.build.clone(),
            chipset: self.chipset.clone(),
            ip: self.ip.clone(),
            mac: self.mac.clone(),
            mqtt_host: self.mqtt_host.clone(),
            mqtt_port: self.mqtt_port,
            mqtt_topic: self.mqtt_topic.clone(),
            webapp_root: self.webapp_root.clone(),
            supports_ssdp: self.supports_ssdp,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub level: i64,
    pub features: i64,
    /// JSON log lines instead of the human-readable format
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        let settings = fwrest_api::LogSettings::default().snapshot();
        Self {
            level: settings.level,
            features: settings.features,
            json: false,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.flash.validate()?;
        Ok(config)
    }

    /// API settings for this device.
    ///
    /// `partitions` is required when the update destination is the
    /// partition table.
    pub fn api_settings(&self, partitions: Option<Arc<AbPartitions>>) -> anyhow::Result<ApiSettings> {
        let layout = FlashLayout {
            page_size: self.flash.page_size,
            ota_start: self.flash.ota_start,
        };
        let lfs = self.lfs.layout();
        let lfs_region = lfs.block_region()?;

        let format = self.ota.image_format();
        format.validate()?;

        let destination = match self.ota.destination {
            DestinationKind::Region => {
                let start = self.ota.start.unwrap_or(layout.ota_start);
                let end = self.ota.end.unwrap_or(lfs_region.start);
                OtaDestination::Region(FlashRegion::from_bounds(start, end)?)
            }
            DestinationKind::PartitionTable => {
                let table = partitions
                    .context("partition_table destination without a partition table")?;
                OtaDestination::PartitionTable(table)
            }
        };

        let ota_reboot_delay =
            (self.ota.reboot_delay_secs > 0).then(|| Duration::from_secs(self.ota.reboot_delay_secs));

        Ok(ApiSettings {
            layout,
            lfs,
            ota: OtaTarget::new(format, destination),
            ota_reboot_delay,
            device: self.device.info(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.flash.capacity, 0x20_0000);
        assert_eq!(config.flash.ota_start, 0x13_2000);
        assert_eq!(config.ota.format, FormatKind::Headered);
        assert_eq!(config.ota.reboot_delay_secs, 3);
        assert!(!config.log.json);
    }

    #[test]
    fn default_update_region_stops_below_file_store() {
        let settings = Config::default().api_settings(None).unwrap();
        match settings.ota.destination {
            OtaDestination::Region(region) => {
                assert_eq!(region, FlashRegion::new(0x13_2000, 0x1C_8000 - 0x13_2000));
            }
            other => panic!("unexpected destination {:?}", other),
        }
        assert_eq!(settings.ota_reboot_delay, Some(Duration::from_secs(3)));
    }

    #[test]
    fn parses_hex_addresses_and_sections() {
        let config = Config::parse(
            r#"
            [server]
            port = 9090

            [flash]
            ota_start = 0x100000
            image = "flash.bin"

            [lfs]
            root = "/tmp/store"
            size = 0x10000

            [ota]
            format = "booter"
            start = 0x100000
            end = 0x180000
            reboot_delay_secs = 0

            [device]
            name = "bench-plug"
            webapp_root = "https://apps.example.net"
            "#,
        )
        .unwrap();

        assert_eq!(config.server.port, 9090);
        assert_eq!(config.flash.ota_start, 0x10_0000);
        assert_eq!(config.flash.image.as_deref(), Some(Path::new("flash.bin")));
        assert_eq!(config.lfs.size, 0x1_0000);
        assert_eq!(config.ota.format, FormatKind::Booter);

        let settings = config.api_settings(None).unwrap();
        assert_eq!(settings.ota.format, ImageFormat::Booter);
        assert_eq!(settings.ota_reboot_delay, None);
        assert_eq!(settings.device.name, "bench-plug");
        assert_eq!(settings.lfs.block_region().unwrap().len, 0x1_0000);
    }

    #[test]
    fn partition_destination_needs_table() {
        let config = Config::parse("[ota]\ndestination = \"partition_table\"\n").unwrap();
        assert!(config.api_settings(None).is_err());

        let table = Arc::new(config.partitions.build().unwrap());
        let settings = config.api_settings(Some(table)).unwrap();
        assert!(matches!(settings.ota.destination, OtaDestination::PartitionTable(_)));
    }

    #[test]
    fn partitions_need_two_slots() {
        let config = Config::parse("[partitions]\nslots = [{ start = 0x10000, len = 0x1000 }]\n").unwrap();
        assert!(config.partitions.build().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("device.toml");
        std::fs::write(&path, "[server]\nbind = \"127.0.0.1\"\nport = 8181\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1");
        assert_eq!(config.server.port, 8181);

        assert!(Config::load(dir.path().join("missing.toml")).is_err());
    }

    #[test]
    fn flash_geometry_is_validated() {
        assert!(Config::parse("[flash]\nerase_size = 0\n").is_err());
        assert!(Config::parse("[flash]\ncapacity = 0x200800\n").is_err());
        assert!(Config::parse("[flash]\ncapacity = 0x100000\nerase_size = 0x10000\n").is_ok());
    }

    #[test]
    fn unknown_format_is_rejected() {
        assert!(Config::parse("[ota]\nformat = \"zip\"\n").is_err());
    }
}
