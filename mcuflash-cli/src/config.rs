//! Configuration file support for mcuflash.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (MCUFLASH_*)
//! 3. Local config file (./mcuflash.toml, ./mcuflash_ports.toml)
//! 4. Global config file (~/.config/mcuflash/config.toml)
//!
//! A file given with `--config` replaces the file sources entirely.

use {
    crate::CliError,
    directories::ProjectDirs,
    log::{debug, info, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Local configuration file name.
pub const LOCAL_CONFIG_FILE: &str = "mcuflash.toml";

/// Local file remembered USB devices are written to.
const LOCAL_PORTS_FILE: &str = "mcuflash_ports.toml";

/// USB device identification for port matching.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UsbDevice {
    /// USB Vendor ID.
    pub vid: u16,
    /// USB Product ID.
    pub pid: u16,
}

impl UsbDevice {
    /// Check if this device matches the given USB info.
    pub fn matches(&self, vid: u16, pid: u16) -> bool {
        self.vid == vid && self.pid == pid
    }
}

/// Connection configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub serial: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
}

/// Port-specific configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PortConfig {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Send path defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per write.
    pub chunk_size: Option<usize>,
    /// Pause between chunks in milliseconds.
    pub chunk_delay_ms: Option<u64>,
    /// Where patched images are written.
    pub output_dir: Option<PathBuf>,
}

/// Response path defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// Idle poll interval in milliseconds.
    pub poll_interval_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Port configuration.
    #[serde(default)]
    pub port: PortConfig,
    /// Transfer configuration.
    #[serde(default)]
    pub transfer: TransferConfig,
    /// Monitor configuration.
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Unreadable or malformed files are skipped with a warning.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        // Remembered devices
        if let Some(ports) = Self::load_ports_config() {
            config.port.usb_device.extend(ports.usb_device);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a missing or malformed file is an error.
    pub fn load_from_path(path: &Path) -> anyhow::Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            CliError::Config(format!("Cannot read config file {}: {e}", path.display()))
        })?;
        let config = toml::from_str(&content).map_err(|e| {
            CliError::Config(format!("Invalid config file {}: {e}", path.display()))
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse config file {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Load remembered ports from the local or global ports file.
    fn load_ports_config() -> Option<PortConfig> {
        let local_path = PathBuf::from(LOCAL_PORTS_FILE);
        let global_path = Self::global_config_dir().map(|dir| dir.join("ports.toml"));

        for path in std::iter::once(local_path).chain(global_path) {
            if !path.exists() {
                continue;
            }
            if let Ok(content) = fs::read_to_string(&path) {
                if let Ok(config) = toml::from_str(&content) {
                    debug!("Loaded ports config from {}", path.display());
                    return Some(config);
                }
            }
        }

        None
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "mcuflash").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        // Port config
        if other.port.connection.serial.is_some() {
            self.port.connection.serial = other.port.connection.serial;
        }
        if other.port.connection.baud.is_some() {
            self.port.connection.baud = other.port.connection.baud;
        }
        self.port.usb_device.extend(other.port.usb_device);

        // Transfer config
        if other.transfer.chunk_size.is_some() {
            self.transfer.chunk_size = other.transfer.chunk_size;
        }
        if other.transfer.chunk_delay_ms.is_some() {
            self.transfer.chunk_delay_ms = other.transfer.chunk_delay_ms;
        }
        if other.transfer.output_dir.is_some() {
            self.transfer.output_dir = other.transfer.output_dir;
        }

        // Monitor config
        if other.monitor.poll_interval_ms.is_some() {
            self.monitor.poll_interval_ms = other.monitor.poll_interval_ms;
        }
    }

    /// Configured chunk delay, `None` when unset or zero.
    pub fn chunk_delay(&self) -> Option<Duration> {
        self.transfer
            .chunk_delay_ms
            .filter(|&ms| ms > 0)
            .map(Duration::from_millis)
    }

    /// Configured idle poll interval.
    pub fn poll_interval(&self) -> Option<Duration> {
        self.monitor.poll_interval_ms.map(Duration::from_millis)
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        // Don't add duplicates
        if self.port.usb_device.contains(&device) {
            return Ok(());
        }

        // Try to save to local file first, fall back to global
        let path = if Path::new(LOCAL_PORTS_FILE).exists() || Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_PORTS_FILE)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS_FILE)
        };

        self.port.usb_device.push(device);
        Self::write_ports(&path, &self.port)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }

    fn write_ports(path: &Path, ports: &PortConfig) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(ports)?;
        fs::write(path, content)?;
        Ok(())
    }
}
