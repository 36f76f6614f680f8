//! Configuration file support for the createlab CLI.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (CREATELAB_*)
//! 3. Local config file (./createlab.toml), then ./createlab_ports.toml for ports
//! 4. Global config file (~/.config/createlab/config.toml)

use {
    createlab::{IoSettings, QueueSettings},
    directories::ProjectDirs,
    log::{debug, info, warn},
    serde::{Deserialize, Serialize},
    std::{
        fs,
        path::{Path, PathBuf},
        time::Duration,
    },
};

/// Name of the per-project config file.
pub const LOCAL_CONFIG_FILE: &str = "createlab.toml";

/// Name of the per-project remembered-ports file.
const LOCAL_PORTS_FILE: &str = "createlab_ports.toml";

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

/// Serial port settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SerialSection {
    /// Preferred serial port (e.g., "/dev/ttyUSB0" or "COM3").
    pub port: Option<String>,
    /// Default baud rate.
    pub baud: Option<u32>,
    /// Known USB devices for auto-detection.
    #[serde(default)]
    pub usb_device: Vec<UsbDevice>,
}

/// Timing of the serial primitives.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IoSection {
    /// Budget for reading a response or an echo.
    pub read_timeout_ms: Option<u64>,
    /// Budget for draining input or scanning for a pattern.
    pub slurp_timeout_ms: Option<u64>,
    /// Total writes attempted by echo verification.
    pub max_retries: Option<u32>,
}

/// Command queue timing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueSection {
    /// How long a caller waits for one command.
    pub task_timeout_ms: Option<u64>,
}

/// Startup handshake settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HandshakeSection {
    /// Pause after a confirmed handshake.
    pub settle_delay_ms: Option<u64>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Serial port configuration.
    #[serde(default)]
    pub serial: SerialSection,
    /// Serial I/O timing.
    #[serde(default)]
    pub io: IoSection,
    /// Queue timing.
    #[serde(default)]
    pub queue: QueueSection,
    /// Handshake timing.
    #[serde(default)]
    pub handshake: HandshakeSection,
}

/// Failure to load an explicitly requested config file.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Read {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: std::io::Error,
    },
    /// The file is not valid TOML for this schema.
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        /// Offending file.
        path: PathBuf,
        /// Underlying error.
        source: toml::de::Error,
    },
}

impl Config {
    /// Load configuration from all available sources.
    ///
    /// Unreadable or invalid files are reported and skipped.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_lenient(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_lenient(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        // Remembered USB devices
        if let Some(devices) = Self::load_ports_config() {
            config.serial.usb_device.extend(devices);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    ///
    /// Unlike [`Config::load`], a missing or invalid file is an error.
    pub fn load_from_path(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    fn load_lenient(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match Self::load_from_path(path) {
            Ok(config) => Some(config),
            Err(e) => {
                warn!("{e}");
                None
            },
        }
    }

    fn load_ports_config() -> Option<Vec<UsbDevice>> {
        let mut candidates = vec![PathBuf::from(LOCAL_PORTS_FILE)];
        if let Some(global_dir) = Self::global_config_dir() {
            candidates.push(global_dir.join("ports.toml"));
        }

        candidates
            .into_iter()
            .filter(|path| path.exists())
            .find_map(|path| {
                let content = fs::read_to_string(&path).ok()?;
                let ports: SerialSection = toml::from_str(&content).ok()?;
                debug!("Loaded ports config from {}", path.display());
                Some(ports.usb_device)
            })
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "createlab").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one. Values set in `other` win.
    fn merge(&mut self, other: Self) {
        if other.serial.port.is_some() {
            self.serial.port = other.serial.port;
        }
        if other.serial.baud.is_some() {
            self.serial.baud = other.serial.baud;
        }
        self.serial.usb_device.extend(other.serial.usb_device);

        if other.io.read_timeout_ms.is_some() {
            self.io.read_timeout_ms = other.io.read_timeout_ms;
        }
        if other.io.slurp_timeout_ms.is_some() {
            self.io.slurp_timeout_ms = other.io.slurp_timeout_ms;
        }
        if other.io.max_retries.is_some() {
            self.io.max_retries = other.io.max_retries;
        }
        if other.queue.task_timeout_ms.is_some() {
            self.queue.task_timeout_ms = other.queue.task_timeout_ms;
        }
        if other.handshake.settle_delay_ms.is_some() {
            self.handshake.settle_delay_ms = other.handshake.settle_delay_ms;
        }
    }

    /// Serial I/O settings with configured overrides applied.
    pub fn io_settings(&self) -> IoSettings {
        let mut settings = IoSettings::default();
        if let Some(ms) = self.io.read_timeout_ms {
            settings = settings.with_read_timeout(Duration::from_millis(ms));
        }
        if let Some(ms) = self.io.slurp_timeout_ms {
            settings = settings.with_slurp_timeout(Duration::from_millis(ms));
        }
        if let Some(retries) = self.io.max_retries {
            settings = settings.with_max_retries(retries);
        }
        settings
    }

    /// Queue settings with configured overrides applied.
    pub fn queue_settings(&self) -> QueueSettings {
        let settings = QueueSettings::default();
        match self.queue.task_timeout_ms {
            Some(ms) => settings.with_task_timeout(Duration::from_millis(ms)),
            None => settings,
        }
    }

    /// Configured handshake settle delay, if any.
    pub fn settle_delay(&self) -> Option<Duration> {
        self.handshake
            .settle_delay_ms
            .map(Duration::from_millis)
    }

    /// Save USB device for future auto-detection.
    pub fn remember_usb_device(&mut self, vid: u16, pid: u16) -> anyhow::Result<()> {
        let device = UsbDevice { vid, pid };

        // Don't add duplicates
        if self.serial.usb_device.contains(&device) {
            return Ok(());
        }

        // Try to save to local file first, fall back to global
        let path = if Path::new(LOCAL_PORTS_FILE).exists() || Path::new(LOCAL_CONFIG_FILE).exists()
        {
            PathBuf::from(LOCAL_PORTS_FILE)
        } else if let Some(global_dir) = Self::global_config_dir() {
            fs::create_dir_all(&global_dir)?;
            global_dir.join("ports.toml")
        } else {
            PathBuf::from(LOCAL_PORTS_FILE)
        };

        self.serial.usb_device.push(device);

        let ports = SerialSection {
            usb_device: self.serial.usb_device.clone(),
            ..SerialSection::default()
        };
        let content = toml::to_string_pretty(&ports)?;
        fs::write(&path, content)?;
        info!("Saved USB device to {}", path.display());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write as _, tempfile::NamedTempFile};

    fn write_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // ---- Default values ----

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert!(config.serial.port.is_none());
        assert!(config.serial.baud.is_none());
        assert!(config.serial.usb_device.is_empty());
        assert!(config.settle_delay().is_none());
        assert_eq!(config.io_settings(), IoSettings::default());
        assert_eq!(config.queue_settings(), QueueSettings::default());
    }

    // ---- UsbDevice ----

    #[test]
    fn test_usb_device_matches() {
        let device = UsbDevice {
            vid: 0x2354,
            pid: 0x1111,
        };
        assert!(device.matches(0x2354, 0x1111));
        assert!(!device.matches(0x2354, 0x2222));
        assert!(!device.matches(0x10C4, 0x1111));
    }

    // ---- Parsing ----

    #[test]
    fn test_load_from_path_full() {
        let file = write_config(
            r#"
[serial]
port = "/dev/ttyACM0"
baud = 57600

[[serial.usb_device]]
vid = 9044
pid = 4369

[io]
read_timeout_ms = 250
slurp_timeout_ms = 800
max_retries = 3

[queue]
task_timeout_ms = 2000

[handshake]
settle_delay_ms = 900
"#,
        );

        let config = Config::load_from_path(file.path()).unwrap();
        assert_eq!(config.serial.port.as_deref(), Some("/dev/ttyACM0"));
        assert_eq!(config.serial.baud, Some(57600));
        assert_eq!(
            config.serial.usb_device,
            vec![UsbDevice {
                vid: 0x2354,
                pid: 0x1111
            }]
        );

        let io = config.io_settings();
        assert_eq!(io.read_timeout, Duration::from_millis(250));
        assert_eq!(io.slurp_timeout, Duration::from_millis(800));
        assert_eq!(io.max_retries, 3);
        assert_eq!(
            config.queue_settings().task_timeout,
            Duration::from_secs(2)
        );
        assert_eq!(config.settle_delay(), Some(Duration::from_millis(900)));
    }

    #[test]
    fn test_load_from_path_partial_keeps_defaults() {
        let file = write_config("[io]\nread_timeout_ms = 100\n");
        let config = Config::load_from_path(file.path()).unwrap();

        let io = config.io_settings();
        assert_eq!(io.read_timeout, Duration::from_millis(100));
        assert_eq!(io.slurp_timeout, IoSettings::default().slurp_timeout);
        assert!(config.serial.port.is_none());
    }

    #[test]
    fn test_load_from_path_invalid_toml() {
        let file = write_config("[serial\nport = ");
        let err = Config::load_from_path(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().contains("TOML"));
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from_path(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn test_load_lenient_skips_invalid() {
        let file = write_config("not = [valid");
        assert!(Config::load_lenient(file.path()).is_none());
    }

    // ---- Config merge ----

    #[test]
    fn test_config_merge_overrides_set_values() {
        let mut base = Config::default();
        base.serial.port = Some("/dev/ttyUSB0".to_string());
        base.serial.baud = Some(9600);
        base.io.max_retries = Some(2);

        let mut other = Config::default();
        other.serial.port = Some("COM3".to_string());
        other.queue.task_timeout_ms = Some(100);

        base.merge(other);
        assert_eq!(base.serial.port.as_deref(), Some("COM3"));
        assert_eq!(base.serial.baud, Some(9600));
        assert_eq!(base.io.max_retries, Some(2));
        assert_eq!(base.queue.task_timeout_ms, Some(100));
    }

    #[test]
    fn test_config_merge_extends_usb_devices() {
        let mut base = Config::default();
        base.serial.usb_device.push(UsbDevice { vid: 1, pid: 2 });
        let mut other = Config::default();
        other.serial.usb_device.push(UsbDevice { vid: 3, pid: 4 });

        base.merge(other);
        assert_eq!(base.serial.usb_device.len(), 2);
    }

    #[test]
    fn test_global_config_path_file_name() {
        if let Some(path) = Config::global_config_path() {
            assert!(path.ends_with("config.toml"));
        }
    }
}
