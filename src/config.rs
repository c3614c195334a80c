use anyhow::{anyhow, Context, Result};
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure for coursync
#[derive(Debug, Deserialize, Serialize, Clone, Default)]
pub struct Config {
    /// Remote platform addressing and browser identity
    #[serde(default)]
    pub platform: PlatformConfig,

    /// Session validity and request pacing
    #[serde(default)]
    pub session: SessionConfig,

    /// Synchronization behavior settings
    #[serde(default)]
    pub sync: SyncConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Remote platform configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PlatformConfig {
    /// Canonical address of the platform, used for endpoints and Origin/Referer
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Browser identification sent with every request
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

/// Session configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SessionConfig {
    /// How long a signed-in session stays valid
    #[serde(default = "default_ttl")]
    pub ttl: String, // "15m"

    /// Pause before every request
    #[serde(default = "default_pause")]
    pub pause: String, // "3s"
}

/// Synchronization configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SyncConfig {
    /// Directory under which one folder per course is created
    #[serde(default = "default_output_directory")]
    pub output_directory: String,

    /// Maximum parallel downloads
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,

    /// Download into a partial file and rename once complete
    #[serde(default)]
    pub atomic_writes: bool,

    /// Suffix for partial files when atomic_writes is on
    #[serde(default = "default_partial_suffix")]
    pub partial_suffix: String,

    /// What Ctrl+C does during a sync
    #[serde(default)]
    pub on_interrupt: InterruptPolicy,
}

/// Reaction to an interrupt signal while a batch is running
#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InterruptPolicy {
    /// Stop dispatching new downloads, let in-flight ones finish; a second interrupt aborts
    #[default]
    Graceful,
    /// Exit immediately with status 1, abandoning in-flight downloads
    Abort,
}

/// Logging configuration
#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String, // "info"
}

// Default value functions
fn default_base_url() -> String {
    "https://www.coursera.org".to_string()
}
fn default_user_agent() -> String {
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_8_4) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/28.0.1500.63 Safari/537.36".to_string()
}
fn default_ttl() -> String {
    "15m".to_string()
}
fn default_pause() -> String {
    "3s".to_string()
}
fn default_output_directory() -> String {
    ".".to_string()
}
fn default_max_parallel() -> usize {
    2
}
fn default_partial_suffix() -> String {
    ".part".to_string()
}
fn default_log_level() -> String {
    "info".to_string()
}

// Default implementations
impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            user_agent: default_user_agent(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ttl: default_ttl(),
            pause: default_pause(),
        }
    }
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory(),
            max_parallel: default_max_parallel(),
            atomic_writes: false,
            partial_suffix: default_partial_suffix(),
            on_interrupt: InterruptPolicy::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from the default location or create a default config
    pub fn load_or_default() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load(&config_path)
        } else {
            let config = Self::default();

            if let Some(parent) = config_path.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
            }

            config.save(&config_path)?;

            tracing::info!("Created default configuration at: {:?}", config_path);
            Ok(config)
        }
    }

    /// Load configuration from a specific file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.expand_paths()?;
        config.validate()?;

        Ok(config)
    }

    /// Save configuration to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self).context("Failed to serialize configuration")?;

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {:?}", path))?;

        Ok(())
    }

    /// Get the default configuration file path (XDG compliant)
    pub fn default_config_path() -> Result<PathBuf> {
        let config_dir = config_dir().context("Failed to get user config directory")?;

        Ok(config_dir.join("coursync").join("config.yml"))
    }

    /// Expand environment variables in configuration paths
    pub fn expand_paths(&mut self) -> Result<()> {
        self.sync.output_directory = shellexpand::full(&self.sync.output_directory)
            .context("Failed to expand output_directory path")?
            .into_owned();

        Ok(())
    }

    /// Reject values that would only fail later, mid-run
    pub fn validate(&self) -> Result<()> {
        self.session_ttl().context("Invalid session.ttl")?;
        self.request_pause().context("Invalid session.pause")?;
        if self.platform.base_url.trim().is_empty() {
            return Err(anyhow!("platform.base_url must not be empty"));
        }
        Ok(())
    }

    pub fn session_ttl(&self) -> Result<Duration> {
        parse_duration(&self.session.ttl)
    }

    pub fn request_pause(&self) -> Result<Duration> {
        parse_duration(&self.session.pause)
    }

    /// Concurrency cap, never below one
    pub fn max_parallel(&self) -> usize {
        self.sync.max_parallel.max(1)
    }
}

/// Parse duration strings like "500ms", "3s", "15m", "1h", "2d" or raw seconds
pub fn parse_duration(duration_str: &str) -> Result<Duration> {
    let duration_str = duration_str.trim().to_lowercase();

    let secs = if let Some(value) = duration_str.strip_suffix("ms") {
        return value
            .parse::<u64>()
            .map(Duration::from_millis)
            .context("Invalid milliseconds value");
    } else if let Some(value) = duration_str.strip_suffix('s') {
        value.parse::<u64>().context("Invalid seconds value")?
    } else if let Some(value) = duration_str.strip_suffix('m') {
        value.parse::<u64>().map(|v| v * 60).context("Invalid minutes value")?
    } else if let Some(value) = duration_str.strip_suffix('h') {
        value.parse::<u64>().map(|v| v * 3600).context("Invalid hours value")?
    } else if let Some(value) = duration_str.strip_suffix('d') {
        value.parse::<u64>().map(|v| v * 86400).context("Invalid days value")?
    } else {
        duration_str
            .parse::<u64>()
            .context("Invalid duration format. Use format like '3s', '15m', '1h'")?
    };

    Ok(Duration::from_secs(secs))
}
