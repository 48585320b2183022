//! Configuration file parsing and management.
//!
//! This module handles loading configuration from TOML files and `HC_*`
//! environment variables, and merging configurations with proper precedence rules.

use crate::error::ProbeError;
use crate::types::{AnonMode, TorSettings};
use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Configuration loaded from TOML files.
///
/// ```toml
/// [defaults]
/// concurrency = 40
/// timeout = "15s"
/// retries = 5
/// proxy_list = "~/proxies.csv"
///
/// [tor]
/// control_password = "hunter2"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct FileConfig {
    /// Default values for CLI options
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defaults: Option<DefaultsConfig>,

    /// Where the local Tor daemon listens
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tor: Option<TorConfig>,
}

/// Default configuration values that map to CLI options.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DefaultsConfig {
    /// Default concurrency level
    #[serde(skip_serializing_if = "Option::is_none")]
    pub concurrency: Option<usize>,

    /// Default timeout ("10s", "2m", or bare seconds)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,

    /// Retries after a proxy failure
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Registry file or URL
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registry: Option<String>,

    /// Single proxy for every probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy: Option<String>,

    /// Proxy list file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_list: Option<String>,

    /// Anonymizing mode: off, shared or rotate-per-probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tor_mode: Option<String>,

    /// User agent sent with every probe
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_agent: Option<String>,
}

/// Tor endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct TorConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub socks_url: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_addr: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub control_password: Option<String>,
}

impl TorConfig {
    /// Overlay these values on top of `base`.
    pub fn apply(&self, base: TorSettings) -> TorSettings {
        TorSettings {
            socks_url: self.socks_url.clone().unwrap_or(base.socks_url),
            control_addr: self.control_addr.clone().unwrap_or(base.control_addr),
            control_password: self.control_password.clone().or(base.control_password),
        }
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to log which config files were picked up
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load configuration from a specific file.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The parsed configuration or an error if parsing fails.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<FileConfig, ProbeError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ProbeError::file_error(
                path.to_string_lossy(),
                "Configuration file not found",
            ));
        }

        let content = fs::read_to_string(path).map_err(|e| {
            ProbeError::file_error(
                path.to_string_lossy(),
                format!("Failed to read configuration file: {}", e),
            )
        })?;

        let config: FileConfig = toml::from_str(&content).map_err(|e| ProbeError::ConfigError {
            message: format!("Failed to parse TOML configuration: {}", e),
        })?;

        self.validate_config(&config)?;

        Ok(config)
    }

    /// Discover and load configuration files in precedence order.
    ///
    /// XDG config < `~/.handle-check.toml` < `./handle-check.toml`.
    /// Files that fail to load are skipped with a warning.
    ///
    /// # Returns
    ///
    /// Merged configuration from all discovered files.
    pub fn discover_and_load(&self) -> Result<FileConfig, ProbeError> {
        let mut merged_config = FileConfig::default();
        let mut loaded_files = Vec::new();

        let candidates = [
            self.get_xdg_config_path(),
            self.get_global_config_path(),
            self.get_local_config_path(),
        ];

        for path in candidates.into_iter().flatten() {
            match self.load_file(&path) {
                Ok(config) => {
                    merged_config = self.merge_configs(merged_config, config);
                    loaded_files.push(path);
                }
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "ignoring config file");
                }
            }
        }

        if self.verbose {
            for path in &loaded_files {
                tracing::info!(path = %path.display(), "loaded config file");
            }
        }

        Ok(merged_config)
    }

    /// Get the local configuration file path.
    fn get_local_config_path(&self) -> Option<PathBuf> {
        let candidates = ["./handle-check.toml", "./.handle-check.toml"];

        candidates
            .iter()
            .map(|candidate| Path::new(*candidate))
            .find(|path| path.exists())
            .map(Path::to_path_buf)
    }

    /// Get the global configuration file path.
    fn get_global_config_path(&self) -> Option<PathBuf> {
        let home = env::var_os("HOME")?;
        [".handle-check.toml", "handle-check.toml"]
            .iter()
            .map(|candidate| Path::new(&home).join(candidate))
            .find(|path| path.exists())
    }

    /// Get the XDG configuration file path.
    ///
    /// Follows the XDG Base Directory Specification.
    fn get_xdg_config_path(&self) -> Option<PathBuf> {
        let config_dir = env::var_os("XDG_CONFIG_HOME")
            .map(PathBuf::from)
            .or_else(|| env::var_os("HOME").map(|home| Path::new(&home).join(".config")))?;

        let path = config_dir.join("handle-check").join("config.toml");
        if path.exists() {
            Some(path)
        } else {
            None
        }
    }

    /// Merge two configurations with proper precedence.
    ///
    /// Values from `higher` take precedence over values from `lower`.
    fn merge_configs(&self, lower: FileConfig, higher: FileConfig) -> FileConfig {
        FileConfig {
            defaults: match (lower.defaults, higher.defaults) {
                (Some(lower_defaults), Some(higher_defaults)) => Some(DefaultsConfig {
                    concurrency: higher_defaults.concurrency.or(lower_defaults.concurrency),
                    timeout: higher_defaults.timeout.or(lower_defaults.timeout),
                    retries: higher_defaults.retries.or(lower_defaults.retries),
                    registry: higher_defaults.registry.or(lower_defaults.registry),
                    proxy: higher_defaults.proxy.or(lower_defaults.proxy),
                    proxy_list: higher_defaults.proxy_list.or(lower_defaults.proxy_list),
                    tor_mode: higher_defaults.tor_mode.or(lower_defaults.tor_mode),
                    user_agent: higher_defaults.user_agent.or(lower_defaults.user_agent),
                }),
                (lower_defaults, higher_defaults) => higher_defaults.or(lower_defaults),
            },
            tor: match (lower.tor, higher.tor) {
                (Some(lower_tor), Some(higher_tor)) => Some(TorConfig {
                    socks_url: higher_tor.socks_url.or(lower_tor.socks_url),
                    control_addr: higher_tor.control_addr.or(lower_tor.control_addr),
                    control_password: higher_tor.control_password.or(lower_tor.control_password),
                }),
                (lower_tor, higher_tor) => higher_tor.or(lower_tor),
            },
        }
    }

    /// Validate a configuration for common issues.
    fn validate_config(&self, config: &FileConfig) -> Result<(), ProbeError> {
        if let Some(defaults) = &config.defaults {
            if let Some(concurrency) = defaults.concurrency {
                if concurrency == 0 || concurrency > 500 {
                    return Err(ProbeError::config("Concurrency must be between 1 and 500"));
                }
            }

            if let Some(timeout_str) = &defaults.timeout {
                if parse_timeout_string(timeout_str).is_none() {
                    return Err(ProbeError::config(format!(
                        "Invalid timeout format '{}'. Use format like '5s', '30s', '2m'",
                        timeout_str
                    )));
                }
            }

            let mode = match &defaults.tor_mode {
                Some(mode) => mode.parse::<AnonMode>()?,
                None => AnonMode::Off,
            };

            if defaults.proxy.is_some() && defaults.proxy_list.is_some() {
                return Err(ProbeError::config(
                    "Cannot specify both 'proxy' and 'proxy_list' in defaults",
                ));
            }

            if mode != AnonMode::Off && (defaults.proxy.is_some() || defaults.proxy_list.is_some())
            {
                return Err(ProbeError::config(
                    "Cannot combine 'tor_mode' with 'proxy' or 'proxy_list' in defaults",
                ));
            }
        }

        Ok(())
    }
}

/// Environment variable configuration that mirrors CLI options.
///
/// This represents configuration values that can be set via HC_* environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvConfig {
    pub concurrency: Option<usize>,
    pub timeout: Option<String>,
    pub retries: Option<u32>,
    pub registry: Option<String>,
    pub proxy: Option<String>,
    pub proxy_list: Option<String>,
    pub tor_mode: Option<AnonMode>,
    pub config: Option<String>,
}

/// Load configuration from environment variables.
///
/// Parses all HC_* environment variables and returns a structured configuration.
/// Invalid values are logged as warnings and ignored.
///
/// # Arguments
///
/// * `verbose` - Whether to log environment variable usage
pub fn load_env_config(verbose: bool) -> EnvConfig {
    let mut env_config = EnvConfig::default();

    let announce = |name: &str, value: &str| {
        if verbose {
            tracing::info!(variable = name, value, "using environment override");
        }
    };

    // HC_CONCURRENCY - probes in flight
    if let Ok(val) = env::var("HC_CONCURRENCY") {
        match val.parse::<usize>() {
            Ok(concurrency) if (1..=500).contains(&concurrency) => {
                env_config.concurrency = Some(concurrency);
                announce("HC_CONCURRENCY", &val);
            }
            _ => tracing::warn!(value = %val, "invalid HC_CONCURRENCY, must be 1-500"),
        }
    }

    // HC_TIMEOUT - per-probe timeout
    if let Ok(val) = env::var("HC_TIMEOUT") {
        if parse_timeout_string(&val).is_some() {
            announce("HC_TIMEOUT", &val);
            env_config.timeout = Some(val);
        } else {
            tracing::warn!(value = %val, "invalid HC_TIMEOUT, use format like '5s', '30s', '2m'");
        }
    }

    // HC_RETRIES - retry budget
    if let Ok(val) = env::var("HC_RETRIES") {
        match val.parse::<u32>() {
            Ok(retries) => {
                env_config.retries = Some(retries);
                announce("HC_RETRIES", &val);
            }
            Err(_) => tracing::warn!(value = %val, "invalid HC_RETRIES, must be a number"),
        }
    }

    // HC_TOR_MODE - off / shared / rotate-per-probe
    if let Ok(val) = env::var("HC_TOR_MODE") {
        match val.parse::<AnonMode>() {
            Ok(mode) => {
                env_config.tor_mode = Some(mode);
                announce("HC_TOR_MODE", &val);
            }
            Err(e) => tracing::warn!(value = %val, error = %e, "invalid HC_TOR_MODE"),
        }
    }

    let non_empty = |name: &str| -> Option<String> {
        env::var(name).ok().filter(|v| !v.trim().is_empty()).map(|v| {
            announce(name, &v);
            v
        })
    };

    env_config.registry = non_empty("HC_REGISTRY");
    env_config.proxy = non_empty("HC_PROXY");
    env_config.proxy_list = non_empty("HC_PROXY_LIST");
    env_config.config = non_empty("HC_CONFIG");

    env_config
}

/// Parse a timeout string like "5s", "30s", "2m" into seconds.
///
/// # Arguments
///
/// * `timeout_str` - String representation of timeout
///
/// # Returns
///
/// Number of seconds, or None if parsing fails or the timeout is zero.
pub fn parse_timeout_string(timeout_str: &str) -> Option<u64> {
    let timeout_str = timeout_str.trim().to_lowercase();

    let seconds = if let Some(secs) = timeout_str.strip_suffix('s') {
        secs.parse::<u64>().ok()
    } else if let Some(mins) = timeout_str.strip_suffix('m') {
        mins.parse::<u64>().ok().map(|m| m * 60)
    } else {
        // Assume seconds if no unit
        timeout_str.parse::<u64>().ok()
    };

    seconds.filter(|s| *s > 0)
}
