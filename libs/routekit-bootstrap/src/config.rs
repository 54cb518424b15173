use anyhow::{Context, Result};
use routekit::RouterConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Application configuration for a routekit server.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    pub server: ServerConfig,
    /// Logging sinks by target; `None` falls back to console-only output.
    pub logging: Option<LoggingConfig>,
    /// Router builder settings.
    #[serde(default)]
    pub router: RouterConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Seconds to wait for in-flight requests on shutdown; 0 waits forever.
    #[serde(default)]
    pub shutdown_timeout_sec: u64,
    /// Base directory for relative log file paths. Empty means the
    /// working directory.
    #[serde(default)]
    pub data_dir: String,
}

/// Target prefix → sink settings. `"default"` covers everything else.
pub type LoggingConfig = BTreeMap<String, LogSection>;

#[derive(Debug, Clone, Deserialize, Serialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct LogSection {
    /// `trace`..`error`, or `off`.
    pub console_level: String,
    /// Log file path; empty disables the file sink for this section.
    #[serde(default)]
    pub file: String,
    #[serde(default)]
    pub file_level: String,
    #[serde(default)]
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8087,
            shutdown_timeout_sec: 0,
            data_dir: String::new(),
        }
    }
}

impl ServerConfig {
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid bind address {}:{}", self.host, self.port))
    }

    /// Directory that relative log paths resolve against.
    pub fn data_path(&self) -> PathBuf {
        if self.data_dir.trim().is_empty() {
            PathBuf::from(".")
        } else {
            PathBuf::from(&self.data_dir)
        }
    }
}

pub fn default_logging_config() -> LoggingConfig {
    let mut logging = BTreeMap::new();
    logging.insert(
        "default".to_string(),
        LogSection {
            console_level: "info".to_string(),
            file: "logs/routekit.log".to_string(),
            file_level: "debug".to_string(),
            max_age_days: Some(7),
            max_backups: Some(3),
            max_size_mb: Some(100),
        },
    );
    logging
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            logging: Some(default_logging_config()),
            router: RouterConfig::default(),
        }
    }
}

impl AppConfig {
    /// Defaults, then the YAML file, then `APP__*` environment variables.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let path = config_path.as_ref();
        if !path.exists() {
            anyhow::bail!("config file not found: {}", path.display());
        }

        let base = AppConfig {
            logging: None,
            ..AppConfig::default()
        };

        // APP__SERVER__PORT=9000 sets server.port
        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(path))
            .merge(Env::prefixed("APP__").split("__"));

        figment
            .extract()
            .with_context(|| format!("failed to load config from {}", path.display()))
    }

    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => Ok(Self::default()),
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to serialize config to YAML")
    }

    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(port) = args.port {
            self.server.port = port;
        }

        let level = match args.verbose {
            0 => return,
            1 => "debug",
            _ => "trace",
        };
        let logging = self.logging.get_or_insert_with(default_logging_config);
        let section = logging
            .entry("default".to_string())
            .or_insert_with(|| LogSection {
                console_level: "info".to_string(),
                file: String::new(),
                file_level: String::new(),
                max_age_days: None,
                max_backups: None,
                max_size_mb: None,
            });
        section.console_level = level.to_string();
    }
}

/// Command line values that override the loaded configuration.
#[derive(Debug, Clone, Default)]
pub struct CliArgs {
    pub config: Option<String>,
    pub port: Option<u16>,
    pub print_config: bool,
    pub verbose: u8,
}
