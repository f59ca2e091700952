//! Layered configuration: defaults -> YAML file -> environment variables
//! (`EVENTIDE__SERVER__HOST=...` style), via `figment`.

use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Top-level application configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Where logs and other runtime state live.
    pub server: ServerConfig,
    /// Peer-level behavior: which transport to bind and default timeouts.
    pub peer: PeerConfig,
    /// Logging configuration (optional, falls back to a single default
    /// console+file section if absent).
    pub logging: Option<LoggingConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Base directory for relative log file paths; empty means "resolve
    /// a platform default and create it".
    pub home_dir: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PeerConfig {
    /// Which concrete `Transport` to bind. `"stdio"` is the only transport
    /// this crate ships; others are a future extension point.
    pub transport: String,
    /// Default timeout applied to outbound requests that don't specify
    /// their own (spec §4.F.7). `0` means "no default timeout".
    #[serde(default)]
    pub default_request_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            home_dir: String::new(),
        }
    }
}

impl Default for PeerConfig {
    fn default() -> Self {
        Self {
            transport: "stdio".to_string(),
            default_request_timeout_ms: 0,
        }
    }
}

/// Logging configuration: maps subsystem names to their settings. The key
/// `"default"` is the catch-all for everything not matched by an explicit
/// subsystem entry.
pub type LoggingConfig = HashMap<String, Section>;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Section {
    pub console_level: String,
    pub file: String,
    #[serde(default)]
    pub file_level: String,
    pub max_age_days: Option<u32>,
    #[serde(default)]
    pub max_backups: Option<usize>,
    #[serde(default)]
    pub max_size_mb: Option<u64>,
}

/// A default logging configuration: info on the console, debug to a
/// rotating file under `home_dir`.
pub fn default_logging_config() -> LoggingConfig {
    let mut logging = HashMap::new();
    logging.insert(
        "default".to_string(),
        Section {
            console_level: "info".to_string(),
            file: "logs/eventide-peer.log".to_string(),
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
            peer: PeerConfig::default(),
            logging: Some(default_logging_config()),
        }
    }
}

impl AppConfig {
    /// Load configuration with layered loading: defaults -> YAML file ->
    /// environment variables. Normalizes `server.home_dir` to an absolute,
    /// existing path.
    pub fn load_layered<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        use figment::{
            providers::{Env, Format, Serialized, Yaml},
            Figment,
        };

        let base = AppConfig {
            server: ServerConfig::default(),
            peer: PeerConfig::default(),
            logging: None,
        };

        let figment = Figment::new()
            .merge(Serialized::defaults(base))
            .merge(Yaml::file(config_path.as_ref()))
            .merge(Env::prefixed("EVENTIDE__").split("__"));

        let mut config: AppConfig = figment
            .extract()
            .with_context(|| "failed to extract config from figment".to_string())?;

        normalize_home_dir_inplace(&mut config.server).context("failed to resolve server.home_dir")?;
        Ok(config)
    }

    /// Load from a file if given, otherwise fall back to built-in defaults.
    /// Either way `server.home_dir` ends up normalized.
    pub fn load_or_default<P: AsRef<Path>>(config_path: Option<P>) -> Result<Self> {
        match config_path {
            Some(path) => Self::load_layered(path),
            None => {
                let mut c = Self::default();
                normalize_home_dir_inplace(&mut c.server)
                    .context("failed to resolve server.home_dir (defaults)")?;
                Ok(c)
            }
        }
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("failed to serialize config to YAML")
    }

    /// Apply overrides parsed from the demo binary's CLI flags.
    pub fn apply_cli_overrides(&mut self, args: &CliArgs) {
        if let Some(timeout_ms) = args.request_timeout_ms {
            self.peer.default_request_timeout_ms = timeout_ms;
        }

        let logging = self.logging.get_or_insert_with(default_logging_config);
        if let Some(default_section) = logging.get_mut("default") {
            default_section.console_level = match args.verbose {
                0 => default_section.console_level.clone(),
                1 => "debug".to_string(),
                _ => "trace".to_string(),
            };
        }
    }
}

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub config: Option<String>,
    pub request_timeout_ms: Option<u64>,
    pub print_config: bool,
    pub verbose: u8,
}

const DEFAULT_SUBDIR: &str = ".eventide";

/// Resolve `server.home_dir`, treating an empty string as "use the
/// platform default", and create the directory if it doesn't exist.
fn normalize_home_dir_inplace(server: &mut ServerConfig) -> Result<()> {
    let requested = if server.home_dir.trim().is_empty() {
        None
    } else {
        Some(server.home_dir.clone())
    };

    let resolved = resolve_home_dir(requested).context("home_dir normalization failed")?;
    std::fs::create_dir_all(&resolved)
        .with_context(|| format!("failed to create home_dir at {}", resolved.display()))?;
    server.home_dir = resolved.to_string_lossy().to_string();
    Ok(())
}

/// Expand a leading `~` against `$HOME`/`%USERPROFILE%`, or fall back to a
/// platform default directory (`$HOME/.eventide`, `%APPDATA%\.eventide`)
/// when no path was requested at all.
fn resolve_home_dir(requested: Option<String>) -> Result<PathBuf> {
    match requested {
        Some(path) if path.starts_with('~') => {
            let home = platform_home_dir().context("cannot expand '~': no home directory")?;
            let rest = path.trim_start_matches('~').trim_start_matches(['/', '\\']);
            Ok(home.join(rest))
        }
        Some(path) => Ok(PathBuf::from(path)),
        None => {
            let home = platform_home_dir().context("no platform home directory available")?;
            Ok(home.join(DEFAULT_SUBDIR))
        }
    }
}

fn platform_home_dir() -> Option<PathBuf> {
    if cfg!(target_os = "windows") {
        env::var_os("USERPROFILE")
            .or_else(|| env::var_os("APPDATA"))
            .map(PathBuf::from)
    } else {
        env::var_os("HOME").map(PathBuf::from)
    }
}
