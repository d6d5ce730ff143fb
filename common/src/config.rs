use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use anyhow::{Context, Result};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub poll: PollConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub enrich: EnrichConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub access_key: String,
    /// Bare host (`https` implied) or a full `http(s)://` base URL.
    #[serde(default)]
    pub host: String,
    #[serde(default = "default_api_version")]
    pub api_version: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollConfig {
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
    #[serde(default)]
    pub window: WindowPolicy,
    #[serde(default)]
    pub cadence: CadenceMode,
    #[serde(default = "default_max_window_secs")]
    pub max_window_secs: u64,
}

/// How the next query window's start is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum WindowPolicy {
    /// `[now - interval, now)` every cycle; gaps or overlaps under load.
    Lookback,
    /// Start where the last successful window ended.
    #[default]
    Contiguous,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CadenceMode {
    /// Sleep a full interval after each cycle finishes.
    #[default]
    FixedDelay,
    /// Tick on a fixed grid regardless of cycle duration.
    Aligned,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub format: OutputFormat,
    #[serde(default)]
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    #[default]
    Txt,
    Csv,
    Syslog,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichConfig {
    /// Added after the built-in rules.
    #[serde(default)]
    pub link_rewrites: Vec<LinkRewriteRule>,
}

/// Rewrites `from` to `to` inside entity links when the API host is `host`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRewriteRule {
    pub host: String,
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_api_version() -> String { "v1.0".to_string() }
fn default_timeout_secs() -> u64 { 10 }
fn default_max_pages() -> usize { 1000 }
fn default_interval_secs() -> u64 { 300 }
fn default_max_window_secs() -> u64 { 24 * 60 * 60 }

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            access_key: String::new(),
            host: String::new(),
            api_version: default_api_version(),
            timeout_secs: default_timeout_secs(),
            max_pages: default_max_pages(),
        }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_interval_secs(),
            window: WindowPolicy::default(),
            cadence: CadenceMode::default(),
            max_window_secs: default_max_window_secs(),
        }
    }
}

impl fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ApiConfig")
            .field("client_id", &self.client_id)
            .field("access_key", &"<redacted>")
            .field("host", &self.host)
            .field("api_version", &self.api_version)
            .field("timeout_secs", &self.timeout_secs)
            .field("max_pages", &self.max_pages)
            .finish()
    }
}

impl ApiConfig {
    pub fn base_url(&self) -> String {
        let host = self.host.trim().trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("https://{}", host)
        }
    }

    /// Host name without scheme, as matched by link rewrite rules.
    pub fn host_name(&self) -> &str {
        let host = self.host.trim().trim_end_matches('/');
        host.strip_prefix("https://")
            .or_else(|| host.strip_prefix("http://"))
            .unwrap_or(host)
    }
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "txt" | "text" => Ok(Self::Txt),
            "csv" => Ok(Self::Csv),
            "syslog" => Ok(Self::Syslog),
            other => Err(format!("unknown output format '{}' (expected txt, csv or syslog)", other)),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Txt => "txt",
            Self::Csv => "csv",
            Self::Syslog => "syslog",
        })
    }
}

fn resolve_path(flag: Option<&str>, env: Option<String>) -> (String, bool) {
    match (flag, env) {
        (Some(path), _) => (path.to_string(), true),
        (None, Some(path)) => (path, true),
        (None, None) => ("./config/default.toml".to_string(), false),
    }
}

impl Config {
    pub fn load(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config {}", path))?;
        let config: Config = toml::from_str(&content)
            .with_context(|| format!("failed to parse config {}", path))?;
        Ok(config)
    }

    /// Loads `path` if it exists. A missing file is only an error when the
    /// operator named it explicitly.
    pub fn load_or_default(path: &str, explicit: bool) -> Result<Self> {
        if !explicit && !Path::new(path).exists() {
            return Ok(Self::default());
        }
        Self::load(path)
    }

    /// Picks the config file for a binary: `--config`, then `$HEC_CONFIG`,
    /// then the default path. The flag says whether the operator named it.
    pub fn locate(flag: Option<&str>) -> (String, bool) {
        resolve_path(flag, std::env::var("HEC_CONFIG").ok())
    }

    pub fn validate(&self) -> Result<()> {
        if self.api.client_id.trim().is_empty() {
            anyhow::bail!("api.client_id is required");
        }
        if self.api.access_key.trim().is_empty() {
            anyhow::bail!("api.access_key is required");
        }
        if self.api.host.trim().is_empty() {
            anyhow::bail!("api.host is required");
        }
        if self.api.timeout_secs == 0 {
            anyhow::bail!("api.timeout_secs must be greater than zero");
        }
        if self.api.max_pages == 0 {
            anyhow::bail!("api.max_pages must be greater than zero");
        }
        if self.poll.interval_secs == 0 {
            anyhow::bail!("poll.interval_secs must be greater than zero");
        }
        if self.poll.max_window_secs < self.poll.interval_secs {
            anyhow::bail!("poll.max_window_secs must be at least poll.interval_secs");
        }
        if matches!(self.output.format, OutputFormat::Txt | OutputFormat::Csv) && self.output.path.is_none() {
            anyhow::bail!("output.path is required for {} output", self.output.format);
        }
        Ok(())
    }
}
