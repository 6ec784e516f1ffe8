//! Configuration file support

use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use playdeck_wire::http::{DEFAULT_BUFFERED_PATH, DEFAULT_CLEAR_PATH, DEFAULT_STREAM_PATH};
use playdeck_wire::{Endpoints, RateCard, RateTable};
use serde::{Deserialize, Serialize};

/// Default playground server
pub const DEFAULT_BASE_URL: &str = "http://localhost:3000";

/// Configuration for playdeck
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Scheme and host of the playground server
    pub base_url: String,
    /// Path overrides for the three endpoints
    pub stream_path: Option<String>,
    pub buffered_path: Option<String>,
    pub clear_path: Option<String>,
    /// Model id sent with every request and used for pricing
    pub model: Option<String>,
    /// Seconds without a byte before a stream is abandoned; 0 disables
    pub idle_timeout_secs: u64,
    /// Seconds a whole buffered request may take; 0 disables
    pub buffered_timeout_secs: u64,
    /// Automatic continuation steps allowed per turn
    pub max_auto_steps: u32,
    /// Use the buffered endpoint by default
    pub buffered: bool,
    /// Extra or overriding rate cards, per million tokens
    pub rates: BTreeMap<String, RateCard>,
    /// Free-form table sent as `context`
    pub context: Option<toml::Table>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            stream_path: None,
            buffered_path: None,
            clear_path: None,
            model: None,
            idle_timeout_secs: 120,
            buffered_timeout_secs: 600,
            max_auto_steps: playdeck_session::continuation::DEFAULT_MAX_AUTO_STEPS,
            buffered: false,
            rates: BTreeMap::new(),
            context: None,
        }
    }
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("playdeck")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("PLAYDECK_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => match Self::parse(&content) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Warning: Failed to parse config file: {}", e);
                    Self::default()
                }
            },
            Err(e) => {
                eprintln!("Warning: Failed to read config file: {}", e);
                Self::default()
            }
        }
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Save config to file
    pub fn save(&self) -> std::io::Result<()> {
        let path = Self::config_path();
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)?;
        }

        let content = toml::to_string_pretty(self).map_err(std::io::Error::other)?;
        fs::write(path, content)
    }

    /// Create a default config file if it doesn't exist
    pub fn init() -> std::io::Result<PathBuf> {
        let path = Self::config_path();
        if path.exists() {
            return Ok(path);
        }

        Config::default().save()?;
        Ok(path)
    }

    /// Idle timeout as a duration, `None` when disabled
    pub fn idle_timeout(&self) -> Option<std::time::Duration> {
        (self.idle_timeout_secs > 0).then(|| std::time::Duration::from_secs(self.idle_timeout_secs))
    }

    /// Buffered request limit as a duration, `None` when disabled
    pub fn buffered_timeout(&self) -> Option<std::time::Duration> {
        (self.buffered_timeout_secs > 0)
            .then(|| std::time::Duration::from_secs(self.buffered_timeout_secs))
    }

    /// Endpoint URLs for the configured server
    pub fn endpoints(&self) -> playdeck_wire::Result<Endpoints> {
        Endpoints::with_paths(
            &self.base_url,
            self.stream_path.as_deref().unwrap_or(DEFAULT_STREAM_PATH),
            self.buffered_path.as_deref().unwrap_or(DEFAULT_BUFFERED_PATH),
            self.clear_path.as_deref().unwrap_or(DEFAULT_CLEAR_PATH),
        )
        .map(|e| {
            e.with_idle_timeout(self.idle_timeout())
                .with_buffered_timeout(self.buffered_timeout())
        })
    }

    /// Built-in rates with the configured cards layered on top
    pub fn rate_table(&self) -> RateTable {
        let mut table = RateTable::builtin();
        for (model, card) in &self.rates {
            table.insert(model.clone(), *card);
        }
        table
    }

    /// The `[context]` table as JSON
    pub fn context_json(&self) -> Option<serde_json::Value> {
        self.context
            .as_ref()
            .and_then(|table| serde_json::to_value(table).ok())
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# playdeck configuration file
# Place at ~/.config/playdeck/config.toml (Linux) or set PLAYDECK_CONFIG_PATH

# Playground server
base_url = "http://localhost:3000"

# Endpoint paths (optional)
# stream_path = "/api/tool-playground/stream"
# buffered_path = "/api/tool-playground/run"
# clear_path = "/api/tool-playground/clear"

# Model id sent with requests and used for cost estimates
# model = "gpt-4o-mini"

# Abandon a stream after this many seconds without data (0 disables)
idle_timeout_secs = 120

# Give up on a buffered run after this many seconds (0 disables)
buffered_timeout_secs = 600

# Automatic continuation steps allowed per turn
max_auto_steps = 8

# Use the non-streaming endpoint
buffered = false

# Extra rate cards in dollars per million tokens
# [rates.my-model]
# input = 1.0
# cached = 0.1
# output = 4.0

# Free-form object sent as `context` with every request
# [context]
# locale = "en-US"
"#
}
