//! Configuration file support

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

/// Model used when neither the command line nor the config file names one
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

/// Configuration for docent
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Default model to use
    pub model: Option<String>,
    /// Path of the SQLite database holding museums, tickets and checkpoints
    pub database: Option<String>,
    /// Seed the demonstration museums on start
    pub seed: Option<bool>,
    /// Cap on tool round-trips per lookup or booking step
    pub max_tool_rounds: Option<u32>,
    /// Ask the model for a second opinion on statements the guard accepts
    pub llm_safety: Option<bool>,
    /// API keys (alternative to environment variables)
    #[serde(default)]
    pub api_keys: ApiKeys,
}

/// API key configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiKeys {
    pub google: Option<String>,
}

impl Config {
    /// Get the config directory
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docent")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("DOCENT_CONFIG_PATH") {
            return PathBuf::from(path);
        }
        Self::config_dir().join("config.toml")
    }

    /// Where the database lives unless configured otherwise
    pub fn default_database_path() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("docent")
            .join("docent.db")
    }

    /// Load config from file
    pub fn load() -> Self {
        let path = Self::config_path();
        if !path.exists() {
            return Self::default();
        }

        match fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content).unwrap_or_else(|e| {
                eprintln!("Warning: Failed to parse config file: {}", e);
                Self::default()
            }),
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

        let default_config = Config {
            model: Some(DEFAULT_MODEL.to_string()),
            database: None,
            seed: Some(true),
            max_tool_rounds: None,
            llm_safety: Some(true),
            api_keys: ApiKeys::default(),
        };

        default_config.save()?;
        Ok(path)
    }
}

/// Generate example config content
pub fn example_config() -> &'static str {
    r#"# docent configuration file
# Place at ~/.config/docent/config.toml (Linux), ~/Library/Application Support/docent/config.toml (Mac)
# or %APPDATA%\docent\config.toml (Windows). DOCENT_CONFIG_PATH overrides the location.

# Gemini model to use
model = "gemini-2.5-flash"

# SQLite database for museums, bookings and suspended conversations
# database = "/path/to/docent.db"

# Insert the demonstration museums on start (existing rows are kept)
seed = true

# Maximum tool round-trips per lookup or booking step
# max_tool_rounds = 8

# Ask the model to double-check SQL that passes the built-in guard
llm_safety = true

# API keys (optional - GOOGLE_API_KEY or GEMINI_API_KEY also work)
[api_keys]
# google = "..."
"#
}
