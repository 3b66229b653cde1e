// config.rs
// Purpose: Registry-wide logger defaults, layered from built-ins, an optional TOML file and the environment

use crate::log_sink::Severity;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable selecting the default minimum log severity.
pub const LOG_LEVEL_ENV: &str = "LOG_LEVEL";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistryConfig {
    #[serde(default = "default_log_dir")]
    pub log_dir: PathBuf,
    /// Raw level name; resolved leniently by [`RegistryConfig::default_level`].
    #[serde(default, deserialize_with = "scalar_as_text")]
    pub log_level: Option<String>,
    #[serde(default = "default_max_bytes")]
    pub max_bytes: u64,
    #[serde(default = "default_backup_count")]
    pub backup_count: usize,
    #[serde(default = "default_console")]
    pub console: bool,
    #[serde(default)]
    pub json: bool,
}

/// Any scalar a provider may produce for a level. Env values such as `10`
/// or `true` arrive typed, not as strings.
#[derive(Deserialize)]
#[serde(untagged)]
enum ScalarLevel {
    Text(String),
    Integer(i64),
    Float(f64),
    Flag(bool),
}

impl ScalarLevel {
    fn into_text(self) -> String {
        match self {
            ScalarLevel::Text(text) => text,
            ScalarLevel::Integer(n) => n.to_string(),
            ScalarLevel::Float(n) => n.to_string(),
            ScalarLevel::Flag(flag) => flag.to_string(),
        }
    }
}

fn scalar_as_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<ScalarLevel>::deserialize(deserializer)?.map(ScalarLevel::into_text))
}

fn default_log_dir() -> PathBuf {
    PathBuf::from("logs")
}

fn default_max_bytes() -> u64 {
    5 * 1024 * 1024
}

fn default_backup_count() -> usize {
    5
}

fn default_console() -> bool {
    true
}

impl Default for RegistryConfig {
    fn default() -> Self {
        RegistryConfig {
            log_dir: default_log_dir(),
            log_level: None,
            max_bytes: default_max_bytes(),
            backup_count: default_backup_count(),
            console: default_console(),
            json: false,
        }
    }
}

impl RegistryConfig {
    /// Build the provider stack: defaults, then `config_path` if given, then `LOG_LEVEL`.
    pub fn figment(config_path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(RegistryConfig::default()));
        if let Some(path) = config_path {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::raw().only(&[LOG_LEVEL_ENV]))
    }

    pub fn load(config_path: Option<&Path>) -> Result<Self, figment::Error> {
        Self::figment(config_path).extract()
    }

    /// Defaults plus the `LOG_LEVEL` environment variable.
    pub fn from_env() -> Result<Self, figment::Error> {
        Self::load(None)
    }

    /// The severity used when a logger is requested without an explicit level.
    pub fn default_level(&self) -> Severity {
        self.log_level
            .as_deref()
            .map(Severity::parse_lenient)
            .unwrap_or(Severity::Info)
    }

    pub fn with_log_dir(mut self, log_dir: impl Into<PathBuf>) -> Self {
        self.log_dir = log_dir.into();
        self
    }

    pub fn with_log_level(mut self, level: impl Into<String>) -> Self {
        self.log_level = Some(level.into());
        self
    }

    pub fn with_console(mut self, console: bool) -> Self {
        self.console = console;
        self
    }
}
