use config::{ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub source: SourceConfig,
    #[serde(default)]
    pub fetch: FetchConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub output: OutputConfig,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

/// Closed set of supported services, discriminated by the `service` key.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "service", rename_all = "lowercase")]
pub enum SourceConfig {
    Dir(DirectorySourceConfig),
    Dropbox(DropboxSourceConfig),
}

impl SourceConfig {
    pub fn service_type(&self) -> &'static str {
        match self {
            SourceConfig::Dir(_) => "dir",
            SourceConfig::Dropbox(_) => "dropbox",
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DirectorySourceConfig {
    pub directory: String,
    #[serde(default = "default_glob_pattern")]
    pub pattern: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DropboxSourceConfig {
    #[serde(default = "default_dropbox_path")]
    pub path: String,
    pub app_key: String,
    pub app_secret: String,
    pub refresh_token: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct FetchConfig {
    pub enable_content_extraction: bool,
    pub concurrent_downloads: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OutputConfig {
    /// NDJSON destination; stdout when unset.
    pub path: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_level: String,
    pub log_format: LogFormat,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    Pretty,
}

fn default_glob_pattern() -> String {
    "**/*.*".to_string()
}

fn default_dropbox_path() -> String {
    "/".to_string()
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let mut builder = config::Config::builder();

        // Layer on config file if it exists
        if Path::new("config.toml").exists() {
            builder = builder.add_source(File::with_name("config"));
        }

        // Layer on environment variables (CONNECTORS_ prefix)
        builder = builder.add_source(
            Environment::with_prefix("CONNECTORS")
                .separator("__")
                .try_parsing(true),
        );

        let settings: Config = builder.build()?.try_deserialize()?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match &self.source {
            SourceConfig::Dir(dir) => {
                if dir.directory.trim().is_empty() {
                    return Err(ConfigError::Message("source.directory is required".into()));
                }
                if dir.pattern.trim().is_empty() {
                    return Err(ConfigError::Message(
                        "source.pattern must not be empty".into(),
                    ));
                }
            }
            SourceConfig::Dropbox(dropbox) => {
                for (field, value) in [
                    ("app_key", &dropbox.app_key),
                    ("app_secret", &dropbox.app_secret),
                    ("refresh_token", &dropbox.refresh_token),
                ] {
                    if value.trim().is_empty() {
                        return Err(ConfigError::Message(format!(
                            "source.{field} is required"
                        )));
                    }
                }
                if !dropbox.path.starts_with('/') {
                    return Err(ConfigError::Message(
                        "source.path must be an absolute Dropbox path".into(),
                    ));
                }
            }
        }

        if self.fetch.concurrent_downloads == 0 {
            return Err(ConfigError::Message(
                "fetch.concurrent_downloads must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            enable_content_extraction: true,
            concurrent_downloads: 8,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_base_delay_ms: 1000,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self { path: None }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}
