use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::aggregator::CountRange;
use crate::error::{ReportError, Result};

/// Largest page the Gmail `messages.list` endpoint will return
pub const MAX_PAGE_SIZE: u32 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub export: ExportConfig,
    #[serde(default)]
    pub analysis: AnalysisConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

/// Settings for pulling message metadata out of Gmail
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExportConfig {
    /// Gmail search query (same syntax as the Gmail search box)
    #[serde(default = "default_query")]
    pub query: String,
    #[serde(default = "default_max_messages")]
    pub max_messages: usize,
    #[serde(default = "default_export_dir")]
    pub output_dir: PathBuf,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            query: default_query(),
            max_messages: default_max_messages(),
            output_dir: default_export_dir(),
        }
    }
}

/// Everything the report step needs, passed explicitly to it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// JSON export to analyze
    #[serde(default = "default_input_path")]
    pub input_path: PathBuf,
    /// Directory receiving the CSV reports
    #[serde(default = "default_report_dir")]
    pub output_dir: PathBuf,
    /// Optional tag inserted into report filenames
    #[serde(default)]
    pub label: String,
    #[serde(default = "default_min_count")]
    pub min_count: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_count: Option<usize>,
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            input_path: default_input_path(),
            output_dir: default_report_dir(),
            label: String::new(),
            min_count: default_min_count(),
            max_count: None,
        }
    }
}

impl AnalysisConfig {
    pub fn count_range(&self) -> CountRange {
        CountRange::new(self.min_count, self.max_count)
    }
}

/// Gmail API client tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent_requests: usize,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_max_concurrent(),
            page_size: default_page_size(),
        }
    }
}

fn default_query() -> String {
    "newer_than:7d".to_string()
}

fn default_max_messages() -> usize {
    500
}

fn default_export_dir() -> PathBuf {
    PathBuf::from("exports")
}

fn default_input_path() -> PathBuf {
    PathBuf::from("exports").join("gmail_headers.json")
}

fn default_report_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_min_count() -> usize {
    1
}

fn default_max_concurrent() -> usize {
    40
}

fn default_page_size() -> u32 {
    MAX_PAGE_SIZE
}

impl Config {
    pub async fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::warn!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ReportError::ConfigError(format!("Failed to read config file: {}", e)))?;

        let config: Self = toml::from_str(&content)
            .map_err(|e| ReportError::ConfigError(format!("Failed to parse config file: {}", e)))?;

        config.validate()?;

        tracing::info!("Loaded configuration from {:?}", path);
        Ok(config)
    }

    pub async fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                ReportError::ConfigError(format!("Failed to create config directory: {}", e))
            })?;
        }

        let content = toml::to_string_pretty(self)
            .map_err(|e| ReportError::ConfigError(format!("Failed to serialize config: {}", e)))?;

        tokio::fs::write(path, content)
            .await
            .map_err(|e| ReportError::ConfigError(format!("Failed to write config file: {}", e)))?;

        tracing::info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.export.max_messages == 0 {
            return Err(ReportError::ConfigError(
                "export.max_messages must be at least 1".to_string(),
            ));
        }
        if self.export.output_dir.as_os_str().is_empty() {
            return Err(ReportError::ConfigError(
                "export.output_dir cannot be empty".to_string(),
            ));
        }

        if self.analysis.input_path.as_os_str().is_empty() {
            return Err(ReportError::ConfigError(
                "analysis.input_path cannot be empty".to_string(),
            ));
        }
        if self.analysis.output_dir.as_os_str().is_empty() {
            return Err(ReportError::ConfigError(
                "analysis.output_dir cannot be empty".to_string(),
            ));
        }
        // An inverted range is legal and simply selects nothing
        if self.analysis.count_range().is_empty() {
            tracing::warn!(
                "analysis.max_count ({:?}) is below analysis.min_count ({}); reports will be empty",
                self.analysis.max_count,
                self.analysis.min_count
            );
        }

        // 1-50 keeps us under the Gmail quota of 250 units/sec
        if self.client.max_concurrent_requests == 0 {
            return Err(ReportError::ConfigError(
                "client.max_concurrent_requests must be at least 1".to_string(),
            ));
        }
        if self.client.max_concurrent_requests > 50 {
            return Err(ReportError::ConfigError(
                "client.max_concurrent_requests cannot exceed 50 (to stay under Gmail API rate limits of 250 units/sec)".to_string(),
            ));
        }

        if self.client.page_size == 0 || self.client.page_size > MAX_PAGE_SIZE {
            return Err(ReportError::ConfigError(format!(
                "client.page_size must be between 1 and {}",
                MAX_PAGE_SIZE
            )));
        }

        tracing::debug!("Configuration validation passed");
        Ok(())
    }

    /// Create an example configuration file
    pub async fn create_example(path: &Path) -> Result<()> {
        let config = Self::default();
        config.save(path).await
    }
}
