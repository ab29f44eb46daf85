//! Configuration loading
//!
//! Resolution priority: command-line argument, then MEDPIPE_CONFIG
//! environment variable, then ./medpipe.toml, then compiled defaults.
//! Every section has defaults so a bare binary runs without a file.

use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub pipeline: PipelineConfig,
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5810,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("medpipe.db"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Bounds on the simulated per-step work duration
    pub step_delay_min_ms: u64,
    pub step_delay_max_ms: u64,
    /// Execution lease time-to-live; renewed at every step boundary
    pub lease_ttl_secs: i64,
    /// Formats synthesized automatically when a job completes
    pub default_export_formats: Vec<String>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            step_delay_min_ms: 2000,
            step_delay_max_ms: 5000,
            lease_ttl_secs: 60,
            default_export_formats: vec![
                "coco".to_string(),
                "yolo".to_string(),
                "jsonl".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    /// Client poll cadence
    pub interval_ms: u64,
    /// Stop polling on the first terminal status observed
    pub stop_on_terminal: bool,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2000,
            stop_on_terminal: true,
        }
    }
}

impl AppConfig {
    /// Load configuration, preferring an explicit path over the environment
    /// variable over the working-directory default.
    pub fn load(cli_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = cli_path {
            return Self::from_file(path);
        }

        if let Ok(env_path) = std::env::var("MEDPIPE_CONFIG") {
            return Self::from_file(Path::new(&env_path));
        }

        let default_path = Path::new("medpipe.toml");
        if default_path.exists() {
            return Self::from_file(default_path);
        }

        Ok(Self::default())
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Default export formats parsed and deduplicated; unknown names are
    /// rejected at startup rather than at job completion.
    pub fn default_export_formats(&self) -> Result<Vec<crate::models::ExportFormat>> {
        let mut formats = Vec::new();
        for name in &self.pipeline.default_export_formats {
            let format = crate::models::ExportFormat::parse(name)?;
            if !formats.contains(&format) {
                formats.push(format);
            }
        }
        Ok(formats)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ExportFormat;

    #[test]
    fn defaults_are_complete() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 5810);
        assert_eq!(config.pipeline.step_delay_min_ms, 2000);
        assert_eq!(config.pipeline.step_delay_max_ms, 5000);
        assert_eq!(config.polling.interval_ms, 2000);
        assert!(config.polling.stop_on_terminal);
        assert_eq!(
            config.default_export_formats().unwrap(),
            vec![ExportFormat::Coco, ExportFormat::Yolo, ExportFormat::Jsonl]
        );
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let config: AppConfig = toml::from_str(
            r#"
            [server]
            port = 9000

            [pipeline]
            step_delay_min_ms = 0
            step_delay_max_ms = 0
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.pipeline.step_delay_max_ms, 0);
        assert_eq!(config.pipeline.lease_ttl_secs, 60);
    }

    #[test]
    fn unknown_export_format_is_rejected() {
        let mut config = AppConfig::default();
        config.pipeline.default_export_formats = vec!["parquet".to_string()];
        assert!(config.default_export_formats().is_err());
    }
}
