use std::env;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::Deserialize;
use tracing::info;
use url::Url;

pub const DEFAULT_ECHARTS_URL: &str = "https://cdn.jsdelivr.net/npm/echarts@5.5.1/dist/echarts.min.js";

#[derive(Clone, Deserialize, Debug)]
pub struct Config {
    #[serde(default = "default_env")]
    pub env: String, // file / server
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub prefix: Option<String>,

    /// Namespace rendered files are stored under, e.g. `echarts.0`
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// JSON snapshot of objects, states and history
    #[serde(default = "default_data_file")]
    pub data_file: String,
    #[serde(default = "default_files_dir")]
    pub files_dir: String,
    /// When set, `fileOnDisk` targets must be absolute paths below it
    pub file_on_disk_root: Option<String>,

    #[serde(default = "default_echarts_url")]
    pub echarts_url: String,
    pub chrome_path: Option<String>,
    #[serde(default = "default_render_timeout_ms")]
    pub render_timeout_ms: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_max_concurrent_renders")]
    pub max_concurrent_renders: usize,

    #[serde(default = "default_dedup_window_ms")]
    pub dedup_window_ms: u64,
    /// Let `send` messages request png/jpg/pdf as well as svg
    #[serde(default)]
    pub allow_binary_messages: bool,

    #[serde(default = "default_log_dir")]
    pub log_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_env() -> String {
    "file".to_string()
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_namespace() -> String {
    "echarts.0".to_string()
}

fn default_data_file() -> String {
    "./data/objects.json".to_string()
}

fn default_files_dir() -> String {
    "./files".to_string()
}

fn default_echarts_url() -> String {
    DEFAULT_ECHARTS_URL.to_string()
}

fn default_render_timeout_ms() -> u64 {
    10_000
}

fn default_poll_interval_ms() -> u64 {
    100
}

fn default_max_concurrent_renders() -> usize {
    1
}

fn default_dedup_window_ms() -> u64 {
    300
}

fn default_log_dir() -> String {
    "./logs".to_string()
}

fn default_log_level() -> String {
    "debug".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            env: default_env(),
            host: default_host(),
            port: default_port(),
            prefix: None,
            namespace: default_namespace(),
            data_file: default_data_file(),
            files_dir: default_files_dir(),
            file_on_disk_root: None,
            echarts_url: default_echarts_url(),
            chrome_path: None,
            render_timeout_ms: default_render_timeout_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            max_concurrent_renders: default_max_concurrent_renders(),
            dedup_window_ms: default_dedup_window_ms(),
            allow_binary_messages: false,
            log_dir: default_log_dir(),
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        Url::parse(&self.echarts_url)
            .with_context(|| format!("invalid ECHARTS_URL: {}", self.echarts_url))?;
        if let Some(root) = &self.file_on_disk_root {
            if !Path::new(root).is_absolute() {
                return Err(anyhow!("FILE_ON_DISK_ROOT must be an absolute path: {root}"));
            }
        }
        if self.max_concurrent_renders == 0 {
            return Err(anyhow!("MAX_CONCURRENT_RENDERS must be at least 1"));
        }
        if self.poll_interval_ms == 0 || self.render_timeout_ms < self.poll_interval_ms {
            return Err(anyhow!(
                "RENDER_TIMEOUT_MS ({}) must be >= POLL_INTERVAL_MS ({}) and both non-zero",
                self.render_timeout_ms,
                self.poll_interval_ms
            ));
        }
        Ok(())
    }
}

pub fn get_config() -> Result<Config> {
    let env_var = env::var("env").unwrap_or("file".to_string());
    if env_var == "file" {
        info!("using .env file as environtment variable");
        let _ = dotenvy::dotenv();
    } else {
        info!("using server environtment as environtment variable");
    }
    let config = envy::from_env::<Config>().context("cannot read configuration from environment")?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.dedup_window_ms, 300);
        assert_eq!(config.namespace, "echarts.0");
    }

    #[test]
    fn rejects_bad_script_url() {
        let config = Config {
            echarts_url: "not a url".to_string(),
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_zero_render_slots() {
        let config = Config {
            max_concurrent_renders: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn file_on_disk_root_must_be_absolute() {
        let config = Config {
            file_on_disk_root: Some("charts".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            file_on_disk_root: Some("/var/lib/charts".to_string()),
            ..Config::default()
        };
        assert!(config.validate().is_ok());
    }
}
