use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use dirs::home_dir;
use log::error;

use crate::map::{
  data_source::DataSourceKind,
  rendering_context::Viewport,
  theme::ThemeDescriptor,
  worker_pool::PoolSettings,
};

const DEFAULT_WORKER_COUNT: usize = 4;
const DEFAULT_TILE_SIZE: u32 = 256;
const DEFAULT_PAUSE_TIMEOUT_MS: u64 = 5000;

fn parse_env<T>(name: &str) -> Option<T>
where
  T: std::str::FromStr,
  T::Err: std::fmt::Display,
{
  let value = std::env::var(name).ok()?;
  value
    .parse()
    .inspect_err(|e| error!("Ignoring {name}={value}: {e}"))
    .ok()
}

/// Settings merged from the environment, the config file and defaults, in that order.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Config {
  #[serde(skip)]
  pub config_path: Option<PathBuf>,
  #[serde(default)]
  pub data_source: Option<DataSourceKind>,
  /// Offline tile directory to open on start.
  #[serde(default)]
  pub map_file: Option<PathBuf>,
  /// A json render theme. The built in default theme is used if unset.
  #[serde(default)]
  pub theme_file: Option<PathBuf>,
  #[serde(default)]
  pub output_dir: Option<PathBuf>,
  #[serde(default)]
  pub worker_count: Option<usize>,
  #[serde(default)]
  pub tile_size: Option<u32>,
  #[serde(default)]
  pub pause_timeout_ms: Option<u64>,
}

impl Config {
  #[must_use]
  pub fn new() -> Self {
    let from_env = Self::from_env();
    let from_file = Self::from_file();

    let mut merged = from_env;
    if let Some(from_file) = &from_file {
      merged = merged.merge(from_file);
    }
    merged = merged.merge(&Self::defaults());

    if merged.config_path.is_some() && from_file.is_none() {
      merged.init_cfg_file();
    }

    merged
  }

  fn default_config_path() -> Option<PathBuf> {
    home_dir().map(|p| p.join(".config").join("mapworkers"))
  }

  fn defaults() -> Self {
    Self {
      config_path: Self::default_config_path(),
      data_source: Some(DataSourceKind::MapFile),
      map_file: None,
      theme_file: None,
      output_dir: Some(PathBuf::from("tiles")),
      worker_count: Some(DEFAULT_WORKER_COUNT),
      tile_size: Some(DEFAULT_TILE_SIZE),
      pause_timeout_ms: Some(DEFAULT_PAUSE_TIMEOUT_MS),
    }
  }

  fn from_env() -> Self {
    let var = |name: &str| std::env::var(name).ok();

    Self {
      config_path: var("MAPWORKERS_CONFIG").map(PathBuf::from),
      data_source: var("MAPWORKERS_TEST_SOURCE").map(|_| DataSourceKind::Test),
      map_file: var("MAPWORKERS_MAP_FILE").map(PathBuf::from),
      theme_file: var("MAPWORKERS_THEME").map(PathBuf::from),
      output_dir: var("MAPWORKERS_OUTPUT_DIR").map(PathBuf::from),
      worker_count: parse_env("MAPWORKERS_THREADS"),
      tile_size: parse_env("MAPWORKERS_TILE_SIZE"),
      pause_timeout_ms: parse_env("MAPWORKERS_PAUSE_TIMEOUT_MS"),
    }
  }

  /// Fills everything unset in `self` from `other`.
  #[must_use]
  pub fn merge(mut self, other: &Self) -> Self {
    self.config_path = self.config_path.or(other.config_path.clone());
    self.data_source = self.data_source.or(other.data_source);
    self.map_file = self.map_file.or(other.map_file.clone());
    self.theme_file = self.theme_file.or(other.theme_file.clone());
    self.output_dir = self.output_dir.or(other.output_dir.clone());
    self.worker_count = self.worker_count.or(other.worker_count);
    self.tile_size = self.tile_size.or(other.tile_size);
    self.pause_timeout_ms = self.pause_timeout_ms.or(other.pause_timeout_ms);
    self
  }

  fn from_file() -> Option<Self> {
    let config_path = std::env::var("MAPWORKERS_CONFIG")
      .ok()
      .map(PathBuf::from)
      .or_else(Self::default_config_path)?;
    let config_file = config_path.join("config.json");
    if !config_file.exists() {
      return None;
    }

    Self::load_file(&config_file)
      .inspect_err(|e| error!("Failed to read config file: {e:#}"))
      .ok()
  }

  /// Reads a config file.
  ///
  /// # Errors
  /// The file cannot be read or is not valid json.
  pub fn load_file(path: &Path) -> Result<Self> {
    let content =
      std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&content).with_context(|| format!("parsing {}", path.display()))
  }

  fn init_cfg_file(&self) {
    let Some(path) = &self.config_path else {
      return;
    };
    if !path.exists() {
      let _ = std::fs::create_dir_all(path).inspect_err(|e| {
        error!("Failed to create config directory: {e}");
      });
    }

    let path = path.join("config.json");
    if !path.exists() {
      if let Ok(config) = serde_json::to_string_pretty(self) {
        let _ = std::fs::write(path, config).inspect_err(|e| {
          error!("Failed to write config file: {e}");
        });
      } else {
        error!("Failed to serialize config");
      }
    }
  }

  #[must_use]
  pub fn worker_count(&self) -> usize {
    self.worker_count.unwrap_or(DEFAULT_WORKER_COUNT).max(1)
  }

  #[must_use]
  pub fn tile_size(&self) -> u32 {
    self.tile_size.unwrap_or(DEFAULT_TILE_SIZE).max(1)
  }

  #[must_use]
  pub fn pause_timeout(&self) -> Duration {
    Duration::from_millis(self.pause_timeout_ms.unwrap_or(DEFAULT_PAUSE_TIMEOUT_MS))
  }

  #[must_use]
  pub fn theme(&self) -> ThemeDescriptor {
    self
      .theme_file
      .clone()
      .map_or_else(ThemeDescriptor::default, ThemeDescriptor::File)
  }

  /// The settings for a worker pool rendering a view of `viewport`.
  #[must_use]
  pub fn pool_settings(&self, viewport: Viewport) -> PoolSettings {
    PoolSettings {
      worker_count: self.worker_count(),
      tile_size: self.tile_size(),
      pause_timeout: self.pause_timeout(),
      viewport,
      data_source: self.data_source.unwrap_or_default(),
      map_target: self.map_file.clone(),
      theme: self.theme(),
    }
  }
}
