use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use flowline_engine::EngineConfig;
use serde::Deserialize;

pub const SETTINGS_FILE: &str = "flowline.toml";

/// Settings read from `<data_dir>/flowline.toml`. Every key is optional.
///
/// ```toml
/// database_url = "sqlite:///var/lib/flowline/runs.db"
/// definitions_dir = "/srv/automations"
///
/// [engine]
/// max_parallel_nodes = 4
/// ```
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
  pub database_url: Option<String>,
  pub definitions_dir: Option<PathBuf>,
  pub engine: EngineConfig,
}

impl Settings {
  /// Load settings from the data directory, falling back to defaults when
  /// the file doesn't exist.
  pub fn load(data_dir: &Path) -> Result<Self> {
    let path = data_dir.join(SETTINGS_FILE);
    if !path.exists() {
      return Ok(Self::default());
    }

    let content = std::fs::read_to_string(&path)
      .with_context(|| format!("failed to read settings: {}", path.display()))?;
    toml::from_str(&content).with_context(|| format!("failed to parse settings: {}", path.display()))
  }

  pub fn database_url(&self, data_dir: &Path) -> String {
    self
      .database_url
      .clone()
      .unwrap_or_else(|| format!("sqlite://{}", data_dir.join("flowline.db").display()))
  }

  pub fn definitions_dir(&self, data_dir: &Path) -> PathBuf {
    self
      .definitions_dir
      .clone()
      .unwrap_or_else(|| data_dir.join("automations"))
  }
}
