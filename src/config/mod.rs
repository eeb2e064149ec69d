//! Runtime configuration: region map and forecast settings.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Office name to region name.
#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RegionMap(BTreeMap<String, String>);

impl RegionMap {
    pub fn region_for(&self, bureau: &str) -> Option<&str> {
        self.0.get(bureau).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for RegionMap {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// How a cached model is looked up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheMode {
    /// Keyed by a digest of the training window; new data means a refit.
    #[default]
    Fingerprint,
    /// Single slot reused whatever the data, until invalidated.
    Pinned,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ForecastSettings {
    #[serde(default = "default_weeks")]
    pub training_weeks: usize,
    #[serde(default = "default_weeks")]
    pub horizon_weeks: usize,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default)]
    pub cache_mode: CacheMode,
}

fn default_weeks() -> usize {
    26
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("output/models")
}

impl Default for ForecastSettings {
    fn default() -> Self {
        Self {
            training_weeks: default_weeks(),
            horizon_weeks: default_weeks(),
            cache_dir: default_cache_dir(),
            cache_mode: CacheMode::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub regions: RegionMap,
    #[serde(default)]
    pub forecast: ForecastSettings,
}

impl Config {
    /// Load a configuration from a JSON file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config file: {}", path.display()))
    }

    /// Built-in configuration shipped with the binary.
    pub fn embedded() -> Result<Self> {
        Self::parse(include_str!("default.json")).context("Failed to parse embedded config")
    }

    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Self::embedded(),
        }
    }

    fn parse(json: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.regions.len() < 4 {
            anyhow::bail!(
                "region map needs at least 4 offices, got {}",
                self.regions.len()
            );
        }
        if self.forecast.training_weeks == 0 {
            anyhow::bail!("forecast.training_weeks must be positive");
        }
        if self.forecast.horizon_weeks == 0 {
            anyhow::bail!("forecast.horizon_weeks must be positive");
        }
        Ok(())
    }
}
