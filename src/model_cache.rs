//! Persisted forecast models.
//!
//! A cache entry is a whole JSON artifact. Writes go to a temporary file that
//! is renamed over the target, so concurrent writers replace each other's
//! artifact instead of interleaving bytes. No locking is done here.

use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use blake3::Hasher;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CacheError;
use crate::models::WeeklyPoint;
use crate::smoothing::HoltWinters;

/// Key used when the cache is pinned to a single slot.
pub const PINNED_KEY: &str = "forecast_model";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ForecastModel {
    pub fingerprint: String,
    pub training_weeks: usize,
    /// Last week of the training series; projections start the week after.
    pub last_week: NaiveDate,
    pub fitted_at: DateTime<Utc>,
    pub smoothing: HoltWinters,
}

/// Read/write handle to stored models, owned by the caller.
pub trait ModelCache {
    fn load(&self, key: &str) -> Result<Option<ForecastModel>, CacheError>;

    fn store(&self, key: &str, model: &ForecastModel) -> Result<(), CacheError>;

    /// Remove one entry. Returns whether it existed.
    fn invalidate(&self, key: &str) -> Result<bool, CacheError>;

    /// Remove every entry. Returns how many were removed.
    fn clear(&self) -> Result<usize, CacheError>;
}

/// Digest of a training window and the parameters shaping the fit.
pub fn fingerprint(training: &[WeeklyPoint], training_weeks: usize, period: usize) -> String {
    let mut hasher = Hasher::new();
    hasher.update(b"HW:add:add");
    hasher.update(&(training_weeks as u64).to_le_bytes());
    hasher.update(&(period as u64).to_le_bytes());
    for point in training {
        hasher.update(point.week_end.to_string().as_bytes());
        hasher.update(&point.volume.to_bits().to_le_bytes());
    }
    hex::encode(hasher.finalize().as_bytes())
}

fn check_key(key: &str) -> Result<(), CacheError> {
    let valid = !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(CacheError::InvalidKey(key.to_string()))
    }
}

/// One `<key>.json` file per model in a directory.
#[derive(Debug, Clone)]
pub struct FileModelCache {
    dir: PathBuf,
}

impl FileModelCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path(&self, key: &str) -> Result<PathBuf, CacheError> {
        check_key(key)?;
        Ok(self.dir.join(format!("{key}.json")))
    }
}

impl ModelCache for FileModelCache {
    fn load(&self, key: &str) -> Result<Option<ForecastModel>, CacheError> {
        let path = self.path(key)?;
        let content = match std::fs::read_to_string(&path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let model = serde_json::from_str(&content)?;
        debug!(path = %path.display(), "loaded cached model");
        Ok(Some(model))
    }

    fn store(&self, key: &str, model: &ForecastModel) -> Result<(), CacheError> {
        let path = self.path(key)?;
        std::fs::create_dir_all(&self.dir)?;
        let json = serde_json::to_string_pretty(model)?;
        let tmp = self.dir.join(format!("{key}.json.tmp"));
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), "stored model");
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        let path = self.path(key)?;
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };

        let mut removed = 0;
        for entry in entries {
            let path = entry?.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                std::fs::remove_file(&path)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

/// In-process cache, shared behind a mutex.
#[derive(Debug, Default)]
pub struct MemoryModelCache {
    entries: Mutex<HashMap<String, ForecastModel>>,
}

impl MemoryModelCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, ForecastModel>> {
        // a panicked writer cannot leave a half-written model behind
        self.entries
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ModelCache for MemoryModelCache {
    fn load(&self, key: &str) -> Result<Option<ForecastModel>, CacheError> {
        Ok(self.lock().get(key).cloned())
    }

    fn store(&self, key: &str, model: &ForecastModel) -> Result<(), CacheError> {
        self.lock().insert(key.to_string(), model.clone());
        Ok(())
    }

    fn invalidate(&self, key: &str) -> Result<bool, CacheError> {
        Ok(self.lock().remove(key).is_some())
    }

    fn clear(&self) -> Result<usize, CacheError> {
        let mut entries = self.lock();
        let removed = entries.len();
        entries.clear();
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::smoothing::{SmoothingParams, SEASONAL_PERIOD};

    fn points(values: &[f64]) -> Vec<WeeklyPoint> {
        let start = NaiveDate::from_ymd_opt(2024, 1, 7).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, &volume)| WeeklyPoint {
                week_end: start + chrono::Duration::weeks(i as i64),
                volume,
            })
            .collect()
    }

    fn sample_model(fingerprint: &str) -> ForecastModel {
        ForecastModel {
            fingerprint: fingerprint.to_string(),
            training_weeks: 26,
            last_week: NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
            fitted_at: Utc::now(),
            smoothing: HoltWinters {
                params: SmoothingParams {
                    alpha: 0.5,
                    beta: 0.1,
                    gamma: 0.2,
                },
                period: SEASONAL_PERIOD,
                level: 10.0,
                trend: 0.0,
                seasonals: vec![0.0; SEASONAL_PERIOD],
                observations: 26,
                sse: 0.0,
            },
        }
    }

    #[test]
    fn fingerprint_tracks_values_and_window() {
        let base = fingerprint(&points(&[1.0, 2.0, 3.0]), 3, SEASONAL_PERIOD);
        assert_eq!(base, fingerprint(&points(&[1.0, 2.0, 3.0]), 3, SEASONAL_PERIOD));
        assert_ne!(base, fingerprint(&points(&[1.0, 2.0, 4.0]), 3, SEASONAL_PERIOD));
        assert_ne!(base, fingerprint(&points(&[1.0, 2.0, 3.0]), 4, SEASONAL_PERIOD));
        assert_eq!(base.len(), 64);
    }

    #[test]
    fn file_cache_round_trip_and_invalidate() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileModelCache::new(dir.path().join("models"));
        let model = sample_model("abc");

        assert_eq!(cache.load("abc").unwrap(), None);
        cache.store("abc", &model).unwrap();
        assert_eq!(cache.load("abc").unwrap(), Some(model));

        assert!(cache.invalidate("abc").unwrap());
        assert!(!cache.invalidate("abc").unwrap());
        assert_eq!(cache.load("abc").unwrap(), None);
    }

    #[test]
    fn file_cache_clear_counts_entries() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileModelCache::new(dir.path());
        cache.store("one", &sample_model("one")).unwrap();
        cache.store(PINNED_KEY, &sample_model("two")).unwrap();
        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.clear().unwrap(), 0);
    }

    #[test]
    fn file_cache_rejects_path_like_keys() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileModelCache::new(dir.path());
        assert!(matches!(
            cache.load("../escape"),
            Err(CacheError::InvalidKey(_))
        ));
    }

    #[test]
    fn clear_on_missing_directory_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = FileModelCache::new(dir.path().join("never-created"));
        assert_eq!(cache.clear().unwrap(), 0);
    }

    #[test]
    fn memory_cache_replaces_whole_entry() {
        let cache = MemoryModelCache::new();
        cache.store("k", &sample_model("first")).unwrap();
        cache.store("k", &sample_model("second")).unwrap();
        assert_eq!(cache.len(), 1);
        assert_eq!(cache.load("k").unwrap().unwrap().fingerprint, "second");
        assert_eq!(cache.clear().unwrap(), 1);
        assert!(cache.is_empty());
    }
}
