use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate, Utc};
use tracing::{info, warn};

use crate::config::{CacheMode, ForecastSettings};
use crate::error::{CacheError, ForecastError};
use crate::model_cache::{fingerprint, ForecastModel, ModelCache, PINNED_KEY};
use crate::models::{week_ending, Appointment, ForecastResult, WeeklyPoint};
use crate::smoothing::{HoltWinters, SEASONAL_PERIOD};

#[derive(Debug, Clone, PartialEq)]
pub struct ForecastOptions {
    pub training_weeks: usize,
    pub horizon_weeks: usize,
    pub cache_mode: CacheMode,
    /// Ignore any cached model, fit again and overwrite the cache entry.
    pub refit: bool,
}

impl Default for ForecastOptions {
    fn default() -> Self {
        Self::from(&ForecastSettings::default())
    }
}

impl From<&ForecastSettings> for ForecastOptions {
    fn from(settings: &ForecastSettings) -> Self {
        Self {
            training_weeks: settings.training_weeks,
            horizon_weeks: settings.horizon_weeks,
            cache_mode: settings.cache_mode,
            refit: false,
        }
    }
}

/// Weekly volume (weeks ending Sunday) over every week between the first and
/// the last appointment, empty weeks filled with zero.
pub fn resample_weekly(records: &[Appointment]) -> Vec<WeeklyPoint> {
    let mut weekly: BTreeMap<NaiveDate, u64> = BTreeMap::new();
    for record in records {
        *weekly.entry(week_ending(record.date_rdv)).or_insert(0) += record.nb_rdv;
    }

    let (Some(&first), Some(&last)) = (weekly.keys().next(), weekly.keys().next_back()) else {
        return Vec::new();
    };

    let mut series = Vec::new();
    let mut week = first;
    while week <= last {
        series.push(WeeklyPoint {
            week_end: week,
            volume: weekly.get(&week).copied().unwrap_or(0) as f64,
        });
        week += Duration::weeks(1);
    }
    series
}

/// The trailing `weeks` points of the series.
pub fn training_window(
    series: &[WeeklyPoint],
    weeks: usize,
) -> Result<&[WeeklyPoint], ForecastError> {
    if weeks == 0 || series.len() < weeks {
        return Err(ForecastError::InsufficientData {
            available: series.len(),
            required: weeks,
        });
    }
    Ok(&series[series.len() - weeks..])
}

pub fn cache_key(options: &ForecastOptions, fingerprint: &str) -> String {
    match options.cache_mode {
        CacheMode::Fingerprint => fingerprint.to_string(),
        CacheMode::Pinned => PINNED_KEY.to_string(),
    }
}

/// Fit (or reuse) the weekly model and project `horizon_weeks` ahead.
pub fn forecast(
    records: &[Appointment],
    options: &ForecastOptions,
    cache: &dyn ModelCache,
) -> Result<ForecastResult, ForecastError> {
    let series = resample_weekly(records);
    let training = training_window(&series, options.training_weeks)?;
    let digest = fingerprint(training, options.training_weeks, SEASONAL_PERIOD);
    let key = cache_key(options, &digest);

    let cached = if options.refit {
        None
    } else {
        cache.load(&key)?
    };

    let (model, reused) = match cached {
        Some(model) => {
            model
                .smoothing
                .check_state()
                .map_err(|reason| CacheError::Corrupt {
                    key: key.clone(),
                    reason,
                })?;
            if model.fingerprint != digest {
                warn!(
                    key = %key,
                    fitted_on = %model.last_week,
                    "reusing a cached model fitted on a different training window"
                );
            }
            info!(key = %key, "reusing cached forecast model");
            (model, true)
        }
        None => {
            let values: Vec<f64> = training.iter().map(|p| p.volume).collect();
            let smoothing = HoltWinters::fit(&values, SEASONAL_PERIOD)?;
            let model = ForecastModel {
                fingerprint: digest,
                training_weeks: options.training_weeks,
                last_week: training[training.len() - 1].week_end,
                fitted_at: Utc::now(),
                smoothing,
            };
            cache.store(&key, &model)?;
            info!(key = %key, weeks = training.len(), "fitted and cached forecast model");
            (model, false)
        }
    };

    let forecast = model
        .smoothing
        .forecast(options.horizon_weeks)
        .into_iter()
        .enumerate()
        .map(|(step, volume)| WeeklyPoint {
            week_end: model.last_week + Duration::weeks(step as i64 + 1),
            volume,
        })
        .collect();

    Ok(ForecastResult {
        actual: training.to_vec(),
        forecast,
        model_key: key,
        reused,
        alpha: model.smoothing.params.alpha,
        beta: model.smoothing.params.beta,
        gamma: model.smoothing.params.gamma,
    })
}
