//! Additive Holt-Winters (triple exponential smoothing).
//!
//! The model keeps a level, a trend and one seasonal index per position in
//! the cycle. Smoothing weights are picked by minimising the one-step-ahead
//! squared error with a bounded Nelder-Mead search.
//!
//! The seasonal period may exceed the length of the series. Seasonal indices
//! past the observed history start at zero and are never updated, so the
//! projection over those positions follows level and trend only.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::ForecastError;

/// Annual cycle expressed in weeks.
pub const SEASONAL_PERIOD: usize = 52;

const MAX_ITERATIONS: usize = 5000;
const F_TOLERANCE: f64 = 1e-10;
const X_TOLERANCE: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SmoothingParams {
    pub alpha: f64,
    pub beta: f64,
    pub gamma: f64,
}

impl SmoothingParams {
    fn from_point(point: &[f64; 3]) -> Self {
        Self {
            alpha: point[0],
            beta: point[1],
            gamma: point[2],
        }
    }
}

/// Fitted model state at the end of the training series.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HoltWinters {
    pub params: SmoothingParams,
    pub period: usize,
    pub level: f64,
    pub trend: f64,
    /// Seasonal index for each position of the cycle, by `t % period`.
    pub seasonals: Vec<f64>,
    pub observations: usize,
    pub sse: f64,
}

#[derive(Debug, Clone)]
struct State {
    level: f64,
    trend: f64,
    seasonals: Vec<f64>,
}

impl HoltWinters {
    pub fn fit(series: &[f64], period: usize) -> Result<Self, ForecastError> {
        if series.is_empty() {
            return Err(ForecastError::ModelFit("empty training series".to_string()));
        }
        if period == 0 {
            return Err(ForecastError::ModelFit("seasonal period must be positive".to_string()));
        }
        if let Some(position) = series.iter().position(|v| !v.is_finite()) {
            return Err(ForecastError::ModelFit(format!(
                "non-finite value at position {position} of the training series"
            )));
        }

        let initial = initial_state(series, period);
        let objective = |point: &[f64; 3]| {
            smooth(series, period, SmoothingParams::from_point(point), &initial).1
        };

        let (best, iterations) = nelder_mead(objective, [0.3, 0.05, 0.1])
            .map_err(ForecastError::ModelFit)?;
        let params = SmoothingParams::from_point(&best);
        let (state, sse) = smooth(series, period, params, &initial);

        debug!(
            alpha = params.alpha,
            beta = params.beta,
            gamma = params.gamma,
            sse,
            iterations,
            "fitted Holt-Winters model"
        );

        let model = Self {
            params,
            period,
            level: state.level,
            trend: state.trend,
            seasonals: state.seasonals,
            observations: series.len(),
            sse,
        };
        model.check_state().map_err(ForecastError::ModelFit)?;
        Ok(model)
    }

    /// Project `horizon` steps past the end of the training series.
    ///
    /// Call [`HoltWinters::check_state`] first on a model that did not come
    /// from [`HoltWinters::fit`]; a missing seasonal index projects as 0.
    pub fn forecast(&self, horizon: usize) -> Vec<f64> {
        (1..=horizon)
            .map(|h| {
                let season = (self.observations + h - 1)
                    .checked_rem(self.period)
                    .and_then(|index| self.seasonals.get(index))
                    .copied()
                    .unwrap_or(0.0);
                self.level + h as f64 * self.trend + season
            })
            .collect()
    }

    /// Check that the state can be projected: one seasonal index per period
    /// position and only finite numbers.
    pub fn check_state(&self) -> Result<(), String> {
        if self.period == 0 {
            return Err("seasonal period is 0".to_string());
        }
        if self.seasonals.len() != self.period {
            return Err(format!(
                "{} seasonal indices for a period of {}",
                self.seasonals.len(),
                self.period
            ));
        }

        let params = [self.params.alpha, self.params.beta, self.params.gamma];
        let finite = params.iter().all(|v| v.is_finite())
            && self.level.is_finite()
            && self.trend.is_finite()
            && self.sse.is_finite()
            && self.seasonals.iter().all(|v| v.is_finite());
        if finite {
            Ok(())
        } else {
            Err("non-finite parameters or state".to_string())
        }
    }
}

fn initial_state(series: &[f64], period: usize) -> State {
    let n = series.len();
    let first_cycle = &series[..n.min(period)];
    let level = mean(first_cycle);

    let trend = if n >= 2 * period {
        (mean(&series[period..2 * period]) - mean(&series[..period])) / period as f64
    } else {
        least_squares_slope(series)
    };

    let mut seasonals = vec![0.0; period];
    for (index, value) in first_cycle.iter().enumerate() {
        seasonals[index] = value - level;
    }

    State {
        level,
        trend,
        seasonals,
    }
}

/// Run the smoothing recursions, returning the final state and the SSE of
/// the one-step-ahead predictions.
fn smooth(series: &[f64], period: usize, params: SmoothingParams, initial: &State) -> (State, f64) {
    let mut state = initial.clone();
    let mut sse = 0.0;

    for (t, &value) in series.iter().enumerate() {
        let index = t % period;
        let season = state.seasonals[index];
        let predicted = state.level + state.trend + season;
        sse += (value - predicted).powi(2);

        let previous_level = state.level;
        state.level =
            params.alpha * (value - season) + (1.0 - params.alpha) * (state.level + state.trend);
        state.trend =
            params.beta * (state.level - previous_level) + (1.0 - params.beta) * state.trend;
        state.seasonals[index] =
            params.gamma * (value - state.level) + (1.0 - params.gamma) * season;
    }

    (state, sse)
}

fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

fn least_squares_slope(values: &[f64]) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let x_mean = (n - 1) as f64 / 2.0;
    let y_mean = mean(values);
    let (mut num, mut den) = (0.0, 0.0);
    for (x, y) in values.iter().enumerate() {
        let dx = x as f64 - x_mean;
        num += dx * (y - y_mean);
        den += dx * dx;
    }
    num / den
}

fn clamp_unit(point: [f64; 3]) -> [f64; 3] {
    point.map(|v| v.clamp(0.0, 1.0))
}

/// Nelder-Mead over the unit cube, points projected back into bounds.
///
/// Returns the best point and the number of iterations used, or an error when
/// the simplex has not collapsed after `MAX_ITERATIONS`.
fn nelder_mead<F>(f: F, start: [f64; 3]) -> Result<([f64; 3], usize), String>
where
    F: Fn(&[f64; 3]) -> f64,
{
    let start = clamp_unit(start);
    let mut simplex: Vec<([f64; 3], f64)> = Vec::with_capacity(4);
    simplex.push((start, f(&start)));
    for axis in 0..3 {
        let mut vertex = start;
        vertex[axis] = if vertex[axis] + 0.1 <= 1.0 {
            vertex[axis] + 0.1
        } else {
            vertex[axis] - 0.1
        };
        simplex.push((vertex, f(&vertex)));
    }

    for iteration in 0..MAX_ITERATIONS {
        simplex.sort_by(|a, b| a.1.total_cmp(&b.1));
        let best = simplex[0].1;
        let worst = simplex[3].1;

        if !best.is_finite() {
            return Err("objective is not finite at the best point".to_string());
        }

        let spread = (worst - best).abs();
        let anchor = simplex[0].0;
        let mut size: f64 = 0.0;
        for (point, _) in &simplex[1..] {
            for axis in 0..3 {
                size = size.max((point[axis] - anchor[axis]).abs());
            }
        }
        if spread <= F_TOLERANCE * (1.0 + best.abs()) || size <= X_TOLERANCE {
            return Ok((simplex[0].0, iteration));
        }

        let mut centroid = [0.0; 3];
        for (point, _) in &simplex[..3] {
            for axis in 0..3 {
                centroid[axis] += point[axis] / 3.0;
            }
        }
        let towards = |from: [f64; 3], coefficient: f64| -> [f64; 3] {
            let mut point = [0.0; 3];
            for axis in 0..3 {
                point[axis] = centroid[axis] + coefficient * (from[axis] - centroid[axis]);
            }
            clamp_unit(point)
        };

        let worst_point = simplex[3].0;
        let reflected = towards(worst_point, -1.0);
        let f_reflected = f(&reflected);

        if f_reflected < simplex[0].1 {
            let expanded = towards(worst_point, -2.0);
            let f_expanded = f(&expanded);
            simplex[3] = if f_expanded < f_reflected {
                (expanded, f_expanded)
            } else {
                (reflected, f_reflected)
            };
        } else if f_reflected < simplex[2].1 {
            simplex[3] = (reflected, f_reflected);
        } else {
            let contracted = if f_reflected < worst {
                towards(worst_point, -0.5)
            } else {
                towards(worst_point, 0.5)
            };
            let f_contracted = f(&contracted);
            if f_contracted < worst.min(f_reflected) {
                simplex[3] = (contracted, f_contracted);
            } else {
                for vertex in simplex.iter_mut().skip(1) {
                    let mut point = [0.0; 3];
                    for axis in 0..3 {
                        point[axis] = anchor[axis] + 0.5 * (vertex.0[axis] - anchor[axis]);
                    }
                    *vertex = (point, f(&point));
                }
            }
        }
    }

    Err(format!(
        "smoothing parameters did not converge after {MAX_ITERATIONS} iterations"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flat_series_forecasts_flat() {
        let series = vec![10.0; 26];
        let model = HoltWinters::fit(&series, SEASONAL_PERIOD).unwrap();
        let forecast = model.forecast(4);
        assert_eq!(forecast.len(), 4);
        for value in forecast {
            assert!((value - 10.0).abs() < 1e-6, "got {value}");
        }
    }

    #[test]
    fn positions_past_history_follow_level_and_trend() {
        let series: Vec<f64> = (0..26).map(|t| 5.0 + 2.0 * t as f64).collect();
        let model = HoltWinters::fit(&series, SEASONAL_PERIOD).unwrap();
        let forecast = model.forecast(10);
        for (h, value) in forecast.iter().enumerate() {
            let expected = model.level + (h + 1) as f64 * model.trend;
            assert!((value - expected).abs() < 1e-9);
        }
    }

    #[test]
    fn repeating_cycle_is_learned_with_short_period() {
        let cycle = [10.0, 20.0, 30.0, 20.0];
        let series: Vec<f64> = cycle.iter().cycle().take(40).copied().collect();
        let model = HoltWinters::fit(&series, 4).unwrap();
        let forecast = model.forecast(4);
        for (projected, expected) in forecast.iter().zip(cycle.iter()) {
            assert!((projected - expected).abs() < 1.0, "{projected} vs {expected}");
        }
    }

    #[test]
    fn parameters_stay_in_unit_interval() {
        let series: Vec<f64> = (0..26).map(|t| ((t * 7) % 11) as f64).collect();
        let model = HoltWinters::fit(&series, SEASONAL_PERIOD).unwrap();
        for value in [model.params.alpha, model.params.beta, model.params.gamma] {
            assert!((0.0..=1.0).contains(&value));
        }
        assert_eq!(model.seasonals.len(), SEASONAL_PERIOD);
        assert_eq!(model.observations, 26);
    }

    #[test]
    fn rejects_non_finite_values() {
        let mut series = vec![1.0; 26];
        series[3] = f64::NAN;
        assert!(matches!(
            HoltWinters::fit(&series, SEASONAL_PERIOD),
            Err(ForecastError::ModelFit(_))
        ));
    }

    #[test]
    fn truncated_seasonals_fail_state_check_without_panicking() {
        let mut model = HoltWinters::fit(&[10.0; 26], SEASONAL_PERIOD).unwrap();
        assert!(model.check_state().is_ok());

        model.seasonals.truncate(4);
        assert!(model.check_state().is_err());
        assert_eq!(model.forecast(30).len(), 30);

        model.period = 0;
        assert!(model.check_state().is_err());
        assert_eq!(model.forecast(2).len(), 2);
    }

    #[test]
    fn slope_of_constant_is_zero() {
        assert_eq!(least_squares_slope(&[3.0, 3.0, 3.0]), 0.0);
        assert_eq!(least_squares_slope(&[1.0]), 0.0);
    }
}
