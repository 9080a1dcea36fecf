use crate::config::{FORECAST_CONFIDENCE, MAX_FORECAST_HORIZON, MOVING_AVERAGE_WINDOW};
use crate::error::ForecastError;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use std::fmt;
use std::str::FromStr;

/// One step of model output, before timestamps are attached.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Band {
    pub predicted: f64,
    pub lower: f64,
    pub upper: f64,
}

/// A forecasting model. The adapter only relies on this contract; how the
/// model decomposes the series is its own business.
pub trait Forecaster: Send + Sync {
    fn name(&self) -> &'static str;

    /// Smallest input length the model accepts.
    fn min_points(&self) -> usize;

    /// Returns exactly `horizon` bands for the steps following `values`.
    fn fit_predict(&self, values: &[f64], horizon: usize) -> Result<Vec<Band>, ForecastError>;
}

/// Least-squares trend line with a volatility band.
#[derive(Clone, Copy, Debug)]
pub struct LinearTrend {
    pub confidence: f64,
}

impl Default for LinearTrend {
    fn default() -> Self {
        Self {
            confidence: FORECAST_CONFIDENCE,
        }
    }
}

impl Forecaster for LinearTrend {
    fn name(&self) -> &'static str {
        "linear"
    }

    fn min_points(&self) -> usize {
        5
    }

    fn fit_predict(&self, values: &[f64], horizon: usize) -> Result<Vec<Band>, ForecastError> {
        if values.len() < self.min_points() {
            return Err(ForecastError::InsufficientData {
                needed: self.min_points(),
                got: values.len(),
            });
        }

        let fit = linear_fit(values);
        let volatility = pct_change_volatility(values);
        let z = z_score(self.confidence);
        let n = values.len();

        Ok((0..horizon)
            .map(|k| {
                let x = (n + k) as f64;
                let predicted = fit.slope * x + fit.intercept;
                let half_width = predicted.abs() * volatility * z;
                Band {
                    predicted,
                    lower: predicted - half_width,
                    upper: predicted + half_width,
                }
            })
            .collect())
    }
}

/// Flat forecast at the trailing mean, ±5%.
#[derive(Clone, Copy, Debug)]
pub struct MovingAverage {
    pub window: usize,
}

impl Default for MovingAverage {
    fn default() -> Self {
        Self {
            window: MOVING_AVERAGE_WINDOW,
        }
    }
}

impl Forecaster for MovingAverage {
    fn name(&self) -> &'static str {
        "moving_average"
    }

    fn min_points(&self) -> usize {
        self.window.max(1)
    }

    fn fit_predict(&self, values: &[f64], horizon: usize) -> Result<Vec<Band>, ForecastError> {
        if values.len() < self.min_points() {
            return Err(ForecastError::InsufficientData {
                needed: self.min_points(),
                got: values.len(),
            });
        }
        let tail = &values[values.len() - self.min_points()..];
        let ma = tail.iter().mean();
        Ok(vec![
            Band {
                predicted: ma,
                lower: ma * 0.95,
                upper: ma * 1.05,
            };
            horizon
        ])
    }
}

/// Parsed through [`FromStr`] on the way in, so JSON accepts the same aliases as form fields.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", try_from = "String")]
pub enum ModelKind {
    #[default]
    Linear,
    MovingAverage,
}

impl ModelKind {
    pub fn build(self) -> Box<dyn Forecaster> {
        match self {
            ModelKind::Linear => Box::new(LinearTrend::default()),
            ModelKind::MovingAverage => Box::new(MovingAverage::default()),
        }
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ModelKind::Linear => write!(f, "linear"),
            ModelKind::MovingAverage => write!(f, "moving_average"),
        }
    }
}

impl FromStr for ModelKind {
    type Err = ForecastError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" | "linear_trend" | "trend" => Ok(ModelKind::Linear),
            "moving_average" | "ma" | "sma" => Ok(ModelKind::MovingAverage),
            other => Err(ForecastError::UnknownModel(other.to_string())),
        }
    }
}

impl TryFrom<String> for ModelKind {
    type Error = ForecastError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ForecastPoint {
    pub timestamp: DateTime<Utc>,
    pub predicted_value: f64,
    pub lower_bound: f64,
    pub upper_bound: f64,
}

#[derive(Clone, Debug, Serialize)]
pub struct ForecastSeries {
    pub model: &'static str,
    pub step_seconds: i64,
    pub points: Vec<ForecastPoint>,
}

impl ForecastSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }
}

/// Shapes `history` for `model` and turns its output into a timestamped series.
///
/// Non-finite values are dropped, points are ordered by time and a repeated
/// timestamp keeps its last value. The output step is the median spacing of
/// the input, one day when it cannot be inferred.
pub fn forecast(
    model: &dyn Forecaster,
    history: &[(DateTime<Utc>, f64)],
    horizon: usize,
) -> Result<ForecastSeries, ForecastError> {
    if horizon == 0 || horizon > MAX_FORECAST_HORIZON {
        return Err(ForecastError::InvalidHorizon {
            got: horizon,
            max: MAX_FORECAST_HORIZON,
        });
    }

    let series = clean_series(history);
    if series.len() < model.min_points() {
        return Err(ForecastError::InsufficientData {
            needed: model.min_points(),
            got: series.len(),
        });
    }

    let values: Vec<f64> = series.iter().map(|(_, v)| *v).collect();
    let bands = model.fit_predict(&values, horizon)?;
    if bands.len() != horizon {
        return Err(ForecastError::ShapeMismatch {
            expected: horizon,
            got: bands.len(),
        });
    }

    let step = infer_step(&series);
    let last = series[series.len() - 1].0;
    let points = bands
        .into_iter()
        .enumerate()
        .map(|(k, b)| ForecastPoint {
            timestamp: last + step * (k as i32 + 1),
            predicted_value: b.predicted,
            lower_bound: b.lower,
            upper_bound: b.upper,
        })
        .collect();

    Ok(ForecastSeries {
        model: model.name(),
        step_seconds: step.num_seconds(),
        points,
    })
}

fn clean_series(history: &[(DateTime<Utc>, f64)]) -> Vec<(DateTime<Utc>, f64)> {
    let mut series: Vec<(DateTime<Utc>, f64)> = history
        .iter()
        .copied()
        .filter(|(_, v)| v.is_finite())
        .collect();
    series.sort_by_key(|(t, _)| *t);

    let mut out: Vec<(DateTime<Utc>, f64)> = Vec::with_capacity(series.len());
    for point in series {
        match out.last_mut() {
            Some(prev) if prev.0 == point.0 => *prev = point,
            _ => out.push(point),
        }
    }
    out
}

fn infer_step(series: &[(DateTime<Utc>, f64)]) -> Duration {
    let mut gaps: Vec<i64> = series
        .windows(2)
        .map(|w| (w[1].0 - w[0].0).num_seconds())
        .filter(|s| *s > 0)
        .collect();
    if gaps.is_empty() {
        return Duration::days(1);
    }
    gaps.sort_unstable();
    Duration::seconds(gaps[gaps.len() / 2])
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct LinearFit {
    slope: f64,
    intercept: f64,
    r_squared: f64,
}

fn linear_fit(values: &[f64]) -> LinearFit {
    let n = values.len() as f64;
    if values.len() < 2 {
        return LinearFit {
            slope: 0.0,
            intercept: values.first().copied().unwrap_or(0.0),
            r_squared: 0.0,
        };
    }
    let x_mean = (n - 1.0) / 2.0;
    let y_mean = values.iter().mean();

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = if sxx > 0.0 { sxy / sxx } else { 0.0 };
    let intercept = y_mean - slope * x_mean;

    let ss_tot: f64 = values.iter().map(|y| (y - y_mean).powi(2)).sum();
    let ss_res: f64 = values
        .iter()
        .enumerate()
        .map(|(i, y)| (y - (slope * i as f64 + intercept)).powi(2))
        .sum();
    let r_squared = if ss_tot > 0.0 { 1.0 - ss_res / ss_tot } else { 0.0 };

    LinearFit {
        slope,
        intercept,
        r_squared,
    }
}

/// Sample std of simple period returns; 0 when it cannot be computed.
fn pct_change_volatility(values: &[f64]) -> f64 {
    let returns: Vec<f64> = values
        .windows(2)
        .filter(|w| w[0] != 0.0)
        .map(|w| w[1] / w[0] - 1.0)
        .filter(|r| r.is_finite())
        .collect();
    if returns.len() < 2 {
        return 0.0;
    }
    let std = returns.iter().std_dev();
    if std.is_finite() { std } else { 0.0 }
}

/// Two-sided standard normal quantile, e.g. 0.95 -> 1.96.
pub fn z_score(confidence: f64) -> f64 {
    let confidence = confidence.clamp(0.5, 0.999);
    Normal::new(0.0, 1.0)
        .map(|n| n.inverse_cdf(0.5 + confidence / 2.0))
        .unwrap_or(1.96)
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct AccuracyMetrics {
    pub mae: f64,
    pub mse: f64,
    pub rmse: f64,
    pub mape: f64,
}

const HOLDOUT: usize = 5;

/// Holds out the last five points, fits `model` on the rest and scores it.
pub fn accuracy_metrics(model: &dyn Forecaster, values: &[f64]) -> Option<AccuracyMetrics> {
    if values.len() < 10 || values.len() - HOLDOUT < model.min_points() {
        return None;
    }
    let (train, actual) = values.split_at(values.len() - HOLDOUT);
    let predicted = model.fit_predict(train, HOLDOUT).ok()?;

    let errors: Vec<f64> = actual
        .iter()
        .zip(&predicted)
        .map(|(a, p)| a - p.predicted)
        .collect();
    let mae = errors.iter().map(|e| e.abs()).sum::<f64>() / HOLDOUT as f64;
    let mse = errors.iter().map(|e| e * e).sum::<f64>() / HOLDOUT as f64;
    let mape = actual
        .iter()
        .zip(&errors)
        .filter(|(a, _)| **a != 0.0)
        .map(|(a, e)| (e / a).abs())
        .sum::<f64>()
        / HOLDOUT as f64
        * 100.0;

    Some(AccuracyMetrics {
        mae,
        mse,
        rmse: mse.sqrt(),
        mape,
    })
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum MarketRegime {
    StrongUptrend,
    StrongDowntrend,
    ModerateUptrend,
    ModerateDowntrend,
    HighVolatility,
    Sideways,
    InsufficientData,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            MarketRegime::StrongUptrend => "Strong Uptrend",
            MarketRegime::StrongDowntrend => "Strong Downtrend",
            MarketRegime::ModerateUptrend => "Moderate Uptrend",
            MarketRegime::ModerateDowntrend => "Moderate Downtrend",
            MarketRegime::HighVolatility => "High Volatility",
            MarketRegime::Sideways => "Sideways/Ranging",
            MarketRegime::InsufficientData => "Insufficient data",
        };
        f.write_str(label)
    }
}

/// Classifies a close series by trend fit quality, then by dispersion.
pub fn detect_regime(values: &[f64]) -> MarketRegime {
    if values.len() < 20 {
        return MarketRegime::InsufficientData;
    }
    let fit = linear_fit(values);
    let mean = values.iter().mean();
    let cv = if mean != 0.0 {
        values.iter().std_dev() / mean
    } else {
        0.0
    };

    if fit.r_squared > 0.7 {
        if fit.slope > 0.0 {
            MarketRegime::StrongUptrend
        } else {
            MarketRegime::StrongDowntrend
        }
    } else if fit.r_squared > 0.4 {
        if fit.slope > 0.0 {
            MarketRegime::ModerateUptrend
        } else {
            MarketRegime::ModerateDowntrend
        }
    } else if cv > 0.05 {
        MarketRegime::HighVolatility
    } else {
        MarketRegime::Sideways
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn daily(values: &[f64]) -> Vec<(DateTime<Utc>, f64)> {
        let start = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        values
            .iter()
            .enumerate()
            .map(|(i, v)| (start + Duration::days(i as i64), *v))
            .collect()
    }

    fn noisy_ramp(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| 100.0 + i as f64 * 0.5 + if i % 2 == 0 { 0.3 } else { -0.3 })
            .collect()
    }

    #[test]
    fn test_series_length_matches_horizon() {
        let history = daily(&noisy_ramp(30));
        for horizon in [1, 7, 30, MAX_FORECAST_HORIZON] {
            let series = forecast(&LinearTrend::default(), &history, horizon).unwrap();
            assert_eq!(series.len(), horizon);
            let ma = forecast(&MovingAverage::default(), &history, horizon).unwrap();
            assert_eq!(ma.len(), horizon);
        }
    }

    #[test]
    fn test_timestamps_continue_at_input_step() {
        let history = daily(&noisy_ramp(12));
        let last = history.last().unwrap().0;
        let series = forecast(&LinearTrend::default(), &history, 3).unwrap();
        assert_eq!(series.step_seconds, 86_400);
        assert_eq!(series.points[0].timestamp, last + Duration::days(1));
        assert_eq!(series.points[2].timestamp, last + Duration::days(3));
    }

    #[test]
    fn test_bounds_bracket_prediction() {
        let history = daily(&noisy_ramp(30));
        let series = forecast(&LinearTrend::default(), &history, 10).unwrap();
        for p in &series.points {
            assert!(p.lower_bound <= p.predicted_value);
            assert!(p.predicted_value <= p.upper_bound);
        }
        // upward ramp keeps going up
        assert!(series.points[9].predicted_value > series.points[0].predicted_value);
    }

    #[test]
    fn test_insufficient_data_is_surfaced() {
        let history = daily(&[1.0, 2.0, 3.0]);
        let err = forecast(&LinearTrend::default(), &history, 5).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 5, got: 3 });

        let err = forecast(&MovingAverage::default(), &daily(&noisy_ramp(9)), 5).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 10, got: 9 });
    }

    #[test]
    fn test_non_finite_points_do_not_count() {
        let mut values = noisy_ramp(4);
        values.push(f64::NAN);
        values.push(f64::INFINITY);
        let err = forecast(&LinearTrend::default(), &daily(&values), 2).unwrap_err();
        assert_eq!(err, ForecastError::InsufficientData { needed: 5, got: 4 });
    }

    #[test]
    fn test_invalid_horizon() {
        let history = daily(&noisy_ramp(30));
        assert!(matches!(
            forecast(&LinearTrend::default(), &history, 0),
            Err(ForecastError::InvalidHorizon { got: 0, .. })
        ));
        assert!(forecast(&LinearTrend::default(), &history, MAX_FORECAST_HORIZON + 1).is_err());
    }

    #[test]
    fn test_unsorted_input_with_duplicates() {
        let mut history = daily(&noisy_ramp(8));
        history.reverse();
        let dup = (history[0].0, 999.0);
        history.push(dup);
        let series = forecast(&LinearTrend::default(), &history, 2).unwrap();
        assert_eq!(series.points[0].timestamp, dup.0 + Duration::days(1));
    }

    #[test]
    fn test_linear_fit_exact_line() {
        let fit = linear_fit(&[1.0, 3.0, 5.0, 7.0, 9.0]);
        assert!((fit.slope - 2.0).abs() < 1e-12);
        assert!((fit.intercept - 1.0).abs() < 1e-12);
        assert!((fit.r_squared - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_z_score() {
        assert!((z_score(0.95) - 1.959964).abs() < 1e-4);
        assert!(z_score(0.80) < z_score(0.95));
    }

    #[test]
    fn test_moving_average_is_flat() {
        let values: Vec<f64> = (1..=10).map(|v| v as f64).collect();
        let bands = MovingAverage::default().fit_predict(&values, 3).unwrap();
        for b in bands {
            assert!((b.predicted - 5.5).abs() < 1e-12);
            assert!((b.upper - 5.5 * 1.05).abs() < 1e-12);
        }
    }

    #[test]
    fn test_accuracy_metrics_perfect_line() {
        let values: Vec<f64> = (0..20).map(|i| 50.0 + 2.0 * i as f64).collect();
        let m = accuracy_metrics(&LinearTrend::default(), &values).unwrap();
        assert!(m.mae < 1e-9);
        assert!(m.rmse < 1e-9);
        assert!(accuracy_metrics(&LinearTrend::default(), &values[..9]).is_none());
    }

    #[test]
    fn test_regimes() {
        let up: Vec<f64> = (0..30).map(|i| 100.0 + i as f64).collect();
        let down: Vec<f64> = (0..30).map(|i| 100.0 - i as f64).collect();
        let flat: Vec<f64> = (0..30).map(|i| 100.0 + if i % 2 == 0 { 0.5 } else { -0.5 }).collect();
        let wild: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 80.0 } else { 120.0 }).collect();

        assert_eq!(detect_regime(&up), MarketRegime::StrongUptrend);
        assert_eq!(detect_regime(&down), MarketRegime::StrongDowntrend);
        assert_eq!(detect_regime(&flat), MarketRegime::Sideways);
        assert_eq!(detect_regime(&wild), MarketRegime::HighVolatility);
        assert_eq!(detect_regime(&up[..10]), MarketRegime::InsufficientData);
        assert_eq!(MarketRegime::Sideways.to_string(), "Sideways/Ranging");
    }

    #[test]
    fn test_model_kind_parsing() {
        assert_eq!("Linear".parse::<ModelKind>().unwrap(), ModelKind::Linear);
        assert_eq!("ma".parse::<ModelKind>().unwrap(), ModelKind::MovingAverage);
        assert!("prophet".parse::<ModelKind>().is_err());
        assert_eq!(ModelKind::MovingAverage.build().name(), "moving_average");
    }
}
