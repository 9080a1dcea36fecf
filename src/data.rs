use crate::config::JITTER_BAND;
use crate::market::SymbolRecord;
use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use rand_distr::{Distribution, Normal};
use serde::Serialize;

/// Every quote and candle this crate produces is synthetic.
pub const SIMULATED_SOURCE: &str = "simulated";

/// Applies a uniform ±`JITTER_BAND` perturbation to a base price.
pub fn jitter_price<R: Rng + ?Sized>(base_price: f64, rng: &mut R) -> f64 {
    let u: f64 = rng.gen_range(-JITTER_BAND..=JITTER_BAND);
    base_price * (1.0 + u)
}

/// A simulated "live" price for one listing.
#[derive(Clone, Debug, Serialize)]
pub struct PriceQuote {
    pub ticker: String,
    pub display_name: String,
    pub sector: String,
    pub price: f64,
    pub base_price: f64,
    pub change: f64,
    pub change_pct: f64,
    pub timestamp: DateTime<Utc>,
    pub source: &'static str,
}

impl PriceQuote {
    pub fn simulate<R: Rng + ?Sized>(record: &SymbolRecord, rng: &mut R, now: DateTime<Utc>) -> Self {
        let price = jitter_price(record.base_price, rng);
        let change = price - record.base_price;
        Self {
            ticker: record.ticker.to_string(),
            display_name: record.display_name.to_string(),
            sector: record.sector.to_string(),
            price,
            base_price: record.base_price,
            change,
            change_pct: change / record.base_price * 100.0,
            timestamp: now,
            source: SIMULATED_SOURCE,
        }
    }
}

/// Represents a single candlestick data point (OHLCV).
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct Candle {
    pub date: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Holds a price history for one symbol, oldest first.
#[derive(Clone, Debug, Serialize)]
pub struct StockData {
    pub symbol: String,
    pub history: Vec<Candle>,
}

#[derive(Clone, Debug, Serialize)]
pub struct Analysis {
    pub current_price: f64,
    pub support: f64,
    pub resistance: f64,
    pub pivot: f64,
    /// Sample std of daily log returns.
    pub volatility: f64,
}

/// Volatility, intrabar range and volume scale of one simulated bar.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BarProfile {
    pub volatility: f64,
    pub range_pct: f64,
    pub volume: (f64, f64),
}

impl BarProfile {
    /// Daily bars. The KSE-100 index moves less than a single listing.
    pub fn daily(record: &SymbolRecord) -> Self {
        if record.sector == "Index" {
            Self {
                volatility: 0.015,
                range_pct: 0.025,
                volume: (50_000_000.0, 200_000_000.0),
            }
        } else {
            Self {
                volatility: 0.02,
                range_pct: 0.03,
                volume: (100_000.0, 5_000_000.0),
            }
        }
    }

    /// A trading day cut into `bars_per_day` bars: volatility and range
    /// shrink with the square root of the bar length, volume linearly.
    pub fn intraday(record: &SymbolRecord, bars_per_day: usize) -> Self {
        let daily = Self::daily(record);
        let n = bars_per_day.max(1) as f64;
        Self {
            volatility: daily.volatility / n.sqrt(),
            range_pct: daily.range_pct / n.sqrt(),
            volume: (daily.volume.0 / n, daily.volume.1 / n),
        }
    }
}

/// One candle per timestamp in `stamps`, the last closing at `current_price`.
///
/// Walks backwards from the current price with normally distributed returns.
pub fn simulate_candles<R: Rng + ?Sized>(
    current_price: f64,
    stamps: &[DateTime<Utc>],
    profile: &BarProfile,
    rng: &mut R,
) -> Vec<Candle> {
    let n = stamps.len();
    let returns = match Normal::new(0.0, profile.volatility) {
        Ok(dist) => (0..n).map(|_| dist.sample(rng)).collect::<Vec<f64>>(),
        Err(_) => vec![0.0; n],
    };

    let mut closes = vec![current_price; n];
    for i in (0..n.saturating_sub(1)).rev() {
        // clamp so a pathological draw can never flip the sign of a price
        let r: f64 = returns[i].clamp(-0.5, 0.5);
        closes[i] = (closes[i + 1] / (1.0 + r)).max(0.01);
    }

    let (vol_lo, vol_hi) = profile.volume;
    stamps
        .iter()
        .zip(closes)
        .map(|(&date, close)| {
            let range = close * profile.range_pct;
            let open = (close + rng.gen_range(-range / 2.0..=range / 2.0)).max(0.01);
            let high = open.max(close) + rng.gen_range(0.0..=range / 3.0);
            let low = (open.min(close) - rng.gen_range(0.0..=range / 3.0)).max(0.01);
            let volume = rng.gen_range(vol_lo..vol_hi);
            Candle {
                date,
                open,
                high,
                low,
                close,
                volume,
            }
        })
        .collect()
}

impl StockData {
    /// Generates `days` daily candles ending at `current_price` on `end`.
    pub fn simulate<R: Rng + ?Sized>(
        record: &SymbolRecord,
        current_price: f64,
        days: usize,
        end: DateTime<Utc>,
        rng: &mut R,
    ) -> Self {
        let days = days.max(1);
        let stamps: Vec<DateTime<Utc>> = (0..days)
            .map(|i| end - Duration::days((days - 1 - i) as i64))
            .collect();
        Self {
            symbol: record.ticker.to_string(),
            history: simulate_candles(current_price, &stamps, &BarProfile::daily(record), rng),
        }
    }

    pub fn closes(&self) -> Vec<f64> {
        self.history.iter().map(|c| c.close).collect()
    }

    /// `(timestamp, close)` pairs, the shape the forecast adapter takes.
    pub fn close_series(&self) -> Vec<(DateTime<Utc>, f64)> {
        self.history.iter().map(|c| (c.date, c.close)).collect()
    }

    pub fn log_returns(&self) -> Vec<f64> {
        self.history
            .windows(2)
            .map(|w| (w[1].close / w[0].close).ln())
            .collect()
    }

    /// Mean and sample standard deviation of daily log returns.
    pub fn stats(&self) -> (f64, f64) {
        let returns = self.log_returns();
        let n = returns.len() as f64;
        if n < 2.0 {
            return (0.0, 0.0);
        }

        let mean = returns.iter().sum::<f64>() / n;
        let variance = returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);

        (mean, variance.sqrt())
    }

    pub fn analyze(&self) -> Option<Analysis> {
        let last = self.history.last()?;
        let current_price = last.close;
        let pivot = (last.high + last.low + last.close) / 3.0;

        let support = self.history.iter().map(|c| c.low).fold(f64::INFINITY, |a, b| a.min(b));
        let resistance = self.history.iter().map(|c| c.high).fold(f64::NEG_INFINITY, |a, b| a.max(b));

        let (_, volatility) = self.stats();

        Some(Analysis { current_price, support, resistance, pivot, volatility })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::market::PSX_SYMBOLS;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_jitter_stays_within_band_for_all_symbols() {
        let mut rng = StdRng::seed_from_u64(7);
        for record in PSX_SYMBOLS {
            for _ in 0..500 {
                let p = jitter_price(record.base_price, &mut rng);
                let bound = record.base_price * JITTER_BAND * (1.0 + 1e-12);
                assert!(
                    (p - record.base_price).abs() <= bound,
                    "{}: {} drifted more than 1.5% from {}",
                    record.ticker,
                    p,
                    record.base_price
                );
            }
        }
    }

    #[test]
    fn test_jitter_actually_moves() {
        let mut rng = StdRng::seed_from_u64(11);
        let prices: Vec<f64> = (0..50).map(|_| jitter_price(100.0, &mut rng)).collect();
        assert!(prices.iter().any(|p| (*p - 100.0).abs() > 1e-9));
    }

    #[test]
    fn test_quote_change_is_relative_to_base() {
        let mut rng = StdRng::seed_from_u64(3);
        let record = PSX_SYMBOLS[1];
        let q = PriceQuote::simulate(&record, &mut rng, Utc::now());
        assert_eq!(q.source, SIMULATED_SOURCE);
        assert!((q.change - (q.price - q.base_price)).abs() < 1e-9);
        assert!(q.change_pct.abs() <= JITTER_BAND * 100.0 + 1e-9);
    }

    #[test]
    fn test_simulated_history_shape() {
        let mut rng = StdRng::seed_from_u64(42);
        let record = PSX_SYMBOLS[8];
        let end = Utc::now();
        let data = StockData::simulate(&record, 150.0, 30, end, &mut rng);

        assert_eq!(data.history.len(), 30);
        assert_eq!(data.symbol, record.ticker);
        assert!((data.history.last().unwrap().close - 150.0).abs() < 1e-9);
        assert_eq!(data.history.last().unwrap().date, end);
        for pair in data.history.windows(2) {
            assert!(pair[0].date < pair[1].date);
        }
        for c in &data.history {
            assert!(c.low > 0.0);
            assert!(c.high >= c.open.max(c.close));
            assert!(c.low <= c.open.min(c.close));
            assert!(c.volume > 0.0);
        }
    }

    #[test]
    fn test_intraday_profile_scales_down() {
        let daily = BarProfile::daily(&PSX_SYMBOLS[8]);
        let bars = BarProfile::intraday(&PSX_SYMBOLS[8], 73);
        assert!((bars.volatility - daily.volatility / 73f64.sqrt()).abs() < 1e-12);
        assert!(bars.volume.1 < daily.volume.1);
        assert!(BarProfile::daily(&PSX_SYMBOLS[0]).volatility < daily.volatility);

        let mut rng = StdRng::seed_from_u64(8);
        let stamps: Vec<DateTime<Utc>> = (0..12).map(|i| Utc::now() + Duration::minutes(5 * i)).collect();
        let candles = simulate_candles(145.0, &stamps, &bars, &mut rng);
        assert_eq!(candles.len(), 12);
        assert!((candles[11].close - 145.0).abs() < 1e-9);
        assert!(simulate_candles(145.0, &[], &bars, &mut rng).is_empty());
    }

    #[test]
    fn test_analyze_and_stats() {
        let mut rng = StdRng::seed_from_u64(5);
        let data = StockData::simulate(&PSX_SYMBOLS[0], 130_000.0, 20, Utc::now(), &mut rng);
        let a = data.analyze().expect("non-empty history");
        assert!(a.support <= a.current_price && a.current_price <= a.resistance);
        let (_mean, std) = data.stats();
        assert!(std > 0.0);

        let empty = StockData { symbol: "X".into(), history: vec![] };
        assert!(empty.analyze().is_none());
        assert_eq!(empty.stats(), (0.0, 0.0));
    }
}
