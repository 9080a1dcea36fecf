use crate::cache::{CacheStats, TtlCache};
use crate::chart::{self, ChartSpec};
use crate::config::{
    DEFAULT_FORECAST_HORIZON, DEFAULT_HISTORY_DAYS, INTRADAY_STEP_MINUTES, MAX_HISTORY_DAYS,
    MIN_HISTORY_DAYS, MOVERS_COUNT,
};
use crate::data::{Analysis, Candle, PriceQuote, SIMULATED_SOURCE, StockData};
use crate::error::DashboardError;
use crate::forecast::{
    self, AccuracyMetrics, ForecastSeries, ModelKind, accuracy_metrics, detect_regime,
};
use crate::format::{format_change_pct, format_currency, format_volume};
use crate::indicators::IndicatorSummary;
use crate::intraday::{self, SessionPhase};
use crate::market::{self, MarketStatus, PriceTable, SymbolRecord};
use crate::upload::UploadedSeries;
use chrono::{DateTime, NaiveDate, Utc};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

pub const DISCLAIMER: &str = "Prices are simulated: hard-coded reference prices with ±1.5% random \
jitter. They are not exchange data and must not be used for trading.";

const SNAPSHOT_KEY: &str = "quotes";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RefreshState {
    #[default]
    Idle,
    Refreshing,
}

#[derive(Clone, Debug, Serialize)]
pub struct SectorPerformance {
    pub sector: String,
    pub listings: usize,
    pub average_change_pct: f64,
}

/// One refresh worth of simulated quotes plus the derived market summary.
#[derive(Clone, Debug, Serialize)]
pub struct Snapshot {
    pub generated_at: DateTime<Utc>,
    pub source: &'static str,
    pub disclaimer: &'static str,
    pub market: MarketStatus,
    pub quotes: Vec<PriceQuote>,
    pub gainers: Vec<PriceQuote>,
    pub losers: Vec<PriceQuote>,
    pub sectors: Vec<SectorPerformance>,
}

impl Snapshot {
    pub fn quote(&self, ticker: &str) -> Option<&PriceQuote> {
        self.quotes.iter().find(|q| q.ticker.eq_ignore_ascii_case(ticker))
    }

    /// Plain-text quote table for terminal output.
    pub fn render_table(&self) -> String {
        let mut out = format!(
            "PSX snapshot at {} ({})\n{}\n\n",
            self.generated_at.format("%Y-%m-%d %H:%M:%S UTC"),
            self.market.message,
            DISCLAIMER
        );
        out.push_str(&format!(
            "{:<10} {:<18} {:>20} {:>10}\n",
            "Ticker", "Sector", "Price", "Change"
        ));
        for q in &self.quotes {
            out.push_str(&format!(
                "{:<10} {:<18} {:>20} {:>10}\n",
                q.ticker,
                q.sector,
                format_currency(q.price),
                format_change_pct(q.change_pct)
            ));
        }
        out
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ForecastRequest {
    pub symbol: String,
    pub days: Option<usize>,
    pub horizon: Option<usize>,
    pub model: Option<ModelKind>,
}

/// Identity of a forecast run; the controller re-runs only when this changes.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
pub struct ForecastKey {
    pub symbol: String,
    pub days: usize,
    pub horizon: usize,
    pub model: ModelKind,
}

impl fmt::Display for ForecastKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}_{}_{}", self.symbol, self.days, self.horizon, self.model)
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ForecastReport {
    pub request: ForecastKey,
    pub generated_at: DateTime<Utc>,
    pub source: &'static str,
    pub series: ForecastSeries,
    pub chart: ChartSpec,
    pub regime: String,
    pub accuracy: Option<AccuracyMetrics>,
}

#[derive(Clone, Debug)]
pub struct ForecastOutcome {
    pub reused: bool,
    pub report: Arc<ForecastReport>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ChartBundle {
    pub symbol: String,
    pub display_name: String,
    pub days: usize,
    pub source: &'static str,
    pub price: ChartSpec,
    pub candlestick: ChartSpec,
    pub analysis: Option<Analysis>,
    pub indicators: IndicatorSummary,
    /// Last session's volume, e.g. `1.5M`.
    pub latest_volume: Option<String>,
}

/// Today's (or the last) session in five-minute bars, with the forecast for the
/// slots that have not traded yet.
#[derive(Clone, Debug, Serialize)]
pub struct IntradayReport {
    pub symbol: String,
    pub display_name: String,
    pub source: &'static str,
    pub generated_at: DateTime<Utc>,
    pub phase: SessionPhase,
    pub phase_label: String,
    pub session_date: NaiveDate,
    pub forecast_date: NaiveDate,
    pub interval_minutes: i64,
    /// Leading bars that belong to the previous session.
    pub context_bars: usize,
    pub bars: Vec<Candle>,
    pub session_high: Option<f64>,
    pub session_low: Option<f64>,
    pub model: ModelKind,
    pub forecast: Option<ForecastSeries>,
    pub forecast_note: Option<String>,
    pub chart: ChartSpec,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadReport {
    pub file_name: String,
    /// Worksheet name for spreadsheet uploads.
    pub sheet: Option<String>,
    pub rows: usize,
    pub skipped_rows: usize,
    pub date_column: String,
    pub price_column: String,
    pub first: DateTime<Utc>,
    pub last: DateTime<Utc>,
    pub chart: ChartSpec,
    pub forecast: Option<ForecastSeries>,
    pub forecast_chart: Option<ChartSpec>,
    /// Why no forecast was produced, shown next to the chart.
    pub forecast_note: Option<String>,
    pub regime: String,
    pub indicators: IndicatorSummary,
}

#[derive(Clone, Debug, Serialize)]
pub struct CacheOverview {
    pub ttl_secs: i64,
    pub quotes: CacheStats,
    pub history: CacheStats,
    pub forecasts: CacheStats,
    pub intraday: CacheStats,
}

#[derive(Clone, Debug, Serialize)]
pub struct DashboardState {
    pub state: RefreshState,
    pub last_refresh: Option<DateTime<Utc>>,
    pub refresh_count: u64,
    pub forecast_runs: u64,
    pub last_forecast: Option<ForecastKey>,
    pub tracked_symbols: usize,
    pub market: MarketStatus,
    pub cache: CacheOverview,
}

/// Owns the price table, the caches and the RNG that drives the simulated feed.
pub struct Dashboard {
    table: PriceTable,
    snapshots: TtlCache<Arc<Snapshot>>,
    histories: TtlCache<Arc<StockData>>,
    forecasts: TtlCache<Arc<ForecastReport>>,
    intraday: TtlCache<Arc<IntradayReport>>,
    rng: StdRng,
    state: RefreshState,
    last_refresh: Option<DateTime<Utc>>,
    refresh_count: u64,
    forecast_runs: u64,
    last_forecast: Option<ForecastKey>,
}

impl Dashboard {
    pub fn new(cache_ttl: Duration) -> Self {
        Self::with_rng(PriceTable::default(), cache_ttl, StdRng::from_entropy())
    }

    pub fn with_rng(table: PriceTable, cache_ttl: Duration, rng: StdRng) -> Self {
        Self {
            table,
            snapshots: TtlCache::new(cache_ttl),
            histories: TtlCache::new(cache_ttl),
            forecasts: TtlCache::new(cache_ttl),
            intraday: TtlCache::new(cache_ttl),
            rng,
            state: RefreshState::Idle,
            last_refresh: None,
            refresh_count: 0,
            forecast_runs: 0,
            last_forecast: None,
        }
    }

    pub fn table(&self) -> &PriceTable {
        &self.table
    }

    /// Cached snapshot, or a regenerated one when forced or expired.
    pub fn snapshot(&mut self, force: bool) -> Arc<Snapshot> {
        self.snapshot_at(force, Utc::now())
    }

    pub fn snapshot_at(&mut self, force: bool, now: DateTime<Utc>) -> Arc<Snapshot> {
        if !force {
            if let Some(hit) = self.snapshots.get_at(SNAPSHOT_KEY, now) {
                return hit;
            }
        }

        self.state = RefreshState::Refreshing;
        if force {
            // derived histories and forecasts were built on the old quotes
            self.histories.clear();
            self.forecasts.clear();
            self.intraday.clear();
        }
        let snapshot = Arc::new(self.build_snapshot(now));
        self.snapshots.set_at(SNAPSHOT_KEY, snapshot.clone(), now);
        self.last_refresh = Some(now);
        self.refresh_count += 1;
        self.state = RefreshState::Idle;

        info!(
            quotes = snapshot.quotes.len(),
            forced = force,
            "Regenerated simulated quote snapshot"
        );
        snapshot
    }

    fn build_snapshot(&mut self, now: DateTime<Utc>) -> Snapshot {
        let quotes: Vec<PriceQuote> = self
            .table
            .records()
            .iter()
            .map(|r| PriceQuote::simulate(r, &mut self.rng, now))
            .collect();

        let mut ranked: Vec<&PriceQuote> = quotes.iter().collect();
        ranked.sort_by(|a, b| b.change_pct.total_cmp(&a.change_pct));
        let gainers = ranked
            .iter()
            .filter(|q| q.change_pct > 0.0)
            .take(MOVERS_COUNT)
            .map(|q| (*q).clone())
            .collect();
        let losers = ranked
            .iter()
            .rev()
            .filter(|q| q.change_pct < 0.0)
            .take(MOVERS_COUNT)
            .map(|q| (*q).clone())
            .collect();

        Snapshot {
            generated_at: now,
            source: SIMULATED_SOURCE,
            disclaimer: DISCLAIMER,
            market: market::market_status(now),
            sectors: sector_performance(&quotes),
            gainers,
            losers,
            quotes,
        }
    }

    /// Synthetic daily history ending at the symbol's current quote.
    pub fn history_at(
        &mut self,
        symbol: &str,
        days: usize,
        now: DateTime<Utc>,
    ) -> Result<Arc<StockData>, DashboardError> {
        if !(MIN_HISTORY_DAYS..=MAX_HISTORY_DAYS).contains(&days) {
            return Err(DashboardError::InvalidRange {
                got: days,
                min: MIN_HISTORY_DAYS,
                max: MAX_HISTORY_DAYS,
            });
        }
        let record = self.lookup(symbol)?;

        let key = format!("{}_{}", record.ticker, days);
        if let Some(hit) = self.histories.get_at(&key, now) {
            return Ok(hit);
        }

        let current = self.current_price(&record, now);
        let data = Arc::new(StockData::simulate(&record, current, days, now, &mut self.rng));
        self.histories.set_at(key, data.clone(), now);
        debug!(symbol = record.ticker, days, "Generated synthetic history");
        Ok(data)
    }

    pub fn charts(&mut self, symbol: &str, days: Option<usize>) -> Result<ChartBundle, DashboardError> {
        self.charts_at(symbol, days, Utc::now())
    }

    pub fn charts_at(
        &mut self,
        symbol: &str,
        days: Option<usize>,
        now: DateTime<Utc>,
    ) -> Result<ChartBundle, DashboardError> {
        let days = days.unwrap_or(DEFAULT_HISTORY_DAYS);
        let data = self.history_at(symbol, days, now)?;
        let display_name = self
            .table
            .get(&data.symbol)
            .map(|r| r.display_name.to_string())
            .unwrap_or_else(|| data.symbol.clone());

        Ok(ChartBundle {
            price: chart::price_chart(&data, &format!("{display_name} ({days} days, simulated)")),
            candlestick: chart::candlestick_chart(&data, &format!("{} candlestick", data.symbol)),
            analysis: data.analyze(),
            indicators: IndicatorSummary::from_closes(&data.closes()),
            latest_volume: data.history.last().map(|c| format_volume(c.volume)),
            symbol: data.symbol.clone(),
            display_name,
            days,
            source: SIMULATED_SOURCE,
        })
    }

    pub fn forecast(&mut self, request: &ForecastRequest) -> Result<ForecastOutcome, DashboardError> {
        self.forecast_at(request, Utc::now())
    }

    /// Re-runs the model only when the request differs from the last one or
    /// the cached result has expired.
    pub fn forecast_at(
        &mut self,
        request: &ForecastRequest,
        now: DateTime<Utc>,
    ) -> Result<ForecastOutcome, DashboardError> {
        let record = self.lookup(&request.symbol)?;
        let key = ForecastKey {
            symbol: record.ticker.to_string(),
            days: request.days.unwrap_or(DEFAULT_HISTORY_DAYS),
            horizon: request.horizon.unwrap_or(DEFAULT_FORECAST_HORIZON),
            model: request.model.unwrap_or_default(),
        };
        let cache_key = key.to_string();

        if self.last_forecast.as_ref() == Some(&key) {
            if let Some(report) = self.forecasts.get_at(&cache_key, now) {
                debug!(request = %cache_key, "Reusing cached forecast");
                return Ok(ForecastOutcome {
                    reused: true,
                    report,
                });
            }
        }

        let data = self.history_at(&key.symbol, key.days, now)?;
        let history = data.close_series();
        let closes = data.closes();
        let model = key.model.build();
        let series = forecast::forecast(model.as_ref(), &history, key.horizon)?;
        let chart = chart::forecast_chart(
            &history,
            &series,
            &format!("{} {}-step forecast (simulated history)", key.symbol, key.horizon),
        );

        let report = Arc::new(ForecastReport {
            generated_at: now,
            source: SIMULATED_SOURCE,
            regime: detect_regime(&closes).to_string(),
            accuracy: accuracy_metrics(model.as_ref(), &closes),
            series,
            chart,
            request: key.clone(),
        });
        self.forecasts.set_at(cache_key, report.clone(), now);
        self.last_forecast = Some(key);
        self.forecast_runs += 1;
        info!(
            symbol = %report.request.symbol,
            steps = report.series.len(),
            model = %report.request.model,
            "Forecast generated"
        );

        Ok(ForecastOutcome {
            reused: false,
            report,
        })
    }

    pub fn intraday(
        &mut self,
        symbol: &str,
        model: ModelKind,
    ) -> Result<Arc<IntradayReport>, DashboardError> {
        self.intraday_at(symbol, model, Utc::now())
    }

    /// Bars for the session in progress (or the last one) ending at the current
    /// quote, plus a forecast up to the close. Cached until a new bar elapses.
    pub fn intraday_at(
        &mut self,
        symbol: &str,
        model: ModelKind,
        now: DateTime<Utc>,
    ) -> Result<Arc<IntradayReport>, DashboardError> {
        let record = self.lookup(symbol)?;
        let plan = intraday::plan_session(now).ok_or(DashboardError::NoSession(now))?;
        let key = format!(
            "{}_{}_{}_{}",
            record.ticker,
            plan.session_date,
            plan.elapsed.len(),
            model
        );
        if let Some(hit) = self.intraday.get_at(&key, now) {
            return Ok(hit);
        }

        let current = self.current_price(&record, now);
        let bars = intraday::simulate_session(&record, current, &plan, &mut self.rng);
        let context_bars = bars.len().saturating_sub(plan.elapsed.len());
        let session = &bars[context_bars..];
        let session_high = session.iter().map(|c| c.high).reduce(f64::max);
        let session_low = session.iter().map(|c| c.low).reduce(f64::min);

        let forecaster = model.build();
        let (forecast, forecast_note) =
            match intraday::forecast_session(forecaster.as_ref(), &bars, &plan) {
                Ok(fc) => (Some(fc), None),
                Err(e) => (None, Some(e.to_string())),
            };

        let history: Vec<(DateTime<Utc>, f64)> = bars.iter().map(|c| (c.date, c.close)).collect();
        let title = format!(
            "{} intraday {} ({}, simulated)",
            record.ticker, plan.session_date, plan.phase
        );
        let chart = match &forecast {
            Some(fc) => chart::forecast_chart(&history, fc, &title),
            None => chart::line_chart(&history, "Price", &title),
        };

        let report = Arc::new(IntradayReport {
            symbol: record.ticker.to_string(),
            display_name: record.display_name.to_string(),
            source: SIMULATED_SOURCE,
            generated_at: now,
            phase: plan.phase,
            phase_label: plan.phase.to_string(),
            session_date: plan.session_date,
            forecast_date: plan.forecast_date,
            interval_minutes: INTRADAY_STEP_MINUTES,
            context_bars,
            session_high,
            session_low,
            model,
            forecast,
            forecast_note,
            chart,
            bars,
        });
        self.intraday.set_at(key, report.clone(), now);
        debug!(
            symbol = record.ticker,
            phase = %plan.phase,
            bars = report.bars.len(),
            "Generated intraday session"
        );
        Ok(report)
    }

    fn lookup(&self, symbol: &str) -> Result<SymbolRecord, DashboardError> {
        self.table
            .get(symbol)
            .copied()
            .ok_or_else(|| DashboardError::UnknownSymbol(symbol.trim().to_string()))
    }

    /// Latest simulated quote for `record`, read through the snapshot cache.
    fn current_price(&mut self, record: &SymbolRecord, now: DateTime<Utc>) -> f64 {
        self.snapshot_at(false, now)
            .quote(record.ticker)
            .map(|q| q.price)
            .unwrap_or(record.base_price)
    }

    pub fn view(&self) -> DashboardState {
        self.view_at(Utc::now())
    }

    pub fn view_at(&self, now: DateTime<Utc>) -> DashboardState {
        DashboardState {
            state: self.state,
            last_refresh: self.last_refresh,
            refresh_count: self.refresh_count,
            forecast_runs: self.forecast_runs,
            last_forecast: self.last_forecast.clone(),
            tracked_symbols: self.table.len(),
            market: market::market_status(now),
            cache: CacheOverview {
                ttl_secs: self.snapshots.ttl().num_seconds(),
                quotes: self.snapshots.stats_at(now),
                history: self.histories.stats_at(now),
                forecasts: self.forecasts.stats_at(now),
                intraday: self.intraday.stats_at(now),
            },
        }
    }
}

fn sector_performance(quotes: &[PriceQuote]) -> Vec<SectorPerformance> {
    let mut by_sector: BTreeMap<&str, (usize, f64)> = BTreeMap::new();
    for q in quotes {
        let entry = by_sector.entry(q.sector.as_str()).or_insert((0, 0.0));
        entry.0 += 1;
        entry.1 += q.change_pct;
    }
    let mut out: Vec<SectorPerformance> = by_sector
        .into_iter()
        .map(|(sector, (n, total))| SectorPerformance {
            sector: sector.to_string(),
            listings: n,
            average_change_pct: total / n as f64,
        })
        .collect();
    out.sort_by(|a, b| b.average_change_pct.total_cmp(&a.average_change_pct));
    out
}

/// Chart, and a forecast when the series supports one, for an uploaded file.
///
/// A forecast failure is reported in `forecast_note`; the chart is still returned.
pub fn analyze_upload(series: &UploadedSeries, horizon: usize, model: ModelKind) -> UploadReport {
    let history = series.close_series();
    let closes: Vec<f64> = history.iter().map(|(_, v)| *v).collect();
    let title = format!("{} ({})", series.file_name, series.price_column);

    let chart = match series.to_stock_data() {
        Some(data) => chart::candlestick_chart(&data, &title),
        None => chart::line_chart(&history, &series.price_column, &title),
    };

    let forecaster = model.build();
    let (forecast, forecast_chart, forecast_note) =
        match forecast::forecast(forecaster.as_ref(), &history, horizon) {
            Ok(fc) => {
                let fc_chart = chart::forecast_chart(&history, &fc, &format!("{} forecast", series.label()));
                (Some(fc), Some(fc_chart), None)
            }
            Err(e) => (None, None, Some(e.to_string())),
        };

    // read_upload never yields an empty series
    let first = history.first().map(|(t, _)| *t).unwrap_or_default();
    let last = history.last().map(|(t, _)| *t).unwrap_or_default();

    UploadReport {
        file_name: series.file_name.clone(),
        sheet: series.sheet.clone(),
        rows: series.len(),
        skipped_rows: series.skipped_rows,
        date_column: series.date_column.clone(),
        price_column: series.price_column.clone(),
        first,
        last,
        chart,
        forecast,
        forecast_chart,
        forecast_note,
        regime: detect_regime(&closes).to_string(),
        indicators: IndicatorSummary::from_closes(&closes),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ForecastError;
    use crate::upload::read_upload;
    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 7, 14, 6, 0, 0).unwrap()
    }

    fn dashboard() -> Dashboard {
        Dashboard::with_rng(
            PriceTable::default(),
            Duration::from_secs(300),
            StdRng::seed_from_u64(99),
        )
    }

    fn request(symbol: &str, horizon: usize) -> ForecastRequest {
        ForecastRequest {
            symbol: symbol.to_string(),
            horizon: Some(horizon),
            ..Default::default()
        }
    }

    #[test]
    fn test_snapshot_is_cached_until_ttl() {
        let mut d = dashboard();
        let a = d.snapshot_at(false, t0());
        let b = d.snapshot_at(false, t0() + chrono::Duration::seconds(120));
        assert!(Arc::ptr_eq(&a, &b));

        let c = d.snapshot_at(false, t0() + chrono::Duration::seconds(301));
        assert!(!Arc::ptr_eq(&a, &c));
        assert_eq!(d.view_at(t0()).refresh_count, 2);
        assert_eq!(d.view_at(t0()).state, RefreshState::Idle);
    }

    #[test]
    fn test_forced_refresh_regenerates() {
        let mut d = dashboard();
        let a = d.snapshot_at(false, t0());
        let b = d.snapshot_at(true, t0());
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(b.quotes.len(), d.table().len());
        assert!(b.quotes.iter().all(|q| q.source == SIMULATED_SOURCE));
    }

    #[test]
    fn test_snapshot_summary() {
        let mut d = dashboard();
        let s = d.snapshot_at(false, t0());
        assert!(s.gainers.len() <= MOVERS_COUNT);
        assert!(s.gainers.iter().all(|q| q.change_pct > 0.0));
        assert!(s.losers.iter().all(|q| q.change_pct < 0.0));
        for pair in s.gainers.windows(2) {
            assert!(pair[0].change_pct >= pair[1].change_pct);
        }
        let listed: usize = s.sectors.iter().map(|p| p.listings).sum();
        assert_eq!(listed, s.quotes.len());
        assert!(s.market.open);
        assert!(s.render_table().contains("HBL"));
    }

    #[test]
    fn test_history_ends_at_current_quote() {
        let mut d = dashboard();
        let snap = d.snapshot_at(false, t0());
        let data = d.history_at("ogdc", 30, t0()).unwrap();
        let quote = snap.quote("OGDC").unwrap();
        assert_eq!(data.history.len(), 30);
        assert!((data.history.last().unwrap().close - quote.price).abs() < 1e-9);

        let again = d.history_at("OGDC", 30, t0()).unwrap();
        assert!(Arc::ptr_eq(&data, &again));
    }

    #[test]
    fn test_history_rejects_bad_input() {
        let mut d = dashboard();
        assert_eq!(
            d.history_at("NOPE", 30, t0()).unwrap_err(),
            DashboardError::UnknownSymbol("NOPE".into())
        );
        assert!(matches!(
            d.history_at("HBL", 2, t0()),
            Err(DashboardError::InvalidRange { got: 2, .. })
        ));
    }

    #[test]
    fn test_forecast_reruns_only_on_change() {
        let mut d = dashboard();
        let first = d.forecast_at(&request("HBL", 7), t0()).unwrap();
        assert!(!first.reused);
        assert_eq!(first.report.series.len(), 7);

        let same = d.forecast_at(&request("hbl", 7), t0() + chrono::Duration::seconds(60)).unwrap();
        assert!(same.reused);
        assert!(Arc::ptr_eq(&first.report, &same.report));

        let other = d.forecast_at(&request("HBL", 14), t0()).unwrap();
        assert!(!other.reused);
        assert_eq!(other.report.series.len(), 14);

        let back = d.forecast_at(&request("HBL", 14), t0() + chrono::Duration::seconds(400)).unwrap();
        assert!(!back.reused, "expired entry must be recomputed");
        assert_eq!(d.view_at(t0()).forecast_runs, 3);
    }

    #[test]
    fn test_forecast_errors_surface() {
        let mut d = dashboard();
        let err = d.forecast_at(&request("HBL", 0), t0()).unwrap_err();
        assert!(matches!(
            err,
            DashboardError::Forecast(ForecastError::InvalidHorizon { .. })
        ));
        assert!(matches!(
            d.forecast_at(&request("XYZ", 7), t0()),
            Err(DashboardError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn test_charts_bundle() {
        let mut d = dashboard();
        let bundle = d.charts_at("LUCK", Some(20), t0()).unwrap();
        assert_eq!(bundle.symbol, "LUCK");
        assert_eq!(bundle.days, 20);
        assert!(bundle.analysis.is_some());
        assert!(bundle.indicators.sma_10.is_some());
        assert!(bundle.latest_volume.is_some());
        assert!(!bundle.price.data.is_empty());
    }

    #[test]
    fn test_intraday_session_report() {
        let mut d = dashboard();
        // 06:00 UTC is 11:00 in Karachi, Monday morning session
        let snap = d.snapshot_at(false, t0());
        let report = d.intraday_at("hbl", ModelKind::Linear, t0()).unwrap();
        assert_eq!(report.symbol, "HBL");
        assert_eq!(report.phase, SessionPhase::Morning);
        assert_eq!(report.interval_minutes, 5);
        assert_eq!(report.bars.len() - report.context_bars, 19);
        let last = report.bars.last().unwrap();
        assert_eq!(last.date, t0());
        assert!((last.close - snap.quote("HBL").unwrap().price).abs() < 1e-9);

        let fc = report.forecast.as_ref().unwrap();
        assert_eq!(fc.len(), 54);
        assert!(fc.points.iter().all(|p| p.timestamp > t0()));
        assert!(report.session_low.unwrap() <= report.session_high.unwrap());

        let again = d.intraday_at("HBL", ModelKind::Linear, t0() + chrono::Duration::seconds(60)).unwrap();
        assert!(Arc::ptr_eq(&report, &again), "same bar count reuses the cached session");

        let next_bar = d.intraday_at("HBL", ModelKind::Linear, t0() + chrono::Duration::minutes(5)).unwrap();
        assert_eq!(next_bar.bars.len(), report.bars.len() + 1);
        assert_eq!(d.view_at(t0()).cache.intraday.total_entries, 2);

        d.snapshot_at(true, t0());
        assert_eq!(d.view_at(t0()).cache.intraday.total_entries, 0);
    }

    #[test]
    fn test_intraday_after_close_forecasts_next_session() {
        let mut d = dashboard();
        // Friday 2025-07-18 17:00 Karachi
        let friday_evening = Utc.with_ymd_and_hms(2025, 7, 18, 12, 0, 0).unwrap();
        let report = d.intraday_at("KSE-100", ModelKind::MovingAverage, friday_evening).unwrap();
        assert_eq!(report.phase, SessionPhase::Closed);
        assert_eq!(report.session_date, NaiveDate::from_ymd_opt(2025, 7, 18).unwrap());
        assert_eq!(report.forecast_date, NaiveDate::from_ymd_opt(2025, 7, 21).unwrap());
        assert_eq!(report.forecast.as_ref().map(|f| f.len()), Some(73));
        assert!(matches!(
            d.intraday_at("NOPE", ModelKind::Linear, friday_evening),
            Err(DashboardError::UnknownSymbol(_))
        ));
    }

    #[test]
    fn test_view_reports_last_request() {
        let mut d = dashboard();
        d.forecast_at(&request("MCB", 5), t0()).unwrap();
        let view = d.view_at(t0());
        assert_eq!(view.last_forecast.unwrap().symbol, "MCB");
        assert_eq!(view.cache.forecasts.valid_entries, 1);
        assert_eq!(view.cache.ttl_secs, 300);
    }

    #[test]
    fn test_upload_report() {
        let mut text = String::from("date,close\n");
        for day in 1..=20 {
            text.push_str(&format!("2025-06-{day:02},{}\n", 100 + day));
        }
        let series = read_upload("ticker.csv", text.as_bytes()).unwrap();
        let report = analyze_upload(&series, 5, ModelKind::Linear);
        assert_eq!(report.rows, 20);
        assert_eq!(report.forecast.as_ref().map(|f| f.len()), Some(5));
        assert!(report.forecast_note.is_none());

        let short = read_upload("t.csv", b"date,close\n2025-06-01,1\n2025-06-02,2\n").unwrap();
        let report = analyze_upload(&short, 5, ModelKind::Linear);
        assert!(report.forecast.is_none());
        assert!(report.forecast_note.unwrap().contains("not enough data"));
        assert_eq!(report.chart.data.len(), 1);
    }
}
