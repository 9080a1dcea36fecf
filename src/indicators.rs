//! Technical indicators over a close series, oldest first.
//!
//! Rolling indicators return one slot per input point; slots inside the
//! warm-up window are `None` so they serialize as gaps in a chart.

use serde::Serialize;
use statrs::statistics::Statistics;

pub fn sma(values: &[f64], window: usize) -> Vec<Option<f64>> {
    if window == 0 {
        return vec![None; values.len()];
    }
    let mut out = Vec::with_capacity(values.len());
    let mut sum = 0.0;
    for (i, v) in values.iter().enumerate() {
        sum += v;
        if i >= window {
            sum -= values[i - window];
        }
        out.push((i + 1 >= window).then(|| sum / window as f64));
    }
    out
}

/// Recursive EMA with `alpha = 2 / (span + 1)`, seeded at the first value.
pub fn ema(values: &[f64], span: usize) -> Vec<f64> {
    let alpha = 2.0 / (span.max(1) as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;
    for &v in values {
        let next = match prev {
            Some(p) => alpha * v + (1.0 - alpha) * p,
            None => v,
        };
        out.push(next);
        prev = Some(next);
    }
    out
}

/// RSI from simple rolling means of gains and losses.
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }
    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();
    for end in period..=deltas.len() {
        let window = &deltas[end - period..end];
        let gain = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss = -window.iter().filter(|d| **d < 0.0).sum::<f64>() / period as f64;
        out[end] = Some(if loss == 0.0 {
            if gain == 0.0 { 50.0 } else { 100.0 }
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        });
    }
    out
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct BollingerBands {
    pub middle: Vec<Option<f64>>,
    pub upper: Vec<Option<f64>>,
    pub lower: Vec<Option<f64>>,
}

pub fn bollinger(values: &[f64], period: usize, k: f64) -> BollingerBands {
    let middle = sma(values, period);
    let mut upper = vec![None; values.len()];
    let mut lower = vec![None; values.len()];
    if period >= 2 {
        for end in period..=values.len() {
            let window = &values[end - period..end];
            let std = window.iter().std_dev();
            if let Some(mid) = middle[end - 1] {
                upper[end - 1] = Some(mid + k * std);
                lower[end - 1] = Some(mid - k * std);
            }
        }
    }
    BollingerBands {
        middle,
        upper,
        lower,
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Macd {
    pub line: Vec<f64>,
    pub signal: Vec<f64>,
    pub histogram: Vec<f64>,
}

pub fn macd(values: &[f64]) -> Macd {
    let fast = ema(values, 12);
    let slow = ema(values, 26);
    let line: Vec<f64> = fast.iter().zip(&slow).map(|(f, s)| f - s).collect();
    let signal = ema(&line, 9);
    let histogram = line.iter().zip(&signal).map(|(l, s)| l - s).collect();
    Macd {
        line,
        signal,
        histogram,
    }
}

/// Latest readings for the analysis panel.
#[derive(Clone, Debug, Default, Serialize)]
pub struct IndicatorSummary {
    pub sma_5: Option<f64>,
    pub sma_10: Option<f64>,
    pub sma_20: Option<f64>,
    pub ema_10: Option<f64>,
    pub rsi_14: Option<f64>,
    pub bollinger_upper: Option<f64>,
    pub bollinger_lower: Option<f64>,
    pub macd: Option<f64>,
    pub macd_signal: Option<f64>,
}

impl IndicatorSummary {
    pub fn from_closes(closes: &[f64]) -> Self {
        let last_some = |v: Vec<Option<f64>>| v.last().copied().flatten();
        let bands = bollinger(closes, 20, 2.0);
        let m = macd(closes);
        Self {
            sma_5: last_some(sma(closes, 5)),
            sma_10: last_some(sma(closes, 10)),
            sma_20: last_some(sma(closes, 20)),
            ema_10: ema(closes, 10).last().copied(),
            rsi_14: last_some(rsi(closes, 14)),
            bollinger_upper: last_some(bands.upper),
            bollinger_lower: last_some(bands.lower),
            macd: m.line.last().copied(),
            macd_signal: m.signal.last().copied(),
        }
    }
}
