//! Plotly-compatible chart specs. The browser hands `data` and `layout`
//! straight to `Plotly.react`, so field names follow Plotly's schema.

use crate::data::{Candle, StockData};
use crate::forecast::ForecastSeries;
use crate::indicators::sma;
use chrono::{DateTime, Utc};
use serde::Serialize;

const PRIMARY: &str = "#1f77b4";
const SECONDARY: &str = "#ff7f0e";
const UP: &str = "green";
const DOWN: &str = "red";
const BAND_FILL: &str = "rgba(214, 39, 40, 0.2)";

#[derive(Clone, Debug, Default, Serialize)]
pub struct Line {
    pub color: String,
    pub width: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dash: Option<&'static str>,
}

impl Line {
    fn new(color: &str, width: f64) -> Self {
        Self {
            color: color.to_string(),
            width,
            dash: None,
        }
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct Marker {
    pub color: Vec<&'static str>,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Trace {
    Scatter {
        x: Vec<DateTime<Utc>>,
        y: Vec<Option<f64>>,
        name: String,
        mode: &'static str,
        line: Line,
        #[serde(skip_serializing_if = "Option::is_none")]
        fill: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        fillcolor: Option<&'static str>,
        #[serde(skip_serializing_if = "Option::is_none")]
        showlegend: Option<bool>,
    },
    Candlestick {
        x: Vec<DateTime<Utc>>,
        open: Vec<f64>,
        high: Vec<f64>,
        low: Vec<f64>,
        close: Vec<f64>,
        name: String,
    },
    Bar {
        x: Vec<DateTime<Utc>>,
        y: Vec<f64>,
        name: String,
        marker: Marker,
        yaxis: &'static str,
    },
}

impl Trace {
    fn line(name: &str, x: Vec<DateTime<Utc>>, y: Vec<Option<f64>>, line: Line) -> Self {
        Trace::Scatter {
            x,
            y,
            name: name.to_string(),
            mode: "lines",
            line,
            fill: None,
            fillcolor: None,
            showlegend: None,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Title {
    pub text: String,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Axis {
    pub title: Title,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub domain: Option<[f64; 2]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rangeslider: Option<RangeSlider>,
}

impl Axis {
    fn titled(text: &str) -> Self {
        Self {
            title: Title {
                text: text.to_string(),
            },
            ..Default::default()
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct RangeSlider {
    pub visible: bool,
}

/// Vertical marker line, used to separate history from forecast.
#[derive(Clone, Debug, Serialize)]
pub struct Shape {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub x0: DateTime<Utc>,
    pub x1: DateTime<Utc>,
    pub yref: &'static str,
    pub y0: f64,
    pub y1: f64,
    pub line: Line,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct Layout {
    pub title: Title,
    pub xaxis: Axis,
    pub yaxis: Axis,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub yaxis2: Option<Axis>,
    pub height: u32,
    pub hovermode: &'static str,
    pub template: &'static str,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub shapes: Vec<Shape>,
}

#[derive(Clone, Debug, Default, Serialize)]
pub struct ChartSpec {
    pub data: Vec<Trace>,
    pub layout: Layout,
}

fn base_layout(title: &str, y_title: &str, height: u32) -> Layout {
    Layout {
        title: Title {
            text: title.to_string(),
        },
        xaxis: Axis::titled("Date"),
        yaxis: Axis::titled(y_title),
        height,
        hovermode: "x unified",
        template: "plotly_white",
        ..Default::default()
    }
}

fn volume_colors(history: &[Candle]) -> Vec<&'static str> {
    history
        .iter()
        .map(|c| if c.close < c.open { DOWN } else { UP })
        .collect()
}

/// Close line with MA5/MA10 overlays over a volume panel.
pub fn price_chart(data: &StockData, title: &str) -> ChartSpec {
    let x: Vec<DateTime<Utc>> = data.history.iter().map(|c| c.date).collect();
    let closes = data.closes();

    let mut traces = vec![Trace::line(
        "Price",
        x.clone(),
        closes.iter().copied().map(Some).collect(),
        Line::new(PRIMARY, 2.0),
    )];
    if closes.len() >= 5 {
        traces.push(Trace::line("MA5", x.clone(), sma(&closes, 5), Line::new(PRIMARY, 1.0)));
    }
    if closes.len() >= 10 {
        traces.push(Trace::line("MA10", x.clone(), sma(&closes, 10), Line::new(SECONDARY, 1.0)));
    }
    traces.push(Trace::Bar {
        x,
        y: data.history.iter().map(|c| c.volume).collect(),
        name: "Volume".to_string(),
        marker: Marker {
            color: volume_colors(&data.history),
        },
        yaxis: "y2",
    });

    let mut layout = base_layout(title, "Price (PKR)", 600);
    layout.yaxis.domain = Some([0.3, 1.0]);
    layout.yaxis2 = Some(Axis {
        domain: Some([0.0, 0.22]),
        ..Axis::titled("Volume")
    });
    ChartSpec {
        data: traces,
        layout,
    }
}

pub fn candlestick_chart(data: &StockData, title: &str) -> ChartSpec {
    let h = &data.history;
    let trace = Trace::Candlestick {
        x: h.iter().map(|c| c.date).collect(),
        open: h.iter().map(|c| c.open).collect(),
        high: h.iter().map(|c| c.high).collect(),
        low: h.iter().map(|c| c.low).collect(),
        close: h.iter().map(|c| c.close).collect(),
        name: data.symbol.clone(),
    };
    let mut layout = base_layout(title, "Price (PKR)", 500);
    layout.xaxis.rangeslider = Some(RangeSlider { visible: false });
    ChartSpec {
        data: vec![trace],
        layout,
    }
}

/// Plain line chart for a series without OHLC columns.
pub fn line_chart(series: &[(DateTime<Utc>, f64)], name: &str, title: &str) -> ChartSpec {
    ChartSpec {
        data: vec![Trace::line(
            name,
            series.iter().map(|(t, _)| *t).collect(),
            series.iter().map(|(_, v)| Some(*v)).collect(),
            Line::new(PRIMARY, 2.0),
        )],
        layout: base_layout(title, "Price", 500),
    }
}

/// History, forecast line and a shaded confidence band.
pub fn forecast_chart(
    history: &[(DateTime<Utc>, f64)],
    forecast: &ForecastSeries,
    title: &str,
) -> ChartSpec {
    let fx: Vec<DateTime<Utc>> = forecast.points.iter().map(|p| p.timestamp).collect();

    let mut traces = vec![
        Trace::line(
            "Historical Prices",
            history.iter().map(|(t, _)| *t).collect(),
            history.iter().map(|(_, v)| Some(*v)).collect(),
            Line::new(PRIMARY, 3.0),
        ),
        Trace::line(
            &format!("Forecast ({})", forecast.model),
            fx.clone(),
            forecast.points.iter().map(|p| Some(p.predicted_value)).collect(),
            Line::new(SECONDARY, 3.0),
        ),
    ];

    // upper edge first so the lower trace fills up to it
    traces.push(Trace::Scatter {
        x: fx.clone(),
        y: forecast.points.iter().map(|p| Some(p.upper_bound)).collect(),
        name: "Upper Bound".to_string(),
        mode: "lines",
        line: Line::new("rgba(0,0,0,0)", 0.0),
        fill: None,
        fillcolor: None,
        showlegend: Some(false),
    });
    traces.push(Trace::Scatter {
        x: fx,
        y: forecast.points.iter().map(|p| Some(p.lower_bound)).collect(),
        name: "Confidence Interval".to_string(),
        mode: "lines",
        line: Line::new("rgba(0,0,0,0)", 0.0),
        fill: Some("tonexty"),
        fillcolor: Some(BAND_FILL),
        showlegend: None,
    });

    let mut layout = base_layout(title, "Price (PKR)", 500);
    if let Some(first) = forecast.points.first() {
        layout.shapes.push(Shape {
            kind: "line",
            x0: first.timestamp,
            x1: first.timestamp,
            yref: "paper",
            y0: 0.0,
            y1: 1.0,
            line: Line {
                dash: Some("dash"),
                ..Line::new("gray", 1.0)
            },
        });
    }
    ChartSpec {
        data: traces,
        layout,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::forecast::{LinearTrend, forecast};
    use crate::market::PSX_SYMBOLS;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    fn sample(days: usize) -> StockData {
        let mut rng = StdRng::seed_from_u64(1);
        StockData::simulate(&PSX_SYMBOLS[8], 145.0, days, Utc::now(), &mut rng)
    }

    #[test]
    fn test_price_chart_traces() {
        let chart = price_chart(&sample(30), "HBL");
        let json = serde_json::to_value(&chart).unwrap();
        let names: Vec<&str> = json["data"]
            .as_array()
            .unwrap()
            .iter()
            .map(|t| t["name"].as_str().unwrap())
            .collect();
        assert_eq!(names, vec!["Price", "MA5", "MA10", "Volume"]);

        assert_eq!(json["data"][0]["type"], "scatter");
        assert_eq!(json["data"][3]["type"], "bar");
        assert_eq!(json["data"][3]["yaxis"], "y2");
        assert_eq!(json["data"][1]["y"][0], serde_json::Value::Null);
        assert_eq!(json["layout"]["title"]["text"], "HBL");
    }

    #[test]
    fn test_short_history_skips_moving_averages() {
        let chart = price_chart(&sample(4), "x");
        assert_eq!(chart.data.len(), 2);
    }

    #[test]
    fn test_volume_colors_follow_direction() {
        let data = sample(20);
        let colors = volume_colors(&data.history);
        for (c, color) in data.history.iter().zip(colors) {
            assert_eq!(color, if c.close < c.open { "red" } else { "green" });
        }
    }

    #[test]
    fn test_candlestick_serializes() {
        let json = serde_json::to_value(candlestick_chart(&sample(10), "c")).unwrap();
        assert_eq!(json["data"][0]["type"], "candlestick");
        assert_eq!(json["data"][0]["close"].as_array().unwrap().len(), 10);
        assert_eq!(json["layout"]["xaxis"]["rangeslider"]["visible"], false);
    }

    #[test]
    fn test_forecast_chart_band() {
        let data = sample(30);
        let series = forecast(&LinearTrend::default(), &data.close_series(), 7).unwrap();
        let chart = forecast_chart(&data.close_series(), &series, "HBL forecast");
        assert_eq!(chart.data.len(), 4);
        assert_eq!(chart.layout.shapes.len(), 1);

        let json = serde_json::to_value(&chart).unwrap();
        assert_eq!(json["data"][3]["fill"], "tonexty");
        assert_eq!(json["data"][1]["x"].as_array().unwrap().len(), 7);
    }
}
