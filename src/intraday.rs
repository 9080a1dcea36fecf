//! Five-minute bars for the PSX trading session and a forecast of the slots still to come.
//!
//! Sessions run 09:30-15:30 Asia/Karachi on weekdays. Before the open, after the close and
//! over weekends the last completed session is shown and the next one is forecast.

use crate::config::{INTRADAY_CONTEXT_BARS, INTRADAY_STEP_MINUTES};
use crate::data::{BarProfile, Candle, simulate_candles};
use crate::error::ForecastError;
use crate::forecast::{self, ForecastSeries, Forecaster};
use crate::market::{self, SymbolRecord};
use chrono::{DateTime, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use chrono_tz::Asia::Karachi;
use chrono_tz::Tz;
use rand::Rng;
use serde::Serialize;
use std::fmt;

const MIDDAY: (u32, u32) = (12, 0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    PreOpen,
    /// 09:30 up to noon.
    Morning,
    /// Noon to the 15:30 close, inclusive.
    Afternoon,
    Closed,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::PreOpen => write!(f, "Pre-open"),
            SessionPhase::Morning => write!(f, "Morning session"),
            SessionPhase::Afternoon => write!(f, "Afternoon session"),
            SessionPhase::Closed => write!(f, "Closed"),
        }
    }
}

pub fn session_phase(local: &DateTime<Tz>) -> SessionPhase {
    let (Some((open, close)), Some(midday)) = (
        market::session_bounds(),
        NaiveTime::from_hms_opt(MIDDAY.0, MIDDAY.1, 0),
    ) else {
        return SessionPhase::Closed;
    };
    if !market::is_trading_day(local.date_naive()) {
        return SessionPhase::Closed;
    }
    let t = local.time();
    if t < open {
        SessionPhase::PreOpen
    } else if t < midday {
        SessionPhase::Morning
    } else if t <= close {
        SessionPhase::Afternoon
    } else {
        SessionPhase::Closed
    }
}

/// Bar timestamps of one trading day, open to close inclusive.
pub fn session_slots(date: NaiveDate) -> Vec<DateTime<Utc>> {
    let Some((open, close)) = market::session_bounds() else {
        return Vec::new();
    };
    let step = Duration::minutes(INTRADAY_STEP_MINUTES);
    let mut slots = Vec::new();
    let mut t = open;
    while t <= close {
        if let Some(local) = Karachi.from_local_datetime(&date.and_time(t)).single() {
            slots.push(local.with_timezone(&Utc));
        }
        t += step;
    }
    slots
}

fn previous_trading_day(date: NaiveDate) -> Option<NaiveDate> {
    let mut d = date.pred_opt()?;
    while !market::is_trading_day(d) {
        d = d.pred_opt()?;
    }
    Some(d)
}

fn next_trading_day(date: NaiveDate) -> Option<NaiveDate> {
    let mut d = date.succ_opt()?;
    while !market::is_trading_day(d) {
        d = d.succ_opt()?;
    }
    Some(d)
}

/// Which session is shown at an instant and which slots the forecast covers.
#[derive(Clone, Debug, PartialEq)]
pub struct SessionPlan {
    pub phase: SessionPhase,
    pub session_date: NaiveDate,
    /// Session whose last hour precedes the shown bars.
    pub context_date: NaiveDate,
    /// Slots of `session_date` that already have a bar.
    pub elapsed: Vec<DateTime<Utc>>,
    pub forecast_date: NaiveDate,
    /// Slots the forecast fills, in order.
    pub remaining: Vec<DateTime<Utc>>,
}

pub fn plan_session(now: DateTime<Utc>) -> Option<SessionPlan> {
    let local = now.with_timezone(&Karachi);
    let today = local.date_naive();
    let phase = session_phase(&local);

    let session_date = match phase {
        SessionPhase::Morning | SessionPhase::Afternoon => today,
        SessionPhase::Closed if market::is_trading_day(today) => today,
        SessionPhase::PreOpen | SessionPhase::Closed => previous_trading_day(today)?,
    };

    let (elapsed, mut remaining): (Vec<_>, Vec<_>) = session_slots(session_date)
        .into_iter()
        .partition(|slot| *slot <= now);
    let mut forecast_date = session_date;
    if remaining.is_empty() {
        forecast_date = next_trading_day(session_date)?;
        remaining = session_slots(forecast_date);
    }

    Some(SessionPlan {
        phase,
        session_date,
        context_date: previous_trading_day(session_date)?,
        elapsed,
        forecast_date,
        remaining,
    })
}

/// Prior-session context bars followed by the elapsed bars of the planned
/// session. The last close equals `current_price`.
pub fn simulate_session<R: Rng + ?Sized>(
    record: &SymbolRecord,
    current_price: f64,
    plan: &SessionPlan,
    rng: &mut R,
) -> Vec<Candle> {
    let context = session_slots(plan.context_date);
    let tail = context.len().saturating_sub(INTRADAY_CONTEXT_BARS);
    let stamps: Vec<DateTime<Utc>> = context[tail..].iter().chain(&plan.elapsed).copied().collect();
    let profile = BarProfile::intraday(record, session_slots(plan.session_date).len());
    simulate_candles(current_price, &stamps, &profile, rng)
}

/// Forecast over `plan.remaining`, one point per session slot.
pub fn forecast_session(
    model: &dyn Forecaster,
    bars: &[Candle],
    plan: &SessionPlan,
) -> Result<ForecastSeries, ForecastError> {
    let history: Vec<(DateTime<Utc>, f64)> = bars.iter().map(|c| (c.date, c.close)).collect();
    let mut series = forecast::forecast(model, &history, plan.remaining.len())?;
    // the adapter steps on from the last bar; slots skip the overnight gap
    for (point, slot) in series.points.iter_mut().zip(&plan.remaining) {
        point.timestamp = *slot;
    }
    Ok(series)
}
