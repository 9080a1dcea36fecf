use chrono::{DateTime, Datelike, NaiveDate, NaiveTime, Utc, Weekday};
use chrono_tz::Asia::Karachi;
use chrono_tz::Tz;
use serde::Serialize;

/// One listing in the static PSX price table.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SymbolRecord {
    pub ticker: &'static str,
    pub base_price: f64,
    pub display_name: &'static str,
    pub sector: &'static str,
}

const fn rec(
    ticker: &'static str,
    base_price: f64,
    display_name: &'static str,
    sector: &'static str,
) -> SymbolRecord {
    SymbolRecord {
        ticker,
        base_price,
        display_name,
        sector,
    }
}

/// Reference prices in PKR. These are hand-maintained approximations, not exchange data.
pub const PSX_SYMBOLS: &[SymbolRecord] = &[
    rec("KSE-100", 132_920.00, "KSE-100 Index", "Index"),
    rec("OGDC", 195.50, "Oil & Gas Development Company Limited", "Oil & Gas"),
    rec("PPL", 135.75, "Pakistan Petroleum Limited", "Oil & Gas"),
    rec("MARI", 1950.50, "Mari Petroleum Company Limited", "Oil & Gas"),
    rec("PSO", 245.25, "Pakistan State Oil Company Limited", "Oil & Gas"),
    rec("APL", 1250.50, "Attock Petroleum Limited", "Oil & Gas"),
    rec("SNGP", 55.50, "Sui Northern Gas Pipelines Limited", "Oil & Gas"),
    rec("SSGC", 22.75, "Sui Southern Gas Company Limited", "Oil & Gas"),
    rec("HBL", 145.75, "Habib Bank Limited", "Banking"),
    rec("MCB", 275.50, "MCB Bank Limited", "Banking"),
    rec("UBL", 195.25, "United Bank Limited", "Banking"),
    rec("NBP", 48.25, "National Bank of Pakistan", "Banking"),
    rec("MEBL", 195.50, "Meezan Bank Limited", "Banking"),
    rec("BAFL", 350.75, "Bank Alfalah Limited", "Banking"),
    rec("BAHL", 65.50, "Bank Al Habib Limited", "Banking"),
    rec("AKBL", 195.50, "Askari Bank Limited", "Banking"),
    rec("LUCK", 1150.00, "Lucky Cement Limited", "Cement"),
    rec("FCCL", 105.50, "Fauji Cement Company Limited", "Cement"),
    rec("CHCC", 185.25, "Cherat Cement Company Limited", "Cement"),
    rec("DGKC", 125.75, "D.G. Khan Cement Company Limited", "Cement"),
    rec("ENGRO", 315.75, "Engro Corporation Limited", "Fertilizer"),
    rec("FFC", 145.25, "Fauji Fertilizer Company Limited", "Fertilizer"),
    rec("FFBL", 285.25, "Fauji Fertilizer Bin Qasim Limited", "Fertilizer"),
    rec("HUBC", 125.75, "Hub Power Company Limited", "Power & Energy"),
    rec("KAPCO", 45.75, "Kot Addu Power Company Limited", "Power & Energy"),
    rec("TRG", 145.25, "TRG Pakistan Limited", "Technology"),
    rec("AIRLINK", 145.75, "Airlink Communication Limited", "Technology"),
    rec("ABOT", 855.25, "Abbott Laboratories (Pakistan) Limited", "Pharmaceuticals"),
    rec("AGP", 95.50, "AGP Limited", "Pharmaceuticals"),
    rec("ASTL", 185.25, "Agha Steel Industries Limited", "Engineering"),
];

/// Static lookup over the tracked listings.
#[derive(Clone, Debug)]
pub struct PriceTable {
    records: Vec<SymbolRecord>,
}

impl Default for PriceTable {
    fn default() -> Self {
        Self::new(PSX_SYMBOLS.to_vec())
    }
}

impl PriceTable {
    pub fn new(records: Vec<SymbolRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[SymbolRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Case-insensitive ticker lookup.
    pub fn get(&self, ticker: &str) -> Option<&SymbolRecord> {
        let ticker = ticker.trim();
        self.records
            .iter()
            .find(|r| r.ticker.eq_ignore_ascii_case(ticker))
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct MarketStatus {
    pub open: bool,
    pub local_time: String,
    pub message: String,
}

const MARKET_OPEN: (u32, u32) = (9, 30);
const MARKET_CLOSE: (u32, u32) = (15, 30);

/// Opening and closing time of a PSX session, Pakistan time.
pub fn session_bounds() -> Option<(NaiveTime, NaiveTime)> {
    Some((
        NaiveTime::from_hms_opt(MARKET_OPEN.0, MARKET_OPEN.1, 0)?,
        NaiveTime::from_hms_opt(MARKET_CLOSE.0, MARKET_CLOSE.1, 0)?,
    ))
}

/// Weekdays only; exchange holidays are not modelled.
pub fn is_trading_day(date: NaiveDate) -> bool {
    !matches!(date.weekday(), Weekday::Sat | Weekday::Sun)
}

/// PSX trades Monday to Friday, 09:30-15:30 Pakistan time, bounds inclusive.
pub fn is_market_open_at(local: &DateTime<Tz>) -> bool {
    if !is_trading_day(local.date_naive()) {
        return false;
    }
    let Some((open, close)) = session_bounds() else {
        return false;
    };
    let t = local.time();
    t >= open && t <= close
}

pub fn market_status_at(local: &DateTime<Tz>) -> MarketStatus {
    let open = is_market_open_at(local);
    let message = if open {
        "Market open (simulated prices)".to_string()
    } else {
        "Market closed: PSX trades Mon-Fri, 09:30-15:30 PKT. Simulated prices still update.".to_string()
    };
    MarketStatus {
        open,
        local_time: local.format("%Y-%m-%d %H:%M:%S %Z").to_string(),
        message,
    }
}

/// Status at a UTC instant, evaluated in Asia/Karachi.
pub fn market_status(now: DateTime<Utc>) -> MarketStatus {
    market_status_at(&now.with_timezone(&Karachi))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_table_is_well_formed() {
        let table = PriceTable::default();
        assert!(!table.records().is_empty());
        for r in table.records() {
            assert!(r.base_price > 0.0, "{} has non-positive base price", r.ticker);
            assert!(!r.display_name.is_empty());
            assert!(!r.sector.is_empty());
        }
        let mut tickers: Vec<_> = table.records().iter().map(|r| r.ticker).collect();
        tickers.sort();
        tickers.dedup();
        assert_eq!(tickers.len(), table.len(), "tickers must be unique");
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let table = PriceTable::default();
        assert_eq!(table.get(" hbl ").map(|r| r.ticker), Some("HBL"));
        assert!(table.get("NOPE").is_none());
    }

    #[test]
    fn test_market_hours() {
        // 2025-07-14 is a Monday.
        let open = Karachi.with_ymd_and_hms(2025, 7, 14, 10, 0, 0).unwrap();
        let early = Karachi.with_ymd_and_hms(2025, 7, 14, 9, 29, 59).unwrap();
        let close_edge = Karachi.with_ymd_and_hms(2025, 7, 14, 15, 30, 0).unwrap();
        let late = Karachi.with_ymd_and_hms(2025, 7, 14, 15, 30, 1).unwrap();
        let saturday = Karachi.with_ymd_and_hms(2025, 7, 19, 11, 0, 0).unwrap();

        assert!(is_market_open_at(&open));
        assert!(!is_market_open_at(&early));
        assert!(is_market_open_at(&close_edge));
        assert!(!is_market_open_at(&late));
        assert!(!is_market_open_at(&saturday));
        assert!(!market_status_at(&saturday).open);
        // 05:00 UTC is 10:00 in Karachi
        assert!(market_status(Utc.with_ymd_and_hms(2025, 7, 14, 5, 0, 0).unwrap()).open);
    }
}
