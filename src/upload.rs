//! Reads a user-supplied delimited text file or spreadsheet into a dated price series.

use crate::data::{Candle, StockData};
use crate::error::UploadError;
use calamine::{Data, Reader};
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::Serialize;
use std::io::Cursor;
use tracing::{debug, info};

const TEXT_EXTENSIONS: &[&str] = &["csv", "tsv", "txt"];
const WORKBOOK_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];
const DELIMITERS: &[u8] = b",\t;|";
const DATE_KEYWORDS: &[&str] = &["datetime", "timestamp", "date", "time"];
const PRICE_KEYWORDS: &[&str] = &["close", "price", "last", "value"];

// normalized header spellings accepted for the optional OHLCV columns
const OPEN_HEADERS: &[&str] = &["open", "open price", "opening price", "opening"];
const HIGH_HEADERS: &[&str] = &["high", "high price", "day high"];
const LOW_HEADERS: &[&str] = &["low", "low price", "day low"];
const VOLUME_HEADERS: &[&str] = &["volume", "vol", "total volume", "volume traded", "shares traded"];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%Y/%m/%d %H:%M",
    "%d/%m/%Y %H:%M:%S",
    "%d/%m/%Y %H:%M",
    "%Y.%m.%d %H:%M",
];
const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%d/%m/%Y", "%m/%d/%Y", "%d-%m-%Y", "%d-%b-%Y", "%d %b %Y", "%b %d, %Y",
    "%Y.%m.%d", "%Y%m%d",
];

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct UploadedPoint {
    pub timestamp: DateTime<Utc>,
    pub close: f64,
    pub open: Option<f64>,
    pub high: Option<f64>,
    pub low: Option<f64>,
    pub volume: Option<f64>,
}

#[derive(Clone, Debug, Serialize)]
pub struct UploadedSeries {
    pub file_name: String,
    pub date_column: String,
    pub price_column: String,
    /// Field separator of a text upload; `None` for spreadsheets.
    pub delimiter: Option<char>,
    /// Worksheet the rows came from.
    pub sheet: Option<String>,
    /// False when the first row was data and columns were named `Column_N`.
    pub has_header: bool,
    pub skipped_rows: usize,
    pub points: Vec<UploadedPoint>,
}

impl UploadedSeries {
    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn close_series(&self) -> Vec<(DateTime<Utc>, f64)> {
        self.points.iter().map(|p| (p.timestamp, p.close)).collect()
    }

    /// Symbol-like label derived from the file name.
    pub fn label(&self) -> String {
        self.file_name
            .rsplit_once('.')
            .map(|(stem, _)| stem)
            .unwrap_or(self.file_name.as_str())
            .to_uppercase()
    }

    /// Candles, when every row carries open/high/low.
    pub fn to_stock_data(&self) -> Option<StockData> {
        let history = self
            .points
            .iter()
            .map(|p| {
                Some(Candle {
                    date: p.timestamp,
                    open: p.open?,
                    high: p.high?,
                    low: p.low?,
                    close: p.close,
                    volume: p.volume.unwrap_or(0.0),
                })
            })
            .collect::<Option<Vec<_>>>()?;
        Some(StockData {
            symbol: self.label(),
            history,
        })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum FileKind {
    Text,
    Workbook,
}

/// Cells of one upload, header split off, whatever the source format.
#[derive(Debug)]
struct Table {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    has_header: bool,
    delimiter: Option<char>,
    sheet: Option<String>,
}

pub fn read_upload(file_name: &str, bytes: &[u8]) -> Result<UploadedSeries, UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    let table = match file_kind(file_name)? {
        FileKind::Text => read_delimited(bytes)?,
        FileKind::Workbook => read_workbook(bytes)?,
    };
    parse_table(file_name, table)
}

fn parse_table(file_name: &str, table: Table) -> Result<UploadedSeries, UploadError> {
    let Table {
        headers,
        rows,
        has_header,
        delimiter,
        sheet,
    } = table;

    let lowered: Vec<String> = headers.iter().map(|h| h.to_lowercase()).collect();
    let date_col = find_date_column(&lowered, &rows).ok_or(UploadError::NoUsableRows)?;
    let price_col = find_price_column(&lowered, &rows, date_col).ok_or(UploadError::NoPriceColumn)?;

    let mut taken = vec![date_col, price_col];
    let mut optional_column = |names: &[&str]| {
        let col = find_optional_column(&lowered, names, &taken);
        taken.extend(col);
        col
    };
    let open_col = optional_column(OPEN_HEADERS);
    let high_col = optional_column(HIGH_HEADERS);
    let low_col = optional_column(LOW_HEADERS);
    let volume_col = optional_column(VOLUME_HEADERS);

    let mut points = Vec::with_capacity(rows.len());
    let mut skipped_rows = 0;
    for row in &rows {
        let cell = |col: usize| row.get(col).map(String::as_str);
        let parsed = cell(date_col)
            .and_then(parse_timestamp)
            .zip(cell(price_col).and_then(parse_number));
        let Some((timestamp, close)) = parsed else {
            skipped_rows += 1;
            continue;
        };
        let optional = |col: Option<usize>| col.and_then(cell).and_then(parse_number);
        points.push(UploadedPoint {
            timestamp,
            close,
            open: optional(open_col),
            high: optional(high_col),
            low: optional(low_col),
            volume: optional(volume_col),
        });
    }

    if points.is_empty() {
        return Err(UploadError::NoUsableRows);
    }
    points.sort_by_key(|p| p.timestamp);

    debug!(
        file = file_name,
        rows = points.len(),
        skipped = skipped_rows,
        "Parsed upload"
    );

    Ok(UploadedSeries {
        file_name: file_name.to_string(),
        date_column: headers[date_col].clone(),
        price_column: headers[price_col].clone(),
        delimiter,
        sheet,
        has_header,
        skipped_rows,
        points,
    })
}

/// Files without an extension are treated as text.
fn file_kind(file_name: &str) -> Result<FileKind, UploadError> {
    let Some((_, ext)) = file_name.rsplit_once('.') else {
        return Ok(FileKind::Text);
    };
    let ext = ext.to_ascii_lowercase();
    if TEXT_EXTENSIONS.contains(&ext.as_str()) {
        Ok(FileKind::Text)
    } else if WORKBOOK_EXTENSIONS.contains(&ext.as_str()) {
        Ok(FileKind::Workbook)
    } else {
        Err(UploadError::UnsupportedFormat { extension: ext })
    }
}

fn read_delimited(bytes: &[u8]) -> Result<Table, UploadError> {
    let text = decode(bytes)?;
    if text.trim().is_empty() {
        return Err(UploadError::Empty);
    }

    let delimiter = detect_delimiter(&text);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let records = reader
        .records()
        .map(|r| r.map(|rec| rec.iter().map(|c| c.trim_matches('"').to_string()).collect()))
        .collect::<Result<Vec<Vec<String>>, _>>()
        .map_err(|e| UploadError::Malformed {
            reason: e.to_string(),
        })?;

    let mut table = split_header(records).ok_or(UploadError::Empty)?;
    table.delimiter = Some(delimiter as char);
    Ok(table)
}

/// First worksheet that has any cells.
fn read_workbook(bytes: &[u8]) -> Result<Table, UploadError> {
    let mut workbook =
        calamine::open_workbook_auto_from_rs(Cursor::new(bytes)).map_err(|e| UploadError::Workbook {
            reason: e.to_string(),
        })?;

    for name in workbook.sheet_names() {
        let range = workbook
            .worksheet_range(&name)
            .map_err(|e| UploadError::Workbook {
                reason: e.to_string(),
            })?;
        let records: Vec<Vec<String>> = range
            .rows()
            .map(|row| row.iter().map(cell_text).collect::<Vec<String>>())
            .filter(|row| row.iter().any(|c| !c.is_empty()))
            .collect();
        if let Some(mut table) = split_header(records) {
            debug!(sheet = %name, rows = table.rows.len(), "Reading worksheet");
            table.sheet = Some(name);
            return Ok(table);
        }
    }
    Err(UploadError::Empty)
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty | Data::Error(_) => String::new(),
        Data::String(s) | Data::DateTimeIso(s) | Data::DurationIso(s) => s.trim().to_string(),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        Data::DateTime(dt) => dt
            .as_datetime()
            .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default(),
    }
}

/// Treats the first record as the header unless it already looks like a data row.
fn split_header(mut records: Vec<Vec<String>>) -> Option<Table> {
    if records.is_empty() {
        return None;
    }
    let first = &records[0];
    let has_header = !looks_like_data_row(first);
    let headers = if has_header {
        records.remove(0)
    } else {
        let width = records.iter().map(Vec::len).max().unwrap_or(0);
        info!(columns = width, "No header row detected, naming columns Column_1..");
        (1..=width).map(|i| format!("Column_{i}")).collect()
    };
    Some(Table {
        headers,
        rows: records,
        has_header,
        delimiter: None,
        sheet: None,
    })
}

/// No cell names a known column, one cell is a timestamp and another a number.
fn looks_like_data_row(row: &[String]) -> bool {
    let names_column = row.iter().any(|c| {
        let c = c.to_lowercase();
        DATE_KEYWORDS.iter().chain(PRICE_KEYWORDS).any(|kw| c.contains(kw))
    });
    if names_column {
        return false;
    }
    let Some(date_idx) = row.iter().position(|c| parse_timestamp(c).is_some()) else {
        return false;
    };
    row.iter()
        .enumerate()
        .any(|(i, c)| i != date_idx && parse_number(c).is_some())
}

/// UTF-8 (BOM stripped) with a Latin-1 fallback. NUL bytes mean binary content.
fn decode(bytes: &[u8]) -> Result<String, UploadError> {
    if bytes.is_empty() {
        return Err(UploadError::Empty);
    }
    if bytes.contains(&0) {
        return Err(UploadError::Encoding);
    }
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    Ok(match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => bytes.iter().map(|b| *b as char).collect(),
    })
}

/// Picks the candidate that occurs most often in the header line.
fn detect_delimiter(text: &str) -> u8 {
    let header = text.lines().find(|l| !l.trim().is_empty()).unwrap_or("");
    DELIMITERS
        .iter()
        .copied()
        .map(|d| (d, header.bytes().filter(|b| *b == d).count()))
        .filter(|(_, n)| *n > 0)
        .max_by_key(|(_, n)| *n)
        .map(|(d, _)| d)
        .unwrap_or(b',')
}

fn find_date_column(headers: &[String], rows: &[Vec<String>]) -> Option<usize> {
    for kw in DATE_KEYWORDS {
        if let Some(i) = headers.iter().position(|h| h.contains(kw)) {
            return Some(i);
        }
    }
    // unnamed date column: accept the first one whose values parse
    (0..headers.len()).find(|&i| mostly(rows, i, |s| parse_timestamp(s).is_some()))
}

fn find_price_column(headers: &[String], rows: &[Vec<String>], date_col: usize) -> Option<usize> {
    for kw in PRICE_KEYWORDS {
        let hit = headers
            .iter()
            .enumerate()
            .filter(|(i, h)| *i != date_col && h.contains(kw))
            // "close" beats "adj close"
            .min_by_key(|(_, h)| h.len());
        if let Some((i, _)) = hit {
            return Some(i);
        }
    }
    (0..headers.len())
        .filter(|i| *i != date_col)
        .find(|&i| mostly(rows, i, |s| parse_number(s).is_some()))
}

/// First free column whose normalized header is one of `names`, earlier names first.
fn find_optional_column(headers: &[String], names: &[&str], taken: &[usize]) -> Option<usize> {
    let normalized: Vec<String> = headers.iter().map(|h| normalize_header(h)).collect();
    names.iter().find_map(|name| {
        (0..normalized.len()).find(|i| !taken.contains(i) && normalized[*i] == *name)
    })
}

/// Lowercase words joined by single spaces: `"Vol."` becomes `"vol"`.
fn normalize_header(header: &str) -> String {
    header
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// More than half of the non-empty cells in `col` satisfy `pred`.
fn mostly(rows: &[Vec<String>], col: usize, pred: impl Fn(&str) -> bool) -> bool {
    let cells: Vec<&str> = rows
        .iter()
        .filter_map(|r| r.get(col))
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    !cells.is_empty() && cells.iter().filter(|s| pred(s)).count() * 2 > cells.len()
}

/// Accepts `1,234.50`, `"95.5"`, `12.5%` and surrounding spaces.
pub fn parse_number(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| !matches!(c, '"' | ',' | ' ' | '%'))
        .collect();
    if cleaned.is_empty() {
        return None;
    }
    cleaned.parse::<f64>().ok().filter(|v| v.is_finite())
}

pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let s = raw.trim().trim_matches('"');
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    for fmt in DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(dt.and_utc());
        }
    }
    for fmt in DATE_FORMATS {
        if let Ok(d) = NaiveDate::parse_from_str(s, fmt) {
            return d.and_hms_opt(0, 0, 0).map(|dt| dt.and_utc());
        }
    }
    None
}
