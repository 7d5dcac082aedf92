//! `yahoo` source: daily bars from Yahoo Finance's v8 chart API.
//!
//! One request per symbol, no retries. Each response is stored in the
//! bundle's download cache before it is parsed, so a failed ingestion can be
//! rerun without fetching the symbols that already succeeded.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes; a response that no longer matches surfaces as an ingest error.

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::Path;
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use serde::Deserialize;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

use crate::artifact::{Adjustments, Asset, Bar, Dividend, Split};
use crate::calendar::SessionRange;
use crate::error::IngestError;
use crate::pipeline::{IngestContext, IngestRoutine};

/// Variable holding the comma-separated symbol list when the source has none
/// configured.
pub const YAHOO_SYMBOLS_ENV_VAR: &str = "YAHOO_SYMBOLS";

const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    #[serde(default)]
    meta: Option<ChartMeta>,
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
    #[serde(default)]
    events: Option<ChartEvents>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ChartMeta {
    exchange_name: Option<String>,
    long_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    open: Vec<Option<f64>>,
    high: Vec<Option<f64>>,
    low: Vec<Option<f64>>,
    close: Vec<Option<f64>>,
    volume: Vec<Option<u64>>,
}

#[derive(Debug, Default, Deserialize)]
struct ChartEvents {
    #[serde(default)]
    dividends: HashMap<String, DividendEvent>,
    #[serde(default)]
    splits: HashMap<String, SplitEvent>,
}

#[derive(Debug, Deserialize)]
struct DividendEvent {
    amount: f64,
    date: i64,
}

#[derive(Debug, Deserialize)]
struct SplitEvent {
    date: i64,
    numerator: f64,
    denominator: f64,
}

/// One symbol's parsed chart.
#[derive(Debug, Default)]
struct SymbolChart {
    exchange: Option<String>,
    name: Option<String>,
    bars: Vec<Bar>,
    dividends: Vec<(NaiveDate, f64)>,
    splits: Vec<(NaiveDate, f64)>,
}

fn date_of(ts: i64) -> Result<NaiveDate, IngestError> {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.naive_utc().date())
        .ok_or_else(|| IngestError::Source(format!("invalid timestamp: {ts}")))
}

/// Build the chart API URL for a symbol and session range.
fn chart_url(symbol: &str, start: NaiveDate, end: NaiveDate) -> String {
    let start_ts = start.and_time(NaiveTime::default()).and_utc().timestamp();
    let end_ts = end
        .succ_opt()
        .unwrap_or(end)
        .and_time(NaiveTime::default())
        .and_utc()
        .timestamp();
    format!(
        "https://query2.finance.yahoo.com/v8/finance/chart/{symbol}\
         ?period1={start_ts}&period2={end_ts}&interval=1d&events=div%7Csplit"
    )
}

/// Parse a chart response, keeping only complete bars on sessions in range.
fn parse_response(
    symbol: &str,
    resp: ChartResponse,
    sessions: &SessionRange,
) -> Result<SymbolChart, IngestError> {
    let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
        Some(err) => IngestError::Source(format!("{symbol}: {}: {}", err.code, err.description)),
        None => IngestError::Source(format!("{symbol}: empty result with no error")),
    })?;

    let data = result
        .into_iter()
        .next()
        .ok_or_else(|| IngestError::Source(format!("{symbol}: result array is empty")))?;

    // Symbols without any trading in range come back without timestamps.
    let timestamps = data.timestamp.unwrap_or_default();

    let quote = data
        .indicators
        .quote
        .into_iter()
        .next()
        .ok_or_else(|| IngestError::Source(format!("{symbol}: no quote data")))?;

    let mut chart = SymbolChart {
        exchange: data.meta.as_ref().and_then(|m| m.exchange_name.clone()),
        name: data.meta.as_ref().and_then(|m| m.long_name.clone()),
        ..SymbolChart::default()
    };

    for (i, &ts) in timestamps.iter().enumerate() {
        let date = date_of(ts)?;
        if !sessions.contains_session(date) {
            continue;
        }
        let field = |v: &Vec<Option<f64>>| v.get(i).copied().flatten();
        // Holidays and halted days come back with null prices.
        let (Some(open), Some(high), Some(low), Some(close)) = (
            field(&quote.open),
            field(&quote.high),
            field(&quote.low),
            field(&quote.close),
        ) else {
            continue;
        };
        chart.bars.push(Bar {
            dt: date.and_time(NaiveTime::default()),
            open,
            high,
            low,
            close,
            volume: quote.volume.get(i).copied().flatten().unwrap_or(0),
        });
    }
    chart.bars.sort_by_key(|b| b.dt);
    chart.bars.dedup_by_key(|b| b.dt);

    let events = data.events.unwrap_or_default();
    for dividend in events.dividends.values() {
        let date = date_of(dividend.date)?;
        if sessions.contains_session(date) && dividend.amount > 0.0 {
            chart.dividends.push((date, dividend.amount));
        }
    }
    for split in events.splits.values() {
        let date = date_of(split.date)?;
        if sessions.contains_session(date) && split.numerator > 0.0 && split.denominator > 0.0 {
            chart.splits.push((date, split.denominator / split.numerator));
        }
    }
    chart.dividends.sort_by(|a, b| a.0.cmp(&b.0));
    chart.splits.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(chart)
}

/// Ingest routine fetching daily bars for a fixed symbol list.
#[derive(Debug, Clone, Default)]
pub struct YahooSource {
    symbols: Option<Vec<String>>,
}

impl YahooSource {
    pub fn new(symbols: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            symbols: Some(symbols.into_iter().map(Into::into).collect()),
        }
    }

    /// Fetch the symbols listed in `$YAHOO_SYMBOLS` at ingest time.
    pub fn from_env() -> Self {
        Self { symbols: None }
    }

    /// Sorted, deduplicated, upper-cased symbols.
    fn resolve_symbols(&self, ctx: &IngestContext<'_>) -> Result<Vec<String>, IngestError> {
        let raw: Vec<String> = match &self.symbols {
            Some(symbols) => symbols.clone(),
            None => ctx
                .environment()
                .require_var(YAHOO_SYMBOLS_ENV_VAR)?
                .split(',')
                .map(str::to_string)
                .collect(),
        };
        let mut symbols: Vec<String> = raw
            .iter()
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
        symbols.sort();
        symbols.dedup();
        if symbols.is_empty() {
            return Err(IngestError::Source("no symbols to fetch".into()));
        }
        Ok(symbols)
    }
}

fn decode_chart(
    symbol: &str,
    body: &[u8],
    sessions: &SessionRange,
) -> Result<SymbolChart, IngestError> {
    let resp: ChartResponse = serde_json::from_slice(body)
        .map_err(|e| IngestError::Source(format!("failed to parse response for {symbol}: {e}")))?;
    parse_response(symbol, resp, sessions)
}

fn fetch_chart(
    client: &reqwest::blocking::Client,
    symbol: &str,
    sessions: &SessionRange,
) -> Result<Vec<u8>, IngestError> {
    let url = chart_url(symbol, sessions.start(), sessions.end());
    let resp = client
        .get(&url)
        .send()
        .map_err(|e| IngestError::Http(format!("{symbol}: {e}")))?;
    let status = resp.status();
    if !status.is_success() {
        return Err(IngestError::Http(format!("HTTP {status} for {symbol}")));
    }
    Ok(resp
        .bytes()
        .map_err(|e| IngestError::Http(format!("{symbol}: {e}")))?
        .to_vec())
}

/// Chart for `symbol`, from the cache when a previous attempt fetched it.
///
/// A cached body that no longer decodes is discarded and fetched again. Only
/// bodies that decode are cached, and they are written to a temp file first
/// so a crash never leaves a truncated cache entry behind.
fn load_chart(
    cache_dir: &Path,
    symbol: &str,
    sessions: &SessionRange,
    fetch: impl FnOnce() -> Result<Vec<u8>, IngestError>,
) -> Result<SymbolChart, IngestError> {
    let cached = cache_dir.join(format!("{symbol}.json"));
    if cached.is_file() {
        match decode_chart(symbol, &fs::read(&cached)?, sessions) {
            Ok(chart) => {
                debug!(symbol, path = %cached.display(), "using cached response");
                return Ok(chart);
            }
            Err(e) => {
                warn!(symbol, path = %cached.display(), "discarding cached response: {e}");
                match fs::remove_file(&cached) {
                    Ok(()) => {}
                    Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    let body = fetch()?;
    let chart = decode_chart(symbol, &body, sessions)?;
    let mut tmp = NamedTempFile::new_in(cache_dir)?;
    tmp.write_all(&body)?;
    tmp.persist(&cached).map_err(|e| e.error)?;
    Ok(chart)
}

impl IngestRoutine for YahooSource {
    fn source_name(&self) -> &str {
        "yahoo"
    }

    fn ingest(&self, ctx: &mut IngestContext<'_>) -> Result<(), IngestError> {
        let symbols = self.resolve_symbols(ctx)?;
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| IngestError::Http(format!("failed to build HTTP client: {e}")))?;

        let sessions = ctx.sessions().clone();
        let cache_dir = ctx.cache_dir().to_path_buf();
        let bundle = ctx.bundle().to_string();
        ctx.progress().on_start(&bundle, symbols.len());

        let mut assets = Vec::with_capacity(symbols.len());
        let mut adjustments = Adjustments::default();
        for (sid, symbol) in symbols.iter().enumerate() {
            let sid = u32::try_from(sid).map_err(|_| IngestError::Source("too many symbols".into()))?;
            let chart = load_chart(&cache_dir, symbol, &sessions, || {
                fetch_chart(&client, symbol, &sessions)
            })?;

            ctx.daily_bar_writer().write(sid, &chart.bars)?;
            let (start_date, end_date) = match (chart.bars.first(), chart.bars.last()) {
                (Some(first), Some(last)) => (first.dt.date(), last.dt.date()),
                _ => (sessions.start(), sessions.end()),
            };
            assets.push(Asset {
                sid,
                symbol: symbol.clone(),
                asset_name: chart.name.unwrap_or_else(|| symbol.clone()),
                exchange: chart.exchange.unwrap_or_else(|| "YAHOO".to_string()),
                start_date,
                end_date,
                auto_close_date: end_date.succ_opt(),
            });
            adjustments.dividends.extend(chart.dividends.iter().map(|(date, amount)| Dividend {
                sid,
                ex_date: *date,
                record_date: None,
                declared_date: None,
                pay_date: None,
                amount: *amount,
            }));
            adjustments.splits.extend(chart.splits.iter().map(|(date, ratio)| Split {
                sid,
                effective_date: *date,
                ratio: *ratio,
            }));

            info!(bundle = %bundle, symbol = %symbol, bars = chart.bars.len(), "fetched");
            ctx.progress().on_advance(&bundle, symbol, sid as usize + 1, symbols.len());
        }

        ctx.asset_writer().write(&assets)?;
        ctx.adjustment_writer().write(&adjustments)?;
        ctx.progress().on_finish(&bundle, symbols.len());
        Ok(())
    }
}
