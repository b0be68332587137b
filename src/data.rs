use crate::config;
use crate::returns::PriceMatrix;
use anyhow::Result;
use chrono::DateTime;
use rand::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{info, warn};

const SECONDS_PER_DAY: i64 = 86_400;
const CACHE_MAX_AGE_SECS: u64 = 86_400;

#[derive(Deserialize, Serialize, Debug)]
struct YahooChartResponse {
    chart: YahooChart,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooChart {
    #[serde(default)]
    result: Option<Vec<YahooResult>>,
    #[serde(default)]
    error: Option<YahooError>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooError {
    code: Option<String>,
    description: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooResult {
    #[serde(default)]
    timestamp: Vec<i64>,
    indicators: YahooIndicators,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooIndicators {
    quote: Vec<YahooQuote>,
}

#[derive(Deserialize, Serialize, Debug)]
struct YahooQuote {
    #[serde(default)]
    close: Vec<Option<f64>>,
}

/// Daily closes for one symbol, oldest first.
#[derive(Clone, Debug, PartialEq)]
pub struct CloseSeries {
    pub symbol: String,
    /// `(unix seconds, close)` with null closes removed.
    pub closes: Vec<(i64, f64)>,
}

fn check_chart_error(symbol: &str, response: &YahooChartResponse) -> Result<()> {
    match &response.chart.error {
        Some(err) => Err(anyhow::anyhow!(
            "Yahoo returned an error for {}: {} {}",
            symbol,
            err.code.as_deref().unwrap_or("?"),
            err.description.as_deref().unwrap_or("")
        )),
        None => Ok(()),
    }
}

fn closes_from_response(symbol: &str, response: &YahooChartResponse) -> Result<CloseSeries> {
    check_chart_error(symbol, response)?;
    let result = response
        .chart
        .result
        .as_ref()
        .and_then(|r| r.first())
        .ok_or(anyhow::anyhow!("No data found for {}", symbol))?;
    let quote = result
        .indicators
        .quote
        .first()
        .ok_or(anyhow::anyhow!("No quote block for {}", symbol))?;

    let closes = result
        .timestamp
        .iter()
        .zip(&quote.close)
        .filter_map(|(&ts, close)| match close {
            Some(c) if c.is_finite() => Some((ts, *c)),
            _ => None,
        })
        .collect();

    Ok(CloseSeries {
        symbol: symbol.to_uppercase(),
        closes,
    })
}

/// Parses a Yahoo v8 chart payload into daily closes.
pub fn parse_chart_json(symbol: &str, json: &str) -> Result<CloseSeries> {
    let response: YahooChartResponse = serde_json::from_str(json)?;
    closes_from_response(symbol, &response)
}

fn read_cache(path: &Path) -> Result<YahooChartResponse> {
    let file = std::fs::File::open(path)?;
    let reader = std::io::BufReader::new(file);
    Ok(serde_json::from_reader(reader)?)
}

/// Writes a successful payload to the cache. Error payloads are never cached,
/// so the next run asks Yahoo again.
fn store_in_cache(symbol: &str, response: &YahooChartResponse, path: &Path) -> Result<()> {
    check_chart_error(symbol, response)?;
    let file = std::fs::File::create(path)?;
    let writer = std::io::BufWriter::new(file);
    serde_json::to_writer(writer, response)?;
    Ok(())
}

fn cache_age_secs(path: &Path) -> Result<u64> {
    let modified = std::fs::metadata(path)?.modified()?;
    Ok(std::time::SystemTime::now().duration_since(modified)?.as_secs())
}

/// Daily closes for `symbol` over `range` (e.g. "3y"), served from a 24h
/// on-disk cache when fresh. A stale cache is used if the refresh fails.
pub async fn fetch_closes(symbol: &str, range: &str) -> Result<CloseSeries> {
    fetch_closes_in(&config::cache_dir(), symbol, range).await
}

async fn fetch_closes_in(cache_dir: &Path, symbol: &str, range: &str) -> Result<CloseSeries> {
    if !cache_dir.exists() {
        std::fs::create_dir_all(cache_dir)?;
    }
    let cache_file = cache_dir.join(format!("{}_{}.json", symbol, range));

    let response = if cache_file.exists() {
        if cache_age_secs(&cache_file)? < CACHE_MAX_AGE_SECS {
            info!("Loading {} from cache...", symbol);
            read_cache(&cache_file)?
        } else {
            info!("Cache expired for {}, fetching...", symbol);
            match fetch_from_api(symbol, range, &cache_file).await {
                Ok(resp) => resp,
                Err(e) => {
                    warn!("Refresh failed for {} ({}), using stale cache", symbol, e);
                    read_cache(&cache_file)?
                }
            }
        }
    } else {
        info!("Cache miss for {}, fetching...", symbol);
        fetch_from_api(symbol, range, &cache_file).await?
    };

    closes_from_response(symbol, &response)
}

async fn request_chart(client: &reqwest::Client, url: &str) -> Result<YahooChartResponse> {
    let resp = client
        .get(url)
        .header("User-Agent", "Mozilla/5.0")
        .send()
        .await?
        .error_for_status()?;
    Ok(resp.json::<YahooChartResponse>().await?)
}

async fn fetch_from_api(symbol: &str, range: &str, cache_path: &Path) -> Result<YahooChartResponse> {
    let url = format!(
        "https://query1.finance.yahoo.com/v8/finance/chart/{}?range={}&interval=1d",
        symbol, range
    );

    let client = reqwest::Client::new();
    let mut attempts = 0;
    let max_attempts = 3;

    loop {
        attempts += 1;
        match request_chart(&client, &url).await {
            Ok(resp_json) => {
                store_in_cache(symbol, &resp_json, cache_path)?;
                return Ok(resp_json);
            }
            Err(e) => {
                if attempts >= max_attempts {
                    return Err(e);
                }
                warn!("Failed to fetch data for {} (attempt {}/{}): {}", symbol, attempts, max_attempts, e);
            }
        }

        tokio::time::sleep(std::time::Duration::from_secs(2)).await;
    }
}

/// Aligns per-symbol closes on the union of trading days. Days a symbol has
/// no close for stay `None`, which drops that row from the return matrix.
pub fn align_closes(series: &[CloseSeries]) -> Result<PriceMatrix> {
    let mut by_day: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
    for (col, s) in series.iter().enumerate() {
        for &(ts, close) in &s.closes {
            let day = ts.div_euclid(SECONDS_PER_DAY) * SECONDS_PER_DAY;
            by_day.entry(day).or_insert_with(|| vec![None; series.len()])[col] = Some(close);
        }
    }

    let symbols = series.iter().map(|s| s.symbol.clone()).collect();
    let (timestamps, rows): (Vec<i64>, Vec<Vec<Option<f64>>>) = by_day.into_iter().unzip();
    Ok(PriceMatrix::new(symbols, rows)?.with_timestamps(timestamps)?)
}

/// Fetches every symbol sequentially, pausing between requests, and aligns
/// the results. A symbol that cannot be fetched becomes an all-missing
/// column so the analysis can report it as dropped.
pub async fn fetch_price_matrix(symbols: &[String], range: &str) -> Result<PriceMatrix> {
    let delay_ms = config::batch_fetch_delay_ms();
    let mut series = Vec::with_capacity(symbols.len());
    let mut fetched = 0;

    for (idx, raw_symbol) in symbols.iter().enumerate() {
        let symbol = raw_symbol.trim().to_uppercase();
        match fetch_closes(&symbol, range).await {
            Ok(s) => {
                info!("{}: {} daily closes", symbol, s.closes.len());
                fetched += 1;
                series.push(s);
            }
            Err(e) => {
                warn!("Price history unavailable for {} ({}); keeping it as missing", symbol, e);
                series.push(CloseSeries {
                    symbol,
                    closes: Vec::new(),
                });
            }
        }

        if idx + 1 < symbols.len() && delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
    }

    if fetched == 0 {
        return Err(anyhow::anyhow!(
            "no price history could be fetched for any of {:?} (range={})",
            symbols,
            range
        ));
    }

    let matrix = align_closes(&series)?;
    if let Some(ts) = matrix.timestamps() {
        if let (Some(first), Some(last)) = (ts.first(), ts.last()) {
            info!(
                "Aligned {} trading days from {} to {}",
                ts.len(),
                format_day(*first),
                format_day(*last)
            );
        }
    }
    Ok(matrix)
}

/// `YYYY-MM-DD` for a unix timestamp, or the raw number if out of range.
pub fn format_day(ts: i64) -> String {
    DateTime::from_timestamp(ts, 0)
        .map(|d| d.format("%Y-%m-%d").to_string())
        .unwrap_or_else(|| ts.to_string())
}

/// Seeded random-walk closes for offline runs and tests.
pub fn mock_price_matrix(symbols: &[String], days: usize, seed: u64) -> Result<PriceMatrix> {
    let mut rng = StdRng::seed_from_u64(seed);
    // 2020-01-02 00:00 UTC
    let start = 1_577_923_200_i64;

    let drifts: Vec<f64> = symbols.iter().map(|_| rng.gen_range(-0.0003..0.0012)).collect();
    let vols: Vec<f64> = symbols.iter().map(|_| rng.gen_range(0.005..0.025)).collect();
    let mut prices: Vec<f64> = symbols.iter().map(|_| rng.gen_range(20.0..300.0)).collect();

    let mut timestamps = Vec::with_capacity(days);
    let mut rows = Vec::with_capacity(days);
    for day in 0..days {
        timestamps.push(start + day as i64 * SECONDS_PER_DAY);
        rows.push(prices.iter().map(|p| Some(*p)).collect());
        // Market-wide shock shared by all symbols, plus idiosyncratic noise.
        let market: f64 = rng.gen_range(-0.01..0.01);
        for (i, price) in prices.iter_mut().enumerate() {
            let change_pct = drifts[i] + 0.5 * market + rng.gen_range(-vols[i]..vols[i]);
            *price *= 1.0 + change_pct;
        }
    }

    Ok(PriceMatrix::new(symbols.to_vec(), rows)?.with_timestamps(timestamps)?)
}
