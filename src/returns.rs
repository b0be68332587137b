use crate::error::{PortfolioError, Result};
use std::collections::HashSet;

/// Time-ordered closing prices for a fixed, ordered set of symbols.
///
/// `None` marks a period the provider had no close for.
#[derive(Clone, Debug, PartialEq)]
pub struct PriceMatrix {
    symbols: Vec<String>,
    /// Unix seconds per row, when the provider supplied them.
    timestamps: Option<Vec<i64>>,
    rows: Vec<Vec<Option<f64>>>,
}

impl PriceMatrix {
    pub fn new(symbols: Vec<String>, rows: Vec<Vec<Option<f64>>>) -> Result<Self> {
        if symbols.is_empty() {
            return Err(PortfolioError::invalid_input("price matrix has no symbols"));
        }

        let mut seen = HashSet::with_capacity(symbols.len());
        for symbol in &symbols {
            if symbol.trim().is_empty() {
                return Err(PortfolioError::invalid_input("empty asset symbol"));
            }
            if !seen.insert(symbol.as_str()) {
                return Err(PortfolioError::invalid_input(format!(
                    "duplicate asset symbol {}",
                    symbol
                )));
            }
        }

        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != symbols.len()) {
            return Err(PortfolioError::invalid_input(format!(
                "price row {} has {} values, expected {}",
                idx,
                row.len(),
                symbols.len()
            )));
        }

        Ok(Self {
            symbols,
            timestamps: None,
            rows,
        })
    }

    pub fn with_timestamps(mut self, timestamps: Vec<i64>) -> Result<Self> {
        if timestamps.len() != self.rows.len() {
            return Err(PortfolioError::invalid_input(format!(
                "{} timestamps for {} price rows",
                timestamps.len(),
                self.rows.len()
            )));
        }
        self.timestamps = Some(timestamps);
        Ok(self)
    }

    pub fn symbols(&self) -> &[String] {
        &self.symbols
    }

    pub fn rows(&self) -> &[Vec<Option<f64>>] {
        &self.rows
    }

    pub fn timestamps(&self) -> Option<&[i64]> {
        self.timestamps.as_deref()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn column_has_history(&self, col: usize) -> bool {
        self.rows
            .iter()
            .filter_map(|row| row[col])
            .filter(|p| p.is_finite())
            .take(2)
            .count()
            == 2
    }
}

/// Clean per-period fractional returns: every row holds a finite value for
/// every asset column.
#[derive(Clone, Debug, PartialEq)]
pub struct ReturnMatrix {
    assets: Vec<String>,
    rows: Vec<Vec<f64>>,
    dropped: Vec<String>,
}

impl ReturnMatrix {
    /// Builds a return matrix from rows that are already clean.
    ///
    /// Rows with a non-finite value are rejected rather than dropped, since a
    /// caller handing over returns directly claims they are usable.
    pub fn from_returns(assets: Vec<String>, rows: Vec<Vec<f64>>) -> Result<Self> {
        if assets.len() < 2 {
            return Err(PortfolioError::insufficient_data(format!(
                "need at least 2 assets, got {}",
                assets.len()
            )));
        }
        let unique: HashSet<&str> = assets.iter().map(String::as_str).collect();
        if unique.len() != assets.len() {
            return Err(PortfolioError::invalid_input("duplicate asset symbol in return matrix"));
        }
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != assets.len() {
                return Err(PortfolioError::invalid_input(format!(
                    "return row {} has {} values, expected {}",
                    idx,
                    row.len(),
                    assets.len()
                )));
            }
            if row.iter().any(|r| !r.is_finite()) {
                return Err(PortfolioError::invalid_input(format!(
                    "return row {} contains a non-finite value",
                    idx
                )));
            }
        }
        if rows.is_empty() {
            return Err(PortfolioError::insufficient_data("return matrix has no rows"));
        }

        Ok(Self {
            assets,
            rows,
            dropped: Vec::new(),
        })
    }

    /// Differences a price matrix into period returns, dropping assets without
    /// usable history and any period whose return is undefined for some asset.
    pub fn from_prices(prices: &PriceMatrix) -> Result<Self> {
        let usable: Vec<usize> = (0..prices.symbols.len())
            .filter(|&col| prices.column_has_history(col))
            .collect();

        let dropped: Vec<String> = prices
            .symbols
            .iter()
            .enumerate()
            .filter(|(col, _)| !usable.contains(col))
            .map(|(_, s)| s.clone())
            .collect();

        if usable.len() < 2 {
            return Err(PortfolioError::insufficient_data(format!(
                "need at least 2 assets with price history, got {} (no usable history: {})",
                usable.len(),
                if dropped.is_empty() { "-".to_string() } else { dropped.join(",") }
            )));
        }

        let rows: Vec<Vec<f64>> = prices
            .rows
            .windows(2)
            .filter_map(|w| {
                usable
                    .iter()
                    .map(|&col| period_return(w[0][col], w[1][col]))
                    .collect::<Option<Vec<f64>>>()
            })
            .collect();

        if rows.is_empty() {
            return Err(PortfolioError::insufficient_data(
                "no periods with a defined return for every asset",
            ));
        }

        Ok(Self {
            assets: usable.iter().map(|&col| prices.symbols[col].clone()).collect(),
            rows,
            dropped,
        })
    }

    pub fn assets(&self) -> &[String] {
        &self.assets
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    /// Requested symbols that were removed for lack of price history.
    pub fn dropped_assets(&self) -> &[String] {
        &self.dropped
    }

    pub fn num_assets(&self) -> usize {
        self.assets.len()
    }

    pub fn num_periods(&self) -> usize {
        self.rows.len()
    }

    pub fn column(&self, asset: usize) -> impl Iterator<Item = f64> + '_ {
        self.rows.iter().map(move |row| row[asset])
    }
}

fn period_return(prev: Option<f64>, curr: Option<f64>) -> Option<f64> {
    let (prev, curr) = (prev?, curr?);
    if !prev.is_finite() || !curr.is_finite() || prev == 0.0 {
        return None;
    }
    let r = curr / prev - 1.0;
    r.is_finite().then_some(r)
}
