//! Header-driven row parsing shared by the CSV and spreadsheet extractors.

use crate::schema::RawAsset;
use crate::utils::{contains_phrase, normalize_name, parse_amount, parse_flexible_date};
use log::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Name,
    Value,
    Quantity,
    PurchasePrice,
    PurchaseDate,
    Isin,
    Ticker,
    Exchange,
}

impl Field {
    const ALL: [Field; 8] = [
        Field::Name,
        Field::Value,
        Field::Quantity,
        Field::PurchasePrice,
        Field::PurchaseDate,
        Field::Isin,
        Field::Ticker,
        Field::Exchange,
    ];

    fn keywords(&self) -> &'static [&'static str] {
        match self {
            Field::Name => &[
                "name",
                "asset name",
                "asset",
                "security name",
                "security",
                "scheme name",
                "scheme",
                "fund name",
                "instrument",
                "instrument name",
                "stock",
                "stock name",
                "company",
                "company name",
                "holding",
                "description",
                "particulars",
                "investment",
            ],
            Field::Value => &[
                "value",
                "current value",
                "market value",
                "mkt value",
                "present value",
                "valuation",
                "amount",
                "current amount",
                "balance",
                "closing balance",
                "holding value",
                "total value",
                "value inr",
            ],
            Field::Quantity => &[
                "quantity",
                "qty",
                "units",
                "balance units",
                "shares",
                "no of shares",
                "holding qty",
            ],
            Field::PurchasePrice => &[
                "purchase price",
                "buy price",
                "avg price",
                "average price",
                "avg cost",
                "average cost",
                "cost price",
                "purchase nav",
            ],
            Field::PurchaseDate => &[
                "purchase date",
                "buy date",
                "date of purchase",
                "investment date",
                "acquired on",
                "date",
            ],
            Field::Isin => &["isin", "isin code", "isin no"],
            Field::Ticker => &[
                "ticker",
                "symbol",
                "ticker symbol",
                "trading symbol",
                "nse symbol",
                "scrip",
                "scrip code",
            ],
            Field::Exchange => &["exchange", "exch", "market"],
        }
    }

    /// Headers containing any of these never map to the field.
    fn exclusions(&self) -> &'static [&'static str] {
        match self {
            Field::Value => &["invested", "cost", "purchase", "buy", "avg", "average", "gain", "loss", "units"],
            Field::Name => &["code", "symbol", "isin", "folio"],
            Field::PurchaseDate => &["maturity", "statement", "nav date"],
            _ => &[],
        }
    }

    fn score(&self, header: &str) -> Option<usize> {
        if header.is_empty() || self.exclusions().iter().any(|ex| contains_phrase(header, ex)) {
            return None;
        }
        self.keywords()
            .iter()
            .filter_map(|keyword| {
                if header == *keyword {
                    Some(100 + keyword.len())
                } else if contains_phrase(header, keyword) {
                    Some(50 + keyword.len())
                } else {
                    None
                }
            })
            .max()
    }
}

/// Column index per logical field.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ColumnMap {
    pub name: Option<usize>,
    pub value: Option<usize>,
    pub quantity: Option<usize>,
    pub purchase_price: Option<usize>,
    pub purchase_date: Option<usize>,
    pub isin: Option<usize>,
    pub ticker: Option<usize>,
    pub exchange: Option<usize>,
}

impl ColumnMap {
    fn slot(&mut self, field: Field) -> &mut Option<usize> {
        match field {
            Field::Name => &mut self.name,
            Field::Value => &mut self.value,
            Field::Quantity => &mut self.quantity,
            Field::PurchasePrice => &mut self.purchase_price,
            Field::PurchaseDate => &mut self.purchase_date,
            Field::Isin => &mut self.isin,
            Field::Ticker => &mut self.ticker,
            Field::Exchange => &mut self.exchange,
        }
    }

    pub fn is_usable(&self) -> bool {
        self.name.is_some() && self.value.is_some()
    }

    /// Greedy assignment: the highest scoring (field, column) pair claims both first.
    pub fn from_header(row: &[String]) -> Self {
        let headers: Vec<String> = row.iter().map(|cell| normalize_name(cell)).collect();

        let mut candidates: Vec<(usize, Field, usize)> = Vec::new();
        for field in Field::ALL {
            for (col, header) in headers.iter().enumerate() {
                if let Some(score) = field.score(header) {
                    candidates.push((score, field, col));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.cmp(&a.0).then(a.2.cmp(&b.2)));

        let mut map = ColumnMap::default();
        let mut taken = vec![false; headers.len()];
        for (_, field, col) in candidates {
            let slot = map.slot(field);
            if slot.is_none() && !taken[col] {
                *slot = Some(col);
                taken[col] = true;
            }
        }
        map
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layout {
    Header,
    Headerless,
}

#[derive(Debug, Clone)]
pub struct TabularOutcome {
    pub assets: Vec<RawAsset>,
    pub rows_dropped: usize,
    pub layout: Layout,
    /// Text of the rows above the header (report titles, "as on" lines).
    pub preamble: String,
}

pub fn find_header(rows: &[Vec<String>], scan_rows: usize) -> Option<(usize, ColumnMap)> {
    rows.iter()
        .take(scan_rows)
        .enumerate()
        .map(|(idx, row)| (idx, ColumnMap::from_header(row)))
        .find(|(_, map)| map.is_usable())
}

/// Parses rows with a recognised header, or with the col0=name / col1=value heuristic.
pub fn parse_rows(rows: &[Vec<String>], source_file: &str, scan_rows: usize) -> TabularOutcome {
    match find_header(rows, scan_rows) {
        Some((header_idx, map)) => {
            debug!(
                "'{}': header found on row {} ({:?})",
                source_file,
                header_idx + 1,
                map
            );
            let (assets, rows_dropped) = parse_with_map(&rows[header_idx + 1..], &map, source_file);
            TabularOutcome {
                assets,
                rows_dropped,
                layout: Layout::Header,
                preamble: join_rows(&rows[..header_idx]),
            }
        }
        None => {
            let map = ColumnMap {
                name: Some(0),
                value: Some(1),
                ..Default::default()
            };
            let (assets, rows_dropped) = parse_with_map(rows, &map, source_file);
            TabularOutcome {
                assets,
                rows_dropped,
                layout: Layout::Headerless,
                preamble: join_rows(&rows[..rows.len().min(scan_rows)]),
            }
        }
    }
}

fn parse_with_map(rows: &[Vec<String>], map: &ColumnMap, source_file: &str) -> (Vec<RawAsset>, usize) {
    let mut assets = Vec::new();
    let mut dropped = 0;

    for row in rows {
        if row.iter().all(|cell| cell.trim().is_empty()) {
            continue;
        }
        match parse_row(row, map, source_file) {
            Some(asset) => assets.push(asset),
            None => dropped += 1,
        }
    }

    (assets, dropped)
}

fn cell<'a>(row: &'a [String], col: Option<usize>) -> Option<&'a str> {
    col.and_then(|c| row.get(c))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

fn parse_row(row: &[String], map: &ColumnMap, source_file: &str) -> Option<RawAsset> {
    let name = cell(row, map.name)?;
    if is_summary_row(name) {
        return None;
    }
    let value = parse_amount(cell(row, map.value)?)?;
    if value <= 0.0 {
        return None;
    }

    let mut asset = RawAsset::new(name, value, source_file);
    asset.quantity = cell(row, map.quantity)
        .and_then(parse_amount)
        .filter(|q| *q > 0.0);
    asset.purchase_price = cell(row, map.purchase_price)
        .and_then(parse_amount)
        .filter(|p| *p > 0.0);
    asset.purchase_date = cell(row, map.purchase_date).and_then(parse_flexible_date);
    asset.isin = cell(row, map.isin).map(|s| s.to_uppercase());
    asset.ticker_symbol = cell(row, map.ticker).map(|s| s.to_uppercase());
    asset.exchange = cell(row, map.exchange).map(|s| s.to_uppercase());
    Some(asset)
}

pub fn is_summary_row(name: &str) -> bool {
    let normalized = normalize_name(name);
    ["total", "grand total", "sub total", "subtotal", "net worth", "portfolio total"]
        .iter()
        .any(|marker| normalized == *marker || normalized.starts_with(&format!("{} ", marker)))
}

fn join_rows(rows: &[Vec<String>]) -> String {
    rows.iter()
        .map(|row| {
            row.iter()
                .map(|c| c.trim())
                .filter(|c| !c.is_empty())
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn rows(data: &[&[&str]]) -> Vec<Vec<String>> {
        data.iter()
            .map(|r| r.iter().map(|c| c.to_string()).collect())
            .collect()
    }

    #[test]
    fn test_name_value_rows_drop_invalid() {
        let data = rows(&[
            &["Name", "Value"],
            &["HDFC Bank", "150000"],
            &["", "5000"],
            &["Gold ETF", "-10"],
        ]);
        let outcome = parse_rows(&data, "holdings.csv", 10);
        assert_eq!(outcome.layout, Layout::Header);
        assert_eq!(outcome.assets.len(), 1);
        assert_eq!(outcome.assets[0].name, "HDFC Bank");
        assert_eq!(outcome.assets[0].current_value, 150000.0);
        assert_eq!(outcome.rows_dropped, 2);
    }

    #[test]
    fn test_value_column_skips_cost_basis() {
        let map = ColumnMap::from_header(&rows(&[&[
            "Scheme Name",
            "Invested Value",
            "Current Value",
            "Balance Units",
            "ISIN",
        ]])[0]);
        assert_eq!(map.name, Some(0));
        assert_eq!(map.value, Some(2));
        assert_eq!(map.quantity, Some(3));
        assert_eq!(map.isin, Some(4));
    }

    #[test]
    fn test_header_below_preamble_and_optional_fields() {
        let data = rows(&[
            &["Consolidated Holding Statement"],
            &["Holdings as on 30-Nov-2024"],
            &["Symbol", "Company Name", "Qty", "Avg Price", "Market Value", "Buy Date"],
            &["RELIANCE", "Reliance Industries Ltd", "100", "2,400.50", "2,55,000", "15/03/2022"],
            &["", "Total", "", "", "2,55,000", ""],
        ]);
        let outcome = parse_rows(&data, "zerodha.csv", 10);
        assert_eq!(outcome.assets.len(), 1);
        assert_eq!(outcome.rows_dropped, 1);

        let asset = &outcome.assets[0];
        assert_eq!(asset.name, "Reliance Industries Ltd");
        assert_eq!(asset.ticker_symbol.as_deref(), Some("RELIANCE"));
        assert_eq!(asset.quantity, Some(100.0));
        assert_eq!(asset.purchase_price, Some(2400.5));
        assert_eq!(asset.current_value, 255000.0);
        assert_eq!(asset.purchase_date, NaiveDate::from_ymd_opt(2022, 3, 15));
        assert!(outcome.preamble.contains("Holdings as on 30-Nov-2024"));
    }

    #[test]
    fn test_headerless_two_column_fallback() {
        let data = rows(&[&["SBI Savings", "42,000"], &["PPF", "3,10,000"], &["note", "n/a"]]);
        let outcome = parse_rows(&data, "misc.csv", 10);
        assert_eq!(outcome.layout, Layout::Headerless);
        assert_eq!(outcome.assets.len(), 2);
        assert_eq!(outcome.rows_dropped, 1);
    }

    #[test]
    fn test_summary_rows_detected() {
        assert!(is_summary_row("Grand Total"));
        assert!(is_summary_row("TOTAL:"));
        assert!(is_summary_row("Total Equity"));
        assert!(!is_summary_row("Totalenergies SE"));
    }
}
