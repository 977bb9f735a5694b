//! Strict validation of oracle-extracted holdings.
//!
//! The oracle's answer is untrusted. Each record is deserialized and checked
//! on its own; a record that fails any check is dropped and counted, the rest
//! survive.

use crate::extract::tabular::is_summary_row;
use crate::schema::RawAsset;
use crate::utils::parse_amount;
use chrono::NaiveDate;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Holding record the oracle is asked to return.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedAsset {
    #[schemars(description = "Holding name exactly as printed.")]
    pub name: String,

    #[schemars(description = "Current market value as a plain number, without currency symbols or separators.")]
    #[serde(alias = "current_value", alias = "value")]
    pub current_value: NumberLike,

    #[serde(default)]
    pub quantity: Option<NumberLike>,

    #[serde(default, alias = "purchase_price")]
    pub purchase_price: Option<NumberLike>,

    #[schemars(description = "Purchase date as YYYY-MM-DD, only when printed.")]
    #[serde(default, alias = "purchase_date")]
    pub purchase_date: Option<String>,

    #[schemars(description = "12-character ISIN, only when printed.")]
    #[serde(default)]
    pub isin: Option<String>,

    #[serde(default, alias = "ticker_symbol", alias = "ticker")]
    pub ticker_symbol: Option<String>,

    #[serde(default)]
    pub exchange: Option<String>,
}

/// Models answer numbers both as JSON numbers and as formatted strings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(untagged)]
pub enum NumberLike {
    Number(f64),
    Text(String),
}

impl NumberLike {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            NumberLike::Number(n) if n.is_finite() => Some(*n),
            NumberLike::Number(_) => None,
            NumberLike::Text(s) => parse_amount(s),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidatedExtraction {
    pub assets: Vec<RawAsset>,
    pub dropped: usize,
    pub statement_date: Option<NaiveDate>,
}

/// JSON schema of one extracted record, with `$ref`s inlined and meta keys removed.
pub fn extraction_schema() -> serde_json::Result<Value> {
    let root = schemars::schema_for!(ExtractedAsset);
    let mut value = serde_json::to_value(root)?;
    let definitions = match &mut value {
        Value::Object(map) => {
            map.remove("$schema");
            map.remove("title");
            map.remove("definitions")
        }
        _ => None,
    };
    let definitions = match definitions {
        Some(Value::Object(defs)) => defs,
        _ => Map::new(),
    };
    inline_refs(&mut value, &definitions);
    Ok(value)
}

fn inline_refs(value: &mut Value, definitions: &Map<String, Value>) {
    match value {
        Value::Object(map) => {
            let target = map
                .get("$ref")
                .and_then(|r| r.as_str())
                .and_then(|r| r.strip_prefix("#/definitions/"))
                .and_then(|name| definitions.get(name))
                .cloned();
            if let Some(mut resolved) = target {
                inline_refs(&mut resolved, definitions);
                *value = resolved;
                return;
            }
            for child in map.values_mut() {
                inline_refs(child, definitions);
            }
        }
        Value::Array(items) => {
            for item in items {
                inline_refs(item, definitions);
            }
        }
        _ => {}
    }
}

/// Accepts a bare array of records or `{ "statementDate", "assets" }`.
pub fn validate_response(response: &Value, source_file: &str) -> ValidatedExtraction {
    let (records, statement_date) = match response {
        Value::Array(items) => (items.as_slice(), None),
        Value::Object(map) => {
            let records = map
                .get("assets")
                .or_else(|| map.get("holdings"))
                .and_then(|v| v.as_array())
                .map(|v| v.as_slice())
                .unwrap_or(&[]);
            let date = map
                .get("statementDate")
                .or_else(|| map.get("statement_date"))
                .and_then(|v| v.as_str())
                .and_then(parse_iso_date);
            (records, date)
        }
        _ => (&[][..], None),
    };

    let mut result = ValidatedExtraction {
        statement_date,
        ..Default::default()
    };

    for record in records {
        match serde_json::from_value::<ExtractedAsset>(record.clone())
            .ok()
            .and_then(|extracted| validate_record(extracted, source_file))
        {
            Some(asset) => result.assets.push(asset),
            None => {
                debug!("'{}': dropping invalid AI record {}", source_file, record);
                result.dropped += 1;
            }
        }
    }
    result
}

fn validate_record(extracted: ExtractedAsset, source_file: &str) -> Option<RawAsset> {
    let name = extracted.name.trim();
    if name.is_empty() || is_summary_row(name) {
        return None;
    }

    let value = extracted.current_value.as_f64().filter(|v| *v > 0.0)?;
    let mut asset = RawAsset::new(name, value, source_file);

    asset.quantity = extracted
        .quantity
        .and_then(|q| q.as_f64())
        .filter(|q| *q > 0.0);
    asset.purchase_price = extracted
        .purchase_price
        .and_then(|p| p.as_f64())
        .filter(|p| *p > 0.0);

    if let Some(date) = extracted.purchase_date {
        asset.purchase_date = Some(parse_iso_date(&date)?);
    }

    if let Some(isin) = extracted.isin {
        let isin = isin.trim().to_uppercase();
        if !(10..=12).contains(&isin.len()) || !isin.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        asset.isin = Some(isin);
    }

    if let Some(ticker) = extracted.ticker_symbol {
        let ticker = ticker.trim();
        if ticker.is_empty() {
            return None;
        }
        asset.ticker_symbol = Some(ticker.to_uppercase());
    }

    asset.exchange = extracted
        .exchange
        .map(|e| e.trim().to_uppercase())
        .filter(|e| !e.is_empty());
    Some(asset)
}

/// Strict `YYYY-MM-DD`.
pub fn parse_iso_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    let shaped = raw.len() == 10
        && raw.char_indices().all(|(i, c)| match i {
            4 | 7 => c == '-',
            _ => c.is_ascii_digit(),
        });
    if !shaped {
        return None;
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d").ok()
}
