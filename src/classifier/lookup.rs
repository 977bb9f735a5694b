use super::ClassificationStrategy;
use crate::error::Result;
use crate::lookup::{LookupResult, SecurityLookupOracle};
use crate::schema::{Classification, RawAsset, VerifiedVia};
use crate::taxonomy::Taxonomy;
use crate::utils::{contains_phrase, normalize_name};
use async_trait::async_trait;
use log::debug;
use std::sync::Arc;

const MARKET_DATA_CONFIDENCE: f64 = 0.95;
const ISIN_PREFIX_CONFIDENCE: f64 = 0.85;
const LARGE_CAP_THRESHOLD: f64 = 2e11;

const DEBT_FUND_HINTS: [&str; 10] = [
    "debt",
    "liquid",
    "gilt",
    "bond",
    "overnight",
    "money market",
    "short duration",
    "corporate bond",
    "banking and psu",
    "credit risk",
];

/// Identifier-driven tier: live lookup first, ISIN prefix heuristic second.
pub struct LookupStrategy {
    oracle: Arc<dyn SecurityLookupOracle>,
}

impl LookupStrategy {
    pub fn new(oracle: Arc<dyn SecurityLookupOracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl ClassificationStrategy for LookupStrategy {
    fn name(&self) -> &'static str {
        "lookup"
    }

    async fn classify(&self, asset: &RawAsset, taxonomy: &Taxonomy) -> Result<Option<Classification>> {
        if let Some(ticker) = &asset.ticker_symbol {
            let result = self.oracle.lookup_by_ticker(ticker, asset.exchange.as_deref()).await;
            if result.has_market_data() {
                let code = subclass_for_listing(&result, &asset.name);
                if let Some(c) = taxonomy.classification_for(code, MARKET_DATA_CONFIDENCE, VerifiedVia::Lookup) {
                    debug!("'{}': ticker {} resolved to {}", asset.name, ticker, code);
                    return Ok(Some(c));
                }
            }
        }

        if let Some(isin) = &asset.isin {
            let result = self.oracle.lookup_by_isin(isin).await;
            if result.has_market_data() {
                let code = subclass_for_listing(&result, &asset.name);
                if let Some(c) = taxonomy.classification_for(code, MARKET_DATA_CONFIDENCE, VerifiedVia::Lookup) {
                    return Ok(Some(c));
                }
            }

            if let Some(code) = subclass_for_isin_prefix(isin, &asset.name) {
                debug!("'{}': ISIN prefix of {} suggests {}", asset.name, isin, code);
                return Ok(taxonomy.classification_for(code, ISIN_PREFIX_CONFIDENCE, VerifiedVia::Lookup));
            }
        }

        Ok(None)
    }
}

fn is_debt_fund(name: &str) -> bool {
    let name = normalize_name(name);
    DEBT_FUND_HINTS.iter().any(|hint| contains_phrase(&name, hint))
}

/// Indian ISINs encode the issuer type in the third character.
pub fn subclass_for_isin_prefix(isin: &str, name: &str) -> Option<&'static str> {
    let isin = isin.trim().to_uppercase();
    match isin.get(..3)? {
        "INE" => Some("direct_equity"),
        "INF" if is_debt_fund(name) => Some("debt_mutual_fund"),
        "INF" => Some("equity_mutual_fund"),
        "IN0" | "IN9" => Some("bonds"),
        _ => None,
    }
}

pub fn subclass_for_listing(result: &LookupResult, name: &str) -> &'static str {
    let kind = result.asset_type.as_deref().unwrap_or("equity").to_lowercase();
    if kind.contains("etf") || kind.contains("index") {
        "index_fund_etf"
    } else if kind.contains("reit") || kind.contains("invit") {
        "reit"
    } else if kind.contains("bond") || kind.contains("debenture") || kind.contains("debt") {
        "bonds"
    } else if kind.contains("fund") {
        if is_debt_fund(name) {
            "debt_mutual_fund"
        } else {
            "equity_mutual_fund"
        }
    } else {
        match result.market_cap {
            Some(cap) if cap >= LARGE_CAP_THRESHOLD => "large_cap_equity",
            Some(_) => "mid_small_cap_equity",
            None => "direct_equity",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lookup::{InMemorySecurityLookup, NoLookup};
    use crate::schema::AssetClass;

    #[test]
    fn test_isin_prefixes() {
        assert_eq!(subclass_for_isin_prefix("INE002A01018", "Reliance"), Some("direct_equity"));
        assert_eq!(subclass_for_isin_prefix("INF209K01YN0", "Axis Bluechip"), Some("equity_mutual_fund"));
        assert_eq!(subclass_for_isin_prefix("INF209K01YN0", "HDFC Liquid Fund"), Some("debt_mutual_fund"));
        assert_eq!(subclass_for_isin_prefix("IN0020230010", "GOI 2033"), Some("bonds"));
        assert_eq!(subclass_for_isin_prefix("US0378331005", "Apple"), None);
    }

    #[test]
    fn test_market_cap_banding() {
        let mut listing = LookupResult {
            found: true,
            asset_type: Some("Equity".to_string()),
            market_cap: Some(2e11),
            ..Default::default()
        };
        assert_eq!(subclass_for_listing(&listing, "x"), "large_cap_equity");
        listing.market_cap = Some(5e10);
        assert_eq!(subclass_for_listing(&listing, "x"), "mid_small_cap_equity");
        listing.asset_type = Some("ETF".to_string());
        assert_eq!(subclass_for_listing(&listing, "x"), "index_fund_etf");
    }

    #[tokio::test]
    async fn test_ticker_with_market_data_wins() {
        let lookup = InMemorySecurityLookup::new().with_ticker(
            "TCS",
            LookupResult {
                sector: Some("IT Services".to_string()),
                market_cap: Some(1.4e13),
                ..Default::default()
            },
        );
        let strategy = LookupStrategy::new(Arc::new(lookup));
        let asset = RawAsset::new("Tata Consultancy", 1.0, "t.csv").with_ticker("TCS", None);

        let c = strategy.classify(&asset, &Taxonomy::default()).await.unwrap().unwrap();
        assert_eq!(c.asset_subclass, "large_cap_equity");
        assert_eq!(c.confidence_score, 0.95);
        assert_eq!(c.verified_via, VerifiedVia::Lookup);
    }

    #[tokio::test]
    async fn test_isin_prefix_without_market_data() {
        let strategy = LookupStrategy::new(Arc::new(NoLookup));
        let asset = RawAsset::new("Some Gilt", 1.0, "t.csv").with_isin("IN0020230010");
        let c = strategy.classify(&asset, &Taxonomy::default()).await.unwrap().unwrap();
        assert_eq!(c.asset_class, AssetClass::Debt);
        assert_eq!(c.confidence_score, 0.85);

        let plain = RawAsset::new("Flat in Pune", 1.0, "t.csv");
        assert!(strategy.classify(&plain, &Taxonomy::default()).await.unwrap().is_none());
    }
}
