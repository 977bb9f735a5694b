//! Security lookup collaborator consumed by the classifier's first tier.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Outcome of a security lookup. A miss is `found: false`, never an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LookupResult {
    pub found: bool,
    pub name: Option<String>,
    /// Instrument type as reported by the source: "equity", "etf", "mutual_fund", "bond".
    pub asset_type: Option<String>,
    pub sector: Option<String>,
    pub market_cap: Option<f64>,
    pub exchange: Option<String>,
}

impl LookupResult {
    pub fn not_found() -> Self {
        Self::default()
    }

    /// Whether the result carries live market data rather than just a name.
    pub fn has_market_data(&self) -> bool {
        self.found && (self.sector.is_some() || self.market_cap.is_some())
    }
}

#[async_trait]
pub trait SecurityLookupOracle: Send + Sync {
    async fn lookup_by_isin(&self, isin: &str) -> LookupResult;

    async fn lookup_by_ticker(&self, ticker: &str, exchange: Option<&str>) -> LookupResult;
}

/// Lookup that never finds anything; the ISIN prefix heuristic still applies.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLookup;

#[async_trait]
impl SecurityLookupOracle for NoLookup {
    async fn lookup_by_isin(&self, _isin: &str) -> LookupResult {
        LookupResult::not_found()
    }

    async fn lookup_by_ticker(&self, _ticker: &str, _exchange: Option<&str>) -> LookupResult {
        LookupResult::not_found()
    }
}

/// Static lookup table keyed by upper-cased ISIN and ticker.
#[derive(Debug, Clone, Default)]
pub struct InMemorySecurityLookup {
    by_isin: HashMap<String, LookupResult>,
    by_ticker: HashMap<String, LookupResult>,
}

impl InMemorySecurityLookup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_isin(mut self, isin: &str, mut result: LookupResult) -> Self {
        result.found = true;
        self.by_isin.insert(isin.trim().to_uppercase(), result);
        self
    }

    pub fn with_ticker(mut self, ticker: &str, mut result: LookupResult) -> Self {
        result.found = true;
        self.by_ticker.insert(ticker.trim().to_uppercase(), result);
        self
    }
}

#[async_trait]
impl SecurityLookupOracle for InMemorySecurityLookup {
    async fn lookup_by_isin(&self, isin: &str) -> LookupResult {
        self.by_isin
            .get(&isin.trim().to_uppercase())
            .cloned()
            .unwrap_or_default()
    }

    async fn lookup_by_ticker(&self, ticker: &str, exchange: Option<&str>) -> LookupResult {
        match self.by_ticker.get(&ticker.trim().to_uppercase()) {
            Some(result) => match (exchange, result.exchange.as_deref()) {
                (Some(wanted), Some(listed)) if !wanted.eq_ignore_ascii_case(listed) => {
                    LookupResult::not_found()
                }
                _ => result.clone(),
            },
            None => LookupResult::not_found(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_in_memory_lookup_hits_and_misses() {
        let lookup = InMemorySecurityLookup::new().with_ticker(
            "RELIANCE",
            LookupResult {
                asset_type: Some("equity".to_string()),
                market_cap: Some(1.9e13),
                exchange: Some("NSE".to_string()),
                ..Default::default()
            },
        );

        let hit = lookup.lookup_by_ticker("reliance", Some("nse")).await;
        assert!(hit.found);
        assert!(hit.has_market_data());

        assert!(!lookup.lookup_by_ticker("RELIANCE", Some("BSE")).await.found);
        assert!(!lookup.lookup_by_ticker("TCS", None).await.found);
        assert!(!lookup.lookup_by_isin("INE002A01018").await.found);
    }

    #[tokio::test]
    async fn test_no_lookup_never_finds() {
        assert_eq!(NoLookup.lookup_by_isin("INE002A01018").await, LookupResult::not_found());
    }
}
