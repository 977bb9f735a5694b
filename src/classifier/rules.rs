use super::ClassificationStrategy;
use crate::error::Result;
use crate::schema::{Classification, RawAsset, VerifiedVia};
use crate::taxonomy::Taxonomy;
use crate::utils::{contains_phrase, normalize_name};
use async_trait::async_trait;

/// Keyword matching against the taxonomy's per-subclass lists.
#[derive(Debug, Clone)]
pub struct RuleStrategy {
    /// Results below this confidence are left for a later tier.
    accept_threshold: f64,
}

impl RuleStrategy {
    pub fn new(accept_threshold: f64) -> Self {
        Self { accept_threshold }
    }

    /// Always produces a classification; zero hits fall back at 0.3.
    pub fn best_effort(&self, asset: &RawAsset, taxonomy: &Taxonomy) -> Classification {
        let name = normalize_name(&asset.name);

        let mut best: Option<(usize, usize, &str)> = None;
        for subclass in taxonomy.subclasses() {
            let hits: Vec<&String> = subclass
                .keywords
                .iter()
                .filter(|keyword| contains_phrase(&name, keyword))
                .collect();
            if hits.is_empty() {
                continue;
            }
            let score = (hits.len(), hits.iter().map(|k| k.len()).sum::<usize>());
            // strictly greater keeps the earlier taxonomy entry on ties
            if best.map_or(true, |(count, len, _)| score > (count, len)) {
                best = Some((score.0, score.1, subclass.code.as_str()));
            }
        }

        let fallback = taxonomy.fallback();
        let (code, confidence) = match best {
            Some((count, _, code)) => (code, (0.6 + 0.1 * count as f64).min(0.95)),
            None => (fallback.code.as_str(), 0.3),
        };

        taxonomy
            .classification_for(code, confidence, VerifiedVia::Rule)
            .unwrap_or_else(|| Classification {
                asset_class: fallback.asset_class,
                asset_subclass: fallback.code.clone(),
                risk_level: fallback.risk_level,
                expected_return_pct: fallback.expected_return_pct,
                confidence_score: 0.3,
                verified_via: VerifiedVia::Rule,
            })
    }
}

#[async_trait]
impl ClassificationStrategy for RuleStrategy {
    fn name(&self) -> &'static str {
        "rule"
    }

    async fn classify(&self, asset: &RawAsset, taxonomy: &Taxonomy) -> Result<Option<Classification>> {
        let classification = self.best_effort(asset, taxonomy);
        if classification.confidence_score >= self.accept_threshold {
            Ok(Some(classification))
        } else {
            Ok(None)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AssetClass;

    fn classify(name: &str) -> Classification {
        RuleStrategy::new(0.0).best_effort(&RawAsset::new(name, 100.0, "t.csv"), &Taxonomy::default())
    }

    #[test]
    fn test_confidence_grows_with_hits() {
        let c = classify("Reliance Industries Ltd");
        assert_eq!(c.asset_subclass, "direct_equity");
        assert!((c.confidence_score - 0.8).abs() < 1e-9);

        let c = classify("SBI Fixed Deposit");
        assert_eq!(c.asset_class, AssetClass::Debt);
        assert_eq!(c.asset_subclass, "fixed_deposit");
        assert!((c.confidence_score - 0.7).abs() < 1e-9);
    }

    #[test]
    fn test_confidence_is_capped() {
        let c = classify("Axis Growth Fund Direct Plan Mutual Fund ELSS Tax Saver Multi Cap");
        assert_eq!(c.asset_subclass, "equity_mutual_fund");
        assert_eq!(c.confidence_score, 0.95);
    }

    #[test]
    fn test_longer_keywords_break_ties() {
        assert_eq!(classify("HDFC Liquid Fund").asset_subclass, "debt_mutual_fund");
        assert_eq!(classify("Nippon Gold ETF").asset_subclass, "gold");
    }

    #[test]
    fn test_no_hits_fall_back() {
        let c = classify("Qwerty Holdings");
        assert_eq!(c.asset_subclass, "other_unclassified");
        assert_eq!(c.confidence_score, 0.3);
        assert_eq!(c.verified_via, VerifiedVia::Rule);
    }

    #[tokio::test]
    async fn test_threshold_defers_weak_matches() {
        let strategy = RuleStrategy::new(0.7);
        let taxonomy = Taxonomy::default();
        let weak = RawAsset::new("Qwerty Holdings", 1.0, "t.csv");
        assert!(strategy.classify(&weak, &taxonomy).await.unwrap().is_none());

        let strong = RawAsset::new("SBI Fixed Deposit", 1.0, "t.csv");
        assert!(strategy.classify(&strong, &taxonomy).await.unwrap().is_some());
    }
}
