//! Closed asset taxonomy shared by the rule tier, the AI prompt and edit validation.
//!
//! Each subclass belongs to exactly one [`AssetClass`]; a single entry is
//! marked as the fallback used when nothing else matches.

use crate::error::{IngestError, Result};
use crate::schema::{AssetClass, Classification, RiskLevel, VerifiedVia};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubclassDefinition {
    pub code: String,
    pub label: String,
    pub asset_class: AssetClass,
    pub risk_level: RiskLevel,
    pub expected_return_pct: f64,
    /// Lowercase words or phrases matched on word boundaries of the asset name.
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub is_fallback: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "TaxonomyDefinition")]
pub struct Taxonomy {
    subclasses: Vec<SubclassDefinition>,
}

#[derive(Deserialize)]
struct TaxonomyDefinition {
    subclasses: Vec<SubclassDefinition>,
}

impl TryFrom<TaxonomyDefinition> for Taxonomy {
    type Error = IngestError;

    fn try_from(definition: TaxonomyDefinition) -> Result<Self> {
        Taxonomy::new(definition.subclasses)
    }
}

impl Taxonomy {
    pub fn new(subclasses: Vec<SubclassDefinition>) -> Result<Self> {
        let taxonomy = Self { subclasses };
        taxonomy.validate()?;
        Ok(taxonomy)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn validate(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for entry in &self.subclasses {
            if entry.code.trim().is_empty() {
                return Err(IngestError::ConfigError(
                    "taxonomy contains a subclass with an empty code".to_string(),
                ));
            }
            if !seen.insert(entry.code.as_str()) {
                return Err(IngestError::ConfigError(format!(
                    "taxonomy subclass '{}' is defined twice",
                    entry.code
                )));
            }
        }

        let fallbacks = self.subclasses.iter().filter(|s| s.is_fallback).count();
        if fallbacks != 1 {
            return Err(IngestError::ConfigError(format!(
                "taxonomy must mark exactly one fallback subclass, found {}",
                fallbacks
            )));
        }
        Ok(())
    }

    pub fn subclasses(&self) -> &[SubclassDefinition] {
        &self.subclasses
    }

    pub fn get(&self, code: &str) -> Option<&SubclassDefinition> {
        self.subclasses.iter().find(|s| s.code == code)
    }

    pub fn fallback(&self) -> &SubclassDefinition {
        // construction guarantees exactly one fallback entry
        self.subclasses
            .iter()
            .find(|s| s.is_fallback)
            .unwrap_or(&self.subclasses[0])
    }

    pub fn subclasses_of(&self, class: AssetClass) -> impl Iterator<Item = &SubclassDefinition> {
        self.subclasses.iter().filter(move |s| s.asset_class == class)
    }

    /// Checks `subclass.class == class`.
    pub fn check_membership(&self, class: AssetClass, subclass: &str) -> std::result::Result<&SubclassDefinition, String> {
        match self.get(subclass) {
            Some(def) if def.asset_class == class => Ok(def),
            Some(def) => Err(format!(
                "subclass '{}' belongs to {}, not {}",
                subclass, def.asset_class, class
            )),
            None => Err(format!("subclass '{}' is not part of the taxonomy", subclass)),
        }
    }

    /// Builds a classification carrying the subclass defaults for risk and return.
    pub fn classification_for(
        &self,
        subclass: &str,
        confidence_score: f64,
        verified_via: VerifiedVia,
    ) -> Option<Classification> {
        self.get(subclass).map(|def| Classification {
            asset_class: def.asset_class,
            asset_subclass: def.code.clone(),
            risk_level: def.risk_level,
            expected_return_pct: def.expected_return_pct,
            confidence_score: confidence_score.clamp(0.0, 1.0),
            verified_via,
        })
    }

    /// Renders the closed list of classes and subclasses for oracle prompts.
    pub fn prompt_listing(&self) -> String {
        let mut listing = String::new();
        for class in AssetClass::ALL {
            let codes: Vec<&str> = self.subclasses_of(class).map(|s| s.code.as_str()).collect();
            if codes.is_empty() {
                continue;
            }
            listing.push_str(&format!("- {}: {}\n", class, codes.join(", ")));
        }
        listing
    }
}

fn entry(
    code: &str,
    label: &str,
    asset_class: AssetClass,
    risk_level: RiskLevel,
    expected_return_pct: f64,
    keywords: &[&str],
) -> SubclassDefinition {
    SubclassDefinition {
        code: code.to_string(),
        label: label.to_string(),
        asset_class,
        risk_level,
        expected_return_pct,
        keywords: keywords.iter().map(|k| k.to_string()).collect(),
        is_fallback: false,
    }
}

impl Default for Taxonomy {
    fn default() -> Self {
        use AssetClass::*;
        use RiskLevel::*;

        let mut fallback = entry("other_unclassified", "Unclassified", Other, Moderate, 6.0, &[]);
        fallback.is_fallback = true;

        Self {
            subclasses: vec![
                entry(
                    "direct_equity",
                    "Direct Stocks",
                    Equity,
                    High,
                    12.0,
                    &["shares", "stock", "stocks", "equity shares", "ltd", "limited", "industries", "corporation"],
                ),
                entry(
                    "large_cap_equity",
                    "Large Cap Stocks",
                    Equity,
                    High,
                    11.0,
                    &["large cap", "bluechip", "blue chip", "nifty 50", "sensex"],
                ),
                entry(
                    "mid_small_cap_equity",
                    "Mid & Small Cap Stocks",
                    Equity,
                    VeryHigh,
                    14.0,
                    &["mid cap", "midcap", "small cap", "smallcap", "emerging"],
                ),
                entry(
                    "equity_mutual_fund",
                    "Equity Mutual Fund",
                    Equity,
                    High,
                    12.0,
                    &["mutual fund", "fund", "growth", "flexi cap", "multi cap", "elss", "tax saver", "direct plan"],
                ),
                entry(
                    "index_fund_etf",
                    "Index Fund / ETF",
                    Equity,
                    High,
                    11.0,
                    &["etf", "index fund", "bees", "nifty", "index"],
                ),
                entry(
                    "international_equity",
                    "International Equity",
                    Equity,
                    VeryHigh,
                    10.0,
                    &["us equity", "nasdaq", "s&p 500", "international", "global", "overseas"],
                ),
                entry(
                    "fixed_deposit",
                    "Fixed Deposit",
                    Debt,
                    Low,
                    7.0,
                    &["fixed deposit", "fd", "term deposit", "recurring deposit", "rd"],
                ),
                entry(
                    "bonds",
                    "Bonds & Debentures",
                    Debt,
                    Low,
                    7.5,
                    &["bond", "bonds", "debenture", "ncd", "g-sec", "gsec", "gilt", "treasury", "t-bill", "sdl"],
                ),
                entry(
                    "debt_mutual_fund",
                    "Debt Mutual Fund",
                    Debt,
                    Low,
                    7.0,
                    &["debt fund", "liquid fund", "gilt fund", "corporate bond fund", "short duration", "overnight fund", "money market", "banking and psu"],
                ),
                entry(
                    "provident_fund",
                    "Provident & Pension Funds",
                    Debt,
                    Low,
                    7.5,
                    &["ppf", "epf", "provident fund", "provident", "nps", "pension"],
                ),
                entry(
                    "savings_account",
                    "Savings Account",
                    Cash,
                    Low,
                    3.0,
                    &["savings", "savings account", "current account", "bank balance", "sb account"],
                ),
                entry(
                    "cash_equivalent",
                    "Cash & Wallets",
                    Cash,
                    Low,
                    0.0,
                    &["cash", "wallet", "cash in hand", "sweep"],
                ),
                entry(
                    "residential_property",
                    "Residential Property",
                    RealEstate,
                    Moderate,
                    8.0,
                    &["flat", "apartment", "house", "villa", "residential", "home"],
                ),
                entry(
                    "commercial_property",
                    "Commercial Property & Land",
                    RealEstate,
                    Moderate,
                    9.0,
                    &["shop", "office space", "commercial", "land", "plot", "warehouse"],
                ),
                entry(
                    "reit",
                    "REITs & InvITs",
                    RealEstate,
                    Moderate,
                    9.0,
                    &["reit", "invit", "real estate investment trust"],
                ),
                entry(
                    "gold",
                    "Gold & Precious Metals",
                    Other,
                    Moderate,
                    8.0,
                    &["gold", "sgb", "sovereign gold", "silver", "jewellery", "bullion"],
                ),
                entry(
                    "crypto",
                    "Crypto Assets",
                    Other,
                    VeryHigh,
                    15.0,
                    &["bitcoin", "btc", "ethereum", "eth", "crypto", "usdt"],
                ),
                fallback,
            ],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_taxonomy_is_valid() {
        let taxonomy = Taxonomy::default();
        assert!(taxonomy.validate().is_ok());
        assert_eq!(taxonomy.fallback().code, "other_unclassified");
        assert_eq!(taxonomy.fallback().asset_class, AssetClass::Other);
    }

    #[test]
    fn test_membership_check() {
        let taxonomy = Taxonomy::default();
        assert!(taxonomy.check_membership(AssetClass::Debt, "fixed_deposit").is_ok());

        let err = taxonomy
            .check_membership(AssetClass::Equity, "fixed_deposit")
            .unwrap_err();
        assert!(err.contains("belongs to debt"));

        let err = taxonomy
            .check_membership(AssetClass::Equity, "space_stocks")
            .unwrap_err();
        assert!(err.contains("not part of the taxonomy"));
    }

    #[test]
    fn test_rejects_duplicate_codes_and_missing_fallback() {
        let mut subclasses = Taxonomy::default().subclasses;
        subclasses.push(subclasses[0].clone());
        assert!(Taxonomy::new(subclasses).is_err());

        let no_fallback: Vec<SubclassDefinition> = Taxonomy::default()
            .subclasses
            .into_iter()
            .filter(|s| !s.is_fallback)
            .collect();
        assert!(matches!(
            Taxonomy::new(no_fallback),
            Err(IngestError::ConfigError(_))
        ));
    }

    #[test]
    fn test_classification_for_uses_subclass_defaults() {
        let taxonomy = Taxonomy::default();
        let c = taxonomy
            .classification_for("gold", 1.4, VerifiedVia::Manual)
            .unwrap();
        assert_eq!(c.asset_class, AssetClass::Other);
        assert_eq!(c.expected_return_pct, 8.0);
        assert_eq!(c.confidence_score, 1.0);
    }

    #[test]
    fn test_prompt_listing_groups_by_class() {
        let listing = Taxonomy::default().prompt_listing();
        assert!(listing.contains("- debt: fixed_deposit, bonds, debt_mutual_fund, provident_fund"));
        assert!(listing.contains("- real_estate:"));
    }

    #[test]
    fn test_from_json_loads_custom_taxonomy() {
        let json = r#"{
            "subclasses": [
                {"code": "stocks", "label": "Stocks", "asset_class": "equity",
                 "risk_level": "high", "expected_return_pct": 10.0, "keywords": ["stock"]},
                {"code": "misc", "label": "Misc", "asset_class": "other",
                 "risk_level": "moderate", "expected_return_pct": 5.0, "is_fallback": true}
            ]
        }"#;
        let taxonomy = Taxonomy::from_json_str(json).unwrap();
        assert_eq!(taxonomy.subclasses.len(), 2);
        assert_eq!(taxonomy.fallback().code, "misc");
    }
}
