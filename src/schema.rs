use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Equity,
    Debt,
    Cash,
    RealEstate,
    Other,
}

impl AssetClass {
    pub const ALL: [AssetClass; 5] = [
        AssetClass::Equity,
        AssetClass::Debt,
        AssetClass::Cash,
        AssetClass::RealEstate,
        AssetClass::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AssetClass::Equity => "equity",
            AssetClass::Debt => "debt",
            AssetClass::Cash => "cash",
            AssetClass::RealEstate => "real_estate",
            AssetClass::Other => "other",
        }
    }

    /// Lenient parse for oracle output ("Real Estate", "real-estate", "EQUITY").
    pub fn parse(value: &str) -> Option<Self> {
        let normalized: String = value
            .trim()
            .to_lowercase()
            .chars()
            .map(|c| if c == ' ' || c == '-' { '_' } else { c })
            .collect();
        match normalized.as_str() {
            "equity" | "equities" | "stock" | "stocks" => Some(AssetClass::Equity),
            "debt" | "fixed_income" | "bond" | "bonds" => Some(AssetClass::Debt),
            "cash" => Some(AssetClass::Cash),
            "real_estate" | "realestate" | "property" => Some(AssetClass::RealEstate),
            "other" | "others" | "alternative" | "alternatives" => Some(AssetClass::Other),
            _ => None,
        }
    }
}

impl fmt::Display for AssetClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
    VeryHigh,
}

/// Which classification tier produced a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifiedVia {
    Lookup,
    Rule,
    Ai,
    Manual,
}

/// A holding exactly as an extractor emitted it. `current_value` is always positive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawAsset {
    pub name: String,
    pub current_value: f64,
    pub quantity: Option<f64>,
    pub purchase_price: Option<f64>,
    pub purchase_date: Option<NaiveDate>,
    pub source_file: String,
    pub isin: Option<String>,
    pub ticker_symbol: Option<String>,
    pub exchange: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

impl RawAsset {
    pub fn new(name: impl Into<String>, current_value: f64, source_file: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            current_value,
            quantity: None,
            purchase_price: None,
            purchase_date: None,
            source_file: source_file.into(),
            isin: None,
            ticker_symbol: None,
            exchange: None,
            notes: None,
        }
    }

    pub fn with_quantity(mut self, quantity: f64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_purchase(mut self, price: Option<f64>, date: Option<NaiveDate>) -> Self {
        self.purchase_price = price;
        self.purchase_date = date;
        self
    }

    pub fn with_isin(mut self, isin: impl Into<String>) -> Self {
        self.isin = Some(isin.into());
        self
    }

    pub fn with_ticker(mut self, ticker: impl Into<String>, exchange: Option<String>) -> Self {
        self.ticker_symbol = Some(ticker.into());
        self.exchange = exchange;
        self
    }

    pub fn has_identifiers(&self) -> bool {
        self.isin.is_some() || self.ticker_symbol.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub asset_class: AssetClass,
    pub asset_subclass: String,
    pub risk_level: RiskLevel,
    pub expected_return_pct: f64,
    pub confidence_score: f64,
    pub verified_via: VerifiedVia,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifiedAsset {
    #[serde(flatten)]
    pub asset: RawAsset,
    #[serde(flatten)]
    pub classification: Classification,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchType {
    Name,
    NameAndValue,
    Exact,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DuplicateMatch {
    pub candidate_id: String,
    pub candidate_name: String,
    pub candidate_value: f64,
    pub candidate_source: String,
    pub similarity_score: f64,
    pub match_type: MatchType,
}

/// An editable holding inside a review session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedAsset {
    pub id: Uuid,
    #[serde(flatten)]
    pub classified: ClassifiedAsset,
    pub is_duplicate: bool,
    #[serde(default)]
    pub duplicate_matches: Vec<DuplicateMatch>,
    pub is_selected: bool,
    pub is_edited: bool,
    /// Candidate ids whose duplicate warning the user dismissed.
    #[serde(default)]
    pub ignored_duplicates: Vec<String>,
    /// Set on members collapsed by a merge resolution.
    #[serde(default)]
    pub merged_into: Option<Uuid>,
}

impl StagedAsset {
    pub fn new(classified: ClassifiedAsset) -> Self {
        Self {
            id: Uuid::new_v4(),
            classified,
            is_duplicate: false,
            duplicate_matches: Vec::new(),
            is_selected: true,
            is_edited: false,
            ignored_duplicates: Vec::new(),
            merged_into: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.classified.asset.name
    }

    pub fn value(&self) -> f64 {
        self.classified.asset.current_value
    }

    pub fn source_file(&self) -> &str {
        &self.classified.asset.source_file
    }

    pub fn asset_class(&self) -> AssetClass {
        self.classified.classification.asset_class
    }

    pub fn confidence(&self) -> f64 {
        self.classified.classification.confidence_score
    }

    /// Whether this record still takes part in duplicate detection.
    pub fn is_active(&self) -> bool {
        self.merged_into.is_none()
    }
}

/// Partial update of a staged asset. `None` fields are left untouched.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StagedAssetPatch {
    pub id: Uuid,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub current_value: Option<f64>,
    #[serde(default)]
    pub quantity: Option<f64>,
    #[serde(default)]
    pub purchase_price: Option<f64>,
    #[serde(default)]
    pub purchase_date: Option<NaiveDate>,
    #[serde(default)]
    pub isin: Option<String>,
    #[serde(default)]
    pub ticker_symbol: Option<String>,
    #[serde(default)]
    pub exchange: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub asset_class: Option<AssetClass>,
    #[serde(default)]
    pub asset_subclass: Option<String>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
    #[serde(default)]
    pub expected_return_pct: Option<f64>,
    #[serde(default)]
    pub is_selected: Option<bool>,
}

impl StagedAssetPatch {
    pub fn new(id: Uuid) -> Self {
        Self {
            id,
            ..Default::default()
        }
    }

    /// True when the patch only toggles selection.
    pub fn is_selection_only(&self) -> bool {
        let content = StagedAssetPatch {
            id: self.id,
            is_selected: None,
            ..self.clone()
        };
        content == StagedAssetPatch::new(self.id)
    }

    /// True when the patch changes a field duplicate detection looks at.
    pub fn touches_identity(&self) -> bool {
        self.name.is_some()
            || self.current_value.is_some()
            || self.quantity.is_some()
            || self.isin.is_some()
            || self.ticker_symbol.is_some()
            || self.is_selected.is_some()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateConfidence {
    Low,
    Medium,
    High,
    Manual,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DateSource {
    DocumentContent,
    Filename,
    UserInput,
    UploadTimestamp,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatementDateResult {
    pub date: Option<NaiveDate>,
    pub confidence: DateConfidence,
    pub source: DateSource,
}

impl StatementDateResult {
    pub fn new(date: NaiveDate, confidence: DateConfidence, source: DateSource) -> Self {
        Self {
            date: Some(date),
            confidence,
            source,
        }
    }

    pub fn manual(date: NaiveDate) -> Self {
        Self::new(date, DateConfidence::Manual, DateSource::UserInput)
    }

    pub fn is_accepted(&self) -> bool {
        self.date.is_some() && self.confidence != DateConfidence::Low
    }
}

/// Aggregate value per asset class.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassTotals {
    pub equity: f64,
    pub debt: f64,
    pub cash: f64,
    pub real_estate: f64,
    pub other: f64,
}

impl ClassTotals {
    pub fn add(&mut self, class: AssetClass, value: f64) {
        match class {
            AssetClass::Equity => self.equity += value,
            AssetClass::Debt => self.debt += value,
            AssetClass::Cash => self.cash += value,
            AssetClass::RealEstate => self.real_estate += value,
            AssetClass::Other => self.other += value,
        }
    }

    pub fn get(&self, class: AssetClass) -> f64 {
        match class {
            AssetClass::Equity => self.equity,
            AssetClass::Debt => self.debt,
            AssetClass::Cash => self.cash,
            AssetClass::RealEstate => self.real_estate,
            AssetClass::Other => self.other,
        }
    }

    pub fn merge(&mut self, other: &ClassTotals) {
        for class in AssetClass::ALL {
            self.add(class, other.get(class));
        }
    }

    pub fn total(&self) -> f64 {
        self.equity + self.debt + self.cash + self.real_estate + self.other
    }

    pub fn from_assets<'a>(assets: impl IntoIterator<Item = &'a ClassifiedAsset>) -> Self {
        let mut totals = ClassTotals::default();
        for asset in assets {
            totals.add(asset.classification.asset_class, asset.asset.current_value);
        }
        totals
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub id: String,
    pub name: Option<String>,
    pub statement_date: Option<NaiveDate>,
    pub totals: ClassTotals,
    pub source_files: Vec<String>,
    pub created_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn total_value(&self) -> f64 {
        self.totals.total()
    }
}

/// Insert payload for a new snapshot; the store assigns id and timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewSnapshot {
    pub name: Option<String>,
    pub statement_date: Option<NaiveDate>,
    pub totals: ClassTotals,
    pub source_files: Vec<String>,
}

/// A committed holding row under a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedAsset {
    pub id: String,
    pub snapshot_id: String,
    #[serde(flatten)]
    pub asset: ClassifiedAsset,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotMatchType {
    Exact,
    Close,
    None,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestedAction {
    Merge,
    Prompt,
    CreateNew,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotMatchResult {
    pub match_type: SnapshotMatchType,
    pub matched_snapshot_id: Option<String>,
    pub days_difference: Option<i64>,
    pub suggested_action: SuggestedAction,
}

impl SnapshotMatchResult {
    pub fn none() -> Self {
        Self {
            match_type: SnapshotMatchType::None,
            matched_snapshot_id: None,
            days_difference: None,
            suggested_action: SuggestedAction::CreateNew,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    Pending,
    InReview,
    Completed,
    Cancelled,
}

impl UploadStatus {
    pub fn is_open(&self) -> bool {
        matches!(self, UploadStatus::Pending | UploadStatus::InReview)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            UploadStatus::Pending => "pending",
            UploadStatus::InReview => "in_review",
            UploadStatus::Completed => "completed",
            UploadStatus::Cancelled => "cancelled",
        };
        f.write_str(label)
    }
}

/// One ingestion batch under review.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TempUpload {
    pub id: Uuid,
    pub user_id: String,
    pub status: UploadStatus,
    pub source_files: Vec<String>,
    pub statement_date: StatementDateResult,
    pub proposed_name: Option<String>,
    pub snapshot_match: SnapshotMatchResult,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl TempUpload {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}
