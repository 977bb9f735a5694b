use crate::error::{IngestError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub router: RouterConfig,
    pub extraction: ExtractionConfig,
    pub classification: ClassificationConfig,
    pub duplicates: DuplicateConfig,
    pub snapshots: SnapshotConfig,
    pub staging: StagingConfig,
    pub finalize: FinalizeConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RouterConfig {
    /// Files smaller than this are treated as empty or corrupt.
    pub min_file_bytes: usize,
    pub max_file_bytes: usize,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            min_file_bytes: 10,
            max_file_bytes: 10 * 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// How many leading rows are searched for a header row.
    pub header_scan_rows: usize,
    /// How many rows are serialized into the AI fallback prompt.
    pub ai_fallback_rows: usize,
    /// PDFs with less extracted text than this are treated as scanned.
    pub scanned_text_threshold: usize,
    pub max_ocr_pages: usize,
    /// Character budget of PDF text sent to the oracle.
    pub ai_text_budget: usize,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            header_scan_rows: 10,
            ai_fallback_rows: 50,
            scanned_text_threshold: 100,
            max_ocr_pages: 5,
            ai_text_budget: 30_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationConfig {
    pub max_concurrent: usize,
    /// Rule-tier results below this confidence are escalated to the AI tier.
    pub ai_threshold: f64,
    /// Try the AI tier before the rule tier for assets without ISIN or ticker.
    pub ai_primary_without_identifiers: bool,
}

impl Default for ClassificationConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            ai_threshold: 0.7,
            ai_primary_without_identifiers: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DuplicateConfig {
    /// Jaro-Winkler score at which two normalized names count as the same holding.
    pub name_similarity_threshold: f64,
    /// Absolute value difference under which two values are considered equal.
    pub value_tolerance: f64,
    /// Relative tolerance (percent of the larger value); the larger of the two tolerances applies.
    pub value_tolerance_pct: f64,
    pub merge_spread_pct: f64,
    pub keep_both_spread_pct: f64,
}

impl Default for DuplicateConfig {
    fn default() -> Self {
        Self {
            name_similarity_threshold: 0.92,
            value_tolerance: 1.0,
            value_tolerance_pct: 0.0,
            merge_spread_pct: 5.0,
            keep_both_spread_pct: 50.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub close_tolerance_days: i64,
    pub grouping_tolerance_days: i64,
}

impl Default for SnapshotConfig {
    fn default() -> Self {
        Self {
            close_tolerance_days: 15,
            grouping_tolerance_days: 7,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StagingConfig {
    pub autosave_debounce_ms: u64,
    pub session_ttl_hours: i64,
}

impl Default for StagingConfig {
    fn default() -> Self {
        Self {
            autosave_debounce_ms: 1000,
            session_ttl_hours: 24,
        }
    }
}

impl StagingConfig {
    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.autosave_debounce_ms)
    }

    pub fn session_ttl(&self) -> chrono::Duration {
        chrono::Duration::hours(self.session_ttl_hours)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeConfig {
    pub insert_batch_size: usize,
}

impl Default for FinalizeConfig {
    fn default() -> Self {
        Self {
            insert_batch_size: 100,
        }
    }
}

impl PipelineConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: PipelineConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    pub fn validate(&self) -> Result<()> {
        if self.router.min_file_bytes > self.router.max_file_bytes {
            return Err(IngestError::ConfigError(format!(
                "router.min_file_bytes ({}) exceeds router.max_file_bytes ({})",
                self.router.min_file_bytes, self.router.max_file_bytes
            )));
        }
        if self.extraction.header_scan_rows == 0 {
            return Err(IngestError::ConfigError(
                "extraction.header_scan_rows must be at least 1".to_string(),
            ));
        }
        if self.extraction.max_ocr_pages == 0 {
            return Err(IngestError::ConfigError(
                "extraction.max_ocr_pages must be at least 1".to_string(),
            ));
        }
        if self.classification.max_concurrent == 0 {
            return Err(IngestError::ConfigError(
                "classification.max_concurrent must be at least 1".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.classification.ai_threshold) {
            return Err(IngestError::ConfigError(format!(
                "classification.ai_threshold {} must be between 0.0 and 1.0",
                self.classification.ai_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.duplicates.name_similarity_threshold) {
            return Err(IngestError::ConfigError(format!(
                "duplicates.name_similarity_threshold {} must be between 0.0 and 1.0",
                self.duplicates.name_similarity_threshold
            )));
        }
        if self.duplicates.value_tolerance < 0.0 || self.duplicates.value_tolerance_pct < 0.0 {
            return Err(IngestError::ConfigError(
                "duplicate value tolerances must not be negative".to_string(),
            ));
        }
        if self.duplicates.merge_spread_pct > self.duplicates.keep_both_spread_pct {
            return Err(IngestError::ConfigError(format!(
                "duplicates.merge_spread_pct ({}) exceeds duplicates.keep_both_spread_pct ({})",
                self.duplicates.merge_spread_pct, self.duplicates.keep_both_spread_pct
            )));
        }
        if self.snapshots.close_tolerance_days < 0 || self.snapshots.grouping_tolerance_days < 0 {
            return Err(IngestError::ConfigError(
                "snapshot tolerances must not be negative".to_string(),
            ));
        }
        if self.staging.session_ttl_hours <= 0 {
            return Err(IngestError::ConfigError(
                "staging.session_ttl_hours must be positive".to_string(),
            ));
        }
        if self.finalize.insert_batch_size == 0 {
            return Err(IngestError::ConfigError(
                "finalize.insert_batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_documented_values() {
        let config = PipelineConfig::default();
        assert_eq!(config.classification.max_concurrent, 5);
        assert_eq!(config.classification.ai_threshold, 0.7);
        assert_eq!(config.snapshots.close_tolerance_days, 15);
        assert_eq!(config.snapshots.grouping_tolerance_days, 7);
        assert_eq!(config.staging.autosave_debounce_ms, 1000);
        assert_eq!(config.extraction.max_ocr_pages, 5);
        assert_eq!(config.finalize.insert_batch_size, 100);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_keeps_other_defaults() {
        let config = PipelineConfig::from_json_str(
            r#"{ "snapshots": { "close_tolerance_days": 20 }, "classification": { "max_concurrent": 2 } }"#,
        )
        .unwrap();
        assert_eq!(config.snapshots.close_tolerance_days, 20);
        assert_eq!(config.snapshots.grouping_tolerance_days, 7);
        assert_eq!(config.classification.max_concurrent, 2);
        assert_eq!(config.classification.ai_threshold, 0.7);
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        let result = PipelineConfig::from_json_str(r#"{ "classification": { "max_concurrent": 0 } }"#);
        assert!(matches!(result, Err(IngestError::ConfigError(_))));

        let result = PipelineConfig::from_json_str(
            r#"{ "duplicates": { "merge_spread_pct": 60.0, "keep_both_spread_pct": 50.0 } }"#,
        );
        assert!(matches!(result, Err(IngestError::ConfigError(_))));

        let result =
            PipelineConfig::from_json_str(r#"{ "router": { "min_file_bytes": 100, "max_file_bytes": 10 } }"#);
        assert!(matches!(result, Err(IngestError::ConfigError(_))));
    }
}
