//! Infers the single as-of date of a batch.
//!
//! Precedence is document content, then filename, then the upload timestamp.
//! A tier only wins when its confidence is above `low`; the upload
//! timestamp always succeeds.

use crate::llm::{prompts, ClassificationOracle};
use crate::schema::{DateConfidence, DateSource, StatementDateResult};
use crate::utils::{last_day_of_month, month_from_name, parse_flexible_date};
use chrono::{DateTime, NaiveDate, Utc};
use log::{debug, info, warn};
use regex::Regex;
use std::sync::{Arc, OnceLock};

const CONTENT_KEYWORDS: &str = r"(?i)\b(?:closing\s+balance\s+as\s+on|holdings?\s+as\s+on|statement\s+date|valuation\s+date|period\s+ending|period\s+ended|for\s+the\s+period(?:\s+\S+\s+to)?|as\s+of|as\s+on)\s*[:\-]?\s*";
const NUMERIC_DATE: &str = r"(\d{1,2}[-/.]\d{1,2}[-/.]\d{4}|\d{4}-\d{2}-\d{2})";
const WORDY_DATE: &str = r"(\d{1,2}[\s\-]+[A-Za-z]{3,9}\.?[\s\-,]+\d{4}|[A-Za-z]{3,9}\.?\s+\d{1,2},?\s+\d{4})";

fn content_patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        [NUMERIC_DATE, WORDY_DATE]
            .iter()
            .filter_map(|date| Regex::new(&format!("{}{}", CONTENT_KEYWORDS, date)).ok())
            .collect()
    })
}

fn regex(pattern: &'static str, cell: &'static OnceLock<Option<Regex>>) -> Option<&'static Regex> {
    cell.get_or_init(|| Regex::new(pattern).ok()).as_ref()
}

#[derive(Clone, Default)]
pub struct StatementDateResolver {
    oracle: Option<Arc<dyn ClassificationOracle>>,
}

impl StatementDateResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ClassificationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    /// Never fails; the last resort is the upload date at low confidence.
    pub async fn resolve(
        &self,
        document_text: Option<&str>,
        extraction_hint: Option<NaiveDate>,
        filename: &str,
        uploaded_at: DateTime<Utc>,
    ) -> StatementDateResult {
        if let Some(result) = document_text.and_then(date_from_content) {
            info!("'{}': statement date {:?} from document content", filename, result.date);
            return result;
        }

        if let Some(date) = extraction_hint {
            debug!("'{}': statement date {} from extraction", filename, date);
            return StatementDateResult::new(date, DateConfidence::Medium, DateSource::DocumentContent);
        }

        if let (Some(text), Some(oracle)) = (document_text, &self.oracle) {
            if let Some(result) = self.ask_oracle(oracle.as_ref(), text, filename).await {
                return result;
            }
        }

        if let Some(result) = date_from_filename(filename).filter(|r| r.is_accepted()) {
            info!("'{}': statement date {:?} from filename", filename, result.date);
            return result;
        }

        debug!("'{}': falling back to upload timestamp", filename);
        StatementDateResult::new(
            uploaded_at.date_naive(),
            DateConfidence::Low,
            DateSource::UploadTimestamp,
        )
    }

    async fn ask_oracle(
        &self,
        oracle: &dyn ClassificationOracle,
        text: &str,
        filename: &str,
    ) -> Option<StatementDateResult> {
        let excerpt: String = text.chars().take(4000).collect();
        let response = match oracle
            .classify_text(prompts::SYSTEM_PROMPT_STATEMENT_DATE, &excerpt)
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("'{}': statement date oracle failed: {}", filename, e);
                return None;
            }
        };

        let date = response
            .get("date")
            .and_then(|d| d.as_str())
            .and_then(crate::extract::ai::parse_iso_date)?;
        let confidence = match response.get("confidence").and_then(|c| c.as_str()) {
            Some(c) if c.eq_ignore_ascii_case("high") => DateConfidence::High,
            Some(c) if c.eq_ignore_ascii_case("low") => DateConfidence::Low,
            _ => DateConfidence::Medium,
        };
        let result = StatementDateResult::new(date, confidence, DateSource::DocumentContent);
        if result.is_accepted() {
            info!("'{}': statement date {} from oracle ({:?})", filename, date, confidence);
            Some(result)
        } else {
            None
        }
    }
}

/// Keyword-anchored dates ("as on 30-Nov-2024", "Statement Date: 2024-11-30").
pub fn date_from_content(text: &str) -> Option<StatementDateResult> {
    content_patterns()
        .iter()
        .filter_map(|pattern| {
            pattern.captures_iter(text).find_map(|caps| {
                let m = caps.get(1)?;
                parse_content_date(m.as_str()).map(|date| (m.start(), date))
            })
        })
        .min_by_key(|(position, _)| *position)
        .map(|(_, date)| StatementDateResult::new(date, DateConfidence::High, DateSource::DocumentContent))
}

fn parse_content_date(raw: &str) -> Option<NaiveDate> {
    let cleaned = raw.trim().replace(['.', ','], " ").replace('/', "-");
    let normalized = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    parse_flexible_date(&normalized).or_else(|| parse_day_month_words(&normalized))
}

/// "30 Nov 2024", "30-Sept-2024", "Nov 30 2024".
fn parse_day_month_words(text: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = text
        .split(|c: char| c == ' ' || c == '-')
        .filter(|p| !p.is_empty())
        .collect();
    let [a, b, year] = parts.as_slice() else {
        return None;
    };
    let year: i32 = year.parse().ok()?;
    let (day, month) = match (a.parse::<u32>(), b.parse::<u32>()) {
        (Ok(day), _) => (day, month_from_name(b)?),
        (_, Ok(day)) => (day, month_from_name(a)?),
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Filename patterns, most specific first. Returns low-confidence results too.
pub fn date_from_filename(filename: &str) -> Option<StatementDateResult> {
    static DMY: OnceLock<Option<Regex>> = OnceLock::new();
    static YMD: OnceLock<Option<Regex>> = OnceLock::new();
    static COMPACT: OnceLock<Option<Regex>> = OnceLock::new();
    static MONTH_YEAR: OnceLock<Option<Regex>> = OnceLock::new();
    static YEAR_MONTH: OnceLock<Option<Regex>> = OnceLock::new();
    static YEAR: OnceLock<Option<Regex>> = OnceLock::new();

    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename);
    let from_filename = |date, confidence| StatementDateResult::new(date, confidence, DateSource::Filename);

    if let Some(caps) = regex(r"(?:^|\D)(\d{1,2})[-/_.](\d{1,2})[-/_.](\d{4})(?:\D|$)", &DMY)
        .and_then(|re| re.captures(stem))
    {
        let day = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let year = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(from_filename(date, DateConfidence::High));
        }
    }

    if let Some(caps) = regex(r"(?:^|\D)(\d{4})[-_.](\d{1,2})[-_.](\d{1,2})(?:\D|$)", &YMD)
        .and_then(|re| re.captures(stem))
    {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(from_filename(date, DateConfidence::High));
        }
    }

    if let Some(caps) = regex(r"(?:^|\D)((?:19|20)\d{2})(\d{2})(\d{2})(?:\D|$)", &COMPACT)
        .and_then(|re| re.captures(stem))
    {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        let day = caps[3].parse().ok()?;
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            return Some(from_filename(date, DateConfidence::High));
        }
    }

    if let Some(re) = regex(r"(?i)([a-z]{3,9})[-_\s.]*((?:19|20)\d{2})", &MONTH_YEAR) {
        for caps in re.captures_iter(stem) {
            let Some(month) = month_from_name(&caps[1]) else {
                continue;
            };
            let year = caps[2].parse().ok()?;
            if let Some(date) = last_day_of_month(year, month) {
                return Some(from_filename(date, DateConfidence::Medium));
            }
        }
    }

    if let Some(caps) = regex(r"(?:^|\D)((?:19|20)\d{2})[-_.](\d{1,2})(?:\D|$)", &YEAR_MONTH)
        .and_then(|re| re.captures(stem))
    {
        let year = caps[1].parse().ok()?;
        let month = caps[2].parse().ok()?;
        if let Some(date) = last_day_of_month(year, month) {
            return Some(from_filename(date, DateConfidence::Medium));
        }
    }

    if let Some(caps) = regex(r"(?:^|\D)((?:19|20)\d{2})(?:\D|$)", &YEAR).and_then(|re| re.captures(stem)) {
        let year: i32 = caps[1].parse().ok()?;
        let date = NaiveDate::from_ymd_opt(year, 12, 31)?;
        return Some(from_filename(date, DateConfidence::Low));
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Result;
    use crate::llm::PageImage;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use serde_json::{json, Value};

    fn d(y: i32, m: u32, day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, day).unwrap()
    }

    fn uploaded() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 12, 5, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_content_keywords() {
        let r = date_from_content("Consolidated Account Statement\nHoldings as on 30-Nov-2024").unwrap();
        assert_eq!(r.date, Some(d(2024, 11, 30)));
        assert_eq!(r.confidence, DateConfidence::High);
        assert_eq!(r.source, DateSource::DocumentContent);

        let r = date_from_content("Statement Date: 2024-11-30").unwrap();
        assert_eq!(r.date, Some(d(2024, 11, 30)));

        let r = date_from_content("Portfolio valuation as of November 29, 2024").unwrap();
        assert_eq!(r.date, Some(d(2024, 11, 29)));

        let r = date_from_content("Closing balance as on 31/10/2024").unwrap();
        assert_eq!(r.date, Some(d(2024, 10, 31)));

        assert!(date_from_content("Transactions on 15/10/2024").is_none());
    }

    #[test]
    fn test_filename_priority() {
        let r = date_from_filename("holdings_30-11-2024.csv").unwrap();
        assert_eq!((r.date, r.confidence), (Some(d(2024, 11, 30)), DateConfidence::High));

        let r = date_from_filename("cas_2024-11-30.pdf").unwrap();
        assert_eq!((r.date, r.confidence), (Some(d(2024, 11, 30)), DateConfidence::High));

        let r = date_from_filename("export20241130.xlsx").unwrap();
        assert_eq!(r.date, Some(d(2024, 11, 30)));

        let r = date_from_filename("Zerodha_Nov_2024.csv").unwrap();
        assert_eq!((r.date, r.confidence), (Some(d(2024, 11, 30)), DateConfidence::Medium));

        let r = date_from_filename("statement-2024-02.pdf").unwrap();
        assert_eq!((r.date, r.confidence), (Some(d(2024, 2, 29)), DateConfidence::Medium));

        let r = date_from_filename("taxes_2023.pdf").unwrap();
        assert_eq!((r.date, r.confidence), (Some(d(2023, 12, 31)), DateConfidence::Low));

        assert!(date_from_filename("holdings.csv").is_none());
    }

    #[tokio::test]
    async fn test_resolve_falls_through_to_upload_timestamp() {
        let resolver = StatementDateResolver::new();

        let r = resolver
            .resolve(Some("Holdings as on 30-Nov-2024"), None, "taxes_2023.pdf", uploaded())
            .await;
        assert_eq!(r.source, DateSource::DocumentContent);

        let r = resolver.resolve(None, None, "Zerodha_Nov_2024.csv", uploaded()).await;
        assert_eq!(r.source, DateSource::Filename);

        // a bare year is low confidence and therefore skipped
        let r = resolver.resolve(None, None, "taxes_2023.pdf", uploaded()).await;
        assert_eq!(r.source, DateSource::UploadTimestamp);
        assert_eq!(r.confidence, DateConfidence::Low);
        assert_eq!(r.date, Some(d(2024, 12, 5)));
    }

    #[tokio::test]
    async fn test_extraction_hint_beats_filename() {
        let r = StatementDateResolver::new()
            .resolve(None, Some(d(2024, 11, 28)), "Zerodha_Oct_2024.csv", uploaded())
            .await;
        assert_eq!(r.date, Some(d(2024, 11, 28)));
        assert_eq!(r.confidence, DateConfidence::Medium);
    }

    struct DateOracle(Value);

    #[async_trait]
    impl ClassificationOracle for DateOracle {
        async fn classify_text(&self, _system: &str, _user: &str) -> Result<Value> {
            Ok(self.0.clone())
        }

        async fn classify_images(&self, _prompt: &str, _images: &[PageImage]) -> Result<Value> {
            Ok(Value::Null)
        }
    }

    #[tokio::test]
    async fn test_oracle_answers_are_validated() {
        let resolver = StatementDateResolver::new()
            .with_oracle(Arc::new(DateOracle(json!({ "date": "2024-11-15", "confidence": "high" }))));
        let r = resolver.resolve(Some("no keywords here"), None, "x.pdf", uploaded()).await;
        assert_eq!(r.date, Some(d(2024, 11, 15)));
        assert_eq!(r.confidence, DateConfidence::High);

        let resolver = StatementDateResolver::new()
            .with_oracle(Arc::new(DateOracle(json!({ "date": "15 Nov", "confidence": "high" }))));
        let r = resolver.resolve(Some("no keywords here"), None, "x.pdf", uploaded()).await;
        assert_eq!(r.source, DateSource::UploadTimestamp);

        let resolver = StatementDateResolver::new()
            .with_oracle(Arc::new(DateOracle(json!({ "date": "2024-11-15", "confidence": "low" }))));
        let r = resolver.resolve(Some("no keywords here"), None, "x.pdf", uploaded()).await;
        assert_eq!(r.source, DateSource::UploadTimestamp);
    }
}
