//! Extractors turning uploaded statements into [`RawAsset`] records.
//!
//! Tabular sources go through header matching, then the headerless
//! two-column heuristic, then an oracle-assisted fallback. PDFs go to
//! text-based oracle extraction, or to the vision oracle when the text
//! layer is too thin to be anything but a scan.

pub mod ai;
pub mod delimited;
pub mod pdf;
pub mod spreadsheet;
pub mod tabular;

use crate::config::ExtractionConfig;
use crate::error::{IngestError, Result};
use crate::llm::{prompts, ClassificationOracle, PageRasterizer};
use crate::router::{FileFormat, UploadedFile};
use crate::schema::RawAsset;
use chrono::NaiveDate;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionMethod {
    Tabular,
    Headerless,
    AiTabular,
    PdfText,
    PdfOcr,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractionOutput {
    pub raw_assets: Vec<RawAsset>,
    pub rows_dropped: usize,
    pub method: ExtractionMethod,
    pub statement_date_hint: Option<NaiveDate>,
    /// Text the statement date resolver can search.
    pub document_text: Option<String>,
    pub warnings: Vec<String>,
}

#[derive(Clone)]
pub struct DocumentExtractor {
    config: ExtractionConfig,
    oracle: Option<Arc<dyn ClassificationOracle>>,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
}

impl DocumentExtractor {
    pub fn new(config: ExtractionConfig) -> Self {
        Self {
            config,
            oracle: None,
            rasterizer: None,
        }
    }

    pub fn with_oracle(mut self, oracle: Arc<dyn ClassificationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn with_rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub async fn extract(&self, format: FileFormat, file: &UploadedFile) -> Result<ExtractionOutput> {
        let output = match format {
            FileFormat::Csv => {
                let rows = delimited::read_rows(&file.bytes, &file.filename)?;
                self.extract_table(vec![rows], &file.filename).await?
            }
            FileFormat::Spreadsheet => {
                let sheets = spreadsheet::read_sheets(&file.bytes, &file.filename)?;
                self.extract_table(sheets.into_iter().map(|s| s.rows).collect(), &file.filename)
                    .await?
            }
            FileFormat::Pdf => self.extract_pdf(file).await?,
        };

        if output.raw_assets.is_empty() {
            return Err(IngestError::parsing(
                &file.filename,
                format!("no valid holdings found ({} rows dropped)", output.rows_dropped),
            ));
        }

        info!(
            "Extracted {} assets from '{}' via {:?} ({} rows dropped)",
            output.raw_assets.len(),
            file.filename,
            output.method,
            output.rows_dropped
        );
        Ok(output)
    }

    async fn extract_table(&self, sheets: Vec<Vec<Vec<String>>>, filename: &str) -> Result<ExtractionOutput> {
        if sheets.iter().all(|rows| rows.is_empty()) {
            return Err(IngestError::parsing(filename, "file contains no rows"));
        }

        let mut output = ExtractionOutput {
            raw_assets: Vec::new(),
            rows_dropped: 0,
            method: ExtractionMethod::Headerless,
            statement_date_hint: None,
            document_text: None,
            warnings: Vec::new(),
        };
        let mut preambles = Vec::new();
        let mut any_header = false;

        for rows in &sheets {
            let outcome = tabular::parse_rows(rows, filename, self.config.header_scan_rows);
            any_header |= outcome.layout == tabular::Layout::Header;
            output.rows_dropped += outcome.rows_dropped;
            output.raw_assets.extend(outcome.assets);
            if !outcome.preamble.is_empty() {
                preambles.push(outcome.preamble);
            }
        }

        if any_header {
            output.method = ExtractionMethod::Tabular;
        } else {
            info!("'{}': no header row recognised, using two-column heuristic", filename);
        }
        if output.rows_dropped > 0 {
            debug!("'{}': dropped {} invalid rows", filename, output.rows_dropped);
            output
                .warnings
                .push(format!("{} rows skipped (missing name, non-positive value or total row)", output.rows_dropped));
        }
        if !preambles.is_empty() {
            output.document_text = Some(preambles.join("\n"));
        }

        if output.raw_assets.is_empty() && !any_header {
            let dump: Vec<Vec<String>> = sheets
                .into_iter()
                .flatten()
                .filter(|row| row.iter().any(|c| !c.is_empty()))
                .take(self.config.ai_fallback_rows)
                .collect();
            return self.extract_table_with_oracle(dump, filename, output).await;
        }
        Ok(output)
    }

    async fn extract_table_with_oracle(
        &self,
        rows: Vec<Vec<String>>,
        filename: &str,
        mut output: ExtractionOutput,
    ) -> Result<ExtractionOutput> {
        let oracle = self.oracle.as_ref().ok_or_else(|| {
            IngestError::parsing(filename, "no recognisable holdings and no extraction oracle configured")
        })?;

        info!("'{}': escalating {} rows to AI-assisted extraction", filename, rows.len());
        let system_prompt = with_schema(prompts::SYSTEM_PROMPT_TABULAR)?;
        let response = oracle
            .classify_text(&system_prompt, &prompts::tabular_user_prompt(filename, &rows))
            .await
            .map_err(|e| IngestError::parsing(filename, format!("AI extraction failed: {}", e)))?;

        let validated = ai::validate_response(&response, filename);
        if validated.dropped > 0 {
            warn!("'{}': {} AI records failed validation", filename, validated.dropped);
            output
                .warnings
                .push(format!("{} AI-extracted records failed validation", validated.dropped));
        }
        output.raw_assets = validated.assets;
        output.rows_dropped += validated.dropped;
        output.statement_date_hint = validated.statement_date;
        output.method = ExtractionMethod::AiTabular;
        Ok(output)
    }

    async fn extract_pdf(&self, file: &UploadedFile) -> Result<ExtractionOutput> {
        let text = pdf::extract_text(&file.bytes, &file.filename)?;

        if pdf::is_scanned(&text, self.config.scanned_text_threshold) {
            info!("'{}': text layer below threshold, treating as scanned", file.filename);
            return self.extract_scanned_pdf(file).await;
        }

        let oracle = self.oracle.as_ref().ok_or_else(|| {
            IngestError::parsing(&file.filename, "text PDF extraction requires an oracle")
        })?;

        let excerpt = pdf::truncate_chars(&text, self.config.ai_text_budget);
        let mut warnings = Vec::new();
        if excerpt.len() < text.len() {
            warnings.push(format!(
                "statement text truncated to {} characters",
                self.config.ai_text_budget
            ));
        }

        let system_prompt = with_schema(prompts::SYSTEM_PROMPT_DOCUMENT)?;
        let response = oracle
            .classify_text(&system_prompt, &prompts::document_user_prompt(&file.filename, excerpt))
            .await
            .map_err(|e| IngestError::parsing(&file.filename, format!("AI extraction failed: {}", e)))?;

        let validated = ai::validate_response(&response, &file.filename);
        if validated.dropped > 0 {
            warnings.push(format!("{} AI-extracted records failed validation", validated.dropped));
        }
        Ok(ExtractionOutput {
            raw_assets: validated.assets,
            rows_dropped: validated.dropped,
            method: ExtractionMethod::PdfText,
            statement_date_hint: validated.statement_date,
            document_text: Some(excerpt.to_string()),
            warnings,
        })
    }

    async fn extract_scanned_pdf(&self, file: &UploadedFile) -> Result<ExtractionOutput> {
        let (oracle, rasterizer) = match (&self.oracle, &self.rasterizer) {
            (Some(oracle), Some(rasterizer)) => (oracle, rasterizer),
            _ => {
                return Err(IngestError::parsing(
                    &file.filename,
                    "scanned PDF requires a page rasterizer and a vision oracle",
                ))
            }
        };

        let max_pages = self.config.max_ocr_pages;
        let mut images = rasterizer
            .rasterize(&file.bytes, max_pages)
            .await
            .map_err(|e| IngestError::parsing(&file.filename, format!("rasterization failed: {}", e)))?;
        images.truncate(max_pages);
        if images.is_empty() {
            return Err(IngestError::parsing(&file.filename, "rasterizer produced no pages"));
        }
        debug!("'{}': sending {} page images to the vision oracle", file.filename, images.len());

        let prompt = with_schema(prompts::OCR_PROMPT)?;
        let response = oracle
            .classify_images(&prompt, &images)
            .await
            .map_err(|e| IngestError::parsing(&file.filename, format!("OCR extraction failed: {}", e)))?;

        let validated = ai::validate_response(&response, &file.filename);
        let mut warnings = Vec::new();
        if validated.dropped > 0 {
            warnings.push(format!("{} OCR records failed validation", validated.dropped));
        }
        Ok(ExtractionOutput {
            raw_assets: validated.assets,
            rows_dropped: validated.dropped,
            method: ExtractionMethod::PdfOcr,
            statement_date_hint: validated.statement_date,
            document_text: None,
            warnings,
        })
    }
}

impl Default for DocumentExtractor {
    fn default() -> Self {
        Self::new(ExtractionConfig::default())
    }
}

fn with_schema(prompt: &str) -> Result<String> {
    let schema = serde_json::to_string_pretty(&ai::extraction_schema()?)?;
    Ok(format!("{}\n## RECORD SCHEMA\n{}\n", prompt.trim_end(), schema))
}
