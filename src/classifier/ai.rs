use super::ClassificationStrategy;
use crate::error::{IngestError, Result};
use crate::llm::{prompts, ClassificationOracle};
use crate::schema::{AssetClass, Classification, RawAsset, VerifiedVia};
use crate::taxonomy::Taxonomy;
use async_trait::async_trait;
use log::info;
use serde::Deserialize;
use std::sync::Arc;

const DEFAULT_AI_CONFIDENCE: f64 = 0.7;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AiClassification {
    #[serde(alias = "asset_class")]
    asset_class: String,
    #[serde(alias = "asset_subclass", alias = "subclass")]
    asset_subclass: String,
    #[serde(default, alias = "confidence_score", alias = "confidenceScore")]
    confidence: Option<f64>,
}

/// Asks the oracle to pick from the closed taxonomy, then checks its answer.
pub struct AiStrategy {
    oracle: Arc<dyn ClassificationOracle>,
}

impl AiStrategy {
    pub fn new(oracle: Arc<dyn ClassificationOracle>) -> Self {
        Self { oracle }
    }
}

#[async_trait]
impl ClassificationStrategy for AiStrategy {
    fn name(&self) -> &'static str {
        "ai"
    }

    /// Transport failures come back as `OracleError`; invalid answers as `ClassificationError`.
    async fn classify(&self, asset: &RawAsset, taxonomy: &Taxonomy) -> Result<Option<Classification>> {
        let system_prompt = prompts::classification_system_prompt(&taxonomy.prompt_listing());
        let user_prompt = prompts::classification_user_prompt(
            &asset.name,
            asset.isin.as_deref(),
            asset.ticker_symbol.as_deref(),
            asset.current_value,
        );

        let response = self.oracle.classify_text(&system_prompt, &user_prompt).await?;
        let invalid = |reason: String| IngestError::ClassificationError {
            asset: asset.name.clone(),
            reason,
        };

        let answer: AiClassification = serde_json::from_value(response)
            .map_err(|e| invalid(format!("malformed oracle answer: {}", e)))?;
        let class = AssetClass::parse(&answer.asset_class)
            .ok_or_else(|| invalid(format!("unknown asset class '{}'", answer.asset_class)))?;
        let subclass = answer.asset_subclass.trim().to_lowercase();
        taxonomy.check_membership(class, &subclass).map_err(invalid)?;

        let confidence = answer
            .confidence
            .filter(|c| c.is_finite())
            .unwrap_or(DEFAULT_AI_CONFIDENCE);
        info!(
            "'{}': AI classified as {}/{} at confidence {:.2}",
            asset.name, class, subclass, confidence
        );
        Ok(taxonomy.classification_for(&subclass, confidence, VerifiedVia::Ai))
    }
}
