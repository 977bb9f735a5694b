//! Three-tier security classification: lookup, rules, AI.
//!
//! Tiers run in order and the first one returning a classification wins.
//! A failed oracle call degrades to the rule tier's best effort; an AI
//! answer that breaks the taxonomy excludes that one asset.

pub mod ai;
pub mod lookup;
pub mod rules;

use crate::config::ClassificationConfig;
use crate::error::{IngestError, Result};
use crate::llm::ClassificationOracle;
use crate::lookup::{NoLookup, SecurityLookupOracle};
use crate::schema::{Classification, ClassifiedAsset, RawAsset};
use crate::taxonomy::Taxonomy;
use async_trait::async_trait;
use futures::future::join_all;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::Sender;

pub use self::ai::AiStrategy;
pub use self::lookup::LookupStrategy;
pub use self::rules::RuleStrategy;

#[async_trait]
pub trait ClassificationStrategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// `Ok(None)` passes the asset on to the next tier.
    async fn classify(&self, asset: &RawAsset, taxonomy: &Taxonomy) -> Result<Option<Classification>>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationProgress {
    pub completed: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationFailure {
    pub asset_name: String,
    pub source_file: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ClassificationBatch {
    pub classified: Vec<ClassifiedAsset>,
    pub failures: Vec<ClassificationFailure>,
}

pub struct SecurityClassifier {
    taxonomy: Arc<Taxonomy>,
    config: ClassificationConfig,
    lookup: LookupStrategy,
    rules: RuleStrategy,
    ai: Option<AiStrategy>,
}

impl SecurityClassifier {
    pub fn new(taxonomy: Arc<Taxonomy>, config: ClassificationConfig) -> Self {
        Self {
            taxonomy,
            rules: RuleStrategy::new(0.0),
            config,
            lookup: LookupStrategy::new(Arc::new(NoLookup)),
            ai: None,
        }
    }

    pub fn with_lookup(mut self, oracle: Arc<dyn SecurityLookupOracle>) -> Self {
        self.lookup = LookupStrategy::new(oracle);
        self
    }

    /// Enables the AI tier; weak rule matches are then escalated.
    pub fn with_oracle(mut self, oracle: Arc<dyn ClassificationOracle>) -> Self {
        self.ai = Some(AiStrategy::new(oracle));
        self.rules = RuleStrategy::new(self.config.ai_threshold);
        self
    }

    pub fn taxonomy(&self) -> &Taxonomy {
        &self.taxonomy
    }

    fn tiers_for(&self, asset: &RawAsset) -> Vec<&dyn ClassificationStrategy> {
        let mut tiers: Vec<&dyn ClassificationStrategy> = vec![&self.lookup];
        match &self.ai {
            Some(ai) if self.config.ai_primary_without_identifiers && !asset.has_identifiers() => {
                tiers.push(ai);
                tiers.push(&self.rules);
            }
            Some(ai) => {
                tiers.push(&self.rules);
                tiers.push(ai);
            }
            None => tiers.push(&self.rules),
        }
        tiers
    }

    pub async fn classify(&self, asset: &RawAsset) -> Result<ClassifiedAsset> {
        for tier in self.tiers_for(asset) {
            match tier.classify(asset, &self.taxonomy).await {
                Ok(Some(classification)) => {
                    debug!(
                        "'{}' classified by {} tier as {} (confidence {:.2})",
                        asset.name,
                        tier.name(),
                        classification.asset_subclass,
                        classification.confidence_score
                    );
                    return Ok(ClassifiedAsset {
                        asset: asset.clone(),
                        classification,
                    });
                }
                Ok(None) => continue,
                Err(e @ IngestError::ClassificationError { .. }) => return Err(e),
                Err(e) => {
                    warn!("'{}': {} tier unavailable: {}", asset.name, tier.name(), e);
                }
            }
        }

        let classification = self.rules.best_effort(asset, &self.taxonomy);
        debug!(
            "'{}' kept rule best effort {} (confidence {:.2})",
            asset.name, classification.asset_subclass, classification.confidence_score
        );
        Ok(ClassifiedAsset {
            asset: asset.clone(),
            classification,
        })
    }

    /// Classifies in groups of `max_concurrent`, keeping input order and
    /// collecting per-asset failures instead of failing the batch.
    pub async fn classify_batch(
        &self,
        assets: &[RawAsset],
        progress: Option<Sender<ClassificationProgress>>,
    ) -> ClassificationBatch {
        let total = assets.len();
        let mut batch = ClassificationBatch::default();
        let mut completed = 0;

        for chunk in assets.chunks(self.config.max_concurrent.max(1)) {
            let results = join_all(chunk.iter().map(|asset| self.classify(asset))).await;

            for (asset, result) in chunk.iter().zip(results) {
                match result {
                    Ok(classified) => batch.classified.push(classified),
                    Err(e) => {
                        warn!("Excluding '{}' from '{}': {}", asset.name, asset.source_file, e);
                        batch.failures.push(ClassificationFailure {
                            asset_name: asset.name.clone(),
                            source_file: asset.source_file.clone(),
                            reason: e.to_string(),
                        });
                    }
                }
            }

            completed += chunk.len();
            if let Some(tx) = &progress {
                let _ = tx.send(ClassificationProgress { completed, total }).await;
            }
        }

        info!(
            "Classified {}/{} assets ({} failures)",
            batch.classified.len(),
            total,
            batch.failures.len()
        );
        batch
    }
}
