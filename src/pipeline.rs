//! End-to-end orchestration: route, extract, date, classify, stage, finalize.

use crate::classifier::{ClassificationFailure, ClassificationProgress, SecurityClassifier};
use crate::config::PipelineConfig;
use crate::duplicates::{DuplicateGroup, Resolution, ResolutionOutcome};
use crate::error::{FinalizeError, IngestError, Result};
use crate::extract::{DocumentExtractor, ExtractionMethod};
use crate::finalize::{snapshot_name, CommitPlan, FinalizeOptions, FinalizeResult, Finalizer};
use crate::llm::{ClassificationOracle, PageRasterizer};
use crate::lookup::SecurityLookupOracle;
use crate::router::{FormatRouter, UploadedFile};
use crate::schema::{
    ClassifiedAsset, RawAsset, SnapshotMatchResult, SnapshotMatchType, StagedAssetPatch, StatementDateResult,
};
use crate::snapshot_matcher::SnapshotMatcher;
use crate::staging::{NewSession, ReviewStagingStore, SessionView};
use crate::statement_date::StatementDateResolver;
use crate::store::{PortfolioStore, StagingRepository};
use crate::taxonomy::Taxonomy;
use chrono::Utc;
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::mpsc::Sender;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum IngestEvent {
    Starting { files: usize },
    Extracting { filename: String },
    FileFailed { filename: String, reason: String },
    Classifying(ClassificationProgress),
    Staging { sessions: usize },
    Done,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileStatus {
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FileOutcome {
    pub filename: String,
    pub status: FileStatus,
    pub method: Option<ExtractionMethod>,
    pub assets_extracted: usize,
    pub rows_dropped: usize,
    pub statement_date: Option<StatementDateResult>,
    pub error: Option<String>,
    pub warnings: Vec<String>,
}

impl FileOutcome {
    fn failed(filename: &str, error: &IngestError) -> Self {
        Self {
            filename: filename.to_string(),
            status: FileStatus::Failed,
            method: None,
            assets_extracted: 0,
            rows_dropped: 0,
            statement_date: None,
            error: Some(error.to_string()),
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: Uuid,
    pub statement_date: StatementDateResult,
    pub proposed_name: Option<String>,
    pub snapshot_match: SnapshotMatchResult,
    pub source_files: Vec<String>,
    pub staged_count: usize,
    pub duplicate_groups: Vec<DuplicateGroup>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub total_files: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub files: Vec<FileOutcome>,
    pub classification_failures: Vec<ClassificationFailure>,
    pub sessions: Vec<SessionSummary>,
}

/// A file that made it through extraction.
struct ExtractedFile {
    filename: String,
    assets: Vec<RawAsset>,
    statement_date: StatementDateResult,
}

pub struct PipelineBuilder {
    config: PipelineConfig,
    taxonomy: Arc<Taxonomy>,
    portfolio: Arc<dyn PortfolioStore>,
    staging: Arc<dyn StagingRepository>,
    oracle: Option<Arc<dyn ClassificationOracle>>,
    rasterizer: Option<Arc<dyn PageRasterizer>>,
    lookup: Option<Arc<dyn SecurityLookupOracle>>,
}

impl PipelineBuilder {
    pub fn config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn taxonomy(mut self, taxonomy: Taxonomy) -> Self {
        self.taxonomy = Arc::new(taxonomy);
        self
    }

    pub fn oracle(mut self, oracle: Arc<dyn ClassificationOracle>) -> Self {
        self.oracle = Some(oracle);
        self
    }

    pub fn rasterizer(mut self, rasterizer: Arc<dyn PageRasterizer>) -> Self {
        self.rasterizer = Some(rasterizer);
        self
    }

    pub fn lookup(mut self, lookup: Arc<dyn SecurityLookupOracle>) -> Self {
        self.lookup = Some(lookup);
        self
    }

    pub fn build(self) -> Result<IngestionPipeline> {
        self.config.validate()?;
        self.taxonomy.validate()?;

        let mut extractor = DocumentExtractor::new(self.config.extraction.clone());
        let mut resolver = StatementDateResolver::new();
        let mut classifier = SecurityClassifier::new(Arc::clone(&self.taxonomy), self.config.classification.clone());
        if let Some(oracle) = &self.oracle {
            extractor = extractor.with_oracle(Arc::clone(oracle));
            resolver = resolver.with_oracle(Arc::clone(oracle));
            classifier = classifier.with_oracle(Arc::clone(oracle));
        }
        if let Some(rasterizer) = self.rasterizer {
            extractor = extractor.with_rasterizer(rasterizer);
        }
        if let Some(lookup) = self.lookup {
            classifier = classifier.with_lookup(lookup);
        }

        Ok(IngestionPipeline {
            router: FormatRouter::new(self.config.router.clone()),
            extractor,
            resolver,
            classifier,
            matcher: SnapshotMatcher::new(self.config.snapshots.clone()),
            staging: ReviewStagingStore::new(
                self.staging,
                Arc::clone(&self.taxonomy),
                self.config.staging.clone(),
                self.config.duplicates.clone(),
            ),
            finalizer: Finalizer::new(Arc::clone(&self.portfolio), self.config.finalize.clone()),
            portfolio: self.portfolio,
        })
    }
}

pub struct IngestionPipeline {
    router: FormatRouter,
    extractor: DocumentExtractor,
    resolver: StatementDateResolver,
    classifier: SecurityClassifier,
    matcher: SnapshotMatcher,
    staging: ReviewStagingStore,
    finalizer: Finalizer,
    portfolio: Arc<dyn PortfolioStore>,
}

impl IngestionPipeline {
    pub fn builder(portfolio: Arc<dyn PortfolioStore>, staging: Arc<dyn StagingRepository>) -> PipelineBuilder {
        PipelineBuilder {
            config: PipelineConfig::default(),
            taxonomy: Arc::new(Taxonomy::default()),
            portfolio,
            staging,
            oracle: None,
            rasterizer: None,
            lookup: None,
        }
    }

    pub fn staging(&self) -> &ReviewStagingStore {
        &self.staging
    }

    async fn send_event(&self, sender: &Option<Sender<IngestEvent>>, event: IngestEvent) {
        if let Some(tx) = sender {
            let _ = tx.send(event).await;
        }
    }

    async fn extract_file(&self, file: &UploadedFile) -> Result<(ExtractedFile, FileOutcome)> {
        let format = self.router.route(file)?;
        let output = self.extractor.extract(format, file).await?;
        let statement_date = self
            .resolver
            .resolve(
                output.document_text.as_deref(),
                output.statement_date_hint,
                &file.filename,
                Utc::now(),
            )
            .await;

        let outcome = FileOutcome {
            filename: file.filename.clone(),
            status: FileStatus::Succeeded,
            method: Some(output.method),
            assets_extracted: output.raw_assets.len(),
            rows_dropped: output.rows_dropped,
            statement_date: Some(statement_date.clone()),
            error: None,
            warnings: output.warnings,
        };
        let extracted = ExtractedFile {
            filename: file.filename.clone(),
            assets: output.raw_assets,
            statement_date,
        };
        Ok((extracted, outcome))
    }

    /// Files are processed one at a time; a failing file is reported and
    /// skipped. Each statement-date group becomes its own review session.
    pub async fn ingest(
        &self,
        user_id: &str,
        files: &[UploadedFile],
        progress: Option<Sender<IngestEvent>>,
    ) -> Result<BatchSummary> {
        self.send_event(&progress, IngestEvent::Starting { files: files.len() }).await;

        let mut outcomes = Vec::new();
        let mut extracted = Vec::new();
        for file in files {
            self.send_event(
                &progress,
                IngestEvent::Extracting {
                    filename: file.filename.clone(),
                },
            )
            .await;
            match self.extract_file(file).await {
                Ok((ok, outcome)) => {
                    extracted.push(ok);
                    outcomes.push(outcome);
                }
                Err(e) => {
                    warn!("Skipping '{}': {}", file.filename, e);
                    self.send_event(
                        &progress,
                        IngestEvent::FileFailed {
                            filename: file.filename.clone(),
                            reason: e.to_string(),
                        },
                    )
                    .await;
                    outcomes.push(FileOutcome::failed(&file.filename, &e));
                }
            }
        }

        let existing_snapshots = if extracted.is_empty() {
            Vec::new()
        } else {
            self.portfolio.list_snapshots(user_id).await?
        };

        let dated: Vec<(ExtractedFile, _)> = extracted
            .into_iter()
            .map(|file| {
                let date = file
                    .statement_date
                    .date
                    .unwrap_or_else(|| Utc::now().date_naive());
                (file, date)
            })
            .collect();
        let groups = self.matcher.group_by_proximity(dated);

        let mut classification_failures = Vec::new();
        let mut sessions = Vec::new();
        for group in groups {
            let raw: Vec<RawAsset> = group.items.iter().flat_map(|f| f.assets.iter().cloned()).collect();
            let batch = match &progress {
                Some(tx) => self.classify_with_progress(&raw, tx.clone()).await,
                None => self.classifier.classify_batch(&raw, None).await,
            };
            classification_failures.extend(batch.failures);
            if batch.classified.is_empty() {
                warn!("No classified assets left for group '{}'", group.name);
                continue;
            }

            let snapshot_match = self.matcher.match_date(&existing_snapshots, group.representative_date);
            let existing = match (&snapshot_match.match_type, &snapshot_match.matched_snapshot_id) {
                (SnapshotMatchType::Exact | SnapshotMatchType::Close, Some(id)) => {
                    self.portfolio.list_assets(user_id, id).await?
                }
                _ => Vec::new(),
            };

            let statement_date = group
                .items
                .iter()
                .find(|f| f.statement_date.date == Some(group.representative_date))
                .map(|f| f.statement_date.clone())
                .unwrap_or_else(|| group.items[0].statement_date.clone());

            let view = self
                .staging
                .create(NewSession {
                    user_id: user_id.to_string(),
                    source_files: group.items.iter().map(|f| f.filename.clone()).collect(),
                    statement_date,
                    proposed_name: Some(group.name.clone()),
                    snapshot_match,
                    assets: batch.classified,
                    existing,
                })
                .await?;
            sessions.push(SessionSummary {
                session_id: view.upload.id,
                statement_date: view.upload.statement_date,
                proposed_name: view.upload.proposed_name,
                snapshot_match: view.upload.snapshot_match,
                source_files: view.upload.source_files,
                staged_count: view.staged_assets.len(),
                duplicate_groups: view.duplicate_groups,
            });
        }
        self.send_event(&progress, IngestEvent::Staging { sessions: sessions.len() }).await;

        let succeeded = outcomes.iter().filter(|o| o.status == FileStatus::Succeeded).count();
        let summary = BatchSummary {
            total_files: files.len(),
            succeeded,
            failed: files.len() - succeeded,
            files: outcomes,
            classification_failures,
            sessions,
        };
        info!(
            "Ingested {}/{} files into {} review sessions",
            summary.succeeded,
            summary.total_files,
            summary.sessions.len()
        );
        self.send_event(&progress, IngestEvent::Done).await;
        Ok(summary)
    }

    /// Forwards classifier progress onto the ingest event channel.
    async fn classify_with_progress(
        &self,
        raw: &[RawAsset],
        events: Sender<IngestEvent>,
    ) -> crate::classifier::ClassificationBatch {
        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let forward = tokio::spawn(async move {
            while let Some(step) = rx.recv().await {
                let _ = events.send(IngestEvent::Classifying(step)).await;
            }
        });
        let batch = self.classifier.classify_batch(raw, Some(tx)).await;
        let _ = forward.await;
        batch
    }

    pub async fn review(&self, session_id: Uuid) -> Result<SessionView> {
        self.staging.review(session_id).await
    }

    pub async fn update_staged(&self, session_id: Uuid, patches: &[StagedAssetPatch]) -> Result<usize> {
        self.staging.update(session_id, patches).await
    }

    pub async fn resolve_duplicates(
        &self,
        session_id: Uuid,
        member_id: &str,
        resolution: &Resolution,
    ) -> Result<ResolutionOutcome> {
        self.staging.resolve(session_id, member_id, resolution).await
    }

    pub async fn cancel(&self, session_id: Uuid) -> Result<()> {
        self.staging.cancel(session_id).await
    }

    /// Flushes pending edits, commits the chosen assets and closes the session.
    /// A failed commit leaves the session open for another attempt.
    pub async fn finalize(&self, session_id: Uuid, options: &FinalizeOptions) -> Result<FinalizeResult> {
        if matches!(&options.selected_ids, Some(ids) if ids.is_empty()) {
            return Err(FinalizeError::NoAssetsSelected.into());
        }
        let upload = self.staging.ensure_open(session_id).await?;
        self.staging.flush(session_id).await?;

        let assets: Vec<ClassifiedAsset> = match &options.selected_ids {
            None => self
                .staging
                .selected_assets(session_id)
                .await?
                .into_iter()
                .map(|a| a.classified)
                .collect(),
            Some(ids) => {
                let staged = self.staging.view(session_id).await?.staged_assets;
                let mut seen = HashSet::with_capacity(ids.len());
                let mut chosen = Vec::with_capacity(ids.len());
                // Repeated ids commit once, at their first position.
                for id in ids.iter().filter(|id| seen.insert(**id)) {
                    let asset = staged
                        .iter()
                        .find(|a| a.id == *id && a.is_active())
                        .ok_or(IngestError::StagedAssetNotFound(*id))?;
                    chosen.push(asset.classified.clone());
                }
                chosen
            }
        };

        let statement_date = match options.statement_date {
            Some(date) => StatementDateResult::manual(date),
            None => upload.statement_date.clone(),
        };

        let plan = if options.merge_mode {
            let target = options
                .target_snapshot_id
                .clone()
                .or_else(|| upload.snapshot_match.matched_snapshot_id.clone())
                .ok_or(FinalizeError::MissingTargetSnapshot)?;
            CommitPlan::Merge {
                target_snapshot_id: target,
                source_files: upload.source_files.clone(),
            }
        } else {
            CommitPlan::Create {
                name: snapshot_name(
                    options.snapshot_name.as_deref(),
                    upload.proposed_name.as_deref(),
                    statement_date.date,
                ),
                statement_date: statement_date.date,
                source_files: upload.source_files.clone(),
            }
        };

        let result = self.finalizer.finalize(&upload.user_id, &assets, plan).await?;
        self.staging.complete(session_id).await?;
        Ok(result)
    }
}
