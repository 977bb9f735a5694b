//! Review sessions.
//!
//! Each upload batch gets an isolated session holding the working copy of its
//! staged assets. Edits apply to the working copy immediately and reach the
//! `StagingRepository` through a per-session [`AutoSaver`] that coalesces
//! rapid edits into one write after an idle window.

use crate::config::{DuplicateConfig, StagingConfig};
use crate::duplicates::{apply_resolution, DuplicateDetector, DuplicateGroup, Resolution, ResolutionOutcome};
use crate::error::{IngestError, Result};
use crate::schema::{
    ClassifiedAsset, PersistedAsset, SnapshotMatchResult, StagedAsset, StagedAssetPatch, StatementDateResult,
    TempUpload, UploadStatus, VerifiedVia,
};
use crate::store::StagingRepository;
use crate::taxonomy::Taxonomy;
use chrono::{DateTime, Utc};
use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use uuid::Uuid;

// ============================================================================
// Patches
// ============================================================================

impl StagedAsset {
    /// Returns the edited copy; `self` is left untouched.
    pub fn with_patch(&self, patch: &StagedAssetPatch, taxonomy: &Taxonomy) -> Result<StagedAsset> {
        let invalid = |reason: String| IngestError::InvalidPatch { id: self.id, reason };
        let mut next = self.clone();

        if let Some(selected) = patch.is_selected {
            next.is_selected = selected;
        }
        if patch.is_selection_only() {
            return Ok(next);
        }

        let asset = &mut next.classified.asset;
        if let Some(name) = &patch.name {
            let name = name.trim();
            if name.is_empty() {
                return Err(invalid("name must not be empty".to_string()));
            }
            asset.name = name.to_string();
        }
        if let Some(value) = patch.current_value {
            if !value.is_finite() || value <= 0.0 {
                return Err(invalid(format!("current value {} must be positive", value)));
            }
            asset.current_value = value;
        }
        if let Some(quantity) = patch.quantity {
            if !quantity.is_finite() || quantity < 0.0 {
                return Err(invalid(format!("quantity {} must not be negative", quantity)));
            }
            asset.quantity = Some(quantity);
        }
        if let Some(price) = patch.purchase_price {
            if !price.is_finite() || price < 0.0 {
                return Err(invalid(format!("purchase price {} must not be negative", price)));
            }
            asset.purchase_price = Some(price);
        }
        if let Some(date) = patch.purchase_date {
            asset.purchase_date = Some(date);
        }
        // Blank strings clear the field.
        if let Some(isin) = &patch.isin {
            asset.isin = cleared_or(isin, true);
        }
        if let Some(ticker) = &patch.ticker_symbol {
            asset.ticker_symbol = cleared_or(ticker, true);
        }
        if let Some(exchange) = &patch.exchange {
            asset.exchange = cleared_or(exchange, true);
        }
        if let Some(notes) = &patch.notes {
            asset.notes = cleared_or(notes, false);
        }

        let classification = &mut next.classified.classification;
        if patch.asset_class.is_some() || patch.asset_subclass.is_some() {
            let class = patch.asset_class.unwrap_or(classification.asset_class);
            let subclass = patch
                .asset_subclass
                .as_deref()
                .unwrap_or(&classification.asset_subclass);
            let definition = taxonomy.check_membership(class, subclass).map_err(invalid)?;

            if definition.code != classification.asset_subclass {
                classification.risk_level = definition.risk_level;
                classification.expected_return_pct = definition.expected_return_pct;
            }
            classification.asset_class = class;
            classification.asset_subclass = definition.code.clone();
            classification.confidence_score = 1.0;
            classification.verified_via = VerifiedVia::Manual;
        }
        if let Some(risk) = patch.risk_level {
            classification.risk_level = risk;
        }
        if let Some(expected) = patch.expected_return_pct {
            if !expected.is_finite() {
                return Err(invalid("expected return must be a number".to_string()));
            }
            classification.expected_return_pct = expected;
        }

        next.is_edited = true;
        Ok(next)
    }
}

fn cleared_or(raw: &str, uppercase: bool) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else if uppercase {
        Some(trimmed.to_uppercase())
    } else {
        Some(trimmed.to_string())
    }
}

// ============================================================================
// Debounced autosave
// ============================================================================

#[derive(Default)]
struct PendingWrites {
    generation: u64,
    dirty: BTreeMap<Uuid, StagedAsset>,
}

struct SaverState {
    upload_id: Uuid,
    repository: Arc<dyn StagingRepository>,
    pending: Mutex<PendingWrites>,
    flush_lock: Mutex<()>,
}

impl SaverState {
    async fn flush(&self) -> Result<usize> {
        let _in_flight = self.flush_lock.lock().await;
        let batch = std::mem::take(&mut self.pending.lock().await.dirty);
        if batch.is_empty() {
            return Ok(0);
        }

        let assets: Vec<StagedAsset> = batch.values().cloned().collect();
        match self.repository.upsert_staged_assets(self.upload_id, &assets).await {
            Ok(()) => {
                debug!("Autosaved {} staged assets for {}", assets.len(), self.upload_id);
                Ok(assets.len())
            }
            Err(e) => {
                // Newer edits queued during the failed write win over the batch.
                let mut pending = self.pending.lock().await;
                for (id, asset) in batch {
                    pending.dirty.entry(id).or_insert(asset);
                }
                Err(e)
            }
        }
    }
}

/// Owns the pending writes of one session. `schedule` and `flush` are its
/// only mutators.
#[derive(Clone)]
pub struct AutoSaver {
    state: Arc<SaverState>,
    debounce: Duration,
}

impl AutoSaver {
    pub fn new(upload_id: Uuid, repository: Arc<dyn StagingRepository>, debounce: Duration) -> Self {
        Self {
            state: Arc::new(SaverState {
                upload_id,
                repository,
                pending: Mutex::new(PendingWrites::default()),
                flush_lock: Mutex::new(()),
            }),
            debounce,
        }
    }

    /// Queues assets and restarts the idle timer. Only the timer of the
    /// latest schedule call writes.
    pub async fn schedule(&self, assets: impl IntoIterator<Item = StagedAsset>) {
        let generation = {
            let mut pending = self.state.pending.lock().await;
            for asset in assets {
                pending.dirty.insert(asset.id, asset);
            }
            pending.generation += 1;
            pending.generation
        };

        let state = Arc::clone(&self.state);
        let debounce = self.debounce;
        tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            if state.pending.lock().await.generation != generation {
                return;
            }
            if let Err(e) = state.flush().await {
                error!("Autosave for {} failed, will retry on next flush: {}", state.upload_id, e);
            }
        });
    }

    /// Writes everything pending now, waiting for any in-flight write first.
    pub async fn flush(&self) -> Result<usize> {
        self.state.flush().await
    }

    /// Drops pending writes and disarms queued timers. An in-flight write
    /// finishes first.
    pub async fn discard(&self) -> usize {
        let _in_flight = self.state.flush_lock.lock().await;
        let mut pending = self.state.pending.lock().await;
        pending.generation += 1;
        let dropped = pending.dirty.len();
        pending.dirty.clear();
        dropped
    }

    pub async fn pending_count(&self) -> usize {
        self.state.pending.lock().await.dirty.len()
    }
}

// ============================================================================
// Sessions
// ============================================================================

/// Everything needed to open a review session for one proximity group.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub user_id: String,
    pub source_files: Vec<String>,
    pub statement_date: StatementDateResult,
    pub proposed_name: Option<String>,
    pub snapshot_match: SnapshotMatchResult,
    pub assets: Vec<ClassifiedAsset>,
    /// Holdings of the matched snapshot, compared against for duplicates.
    pub existing: Vec<PersistedAsset>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionView {
    pub upload: TempUpload,
    pub staged_assets: Vec<StagedAsset>,
    pub duplicate_groups: Vec<DuplicateGroup>,
}

struct SessionState {
    upload: TempUpload,
    assets: Vec<StagedAsset>,
    existing: Vec<PersistedAsset>,
    groups: Vec<DuplicateGroup>,
}

impl SessionState {
    fn ensure_open(&self, now: DateTime<Utc>) -> Result<()> {
        if !self.upload.status.is_open() {
            return Err(IngestError::SessionClosed {
                id: self.upload.id,
                status: self.upload.status,
            });
        }
        if self.upload.is_expired(now) {
            return Err(IngestError::SessionExpired(self.upload.id));
        }
        Ok(())
    }

    fn view(&self) -> SessionView {
        SessionView {
            upload: self.upload.clone(),
            staged_assets: self.assets.clone(),
            duplicate_groups: self.groups.clone(),
        }
    }
}

struct Session {
    state: Mutex<SessionState>,
    saver: AutoSaver,
}

pub struct ReviewStagingStore {
    repository: Arc<dyn StagingRepository>,
    taxonomy: Arc<Taxonomy>,
    detector: DuplicateDetector,
    config: StagingConfig,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl ReviewStagingStore {
    pub fn new(
        repository: Arc<dyn StagingRepository>,
        taxonomy: Arc<Taxonomy>,
        config: StagingConfig,
        duplicates: DuplicateConfig,
    ) -> Self {
        Self {
            repository,
            taxonomy,
            detector: DuplicateDetector::new(duplicates),
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// Stages the assets, flags duplicates and persists the session at once.
    pub async fn create(&self, new: NewSession) -> Result<SessionView> {
        let now = Utc::now();
        let upload = TempUpload {
            id: Uuid::new_v4(),
            user_id: new.user_id,
            status: UploadStatus::Pending,
            source_files: new.source_files,
            statement_date: new.statement_date,
            proposed_name: new.proposed_name,
            snapshot_match: new.snapshot_match,
            created_at: now,
            expires_at: now + self.config.session_ttl(),
        };

        let mut assets: Vec<StagedAsset> = new.assets.into_iter().map(StagedAsset::new).collect();
        let groups = self.detector.annotate(&mut assets, &new.existing)?;

        self.repository.save_upload(&upload).await?;
        self.repository.upsert_staged_assets(upload.id, &assets).await?;
        info!(
            "Opened review session {} with {} staged assets ({} duplicate groups)",
            upload.id,
            assets.len(),
            groups.len()
        );

        let state = SessionState {
            upload,
            assets,
            existing: new.existing,
            groups,
        };
        let view = state.view();
        self.insert_session(state).await;
        Ok(view)
    }

    async fn insert_session(&self, state: SessionState) -> Arc<Session> {
        let id = state.upload.id;
        let session = Arc::new(Session {
            saver: AutoSaver::new(id, Arc::clone(&self.repository), self.config.debounce()),
            state: Mutex::new(state),
        });
        self.sessions.write().await.insert(id, Arc::clone(&session));
        session
    }

    /// Memory first, then the repository.
    async fn session(&self, id: Uuid) -> Result<Arc<Session>> {
        if let Some(session) = self.sessions.read().await.get(&id) {
            return Ok(Arc::clone(session));
        }

        let upload = self
            .repository
            .load_upload(id)
            .await?
            .ok_or(IngestError::SessionNotFound(id))?;
        let mut assets = self.repository.load_staged_assets(id).await?;
        let groups = if upload.status.is_open() {
            self.detector.annotate(&mut assets, &[])?
        } else {
            Vec::new()
        };
        debug!("Restored review session {} from repository", id);
        Ok(self
            .insert_session(SessionState {
                upload,
                assets,
                existing: Vec::new(),
                groups,
            })
            .await)
    }

    /// Opens the session for review, moving it from pending to in review.
    pub async fn review(&self, id: Uuid) -> Result<SessionView> {
        let session = self.session(id).await?;
        let mut state = session.state.lock().await;
        state.ensure_open(Utc::now())?;
        if state.upload.status == UploadStatus::Pending {
            state.upload.status = UploadStatus::InReview;
            self.repository.save_upload(&state.upload).await?;
        }
        Ok(state.view())
    }

    /// Read-only view that works on closed sessions too.
    pub async fn view(&self, id: Uuid) -> Result<SessionView> {
        let session = self.session(id).await?;
        let state = session.state.lock().await;
        Ok(state.view())
    }

    /// Applies all patches or none. Returns the number of assets updated.
    pub async fn update(&self, id: Uuid, patches: &[StagedAssetPatch]) -> Result<usize> {
        let session = self.session(id).await?;
        let mut state = session.state.lock().await;
        state.ensure_open(Utc::now())?;

        let mut assets = state.assets.clone();
        let mut changed = Vec::new();
        let mut material = false;
        for patch in patches {
            let slot = assets
                .iter_mut()
                .find(|a| a.id == patch.id)
                .ok_or(IngestError::StagedAssetNotFound(patch.id))?;
            if !slot.is_active() {
                return Err(IngestError::InvalidPatch {
                    id: patch.id,
                    reason: "asset was merged into another record".to_string(),
                });
            }
            *slot = slot.with_patch(patch, &self.taxonomy)?;
            material |= patch.touches_identity();
            if !changed.contains(&patch.id) {
                changed.push(patch.id);
            }
        }

        let to_save: Vec<StagedAsset> = if material {
            state.groups = self.detector.annotate(&mut assets, &state.existing)?;
            assets.clone()
        } else {
            assets.iter().filter(|a| changed.contains(&a.id)).cloned().collect()
        };
        state.assets = assets;
        drop(state);

        session.saver.schedule(to_save).await;
        debug!("Applied {} patches to session {}", patches.len(), id);
        Ok(changed.len())
    }

    /// Deleting a staged asset deselects it; rows stay until the session closes.
    pub async fn set_selected(&self, id: Uuid, asset_ids: &[Uuid], selected: bool) -> Result<usize> {
        let patches: Vec<StagedAssetPatch> = asset_ids
            .iter()
            .map(|asset_id| StagedAssetPatch {
                is_selected: Some(selected),
                ..StagedAssetPatch::new(*asset_id)
            })
            .collect();
        self.update(id, &patches).await
    }

    /// Settles the duplicate group that contains `member_id`.
    pub async fn resolve(&self, id: Uuid, member_id: &str, resolution: &Resolution) -> Result<ResolutionOutcome> {
        let session = self.session(id).await?;
        let mut state = session.state.lock().await;
        state.ensure_open(Utc::now())?;

        let position = state
            .groups
            .iter()
            .position(|g| g.contains(member_id))
            .ok_or_else(|| IngestError::InvalidResolution(format!("{} is not in a duplicate group", member_id)))?;

        let mut assets = state.assets.clone();
        let outcome = apply_resolution(&mut assets, &state.groups[position], resolution)?;
        state.groups.remove(position);

        let to_save: Vec<StagedAsset> = assets
            .iter()
            .filter(|a| outcome.affected.contains(&a.id))
            .cloned()
            .collect();
        state.assets = assets;
        drop(state);

        session.saver.schedule(to_save).await;
        info!("Resolved duplicate group in session {} with {:?}", id, resolution);
        Ok(outcome)
    }

    /// Active, selected assets in staging order.
    pub async fn selected_assets(&self, id: Uuid) -> Result<Vec<StagedAsset>> {
        let session = self.session(id).await?;
        let state = session.state.lock().await;
        Ok(state
            .assets
            .iter()
            .filter(|a| a.is_active() && a.is_selected)
            .cloned()
            .collect())
    }

    pub async fn flush(&self, id: Uuid) -> Result<usize> {
        let session = self.session(id).await?;
        session.saver.flush().await
    }

    /// Checks the session can still be finalized.
    pub async fn ensure_open(&self, id: Uuid) -> Result<TempUpload> {
        let session = self.session(id).await?;
        let state = session.state.lock().await;
        state.ensure_open(Utc::now())?;
        Ok(state.upload.clone())
    }

    pub async fn complete(&self, id: Uuid) -> Result<()> {
        self.close(id, UploadStatus::Completed).await
    }

    pub async fn cancel(&self, id: Uuid) -> Result<()> {
        self.close(id, UploadStatus::Cancelled).await
    }

    async fn close(&self, id: Uuid, status: UploadStatus) -> Result<()> {
        let session = self.session(id).await?;
        {
            let mut state = session.state.lock().await;
            state.ensure_open(Utc::now())?;
            state.upload.status = status;
            state.groups.clear();
            self.repository.save_upload(&state.upload).await?;
        }
        // Wait out any in-flight autosave before the rows go.
        if let Err(e) = session.saver.flush().await {
            warn!("Discarding unsaved edits of session {}: {}", id, e);
        }
        self.repository.delete_staged_assets(id).await?;
        self.sessions.write().await.remove(&id);
        info!("Review session {} is now {}", id, status);
        Ok(())
    }

    /// Drops expired open sessions held in memory. Returns their ids.
    pub async fn purge_expired(&self, now: DateTime<Utc>) -> Result<Vec<Uuid>> {
        let candidates: Vec<(Uuid, Arc<Session>)> = self
            .sessions
            .read()
            .await
            .iter()
            .map(|(id, s)| (*id, Arc::clone(s)))
            .collect();

        let mut purged = Vec::new();
        for (id, session) in candidates {
            let expired = {
                let state = session.state.lock().await;
                state.upload.status.is_open() && state.upload.is_expired(now)
            };
            if expired {
                let dropped = session.saver.discard().await;
                if dropped > 0 {
                    debug!("Dropped {} unsaved edits of expired session {}", dropped, id);
                }
                self.repository.delete_upload(id).await?;
                self.sessions.write().await.remove(&id);
                purged.push(id);
            }
        }
        if !purged.is_empty() {
            info!("Purged {} expired review sessions", purged.len());
        }
        Ok(purged)
    }
}
