use crate::config::FinalizeConfig;
use crate::error::{FinalizeError, Result};
use crate::schema::{ClassTotals, ClassifiedAsset, NewSnapshot};
use crate::store::PortfolioStore;
use crate::utils::month_label;
use chrono::NaiveDate;
use log::{error, info, warn};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FinalizeOptions {
    /// `None` commits every selected asset of the session.
    pub selected_ids: Option<Vec<Uuid>>,
    pub merge_mode: bool,
    /// Defaults to the session's matched snapshot in merge mode.
    pub target_snapshot_id: Option<String>,
    pub snapshot_name: Option<String>,
    /// Overrides the resolved statement date.
    pub statement_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalizeResult {
    pub snapshot_id: String,
    pub assets_saved: usize,
    pub merged: bool,
    /// Value added by this commit, per class.
    pub totals: ClassTotals,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CommitPlan {
    Create {
        name: Option<String>,
        statement_date: Option<NaiveDate>,
        source_files: Vec<String>,
    },
    Merge {
        target_snapshot_id: String,
        source_files: Vec<String>,
    },
}

/// `snapshot_name`, else the session's generated name, else the statement month.
pub fn snapshot_name(
    requested: Option<&str>,
    session_name: Option<&str>,
    statement_date: Option<NaiveDate>,
) -> Option<String> {
    fn usable(name: Option<&str>) -> Option<&str> {
        name.map(str::trim).filter(|n| !n.is_empty())
    }
    usable(requested)
        .or(usable(session_name))
        .map(str::to_string)
        .or_else(|| statement_date.map(month_label))
}

pub struct Finalizer {
    store: Arc<dyn PortfolioStore>,
    config: FinalizeConfig,
}

impl Finalizer {
    pub fn new(store: Arc<dyn PortfolioStore>, config: FinalizeConfig) -> Self {
        Self { store, config }
    }

    pub async fn finalize(&self, user_id: &str, assets: &[ClassifiedAsset], plan: CommitPlan) -> Result<FinalizeResult> {
        if assets.is_empty() {
            return Err(FinalizeError::NoAssetsSelected.into());
        }
        match plan {
            CommitPlan::Create {
                name,
                statement_date,
                source_files,
            } => self.create(user_id, assets, name, statement_date, source_files).await,
            CommitPlan::Merge {
                target_snapshot_id,
                source_files,
            } => self.merge_into(user_id, &target_snapshot_id, assets, source_files).await,
        }
    }

    /// Inserts in batches, stopping at the first failure. Returns the rows
    /// saved, their totals and the failure if any.
    async fn insert_batches(
        &self,
        user_id: &str,
        snapshot_id: &str,
        assets: &[ClassifiedAsset],
    ) -> (usize, ClassTotals, Option<String>) {
        let mut saved = 0;
        let mut totals = ClassTotals::default();
        for batch in assets.chunks(self.config.insert_batch_size.max(1)) {
            match self.store.insert_assets(user_id, snapshot_id, batch).await {
                Ok(rows) => {
                    saved += rows.len();
                    totals.merge(&ClassTotals::from_assets(batch));
                }
                Err(e) => return (saved, totals, Some(e.to_string())),
            }
        }
        (saved, totals, None)
    }

    async fn create(
        &self,
        user_id: &str,
        assets: &[ClassifiedAsset],
        name: Option<String>,
        statement_date: Option<NaiveDate>,
        source_files: Vec<String>,
    ) -> Result<FinalizeResult> {
        let totals = ClassTotals::from_assets(assets);
        let snapshot = self
            .store
            .insert_snapshot(
                user_id,
                NewSnapshot {
                    name,
                    statement_date,
                    totals,
                    source_files,
                },
            )
            .await?;

        let (saved, _, failure) = self.insert_batches(user_id, &snapshot.id, assets).await;
        if let Some(reason) = failure {
            let rolled_back = match self.store.delete_snapshot(user_id, &snapshot.id).await {
                Ok(()) => {
                    warn!("Rolled back snapshot {} after failed insert: {}", snapshot.id, reason);
                    true
                }
                Err(e) => {
                    error!("Rollback of snapshot {} failed: {}", snapshot.id, e);
                    false
                }
            };
            return Err(FinalizeError::InsertFailed {
                snapshot_id: snapshot.id,
                reason,
                assets_saved: saved,
                rolled_back,
            }
            .into());
        }

        info!(
            "Created snapshot {} with {} assets (total {:.2})",
            snapshot.id,
            saved,
            totals.total()
        );
        Ok(FinalizeResult {
            snapshot_id: snapshot.id,
            assets_saved: saved,
            merged: false,
            totals,
        })
    }

    async fn merge_into(
        &self,
        user_id: &str,
        target_snapshot_id: &str,
        assets: &[ClassifiedAsset],
        source_files: Vec<String>,
    ) -> Result<FinalizeResult> {
        let mut snapshot = self
            .store
            .get_snapshot(user_id, target_snapshot_id)
            .await?
            .ok_or_else(|| FinalizeError::SnapshotNotFound(target_snapshot_id.to_string()))?;

        let (saved, added, failure) = self.insert_batches(user_id, &snapshot.id, assets).await;

        if saved > 0 {
            snapshot.totals.merge(&added);
            for file in source_files {
                if !snapshot.source_files.contains(&file) {
                    snapshot.source_files.push(file);
                }
            }
            self.store.update_snapshot(user_id, &snapshot).await?;
        }

        if let Some(reason) = failure {
            warn!(
                "Merge into snapshot {} stopped after {} assets: {}",
                snapshot.id, saved, reason
            );
            return Err(FinalizeError::InsertFailed {
                snapshot_id: snapshot.id,
                reason,
                assets_saved: saved,
                rolled_back: false,
            }
            .into());
        }

        info!("Merged {} assets into snapshot {}", saved, snapshot.id);
        Ok(FinalizeResult {
            snapshot_id: snapshot.id,
            assets_saved: saved,
            merged: true,
            totals: added,
        })
    }
}
