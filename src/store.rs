//! Persistence collaborators.
//!
//! `PortfolioStore` is the durable snapshot/holdings store and
//! `StagingRepository` keeps review sessions between requests. Both are
//! scoped per user by the caller; the in-memory versions back tests and the
//! demo.

use crate::error::{IngestError, Result};
use crate::schema::{ClassifiedAsset, NewSnapshot, PersistedAsset, Snapshot, StagedAsset, TempUpload};
use async_trait::async_trait;
use chrono::Utc;
use log::debug;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn list_snapshots(&self, user_id: &str) -> Result<Vec<Snapshot>>;

    /// `None` when the snapshot does not exist or belongs to another user.
    async fn get_snapshot(&self, user_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>>;

    async fn insert_snapshot(&self, user_id: &str, snapshot: NewSnapshot) -> Result<Snapshot>;

    async fn update_snapshot(&self, user_id: &str, snapshot: &Snapshot) -> Result<()>;

    /// Deletes the snapshot and every asset row under it.
    async fn delete_snapshot(&self, user_id: &str, snapshot_id: &str) -> Result<()>;

    async fn insert_assets(
        &self,
        user_id: &str,
        snapshot_id: &str,
        assets: &[ClassifiedAsset],
    ) -> Result<Vec<PersistedAsset>>;

    async fn list_assets(&self, user_id: &str, snapshot_id: &str) -> Result<Vec<PersistedAsset>>;
}

#[async_trait]
pub trait StagingRepository: Send + Sync {
    async fn save_upload(&self, upload: &TempUpload) -> Result<()>;

    async fn load_upload(&self, upload_id: Uuid) -> Result<Option<TempUpload>>;

    async fn list_uploads(&self, user_id: &str) -> Result<Vec<TempUpload>>;

    /// Inserts new staged assets and replaces existing ones by id.
    async fn upsert_staged_assets(&self, upload_id: Uuid, assets: &[StagedAsset]) -> Result<()>;

    async fn load_staged_assets(&self, upload_id: Uuid) -> Result<Vec<StagedAsset>>;

    async fn delete_staged_assets(&self, upload_id: Uuid) -> Result<()>;

    /// Removes the upload and its staged assets.
    async fn delete_upload(&self, upload_id: Uuid) -> Result<()>;
}

// ============================================================================
// In-memory portfolio store
// ============================================================================

#[derive(Default)]
struct PortfolioTables {
    snapshots: Vec<(String, Snapshot)>,
    assets: Vec<(String, PersistedAsset)>,
}

#[derive(Default)]
pub struct InMemoryPortfolioStore {
    tables: RwLock<PortfolioTables>,
}

impl InMemoryPortfolioStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seeds an existing snapshot, e.g. from a previous month.
    pub async fn seed(&self, user_id: &str, snapshot: Snapshot, assets: Vec<ClassifiedAsset>) {
        let mut tables = self.tables.write().await;
        for asset in assets {
            tables.assets.push((
                user_id.to_string(),
                PersistedAsset {
                    id: Uuid::new_v4().to_string(),
                    snapshot_id: snapshot.id.clone(),
                    asset,
                },
            ));
        }
        tables.snapshots.push((user_id.to_string(), snapshot));
    }

    pub async fn snapshot_count(&self, user_id: &str) -> usize {
        let tables = self.tables.read().await;
        tables.snapshots.iter().filter(|(owner, _)| owner == user_id).count()
    }
}

#[async_trait]
impl PortfolioStore for InMemoryPortfolioStore {
    async fn list_snapshots(&self, user_id: &str) -> Result<Vec<Snapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .iter()
            .filter(|(owner, _)| owner == user_id)
            .map(|(_, s)| s.clone())
            .collect())
    }

    async fn get_snapshot(&self, user_id: &str, snapshot_id: &str) -> Result<Option<Snapshot>> {
        let tables = self.tables.read().await;
        Ok(tables
            .snapshots
            .iter()
            .find(|(owner, s)| owner == user_id && s.id == snapshot_id)
            .map(|(_, s)| s.clone()))
    }

    async fn insert_snapshot(&self, user_id: &str, snapshot: NewSnapshot) -> Result<Snapshot> {
        let snapshot = Snapshot {
            id: format!("snap-{}", Uuid::new_v4()),
            name: snapshot.name,
            statement_date: snapshot.statement_date,
            totals: snapshot.totals,
            source_files: snapshot.source_files,
            created_at: Utc::now(),
        };
        self.tables
            .write()
            .await
            .snapshots
            .push((user_id.to_string(), snapshot.clone()));
        debug!("Inserted snapshot {} for {}", snapshot.id, user_id);
        Ok(snapshot)
    }

    async fn update_snapshot(&self, user_id: &str, snapshot: &Snapshot) -> Result<()> {
        let mut tables = self.tables.write().await;
        let slot = tables
            .snapshots
            .iter_mut()
            .find(|(owner, s)| owner == user_id && s.id == snapshot.id)
            .ok_or_else(|| IngestError::PersistenceError(format!("snapshot {} not found", snapshot.id)))?;
        slot.1 = snapshot.clone();
        Ok(())
    }

    async fn delete_snapshot(&self, user_id: &str, snapshot_id: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables
            .snapshots
            .retain(|(owner, s)| !(owner == user_id && s.id == snapshot_id));
        tables
            .assets
            .retain(|(owner, a)| !(owner == user_id && a.snapshot_id == snapshot_id));
        Ok(())
    }

    async fn insert_assets(
        &self,
        user_id: &str,
        snapshot_id: &str,
        assets: &[ClassifiedAsset],
    ) -> Result<Vec<PersistedAsset>> {
        let mut tables = self.tables.write().await;
        if !tables
            .snapshots
            .iter()
            .any(|(owner, s)| owner == user_id && s.id == snapshot_id)
        {
            return Err(IngestError::PersistenceError(format!(
                "snapshot {} not found",
                snapshot_id
            )));
        }

        let rows: Vec<PersistedAsset> = assets
            .iter()
            .map(|asset| PersistedAsset {
                id: Uuid::new_v4().to_string(),
                snapshot_id: snapshot_id.to_string(),
                asset: asset.clone(),
            })
            .collect();
        tables
            .assets
            .extend(rows.iter().map(|row| (user_id.to_string(), row.clone())));
        Ok(rows)
    }

    async fn list_assets(&self, user_id: &str, snapshot_id: &str) -> Result<Vec<PersistedAsset>> {
        let tables = self.tables.read().await;
        Ok(tables
            .assets
            .iter()
            .filter(|(owner, a)| owner == user_id && a.snapshot_id == snapshot_id)
            .map(|(_, a)| a.clone())
            .collect())
    }
}

// ============================================================================
// In-memory staging repository
// ============================================================================

#[derive(Default)]
pub struct InMemoryStagingRepository {
    uploads: RwLock<HashMap<Uuid, TempUpload>>,
    staged: RwLock<HashMap<Uuid, Vec<StagedAsset>>>,
    upsert_calls: AtomicUsize,
}

impl InMemoryStagingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `upsert_staged_assets` calls so far.
    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StagingRepository for InMemoryStagingRepository {
    async fn save_upload(&self, upload: &TempUpload) -> Result<()> {
        self.uploads.write().await.insert(upload.id, upload.clone());
        Ok(())
    }

    async fn load_upload(&self, upload_id: Uuid) -> Result<Option<TempUpload>> {
        Ok(self.uploads.read().await.get(&upload_id).cloned())
    }

    async fn list_uploads(&self, user_id: &str) -> Result<Vec<TempUpload>> {
        let uploads = self.uploads.read().await;
        let mut found: Vec<TempUpload> = uploads.values().filter(|u| u.user_id == user_id).cloned().collect();
        found.sort_by_key(|u| u.created_at);
        Ok(found)
    }

    async fn upsert_staged_assets(&self, upload_id: Uuid, assets: &[StagedAsset]) -> Result<()> {
        self.upsert_calls.fetch_add(1, Ordering::SeqCst);
        let mut staged = self.staged.write().await;
        let rows = staged.entry(upload_id).or_default();
        for asset in assets {
            match rows.iter_mut().find(|row| row.id == asset.id) {
                Some(row) => *row = asset.clone(),
                None => rows.push(asset.clone()),
            }
        }
        Ok(())
    }

    async fn load_staged_assets(&self, upload_id: Uuid) -> Result<Vec<StagedAsset>> {
        Ok(self
            .staged
            .read()
            .await
            .get(&upload_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn delete_staged_assets(&self, upload_id: Uuid) -> Result<()> {
        self.staged.write().await.remove(&upload_id);
        Ok(())
    }

    async fn delete_upload(&self, upload_id: Uuid) -> Result<()> {
        self.uploads.write().await.remove(&upload_id);
        self.staged.write().await.remove(&upload_id);
        Ok(())
    }
}
