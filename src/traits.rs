use crate::model::{Dataset, HarvestJob};
use async_trait::async_trait;
use thiserror::Error;
use uuid::Uuid;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Record not found: {0}")]
    NotFound(String),
    #[error("Conflicting record: {0}")]
    Conflict(String),
    #[error("Storage backend error: {0}")]
    Backend(String),
}

/// Persistence of catalog datasets.
#[async_trait]
pub trait DatasetStore: Send + Sync {
    /// Finds the dataset harvested from `remote_id`.
    ///
    /// A dataset matches when its `harvest:remote_id` extra equals `remote_id`
    /// and either its `harvest:source_id` equals `source_id` or its
    /// `harvest:domain` equals `domain`.
    async fn find_harvested(
        &self,
        source_id: &str,
        domain: &str,
        remote_id: &str,
    ) -> Result<Option<Dataset>, StoreError>;

    /// Inserts or updates a dataset, assigning its id on first save.
    ///
    /// A dataset without id whose provenance extras match a stored dataset
    /// (see [`find_harvested`](Self::find_harvested)) replaces that dataset
    /// and takes its id.
    async fn save(&self, dataset: &mut Dataset) -> Result<Uuid, StoreError>;

    async fn get(&self, id: Uuid) -> Result<Option<Dataset>, StoreError>;

    async fn count(&self) -> Result<usize, StoreError>;

    async fn list(&self) -> Result<Vec<Dataset>, StoreError>;
}

/// Persistence of harvest job records.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Inserts or replaces the job with the same id.
    async fn save_job(&self, job: &HarvestJob) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<HarvestJob>, StoreError>;

    /// Jobs of a source, oldest first.
    async fn jobs_for_source(&self, source_id: Uuid) -> Result<Vec<HarvestJob>, StoreError>;
}
