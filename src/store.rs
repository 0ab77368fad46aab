//! In-memory implementation of the storage traits.
//!
//! Cloning a [`MemoryStore`] shares the underlying collections, so several
//! harvest runs can write to the same catalog.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::model::{Dataset, HarvestJob, EXTRA_DOMAIN, EXTRA_REMOTE_ID, EXTRA_SOURCE_ID};
use crate::traits::{DatasetStore, JobStore, StoreError};

#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    datasets: Arc<RwLock<Vec<Dataset>>>,
    jobs: Arc<RwLock<HashMap<Uuid, HarvestJob>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn matches_harvest(dataset: &Dataset, source_id: &str, domain: &str, remote_id: &str) -> bool {
    if dataset.extra_str(EXTRA_REMOTE_ID) != Some(remote_id) {
        return false;
    }
    dataset.extra_str(EXTRA_SOURCE_ID) == Some(source_id)
        || (!domain.is_empty() && dataset.extra_str(EXTRA_DOMAIN) == Some(domain))
}

fn provenance(dataset: &Dataset) -> Option<(&str, &str, &str)> {
    Some((
        dataset.extra_str(EXTRA_SOURCE_ID)?,
        dataset.extra_str(EXTRA_DOMAIN).unwrap_or_default(),
        dataset.extra_str(EXTRA_REMOTE_ID)?,
    ))
}

#[async_trait]
impl DatasetStore for MemoryStore {
    async fn find_harvested(
        &self,
        source_id: &str,
        domain: &str,
        remote_id: &str,
    ) -> Result<Option<Dataset>, StoreError> {
        let datasets = self.datasets.read().await;
        Ok(datasets
            .iter()
            .find(|d| matches_harvest(d, source_id, domain, remote_id))
            .cloned())
    }

    async fn save(&self, dataset: &mut Dataset) -> Result<Uuid, StoreError> {
        let now = Utc::now();
        let mut datasets = self.datasets.write().await;

        match dataset.id {
            Some(id) => {
                let slot = datasets
                    .iter_mut()
                    .find(|d| d.id == Some(id))
                    .ok_or_else(|| StoreError::NotFound(id.to_string()))?;
                dataset.last_modified = Some(now);
                *slot = dataset.clone();
                Ok(id)
            }
            None => {
                // A concurrent run may have inserted the same remote item since
                // this dataset was looked up.
                let existing = provenance(dataset).and_then(|(source_id, domain, remote_id)| {
                    datasets
                        .iter_mut()
                        .find(|d| matches_harvest(d, source_id, domain, remote_id))
                });
                if let Some(slot) = existing {
                    dataset.id = slot.id;
                    dataset.created_at = slot.created_at;
                    dataset.last_modified = Some(now);
                    *slot = dataset.clone();
                    return slot.id.ok_or_else(|| StoreError::Backend("dataset without id".into()));
                }

                let id = Uuid::new_v4();
                dataset.id = Some(id);
                dataset.created_at.get_or_insert(now);
                dataset.last_modified = Some(now);
                datasets.push(dataset.clone());
                Ok(id)
            }
        }
    }

    async fn get(&self, id: Uuid) -> Result<Option<Dataset>, StoreError> {
        let datasets = self.datasets.read().await;
        Ok(datasets.iter().find(|d| d.id == Some(id)).cloned())
    }

    async fn count(&self) -> Result<usize, StoreError> {
        Ok(self.datasets.read().await.len())
    }

    async fn list(&self) -> Result<Vec<Dataset>, StoreError> {
        Ok(self.datasets.read().await.clone())
    }
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn save_job(&self, job: &HarvestJob) -> Result<(), StoreError> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<HarvestJob>, StoreError> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn jobs_for_source(&self, source_id: Uuid) -> Result<Vec<HarvestJob>, StoreError> {
        let jobs = self.jobs.read().await;
        let mut found: Vec<HarvestJob> = jobs
            .values()
            .filter(|j| j.source_id == source_id)
            .cloned()
            .collect();
        found.sort_by_key(|j| j.created);
        Ok(found)
    }
}
