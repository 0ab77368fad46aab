//! Harvest run orchestration.
//!
//! This module provides [`BaseBackend`], the coordinator that runs a
//! [`Backend`] against a [`HarvestSource`]:
//! 1. **Initialization**: the backend queues remote item identifiers
//! 2. **Processing**: each item becomes a [`Dataset`], stamped with harvest
//!    provenance and persisted (idempotent by remote id within a source)
//! 3. **Finalization**: the [`HarvestJob`] status reflects the outcome
//!
//! Each stage is logged via `tracing`, and each `process` call is bounded by
//! [`HarvestOptions::item_timeout`].

use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::harvest::traits::{Backend, HarvestError, HarvestFeature, HarvestFilter};
use crate::harvest::validation::{self, Schema};
use crate::model::{
    Dataset, FilterConfig, HarvestErrorRecord, HarvestItem, HarvestJob, HarvestSource,
    ItemStatus, JobStatus, SourceConfig, EXTRA_DOMAIN, EXTRA_LAST_UPDATE, EXTRA_REMOTE_ID,
    EXTRA_SOURCE_ID, LAST_UPDATE_FORMAT,
};
use crate::traits::{DatasetStore, JobStore};

// ============================================================================
// Options
// ============================================================================

/// Run options of a [`BaseBackend`].
#[derive(Debug, Clone)]
pub struct HarvestOptions {
    /// Validate datasets without persisting anything
    pub dryrun: bool,

    /// Keep only the first N queued items
    pub max_items: Option<usize>,

    /// Timeout of each `process` call (default: 5 minutes)
    pub item_timeout: Duration,
}

impl Default for HarvestOptions {
    fn default() -> Self {
        Self {
            dryrun: false,
            max_items: None,
            item_timeout: Duration::from_secs(300),
        }
    }
}

impl HarvestOptions {
    pub fn with_dryrun(mut self, dryrun: bool) -> Self {
        self.dryrun = dryrun;
        self
    }

    pub fn with_max_items(mut self, max_items: usize) -> Self {
        self.max_items = Some(max_items);
        self
    }

    pub fn with_item_timeout(mut self, timeout: Duration) -> Self {
        self.item_timeout = timeout;
        self
    }
}

// ============================================================================
// Context
// ============================================================================

/// View of the running harvest handed to [`Backend`] implementations.
pub struct HarvestContext<'a> {
    source: &'a HarvestSource,
    filters: &'a [HarvestFilter],
    features: &'a [HarvestFeature],
    datasets: &'a dyn DatasetStore,
    items: Vec<HarvestItem>,
}

impl<'a> HarvestContext<'a> {
    fn new(
        source: &'a HarvestSource,
        filters: &'a [HarvestFilter],
        features: &'a [HarvestFeature],
        datasets: &'a dyn DatasetStore,
    ) -> Self {
        Self {
            source,
            filters,
            features,
            datasets,
            items: Vec::new(),
        }
    }

    pub fn source(&self) -> &HarvestSource {
        self.source
    }

    pub fn config(&self) -> &SourceConfig {
        &self.source.config
    }

    /// Queues a remote item for processing.
    pub fn add_item(&mut self, remote_id: impl ToString) -> &mut HarvestItem {
        self.items.push(HarvestItem::new(remote_id.to_string()));
        let last = self.items.len() - 1;
        &mut self.items[last]
    }

    /// Queues a remote item carrying data for [`Backend::process`].
    pub fn add_item_with(
        &mut self,
        remote_id: impl ToString,
        args: Vec<Value>,
        kwargs: serde_json::Map<String, Value>,
    ) -> &mut HarvestItem {
        let item = self.add_item(remote_id);
        item.args = args;
        item.kwargs = kwargs;
        item
    }

    /// Items queued so far.
    pub fn items(&self) -> &[HarvestItem] {
        &self.items
    }

    pub fn has_feature(&self, key: &str) -> Result<bool, HarvestError> {
        resolve_feature(self.features, &self.source.config, key)
    }

    pub fn get_filters(&self) -> Vec<FilterConfig> {
        select_filters(self.filters, &self.source.config)
    }

    pub fn validate(&self, data: &Value, schema: &Schema) -> Result<Value, HarvestError> {
        validation::validate(data, schema)
    }

    /// Returns the dataset previously harvested from `remote_id`, or a new one.
    ///
    /// Datasets are matched on the source id first, then on the source
    /// domain, so a source whose URL changed keeps its datasets.
    pub async fn get_dataset(&self, remote_id: &str) -> Result<Dataset, HarvestError> {
        get_or_create_dataset(self.datasets, self.source, remote_id).await
    }
}

fn resolve_feature(
    features: &[HarvestFeature],
    config: &SourceConfig,
    key: &str,
) -> Result<bool, HarvestError> {
    let feature = features
        .iter()
        .find(|f| f.key == key)
        .ok_or_else(|| HarvestError::UnknownFeature(key.to_string()))?;
    Ok(config
        .features
        .get(key)
        .copied()
        .unwrap_or(feature.default))
}

/// Configured filters the backend declares, in configuration order.
fn select_filters(filters: &[HarvestFilter], config: &SourceConfig) -> Vec<FilterConfig> {
    config
        .filters
        .iter()
        .filter(|configured| filters.iter().any(|f| f.key == configured.key))
        .cloned()
        .collect()
}

async fn get_or_create_dataset(
    datasets: &dyn DatasetStore,
    source: &HarvestSource,
    remote_id: &str,
) -> Result<Dataset, HarvestError> {
    let existing = datasets
        .find_harvested(&source.id.to_string(), &source.domain(), remote_id)
        .await?;
    Ok(existing.unwrap_or_default())
}

// ============================================================================
// Base Backend
// ============================================================================

/// Runs a [`Backend`] against a source and records the run.
///
/// # Example
///
/// ```ignore
/// use catalog_harvester::{BaseBackend, HarvestSource, MemoryStore};
///
/// let source = HarvestSource::new("Demo", "https://data.example.org", "demo");
/// let mut runner = BaseBackend::new(DemoBackend, source, MemoryStore::new());
/// let job = runner.harvest().await;
/// println!("{} items, status {}", job.items.len(), job.status);
/// ```
pub struct BaseBackend<B, S>
where
    B: Backend,
    S: DatasetStore + JobStore,
{
    backend: B,
    source: HarvestSource,
    store: S,
    options: HarvestOptions,
    job: Option<HarvestJob>,
}

impl<B, S> BaseBackend<B, S>
where
    B: Backend,
    S: DatasetStore + JobStore,
{
    pub fn new(backend: B, source: HarvestSource, store: S) -> Self {
        Self {
            backend,
            source,
            store,
            options: HarvestOptions::default(),
            job: None,
        }
    }

    pub fn with_options(mut self, options: HarvestOptions) -> Self {
        self.options = options;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn source(&self) -> &HarvestSource {
        &self.source
    }

    /// Mutable access to the source, e.g. after its URL changed.
    pub fn source_mut(&mut self) -> &mut HarvestSource {
        &mut self.source
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn options(&self) -> &HarvestOptions {
        &self.options
    }

    /// Job of the last [`harvest`](Self::harvest) call.
    pub fn job(&self) -> Option<&HarvestJob> {
        self.job.as_ref()
    }

    /// Whether a feature is enabled for this source.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::UnknownFeature`] if the backend does not
    /// declare `key`.
    pub fn has_feature(&self, key: &str) -> Result<bool, HarvestError> {
        resolve_feature(self.backend.features(), &self.source.config, key)
    }

    /// Configured filters the backend declares, in configuration order.
    pub fn get_filters(&self) -> Vec<FilterConfig> {
        select_filters(self.backend.filters(), &self.source.config)
    }

    /// Validates `data` against `schema`; see [`validation::validate`].
    pub fn validate(&self, data: &Value, schema: &Schema) -> Result<Value, HarvestError> {
        validation::validate(data, schema)
    }

    /// Checks the source record and its configuration against the backend
    /// declarations.
    ///
    /// Unlike [`get_filters`](Self::get_filters), which ignores undeclared
    /// filters, undeclared features and filters are reported here, as well as
    /// filter values not matching the declared type.
    pub fn validate_config(&self) -> Result<(), HarvestError> {
        let mut errors = match validation::validate_model(&self.source) {
            Ok(()) => Vec::new(),
            Err(HarvestError::Validation { errors }) => errors,
            Err(other) => return Err(other),
        };

        for key in self.source.config.features.keys() {
            if !self.backend.features().iter().any(|f| &f.key == key) {
                errors.push(format!("[config.features.{}] unknown feature", key));
            }
        }

        for (index, configured) in self.source.config.filters.iter().enumerate() {
            match self
                .backend
                .filters()
                .iter()
                .find(|f| f.key == configured.key)
            {
                None => errors.push(format!(
                    "[config.filters.{}.key] unknown filter: {}",
                    index, configured.key
                )),
                Some(filter) if !filter.accepts(&configured.value) => errors.push(format!(
                    "[config.filters.{}.value] expected {}: {}",
                    index,
                    filter.filter_type,
                    validation::display_value(&configured.value)
                )),
                Some(_) => {}
            }
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(HarvestError::validation(errors))
        }
    }

    /// Returns the dataset previously harvested from `remote_id`, or a new one.
    pub async fn get_dataset(&self, remote_id: &str) -> Result<Dataset, HarvestError> {
        get_or_create_dataset(&self.store, &self.source, remote_id).await
    }

    /// Runs a complete harvest and returns its job.
    ///
    /// Failures never abort the call: an initialization error marks the job
    /// [`JobStatus::Failed`], item errors mark the item failed (or skipped)
    /// and the job [`JobStatus::DoneErrors`].
    #[instrument(skip(self), fields(source = %self.source.name, backend = self.backend.name()))]
    pub async fn harvest(&mut self) -> HarvestJob {
        let job = self.run().await;
        self.job = Some(job.clone());
        job
    }

    async fn run(&self) -> HarvestJob {
        let mut job = HarvestJob::new(self.source.id);
        let mut ctx = HarvestContext::new(
            &self.source,
            self.backend.filters(),
            self.backend.features(),
            &self.store,
        );

        // ====================================================================
        // Stage 1: Initialization
        // ====================================================================

        debug!("Initializing backend");
        job.status = JobStatus::Initializing;
        job.started = Some(Utc::now());
        self.save_job(&job).await;

        if let Err(e) = self.backend.initialize(&mut ctx).await {
            if e.is_validation() {
                info!(error = %e, "Initialization failed");
                job.errors.push(HarvestErrorRecord::new(e.to_string()));
            } else {
                error!(error = %e, "Initialization failed");
                job.errors
                    .push(HarvestErrorRecord::new(e.to_string()).with_details(format!("{:?}", e)));
            }
            job.status = JobStatus::Failed;
            self.end(&mut job).await;
            return job;
        }

        job.items = std::mem::take(&mut ctx.items);
        if let Some(max_items) = self.options.max_items {
            job.items.truncate(max_items);
        }
        job.status = JobStatus::Initialized;
        self.save_job(&job).await;
        info!(items = job.items.len(), "Queued items");

        // ====================================================================
        // Stage 2: Processing
        // ====================================================================

        job.status = JobStatus::Processing;
        for index in 0..job.items.len() {
            self.process_item(&mut job.items[index], &ctx).await;
            self.save_job(&job).await;
        }

        // ====================================================================
        // Stage 3: Finalization
        // ====================================================================

        job.status = if job.has_failures() {
            JobStatus::DoneErrors
        } else {
            JobStatus::Done
        };
        self.end(&mut job).await;

        info!(
            status = %job.status,
            done = job.count(ItemStatus::Done),
            skipped = job.count(ItemStatus::Skipped),
            failed = job.count(ItemStatus::Failed),
            "Harvest completed"
        );
        job
    }

    async fn process_item(&self, item: &mut HarvestItem, ctx: &HarvestContext<'_>) {
        debug!(remote_id = %item.remote_id, "Processing item");
        item.status = ItemStatus::Started;
        item.started = Some(Utc::now());

        let limit = self.options.item_timeout;
        let processed = match timeout(limit, self.backend.process(item, ctx)).await {
            Ok(result) => result,
            Err(_) => Err(HarvestError::Timeout(limit.as_secs())),
        };

        let outcome = match processed {
            Ok(dataset) => self.persist(dataset, &item.remote_id).await,
            Err(e) => Err(e),
        };

        match outcome {
            Ok(dataset_id) => {
                item.dataset = dataset_id;
                item.status = ItemStatus::Done;
            }
            Err(e) if e.is_skip() => {
                info!(remote_id = %item.remote_id, reason = %e, "Skipped item");
                item.status = ItemStatus::Skipped;
                item.errors.push(HarvestErrorRecord::new(e.to_string()));
            }
            Err(e) if e.is_validation() => {
                info!(remote_id = %item.remote_id, error = %e, "Error validating item");
                item.status = ItemStatus::Failed;
                item.errors.push(HarvestErrorRecord::new(e.to_string()));
            }
            Err(e) => {
                error!(remote_id = %item.remote_id, error = %e, "Error while processing item");
                item.status = ItemStatus::Failed;
                item.errors
                    .push(HarvestErrorRecord::new(e.to_string()).with_details(format!("{:?}", e)));
            }
        }

        item.ended = Some(Utc::now());
    }

    /// Stamps provenance on the dataset and saves it unless running dry.
    async fn persist(
        &self,
        mut dataset: Dataset,
        remote_id: &str,
    ) -> Result<Option<Uuid>, HarvestError> {
        dataset.set_extra(EXTRA_SOURCE_ID, self.source.id.to_string());
        dataset.set_extra(EXTRA_DOMAIN, self.source.domain());
        dataset.set_extra(EXTRA_REMOTE_ID, remote_id);
        dataset.set_extra(
            EXTRA_LAST_UPDATE,
            Utc::now().naive_utc().format(LAST_UPDATE_FORMAT).to_string(),
        );
        dataset.archived = None;

        if dataset.organization.is_none() && dataset.owner.is_none() {
            if let Some(organization) = &self.source.organization {
                dataset.organization = Some(organization.clone());
            } else if let Some(owner) = &self.source.owner {
                dataset.owner = Some(owner.clone());
            }
        }

        dataset
            .validate()
            .map_err(|e| HarvestError::validation(vec![e]))?;

        if self.options.dryrun {
            return Ok(dataset.id);
        }

        let id = self.store.save(&mut dataset).await?;
        Ok(Some(id))
    }

    async fn end(&self, job: &mut HarvestJob) {
        job.ended = Some(Utc::now());
        self.save_job(job).await;
    }

    async fn save_job(&self, job: &HarvestJob) {
        if self.options.dryrun {
            return;
        }
        if let Err(e) = self.store.save_job(job).await {
            warn!(job_id = %job.id, error = %e, "Failed to save harvest job");
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
