//! Catalog records touched by a harvest run.
//!
//! - [`HarvestSource`] / [`SourceConfig`]: the persisted source configuration
//! - [`HarvestJob`] / [`HarvestItem`]: the record of one harvest run
//! - [`Dataset`]: the catalog entity receiving harvested values

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;
use validator::Validate;

/// Extras key holding the id of the source that produced a dataset.
pub const EXTRA_SOURCE_ID: &str = "harvest:source_id";
/// Extras key holding the source domain at the time of the last harvest.
pub const EXTRA_DOMAIN: &str = "harvest:domain";
/// Extras key holding the identifier of the item on the remote side.
pub const EXTRA_REMOTE_ID: &str = "harvest:remote_id";
/// Extras key holding the naive UTC timestamp of the last harvest.
pub const EXTRA_LAST_UPDATE: &str = "harvest:last_update";

/// Format of the [`EXTRA_LAST_UPDATE`] value (microsecond precision).
pub const LAST_UPDATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6f";

// ============================================================================
// Harvest Source
// ============================================================================

/// A remote catalog the application harvests from.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct HarvestSource {
    pub id: Uuid,

    #[validate(length(min = 1, message = "must not be empty"))]
    pub name: String,

    /// Base URL of the remote catalog
    #[validate(url(message = "invalid url"))]
    pub url: String,

    /// Name of the backend registered for this source (e.g. `"dcat"`)
    #[validate(length(min = 1, message = "must not be empty"))]
    pub backend: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,

    /// Organization receiving the harvested datasets
    #[serde(default)]
    pub organization: Option<String>,

    /// User owning the harvested datasets when no organization is set
    #[serde(default)]
    pub owner: Option<String>,

    #[serde(default)]
    #[validate(nested)]
    pub config: SourceConfig,

    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
}

fn default_active() -> bool {
    true
}

impl HarvestSource {
    pub fn new(name: impl Into<String>, url: impl Into<String>, backend: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            url: url.into(),
            backend: backend.into(),
            description: None,
            active: true,
            organization: None,
            owner: None,
            config: SourceConfig::default(),
            created_at: Utc::now(),
        }
    }

    pub fn with_config(mut self, config: SourceConfig) -> Self {
        self.config = config;
        self
    }

    /// Host part of the source URL, without port.
    ///
    /// Returns an empty string when the URL cannot be parsed or has no host.
    pub fn domain(&self) -> String {
        url::Url::parse(&self.url)
            .ok()
            .and_then(|u| u.host_str().map(str::to_owned))
            .unwrap_or_default()
    }
}

/// Free-form configuration stored on a [`HarvestSource`].
///
/// `features` and `filters` are understood by every backend; anything else is
/// kept in `extra` for the backend to interpret.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
pub struct SourceConfig {
    /// Feature toggles overriding the backend defaults
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub features: BTreeMap<String, bool>,

    /// Filters applied by the backend, in the order they were configured
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    #[validate(nested)]
    pub filters: Vec<FilterConfig>,

    /// Backend specific settings
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl SourceConfig {
    /// Builds a configuration from a JSON object.
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.extra.get(key)
    }

    pub fn get_u64(&self, key: &str) -> Option<u64> {
        self.get(key).and_then(Value::as_u64)
    }

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.get(key).and_then(Value::as_str)
    }
}

/// One configured filter value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct FilterConfig {
    #[validate(length(min = 1, message = "must not be empty"))]
    pub key: String,

    #[serde(default)]
    pub value: Value,

    /// Whether matching items are kept or dropped
    #[serde(default, rename = "type")]
    pub mode: FilterMode,
}

impl FilterConfig {
    pub fn include(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            mode: FilterMode::Include,
        }
    }

    pub fn exclude(key: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
            mode: FilterMode::Exclude,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterMode {
    #[default]
    Include,
    Exclude,
}

// ============================================================================
// Harvest Job
// ============================================================================

/// Status of a harvest job.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum JobStatus {
    #[default]
    Pending,
    Initializing,
    Initialized,
    Processing,
    Done,
    /// Finished, but at least one item failed
    DoneErrors,
    /// Initialization failed, no item was processed
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Initializing => "initializing",
            JobStatus::Initialized => "initialized",
            JobStatus::Processing => "processing",
            JobStatus::Done => "done",
            JobStatus::DoneErrors => "done-errors",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Done | JobStatus::DoneErrors | JobStatus::Failed
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status of a single harvested item.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    #[default]
    Pending,
    Started,
    Done,
    Skipped,
    Failed,
}

/// Error recorded on a job or an item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestErrorRecord {
    pub created_at: DateTime<Utc>,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl HarvestErrorRecord {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            created_at: Utc::now(),
            message: message.into(),
            details: None,
        }
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

/// One remote record queued during initialization.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestItem {
    pub remote_id: String,

    /// Positional data attached by the backend at initialization
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,

    /// Named data attached by the backend at initialization
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub kwargs: Map<String, Value>,

    pub status: ItemStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,

    /// Dataset created or updated from this item
    pub dataset: Option<Uuid>,

    #[serde(default)]
    pub errors: Vec<HarvestErrorRecord>,
}

impl HarvestItem {
    pub fn new(remote_id: impl Into<String>) -> Self {
        Self {
            remote_id: remote_id.into(),
            args: Vec::new(),
            kwargs: Map::new(),
            status: ItemStatus::Pending,
            created: Utc::now(),
            started: None,
            ended: None,
            dataset: None,
            errors: Vec::new(),
        }
    }
}

/// Record of one harvest run of a source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestJob {
    pub id: Uuid,
    pub source_id: Uuid,
    pub status: JobStatus,
    pub created: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub ended: Option<DateTime<Utc>>,
    #[serde(default)]
    pub errors: Vec<HarvestErrorRecord>,
    #[serde(default)]
    pub items: Vec<HarvestItem>,
}

impl HarvestJob {
    pub fn new(source_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            source_id,
            status: JobStatus::Pending,
            created: Utc::now(),
            started: None,
            ended: None,
            errors: Vec::new(),
            items: Vec::new(),
        }
    }

    /// Number of items in the given status.
    pub fn count(&self, status: ItemStatus) -> usize {
        self.items.iter().filter(|i| i.status == status).count()
    }

    pub fn has_failures(&self) -> bool {
        self.items.iter().any(|i| i.status == ItemStatus::Failed)
    }
}

// ============================================================================
// Dataset
// ============================================================================

/// Catalog dataset.
///
/// `id` stays `None` until the dataset is saved for the first time.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub id: Option<Uuid>,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tags: Vec<String>,
    /// Landing page of the dataset on the remote catalog
    pub url: Option<String>,
    pub license: Option<String>,
    #[serde(default)]
    pub private: bool,
    pub organization: Option<String>,
    pub owner: Option<String>,
    pub archived: Option<DateTime<Utc>>,

    /// Open-ended metadata, including harvest provenance
    #[serde(default)]
    pub extras: BTreeMap<String, Value>,

    pub created_at: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

impl Dataset {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Returns a string extra, if set and a string.
    pub fn extra_str(&self, key: &str) -> Option<&str> {
        self.extras.get(key).and_then(Value::as_str)
    }

    pub fn set_extra(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.extras.insert(key.into(), value.into());
    }

    /// Checks the dataset can be persisted.
    pub fn validate(&self) -> Result<(), String> {
        if self.title.trim().is_empty() {
            return Err("[title] field is required".to_string());
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
