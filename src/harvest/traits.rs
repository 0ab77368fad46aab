//! Core traits and types for harvest backends.
//!
//! This module defines the declarative side of a backend:
//! - Backend implementations via [`Backend`]
//! - Filter declarations via [`HarvestFilter`] and [`FilterType`]
//! - Feature toggles via [`HarvestFeature`]
//! - Standardized error handling via [`HarvestError`]

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::harvest::pipeline::HarvestContext;
use crate::model::{Dataset, HarvestItem};
use crate::traits::StoreError;

// ============================================================================
// Backend Trait
// ============================================================================

/// A harvester for one kind of remote catalog.
///
/// Implementations only describe *what* to harvest: [`initialize`] queues the
/// remote identifiers and [`process`] turns one of them into a [`Dataset`].
/// Provenance stamping, persistence and job bookkeeping are handled by
/// [`BaseBackend`](crate::harvest::BaseBackend).
///
/// # Thread Safety
///
/// Implementations must be `Send + Sync` so harvests can run on the
/// [`HarvesterExecutor`](crate::HarvesterExecutor).
///
/// [`initialize`]: Backend::initialize
/// [`process`]: Backend::process
#[async_trait]
pub trait Backend: Send + Sync {
    /// Unique identifier of this backend, matched against
    /// [`HarvestSource::backend`](crate::model::HarvestSource::backend).
    fn name(&self) -> &str;

    /// Human-readable label.
    fn display_name(&self) -> &str {
        self.name()
    }

    /// Filters this backend understands.
    fn filters(&self) -> &[HarvestFilter] {
        &[]
    }

    /// Feature toggles this backend exposes.
    fn features(&self) -> &[HarvestFeature] {
        &[]
    }

    /// Queues the remote items of this run with [`HarvestContext::add_item`].
    ///
    /// # Errors
    ///
    /// Any error marks the whole job as failed; no item is processed.
    async fn initialize(&self, ctx: &mut HarvestContext<'_>) -> Result<(), HarvestError>;

    /// Builds the dataset for one queued item.
    ///
    /// Use [`HarvestContext::get_dataset`] to start from the dataset a
    /// previous run produced.
    ///
    /// # Errors
    ///
    /// [`HarvestError::Skip`] marks the item as skipped; any other error marks
    /// it as failed. Neither stops the run.
    async fn process(
        &self,
        item: &HarvestItem,
        ctx: &HarvestContext<'_>,
    ) -> Result<Dataset, HarvestError>;
}

#[async_trait]
impl<B: Backend + ?Sized> Backend for Box<B> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn display_name(&self) -> &str {
        (**self).display_name()
    }

    fn filters(&self) -> &[HarvestFilter] {
        (**self).filters()
    }

    fn features(&self) -> &[HarvestFeature] {
        (**self).features()
    }

    async fn initialize(&self, ctx: &mut HarvestContext<'_>) -> Result<(), HarvestError> {
        (**self).initialize(ctx).await
    }

    async fn process(
        &self,
        item: &HarvestItem,
        ctx: &HarvestContext<'_>,
    ) -> Result<Dataset, HarvestError> {
        (**self).process(item, ctx).await
    }
}

// ============================================================================
// Filters
// ============================================================================

/// Scalar types a filter value may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FilterType {
    #[serde(rename = "string")]
    String,
    #[serde(rename = "integer")]
    Integer,
    #[serde(rename = "boolean")]
    Boolean,
    #[serde(rename = "date-time")]
    DateTime,
    #[serde(rename = "date")]
    Date,
}

impl FilterType {
    pub const ALL: [FilterType; 5] = [
        FilterType::String,
        FilterType::Integer,
        FilterType::Boolean,
        FilterType::DateTime,
        FilterType::Date,
    ];

    /// Name used in serialized filter descriptions.
    pub fn as_str(&self) -> &'static str {
        match self {
            FilterType::String => "string",
            FilterType::Integer => "integer",
            FilterType::Boolean => "boolean",
            FilterType::DateTime => "date-time",
            FilterType::Date => "date",
        }
    }

    /// Checks whether a configured value has this type.
    ///
    /// Dates and date-times are expected as strings (`YYYY-MM-DD`, RFC 3339
    /// or naive ISO 8601).
    pub fn accepts(&self, value: &Value) -> bool {
        match self {
            FilterType::String => value.is_string(),
            FilterType::Integer => value.is_i64() || value.is_u64(),
            FilterType::Boolean => value.is_boolean(),
            FilterType::DateTime => value.as_str().is_some_and(|s| {
                DateTime::parse_from_rfc3339(s).is_ok()
                    || NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f").is_ok()
            }),
            FilterType::Date => value
                .as_str()
                .is_some_and(|s| NaiveDate::parse_from_str(s, "%Y-%m-%d").is_ok()),
        }
    }
}

impl std::fmt::Display for FilterType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raised when declaring a filter with a non scalar type.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Unsupported filter type: {0}")]
pub struct UnsupportedFilterType(pub String);

impl FromStr for FilterType {
    type Err = UnsupportedFilterType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "str" | "string" => Ok(FilterType::String),
            "int" | "integer" => Ok(FilterType::Integer),
            "bool" | "boolean" => Ok(FilterType::Boolean),
            "datetime" | "date-time" => Ok(FilterType::DateTime),
            "date" => Ok(FilterType::Date),
            other => Err(UnsupportedFilterType(other.to_string())),
        }
    }
}

/// Rust types usable as filter values.
pub trait FilterValue {
    const FILTER_TYPE: FilterType;
}

macro_rules! filter_value {
    ($ty:ty => $kind:ident) => {
        impl FilterValue for $ty {
            const FILTER_TYPE: FilterType = FilterType::$kind;
        }
    };
}

filter_value!(String => String);
filter_value!(&str => String);
filter_value!(i32 => Integer);
filter_value!(i64 => Integer);
filter_value!(u32 => Integer);
filter_value!(u64 => Integer);
filter_value!(bool => Boolean);
filter_value!(NaiveDateTime => DateTime);
filter_value!(DateTime<Utc> => DateTime);
filter_value!(NaiveDate => Date);

/// A filter option a backend can apply to narrow harvested items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HarvestFilter {
    pub label: String,
    pub key: String,
    #[serde(rename = "type")]
    pub filter_type: FilterType,
    pub description: Option<String>,
}

impl HarvestFilter {
    /// Declares a filter from a type name (`"str"`, `"integer"`, `"date"`…).
    ///
    /// # Errors
    ///
    /// Returns [`UnsupportedFilterType`] for anything but the scalar types of
    /// [`FilterType`].
    pub fn new(
        label: impl Into<String>,
        key: impl Into<String>,
        type_name: &str,
    ) -> Result<Self, UnsupportedFilterType> {
        Ok(Self::with_type(label, key, type_name.parse()?))
    }

    /// Declares a filter whose type follows a Rust type.
    pub fn of<T: FilterValue>(label: impl Into<String>, key: impl Into<String>) -> Self {
        Self::with_type(label, key, T::FILTER_TYPE)
    }

    pub fn with_type(
        label: impl Into<String>,
        key: impl Into<String>,
        filter_type: FilterType,
    ) -> Self {
        Self {
            label: label.into(),
            key: key.into(),
            filter_type,
            description: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn accepts(&self, value: &Value) -> bool {
        self.filter_type.accepts(value)
    }

    /// JSON description exposed to clients configuring a source.
    pub fn as_dict(&self) -> Value {
        serde_json::json!({
            "label": self.label,
            "key": self.key,
            "type": self.filter_type.as_str(),
            "description": self.description,
        })
    }
}

// ============================================================================
// Features
// ============================================================================

/// A boolean toggle a backend branches on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HarvestFeature {
    pub key: String,
    pub label: String,
    pub description: Option<String>,
    /// Value used when the source configuration does not set the toggle
    pub default: bool,
}

impl HarvestFeature {
    pub fn new(key: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            label: label.into(),
            description: None,
            default: false,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_default(mut self, default: bool) -> Self {
        self.default = default;
        self
    }

    pub fn as_dict(&self) -> Value {
        serde_json::json!({
            "key": self.key,
            "label": self.label,
            "description": self.description,
            "default": self.default,
        })
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while configuring or running a harvest.
#[derive(Error, Debug)]
pub enum HarvestError {
    /// Generic harvest failure
    #[error("{0}")]
    Harvest(String),

    /// Feature key not declared by the backend
    #[error("Unknown feature {0}")]
    UnknownFeature(String),

    /// The item should be ignored; not an error for the run
    #[error("{0}")]
    Skip(String),

    /// Data did not match the expected schema; one line per violation
    #[error("Validation error:\n- {}", .errors.join("\n- "))]
    Validation { errors: Vec<String> },

    /// No backend registered under this name
    #[error("Unknown backend {0}")]
    UnknownBackend(String),

    /// `process` exceeded the configured item timeout
    #[error("Item processing timed out after {0}s")]
    Timeout(u64),

    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The executor could not run the harvest
    #[error("Executor error: {0}")]
    Executor(String),
}

impl HarvestError {
    pub fn validation(errors: Vec<String>) -> Self {
        HarvestError::Validation { errors }
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, HarvestError::Skip(_))
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, HarvestError::Validation { .. })
    }
}

// ============================================================================
// Tests
// ============================================================================
