//! Harvest module - pluggable backends importing remote dataset metadata.
//!
//! This module provides the core abstractions for the catalog harvester:
//! - **Traits**: [`Backend`] for remote catalog implementations
//! - **Declarations**: [`HarvestFilter`] and [`HarvestFeature`]
//! - **Validation**: [`Schema`] and the path-qualified [`validate`] wrapper
//! - **Pipeline**: run orchestration via [`pipeline::BaseBackend`]
//! - **Backends**: name-based lookup via [`backends::BackendRegistry`]

pub mod backends;
pub mod pipeline;
pub mod traits;
pub mod validation;

// Re-export commonly used types
pub use traits::{
    Backend, FilterType, FilterValue, HarvestError, HarvestFeature, HarvestFilter,
    UnsupportedFilterType,
};

pub use pipeline::{BaseBackend, HarvestContext, HarvestOptions};

pub use validation::{
    validate, validate_model, ExtraKeys, Invalid, InvalidKind, ObjectSchema, PathSegment, Schema,
};

pub use backends::{BackendFactory, BackendInfo, BackendRegistry};
