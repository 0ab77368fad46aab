pub mod executor;
pub mod harvest;
pub mod logging;
pub mod model;
pub mod store;
pub mod traits;

// Re-export common types for convenience
pub use executor::*;
pub use harvest::{
    Backend, BackendRegistry, BaseBackend, HarvestContext, HarvestError, HarvestFeature,
    HarvestFilter, HarvestOptions, Schema,
};
pub use model::*;
pub use store::*;
pub use traits::*;
