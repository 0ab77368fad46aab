//! Registry of the harvest backends known to the application.
//!
//! Sources reference their backend by name
//! ([`HarvestSource::backend`](crate::model::HarvestSource::backend)); the
//! registry resolves that name to a fresh [`Backend`] instance and describes
//! the filters and features each backend accepts.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::Serialize;

use crate::harvest::pipeline::BaseBackend;
use crate::harvest::traits::{Backend, HarvestError, HarvestFeature, HarvestFilter};
use crate::model::HarvestSource;
use crate::traits::{DatasetStore, JobStore};

/// Builds a backend instance.
pub type BackendFactory = Arc<dyn Fn() -> Box<dyn Backend> + Send + Sync>;

/// Description of a registered backend, as exposed to clients.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BackendInfo {
    pub id: String,
    pub label: String,
    pub filters: Vec<HarvestFilter>,
    pub features: Vec<HarvestFeature>,
}

#[derive(Clone, Default)]
pub struct BackendRegistry {
    factories: BTreeMap<String, BackendFactory>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a backend factory under `name`.
    ///
    /// # Errors
    ///
    /// Returns [`HarvestError::Harvest`] if `name` is already registered.
    pub fn register<F>(&mut self, name: impl Into<String>, factory: F) -> Result<(), HarvestError>
    where
        F: Fn() -> Box<dyn Backend> + Send + Sync + 'static,
    {
        let name = name.into();
        if self.factories.contains_key(&name) {
            return Err(HarvestError::Harvest(format!(
                "Backend {} already registered",
                name
            )));
        }
        self.factories.insert(name, Arc::new(factory));
        Ok(())
    }

    /// Instantiates the backend registered under `name`.
    pub fn get(&self, name: &str) -> Result<Box<dyn Backend>, HarvestError> {
        self.factories
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| HarvestError::UnknownBackend(name.to_string()))
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Describes every registered backend, sorted by name.
    pub fn info(&self) -> Vec<BackendInfo> {
        self.factories
            .iter()
            .map(|(name, factory)| {
                let backend = factory();
                BackendInfo {
                    id: name.clone(),
                    label: backend.display_name().to_string(),
                    filters: backend.filters().to_vec(),
                    features: backend.features().to_vec(),
                }
            })
            .collect()
    }

    /// Builds a runner for `source` with the backend it references.
    pub fn runner_for<S>(
        &self,
        source: HarvestSource,
        store: S,
    ) -> Result<BaseBackend<Box<dyn Backend>, S>, HarvestError>
    where
        S: DatasetStore + JobStore,
    {
        let backend = self.get(&source.backend)?;
        Ok(BaseBackend::new(backend, source, store))
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackendRegistry")
            .field("backends", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::pipeline::HarvestContext;
    use crate::model::{Dataset, HarvestItem, JobStatus};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;

    struct ListBackend {
        filters: Vec<HarvestFilter>,
        features: Vec<HarvestFeature>,
    }

    impl ListBackend {
        fn boxed() -> Box<dyn Backend> {
            Box::new(Self {
                filters: vec![HarvestFilter::of::<String>("Tag", "tag")
                    .with_description("Only datasets with this tag")],
                features: vec![HarvestFeature::new("archive", "Archive removed datasets")],
            })
        }
    }

    #[async_trait]
    impl Backend for ListBackend {
        fn name(&self) -> &str {
            "list"
        }

        fn display_name(&self) -> &str {
            "Static list"
        }

        fn filters(&self) -> &[HarvestFilter] {
            &self.filters
        }

        fn features(&self) -> &[HarvestFeature] {
            &self.features
        }

        async fn initialize(&self, ctx: &mut HarvestContext<'_>) -> Result<(), HarvestError> {
            let ids: Vec<String> = ctx
                .config()
                .get("ids")
                .and_then(|v| v.as_array())
                .map(|ids| {
                    ids.iter()
                        .filter_map(|id| id.as_str().map(str::to_owned))
                        .collect()
                })
                .unwrap_or_default();
            for id in ids {
                ctx.add_item(id);
            }
            Ok(())
        }

        async fn process(
            &self,
            item: &HarvestItem,
            ctx: &HarvestContext<'_>,
        ) -> Result<Dataset, HarvestError> {
            let mut dataset = ctx.get_dataset(&item.remote_id).await?;
            dataset.title = item.remote_id.to_uppercase();
            Ok(dataset)
        }
    }

    fn registry() -> BackendRegistry {
        let mut registry = BackendRegistry::new();
        registry.register("list", ListBackend::boxed).unwrap();
        registry
    }

    #[test]
    fn test_register_duplicate_fails() {
        let mut registry = registry();
        let result = registry.register("list", ListBackend::boxed);
        assert!(matches!(result, Err(HarvestError::Harvest(_))));
    }

    #[test]
    fn test_get_unknown_backend() {
        let result = registry().get("ckan");
        assert!(matches!(result, Err(HarvestError::UnknownBackend(name)) if name == "ckan"));
    }

    #[test]
    fn test_names_and_info() {
        let registry = registry();
        assert_eq!(registry.names(), vec!["list"]);

        let info = serde_json::to_value(registry.info()).unwrap();
        assert_eq!(
            info,
            json!([{
                "id": "list",
                "label": "Static list",
                "filters": [{
                    "label": "Tag",
                    "key": "tag",
                    "type": "string",
                    "description": "Only datasets with this tag",
                }],
                "features": [{
                    "key": "archive",
                    "label": "Archive removed datasets",
                    "description": null,
                    "default": false,
                }],
            }])
        );
    }

    #[tokio::test]
    async fn test_runner_for_source() {
        let source = HarvestSource::new("List", "https://static.example.org", "list")
            .with_config(crate::model::SourceConfig::from_value(json!({"ids": ["a", "b"]})).unwrap());

        let mut runner = registry().runner_for(source, MemoryStore::new()).unwrap();
        let job = runner.harvest().await;

        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(runner.store().count().await.unwrap(), 2);
        assert!(!runner.has_feature("archive").unwrap());
    }

    #[test]
    fn test_runner_for_unknown_backend() {
        let source = HarvestSource::new("Other", "https://other.example.org", "dcat");
        let result = registry().runner_for(source, MemoryStore::new());
        assert!(matches!(result, Err(HarvestError::UnknownBackend(_))));
    }
}
