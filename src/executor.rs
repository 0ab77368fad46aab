use crate::harvest::{Backend, BaseBackend, HarvestError};
use crate::model::HarvestJob;
use crate::traits::{DatasetStore, JobStore};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, instrument};

/// Runs harvests with a bound on how many execute at once.
pub struct HarvesterExecutor {
    semaphore: Arc<Semaphore>,
}

impl HarvesterExecutor {
    pub fn new(concurrency_limit: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
        }
    }

    #[instrument(skip(self, runner), fields(source = %runner.source().name))]
    pub async fn execute<B, S>(
        &self,
        runner: &mut BaseBackend<B, S>,
    ) -> Result<HarvestJob, HarvestError>
    where
        B: Backend,
        S: DatasetStore + JobStore,
    {
        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|e| HarvestError::Executor(format!("Semaphore error: {}", e)))?;

        info!("Starting harvest for backend: {}", runner.backend().name());

        let job = runner.harvest().await;

        info!("Finished harvest for backend: {}", runner.backend().name());
        Ok(job)
    }

    /// Runs every harvest concurrently, within the concurrency limit.
    ///
    /// Jobs are returned in the order of `runners`.
    pub async fn execute_all<B, S>(
        &self,
        runners: Vec<BaseBackend<B, S>>,
    ) -> Result<Vec<HarvestJob>, HarvestError>
    where
        B: Backend + 'static,
        S: DatasetStore + JobStore + 'static,
    {
        let total = runners.len();
        let mut tasks = JoinSet::new();

        for (index, mut runner) in runners.into_iter().enumerate() {
            let semaphore = Arc::clone(&self.semaphore);
            tasks.spawn(async move {
                let _permit = semaphore
                    .acquire_owned()
                    .await
                    .map_err(|e| HarvestError::Executor(format!("Semaphore error: {}", e)))?;
                info!("Starting harvest for backend: {}", runner.backend().name());
                let job = runner.harvest().await;
                Ok::<_, HarvestError>((index, job))
            });
        }

        let mut jobs: Vec<Option<HarvestJob>> = vec![None; total];
        while let Some(joined) = tasks.join_next().await {
            let (index, job) = joined
                .map_err(|e| HarvestError::Executor(format!("Task join error: {}", e)))??;
            jobs[index] = Some(job);
        }

        info!(jobs = total, "Finished concurrent harvests");
        Ok(jobs.into_iter().flatten().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::harvest::HarvestContext;
    use crate::model::{Dataset, HarvestItem, HarvestSource, JobStatus};
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Gauge {
        current: AtomicUsize,
        peak: AtomicUsize,
    }

    struct SlowBackend {
        gauge: Arc<Gauge>,
    }

    #[async_trait]
    impl Backend for SlowBackend {
        fn name(&self) -> &str {
            "slow"
        }

        async fn initialize(&self, ctx: &mut HarvestContext<'_>) -> Result<(), HarvestError> {
            ctx.add_item("only");
            Ok(())
        }

        async fn process(
            &self,
            item: &HarvestItem,
            ctx: &HarvestContext<'_>,
        ) -> Result<Dataset, HarvestError> {
            let mut dataset = ctx.get_dataset(&item.remote_id).await?;

            let running = self.gauge.current.fetch_add(1, Ordering::SeqCst) + 1;
            self.gauge.peak.fetch_max(running, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            self.gauge.current.fetch_sub(1, Ordering::SeqCst);

            dataset.title = format!("{} from {}", item.remote_id, ctx.source().name);
            Ok(dataset)
        }
    }

    fn runner(
        name: &str,
        gauge: &Arc<Gauge>,
        store: &MemoryStore,
    ) -> BaseBackend<SlowBackend, MemoryStore> {
        let source = HarvestSource::new(name, format!("https://{}.example.org", name), "slow");
        runner_on(source, gauge, store)
    }

    fn runner_on(
        source: HarvestSource,
        gauge: &Arc<Gauge>,
        store: &MemoryStore,
    ) -> BaseBackend<SlowBackend, MemoryStore> {
        BaseBackend::new(
            SlowBackend {
                gauge: Arc::clone(gauge),
            },
            source,
            store.clone(),
        )
    }

    #[tokio::test]
    async fn test_execute_single_harvest() {
        let executor = HarvesterExecutor::new(1);
        let gauge = Arc::new(Gauge::default());
        let store = MemoryStore::new();
        let mut runner = runner("alpha", &gauge, &store);

        let job = executor.execute(&mut runner).await.unwrap();

        assert_eq!(job.status, JobStatus::Done);
        assert_eq!(store.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_execute_all_respects_limit_and_order() {
        let executor = HarvesterExecutor::new(2);
        let gauge = Arc::new(Gauge::default());
        let store = MemoryStore::new();
        let names = ["alpha", "beta", "gamma", "delta", "epsilon"];
        let runners: Vec<_> = names.iter().map(|n| runner(n, &gauge, &store)).collect();
        let source_ids: Vec<_> = runners.iter().map(|r| r.source().id).collect();

        let jobs = executor.execute_all(runners).await.unwrap();

        assert_eq!(jobs.len(), names.len());
        assert_eq!(jobs.iter().map(|j| j.source_id).collect::<Vec<_>>(), source_ids);
        assert!(jobs.iter().all(|j| j.status == JobStatus::Done));
        assert!(gauge.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(store.count().await.unwrap(), names.len());
    }

    #[tokio::test]
    async fn test_execute_all_same_source_keeps_one_dataset() {
        let executor = HarvesterExecutor::new(2);
        let gauge = Arc::new(Gauge::default());
        let store = MemoryStore::new();
        let source = HarvestSource::new("alpha", "https://alpha.example.org", "slow");
        let runners = vec![
            runner_on(source.clone(), &gauge, &store),
            runner_on(source, &gauge, &store),
        ];

        let jobs = executor.execute_all(runners).await.unwrap();

        assert!(jobs.iter().all(|j| j.status == JobStatus::Done));
        assert_eq!(gauge.peak.load(Ordering::SeqCst), 2);
        assert_eq!(store.count().await.unwrap(), 1);
        assert_eq!(jobs[0].items[0].dataset, jobs[1].items[0].dataset);
    }
}
