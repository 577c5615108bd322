//! Executor trait and the job-type registry resolved at startup.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::control::ScanControl;
use crate::db::models::{JobType, Scan, ScanJob};
use crate::error::ExecutorError;

/// Per-job context handed to executors.
#[derive(Clone)]
pub struct JobContext {
    pub scan: Scan,
    /// Worker shutdown signal, observed at every checkpoint.
    pub shutdown: watch::Receiver<bool>,
}

/// One executor per job type: one method plus metadata.
#[async_trait]
pub trait Executor: Send + Sync {
    fn job_type(&self) -> JobType;

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError>;
}

/// Maps job types to executors. Built once at startup.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<JobType, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        let job_type = executor.job_type();
        if self.executors.insert(job_type, executor).is_some() {
            tracing::warn!(job_type = job_type.as_str(), "Executor replaced in registry");
        }
    }

    pub fn get(&self, job_type: JobType) -> Option<Arc<dyn Executor>> {
        self.executors.get(&job_type).cloned()
    }

    pub fn registered_types(&self) -> Vec<JobType> {
        self.executors.keys().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeExecutor(JobType);

    #[async_trait]
    impl Executor for FakeExecutor {
        fn job_type(&self) -> JobType {
            self.0
        }

        async fn execute(
            &self,
            _ctx: &JobContext,
            _job: &ScanJob,
            _ctrl: Arc<ScanControl>,
        ) -> Result<(), ExecutorError> {
            Ok(())
        }
    }

    #[test]
    fn test_register_and_resolve() {
        let mut registry = ExecutorRegistry::new();
        registry.register(Arc::new(FakeExecutor(JobType::Crawl)));
        registry.register(Arc::new(FakeExecutor(JobType::ApiScan)));

        assert!(registry.get(JobType::Crawl).is_some());
        assert!(registry.get(JobType::ApiScan).is_some());
        assert!(registry.get(JobType::Nuclei).is_none());
    }
}
