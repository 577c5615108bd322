//! Discovery executor. Endpoint/definition discovery is an external
//! collaborator behind [`DiscoveryRunner`].

use std::sync::Arc;

use async_trait::async_trait;

use crate::control::ScanControl;
use crate::db::models::{JobType, Scan, ScanJob};
use crate::error::ExecutorError;
use crate::worker::payloads::DiscoveryJobData;
use crate::worker::registry::{Executor, JobContext};

#[async_trait]
pub trait DiscoveryRunner: Send + Sync {
    async fn discover(
        &self,
        scan: &Scan,
        data: &DiscoveryJobData,
        ctrl: &ScanControl,
    ) -> Result<(), ExecutorError>;
}

/// Default wiring when no discovery module is installed.
pub struct NoopDiscovery;

#[async_trait]
impl DiscoveryRunner for NoopDiscovery {
    async fn discover(
        &self,
        scan: &Scan,
        data: &DiscoveryJobData,
        _ctrl: &ScanControl,
    ) -> Result<(), ExecutorError> {
        tracing::warn!(
            scan_id = %scan.id,
            module = ?data.module,
            "No discovery runner installed; discovery job is a no-op"
        );
        Ok(())
    }
}

pub struct DiscoveryExecutor {
    runner: Arc<dyn DiscoveryRunner>,
}

impl DiscoveryExecutor {
    pub fn new(runner: Arc<dyn DiscoveryRunner>) -> Self {
        Self { runner }
    }
}

#[async_trait]
impl Executor for DiscoveryExecutor {
    fn job_type(&self) -> JobType {
        JobType::Discovery
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        let data: DiscoveryJobData =
            serde_json::from_value(job.payload.clone()).map_err(ExecutorError::Payload)?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        self.runner.discover(&ctx.scan, &data, &ctrl).await?;
        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }
}
