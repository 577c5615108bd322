//! API behavior executor: baseline fingerprints for one definition.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::behavior::BehaviorFingerprinter;
use crate::control::ScanControl;
use crate::db::Database;
use crate::db::models::{JobType, ScanJob};
use crate::error::ExecutorError;
use crate::worker::payloads::ApiBehaviorJobData;
use crate::worker::registry::{Executor, JobContext};

pub struct ApiBehaviorExecutor {
    db: Arc<dyn Database>,
    fingerprinter: Arc<BehaviorFingerprinter>,
}

impl ApiBehaviorExecutor {
    pub fn new(db: Arc<dyn Database>, fingerprinter: Arc<BehaviorFingerprinter>) -> Self {
        Self { db, fingerprinter }
    }
}

#[async_trait]
impl Executor for ApiBehaviorExecutor {
    fn job_type(&self) -> JobType {
        JobType::ApiBehavior
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        let data: ApiBehaviorJobData =
            serde_json::from_value(job.payload.clone()).map_err(ExecutorError::Payload)?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        let definition = self.db.get_api_definition(data.definition_id).await?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        let headers = data.headers.unwrap_or_default();
        let results = self
            .fingerprinter
            .fingerprint_api(&ctx.scan, Some(job.id), &definition, &headers, data.concurrency)
            .await?;
        tracing::info!(
            scan_id = %ctx.scan.id,
            definition_id = %definition.id,
            classes = results.len(),
            "API behavior captured"
        );

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }
}
