//! Site behavior executor: not-found baseline for a plain site target.

use std::sync::Arc;

use async_trait::async_trait;

use crate::api::behavior::BehaviorFingerprinter;
use crate::control::ScanControl;
use crate::db::models::{JobType, ScanJob};
use crate::error::ExecutorError;
use crate::worker::payloads::SiteBehaviorJobData;
use crate::worker::registry::{Executor, JobContext};

pub struct SiteBehaviorExecutor {
    fingerprinter: Arc<BehaviorFingerprinter>,
}

impl SiteBehaviorExecutor {
    pub fn new(fingerprinter: Arc<BehaviorFingerprinter>) -> Self {
        Self { fingerprinter }
    }
}

#[async_trait]
impl Executor for SiteBehaviorExecutor {
    fn job_type(&self) -> JobType {
        JobType::SiteBehavior
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        let data: SiteBehaviorJobData =
            serde_json::from_value(job.payload.clone()).map_err(ExecutorError::Payload)?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        let headers = data.headers.unwrap_or_default();
        let result = self
            .fingerprinter
            .fingerprint_site(
                &ctx.scan,
                Some(job.id),
                &data.base_url,
                &headers,
                data.concurrency,
            )
            .await?;
        tracing::info!(
            scan_id = %ctx.scan.id,
            base_url = %data.base_url,
            samples = result.not_found_samples.len(),
            "Site behavior captured"
        );

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }
}
