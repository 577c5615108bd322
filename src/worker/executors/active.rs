//! Active scan executor: runs the audit dispatch for one history record.

use std::sync::Arc;

use async_trait::async_trait;

use crate::control::ScanControl;
use crate::db::Database;
use crate::db::models::{JobType, ScanJob};
use crate::error::ExecutorError;
use crate::scan::passive::PassivePipeline;
use crate::scan::{ActiveScanOptions, ActiveScanner};
use crate::worker::payloads::ActiveScanJobData;
use crate::worker::registry::{Executor, JobContext};

pub struct ActiveScanExecutor {
    db: Arc<dyn Database>,
    passive: Arc<PassivePipeline>,
    scanner: Arc<ActiveScanner>,
}

impl ActiveScanExecutor {
    pub fn new(
        db: Arc<dyn Database>,
        passive: Arc<PassivePipeline>,
        scanner: Arc<ActiveScanner>,
    ) -> Self {
        Self {
            db,
            passive,
            scanner,
        }
    }
}

#[async_trait]
impl Executor for ActiveScanExecutor {
    fn job_type(&self) -> JobType {
        JobType::ActiveScan
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        let data: ActiveScanJobData =
            serde_json::from_value(job.payload.clone()).map_err(ExecutorError::Payload)?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        let mut history = self.db.get_history(data.history_id).await?;
        // Findings from this job are attributed to it.
        history.scan_job_id = Some(job.id);

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        if data.audit_categories.passive {
            let issues = self.passive.scan_history_item(&ctx.scan, &history).await?;
            tracing::debug!(
                history_id = %history.id,
                issues = issues.len(),
                "Passive pipeline finished"
            );
        }

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        let options = ActiveScanOptions {
            mode: data.mode,
            categories: data.audit_categories,
            insertion_points: data.insertion_points,
            max_retries: data.max_retries,
        };
        let issues = self
            .scanner
            .scan_history(&ctx.scan, job, &history, &options, &ctrl, &ctx.shutdown)
            .await?;
        tracing::info!(
            history_id = %history.id,
            issues,
            "Active scan finished"
        );

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }
}
