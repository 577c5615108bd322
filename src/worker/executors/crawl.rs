//! Crawl executor. The HTML crawler itself is an external collaborator;
//! this executor owns payload decoding and the checkpoint discipline.

use std::sync::Arc;

use async_trait::async_trait;

use crate::control::ScanControl;
use crate::db::models::{JobType, Scan, ScanJob};
use crate::error::ExecutorError;
use crate::worker::payloads::CrawlJobData;
use crate::worker::registry::{Executor, JobContext};

/// External crawler collaborator.
#[async_trait]
pub trait Crawler: Send + Sync {
    async fn crawl(
        &self,
        scan: &Scan,
        data: &CrawlJobData,
        ctrl: &ScanControl,
    ) -> Result<(), ExecutorError>;
}

/// Default wiring when no crawler is installed.
pub struct NoopCrawler;

#[async_trait]
impl Crawler for NoopCrawler {
    async fn crawl(
        &self,
        scan: &Scan,
        data: &CrawlJobData,
        _ctrl: &ScanControl,
    ) -> Result<(), ExecutorError> {
        tracing::warn!(
            scan_id = %scan.id,
            start_urls = data.start_urls.len(),
            "No crawler installed; crawl job is a no-op"
        );
        Ok(())
    }
}

pub struct CrawlExecutor {
    crawler: Arc<dyn Crawler>,
}

impl CrawlExecutor {
    pub fn new(crawler: Arc<dyn Crawler>) -> Self {
        Self { crawler }
    }
}

#[async_trait]
impl Executor for CrawlExecutor {
    fn job_type(&self) -> JobType {
        JobType::Crawl
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        let data: CrawlJobData =
            serde_json::from_value(job.payload.clone()).map_err(ExecutorError::Payload)?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        self.crawler.crawl(&ctx.scan, &data, &ctrl).await?;
        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        Ok(())
    }
}
