//! Worker pool: fixed concurrent actors polling the queue and dispatching
//! jobs to executors through the registry.

pub mod executors;
pub mod payloads;
pub mod registry;

pub use registry::{Executor, ExecutorRegistry, JobContext};

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::sync::watch;
use tokio::task::JoinSet;
use uuid::Uuid;

use crate::api::behavior::BehaviorFingerprinter;
use crate::auth::breaker::CircuitBreaker;
use crate::auth::tokens::TokenManager;
use crate::config::{EngineConfig, WorkerConfig};
use crate::control::{AuthPauseHook, ControlRegistry};
use crate::db::Database;
use crate::db::models::{ScanJob, ScanState};
use crate::error::ExecutorError;
use crate::queue::JobQueue;
use crate::scan::ActiveScanner;
use crate::scan::http::ClientPool;
use crate::scan::passive::PassivePipeline;
use crate::smuggling::SmugglingScanner;
use crate::worker::executors::{
    ActiveScanExecutor, ApiBehaviorExecutor, ApiScanExecutor, CrawlExecutor, DiscoveryExecutor,
    NoopCrawler, NoopDiscovery, SiteBehaviorExecutor, WebSocketScanExecutor,
};

/// Pauses the scan control and persists the state when the auth breaker
/// trips.
pub struct ScanPauseHook {
    db: Arc<dyn Database>,
    controls: Arc<ControlRegistry>,
}

impl ScanPauseHook {
    pub fn new(db: Arc<dyn Database>, controls: Arc<ControlRegistry>) -> Self {
        Self { db, controls }
    }
}

#[async_trait]
impl AuthPauseHook for ScanPauseHook {
    async fn on_auth_pause(&self, scan_id: Uuid) {
        if let Some(ctrl) = self.controls.get(scan_id).await {
            ctrl.pause();
        }
        if let Err(e) = self.db.update_scan_state(scan_id, ScanState::Paused).await {
            tracing::error!(%scan_id, "Failed to persist paused scan state: {e}");
        }
    }
}

/// Everything the control surface and binary need to drive the engine.
pub struct Engine {
    pub queue: JobQueue,
    pub controls: Arc<ControlRegistry>,
    pub registry: Arc<ExecutorRegistry>,
    pub pool: WorkerPool,
}

/// Wire the full executor lattice with default collaborators. Crawler,
/// discovery, payload generators, and the interaction oracle are injection
/// seams left empty here.
pub fn build_engine(db: Arc<dyn Database>, config: &EngineConfig) -> Engine {
    let controls = Arc::new(ControlRegistry::new());
    let clients = Arc::new(ClientPool::new());
    let tokens = Arc::new(TokenManager::new());
    let breaker = Arc::new(CircuitBreaker::default());
    let passive = Arc::new(PassivePipeline::new(db.clone()));
    let smuggling = Arc::new(SmugglingScanner::new(db.clone(), config.smuggling.clone()));
    let scanner = Arc::new(ActiveScanner::new(
        db.clone(),
        clients.clone(),
        passive.clone(),
        smuggling.clone(),
    ));
    let fingerprinter = Arc::new(BehaviorFingerprinter::new(db.clone()));
    let pause_hook = Arc::new(ScanPauseHook::new(db.clone(), controls.clone()));

    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(CrawlExecutor::new(Arc::new(NoopCrawler))));
    registry.register(Arc::new(DiscoveryExecutor::new(Arc::new(NoopDiscovery))));
    registry.register(Arc::new(SiteBehaviorExecutor::new(fingerprinter.clone())));
    registry.register(Arc::new(ApiBehaviorExecutor::new(
        db.clone(),
        fingerprinter.clone(),
    )));
    registry.register(Arc::new(ActiveScanExecutor::new(
        db.clone(),
        passive.clone(),
        scanner.clone(),
    )));
    registry.register(Arc::new(WebSocketScanExecutor::new(
        db.clone(),
        passive.clone(),
        Vec::new(),
    )));
    registry.register(Arc::new(ApiScanExecutor::new(
        db.clone(),
        clients.clone(),
        passive.clone(),
        scanner.clone(),
        tokens.clone(),
        breaker.clone(),
        pause_hook,
    )));
    let registry = Arc::new(registry);

    let queue = JobQueue::new(db.clone());
    let pool = WorkerPool::new(
        queue.clone(),
        db,
        controls.clone(),
        registry.clone(),
        config.worker.clone(),
    );

    Engine {
        queue,
        controls,
        registry,
        pool,
    }
}

/// Fixed pool of polling workers.
pub struct WorkerPool {
    queue: JobQueue,
    db: Arc<dyn Database>,
    controls: Arc<ControlRegistry>,
    registry: Arc<ExecutorRegistry>,
    config: WorkerConfig,
    shutdown_tx: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn new(
        queue: JobQueue,
        db: Arc<dyn Database>,
        controls: Arc<ControlRegistry>,
        registry: Arc<ExecutorRegistry>,
        config: WorkerConfig,
    ) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            queue,
            db,
            controls,
            registry,
            config,
            shutdown_tx,
        }
    }

    /// Signal every worker to exit after its current job.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
    }

    pub fn shutdown_sender(&self) -> watch::Sender<bool> {
        self.shutdown_tx.clone()
    }

    /// Run all workers until shutdown.
    pub async fn run(&self) {
        let mut set = JoinSet::new();
        for n in 0..self.config.workers {
            let worker = Worker {
                id: format!("worker-{n}"),
                queue: self.queue.clone(),
                db: self.db.clone(),
                controls: self.controls.clone(),
                registry: self.registry.clone(),
                config: self.config.clone(),
                shutdown: self.shutdown_tx.subscribe(),
            };
            set.spawn(async move { worker.run().await });
        }
        tracing::info!(workers = self.config.workers, "Worker pool started");
        while set.join_next().await.is_some() {}
        tracing::info!("Worker pool stopped");
    }
}

struct Worker {
    id: String,
    queue: JobQueue,
    db: Arc<dyn Database>,
    controls: Arc<ControlRegistry>,
    registry: Arc<ExecutorRegistry>,
    config: WorkerConfig,
    shutdown: watch::Receiver<bool>,
}

impl Worker {
    async fn run(mut self) {
        loop {
            if *self.shutdown.borrow() {
                break;
            }

            let job = match self.queue.claim(&self.id).await {
                Ok(Some(job)) => job,
                Ok(None) => {
                    self.idle().await;
                    continue;
                }
                Err(e) => {
                    tracing::error!(worker = %self.id, "Claim failed: {e}");
                    self.idle().await;
                    continue;
                }
            };

            self.process(job).await;
        }
        tracing::debug!(worker = %self.id, "Worker exited");
    }

    /// Sleep one poll interval, waking early on shutdown.
    async fn idle(&mut self) {
        tokio::select! {
            _ = tokio::time::sleep(self.config.poll_interval) => {}
            _ = self.shutdown.changed() => {}
        }
    }

    async fn process(&self, job: ScanJob) {
        let job_id = job.id;

        let scan = match self.db.get_scan(job.scan_id).await {
            Ok(scan) => scan,
            Err(e) => {
                self.finish_fail(job_id, "scan_not_found", &e.to_string()).await;
                return;
            }
        };

        let Some(ctrl) = self.controls.get(scan.id).await else {
            self.finish_fail(job_id, "scan_not_found", "no control registered for scan")
                .await;
            return;
        };

        if ctrl.state() == crate::control::ControlState::Cancelled {
            if let Err(e) = self.queue.cancel(job_id).await {
                tracing::error!(%job_id, "Cancel failed: {e}");
            }
            return;
        }

        let Some(executor) = self.registry.get(job.job_type) else {
            self.finish_fail(
                job_id,
                "no_executor",
                &format!("no executor for {}", job.job_type.as_str()),
            )
            .await;
            return;
        };

        let ctx = JobContext {
            scan,
            shutdown: self.shutdown.clone(),
        };

        tracing::info!(
            worker = %self.id,
            %job_id,
            job_type = job.job_type.as_str(),
            "Executing job"
        );
        let started = Instant::now();

        // The job scope: executor future, scan cancellation, worker
        // shutdown. Any of them ending terminates the job.
        let mut shutdown = self.shutdown.clone();
        let result = tokio::select! {
            result = executor.execute(&ctx, &job, ctrl.clone()) => result,
            _ = ctrl.cancelled() => Err(ExecutorError::Cancelled),
            _ = wait_for_shutdown(&mut shutdown) => Err(ExecutorError::Cancelled),
        };
        let elapsed = started.elapsed();

        match result {
            Ok(()) => {
                tracing::info!(%job_id, ?elapsed, "Job done");
                if let Err(e) = self.queue.complete(job_id).await {
                    tracing::error!(%job_id, "Complete failed: {e}");
                }
            }
            Err(ExecutorError::Cancelled) => {
                tracing::info!(%job_id, ?elapsed, "Job cancelled");
                if let Err(e) = self.queue.cancel(job_id).await {
                    tracing::error!(%job_id, "Cancel failed: {e}");
                }
            }
            Err(e) => {
                tracing::warn!(%job_id, ?elapsed, "Job failed: {e}");
                self.finish_fail(job_id, e.error_type(), &e.to_string()).await;
            }
        }
    }

    async fn finish_fail(&self, job_id: Uuid, error_type: &str, message: &str) {
        if let Err(e) = self.queue.fail(job_id, error_type, message).await {
            tracing::error!(%job_id, "Fail transition failed: {e}");
        }
    }
}

async fn wait_for_shutdown(rx: &mut watch::Receiver<bool>) {
    loop {
        if *rx.borrow() {
            return;
        }
        if rx.changed().await.is_err() {
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ScanControl;
    use crate::db::memory::MemoryStore;
    use crate::db::models::{JobState, JobType, Scan, ScanMode};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    struct RecordingExecutor {
        job_type: JobType,
        runs: Arc<AtomicU32>,
        outcome: Result<(), &'static str>,
    }

    #[async_trait]
    impl Executor for RecordingExecutor {
        fn job_type(&self) -> JobType {
            self.job_type
        }

        async fn execute(
            &self,
            _ctx: &JobContext,
            _job: &ScanJob,
            _ctrl: Arc<ScanControl>,
        ) -> Result<(), ExecutorError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            match self.outcome {
                Ok(()) => Ok(()),
                Err(message) => Err(ExecutorError::Execution(message.to_string())),
            }
        }
    }

    async fn harness(
        executor: Option<Arc<dyn Executor>>,
    ) -> (Arc<MemoryStore>, Arc<ControlRegistry>, WorkerPool, Scan) {
        let db = Arc::new(MemoryStore::new());
        let controls = Arc::new(ControlRegistry::new());
        let mut registry = ExecutorRegistry::new();
        if let Some(executor) = executor {
            registry.register(executor);
        }
        let queue = JobQueue::new(db.clone());
        let pool = WorkerPool::new(
            queue,
            db.clone(),
            controls.clone(),
            Arc::new(registry),
            WorkerConfig {
                workers: 2,
                poll_interval: Duration::from_millis(10),
            },
        );

        let scan = Scan::new(Uuid::new_v4(), "http://example.com", ScanMode::Smart);
        db.create_scan(&scan).await.unwrap();
        controls.register(scan.id).await;
        (db, controls, pool, scan)
    }

    async fn wait_for_state(db: &MemoryStore, job_id: Uuid, expected: JobState) -> ScanJob {
        for _ in 0..100 {
            let job = db.get_job(job_id).await.unwrap();
            if job.state == expected {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job never reached {expected:?}");
    }

    #[tokio::test]
    async fn test_pool_runs_job_to_done() {
        let runs = Arc::new(AtomicU32::new(0));
        let executor = Arc::new(RecordingExecutor {
            job_type: JobType::Crawl,
            runs: runs.clone(),
            outcome: Ok(()),
        });
        let (db, _controls, pool, scan) = harness(Some(executor)).await;
        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue(scan.id, JobType::Crawl, serde_json::json!({}))
            .await
            .unwrap();

        let pool = Arc::new(pool);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };

        let finished = wait_for_state(&db, job.id, JobState::Done).await;
        assert!(finished.finished_at.is_some());
        assert_eq!(runs.load(Ordering::SeqCst), 1);

        pool.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_executor_error_fails_job_with_type() {
        let executor = Arc::new(RecordingExecutor {
            job_type: JobType::Crawl,
            runs: Arc::new(AtomicU32::new(0)),
            outcome: Err("boom"),
        });
        let (db, _controls, pool, scan) = harness(Some(executor)).await;
        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue(scan.id, JobType::Crawl, serde_json::json!({}))
            .await
            .unwrap();

        let pool = Arc::new(pool);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };

        let failed = wait_for_state(&db, job.id, JobState::Failed).await;
        assert_eq!(failed.error_type.as_deref(), Some("execution_error"));
        assert_eq!(failed.error_message.as_deref(), Some("Execution error: boom"));

        pool.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_executor_fails_job() {
        let (db, _controls, pool, scan) = harness(None).await;
        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue(scan.id, JobType::Nuclei, serde_json::json!({}))
            .await
            .unwrap();

        let pool = Arc::new(pool);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };

        let failed = wait_for_state(&db, job.id, JobState::Failed).await;
        assert_eq!(failed.error_type.as_deref(), Some("no_executor"));

        pool.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_missing_control_fails_job_as_scan_not_found() {
        let runs = Arc::new(AtomicU32::new(0));
        let executor = Arc::new(RecordingExecutor {
            job_type: JobType::Crawl,
            runs: runs.clone(),
            outcome: Ok(()),
        });
        let (db, controls, pool, scan) = harness(Some(executor)).await;
        controls.remove(scan.id).await;

        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue(scan.id, JobType::Crawl, serde_json::json!({}))
            .await
            .unwrap();

        let pool = Arc::new(pool);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };

        let failed = wait_for_state(&db, job.id, JobState::Failed).await;
        assert_eq!(failed.error_type.as_deref(), Some("scan_not_found"));
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        pool.shutdown();
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_control_cancels_job_before_execution() {
        let runs = Arc::new(AtomicU32::new(0));
        let executor = Arc::new(RecordingExecutor {
            job_type: JobType::Crawl,
            runs: runs.clone(),
            outcome: Ok(()),
        });
        let (db, controls, pool, scan) = harness(Some(executor)).await;
        controls.get(scan.id).await.unwrap().cancel();

        let queue = JobQueue::new(db.clone());
        let job = queue
            .enqueue(scan.id, JobType::Crawl, serde_json::json!({}))
            .await
            .unwrap();

        let pool = Arc::new(pool);
        let runner = {
            let pool = pool.clone();
            tokio::spawn(async move { pool.run().await })
        };

        wait_for_state(&db, job.id, JobState::Cancelled).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        pool.shutdown();
        runner.await.unwrap();
    }
}
