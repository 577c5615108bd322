//! End-to-end engine tests: queue, workers, executors, and control plane
//! against local HTTP targets and the in-memory store.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::{HeaderMap, StatusCode};
use axum::routing::get;
use uuid::Uuid;

use caracal::config::{EngineConfig, WorkerConfig};
use caracal::control::{ControlRegistry, ControlState, ScanControl};
use caracal::db::Database;
use caracal::db::memory::MemoryStore;
use caracal::db::models::{
    ApiAuthConfig, ApiDefinition, ApiDefinitionKind, ApiEndpoint, AuthKind, JobState, JobType,
    Scan, ScanJob, ScanMode, ScanState,
};
use caracal::error::ExecutorError;
use caracal::queue::JobQueue;
use caracal::worker::payloads::ApiScanJobData;
use caracal::worker::registry::{Executor, ExecutorRegistry, JobContext};
use caracal::worker::{WorkerPool, build_engine};

fn api_scan_payload(
    definition_id: Uuid,
    endpoint_id: Uuid,
    api_scan_id: Uuid,
    scheme_auth_map: Option<HashMap<String, Uuid>>,
) -> serde_json::Value {
    serde_json::to_value(ApiScanJobData {
        definition_id,
        endpoint_id,
        api_scan_id,
        mode: ScanMode::Smart,
        audit_categories: Default::default(),
        run_api_specific_tests: false,
        run_standard_tests: false,
        run_schema_tests: false,
        auth_config_id: None,
        scheme_auth_map,
        fingerprint_tags: Vec::new(),
        max_retries: 0,
    })
    .unwrap()
}

fn petstore_definition(base_url: String) -> ApiDefinition {
    let raw = serde_json::to_vec(&serde_json::json!({
        "openapi": "3.0.0",
        "paths": {
            "/pets/{petId}": {
                "get": {
                    "operationId": "getPet",
                    "parameters": [
                        {"name": "petId", "in": "path", "required": true,
                         "schema": {"type": "integer"}}
                    ],
                    "security": [{"api_key": []}]
                }
            }
        }
    }))
    .unwrap();
    ApiDefinition {
        id: Uuid::new_v4(),
        workspace_id: Uuid::new_v4(),
        kind: ApiDefinitionKind::OpenApi,
        base_url,
        source_url: String::new(),
        raw,
        target_namespace: None,
    }
}

fn bearer_config(token: &str) -> ApiAuthConfig {
    ApiAuthConfig {
        id: Uuid::new_v4(),
        kind: AuthKind::Bearer,
        username: None,
        password: None,
        token: Some(token.to_string().into()),
        prefix: None,
        key_name: None,
        key_location: None,
        custom_headers: Vec::new(),
        refresh: None,
    }
}

async fn wait_for_job(db: &MemoryStore, job_id: Uuid, expected: JobState) -> ScanJob {
    for _ in 0..300 {
        let job = db.get_job(job_id).await.unwrap();
        if job.state == expected {
            return job;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("job never reached {expected:?}");
}

#[tokio::test]
async fn test_api_scan_carries_mapped_credential() {
    // The target requires a bearer token on /pets/{petId}.
    let app = axum::Router::new().route(
        "/pets/{id}",
        get(|headers: HeaderMap| async move {
            match headers.get("authorization").and_then(|v| v.to_str().ok()) {
                Some("Bearer tok-123") => (StatusCode::OK, "{\"id\": 1}"),
                _ => (StatusCode::UNAUTHORIZED, "{}"),
            }
        }),
    );
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let db = Arc::new(MemoryStore::new());
    let definition = petstore_definition(format!("http://{addr}"));
    let endpoint = ApiEndpoint {
        id: Uuid::new_v4(),
        definition_id: definition.id,
        method: "GET".to_string(),
        path: "/pets/{petId}".to_string(),
        operation_id: Some("getPet".to_string()),
        soap_action: None,
        variations: Vec::new(),
    };
    let auth = bearer_config("tok-123");
    let mut scheme_map = HashMap::new();
    scheme_map.insert("api_key".to_string(), auth.id);

    db.insert_api_definition(definition.clone()).await;
    db.insert_api_endpoint(endpoint.clone()).await;
    db.insert_auth_config(auth).await;

    let mut config = EngineConfig::default();
    config.worker.workers = 1;
    config.worker.poll_interval = Duration::from_millis(10);
    let engine = build_engine(db.clone(), &config);

    let scan = Scan::new(Uuid::new_v4(), format!("http://{addr}"), ScanMode::Smart);
    db.create_scan(&scan).await.unwrap();
    engine.controls.register(scan.id).await;

    let api_scan_id = Uuid::new_v4();
    let job = engine
        .queue
        .enqueue(
            scan.id,
            JobType::ApiScan,
            api_scan_payload(definition.id, endpoint.id, api_scan_id, Some(scheme_map)),
        )
        .await
        .unwrap();

    let pool = Arc::new(engine.pool);
    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run().await })
    };

    wait_for_job(&db, job.id, JobState::Done).await;
    pool.shutdown();
    runner.await.unwrap();

    // The outbound request carried the mapped credential and succeeded.
    let histories = db.histories().await;
    let base = histories
        .iter()
        .find(|h| h.url.contains("/pets/1"))
        .expect("base request history");
    assert_eq!(base.status_code, 200);
    let raw = String::from_utf8_lossy(&base.request_raw);
    assert!(raw.contains("Authorization: Bearer tok-123"));

    // Progress accounting ran.
    assert_eq!(db.api_scan_progress(api_scan_id).await, 1);
}

#[tokio::test]
async fn test_repeated_auth_failures_pause_scan_without_failing_jobs() {
    // Every request is rejected; ten consecutive 401s must pause the scan.
    let app = axum::Router::new().fallback(axum::routing::any(|| async {
        (StatusCode::UNAUTHORIZED, "{}")
    }));
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let db = Arc::new(MemoryStore::new());
    let definition = petstore_definition(format!("http://{addr}"));
    let endpoint = ApiEndpoint {
        id: Uuid::new_v4(),
        definition_id: definition.id,
        method: "GET".to_string(),
        path: "/pets/{petId}".to_string(),
        operation_id: Some("getPet".to_string()),
        soap_action: None,
        variations: Vec::new(),
    };
    let auth = bearer_config("wrong-token");
    let mut scheme_map = HashMap::new();
    scheme_map.insert("api_key".to_string(), auth.id);

    db.insert_api_definition(definition.clone()).await;
    db.insert_api_endpoint(endpoint.clone()).await;
    db.insert_auth_config(auth.clone()).await;

    let mut config = EngineConfig::default();
    config.worker.workers = 1;
    config.worker.poll_interval = Duration::from_millis(10);
    let engine = build_engine(db.clone(), &config);

    let scan = Scan::new(Uuid::new_v4(), format!("http://{addr}"), ScanMode::Smart)
        .with_pause_on_auth_failure(true);
    db.create_scan(&scan).await.unwrap();
    engine.controls.register(scan.id).await;

    // Ten api-scan jobs produce ten consecutive 401s against one host.
    let mut jobs = Vec::new();
    for _ in 0..10 {
        let job = engine
            .queue
            .enqueue(
                scan.id,
                JobType::ApiScan,
                api_scan_payload(
                    definition.id,
                    endpoint.id,
                    Uuid::new_v4(),
                    Some(scheme_map.clone()),
                ),
            )
            .await
            .unwrap();
        jobs.push(job);
    }

    let pool = Arc::new(engine.pool);
    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run().await })
    };

    for job in &jobs {
        wait_for_job(&db, job.id, JobState::Done).await;
    }
    pool.shutdown();
    runner.await.unwrap();

    // The breaker pause hook fired: scan paused, no job failed, no issue
    // opened.
    assert_eq!(db.get_scan(scan.id).await.unwrap().state, ScanState::Paused);
    assert_eq!(
        engine.controls.get(scan.id).await.unwrap().state(),
        ControlState::Paused
    );
    assert!(db.issues().await.is_empty());
}

/// Two-phase executor used to observe checkpoint blocking.
struct PhasedExecutor {
    phases: Arc<AtomicU32>,
}

#[async_trait]
impl Executor for PhasedExecutor {
    fn job_type(&self) -> JobType {
        JobType::Crawl
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        _job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        self.phases.fetch_add(1, Ordering::SeqCst);
        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        self.phases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[tokio::test]
async fn test_pause_blocks_executor_and_resume_continues_it() {
    let db = Arc::new(MemoryStore::new());
    let controls = Arc::new(ControlRegistry::new());
    let phases = Arc::new(AtomicU32::new(0));

    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(PhasedExecutor {
        phases: phases.clone(),
    }));

    let queue = JobQueue::new(db.clone());
    let pool = Arc::new(WorkerPool::new(
        queue.clone(),
        db.clone(),
        controls.clone(),
        Arc::new(registry),
        WorkerConfig {
            workers: 1,
            poll_interval: Duration::from_millis(10),
        },
    ));

    let scan = Scan::new(Uuid::new_v4(), "http://example.com", ScanMode::Smart);
    db.create_scan(&scan).await.unwrap();
    let ctrl = controls.register(scan.id).await;

    // Pause before the job starts: phase one runs, the checkpoint blocks.
    ctrl.pause();
    let job = queue
        .enqueue(scan.id, JobType::Crawl, serde_json::json!({}))
        .await
        .unwrap();

    let runner = {
        let pool = pool.clone();
        tokio::spawn(async move { pool.run().await })
    };

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(phases.load(Ordering::SeqCst), 1, "checkpoint should block");
    assert_eq!(
        db.get_job(job.id).await.unwrap().state,
        JobState::Running,
        "paused job stays running, not failed"
    );

    // Resume: the executor continues from the same checkpoint, without
    // re-running phase one.
    ctrl.resume();
    wait_for_job(&db, job.id, JobState::Done).await;
    assert_eq!(phases.load(Ordering::SeqCst), 2);

    pool.shutdown();
    runner.await.unwrap();
}
