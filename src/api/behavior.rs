//! Baseline behavior fingerprinting.
//!
//! Before testing an API, the engine probes how the target answers requests
//! that are definitely wrong: unknown paths, missing credentials, bogus
//! content types, and broken bodies. Later checks compare responses against
//! these fingerprints and refuse to report anything that merely looks like a
//! baseline.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::StreamExt;
use futures::stream;
use rand::Rng;
use rand::distributions::Alphanumeric;
use uuid::Uuid;

use crate::api::request::SynthesizedRequest;
use crate::api::wsdl;
use crate::db::Database;
use crate::db::models::{
    ApiBehaviorResult, ApiDefinition, ApiDefinitionKind, BaselineClass, Fingerprint, Scan,
    ScanOptions, SiteBehaviorResult,
};
use crate::error::ExecutorError;
use crate::scan::http::{build_client, execute_and_record};

/// Default bounded concurrency for probe batches.
pub const DEFAULT_PROBE_CONCURRENCY: usize = 5;

/// Per-probe timeout; baselines should be cheap.
const PROBE_TIMEOUT_SECS: u64 = 5;

/// Captures baseline response fingerprints per scan and definition.
pub struct BehaviorFingerprinter {
    db: Arc<dyn Database>,
    concurrency: usize,
}

impl BehaviorFingerprinter {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            db,
            concurrency: DEFAULT_PROBE_CONCURRENCY,
        }
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Probe all four baseline classes for an API definition and store the
    /// deduplicated fingerprint sets.
    pub async fn fingerprint_api(
        &self,
        scan: &Scan,
        job_id: Option<Uuid>,
        definition: &ApiDefinition,
        extra_headers: &[(String, String)],
        concurrency: Option<usize>,
    ) -> Result<Vec<ApiBehaviorResult>, ExecutorError> {
        let client = probe_client(scan);
        let concurrency = concurrency.unwrap_or(self.concurrency).max(1);
        let mut results = Vec::new();

        for class in BaselineClass::ALL {
            let mut probes = probes_for(class, definition);
            for probe in &mut probes {
                for (name, value) in extra_headers {
                    probe.set_header(name, value.clone());
                }
            }

            let fingerprints: Vec<Fingerprint> = stream::iter(probes)
                .map(|probe| {
                    let client = client.clone();
                    let db = self.db.clone();
                    async move {
                        match execute_and_record(db.as_ref(), &client, scan, job_id, None, &probe)
                            .await
                        {
                            Ok(executed) => Some(Fingerprint::of_response(
                                executed.status,
                                &executed.body,
                                &executed.content_type,
                            )),
                            Err(e) => {
                                tracing::debug!(url = %probe.url, "Baseline probe failed: {e}");
                                None
                            }
                        }
                    }
                })
                .buffer_unordered(concurrency)
                .filter_map(|fp| async move { fp })
                .collect()
                .await;

            let result = ApiBehaviorResult {
                id: Uuid::new_v4(),
                scan_id: scan.id,
                definition_id: definition.id,
                class,
                fingerprints: Fingerprint::dedup(fingerprints),
                created_at: Utc::now(),
            };
            self.db.create_api_behavior_result(&result).await?;
            tracing::debug!(
                class = class.as_str(),
                fingerprints = result.fingerprints.len(),
                "Stored API behavior baseline"
            );
            results.push(result);
        }

        Ok(results)
    }

    /// Probe not-found behavior for a plain site target.
    pub async fn fingerprint_site(
        &self,
        scan: &Scan,
        job_id: Option<Uuid>,
        base_url: &str,
        extra_headers: &[(String, String)],
        concurrency: Option<usize>,
    ) -> Result<SiteBehaviorResult, ExecutorError> {
        let client = probe_client(scan);
        let concurrency = concurrency.unwrap_or(self.concurrency).max(1);
        let base = base_url.trim_end_matches('/');

        let mut probes: Vec<SynthesizedRequest> = (0..6)
            .map(|_| {
                SynthesizedRequest::new(
                    "GET",
                    format!("{base}/caracal-nonexistent-{}", random_token(12)),
                )
            })
            .collect();
        for probe in &mut probes {
            for (name, value) in extra_headers {
                probe.set_header(name, value.clone());
            }
        }

        let fingerprints: Vec<Fingerprint> = stream::iter(probes)
            .map(|probe| {
                let client = client.clone();
                let db = self.db.clone();
                async move {
                    match execute_and_record(db.as_ref(), &client, scan, job_id, None, &probe).await
                    {
                        Ok(executed) => Some(Fingerprint::of_response(
                            executed.status,
                            &executed.body,
                            &executed.content_type,
                        )),
                        Err(e) => {
                            tracing::debug!(url = %probe.url, "Not-found probe failed: {e}");
                            None
                        }
                    }
                }
            })
            .buffer_unordered(concurrency)
            .filter_map(|fp| async move { fp })
            .collect()
            .await;

        let result = SiteBehaviorResult {
            id: Uuid::new_v4(),
            scan_id: scan.id,
            base_url: base_url.to_string(),
            not_found_samples: Vec::new(),
            created_at: Utc::now(),
        };
        self.db.create_site_behavior_result(&result).await?;
        for fingerprint in Fingerprint::dedup(fingerprints) {
            self.db
                .create_site_behavior_not_found_sample(result.id, &fingerprint)
                .await?;
        }
        self.db
            .get_site_behavior_for_scan(scan.id)
            .await?
            .ok_or_else(|| ExecutorError::Execution("site behavior result vanished".to_string()))
    }
}

/// Flatten stored baselines for suppression checks.
pub fn all_fingerprints(results: &[ApiBehaviorResult]) -> Vec<Fingerprint> {
    results
        .iter()
        .flat_map(|r| r.fingerprints.iter().cloned())
        .collect()
}

fn probe_client(scan: &Scan) -> reqwest::Client {
    build_client(&ScanOptions {
        request_timeout_secs: PROBE_TIMEOUT_SECS,
        ..scan.options.clone()
    })
}

fn random_token(len: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(len)
        .map(char::from)
        .collect()
}

/// Probe requests for one baseline class, shaped for the definition kind.
fn probes_for(class: BaselineClass, definition: &ApiDefinition) -> Vec<SynthesizedRequest> {
    let base = definition.base_url.trim_end_matches('/').to_string();
    let namespace = definition
        .target_namespace
        .clone()
        .unwrap_or_else(|| "http://tempuri.org/".to_string());

    match class {
        BaselineClass::NotFound => (0..4)
            .map(|_| {
                SynthesizedRequest::new(
                    "GET",
                    format!("{base}/caracal-nonexistent-{}", random_token(12)),
                )
            })
            .chain(std::iter::once(SynthesizedRequest::new(
                "POST",
                format!("{base}/{}/{}", random_token(8), random_token(8)),
            )))
            .collect(),

        BaselineClass::Unauthenticated => match definition.kind {
            ApiDefinitionKind::GraphQl => vec![
                SynthesizedRequest::new("POST", base.clone()).with_body(
                    br#"{"query":"{__typename}"}"#.to_vec(),
                    "application/json",
                ),
                SynthesizedRequest::new("POST", base.clone()).with_body(
                    br#"{"query":"query { __typename }","operationName":null}"#.to_vec(),
                    "application/json",
                ),
                SynthesizedRequest::new("GET", format!("{base}?query=%7B__typename%7D")),
                SynthesizedRequest::new("OPTIONS", base.clone()),
            ],
            ApiDefinitionKind::OpenApi => vec![
                SynthesizedRequest::new("GET", base.clone()),
                SynthesizedRequest::new("POST", base.clone())
                    .with_body(b"{}".to_vec(), "application/json"),
                SynthesizedRequest::new("OPTIONS", base.clone()),
                SynthesizedRequest::new("HEAD", base.clone()),
            ],
            ApiDefinitionKind::Wsdl => [
                "",
                "urn:caracal-unknown",
                "http://tempuri.org/Missing",
                "http://tempuri.org/Probe",
            ]
            .iter()
            .map(|action| {
                let envelope = wsdl::soap_envelope("Probe", &namespace, &[]);
                let mut request = SynthesizedRequest::new("POST", base.clone())
                    .with_body(envelope.into_bytes(), "text/xml; charset=utf-8");
                request.set_header("SOAPAction", format!("\"{action}\""));
                request
            })
            .collect(),
        },

        BaselineClass::InvalidContentType => vec![
            SynthesizedRequest::new("POST", base.clone())
                .with_body(b"{}".to_vec(), "application/caracal-invalid"),
            SynthesizedRequest::new("POST", base.clone())
                .with_body(b"{}".to_vec(), "text/invalid"),
            SynthesizedRequest::new("POST", base.clone())
                .with_body(b"{}".to_vec(), "invalid/invalid"),
            SynthesizedRequest::new("PUT", base.clone())
                .with_body(b"{}".to_vec(), "application/caracal-invalid"),
        ],

        BaselineClass::MalformedBody => {
            let malformed: &[u8] = match definition.kind {
                ApiDefinitionKind::GraphQl => br#"{"query":"{unclosed"#,
                ApiDefinitionKind::Wsdl => b"<soap:Envelope><soap:Body><Broken",
                ApiDefinitionKind::OpenApi => b"{\"broken\": ",
            };
            let content_type = match definition.kind {
                ApiDefinitionKind::Wsdl => "text/xml; charset=utf-8",
                _ => "application/json",
            };
            vec![
                SynthesizedRequest::new("POST", base.clone())
                    .with_body(malformed.to_vec(), content_type),
                SynthesizedRequest::new("POST", base.clone())
                    .with_body(b"\x00\x01\x02garbage".to_vec(), content_type),
                SynthesizedRequest::new("POST", base.clone())
                    .with_body(Vec::new(), content_type),
                SynthesizedRequest::new("PUT", base)
                    .with_body(malformed.to_vec(), content_type),
            ]
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::MemoryStore;
    use crate::db::models::ScanMode;
    use axum::http::StatusCode;
    use axum::routing::any;

    fn definition(kind: ApiDefinitionKind, base_url: String) -> ApiDefinition {
        ApiDefinition {
            id: Uuid::new_v4(),
            workspace_id: Uuid::new_v4(),
            kind,
            base_url,
            source_url: String::new(),
            raw: Vec::new(),
            target_namespace: None,
        }
    }

    #[test]
    fn test_probe_counts_per_class() {
        let def = definition(
            ApiDefinitionKind::OpenApi,
            "http://api.example.com".to_string(),
        );
        for class in BaselineClass::ALL {
            let probes = probes_for(class, &def);
            assert!(
                (4..=8).contains(&probes.len()),
                "{class:?} produced {} probes",
                probes.len()
            );
        }
    }

    #[test]
    fn test_graphql_unauthenticated_probe_is_typename() {
        let def = definition(
            ApiDefinitionKind::GraphQl,
            "http://api.example.com/graphql".to_string(),
        );
        let probes = probes_for(BaselineClass::Unauthenticated, &def);
        let body = probes[0].body.as_ref().unwrap();
        assert_eq!(body, br#"{"query":"{__typename}"}"#);
    }

    #[test]
    fn test_wsdl_unauthenticated_probes_vary_soap_action() {
        let def = definition(ApiDefinitionKind::Wsdl, "http://api.example.com".to_string());
        let probes = probes_for(BaselineClass::Unauthenticated, &def);
        let actions: Vec<&str> = probes.iter().filter_map(|p| p.header("SOAPAction")).collect();
        assert_eq!(actions.len(), 4);
        assert!(actions.contains(&"\"\""));
    }

    #[tokio::test]
    async fn test_fingerprint_api_dedupes_identical_responses() {
        // Every probe gets the same 404 page, so each class should store a
        // single fingerprint.
        let app = axum::Router::new().fallback(any(|| async {
            (StatusCode::NOT_FOUND, [("content-type", "text/html")], "nope")
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let db = Arc::new(MemoryStore::new());
        let fingerprinter = BehaviorFingerprinter::new(db.clone());
        let scan = Scan::new(Uuid::new_v4(), format!("http://{addr}"), ScanMode::Smart);
        let def = definition(ApiDefinitionKind::OpenApi, format!("http://{addr}"));

        let results = fingerprinter
            .fingerprint_api(&scan, None, &def, &[], None)
            .await
            .unwrap();
        assert_eq!(results.len(), 4);
        for result in &results {
            // Identical pages collapse; HEAD probes differ only by their
            // empty body, so at most two fingerprints survive per class.
            assert!(
                result.fingerprints.len() <= 2,
                "{:?} kept {} fingerprints",
                result.class,
                result.fingerprints.len()
            );
            assert!(!result.fingerprints.is_empty());
            assert!(result.fingerprints.iter().all(|fp| fp.status == 404));
        }

        let stored = db
            .get_api_behavior_for_definition(scan.id, def.id)
            .await
            .unwrap();
        assert_eq!(stored.len(), 4);
    }

    #[tokio::test]
    async fn test_fingerprint_site_stores_samples() {
        let app = axum::Router::new().fallback(any(|| async {
            (StatusCode::OK, [("content-type", "text/html")], "soft 404")
        }));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        let db = Arc::new(MemoryStore::new());
        let fingerprinter = BehaviorFingerprinter::new(db.clone());
        let scan = Scan::new(Uuid::new_v4(), format!("http://{addr}"), ScanMode::Smart);

        let result = fingerprinter
            .fingerprint_site(&scan, None, &format!("http://{addr}"), &[], None)
            .await
            .unwrap();
        // A soft-404 that always answers 200 with the same page dedups to a
        // single stored sample.
        assert_eq!(result.not_found_samples.len(), 1);
        assert_eq!(result.not_found_samples[0].status, 200);
    }
}
