//! API scan executor: one endpoint, one synthesized base request, three
//! test groups, auth with refresh-retry, and the auth circuit breaker.

use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::api::audits::{self, AuditContext};
use crate::api::behavior::all_fingerprints;
use crate::api::operation::{self, Operation};
use crate::api::request::{self, SynthesizedRequest};
use crate::auth::breaker::{BreakerAction, CircuitBreaker};
use crate::auth::tokens::TokenManager;
use crate::auth::{apply as apply_auth, host_of};
use crate::control::{AuthPauseHook, ScanControl};
use crate::db::Database;
use crate::db::models::{
    ApiAuthConfig, ApiDefinition, ApiDefinitionKind, Fingerprint, IssueKind, JobType, ScanJob,
};
use crate::error::{ExecutorError, ParseError};
use crate::scan::http::{ClientPool, ExecutedRequest, execute_and_record};
use crate::scan::passive::PassivePipeline;
use crate::scan::{ActiveScanOptions, ActiveScanner, IssueReporter, fingerprint_of};
use crate::worker::payloads::ApiScanJobData;
use crate::worker::registry::{Executor, JobContext};

pub struct ApiScanExecutor {
    db: Arc<dyn Database>,
    clients: Arc<ClientPool>,
    passive: Arc<PassivePipeline>,
    scanner: Arc<ActiveScanner>,
    tokens: Arc<TokenManager>,
    breaker: Arc<CircuitBreaker>,
    pause_hook: Arc<dyn AuthPauseHook>,
    reporter: IssueReporter,
}

impl ApiScanExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Arc<dyn Database>,
        clients: Arc<ClientPool>,
        passive: Arc<PassivePipeline>,
        scanner: Arc<ActiveScanner>,
        tokens: Arc<TokenManager>,
        breaker: Arc<CircuitBreaker>,
        pause_hook: Arc<dyn AuthPauseHook>,
    ) -> Self {
        Self {
            reporter: IssueReporter::new(db.clone()),
            db,
            clients,
            passive,
            scanner,
            tokens,
            breaker,
            pause_hook,
        }
    }

    /// Apply auth, send, and retry exactly once after a forced refresh when
    /// the response is 401/403 and the config can refresh.
    async fn send_authenticated(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        endpoint_id: Option<Uuid>,
        request: &SynthesizedRequest,
        auth: Option<&ApiAuthConfig>,
    ) -> Result<ExecutedRequest, ExecutorError> {
        let client = self.clients.for_scan(&ctx.scan).await;

        let mut authed = request.clone();
        if let Some(config) = auth {
            apply_auth(config, &self.tokens, &mut authed).await?;
        }
        let executed =
            execute_and_record(self.db.as_ref(), &client, &ctx.scan, Some(job.id), endpoint_id, &authed)
                .await?;

        let refreshable = auth.filter(|c| c.refresh.is_some());
        if let (401 | 403, Some(config)) = (executed.status, refreshable) {
            tracing::debug!(
                status = executed.status,
                "Auth rejected; forcing one token refresh and retrying"
            );
            self.tokens.force_refresh(config).await?;
            let mut retried = request.clone();
            apply_auth(config, &self.tokens, &mut retried).await?;
            return execute_and_record(
                self.db.as_ref(),
                &client,
                &ctx.scan,
                Some(job.id),
                endpoint_id,
                &retried,
            )
            .await;
        }

        Ok(executed)
    }

    /// Record the outcome with the circuit breaker. `true` means the scan
    /// was paused and the job should end cleanly.
    async fn observe_auth_outcome(&self, ctx: &JobContext, status: u16, url: &str) -> bool {
        let host = host_of(url);
        match status {
            401 | 403 => {
                let action = self.breaker.record_failure(ctx.scan.id, &host).await;
                if action == BreakerAction::PauseScan && ctx.scan.pause_on_auth_failure {
                    tracing::warn!(scan_id = %ctx.scan.id, host, "Pausing scan after repeated auth failures");
                    self.pause_hook.on_auth_pause(ctx.scan.id).await;
                    return true;
                }
                false
            }
            200..=399 => {
                self.breaker.record_success(ctx.scan.id, &host).await;
                false
            }
            _ => false,
        }
    }
}

#[async_trait]
impl Executor for ApiScanExecutor {
    fn job_type(&self) -> JobType {
        JobType::ApiScan
    }

    async fn execute(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        ctrl: Arc<ScanControl>,
    ) -> Result<(), ExecutorError> {
        let data: ApiScanJobData =
            serde_json::from_value(job.payload.clone()).map_err(ExecutorError::Payload)?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        let definition = self.db.get_api_definition(data.definition_id).await?;
        let endpoint = self
            .db
            .get_api_endpoint_with_relations(data.endpoint_id)
            .await?;

        let operations = crate::api::parse_definition(&definition)?;
        let operation = operation::resolve(
            &operations,
            endpoint.operation_id.as_deref(),
            &endpoint.path,
            &endpoint.method,
        )
        .ok_or_else(|| {
            ParseError::OperationNotFound(format!(
                "{} {} (operation id {:?})",
                endpoint.method, endpoint.path, endpoint.operation_id
            ))
        })?
        .clone();

        // Auth resolution: the scheme map wins, first matching scheme in
        // declaration order; no match means the endpoint is treated as
        // public.
        let auth_config_id = resolve_auth_config(&data, &operation);
        let auth = match auth_config_id {
            Some(id) => Some(self.db.get_api_auth_config_with_relations(id).await?),
            None => None,
        };

        // Base request: a stored variation when one exists, synthesis
        // otherwise.
        let base = match endpoint.variations.first() {
            Some(variation) => SynthesizedRequest::from_variation(variation),
            None => request::synthesize(&operation, &definition)?,
        };

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }

        let executed = self
            .send_authenticated(ctx, job, Some(endpoint.id), &base, auth.as_ref())
            .await?;
        if self
            .observe_auth_outcome(ctx, executed.status, &base.url)
            .await
        {
            // Scan paused: not a job failure, and no finding.
            return Ok(());
        }

        let baselines: Vec<Fingerprint> = all_fingerprints(
            &self
                .db
                .get_api_behavior_for_definition(ctx.scan.id, definition.id)
                .await?,
        );

        let client = self.clients.for_scan(&ctx.scan).await;
        let mut issues = 0u32;

        // Group 1: standard active tests.
        if data.run_standard_tests {
            if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
                return Err(ExecutorError::Cancelled);
            }
            issues += self
                .passive
                .scan_history_item(&ctx.scan, &executed.history)
                .await?
                .len() as u32;

            let options = ActiveScanOptions {
                mode: data.mode,
                categories: data.audit_categories,
                insertion_points: Vec::new(),
                max_retries: data.max_retries,
            };
            issues += self
                .scanner
                .scan_history(&ctx.scan, job, &executed.history, &options, &ctrl, &ctx.shutdown)
                .await?;
        }

        // Group 2: API-specific tests per definition kind.
        if data.run_api_specific_tests {
            if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
                return Err(ExecutorError::Cancelled);
            }
            let audit_ctx = AuditContext {
                db: self.db.as_ref(),
                client: &client,
                scan: &ctx.scan,
                job,
                endpoint_id: Some(endpoint.id),
                reporter: &self.reporter,
                baselines: &baselines,
            };
            issues += match definition.kind {
                ApiDefinitionKind::GraphQl => {
                    audits::graphql::run(&audit_ctx, &base.url).await?
                }
                ApiDefinitionKind::OpenApi => {
                    audits::rest::run(&audit_ctx, &operation, &base).await?
                }
                ApiDefinitionKind::Wsdl => {
                    audits::soap::run(&audit_ctx, &operation, &operations, &base).await?
                }
            };
        }

        // Group 3: schema-based type confusion.
        if data.run_schema_tests {
            if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
                return Err(ExecutorError::Cancelled);
            }
            issues += self
                .schema_tests(ctx, job, &definition, &operation, &endpoint.id, auth.as_ref(), &baselines)
                .await?;
        }

        // Progress accounting.
        self.db
            .increment_api_scan_completed_endpoints(data.api_scan_id)
            .await?;
        self.db
            .mark_api_endpoint_scanned(endpoint.id, issues)
            .await?;

        if !ctrl.checkpoint_with_shutdown(&ctx.shutdown).await {
            return Err(ExecutorError::Cancelled);
        }
        tracing::info!(
            endpoint = %format!("{} {}", endpoint.method, endpoint.path),
            issues,
            "API scan finished"
        );
        Ok(())
    }
}

impl ApiScanExecutor {
    #[allow(clippy::too_many_arguments)]
    async fn schema_tests(
        &self,
        ctx: &JobContext,
        job: &ScanJob,
        definition: &ApiDefinition,
        operation: &Operation,
        endpoint_id: &Uuid,
        auth: Option<&ApiAuthConfig>,
        baselines: &[Fingerprint],
    ) -> Result<u32, ExecutorError> {
        let mut issues = 0u32;
        for variation in request::schema_variations(operation, definition)? {
            if variation.label == "base" {
                continue;
            }
            let executed = match self
                .send_authenticated(ctx, job, Some(*endpoint_id), &variation, auth)
                .await
            {
                Ok(executed) => executed,
                Err(e) => {
                    tracing::debug!(label = %variation.label, "Schema variation failed: {e}");
                    continue;
                }
            };

            // A 5xx on a boundary value that does not match any baseline is
            // an unhandled input path.
            if executed.status >= 500 && !baselines.contains(&fingerprint_of(&executed.history)) {
                let details = format!(
                    "Variation \"{}\" returned {}",
                    variation.label, executed.status
                );
                if self
                    .reporter
                    .report(
                        &executed.history,
                        IssueKind::SchemaTypeConfusion,
                        details,
                        65,
                        Some(baselines),
                    )
                    .await?
                    .is_some()
                {
                    issues += 1;
                }
            }
        }
        Ok(issues)
    }
}

fn resolve_auth_config(data: &ApiScanJobData, operation: &Operation) -> Option<Uuid> {
    if let Some(map) = &data.scheme_auth_map {
        for requirement in &operation.security {
            if let Some(id) = map.get(&requirement.scheme) {
                return Some(*id);
            }
        }
        // No scheme matched: send unauthenticated, the endpoint is treated
        // as public.
        return None;
    }
    data.auth_config_id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::operation::SecurityRequirement;
    use crate::worker::payloads::ApiScanJobData;
    use std::collections::HashMap;

    fn data_with_map(map: Option<HashMap<String, Uuid>>, single: Option<Uuid>) -> ApiScanJobData {
        ApiScanJobData {
            definition_id: Uuid::new_v4(),
            endpoint_id: Uuid::new_v4(),
            api_scan_id: Uuid::new_v4(),
            mode: Default::default(),
            audit_categories: Default::default(),
            run_api_specific_tests: false,
            run_standard_tests: false,
            run_schema_tests: false,
            auth_config_id: single,
            scheme_auth_map: map,
            fingerprint_tags: Vec::new(),
            max_retries: 0,
        }
    }

    #[test]
    fn test_scheme_map_first_match_wins() {
        let key_id = Uuid::new_v4();
        let oauth_id = Uuid::new_v4();
        let mut map = HashMap::new();
        map.insert("api_key".to_string(), key_id);
        map.insert("oauth".to_string(), oauth_id);

        let mut op = Operation::new("GET", "/x");
        op.security = vec![
            SecurityRequirement {
                scheme: "oauth".to_string(),
                scopes: Vec::new(),
            },
            SecurityRequirement {
                scheme: "api_key".to_string(),
                scopes: Vec::new(),
            },
        ];

        let resolved = resolve_auth_config(&data_with_map(Some(map), None), &op);
        assert_eq!(resolved, Some(oauth_id));
    }

    #[test]
    fn test_scheme_map_without_match_is_public() {
        let mut map = HashMap::new();
        map.insert("api_key".to_string(), Uuid::new_v4());
        let mut op = Operation::new("GET", "/x");
        op.security = vec![SecurityRequirement {
            scheme: "basic".to_string(),
            scopes: Vec::new(),
        }];

        assert_eq!(resolve_auth_config(&data_with_map(Some(map), None), &op), None);
    }

    #[test]
    fn test_single_config_applies_uniformly() {
        let id = Uuid::new_v4();
        let op = Operation::new("GET", "/x");
        assert_eq!(
            resolve_auth_config(&data_with_map(None, Some(id)), &op),
            Some(id)
        );
    }
}
