//! Marker detection and statistical revalidation for smuggling candidates.
//!
//! Detection is response-based only: a marker surfacing in the second
//! response, or a method-error phrase on a matching status. Timing is never
//! used as a signal.

use std::sync::Arc;

use tokio::sync::watch;
use uuid::Uuid;

use crate::config::SmugglingConfig;
use crate::control::ScanControl;
use crate::db::Database;
use crate::db::models::{History, Issue, Scan, ScanJob, ScanMode};
use crate::error::ExecutorError;
use crate::smuggling::client::{ExchangeTarget, RawClient};
use crate::smuggling::payloads::{
    self, SmugglingKind, SmugglingPayload, TeObfuscation, payload_set,
};

/// Phrases that indicate the back-end choked on the smuggled method, checked
/// on 400/405/501 responses.
pub const METHOD_ERROR_INDICATORS: &[&str] = &[
    "invalid method",
    "not implemented",
    "bad request",
    "unknown method",
    "unsupported method",
    "method not allowed",
    "unrecognized method",
];

const METHOD_ERROR_STATUSES: [u16; 3] = [400, 405, 501];

/// Confidence from revalidation outcomes: all attempts -> 95, a majority
/// -> 85, anything less is discarded.
pub fn confidence_for(successes: u32, attempts: u32) -> Option<u8> {
    if attempts == 0 {
        return None;
    }
    if successes == attempts {
        Some(95)
    } else if successes >= attempts.div_ceil(2) {
        Some(85)
    } else {
        None
    }
}

/// Whether the second response betrays the smuggled prefix.
pub fn response_matches(second: &[u8], payload: &SmugglingPayload) -> bool {
    if second.is_empty() {
        return false;
    }
    let text = String::from_utf8_lossy(second);

    if text.contains(&payload.markers.method) || text.contains(&payload.markers.path) {
        return true;
    }

    if let Some(status) = status_of(second) {
        if METHOD_ERROR_STATUSES.contains(&status) {
            let lowered = text.to_lowercase();
            return METHOD_ERROR_INDICATORS
                .iter()
                .any(|phrase| lowered.contains(phrase));
        }
    }
    false
}

/// Status code of a raw response buffer.
pub fn status_of(response: &[u8]) -> Option<u16> {
    let text = String::from_utf8_lossy(response);
    let line = text.lines().next()?;
    line.split_whitespace().nth(1)?.parse().ok()
}

struct Attempt {
    matched: bool,
    history: History,
}

/// Runs pipelined exchanges against a URL and revalidates candidates.
pub struct SmugglingScanner {
    db: Arc<dyn Database>,
    client: RawClient,
    config: SmugglingConfig,
}

impl SmugglingScanner {
    pub fn new(db: Arc<dyn Database>, config: SmugglingConfig) -> Self {
        Self {
            client: RawClient::new(config.connection_timeout),
            db,
            config,
        }
    }

    /// Test every payload family against the URL. Returns the number of
    /// issues created.
    pub async fn scan_url(
        &self,
        scan: &Scan,
        job: &ScanJob,
        url: &str,
        mode: ScanMode,
        ctrl: &ScanControl,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<usize, ExecutorError> {
        let target = match ExchangeTarget::from_url(url) {
            Ok(target) => target,
            Err(e) => {
                tracing::debug!(url, "Skipping smuggling scan: {e}");
                return Ok(0);
            }
        };

        let mut issues = 0;
        for (kind, obfuscation) in payload_set(mode) {
            if !ctrl.checkpoint_with_shutdown(shutdown).await {
                return Err(ExecutorError::Cancelled);
            }

            let Some(candidate) = self.attempt(scan, job, &target, kind, obfuscation).await?
            else {
                continue;
            };
            if !candidate.matched {
                continue;
            }

            tracing::info!(
                url,
                kind = kind.label(),
                obfuscation = ?obfuscation.map(|o| o.name),
                "Smuggling candidate; revalidating"
            );
            if self
                .revalidate(scan, job, &target, kind, obfuscation, candidate, ctrl, shutdown)
                .await?
                .is_some()
            {
                issues += 1;
            }
        }
        Ok(issues)
    }

    /// One exchange with fresh markers. `None` means the probe could not
    /// run; probe failures never abort the job.
    async fn attempt(
        &self,
        scan: &Scan,
        job: &ScanJob,
        target: &ExchangeTarget,
        kind: SmugglingKind,
        obfuscation: Option<&'static TeObfuscation>,
    ) -> Result<Option<Attempt>, ExecutorError> {
        let payload = payloads::build(&target.host, &target.path, kind, obfuscation);
        let follow_up = payloads::follow_up(&target.host, &target.path);

        let exchange = match self
            .client
            .exchange(target, &payload.bytes, &follow_up)
            .await
        {
            Ok(exchange) => exchange,
            Err(e) => {
                tracing::debug!(host = %target.host, kind = kind.label(), "Exchange failed: {e}");
                return Ok(None);
            }
        };

        // One combined history per exchange: payload + follow-up against
        // both responses in arrival order.
        let mut request_raw = payload.bytes.clone();
        request_raw.extend_from_slice(&follow_up);
        let mut response_raw = exchange.first.clone();
        response_raw.extend_from_slice(&exchange.second);

        let url = format!(
            "{}://{}:{}{}",
            if target.tls { "https" } else { "http" },
            target.host,
            target.port,
            target.path
        );
        let history = History::record(
            scan.workspace_id,
            Some(scan.id),
            Some(job.id),
            "POST",
            url,
            status_of(&exchange.first).unwrap_or(0),
            request_raw,
            response_raw.clone(),
            &response_raw,
            "application/octet-stream",
        );
        self.db.create_history(&history).await?;

        Ok(Some(Attempt {
            matched: response_matches(&exchange.second, &payload),
            history,
        }))
    }

    /// Re-run a candidate with fresh markers, sleeping between attempts.
    /// Returns the issue when enough attempts reproduce.
    #[allow(clippy::too_many_arguments)]
    async fn revalidate(
        &self,
        scan: &Scan,
        job: &ScanJob,
        target: &ExchangeTarget,
        kind: SmugglingKind,
        obfuscation: Option<&'static TeObfuscation>,
        candidate: Attempt,
        ctrl: &ScanControl,
        shutdown: &watch::Receiver<bool>,
    ) -> Result<Option<Issue>, ExecutorError> {
        let attempts = self.config.revalidation_attempts;
        let mut successes = 0u32;
        let mut revalidation_histories: Vec<Uuid> = Vec::new();

        for attempt_no in 1..=attempts {
            if !ctrl.checkpoint_with_shutdown(shutdown).await {
                return Err(ExecutorError::Cancelled);
            }
            tokio::time::sleep(self.config.revalidation_delay).await;

            if let Some(attempt) = self
                .attempt(scan, job, target, kind, obfuscation)
                .await?
            {
                revalidation_histories.push(attempt.history.id);
                if attempt.matched {
                    successes += 1;
                }
            }
            tracing::debug!(
                kind = kind.label(),
                attempt = attempt_no,
                successes,
                "Revalidation attempt finished"
            );
        }

        let Some(confidence) = confidence_for(successes, attempts) else {
            tracing::info!(
                kind = kind.label(),
                successes,
                attempts,
                "Candidate discarded after revalidation"
            );
            return Ok(None);
        };

        if self
            .db
            .issue_exists(job.id, kind.issue().code(), &candidate.history.url)
            .await?
        {
            return Ok(None);
        }

        let details = format!(
            "{} request smuggling confirmed: {successes}/{attempts} revalidation attempts \
             reproduced the smuggled prefix{}",
            kind.label(),
            obfuscation
                .map(|o| format!(" (Transfer-Encoding obfuscation: {})", o.name))
                .unwrap_or_default(),
        );
        let issue =
            Issue::from_history_and_template(&candidate.history, kind.issue(), details, confidence)
                .with_histories(revalidation_histories);
        self.db.create_issue(&issue).await?;
        Ok(Some(issue))
    }
}
