//! Definition-kind specific audits dispatched by the API scan executor.

pub mod graphql;
pub mod rest;
pub mod soap;

use uuid::Uuid;

use crate::db::Database;
use crate::db::models::{Fingerprint, Scan, ScanJob};
use crate::scan::IssueReporter;

/// Shared plumbing handed to every audit.
pub struct AuditContext<'a> {
    pub db: &'a dyn Database,
    pub client: &'a reqwest::Client,
    pub scan: &'a Scan,
    pub job: &'a ScanJob,
    pub endpoint_id: Option<Uuid>,
    pub reporter: &'a IssueReporter,
    /// Behavior baselines used to suppress look-alike responses.
    pub baselines: &'a [Fingerprint],
}
