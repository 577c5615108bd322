//! SOAP audits: action spoofing.
//!
//! Each body operation is resent with a wrong and an empty SOAPAction. A
//! 2xx whose body contains neither "fault" nor "error" means the service
//! dispatched on the body alone and the action header is decorative.

use crate::api::audits::AuditContext;
use crate::api::operation::Operation;
use crate::api::request::SynthesizedRequest;
use crate::db::models::IssueKind;
use crate::error::ExecutorError;
use crate::scan::http::execute_and_record;

/// Spoofed action used when no sibling operation provides one.
const FALLBACK_SPOOFED_ACTION: &str = "http://tempuri.org/Delete";

/// Run the action-spoofing audit for one operation. Returns issues created.
pub async fn run(
    ctx: &AuditContext<'_>,
    operation: &Operation,
    all_operations: &[Operation],
    base: &SynthesizedRequest,
) -> Result<u32, ExecutorError> {
    let Some(original_action) = operation.soap_action.as_deref() else {
        return Ok(0);
    };

    // Prefer a real sibling action so the spoof is plausible.
    let wrong_action = all_operations
        .iter()
        .filter_map(|op| op.soap_action.as_deref())
        .find(|action| *action != original_action)
        .unwrap_or(FALLBACK_SPOOFED_ACTION);

    let mut issues = 0;
    for spoofed in [wrong_action, ""] {
        let mut request = base.clone();
        request.set_header("SOAPAction", format!("\"{spoofed}\""));

        let Ok(executed) = execute_and_record(
            ctx.db,
            ctx.client,
            ctx.scan,
            Some(ctx.job.id),
            ctx.endpoint_id,
            &request,
        )
        .await
        else {
            continue;
        };

        if !(200..300).contains(&executed.status) {
            continue;
        }
        let body = String::from_utf8_lossy(&executed.body).to_lowercase();
        if body.contains("fault") || body.contains("error") {
            continue;
        }

        let details = format!(
            "Operation {} executed with a spoofed SOAPAction. Original action: \
             \"{original_action}\", spoofed action: \"{spoofed}\"",
            operation.id.as_deref().unwrap_or("unknown"),
        );
        if ctx
            .reporter
            .report(
                &executed.history,
                IssueKind::SoapActionSpoofing,
                details,
                70,
                Some(ctx.baselines),
            )
            .await?
            .is_some()
        {
            issues += 1;
            // One confirmation per operation is enough.
            break;
        }
    }

    Ok(issues)
}
