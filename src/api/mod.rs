//! API scanning: definition parsing, request synthesis, baseline
//! fingerprinting, and definition-kind audits.

pub mod audits;
pub mod behavior;
pub mod graphql;
pub mod openapi;
pub mod operation;
pub mod request;
pub mod values;
pub mod wsdl;

use crate::api::operation::Operation;
use crate::db::models::{ApiDefinition, ApiDefinitionKind};
use crate::error::ParseError;

/// Parse a stored definition into normalized operations.
pub fn parse_definition(definition: &ApiDefinition) -> Result<Vec<Operation>, ParseError> {
    match definition.kind {
        ApiDefinitionKind::OpenApi => openapi::parse(&definition.raw),
        ApiDefinitionKind::GraphQl => graphql::parse(&definition.raw),
        ApiDefinitionKind::Wsdl => Ok(wsdl::parse(&definition.raw)?.operations),
    }
}
