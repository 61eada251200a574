//! Config validation
//!
//! Rules:
//! - numeric bounds declared on the blueprint types (cluster size, channel
//!   capacity, startup timeout, page size, sink name)
//! - jsonl source has a `path`; mock source `count` is an integer
//! - file sink has a `dir`

use ::validator::{Validate, ValidationErrors, ValidationErrorsKind};
use contracts::{ContractError, MigrationBlueprint, SinkType, SourceType};

/// Validate a MigrationBlueprint
///
/// Returns the first error found, or Ok(()).
pub fn validate(blueprint: &MigrationBlueprint) -> Result<(), ContractError> {
    validate_bounds(blueprint)?;
    validate_source(blueprint)?;
    validate_sink(blueprint)?;
    Ok(())
}

/// Field bounds declared with `#[validate(...)]`
fn validate_bounds(blueprint: &MigrationBlueprint) -> Result<(), ContractError> {
    blueprint.validate().map_err(|errors| {
        let (field, message) = first_violation("", &errors)
            .unwrap_or_else(|| ("<root>".to_string(), errors.to_string()));
        ContractError::config_validation(field, message)
    })
}

/// Walk nested validation errors in a stable (sorted) order
fn first_violation(prefix: &str, errors: &ValidationErrors) -> Option<(String, String)> {
    let mut fields: Vec<_> = errors.errors().iter().collect();
    fields.sort_by(|a, b| a.0.cmp(b.0));

    for (field, kind) in fields {
        let path = if prefix.is_empty() {
            field.to_string()
        } else {
            format!("{prefix}.{field}")
        };

        match kind {
            ValidationErrorsKind::Field(errs) => {
                if let Some(err) = errs.first() {
                    let message = err
                        .message
                        .as_ref()
                        .map(|m| m.to_string())
                        .unwrap_or_else(|| err.code.to_string());
                    return Some((path, message));
                }
            }
            ValidationErrorsKind::Struct(inner) => {
                if let Some(found) = first_violation(&path, inner) {
                    return Some(found);
                }
            }
            ValidationErrorsKind::List(items) => {
                for (idx, inner) in items {
                    if let Some(found) = first_violation(&format!("{path}[{idx}]"), inner) {
                        return Some(found);
                    }
                }
            }
        }
    }
    None
}

/// Source-type specific parameters
fn validate_source(blueprint: &MigrationBlueprint) -> Result<(), ContractError> {
    let source = &blueprint.source;
    match source.source_type {
        SourceType::Jsonl => {
            let path = source.params.get("path").map(String::as_str).unwrap_or("");
            if path.is_empty() {
                return Err(ContractError::config_validation(
                    "source.params.path",
                    "jsonl source requires a 'path' parameter",
                ));
            }
        }
        SourceType::Mock => {
            if let Some(count) = source.params.get("count") {
                if count.parse::<u64>().is_err() {
                    return Err(ContractError::config_validation(
                        "source.params.count",
                        format!("count must be a non-negative integer, got '{count}'"),
                    ));
                }
            }
        }
    }
    Ok(())
}

/// Sink-type specific parameters
fn validate_sink(blueprint: &MigrationBlueprint) -> Result<(), ContractError> {
    let sink = &blueprint.sink;
    if sink.sink_type == SinkType::File {
        let dir = sink.params.get("dir").map(String::as_str).unwrap_or("");
        if dir.is_empty() {
            return Err(ContractError::config_validation(
                "sink.params.dir",
                "file sink requires a 'dir' parameter",
            ));
        }
    }
    Ok(())
}
