mod builtins;
mod schema;
mod xsd;

pub use schema::{QName, Schema, SchemaError, XSI_NS, XS_NS};

use crate::models::{ParsedRecord, ValidationResult, Verdict, Violation};

/// Checks one document against `schema` and returns every violation found.
/// `Err` means the document could not be loaded as XML at all.
pub fn validate(schema: &Schema, xml: &str) -> Result<Vec<Violation>, String> {
    let doc = roxmltree::Document::parse(xml).map_err(|e| e.to_string())?;
    Ok(xsd::InstanceValidator::new(schema).validate_document(&doc))
}

pub fn validate_record(schema: &Schema, record: &ParsedRecord) -> ValidationResult {
    let (verdict, violations, detail) = match validate(schema, &record.raw_xml) {
        Ok(violations) if violations.is_empty() => (Verdict::Valid, violations, None),
        Ok(violations) => (Verdict::Invalid, violations, None),
        Err(e) => (Verdict::ValidationError, Vec::new(), Some(e)),
    };
    if verdict != Verdict::Valid {
        tracing::debug!(
            endpoint = %record.endpoint_id,
            ordinal = record.ordinal,
            verdict = verdict.label(),
            violations = violations.len(),
            "record failed validation"
        );
    }
    ValidationResult {
        endpoint_id: record.endpoint_id.clone(),
        ordinal: record.ordinal,
        record_id: record.record_id.clone(),
        verdict,
        violations,
        detail,
    }
}
