//! Mandatory-field resolution and reconciliation merge.
//!
//! `diff` lists what is still missing, `validate_value` gates each
//! user-supplied value, and `merge` is the terminal check before summary
//! generation: it either returns a record with every mandatory path
//! populated or fails naming exactly the still-missing paths.

use crate::error::ValidationError;
use crate::schema::{value_is_empty, FieldType, Record, Schema, SignalKind};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// User-supplied corrections, keyed by field path.
pub type Delta = BTreeMap<String, serde_json::Value>;

/// Where a pipeline invocation sits between extraction and export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    Extracted,
    PendingReconciliation,
    Reconciling,
    Finalized,
}

/// Mandatory paths missing from the record, in schema order.
pub fn diff(record: &Record, schema: &Schema) -> Vec<String> {
    schema
        .mandatory_fields()
        .into_iter()
        .filter(|path| record.is_missing(path))
        .map(str::to_string)
        .collect()
}

/// Basic type and shape checks applied before a value is accepted.
pub fn validate_value(
    path: &str,
    value: &serde_json::Value,
    schema: &Schema,
) -> Result<(), ValidationError> {
    let invalid = |reason: &str| {
        Err(ValidationError::InvalidValue {
            path: path.to_string(),
            reason: reason.to_string(),
        })
    };

    let Some(field) = schema.field(path) else {
        return invalid("unknown field path");
    };
    if value_is_empty(value) {
        return invalid("empty value");
    }

    match field.field_type {
        FieldType::Text => {
            if value.as_str().is_none() {
                return invalid("expected a string");
            }
        }
        FieldType::Date => match value.as_str() {
            Some(s) if crate::signals::normalize_date(s).is_some() => {}
            _ => return invalid("not a parseable date"),
        },
        FieldType::Time => match value.as_str() {
            Some(s) if crate::signals::normalize_time(s).is_some() => {}
            _ => return invalid("not a parseable time"),
        },
        FieldType::Number => {
            let ok = value.is_number()
                || value
                    .as_str()
                    .map(|s| s.replace([',', ' '], "").parse::<f64>().is_ok())
                    .unwrap_or(false);
            if !ok {
                return invalid("not a number");
            }
        }
        FieldType::Enum => match value.as_str() {
            Some(s) if field.options.iter().any(|o| o.eq_ignore_ascii_case(s.trim())) => {}
            _ => return invalid("not one of the allowed options"),
        },
        FieldType::List => {
            let ok = value.is_string()
                || value
                    .as_array()
                    .map(|items| items.iter().all(|v| v.is_string()))
                    .unwrap_or(false);
            if !ok {
                return invalid("expected a string or list of strings");
            }
        }
    }

    // Fields fed by the phone signal carry the stricter phone shape check.
    if field.signal == Some(SignalKind::Phone) {
        let digits = value
            .as_str()
            .map(|s| {
                s.chars()
                    .filter(|c| !matches!(c, ' ' | '-' | '(' | ')'))
                    .collect::<String>()
            })
            .unwrap_or_default();
        let phone_shape = Regex::new(r"^(?:\+91)?[6-9]\d{9}$").expect("phone pattern");
        if !phone_shape.is_match(&digits) {
            return invalid("not a valid 10-digit phone number");
        }
    }

    Ok(())
}

/// Apply a delta without the terminal completeness check.
///
/// Each delta entry is validated, then set only when the path is currently
/// missing (or `override_existing` is set), so reconciliation never clobbers
/// valid extracted data. Values are normalized through the same coercion the
/// extractor uses, keeping record shape uniform.
pub fn apply(
    record: &Record,
    delta: &Delta,
    schema: &Schema,
    override_existing: bool,
) -> Result<Record, ValidationError> {
    for (path, value) in delta {
        validate_value(path, value, schema)?;
    }

    let mut merged = record.clone();
    for (path, value) in delta {
        if override_existing || merged.is_missing(path) {
            let field = schema.field(path).expect("validated above");
            let coerced = crate::extractor::coerce_value(field, value)
                .unwrap_or_else(|| value.clone());
            merged.set(path, coerced);
        }
    }
    Ok(merged)
}

/// Merge a delta and gate on completeness.
///
/// Fails with `ValidationError::MissingMandatory` listing exactly the paths
/// still missing after the merge; on success the result is the finalized
/// record.
pub fn merge(
    record: &Record,
    delta: &Delta,
    schema: &Schema,
    override_existing: bool,
) -> Result<Record, ValidationError> {
    let merged = apply(record, delta, schema, override_existing)?;
    let missing = diff(&merged, schema);
    if !missing.is_empty() {
        return Err(ValidationError::MissingMandatory(missing));
    }
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing;
    use serde_json::json;

    fn extracted_record() -> Record {
        // "I am Asha, phone 9876543210" with no date
        let mut record = Record::new();
        record.set("complainant.name", json!("Asha"));
        record.set("complainant.phone", json!("9876543210"));
        record
    }

    #[test]
    fn test_diff_lists_missing_mandatory_paths() {
        let schema = testing::schema();
        let record = extracted_record();
        assert_eq!(diff(&record, &schema), vec!["incident.date"]);
    }

    #[test]
    fn test_diff_counts_null_and_empty_as_missing() {
        let schema = testing::schema();
        let mut record = extracted_record();
        record.set("complainant.name", json!(""));
        record.set("incident.date", serde_json::Value::Null);
        assert_eq!(
            diff(&record, &schema),
            vec!["complainant.name", "incident.date"]
        );
    }

    #[test]
    fn test_merge_completes_the_record() {
        let schema = testing::schema();
        let record = extracted_record();
        let delta = Delta::from([("incident.date".to_string(), json!("2025-01-15"))]);

        let finalized = merge(&record, &delta, &schema, false).unwrap();
        assert_eq!(finalized.get("complainant.name").unwrap(), &json!("Asha"));
        assert_eq!(finalized.get("incident.date").unwrap(), &json!("2025-01-15"));
        assert!(diff(&finalized, &schema).is_empty());
    }

    #[test]
    fn test_merge_lists_exactly_the_still_missing_paths() {
        let schema = testing::schema();
        let mut record = Record::new();
        record.set("complainant.name", json!("Asha"));
        let delta = Delta::new();

        let err = merge(&record, &delta, &schema, false).unwrap_err();
        match err {
            ValidationError::MissingMandatory(paths) => {
                assert_eq!(paths, vec!["complainant.phone", "incident.date"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_merge_is_idempotent() {
        let schema = testing::schema();
        let record = extracted_record();
        let delta = Delta::from([("incident.date".to_string(), json!("2025-01-15"))]);

        let once = merge(&record, &delta, &schema, false).unwrap();
        let twice = merge(&once, &Delta::new(), &schema, false).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_is_non_destructive_by_default() {
        let schema = testing::schema();
        let record = extracted_record();
        let delta = Delta::from([
            ("complainant.name".to_string(), json!("Someone Else")),
            ("incident.date".to_string(), json!("2025-01-15")),
        ]);

        let finalized = merge(&record, &delta, &schema, false).unwrap();
        assert_eq!(finalized.get("complainant.name").unwrap(), &json!("Asha"));
    }

    #[test]
    fn test_merge_override_replaces_existing_values() {
        let schema = testing::schema();
        let record = extracted_record();
        let delta = Delta::from([
            ("complainant.name".to_string(), json!("Asha Verma")),
            ("incident.date".to_string(), json!("2025-01-15")),
        ]);

        let finalized = merge(&record, &delta, &schema, true).unwrap();
        assert_eq!(
            finalized.get("complainant.name").unwrap(),
            &json!("Asha Verma")
        );
    }

    #[test]
    fn test_invalid_value_is_rejected_and_not_merged() {
        let schema = testing::schema();
        let record = extracted_record();
        let delta = Delta::from([("incident.date".to_string(), json!("not a date"))]);

        let err = merge(&record, &delta, &schema, false).unwrap_err();
        match err {
            ValidationError::InvalidValue { path, reason } => {
                assert_eq!(path, "incident.date");
                assert!(reason.contains("date"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_validate_phone_shape() {
        let schema = testing::schema();
        assert!(validate_value("complainant.phone", &json!("9876543210"), &schema).is_ok());
        assert!(validate_value("complainant.phone", &json!("+91 98765 43210"), &schema).is_ok());
        // Leading digit must be 6-9 and length exactly 10
        assert!(validate_value("complainant.phone", &json!("1234567890"), &schema).is_err());
        assert!(validate_value("complainant.phone", &json!("98765"), &schema).is_err());
    }

    #[test]
    fn test_validate_enum_and_unknown_path() {
        let schema = testing::schema();
        assert!(validate_value("offense.type", &json!("Theft"), &schema).is_ok());
        assert!(validate_value("offense.type", &json!("jaywalking"), &schema).is_err());
        assert!(matches!(
            validate_value("no.such.path", &json!("x"), &schema),
            Err(ValidationError::InvalidValue { reason, .. }) if reason.contains("unknown")
        ));
    }

    #[test]
    fn test_delta_values_are_normalized_on_merge() {
        let schema = testing::schema();
        let record = extracted_record();
        let delta = Delta::from([("incident.date".to_string(), json!("15/01/2025"))]);

        let finalized = merge(&record, &delta, &schema, false).unwrap();
        assert_eq!(finalized.get("incident.date").unwrap(), &json!("2025-01-15"));
    }
}
