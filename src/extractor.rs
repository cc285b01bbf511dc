//! Structured extraction over the completion service.
//!
//! Builds a schema-derived prompt, invokes the completion service once
//! (retrying once on transport failure), and parses the reply defensively:
//! strict JSON first, one repair pass for code fences and surrounding prose,
//! then schema filtering and per-field type coercion. A coercion failure
//! nulls that one field; it never aborts the record.

use crate::error::ExtractionError;
use crate::llm::{CompletionRequest, CompletionService};
use crate::schema::{FieldDef, FieldType, Record, Schema};
use crate::signals;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const EXTRACTION_TEMPERATURE: f32 = 0.1;
const EXTRACTION_MAX_TOKENS: u32 = 2000;
const RETRY_BACKOFF: Duration = Duration::from_millis(500);

/// Extraction adapter over the completion service.
pub struct Extractor {
    service: Arc<dyn CompletionService>,
}

impl Extractor {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Extract a candidate record from a complaint narrative. Never fails:
    /// on service or parse failure the candidate degrades to an empty record,
    /// and normalizer signals fill whatever gaps they can either way.
    pub async fn extract(&self, text: &str, schema: &Schema, signals: &signals::SignalMap) -> Record {
        let mut record = match self.call_service(text, schema).await {
            Ok(record) => record,
            Err(e) => {
                warn!("Extraction degraded to signal-only record: {}", e);
                Record::new()
            }
        };

        signals::apply_signals(&mut record, schema, signals);
        record
    }

    /// One completion call, retried once with backoff on transport failure;
    /// a reply that still isn't JSON after the repair pass is
    /// `ExtractionError::Malformed`.
    async fn call_service(&self, text: &str, schema: &Schema) -> Result<Record, ExtractionError> {
        let request = CompletionRequest {
            system: "You are a police-station intake assistant. Return only valid JSON."
                .to_string(),
            prompt: build_extraction_prompt(text, schema),
            temperature: EXTRACTION_TEMPERATURE,
            max_tokens: EXTRACTION_MAX_TOKENS,
        };

        let response = match self.service.complete(request.clone()).await {
            Ok(response) => response,
            Err(first) => {
                warn!("Completion call failed ({}), retrying once", first);
                tokio::time::sleep(RETRY_BACKOFF).await;
                self.service.complete(request).await?
            }
        };

        debug!("Raw completion response: {} chars", response.len());

        let parsed = parse_response(&response)?;
        let record = coerce_record(parsed, schema);

        info!(
            "Extraction complete: {} of {} fields populated",
            record.iter().filter(|(_, v)| !crate::schema::value_is_empty(v)).count(),
            schema.fields().len()
        );

        Ok(record)
    }
}

/// Build the extraction prompt: the narrative plus a field listing that pins
/// the reply to exactly the schema's paths.
fn build_extraction_prompt(text: &str, schema: &Schema) -> String {
    let mut field_lines = String::new();
    for field in schema.fields() {
        field_lines.push_str(&format!(
            "- \"{}\": {} ({})",
            field.path,
            field.label,
            type_hint(field)
        ));
        field_lines.push('\n');
    }

    format!(
        "Extract structured incident-report data from the complaint below.\n\n\
         COMPLAINT TEXT:\n{text}\n\n\
         FIELDS TO FILL:\n{field_lines}\n\
         RULES:\n\
         1. Dates in YYYY-MM-DD format\n\
         2. Times in HH:MM 24-hour format\n\
         3. Phone numbers as bare 10-digit strings\n\
         4. Monetary amounts as numbers only, no currency symbols\n\
         5. For any field you cannot determine from the text, use null\n\n\
         Return ONLY a single JSON object whose keys are exactly the field paths listed above. \
         No additional text or explanations."
    )
}

fn type_hint(field: &FieldDef) -> String {
    match field.field_type {
        FieldType::Text => "text".to_string(),
        FieldType::Date => "date, YYYY-MM-DD".to_string(),
        FieldType::Time => "time, HH:MM".to_string(),
        FieldType::Number => "number".to_string(),
        FieldType::Enum => format!("one of: {}", field.options.join(", ")),
        FieldType::List => "list of strings".to_string(),
    }
}

/// Parse the service reply as a JSON object: strict parse, then one repair
/// pass that strips code fences and surrounding prose.
fn parse_response(response: &str) -> Result<serde_json::Map<String, serde_json::Value>, ExtractionError> {
    let object = |value: serde_json::Value| match value {
        serde_json::Value::Object(map) => Some(map),
        _ => None,
    };

    if let Ok(value) = serde_json::from_str(response.trim()) {
        if let Some(map) = object(value) {
            return Ok(map);
        }
    }

    let repaired = repair_response(response);
    serde_json::from_str(repaired.trim())
        .ok()
        .and_then(object)
        .ok_or_else(|| {
            ExtractionError::Malformed(response.chars().take(200).collect::<String>())
        })
}

/// Strip markdown fences, then fall back to the outermost brace span.
fn repair_response(response: &str) -> String {
    let stripped = if response.contains("```json") {
        response
            .split("```json")
            .nth(1)
            .and_then(|s| s.split("```").next())
            .unwrap_or(response)
    } else if response.contains("```") {
        response.split("```").nth(1).unwrap_or(response)
    } else {
        response
    };

    match (stripped.find('{'), stripped.rfind('}')) {
        (Some(start), Some(end)) if start < end => stripped[start..=end].to_string(),
        _ => stripped.to_string(),
    }
}

/// Filter unknown paths and coerce each value to its field type.
///
/// The service may answer with nested objects despite the flat-key
/// instruction; nesting is flattened back to dotted paths before filtering.
fn coerce_record(parsed: serde_json::Map<String, serde_json::Value>, schema: &Schema) -> Record {
    let mut flat = Vec::new();
    flatten_object(String::new(), parsed, &mut flat);

    let mut record = Record::new();
    for (path, value) in flat {
        let Some(field) = schema.field(&path) else {
            debug!("Discarding unknown path from response: {}", path);
            continue;
        };
        if value.is_null() {
            continue;
        }
        match coerce_value(field, &value) {
            Some(coerced) => record.set(&path, coerced),
            None => {
                warn!("Coercion failed for '{}', nulling field: {:?}", path, value);
                record.set(&path, serde_json::Value::Null);
            }
        }
    }
    record
}

fn flatten_object(
    prefix: String,
    map: serde_json::Map<String, serde_json::Value>,
    out: &mut Vec<(String, serde_json::Value)>,
) {
    for (key, value) in map {
        let path = if prefix.is_empty() {
            key
        } else {
            format!("{}.{}", prefix, key)
        };
        match value {
            serde_json::Value::Object(inner) => flatten_object(path, inner, out),
            other => out.push((path, other)),
        }
    }
}

/// Coerce one value to a field's type. `None` means the value is unusable.
/// Shared with the validator so reconciled values land in the same shape as
/// extracted ones.
pub(crate) fn coerce_value(field: &FieldDef, value: &serde_json::Value) -> Option<serde_json::Value> {
    use serde_json::Value;

    match field.field_type {
        FieldType::Text => match value {
            Value::String(s) => {
                // Phone-hinted fields land in the same bare-digit shape the
                // signal extractor produces; a value without a valid phone in
                // it is unusable and gets nulled into reconciliation.
                if field.signal == Some(crate::schema::SignalKind::Phone) {
                    let digits = crate::signals::normalize_phone(s);
                    if digits.len() == 10 && matches!(digits.as_bytes()[0], b'6'..=b'9') {
                        Some(Value::String(digits))
                    } else {
                        None
                    }
                } else {
                    Some(Value::String(s.trim().to_string()))
                }
            }
            Value::Number(n) => Some(Value::String(n.to_string())),
            Value::Bool(b) => Some(Value::String(b.to_string())),
            _ => None,
        },
        FieldType::Date => value
            .as_str()
            .and_then(signals::normalize_date)
            .map(Value::String),
        FieldType::Time => value
            .as_str()
            .and_then(signals::normalize_time)
            .map(Value::String),
        FieldType::Number => match value {
            Value::Number(_) => Some(value.clone()),
            Value::String(s) => {
                let cleaned = s.replace([',', ' '], "");
                cleaned
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
            }
            _ => None,
        },
        FieldType::Enum => value.as_str().and_then(|s| {
            field
                .options
                .iter()
                .find(|o| o.eq_ignore_ascii_case(s.trim()))
                .map(|o| Value::String(o.clone()))
        }),
        FieldType::List => {
            let items: Vec<String> = match value {
                Value::Array(items) => items
                    .iter()
                    .filter_map(|v| match v {
                        Value::String(s) => Some(s.trim().to_string()),
                        Value::Number(n) => Some(n.to_string()),
                        _ => None,
                    })
                    .filter(|s| !s.is_empty())
                    .collect(),
                Value::String(s) if !s.trim().is_empty() => vec![s.trim().to_string()],
                _ => return None,
            };
            let mut seen = std::collections::HashSet::new();
            let deduped: Vec<Value> = items
                .into_iter()
                .filter(|s| seen.insert(s.to_lowercase()))
                .map(Value::String)
                .collect();
            Some(Value::Array(deduped))
        }
    }
}
