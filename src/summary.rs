//! Writer-facing summary of a finalized record.
//!
//! One completion call, bounded to 5-7 lines; any failure or over-length
//! reply falls back to a deterministic template over the mandatory fields.
//! Summary generation never fails the pipeline and never retries.

use crate::llm::{CompletionRequest, CompletionService};
use crate::schema::{Record, Schema};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};

const SUMMARY_TEMPERATURE: f32 = 0.3;
const SUMMARY_MAX_TOKENS: u32 = 300;
const MAX_SUMMARY_LINES: usize = 7;
const MAX_SUMMARY_CHARS: usize = 1200;

/// A generated summary and which path produced it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Summary {
    pub text: String,
    pub source: SummarySource,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummarySource {
    Llm,
    Template,
}

/// Summary generator over the completion service.
pub struct Summarizer {
    service: Arc<dyn CompletionService>,
}

impl Summarizer {
    pub fn new(service: Arc<dyn CompletionService>) -> Self {
        Self { service }
    }

    /// Summarize a finalized record. Infallible: the template is the
    /// recovery path, not a retry.
    pub async fn summarize(&self, record: &Record, schema: &Schema) -> Summary {
        let request = CompletionRequest {
            system: "You are a police report summarizer. Create concise, clear summaries."
                .to_string(),
            prompt: build_summary_prompt(record),
            temperature: SUMMARY_TEMPERATURE,
            max_tokens: SUMMARY_MAX_TOKENS,
        };

        match self.service.complete(request).await {
            Ok(response) => {
                let text = response.trim().to_string();
                if within_bounds(&text) {
                    info!("Summary generated by completion service");
                    return Summary {
                        text,
                        source: SummarySource::Llm,
                    };
                }
                warn!(
                    "Summary reply out of bounds ({} chars), using template",
                    text.chars().count()
                );
            }
            Err(e) => warn!("Summary call failed ({}), using template", e),
        }

        Summary {
            text: template_summary(record, schema),
            source: SummarySource::Template,
        }
    }
}

fn build_summary_prompt(record: &Record) -> String {
    let data = serde_json::to_string_pretty(record).unwrap_or_default();
    format!(
        "Based on the following incident report data, generate a concise 5-7 line summary \
         for police officers.\n\n\
         REPORT DATA:\n{data}\n\n\
         SUMMARY REQUIREMENTS:\n\
         1. Start with the complainant's name and identification\n\
         2. Describe the offense clearly and concisely\n\
         3. Mention the date, time, and location of the incident\n\
         4. Specify the loss or damage incurred\n\
         5. Note any available evidence or witnesses\n\n\
         Format as a single readable paragraph, not bullet points. Use active voice, present \
         facts chronologically, and do not include speculation not present in the data."
    )
}

fn within_bounds(text: &str) -> bool {
    if text.is_empty() || text.chars().count() > MAX_SUMMARY_CHARS {
        return false;
    }
    let lines = text.lines().filter(|l| !l.trim().is_empty()).count();
    lines <= MAX_SUMMARY_LINES
}

/// Deterministic fallback: the mandatory fields' labels and values joined
/// into a fixed-format paragraph.
fn template_summary(record: &Record, schema: &Schema) -> String {
    let parts: Vec<String> = schema
        .fields()
        .iter()
        .filter(|f| f.mandatory)
        .map(|f| format!("{}: {}", f.label, display_value(record.get(&f.path))))
        .collect();
    format!("Incident report. {}.", parts.join(". "))
}

fn display_value(value: Option<&serde_json::Value>) -> String {
    match value {
        Some(serde_json::Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(serde_json::Value::Number(n)) => n.to_string(),
        Some(serde_json::Value::Array(items)) if !items.is_empty() => items
            .iter()
            .map(|v| match v {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join(", "),
        _ => "not recorded".to_string(),
    }
}
