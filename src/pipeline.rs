//! Pipeline orchestration: process, reconcile, export.
//!
//! One invocation is strictly ordered: extraction (or its signal-only
//! fallback) → validation → summary. Sessions let the caller drive the
//! reconciliation loop with repeated `reconcile` calls without re-running
//! extraction; the schema is the only shared object and is read-only.

use crate::error::{PipelineError, ValidationError};
use crate::extractor::Extractor;
use crate::format::{self, DisplayReport, ExportFormat};
use crate::llm::CompletionService;
use crate::schema::{Record, Schema};
use crate::signals::SignalPatterns;
use crate::summary::{Summarizer, Summary};
use crate::validator::{self, Delta, PipelineState};
use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

// Metadata paths stamped automatically when the schema declares them.
const SUBMITTED_AT_PATH: &str = "complaint_metadata.submission_datetime";
const CONTENT_HASH_PATH: &str = "complaint_metadata.content_hash";
const ORIGINAL_TEXT_PATH: &str = "original_text";

/// A mandatory field still awaiting a value.
#[derive(Debug, Clone, Serialize)]
pub struct MissingField {
    pub path: String,
    pub label: String,
}

/// What the caller gets back from `process` and `reconcile`.
#[derive(Debug, Clone, Serialize)]
pub struct ProcessOutcome {
    pub id: String,
    pub state: PipelineState,
    pub record: Record,
    pub missing_fields: Vec<MissingField>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<Summary>,
}

struct Session {
    record: Record,
    state: PipelineState,
    summary: Option<Summary>,
}

/// The intake pipeline and its open reconciliation sessions.
pub struct Pipeline {
    schema: Arc<Schema>,
    patterns: SignalPatterns,
    extractor: Extractor,
    summarizer: Summarizer,
    sessions: RwLock<HashMap<String, Session>>,
}

impl Pipeline {
    pub fn new(schema: Arc<Schema>, service: Arc<dyn CompletionService>) -> Self {
        Self {
            schema,
            patterns: SignalPatterns::compile(),
            extractor: Extractor::new(service.clone()),
            summarizer: Summarizer::new(service),
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    /// Run extraction over a complaint narrative and open a session.
    ///
    /// Extraction failure degrades to a signal-only record; the caller
    /// always receives a record plus the precise list of missing fields.
    pub async fn process(&self, text: &str) -> ProcessOutcome {
        let signals = self.patterns.extract(text);
        let mut record = self.extractor.extract(text, &self.schema, &signals).await;
        self.stamp_metadata(&mut record, text);

        let missing = validator::diff(&record, &self.schema);
        let id = format!("fir_{}", Uuid::new_v4().simple());

        let (state, summary) = if missing.is_empty() {
            let summary = self.summarizer.summarize(&record, &self.schema).await;
            (PipelineState::Finalized, Some(summary))
        } else {
            (PipelineState::PendingReconciliation, None)
        };

        info!(
            "Processed complaint {}: {} missing mandatory field(s)",
            id,
            missing.len()
        );

        let outcome = self.outcome(&id, state, &record, &missing, &summary);
        self.sessions.write().unwrap().insert(
            id,
            Session {
                record,
                state,
                summary,
            },
        );
        outcome
    }

    /// Merge caller-supplied values into an open session.
    ///
    /// Invalid values are rejected as a batch: nothing is merged, every
    /// offending path is named, and the caller resupplies them in one go.
    pub async fn reconcile(
        &self,
        id: &str,
        values: &Delta,
        override_existing: bool,
    ) -> Result<ProcessOutcome, PipelineError> {
        let record = {
            let sessions = self.sessions.read().unwrap();
            let session = sessions
                .get(id)
                .ok_or_else(|| PipelineError::UnknownId(id.to_string()))?;
            if session.state == PipelineState::Finalized {
                return Err(PipelineError::AlreadyFinalized);
            }
            session.record.clone()
        };

        let errors: Vec<ValidationError> = values
            .iter()
            .filter_map(|(path, value)| {
                validator::validate_value(path, value, &self.schema).err()
            })
            .collect();
        if !errors.is_empty() {
            return Err(PipelineError::InvalidValues(errors));
        }

        let merged = validator::apply(&record, values, &self.schema, override_existing)
            .map_err(|e| PipelineError::InvalidValues(vec![e]))?;
        let missing = validator::diff(&merged, &self.schema);

        let (state, summary) = if missing.is_empty() {
            let summary = self.summarizer.summarize(&merged, &self.schema).await;
            (PipelineState::Finalized, Some(summary))
        } else {
            (PipelineState::Reconciling, None)
        };

        let outcome = self.outcome(id, state, &merged, &missing, &summary);

        let mut sessions = self.sessions.write().unwrap();
        let session = sessions
            .get_mut(id)
            .ok_or_else(|| PipelineError::UnknownId(id.to_string()))?;
        session.record = merged;
        session.state = state;
        session.summary = summary;

        Ok(outcome)
    }

    /// Export a finalized record as bytes plus a content type.
    pub fn export(&self, id: &str, format: &str) -> Result<(Vec<u8>, &'static str), PipelineError> {
        let format: ExportFormat = format.parse().map_err(PipelineError::Export)?;

        let sessions = self.sessions.read().unwrap();
        let session = sessions
            .get(id)
            .ok_or_else(|| PipelineError::UnknownId(id.to_string()))?;
        if session.state != PipelineState::Finalized {
            return Err(PipelineError::NotFinalized);
        }
        let summary = session.summary.as_ref().expect("finalized implies summary");

        Ok((
            format::export(&session.record, &self.schema, summary, format),
            format.content_type(),
        ))
    }

    /// Display form of a finalized record.
    pub fn report(&self, id: &str) -> Result<DisplayReport, PipelineError> {
        let sessions = self.sessions.read().unwrap();
        let session = sessions
            .get(id)
            .ok_or_else(|| PipelineError::UnknownId(id.to_string()))?;
        if session.state != PipelineState::Finalized {
            return Err(PipelineError::NotFinalized);
        }
        let summary = session.summary.as_ref().expect("finalized implies summary");
        Ok(format::render(&session.record, &self.schema, summary))
    }

    /// Stamp submission metadata for the paths the schema declares.
    fn stamp_metadata(&self, record: &mut Record, text: &str) {
        if self.schema.contains(SUBMITTED_AT_PATH) {
            record.set(
                SUBMITTED_AT_PATH,
                serde_json::Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)),
            );
        }
        if self.schema.contains(CONTENT_HASH_PATH) {
            let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
            record.set(CONTENT_HASH_PATH, serde_json::Value::String(hash));
        }
        if self.schema.contains(ORIGINAL_TEXT_PATH) {
            record.set(
                ORIGINAL_TEXT_PATH,
                serde_json::Value::String(text.to_string()),
            );
        }
    }

    fn outcome(
        &self,
        id: &str,
        state: PipelineState,
        record: &Record,
        missing: &[String],
        summary: &Option<Summary>,
    ) -> ProcessOutcome {
        ProcessOutcome {
            id: id.to_string(),
            state,
            record: record.clone(),
            missing_fields: missing
                .iter()
                .map(|path| MissingField {
                    path: path.clone(),
                    label: self
                        .schema
                        .field(path)
                        .map(|f| f.label.clone())
                        .unwrap_or_else(|| path.clone()),
                })
                .collect(),
            summary: summary.clone(),
        }
    }
}
