//! Rendering and export of finalized records.
//!
//! Pure transformations over the record, schema, and summary. The only
//! failure mode is an unsupported export format.

use crate::error::ExportError;
use crate::schema::{value_is_empty, Record, Schema};
use crate::summary::Summary;
use serde::Serialize;
use std::str::FromStr;

/// Supported export formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Json,
    TextReport,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "text" | "text-report" | "txt" => Ok(Self::TextReport),
            other => Err(ExportError::UnsupportedFormat(other.to_string())),
        }
    }
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Json => "application/json",
            Self::TextReport => "text/plain; charset=utf-8",
        }
    }
}

/// Display form of a record: labeled rows grouped into sections in schema
/// order, empty paths omitted.
#[derive(Debug, Clone, Serialize)]
pub struct DisplayReport {
    pub sections: Vec<Section>,
    pub summary: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Section {
    pub title: String,
    pub rows: Vec<Row>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Row {
    pub path: String,
    pub label: String,
    pub value: serde_json::Value,
}

/// Group non-empty fields by their root path segment, in schema order.
pub fn render(record: &Record, schema: &Schema, summary: &Summary) -> DisplayReport {
    let mut sections: Vec<Section> = Vec::new();

    for field in schema.fields() {
        let Some(value) = record.get(&field.path) else {
            continue;
        };
        if value_is_empty(value) {
            continue;
        }

        let root = field.path.split('.').next().unwrap_or(&field.path);
        let title = root.replace('_', " ");
        match sections.iter_mut().find(|s| s.title == title) {
            Some(section) => section.rows.push(row(field, value)),
            None => sections.push(Section {
                title,
                rows: vec![row(field, value)],
            }),
        }
    }

    DisplayReport {
        sections,
        summary: summary.text.clone(),
    }
}

fn row(field: &crate::schema::FieldDef, value: &serde_json::Value) -> Row {
    Row {
        path: field.path.clone(),
        label: field.label.clone(),
        value: value.clone(),
    }
}

/// Serialize the record and summary for download.
pub fn export(
    record: &Record,
    schema: &Schema,
    summary: &Summary,
    format: ExportFormat,
) -> Vec<u8> {
    match format {
        ExportFormat::Json => export_json(record, summary),
        ExportFormat::TextReport => export_text(record, schema, summary),
    }
}

/// JSON export: the schema-path-keyed record plus the summary, one
/// self-contained artifact.
fn export_json(record: &Record, summary: &Summary) -> Vec<u8> {
    let doc = serde_json::json!({
        "record": record,
        "summary": summary.text,
    });
    let mut bytes = serde_json::to_vec_pretty(&doc).expect("record serializes");
    bytes.push(b'\n');
    bytes
}

/// Text-report sections in fixed order: metadata, complainant, incident,
/// offense, then the summary.
const TEXT_SECTIONS: &[(&str, &[&str])] = &[
    ("METADATA", &["complaint_metadata", "metadata"]),
    ("COMPLAINANT", &["complainant"]),
    ("INCIDENT", &["incident"]),
    ("OFFENSE", &["offense", "offense_details"]),
];

fn export_text(record: &Record, schema: &Schema, summary: &Summary) -> Vec<u8> {
    let mut out = String::from("INCIDENT REPORT\n=====================================\n");

    for (title, roots) in TEXT_SECTIONS {
        let rows: Vec<String> = schema
            .fields()
            .iter()
            .filter(|f| {
                let root = f.path.split('.').next().unwrap_or(&f.path);
                roots.contains(&root)
            })
            // Mandatory fields always appear; metadata rows only when filled.
            .filter(|f| f.mandatory || !record.is_missing(&f.path))
            .map(|f| {
                format!(
                    "{}: {}",
                    f.label,
                    text_value(record.get(&f.path))
                )
            })
            .collect();

        if rows.is_empty() {
            continue;
        }
        out.push_str(&format!("\n{title}\n"));
        for line in rows {
            out.push_str("  ");
            out.push_str(&line);
            out.push('\n');
        }
    }

    out.push_str("\nSUMMARY\n");
    out.push_str(&summary.text);
    out.push('\n');
    out.into_bytes()
}

fn text_value(value: Option<&serde_json::Value>) -> String {
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing;
    use crate::summary::{Summary, SummarySource};
    use serde_json::json;

    fn summary() -> Summary {
        Summary {
            text: "Asha reported a theft on 2025-01-15.".to_string(),
            source: SummarySource::Template,
        }
    }

    fn finalized_record() -> Record {
        let mut record = Record::new();
        record.set("complainant.name", json!("Asha"));
        record.set("complainant.phone", json!("9876543210"));
        record.set("incident.date", json!("2025-01-15"));
        record.set("offense.type", json!("theft"));
        record.set("witnesses", json!(["Ravi", "Meena"]));
        record
    }

    #[test]
    fn test_format_parsing() {
        assert_eq!("json".parse::<ExportFormat>().unwrap(), ExportFormat::Json);
        assert_eq!(
            "text-report".parse::<ExportFormat>().unwrap(),
            ExportFormat::TextReport
        );
        assert!(matches!(
            "xml".parse::<ExportFormat>(),
            Err(ExportError::UnsupportedFormat(f)) if f == "xml"
        ));
    }

    #[test]
    fn test_json_export_round_trip() {
        let record = finalized_record();
        let bytes = export(&record, &testing::schema(), &summary(), ExportFormat::Json);

        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        let round_tripped: Record =
            serde_json::from_value(parsed["record"].clone()).unwrap();
        assert_eq!(round_tripped, record);
        assert_eq!(parsed["summary"], json!(summary().text));
    }

    #[test]
    fn test_text_report_section_order() {
        let record = finalized_record();
        let bytes = export(&record, &testing::schema(), &summary(), ExportFormat::TextReport);
        let report = String::from_utf8(bytes).unwrap();

        let complainant = report.find("COMPLAINANT").unwrap();
        let incident = report.find("INCIDENT\n").unwrap();
        let offense = report.find("OFFENSE").unwrap();
        let summary_pos = report.find("SUMMARY").unwrap();
        assert!(complainant < incident && incident < offense && offense < summary_pos);
        assert!(report.contains("Complainant Name: Asha"));
        assert!(report.contains("Incident Date: 2025-01-15"));
    }

    #[test]
    fn test_text_report_marks_unfilled_mandatory() {
        let mut record = finalized_record();
        record.set("incident.date", serde_json::Value::Null);
        let bytes = export(&record, &testing::schema(), &summary(), ExportFormat::TextReport);
        let report = String::from_utf8(bytes).unwrap();
        assert!(report.contains("Incident Date: not recorded"));
    }

    #[test]
    fn test_render_groups_and_skips_empty() {
        let record = finalized_record();
        let report = render(&record, &testing::schema(), &summary());

        let titles: Vec<&str> = report.sections.iter().map(|s| s.title.as_str()).collect();
        assert_eq!(titles, vec!["complainant", "incident", "offense", "witnesses"]);
        let complainant = &report.sections[0];
        assert_eq!(complainant.rows.len(), 2);
        assert_eq!(complainant.rows[0].label, "Complainant Name");
        assert_eq!(report.summary, summary().text);
    }
}
