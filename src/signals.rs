//! Pattern-based signal extraction from complaint text.
//!
//! Pure functions, no async, no external calls. Signals
//! cross-check the completion service's output and fill gaps it leaves:
//! a signal never overrides a non-empty extracted value.

use std::collections::HashMap;

use chrono::{NaiveDate, NaiveTime};
use regex::Regex;
use tracing::debug;

use crate::schema::{FieldType, Record, Schema, SignalKind};

/// Ordered candidate strings per signal kind.
pub type SignalMap = HashMap<SignalKind, Vec<String>>;

/// Keyword table mapping narrative verbs to offense types.
const OFFENSE_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "theft",
        &["steal", "stole", "stolen", "theft", "thief", "snatched", "snatch", "took away"],
    ),
    (
        "robbery",
        &["rob", "robbed", "robbery", "loot", "looted", "held up", "gun point", "knife point"],
    ),
    (
        "assault",
        &["beat", "beaten", "attack", "attacked", "assault", "hurt", "injured", "wound"],
    ),
    (
        "fraud",
        &["fraud", "cheat", "cheated", "deceive", "scam", "fake", "forged", "forgery"],
    ),
    (
        "extortion",
        &["extort", "extortion", "ransom", "threaten for money"],
    ),
    (
        "harassment",
        &["harass", "harassment", "stalking", "eve teasing"],
    ),
    (
        "intimidation",
        &["threaten", "threatened", "intimidate", "intimidation", "frightened"],
    ),
];

/// Pre-compiled regex patterns for every signal kind.
pub struct SignalPatterns {
    dates: Vec<Regex>,
    times: Vec<Regex>,
    phones: Vec<Regex>,
    amounts: Vec<Regex>,
}

impl SignalPatterns {
    /// Compile the pattern set once at startup.
    pub fn compile() -> Self {
        let compile = |patterns: &[&str]| -> Vec<Regex> {
            patterns
                .iter()
                .map(|p| Regex::new(p).expect("builtin signal pattern must compile"))
                .collect()
        };

        Self {
            dates: compile(&[
                r"\b\d{4}[-/]\d{1,2}[-/]\d{1,2}\b",
                r"\b\d{1,2}[-/]\d{1,2}[-/]\d{2,4}\b",
                r"(?i)\d{1,2}(?:st|nd|rd|th)?\s+(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{4}",
                r"(?i)(?:Jan|Feb|Mar|Apr|May|Jun|Jul|Aug|Sep|Oct|Nov|Dec)[a-z]*\s+\d{1,2}(?:st|nd|rd|th)?,?\s+\d{4}",
            ]),
            times: compile(&[
                r"(?i)\d{1,2}:\d{2}\s*(?:AM|PM)?",
                r"(?i)\b\d{1,2}\s*(?:AM|PM)\b",
            ]),
            phones: compile(&[
                r"\+91[-\s]?[6-9]\d{9}\b",
                r"\b[6-9]\d{9}\b",
                r"\b0\d{2,4}[-\s]?\d{6,8}\b",
            ]),
            amounts: compile(&[
                r"(?i)(?:Rs\.?|₹|INR)\s*(\d+(?:,\d+)*(?:\.\d+)?)(\s*(?:lakh|lakhs))?",
                r"(?i)(\d+(?:,\d+)*(?:\.\d+)?)(\s*(?:lakh|lakhs))?\s*(?:rupees|Rs\.?|INR)",
            ]),
        }
    }

    /// Extract all signals from a complaint narrative.
    ///
    /// Candidates are returned in document order with case-insensitive
    /// duplicates removed, so "first match wins" holds for scalar fields and
    /// list fields can take every candidate.
    pub fn extract(&self, text: &str) -> SignalMap {
        let mut signals = SignalMap::new();

        let dates = collect_ordered(&self.dates, text, |raw| {
            normalize_date(raw).unwrap_or_else(|| raw.to_string())
        });
        // A "time" that doesn't normalize (e.g. the "30 PM" tail of "8:30 PM"
        // matched by the bare-hour pattern) is noise, not a candidate.
        let times = collect_ordered(&self.times, text, |raw| {
            normalize_time(raw).unwrap_or_default()
        });
        let phones = collect_ordered(&self.phones, text, normalize_phone);
        let amounts = self.extract_amounts(text);
        let offenses = extract_offenses(text);

        for (kind, values) in [
            (SignalKind::Date, dates),
            (SignalKind::Time, times),
            (SignalKind::Phone, phones),
            (SignalKind::Amount, amounts),
            (SignalKind::Offense, offenses),
        ] {
            if !values.is_empty() {
                signals.insert(kind, values);
            }
        }

        debug!("Extracted signals for {} kinds", signals.len());
        signals
    }

    fn extract_amounts(&self, text: &str) -> Vec<String> {
        let mut hits: Vec<(usize, String)> = Vec::new();

        for regex in &self.amounts {
            for cap in regex.captures_iter(text) {
                let whole = cap.get(0).expect("capture 0 always present");
                let digits = match cap.get(1) {
                    Some(m) => m.as_str().replace(',', ""),
                    None => continue,
                };
                let Ok(mut amount) = digits.parse::<f64>() else {
                    continue;
                };
                if cap.get(2).is_some() {
                    amount *= 100_000.0;
                }
                let formatted = if amount.fract() == 0.0 {
                    format!("{}", amount as i64)
                } else {
                    format!("{}", amount)
                };
                hits.push((whole.start(), formatted));
            }
        }

        dedup_ordered(hits)
    }
}

/// Match offense types by keyword, ordered by first keyword occurrence.
fn extract_offenses(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut hits: Vec<(usize, String)> = Vec::new();

    for (offense, keywords) in OFFENSE_KEYWORDS {
        let first = keywords.iter().filter_map(|k| lower.find(k)).min();
        if let Some(pos) = first {
            hits.push((pos, offense.to_string()));
        }
    }

    dedup_ordered(hits)
}

/// Run several patterns over the text, normalize each match, and return the
/// values in document order with case-insensitive duplicates removed.
fn collect_ordered(
    patterns: &[Regex],
    text: &str,
    normalize: impl Fn(&str) -> String,
) -> Vec<String> {
    let mut hits: Vec<(usize, String)> = Vec::new();

    for regex in patterns {
        for m in regex.find_iter(text) {
            let value = normalize(m.as_str().trim());
            if !value.is_empty() {
                hits.push((m.start(), value));
            }
        }
    }

    dedup_ordered(hits)
}

fn dedup_ordered(mut hits: Vec<(usize, String)>) -> Vec<String> {
    hits.sort_by_key(|(pos, _)| *pos);
    let mut seen = std::collections::HashSet::new();
    hits.retain(|(_, v)| seen.insert(v.to_lowercase()));
    hits.into_iter().map(|(_, v)| v).collect()
}

/// Normalize a date string to YYYY-MM-DD. Day-first is assumed for numeric
/// forms. Returns `None` when no known format matches.
pub fn normalize_date(raw: &str) -> Option<String> {
    let cleaned = strip_ordinal_suffixes(raw.trim());
    let formats = [
        "%Y-%m-%d", "%Y/%m/%d", "%d-%m-%Y", "%d/%m/%Y", "%d-%m-%y", "%d/%m/%y", "%d %B %Y",
        "%d %b %Y", "%B %d, %Y", "%b %d, %Y", "%B %d %Y", "%b %d %Y",
    ];
    for format in formats {
        if let Ok(date) = NaiveDate::parse_from_str(&cleaned, format) {
            return Some(date.format("%Y-%m-%d").to_string());
        }
    }
    None
}

/// Normalize a time string to 24-hour HH:MM. Returns `None` when no known
/// format matches.
pub fn normalize_time(raw: &str) -> Option<String> {
    let cleaned = raw.trim().to_uppercase();
    let formats = ["%I:%M %p", "%I:%M%p", "%H:%M:%S", "%H:%M", "%I %p", "%I%p"];
    for format in formats {
        if let Ok(time) = NaiveTime::parse_from_str(&cleaned, format) {
            return Some(time.format("%H:%M").to_string());
        }
    }
    None
}

/// Normalize a phone match to its bare digits, keeping the last 10 when a
/// country code is present.
pub fn normalize_phone(raw: &str) -> String {
    let digits: String = raw.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}

fn strip_ordinal_suffixes(s: &str) -> String {
    // "15th January 2025" -> "15 January 2025"
    let re = Regex::new(r"(?i)\b(\d{1,2})(?:st|nd|rd|th)\b").expect("ordinal pattern");
    re.replace_all(s, "$1").into_owned()
}

/// Fill gaps in a record from extracted signals.
///
/// Only fields carrying a signal hint participate. A non-empty value is
/// never overwritten; scalar fields take the first candidate in document
/// order, list fields take all candidates.
pub fn apply_signals(record: &mut Record, schema: &Schema, signals: &SignalMap) {
    for field in schema.fields() {
        let Some(kind) = field.signal else { continue };
        if !record.is_missing(&field.path) {
            continue;
        }
        let Some(candidates) = signals.get(&kind) else {
            continue;
        };
        if candidates.is_empty() {
            continue;
        }

        let value = match field.field_type {
            FieldType::List => serde_json::Value::Array(
                candidates
                    .iter()
                    .map(|c| serde_json::Value::String(c.clone()))
                    .collect(),
            ),
            FieldType::Number => match candidates[0].parse::<f64>() {
                Ok(n) => serde_json::Number::from_f64(n)
                    .map(serde_json::Value::Number)
                    .unwrap_or(serde_json::Value::Null),
                Err(_) => continue,
            },
            FieldType::Enum => {
                let matched = field
                    .options
                    .iter()
                    .find(|o| candidates.iter().any(|c| c.eq_ignore_ascii_case(o)));
                match matched {
                    Some(option) => serde_json::Value::String(option.clone()),
                    None => continue,
                }
            }
            _ => serde_json::Value::String(candidates[0].clone()),
        };

        if !crate::schema::value_is_empty(&value) {
            debug!("Signal fill: {} <- {:?}", field.path, value);
            record.set(&field.path, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::testing;
    use serde_json::json;

    const SAMPLE: &str = "I am Rajesh Kumar, residing at 45 MG Road, Bengaluru. My phone \
         number is 9876543210. On 15th January 2025 at around 8:30 PM, two unknown persons \
         snatched my gold chain worth Rs. 50,000. They threatened me with a knife.";

    #[test]
    fn test_extract_dates() {
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract(SAMPLE);
        assert_eq!(
            signals.get(&SignalKind::Date).unwrap(),
            &vec!["2025-01-15".to_string()]
        );
    }

    #[test]
    fn test_extract_times() {
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract(SAMPLE);
        assert_eq!(
            signals.get(&SignalKind::Time).unwrap(),
            &vec!["20:30".to_string()]
        );
    }

    #[test]
    fn test_extract_phones() {
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract("Call me at +91 9876543210 or 9123456780.");
        assert_eq!(
            signals.get(&SignalKind::Phone).unwrap(),
            &vec!["9876543210".to_string(), "9123456780".to_string()]
        );
    }

    #[test]
    fn test_phone_dedup_across_patterns() {
        // +91 form and bare form of the same number collapse to one candidate
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract("Reach +91-9876543210, again 9876543210.");
        assert_eq!(
            signals.get(&SignalKind::Phone).unwrap(),
            &vec!["9876543210".to_string()]
        );
    }

    #[test]
    fn test_extract_amounts_with_lakh() {
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract("They took Rs. 2 lakh in cash and a phone worth ₹30,000.");
        assert_eq!(
            signals.get(&SignalKind::Amount).unwrap(),
            &vec!["200000".to_string(), "30000".to_string()]
        );
    }

    #[test]
    fn test_extract_offenses_in_document_order() {
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract(SAMPLE);
        assert_eq!(
            signals.get(&SignalKind::Offense).unwrap(),
            &vec!["theft".to_string(), "intimidation".to_string()]
        );
    }

    #[test]
    fn test_no_signals_in_plain_text() {
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract("Nothing of note happened here.");
        assert!(signals.is_empty());
    }

    #[test]
    fn test_normalize_date_formats() {
        assert_eq!(normalize_date("2025-01-15").as_deref(), Some("2025-01-15"));
        assert_eq!(normalize_date("15/01/2025").as_deref(), Some("2025-01-15"));
        assert_eq!(
            normalize_date("15th January 2025").as_deref(),
            Some("2025-01-15")
        );
        assert_eq!(
            normalize_date("January 15, 2025").as_deref(),
            Some("2025-01-15")
        );
        assert_eq!(normalize_date("not a date"), None);
    }

    #[test]
    fn test_normalize_time_formats() {
        assert_eq!(normalize_time("8:30 PM").as_deref(), Some("20:30"));
        assert_eq!(normalize_time("08:15").as_deref(), Some("08:15"));
        assert_eq!(normalize_time("8 am").as_deref(), Some("08:00"));
        assert_eq!(normalize_time("late evening"), None);
    }

    #[test]
    fn test_apply_signals_fills_gaps_only() {
        let schema = testing::schema();
        let patterns = SignalPatterns::compile();
        let signals = patterns.extract(SAMPLE);

        let mut record = Record::new();
        record.set("complainant.phone", json!("9000000000"));
        apply_signals(&mut record, &schema, &signals);

        // Pre-existing value untouched, gaps filled
        assert_eq!(record.get("complainant.phone").unwrap(), &json!("9000000000"));
        assert_eq!(record.get("incident.date").unwrap(), &json!("2025-01-15"));
        assert_eq!(record.get("incident.time").unwrap(), &json!("20:30"));
        assert_eq!(record.get("offense.type").unwrap(), &json!("theft"));
        assert_eq!(record.get("loss.amount").unwrap(), &json!(50000.0));
        // No signal hint on name: stays missing
        assert!(record.is_missing("complainant.name"));
    }
}
