use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer};

use super::domain::{
    Candidate, CandidateAttributes, CandidateMetadata, Channel, ContextEntry, ContextKind,
    Subject, SubjectKind,
};

/// Values applied to every candidate built from one connector export.
#[derive(Debug, Clone)]
pub struct IngestDefaults {
    pub ttl_days: i64,
    pub source_connector_id: String,
    pub workflow_execution_id: String,
}

/// Row the pipeline could not turn into a candidate; reported, not fatal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedRow {
    pub line: usize,
    pub reason: String,
}

/// Outcome of parsing one export: usable candidates plus skipped rows.
#[derive(Debug, Default)]
pub struct IngestReport {
    pub candidates: Vec<Candidate>,
    pub skipped: Vec<SkippedRow>,
}

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error("failed to open batch export: {0}")]
    Io(#[from] std::io::Error),
}

/// Builds candidates from connector batch exports (CSV).
pub struct BatchRecordImporter;

impl BatchRecordImporter {
    pub fn from_path(
        path: impl AsRef<Path>,
        defaults: &IngestDefaults,
    ) -> Result<IngestReport, IngestError> {
        let file = std::fs::File::open(path)?;
        Ok(Self::from_reader(file, defaults))
    }

    /// Parse rows, collecting malformed or invalid ones as skipped entries.
    pub fn from_reader<R: Read>(reader: R, defaults: &IngestDefaults) -> IngestReport {
        let mut csv_reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let mut report = IngestReport::default();

        for (index, record) in csv_reader.deserialize::<IngestRow>().enumerate() {
            // Header occupies line 1; data rows start at line 2.
            let line = index + 2;
            match record {
                Ok(row) => match build_candidate(row, defaults) {
                    Ok(candidate) => report.candidates.push(candidate),
                    Err(reason) => report.skipped.push(SkippedRow { line, reason }),
                },
                Err(err) => report.skipped.push(SkippedRow {
                    line,
                    reason: err.to_string(),
                }),
            }
        }

        report
    }
}

#[derive(Debug, Deserialize)]
struct IngestRow {
    #[serde(rename = "Customer ID")]
    customer_id: String,
    #[serde(rename = "Program")]
    program: String,
    #[serde(rename = "Marketplace")]
    marketplace: String,
    #[serde(rename = "Subject Kind")]
    subject_kind: String,
    #[serde(rename = "Subject ID")]
    subject_id: String,
    #[serde(rename = "Event Date")]
    event_date: String,
    #[serde(rename = "Order Value", default, deserialize_with = "empty_string_as_none")]
    order_value: Option<String>,
    #[serde(rename = "Channels")]
    channels: String,
    #[serde(rename = "Media Eligible", default, deserialize_with = "empty_string_as_none")]
    media_eligible: Option<String>,
}

fn build_candidate(row: IngestRow, defaults: &IngestDefaults) -> Result<Candidate, String> {
    let subject_kind = SubjectKind::from_str(&row.subject_kind)?;
    let event_date = parse_timestamp(&row.event_date)
        .ok_or_else(|| format!("unparseable event date '{}'", row.event_date))?;

    let mut channel_eligibility = BTreeMap::new();
    for token in row.channels.split(['|', ',']) {
        let token = token.trim();
        if token.is_empty() {
            continue;
        }
        let channel = Channel::from_str(token)?;
        channel_eligibility.insert(channel, true);
    }

    let order_value = match row.order_value.as_deref() {
        Some(raw) => Some(
            raw.parse::<f64>()
                .map_err(|_| format!("unparseable order value '{raw}'"))?,
        ),
        None => None,
    };

    let media_eligible = row
        .media_eligible
        .as_deref()
        .map(|raw| matches!(raw.to_ascii_lowercase().as_str(), "true" | "yes" | "1"));

    let candidate = Candidate {
        customer_id: row.customer_id,
        context: vec![
            ContextEntry::new(ContextKind::Program, row.program),
            ContextEntry::new(ContextKind::Marketplace, row.marketplace),
        ],
        subject: Subject {
            kind: subject_kind,
            id: row.subject_id,
            metadata: None,
        },
        scores: None,
        attributes: CandidateAttributes {
            event_date,
            delivery_date: None,
            timing_window: None,
            order_value,
            media_eligible,
            channel_eligibility,
        },
        metadata: CandidateMetadata::for_new_candidate(
            defaults.ttl_days,
            defaults.source_connector_id.clone(),
            defaults.workflow_execution_id.clone(),
        ),
        rejection_history: Vec::new(),
    };

    candidate.validate().map_err(|err| err.to_string())?;
    Ok(candidate)
}

fn empty_string_as_none<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let opt = Option::<String>::deserialize(deserializer)?;
    Ok(opt.filter(|value| !value.trim().is_empty()))
}

fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }

    if let Ok(timestamp) = DateTime::parse_from_rfc3339(trimmed) {
        return Some(timestamp.with_timezone(&Utc));
    }

    if let Ok(date) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
        return date
            .and_hms_opt(0, 0, 0)
            .map(|datetime| datetime.and_utc());
    }

    None
}
