use serde::{Deserialize, Serialize};

use crate::identity::extract_canonical_email;

/// One fetched or loaded message, before any sender parsing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessageRecord {
    /// Provider `Date` header, or an RFC 3339 fallback
    pub date: String,
    /// Unparsed `From` header
    pub from_raw: String,
    pub subject: String,
    /// Provider-assigned message ID
    pub unique_id: String,
}

/// A message as stored in the JSON export
///
/// Field names are part of the export contract and are serialized exactly as
/// `Date`, `From`, `Canonical Email`, `Subject`, `Unique ID`.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ExportRecord {
    #[serde(rename = "Date", default, deserialize_with = "deserializers::null_as_empty")]
    pub date: String,
    #[serde(rename = "From", default, deserialize_with = "deserializers::null_as_empty")]
    pub from: String,
    #[serde(
        rename = "Canonical Email",
        default,
        deserialize_with = "deserializers::null_as_empty"
    )]
    pub canonical_email: String,
    #[serde(rename = "Subject", default, deserialize_with = "deserializers::null_as_empty")]
    pub subject: String,
    #[serde(rename = "Unique ID", default, deserialize_with = "deserializers::null_as_empty")]
    pub unique_id: String,
}

impl ExportRecord {
    /// Column order used when an export is flattened to CSV
    pub const FIELDS: [&'static str; 5] = ["Date", "From", "Canonical Email", "Subject", "Unique ID"];

    /// Canonicalize a raw record, running the identity extractor exactly once
    pub fn from_raw(raw: RawMessageRecord) -> Self {
        let canonical_email = extract_canonical_email(&raw.from_raw);
        Self {
            date: raw.date,
            from: raw.from_raw,
            canonical_email,
            subject: raw.subject,
            unique_id: raw.unique_id,
        }
    }
}

impl From<RawMessageRecord> for ExportRecord {
    fn from(raw: RawMessageRecord) -> Self {
        Self::from_raw(raw)
    }
}

/// Anything the aggregator can group by sender
pub trait CanonicalRecord {
    /// Canonical sender email; empty means "not determined"
    fn canonical_email(&self) -> &str;
    /// Original, unparsed `From` value
    fn from_raw(&self) -> &str;
    fn subject(&self) -> &str;
}

impl CanonicalRecord for ExportRecord {
    fn canonical_email(&self) -> &str {
        &self.canonical_email
    }

    fn from_raw(&self) -> &str {
        &self.from
    }

    fn subject(&self) -> &str {
        &self.subject
    }
}

/// Per-sender total for the ranking report
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SenderRanking {
    #[serde(rename = "Count")]
    pub count: usize,
    #[serde(rename = "Email")]
    pub canonical_email: String,
}

/// A message row joined with its sender's full-population count
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AnnotatedRecord {
    #[serde(rename = "Count")]
    pub count: usize,
    #[serde(rename = "Email")]
    pub canonical_email: String,
    #[serde(rename = "From")]
    pub from_raw: String,
    #[serde(rename = "Subject")]
    pub subject: String,
}

/// Custom deserializers for export files
pub mod deserializers {
    use serde::{Deserialize, Deserializer};

    /// Treat JSON `null` as an empty string
    pub fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
    where
        D: Deserializer<'de>,
    {
        let opt: Option<String> = Option::deserialize(deserializer)?;
        Ok(opt.unwrap_or_default())
    }
}
