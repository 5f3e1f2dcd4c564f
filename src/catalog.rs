//! Assessment catalog: raw CSV rows normalized into searchable documents.
//!
//! Normalization is total. Malformed fields degrade to empty values instead
//! of failing the row; only a row without a product name is dropped.

use std::collections::HashMap;
use std::io::Read;
use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

/// Stable identifier of a catalog row (its position in the source file).
pub type DocumentId = u64;

/// Content used when every labelled field of a row is blank.
const PLACEHOLDER_CONTENT: &str = "Unnamed assessment";

static FIRST_NUMBER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\d+").expect("Failed to compile number regex"));

/// One row of the source catalog. Every column is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawRow {
    pub name: Option<String>,
    pub description: Option<String>,
    pub job_levels: Option<String>,
    pub languages: Option<String>,
    pub assessment_length: Option<String>,
    pub test_types: Option<String>,
    pub downloads: Option<String>,
    pub url: Option<String>,
    pub remote_testing: Option<String>,
    pub adaptive_support: Option<String>,
    pub test_type: Option<String>,
}

/// Canonical two-value flag used for remote testing and adaptive support.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum YesNo {
    Yes,
    #[default]
    No,
}

impl YesNo {
    /// Unknown or missing values map to `No`.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(|v| v.trim().to_lowercase()).as_deref() {
            Some("yes") | Some("y") | Some("true") | Some("1") => YesNo::Yes,
            _ => YesNo::No,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            YesNo::Yes => "Yes",
            YesNo::No => "No",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DocumentMetadata {
    pub name: String,
    pub url: String,
    pub remote_testing: YesNo,
    pub adaptive_support: YesNo,
    pub test_type: String,
    /// Completion time in minutes.
    pub duration: Option<u32>,
    pub downloads: Vec<String>,
}

/// Normalized representation of one catalog assessment.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: DocumentId,
    /// Labelled text blob that gets embedded.
    pub content: String,
    pub metadata: DocumentMetadata,
}

/// Normalize a raw row into a document.
///
/// Returns `None` only when the row has no identifiable product name.
pub fn normalize(id: DocumentId, row: &RawRow) -> Option<Document> {
    let name = field(&row.name);
    if name.is_empty() {
        return None;
    }

    let downloads = parse_downloads(row.downloads.as_deref());
    let completion_time = completion_time(row.assessment_length.as_deref());
    let duration = completion_time.as_deref().and_then(parse_minutes);

    let sections = [
        ("Product Name", name.clone()),
        ("Description", field(&row.description)),
        ("Job Levels", field(&row.job_levels)),
        ("Languages", field(&row.languages)),
        ("Assessment Length", field(&row.assessment_length)),
        ("Test Types", field(&row.test_types)),
        ("Downloads", downloads.join(", ")),
    ];

    let content = if sections.iter().all(|(_, value)| value.is_empty()) {
        PLACEHOLDER_CONTENT.to_string()
    } else {
        sections
            .iter()
            .map(|(label, value)| format!("{label}: {value}"))
            .collect::<Vec<_>>()
            .join("\n")
    };

    Some(Document {
        id,
        content,
        metadata: DocumentMetadata {
            name,
            url: field(&row.url),
            remote_testing: YesNo::parse(row.remote_testing.as_deref()),
            adaptive_support: YesNo::parse(row.adaptive_support.as_deref()),
            test_type: field(&row.test_type),
            duration,
            downloads,
        },
    })
}

fn field(value: &Option<String>) -> String {
    value.as_deref().map(str::trim).unwrap_or_default().to_string()
}

/// Parse the downloads column.
///
/// Accepts JSON-like text with single quotes (`['Report', 'Guide']`) or a
/// comma separated list. Anything else yields an empty list.
pub fn parse_downloads(raw: Option<&str>) -> Vec<String> {
    let raw = match raw.map(str::trim) {
        Some(raw) if !raw.is_empty() => raw,
        _ => return vec![],
    };

    match serde_json::from_str::<serde_json::Value>(&raw.replace('\'', "\"")) {
        Ok(serde_json::Value::Array(items)) => items
            .into_iter()
            .map(|item| match item {
                serde_json::Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|item| !item.is_empty())
            .collect(),
        Ok(serde_json::Value::String(s)) if !s.trim().is_empty() => vec![s.trim().to_string()],
        Ok(serde_json::Value::Number(n)) => vec![n.to_string()],
        Ok(_) => vec![],
        // bracket noise means this was meant to be structured and is broken
        Err(_) if raw.contains(['{', '}', '[', ']']) => vec![],
        Err(_) => raw
            .split(',')
            .map(|item| item.trim().to_string())
            .filter(|item| !item.is_empty())
            .collect(),
    }
}

/// Extract the completion time text from a compound `key=value` field.
pub fn completion_time(raw: Option<&str>) -> Option<String> {
    let raw = raw?.trim();
    if raw.is_empty() {
        return None;
    }

    let value = match raw.rsplit_once('=') {
        Some((_, value)) => value.trim(),
        None => raw,
    };
    Some(value.to_string())
}

fn parse_minutes(text: &str) -> Option<u32> {
    FIRST_NUMBER
        .find(text)
        .and_then(|m| m.as_str().parse::<u32>().ok())
}

/// In-memory arena of normalized documents addressed by id.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    documents: Vec<Document>,
    positions: HashMap<DocumentId, usize>,
    dropped: usize,
}

impl Catalog {
    /// Build a catalog from already-normalized documents.
    pub fn from_documents(documents: Vec<Document>) -> Self {
        let positions = documents
            .iter()
            .enumerate()
            .map(|(pos, doc)| (doc.id, pos))
            .collect();

        Self {
            documents,
            positions,
            dropped: 0,
        }
    }

    /// Load and normalize a CSV catalog file.
    pub fn load_csv(path: &Path) -> anyhow::Result<Self> {
        let file = std::fs::File::open(path)
            .with_context(|| format!("failed to open catalog {}", path.display()))?;
        Self::from_reader(file)
    }

    /// Normalize every record of a CSV stream.
    ///
    /// Records that fail to decode or lack a name are counted as dropped.
    pub fn from_reader<R: Read>(reader: R) -> anyhow::Result<Self> {
        let now = Instant::now();
        let mut csv_reader = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        // validates that a header row exists at all
        csv_reader.headers().context("catalog has no header row")?;

        let mut documents = vec![];
        let mut dropped = 0;
        for (row_index, record) in csv_reader.deserialize::<RawRow>().enumerate() {
            let row = match record {
                Ok(row) => row,
                Err(e) => {
                    log::debug!("catalog row {row_index} could not be decoded: {e}");
                    dropped += 1;
                    continue;
                }
            };

            match normalize(row_index as DocumentId, &row) {
                Some(doc) => documents.push(doc),
                None => dropped += 1,
            }
        }

        if dropped > 0 {
            log::warn!("dropped {dropped} catalog rows without a usable product name");
        }
        log::info!(
            "loaded {} catalog documents in {}ms",
            documents.len(),
            now.elapsed().as_micros() as f64 / 1000.0
        );

        let mut catalog = Self::from_documents(documents);
        catalog.dropped = dropped;
        Ok(catalog)
    }

    pub fn get(&self, id: DocumentId) -> Option<&Document> {
        self.positions.get(&id).map(|&pos| &self.documents[pos])
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Number of source rows that did not produce a document.
    pub fn dropped(&self) -> usize {
        self.dropped
    }

    /// SHA256 over every document id and content, used to detect a stale
    /// persisted index.
    pub fn fingerprint(&self) -> [u8; 32] {
        use sha2::{Digest, Sha256};
        let mut hasher = Sha256::new();
        for doc in &self.documents {
            hasher.update(doc.id.to_le_bytes());
            hasher.update(doc.content.as_bytes());
        }
        hasher.finalize().into()
    }
}
