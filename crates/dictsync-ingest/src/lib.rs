//! New-batch source reader: path-pattern expansion + line-delimited JSON
//! parsing with engine-style field casting.

use std::fs;
use std::path::{Path, PathBuf};

use dictsync_core::NewRecord;
use serde_json::Value as JsonValue;
use thiserror::Error;
use tracing::debug;

pub const CRATE_NAME: &str = "dictsync-ingest";

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("no source files match pattern {pattern}")]
    SourceNotFound { pattern: String },
    #[error("malformed record in {file} line {line}: {reason}")]
    MalformedRecord {
        file: PathBuf,
        line: usize,
        reason: String,
    },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A `<dir>/<file-glob>` source selector where the file component may
/// contain a single `*` wildcard, e.g. `scratch/text_values/*.json`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourcePattern {
    dir: PathBuf,
    prefix: String,
    suffix: String,
}

impl SourcePattern {
    pub fn parse(pattern: &str) -> Self {
        let path = Path::new(pattern);
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let file = path
            .file_name()
            .map(|f| f.to_string_lossy().into_owned())
            .unwrap_or_default();
        match file.split_once('*') {
            Some((prefix, suffix)) => Self {
                dir,
                prefix: prefix.to_string(),
                suffix: suffix.to_string(),
            },
            // No wildcard: the pattern names one exact file.
            None => Self {
                dir,
                prefix: file,
                suffix: String::new(),
            },
        }
    }

    fn matches(&self, file_name: &str) -> bool {
        file_name.len() >= self.prefix.len() + self.suffix.len()
            && file_name.starts_with(&self.prefix)
            && file_name.ends_with(&self.suffix)
    }

    /// Matching files in lexicographic name order, for deterministic batch
    /// assembly.
    pub fn expand(&self, pattern_text: &str) -> Result<Vec<PathBuf>, IngestError> {
        let entries = fs::read_dir(&self.dir).map_err(|source| IngestError::Io {
            path: self.dir.clone(),
            source,
        })?;

        let mut files = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| IngestError::Io {
                path: self.dir.clone(),
                source,
            })?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if entry.file_type().map(|ft| ft.is_file()).unwrap_or(false) && self.matches(&name) {
                files.push(entry.path());
            }
        }
        files.sort();

        if files.is_empty() {
            return Err(IngestError::SourceNotFound {
                pattern: pattern_text.to_string(),
            });
        }
        Ok(files)
    }
}

/// Read every file matching `pattern` as line-delimited JSON records.
///
/// Any malformed line fails the whole batch; there is no per-record
/// quarantine. A pattern matching zero files is an error, not an empty
/// batch.
pub fn read_new_batch(pattern: &str) -> Result<Vec<NewRecord>, IngestError> {
    let source = SourcePattern::parse(pattern);
    let files = source.expand(pattern)?;

    let mut records = Vec::new();
    for file in &files {
        let text = fs::read_to_string(file).map_err(|source| IngestError::Io {
            path: file.clone(),
            source,
        })?;
        let before = records.len();
        for (idx, line) in text.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            records.push(parse_record(file, idx + 1, line)?);
        }
        debug!(
            file = %file.display(),
            records = records.len() - before,
            "read source file"
        );
    }
    Ok(records)
}

fn parse_record(file: &Path, line_no: usize, line: &str) -> Result<NewRecord, IngestError> {
    let malformed = |reason: String| IngestError::MalformedRecord {
        file: file.to_path_buf(),
        line: line_no,
        reason,
    };

    let value: JsonValue =
        serde_json::from_str(line).map_err(|err| malformed(format!("invalid JSON: {err}")))?;
    let obj = value
        .as_object()
        .ok_or_else(|| malformed("record is not a JSON object".to_string()))?;

    let name = cast_string(obj.get("name"))
        .ok_or_else(|| malformed("field `name` missing or not castable to string".to_string()))?;
    let sort_order = cast_int(obj.get("sort_order")).ok_or_else(|| {
        malformed("field `sort_order` missing or not castable to integer".to_string())
    })?;
    let record_value = cast_string(obj.get("value"))
        .ok_or_else(|| malformed("field `value` missing or not castable to string".to_string()))?;

    Ok(NewRecord {
        name,
        value: record_value,
        sort_order,
    })
}

/// Engine-style cast to string: strings pass through, numbers and booleans
/// render to text, null/missing/compound values do not cast.
fn cast_string(value: Option<&JsonValue>) -> Option<String> {
    match value? {
        JsonValue::String(s) => Some(s.clone()),
        JsonValue::Number(n) => Some(n.to_string()),
        JsonValue::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Engine-style cast to a 32-bit integer: integer numbers and
/// integer-valued strings cast, everything else does not.
fn cast_int(value: Option<&JsonValue>) -> Option<i32> {
    match value? {
        JsonValue::Number(n) => n.as_i64().and_then(|v| i32::try_from(v).ok()),
        JsonValue::String(s) => s.trim().parse::<i32>().ok(),
        _ => None,
    }
}
