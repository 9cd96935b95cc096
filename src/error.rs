use std::path::PathBuf;

use chrono::NaiveDate;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum RosterError {
    #[error("snapshot for {date} is unavailable: the source returned an error body")]
    SnapshotUnavailable { date: NaiveDate },

    #[error("malformed snapshot: {reason}{}", describe_row(.row, .len))]
    MalformedSnapshot {
        reason: String,
        row: Option<String>,
        len: Option<usize>,
    },

    #[error("failed to persist snapshot to {}: {source}", .path.display())]
    CacheWriteFailure {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to read cached snapshot {}: {source}", .path.display())]
    CacheRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("fetch error: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("snapshot source answered {status} for {url}")]
    UnexpectedStatus { url: String, status: u16 },

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("failed to parse config TOML: {0}")]
    ConfigParse(#[from] toml::de::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl RosterError {
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedSnapshot {
            reason: reason.into(),
            row: None,
            len: None,
        }
    }

    pub fn malformed_row(reason: impl Into<String>, row: &csv::StringRecord) -> Self {
        Self::MalformedSnapshot {
            reason: reason.into(),
            row: Some(row.iter().collect::<Vec<_>>().join(",")),
            len: Some(row.len()),
        }
    }
}

fn describe_row(row: &Option<String>, len: &Option<usize>) -> String {
    match (row, len) {
        (Some(row), Some(len)) => format!(" (row of length {len}: {row})"),
        (Some(row), None) => format!(" (row: {row})"),
        _ => String::new(),
    }
}

pub type RosterResult<T> = Result<T, RosterError>;
