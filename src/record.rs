use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Sentinel for fields the resolver could not extract.
pub const NOT_FOUND: &str = "Not Found";

/// Terminal outcome of processing one input row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum Status {
    Success,
    InvalidUrl,
    HttpError(u16),
    Timeout,
    Error,
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Status::Success => write!(f, "Success"),
            Status::InvalidUrl => write!(f, "Invalid URL"),
            Status::HttpError(code) => write!(f, "HTTP {}", code),
            Status::Timeout => write!(f, "Timeout"),
            Status::Error => write!(f, "Error"),
        }
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Success" => Ok(Status::Success),
            "Invalid URL" => Ok(Status::InvalidUrl),
            "Timeout" => Ok(Status::Timeout),
            "Error" => Ok(Status::Error),
            _ => match s.strip_prefix("HTTP ") {
                Some(code) => code
                    .parse::<u16>()
                    .map(Status::HttpError)
                    .map_err(|_| format!("bad status code in {:?}", s)),
                None => Err(format!("unknown status {:?}", s)),
            },
        }
    }
}

impl From<Status> for String {
    fn from(s: Status) -> String {
        s.to_string()
    }
}

impl TryFrom<String> for Status {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

/// One processed row. Immutable once written to a checkpoint; field values
/// are flat strings (missing extractions carry the `Not Found` sentinel) so
/// consumers compare with plain equality.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub row: usize,
    pub url: String,
    pub part: String,
    pub company: String,
    pub unspsc_feature: String,
    pub unspsc_code: String,
    pub status: Status,
    pub error: String,
}

// ── Tests ──────────────────────────────────────────────────────────
