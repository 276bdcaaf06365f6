use std::sync::LazyLock;

use regex::Regex;

use crate::config::TieBreak;

use super::document::PageDoc;

static VERSION_IN_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)UNSPSC\s*\(([\d.]+)\)").unwrap());

static CODE_CELL: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\d{6,8}$").unwrap());

static TEXT_PAIR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)UNSPSC\s*\((\d[\d.]*)\)\s*[^0-9]*?(\d{6,8})").unwrap());

/// One UNSPSC row as found on the page; scan functions yield these in
/// document order, which is what the tie-break policies rank on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnspscEntry {
    pub feature: String,
    pub code: String,
    pub version: Vec<u32>,
}

/// `"17.1001"` → `[17, 1001]`, compared lexicographically. Never a float:
/// `[17, 2] < [17, 1001]` and `[17, 1] < [17, 10]`. Anything unparsable
/// collapses to `[0]`.
pub fn parse_version(s: &str) -> Vec<u32> {
    let parts: Option<Vec<u32>> = s.split('.').map(|p| p.parse::<u32>().ok()).collect();
    match parts {
        Some(v) if !v.is_empty() => v,
        _ => vec![0],
    }
}

/// Table rows whose first cell names a versioned UNSPSC and whose second
/// cell is a bare 6-8 digit code.
fn from_tables(page: &PageDoc) -> Vec<UnspscEntry> {
    let mut entries = Vec::new();
    for (label, value) in page.table_rows() {
        let Some(cap) = VERSION_IN_CELL.captures(&label) else {
            continue;
        };
        let version = parse_version(&cap[1]);
        let code = value.trim();
        if !CODE_CELL.is_match(code) {
            continue;
        }
        entries.push(UnspscEntry {
            feature: label,
            code: code.to_string(),
            version,
        });
    }
    entries
}

/// Raw-text fallback for pages that render the pair outside a table.
fn from_text(text: &str) -> Vec<UnspscEntry> {
    TEXT_PAIR
        .captures_iter(text)
        .map(|cap| UnspscEntry {
            feature: format!("UNSPSC ({})", &cap[1]),
            code: cap[2].to_string(),
            version: parse_version(&cap[1]),
        })
        .collect()
}

/// Entry with the maximum version; among ties `tie_break` picks the first
/// or last occurrence in document order.
fn select(entries: &[UnspscEntry], tie_break: TieBreak) -> Option<&UnspscEntry> {
    let max = entries.iter().map(|e| &e.version).max()?;
    let mut tied = entries.iter().filter(|e| &e.version == max);
    match tie_break {
        TieBreak::First => tied.next(),
        TieBreak::Last => tied.last(),
    }
}

/// Latest (feature, code) pair for the page, if any.
pub fn resolve(page: &PageDoc, tie_break: TieBreak) -> Option<(String, String)> {
    let mut entries = from_tables(page);
    if entries.is_empty() {
        entries = from_text(&page.text());
    }
    select(&entries, tie_break).map(|e| (e.feature.clone(), e.code.clone()))
}

// ── Tests ──────────────────────────────────────────────────────────
