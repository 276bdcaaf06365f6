use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use calamine::{open_workbook, Data, Reader, Xlsx};
use tracing::{info, warn};

use crate::job::{Job, JobId};

/// Load an input file into a job: SHA-256 of the raw bytes for identity,
/// one optional URL per data row.
///
/// `.xlsx`/`.xls` and `.csv` are tables whose first row is a header; the
/// URL column is the leftmost one mentioning "http" in a data cell, with
/// the first column as fallback. Anything else is read as one URL per
/// line. Trailing blank rows are dropped, interior ones kept.
pub fn load_job(path: &Path) -> Result<Job> {
    let bytes = fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let id = JobId::from_bytes(&bytes);

    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();

    let mut rows = match ext.as_str() {
        "xlsx" | "xls" => extract_url_column(load_xlsx(path)?),
        "csv" => extract_url_column(load_csv(&bytes)?),
        _ => load_lines(&bytes),
    };
    while rows.last().is_some_and(|r| r.is_none()) {
        rows.pop();
    }

    info!(
        "loaded {} rows from {} (job {})",
        rows.len(),
        path.display(),
        id
    );
    Ok(Job::new(id, rows))
}

fn load_xlsx(path: &Path) -> Result<Vec<Vec<Option<String>>>> {
    let mut workbook: Xlsx<_> =
        open_workbook(path).with_context(|| format!("opening workbook {}", path.display()))?;
    let sheets = workbook.worksheets();
    let Some((name, range)) = sheets.first() else {
        warn!("workbook {} has no sheets", path.display());
        return Ok(Vec::new());
    };
    info!("reading sheet {:?} ({} rows)", name, range.height());

    let mut table = Vec::with_capacity(range.height());
    for row in range.rows() {
        table.push(
            row.iter()
                .map(|cell| match cell {
                    Data::Empty => None,
                    other => normalize_cell(&other.to_string()),
                })
                .collect(),
        );
    }
    Ok(table)
}

fn load_csv(bytes: &[u8]) -> Result<Vec<Vec<Option<String>>>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(bytes);

    let mut table = Vec::new();
    for record in rdr.records() {
        let record = record.context("parsing csv row")?;
        table.push(record.iter().map(normalize_cell).collect());
    }
    Ok(table)
}

fn load_lines(bytes: &[u8]) -> Vec<Option<String>> {
    String::from_utf8_lossy(bytes)
        .lines()
        .map(normalize_cell)
        .collect()
}

/// First row is the header. The URL column is the leftmost one whose data
/// cells mention "http"; when none does, fall back to the first column.
fn extract_url_column(table: Vec<Vec<Option<String>>>) -> Vec<Option<String>> {
    if table.len() < 2 {
        return Vec::new();
    }
    let width = table.iter().map(|r| r.len()).max().unwrap_or(0);
    let data = &table[1..];

    let url_col = (0..width).find(|&c| {
        data.iter().any(|row| {
            row.get(c)
                .and_then(|cell| cell.as_deref())
                .is_some_and(|v| v.to_ascii_lowercase().contains("http"))
        })
    });
    let col = match url_col {
        Some(c) => c,
        None => {
            warn!("no column containing URLs detected, using the first column");
            0
        }
    };

    data.iter().map(|row| row.get(col).cloned().flatten()).collect()
}

fn normalize_cell(s: &str) -> Option<String> {
    let t = s.trim();
    if t.is_empty() {
        None
    } else {
        Some(t.to_string())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
