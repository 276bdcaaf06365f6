use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use tracing::info;

use crate::record::Record;

const COLUMNS: [&str; 8] = [
    "Row",
    "Part",
    "Company",
    "URL",
    "UNSPSC Feature (Latest)",
    "UNSPSC Code",
    "Status",
    "Error",
];

/// Write records as CSV. The final format drops the Row, Status, and
/// Error columns, leaving only the deliverable fields.
pub fn write_csv(path: &Path, records: &[Record], final_format: bool) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)
        .with_context(|| format!("creating {}", path.display()))?;

    let keep = if final_format { 1..6 } else { 0..COLUMNS.len() };
    wtr.write_record(&COLUMNS[keep.clone()])?;
    for r in records {
        let row = r.row.to_string();
        let status = r.status.to_string();
        let full = [
            row.as_str(),
            r.part.as_str(),
            r.company.as_str(),
            r.url.as_str(),
            r.unspsc_feature.as_str(),
            r.unspsc_code.as_str(),
            status.as_str(),
            r.error.as_str(),
        ];
        wtr.write_record(&full[keep.clone()])?;
    }
    wtr.flush()?;
    info!("wrote {} records to {}", records.len(), path.display());
    Ok(())
}

/// Timestamped output name in the working directory.
pub fn default_path(final_format: bool) -> PathBuf {
    let kind = if final_format { "final" } else { "results" };
    PathBuf::from(format!(
        "unspsc_{}_{}.csv",
        kind,
        Local::now().format("%Y%m%d_%H%M%S")
    ))
}

// ── Tests ──────────────────────────────────────────────────────────
