use std::fmt;
use std::ops::Range;

use sha2::{Digest, Sha256};

/// Content-derived job identity: SHA-256 of the input file bytes, so
/// re-running the same file resumes the same job and an edited file is a
/// new one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobId(String);

impl JobId {
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        JobId(hex::encode(hasher.finalize()))
    }

    /// Full hex digest.
    pub fn hex(&self) -> &str {
        &self.0
    }

    /// Prefix used in checkpoint filenames and logs.
    pub fn short(&self) -> &str {
        &self.0[..16]
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.short())
    }
}

/// One unit of resumable work: the input's identity plus its rows.
/// Row `i` (1-based) lives at `rows[i - 1]`; blank input cells are `None`.
pub struct Job {
    pub id: JobId,
    pub rows: Vec<Option<String>>,
}

impl Job {
    pub fn new(id: JobId, rows: Vec<Option<String>>) -> Self {
        Job { id, rows }
    }

    pub fn batch_count(&self, batch_size: usize) -> usize {
        batch_count(self.rows.len(), batch_size)
    }
}

pub fn batch_count(total_rows: usize, batch_size: usize) -> usize {
    total_rows.div_ceil(batch_size)
}

/// 0-based offsets into the row list covered by `batch_index`.
pub fn batch_range(batch_index: usize, batch_size: usize, total_rows: usize) -> Range<usize> {
    let start = batch_index * batch_size;
    let end = (start + batch_size).min(total_rows);
    start..end
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum JobState {
    #[default]
    NotStarted,
    Running,
    Completed,
    Interrupted,
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobState::NotStarted => "not started",
            JobState::Running => "running",
            JobState::Completed => "completed",
            JobState::Interrupted => "interrupted",
        };
        f.write_str(s)
    }
}

/// State as observable from persisted checkpoints alone.
pub fn derive_state(completed_batches: usize, total_batches: usize) -> JobState {
    if completed_batches >= total_batches {
        JobState::Completed
    } else if completed_batches == 0 {
        JobState::NotStarted
    } else {
        JobState::Interrupted
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_is_content_derived() {
        let a = JobId::from_bytes(b"url1\nurl2\n");
        let b = JobId::from_bytes(b"url1\nurl2\n");
        let c = JobId::from_bytes(b"url1\nurl2\nurl3\n");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.short().len(), 16);
        assert_eq!(a.hex().len(), 64);
        assert!(a.hex().starts_with(a.short()));
    }

    #[test]
    fn batch_math() {
        assert_eq!(batch_count(0, 100), 0);
        assert_eq!(batch_count(1, 100), 1);
        assert_eq!(batch_count(100, 100), 1);
        assert_eq!(batch_count(101, 100), 2);
        assert_eq!(batch_range(0, 100, 250), 0..100);
        assert_eq!(batch_range(1, 100, 250), 100..200);
        assert_eq!(batch_range(2, 100, 250), 200..250);
    }

    #[test]
    fn state_from_checkpoints() {
        assert_eq!(derive_state(0, 0), JobState::Completed);
        assert_eq!(derive_state(0, 4), JobState::NotStarted);
        assert_eq!(derive_state(2, 4), JobState::Interrupted);
        assert_eq!(derive_state(4, 4), JobState::Completed);
    }
}
