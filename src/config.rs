use clap::ValueEnum;

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_WORKERS: usize = 1;
pub const DEFAULT_TIMEOUT_SECS: u64 = 20;
pub const DEFAULT_COMPANY: &str = "Swagelok";
pub const DEFAULT_CHECKPOINT_DIR: &str = "checkpoints";

/// Which of several UNSPSC rows tied on the maximum version wins.
/// `Last` is the value confirmed correct against live product pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum TieBreak {
    First,
    Last,
}

/// Which part-number candidate wins when the page and the URL disagree
/// after normalization. On agreement the page-derived formatting is always
/// kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum PartPrecedence {
    Url,
    Page,
}

/// Checkpoint backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum StoreKind {
    Files,
    Sqlite,
}
