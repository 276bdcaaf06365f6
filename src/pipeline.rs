use std::collections::BTreeSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::{mpsc, Semaphore};
use tracing::{error, info};

use crate::checkpoint::CheckpointStore;
use crate::fetch::PageFetcher;
use crate::job::{batch_range, derive_state, Job, JobState};
use crate::processor::{DeduplicationSet, RecordProcessor};
use crate::record::{Record, Status, NOT_FOUND};
use crate::resolver::Resolver;

const FAILURE_DISPLAY_LIMIT: usize = 20;

/// Knobs for one run.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub batch_size: usize,
    /// 1 processes rows in order; more fans out per batch under a
    /// semaphore. Batches never overlap either way.
    pub workers: usize,
    pub company: String,
}

/// Totals reported after a run. Per-field counts cover every durable
/// record of the job, not just this run's batches.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub total_rows: usize,
    pub processed_rows: usize,
    pub batches_total: usize,
    pub batches_skipped: usize,
    pub batches_written: usize,
    pub batches_failed: usize,
    pub success: usize,
    pub parts_found: usize,
    pub unspsc_found: usize,
    pub failures: Vec<String>,
    pub state: JobState,
}

impl RunSummary {
    pub fn print(&self) {
        println!(
            "Batches: {} written, {} skipped, {} failed ({} total); job {}.",
            self.batches_written,
            self.batches_skipped,
            self.batches_failed,
            self.batches_total,
            self.state
        );
        println!(
            "Rows: {} of {} processed this run; totals: {} success, {} parts found, \
             {} UNSPSC found.",
            self.processed_rows, self.total_rows, self.success, self.parts_found,
            self.unspsc_found
        );
        if !self.failures.is_empty() {
            println!("--- Failures ({}) ---", self.failures.len());
            for line in self.failures.iter().take(FAILURE_DISPLAY_LIMIT) {
                println!("  {}", line);
            }
            if self.failures.len() > FAILURE_DISPLAY_LIMIT {
                println!("  ... and {} more", self.failures.len() - FAILURE_DISPLAY_LIMIT);
            }
        }
    }
}

/// Drives a job through fixed-size batches in strictly ascending order,
/// skipping batches the store already holds, checkpointing each one as it
/// completes.
pub struct Pipeline {
    fetcher: Arc<dyn PageFetcher>,
    resolver: Arc<Resolver>,
    store: Box<dyn CheckpointStore>,
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        resolver: Arc<Resolver>,
        store: Box<dyn CheckpointStore>,
        config: PipelineConfig,
    ) -> Self {
        Pipeline {
            fetcher,
            resolver,
            store,
            config,
        }
    }

    /// Process every incomplete batch (at most `limit` of them when given)
    /// and return the run summary plus the merged records of all durable
    /// batches.
    pub async fn run(&self, job: &Job, limit: Option<usize>) -> Result<(RunSummary, Vec<Record>)> {
        let total_rows = job.rows.len();
        let batch_size = self.config.batch_size.max(1);
        let batches_total = job.batch_count(batch_size);

        let completed = self.store.list_completed(&job.id)?;
        if completed.iter().any(|&i| i >= batches_total) {
            bail!(
                "existing checkpoints for job {} do not match this input/batch size; \
                 clear them first",
                job.id
            );
        }
        // A batch written under a different size covers different rows than
        // its index implies now; skipping it would silently drop or repeat
        // rows, so durable coverage must match the current partition.
        let durable_rows: BTreeSet<usize> =
            self.store.read_all(&job.id)?.iter().map(|r| r.row).collect();
        let expected_rows: BTreeSet<usize> = completed
            .iter()
            .flat_map(|&i| batch_range(i, batch_size, total_rows).map(|r| r + 1))
            .collect();
        if durable_rows != expected_rows {
            bail!(
                "existing checkpoints for job {} were written with a different batch size; \
                 clear them first",
                job.id
            );
        }

        let mut summary = RunSummary {
            total_rows,
            batches_total,
            batches_skipped: completed.len(),
            ..RunSummary::default()
        };

        info!(
            "job {} {}: {} rows, {} batches, {} already complete",
            job.id,
            JobState::Running,
            total_rows,
            batches_total,
            completed.len()
        );

        let dedup = Arc::new(DeduplicationSet::new());
        let processor = Arc::new(RecordProcessor::new(
            Arc::clone(&self.fetcher),
            Arc::clone(&self.resolver),
            self.config.company.clone(),
            dedup,
        ));

        let pb = ProgressBar::new(total_rows as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("[{elapsed_precise}] {bar:40} {pos}/{len} ({per_sec}, eta {eta})")?
                .progress_chars("=> "),
        );
        let already_done: usize = completed
            .iter()
            .map(|&i| batch_range(i, batch_size, total_rows).len())
            .sum();
        pb.inc(already_done as u64);

        let mut failed_rows = 0usize;
        for batch_index in 0..batches_total {
            if completed.contains(&batch_index) {
                continue;
            }
            if let Some(max) = limit {
                if summary.batches_written + summary.batches_failed >= max {
                    info!("batch limit {} reached, stopping early", max);
                    break;
                }
            }

            let range = batch_range(batch_index, batch_size, total_rows);
            let rows: Vec<(usize, Option<String>)> = range
                .map(|i| (i + 1, job.rows[i].clone()))
                .collect();

            let mut records = if self.config.workers <= 1 {
                process_sequential(&processor, rows, &pb).await
            } else {
                process_parallel(&processor, rows, self.config.workers, &pb).await
            };
            records.sort_by_key(|r| r.row);
            summary.processed_rows += records.len();
            failed_rows += records
                .iter()
                .filter(|r| r.status != Status::Success)
                .count();

            match self.store.write(&job.id, batch_index, &records) {
                Ok(()) => summary.batches_written += 1,
                Err(e) => {
                    error!("checkpoint write failed for batch {}: {:#}", batch_index, e);
                    summary.batches_failed += 1;
                }
            }
            info!(
                "batch {} done ({} rows, {} non-success so far)",
                batch_index,
                records.len(),
                failed_rows
            );
        }
        pb.finish_and_clear();

        let durable = self.store.list_completed(&job.id)?.len();
        summary.state = derive_state(durable, batches_total);

        let merged = self.store.read_all(&job.id)?;
        for r in &merged {
            if r.status == Status::Success {
                summary.success += 1;
            } else {
                summary
                    .failures
                    .push(format!("Row {}: {} - {}", r.row, r.status, r.error));
            }
            if r.part != NOT_FOUND {
                summary.parts_found += 1;
            }
            if r.unspsc_code != NOT_FOUND {
                summary.unspsc_found += 1;
            }
        }

        info!(
            "job {} {}: {} rows durable across {} batches",
            job.id,
            summary.state,
            merged.len(),
            durable
        );
        Ok((summary, merged))
    }
}

async fn process_sequential(
    processor: &RecordProcessor,
    rows: Vec<(usize, Option<String>)>,
    pb: &ProgressBar,
) -> Vec<Record> {
    let mut records = Vec::with_capacity(rows.len());
    for (row, url) in rows {
        let record = processor.process(row, url.as_deref()).await;
        pb.inc(1);
        records.push(record);
    }
    records
}

/// Fan one batch out to worker tasks bounded by a semaphore; results
/// stream back over a channel and arrive in completion order (the caller
/// restores row order before persisting).
async fn process_parallel(
    processor: &Arc<RecordProcessor>,
    rows: Vec<(usize, Option<String>)>,
    workers: usize,
    pb: &ProgressBar,
) -> Vec<Record> {
    let semaphore = Arc::new(Semaphore::new(workers));
    let (tx, mut rx) = mpsc::channel::<Record>(workers * 2);

    let expected = rows.len();
    for (row, url) in rows {
        let processor = Arc::clone(processor);
        let sem = Arc::clone(&semaphore);
        let tx = tx.clone();

        tokio::spawn(async move {
            let _permit = sem.acquire().await.unwrap();
            let record = processor.process(row, url.as_deref()).await;
            let _ = tx.send(record).await;
        });
    }
    drop(tx);

    let mut records = Vec::with_capacity(expected);
    while let Some(record) = rx.recv().await {
        pb.inc(1);
        records.push(record);
    }
    records
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::checkpoint::FsCheckpointStore;
    use crate::fetch::testing::StubFetcher;
    use crate::job::JobId;
    use crate::resolver::ResolverPolicy;

    fn product_page(part: &str, code: &str) -> String {
        format!(
            r#"<html><body>
            <p>Part #: {}</p>
            <table><tr><td>UNSPSC (17.1001)</td><td>{}</td></tr></table>
            </body></html>"#,
            part, code
        )
    }

    fn pipeline(
        fetcher: Arc<StubFetcher>,
        store: Box<dyn CheckpointStore>,
        batch_size: usize,
        workers: usize,
    ) -> Pipeline {
        Pipeline::new(
            fetcher,
            Arc::new(Resolver::new(ResolverPolicy::default())),
            store,
            PipelineConfig {
                batch_size,
                workers,
                company: "Swagelok".into(),
            },
        )
    }

    fn urls(n: usize) -> (Vec<Option<String>>, Arc<StubFetcher>) {
        let mut stub = StubFetcher::new();
        let mut rows = Vec::new();
        for i in 1..=n {
            let url = format!("https://site.example/p/PN-{}", i);
            stub = stub.ok(&url, &product_page(&format!("PN-{}", i), "40183102"));
            rows.push(Some(url));
        }
        (rows, Arc::new(stub))
    }

    #[tokio::test]
    async fn three_url_scenario() {
        let dir = tempfile::tempdir().unwrap();
        let (mut rows, fetcher) = urls(2);
        rows.insert(1, None); // [valid, blank, valid]
        let job = Job::new(JobId::from_bytes(b"three"), rows);

        let p = pipeline(
            Arc::clone(&fetcher),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            100,
            1,
        );
        let (summary, merged) = p.run(&job, None).await.unwrap();

        assert_eq!(merged.len(), 3);
        assert_eq!(
            merged.iter().map(|r| r.row).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert_eq!(merged[1].status, Status::InvalidUrl);
        assert_eq!(merged[1].part, NOT_FOUND);
        assert_eq!(merged[1].unspsc_code, NOT_FOUND);
        assert_eq!(merged[0].status, Status::Success);
        assert_eq!(merged[2].status, Status::Success);
        assert_eq!(fetcher.total_calls(), 2);
        assert_eq!(summary.total_rows, 3);
        assert_eq!(summary.success, 2);
        assert_eq!(summary.state, JobState::Completed);
    }

    #[tokio::test]
    async fn resume_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();

        // First run stops after 2 of 3 batches.
        let (rows, fetcher_a) = urls(6);
        let job = Job::new(JobId::from_bytes(b"resume"), rows.clone());
        let p = pipeline(
            Arc::clone(&fetcher_a),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            2,
            1,
        );
        let (summary, _) = p.run(&job, Some(2)).await.unwrap();
        assert_eq!(summary.batches_written, 2);
        assert_eq!(summary.state, JobState::Interrupted);
        assert_eq!(fetcher_a.total_calls(), 4);

        // Second run touches only the remaining batch.
        let (_, fetcher_b) = urls(6);
        let p = pipeline(
            Arc::clone(&fetcher_b),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            2,
            1,
        );
        let (summary, merged) = p.run(&job, None).await.unwrap();
        assert_eq!(summary.batches_skipped, 2);
        assert_eq!(summary.batches_written, 1);
        assert_eq!(summary.state, JobState::Completed);
        assert_eq!(fetcher_b.total_calls(), 2);
        assert_eq!(merged.len(), 6);

        // Byte-for-byte identical to an uninterrupted run.
        let dir2 = tempfile::tempdir().unwrap();
        let (_, fetcher_c) = urls(6);
        let p = pipeline(
            fetcher_c,
            Box::new(FsCheckpointStore::new(dir2.path()).unwrap()),
            2,
            1,
        );
        let (_, uninterrupted) = p.run(&job, None).await.unwrap();
        assert_eq!(
            serde_json::to_string(&merged).unwrap(),
            serde_json::to_string(&uninterrupted).unwrap()
        );
    }

    #[tokio::test]
    async fn parallel_mode_restores_row_order() {
        let dir = tempfile::tempdir().unwrap();
        // Later rows respond sooner, so workers complete in roughly
        // reverse request order and persistence has to re-sort.
        let mut stub = StubFetcher::new();
        let mut rows = Vec::new();
        for i in 1u64..=10 {
            let url = format!("https://site.example/p/PN-{}", i);
            stub = stub
                .ok(&url, &product_page(&format!("PN-{}", i), "40183102"))
                .delay_ms(&url, (10 - i) * 10);
            rows.push(Some(url));
        }
        let job = Job::new(JobId::from_bytes(b"parallel"), rows);

        let p = pipeline(
            Arc::new(stub),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            5,
            4,
        );
        let (summary, merged) = p.run(&job, None).await.unwrap();

        assert_eq!(summary.success, 10);
        assert_eq!(
            merged.iter().map(|r| r.row).collect::<Vec<_>>(),
            (1..=10).collect::<Vec<_>>()
        );
        for (i, r) in merged.iter().enumerate() {
            assert_eq!(r.part, format!("PN-{}", i + 1));
        }
    }

    #[tokio::test]
    async fn duplicate_rows_share_one_fetch() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://site.example/p/PN-1";
        let stub = StubFetcher::new().ok(url, &product_page("PN-1", "40183102"));
        let fetcher = Arc::new(stub);
        let job = Job::new(
            JobId::from_bytes(b"dup"),
            vec![Some(url.into()), Some(url.into()), Some(url.into())],
        );

        let p = pipeline(
            Arc::clone(&fetcher),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            100,
            1,
        );
        let (_, merged) = p.run(&job, None).await.unwrap();
        assert_eq!(fetcher.calls_for(url), 1);
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(|r| r.part == "PN-1"));
    }

    struct FailingStore {
        inner: FsCheckpointStore,
        fail: BTreeSet<usize>,
    }

    impl CheckpointStore for FailingStore {
        fn write(&self, job: &JobId, batch_index: usize, records: &[Record]) -> Result<()> {
            if self.fail.contains(&batch_index) {
                bail!("injected write failure");
            }
            self.inner.write(job, batch_index, records)
        }
        fn list_completed(&self, job: &JobId) -> Result<BTreeSet<usize>> {
            self.inner.list_completed(job)
        }
        fn read_all(&self, job: &JobId) -> Result<Vec<Record>> {
            self.inner.read_all(job)
        }
        fn clear(&self, job: &JobId) -> Result<()> {
            self.inner.clear(job)
        }
    }

    #[tokio::test]
    async fn write_failure_is_non_fatal_and_retried_next_run() {
        let dir = tempfile::tempdir().unwrap();
        let (rows, fetcher_a) = urls(4);
        let job = Job::new(JobId::from_bytes(b"flaky-disk"), rows);

        let store = FailingStore {
            inner: FsCheckpointStore::new(dir.path()).unwrap(),
            fail: BTreeSet::from([0]),
        };
        let p = pipeline(Arc::clone(&fetcher_a), Box::new(store), 2, 1);
        let (summary, merged) = p.run(&job, None).await.unwrap();
        assert_eq!(summary.batches_failed, 1);
        assert_eq!(summary.batches_written, 1);
        assert_eq!(summary.state, JobState::Interrupted);
        assert_eq!(merged.len(), 2); // only the durable batch

        // Next run retries the failed batch since it was never durable.
        let (_, fetcher_b) = urls(4);
        let p = pipeline(
            Arc::clone(&fetcher_b),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            2,
            1,
        );
        let (summary, merged) = p.run(&job, None).await.unwrap();
        assert_eq!(summary.batches_written, 1);
        assert_eq!(summary.batches_skipped, 1);
        assert_eq!(merged.len(), 4);
        assert_eq!(fetcher_b.total_calls(), 2);
    }

    #[tokio::test]
    async fn stale_checkpoints_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = FsCheckpointStore::new(dir.path()).unwrap();
        let (rows, fetcher) = urls(2);
        let job = Job::new(JobId::from_bytes(b"stale"), rows);

        // A checkpoint beyond this input's batch range, as if written with
        // a different batch size.
        store
            .write(
                &job.id,
                9,
                &[Record {
                    row: 19,
                    url: "https://site.example/p/PN-19".into(),
                    part: "PN-19".into(),
                    company: "Swagelok".into(),
                    unspsc_feature: NOT_FOUND.into(),
                    unspsc_code: NOT_FOUND.into(),
                    status: Status::Success,
                    error: String::new(),
                }],
            )
            .unwrap();

        let p = pipeline(fetcher, Box::new(store), 100, 1);
        let err = p.run(&job, None).await.unwrap_err();
        assert!(err.to_string().contains("clear them first"));
    }

    #[tokio::test]
    async fn batch_size_change_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (rows, fetcher) = urls(6);
        let job = Job::new(JobId::from_bytes(b"resized"), rows);

        // Interrupt after batch 0 of a size-3 run: rows 1..=3 durable.
        let p = pipeline(
            Arc::clone(&fetcher),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            3,
            1,
        );
        let (summary, _) = p.run(&job, Some(1)).await.unwrap();
        assert_eq!(summary.batches_written, 1);
        assert_eq!(summary.state, JobState::Interrupted);

        // Under size 4 the durable batch 0 would stand in for rows 1..=4,
        // dropping row 4 from the job. The run must refuse instead.
        let p = pipeline(
            Arc::clone(&fetcher),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            4,
            1,
        );
        let err = p.run(&job, None).await.unwrap_err();
        assert!(err.to_string().contains("clear them first"));
        assert_eq!(fetcher.total_calls(), 3); // nothing fetched by the refusal

        // The original size still resumes and completes gaplessly.
        let p = pipeline(
            Arc::clone(&fetcher),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            3,
            1,
        );
        let (summary, merged) = p.run(&job, None).await.unwrap();
        assert_eq!(summary.state, JobState::Completed);
        assert_eq!(
            merged.iter().map(|r| r.row).collect::<Vec<_>>(),
            vec![1, 2, 3, 4, 5, 6]
        );
    }

    #[tokio::test]
    async fn empty_input_completes_trivially() {
        let dir = tempfile::tempdir().unwrap();
        let job = Job::new(JobId::from_bytes(b"empty"), Vec::new());
        let p = pipeline(
            Arc::new(StubFetcher::new()),
            Box::new(FsCheckpointStore::new(dir.path()).unwrap()),
            100,
            1,
        );
        let (summary, merged) = p.run(&job, None).await.unwrap();
        assert!(merged.is_empty());
        assert_eq!(summary.state, JobState::Completed);
    }
}
