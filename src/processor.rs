use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use crate::fetch::{FetchError, PageFetcher};
use crate::record::{Record, Status, NOT_FOUND};
use crate::resolver::{Resolved, Resolver};

const ERROR_TRUNCATE: usize = 100;

/// Per-job memo of successful resolutions keyed by trimmed URL: rows that
/// repeat an earlier row's URL reuse its fields instead of fetching again.
/// Constructed per job and passed in; two jobs never share one.
#[derive(Default)]
pub struct DeduplicationSet {
    seen: Mutex<HashMap<String, Resolved>>,
}

impl DeduplicationSet {
    pub fn new() -> Self {
        Self::default()
    }

    fn get(&self, url: &str) -> Option<Resolved> {
        self.seen.lock().unwrap().get(url).cloned()
    }

    fn put(&self, url: &str, resolved: &Resolved) {
        self.seen
            .lock()
            .unwrap()
            .insert(url.to_string(), resolved.clone());
    }
}

/// Turns one input row into exactly one Record. Never fails: every fetch
/// or validation outcome maps onto a status.
pub struct RecordProcessor {
    fetcher: Arc<dyn PageFetcher>,
    resolver: Arc<Resolver>,
    company: String,
    dedup: Arc<DeduplicationSet>,
}

impl RecordProcessor {
    pub fn new(
        fetcher: Arc<dyn PageFetcher>,
        resolver: Arc<Resolver>,
        company: String,
        dedup: Arc<DeduplicationSet>,
    ) -> Self {
        RecordProcessor {
            fetcher,
            resolver,
            company,
            dedup,
        }
    }

    pub async fn process(&self, row: usize, url: Option<&str>) -> Record {
        let trimmed = url.map(str::trim).unwrap_or("");
        if trimmed.is_empty() || !trimmed.starts_with("http") {
            return self.invalid(row, trimmed);
        }
        if let Some(resolved) = self.dedup.get(trimmed) {
            return self.success(row, trimmed, resolved);
        }
        match self.fetcher.fetch(trimmed).await {
            Ok(body) => {
                let resolved = self.resolver.resolve(&body, trimmed);
                self.dedup.put(trimmed, &resolved);
                self.success(row, trimmed, resolved)
            }
            Err(e) => self.failure(row, trimmed, e),
        }
    }

    fn success(&self, row: usize, url: &str, resolved: Resolved) -> Record {
        let mut diags = Vec::new();
        if resolved.part == NOT_FOUND {
            diags.push("Part not found");
        }
        if resolved.unspsc_code == NOT_FOUND {
            diags.push("UNSPSC not found");
        }
        Record {
            row,
            url: url.to_string(),
            part: resolved.part,
            company: self.company.clone(),
            unspsc_feature: resolved.unspsc_feature,
            unspsc_code: resolved.unspsc_code,
            status: Status::Success,
            error: diags.join(";"),
        }
    }

    fn invalid(&self, row: usize, url: &str) -> Record {
        self.unresolved(row, url, Status::InvalidUrl, "URL is empty or invalid".into())
    }

    fn failure(&self, row: usize, url: &str, err: FetchError) -> Record {
        let (status, error) = match err {
            FetchError::Status(code) => (Status::HttpError(code), format!("status {}", code)),
            FetchError::Timeout(secs) => (Status::Timeout, format!("timed out after {}s", secs)),
            FetchError::Network(msg) => (Status::Error, truncate(&msg, ERROR_TRUNCATE)),
        };
        self.unresolved(row, url, status, error)
    }

    fn unresolved(&self, row: usize, url: &str, status: Status, error: String) -> Record {
        Record {
            row,
            url: url.to_string(),
            part: NOT_FOUND.into(),
            company: self.company.clone(),
            unspsc_feature: NOT_FOUND.into(),
            unspsc_code: NOT_FOUND.into(),
            status,
            error,
        }
    }
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::testing::StubFetcher;
    use crate::resolver::ResolverPolicy;

    const PAGE: &str = r#"<html><body>
        <p>Part #: SS-4BMRG-TW</p>
        <table><tr><td>UNSPSC (17.1001)</td><td>40183102</td></tr></table>
    </body></html>"#;

    fn processor(stub: StubFetcher) -> (Arc<StubFetcher>, RecordProcessor) {
        let fetcher = Arc::new(stub);
        let p = RecordProcessor::new(
            Arc::clone(&fetcher) as Arc<dyn PageFetcher>,
            Arc::new(Resolver::new(ResolverPolicy::default())),
            "Swagelok".into(),
            Arc::new(DeduplicationSet::new()),
        );
        (fetcher, p)
    }

    #[tokio::test]
    async fn success_with_fields() {
        let url = "https://example.com/p/SS-4BMRG-TW";
        let (_, p) = processor(StubFetcher::new().ok(url, PAGE));
        let r = p.process(1, Some(url)).await;
        assert_eq!(r.status, Status::Success);
        assert_eq!(r.part, "SS-4BMRG-TW");
        assert_eq!(r.unspsc_code, "40183102");
        assert_eq!(r.company, "Swagelok");
        assert_eq!(r.error, "");
    }

    #[tokio::test]
    async fn success_with_diagnostics() {
        let url = "https://example.com/page";
        let (_, p) = processor(StubFetcher::new().ok(url, "<html><body>bare</body></html>"));
        let r = p.process(1, Some(url)).await;
        assert_eq!(r.status, Status::Success);
        assert_eq!(r.part, NOT_FOUND);
        assert_eq!(r.error, "Part not found;UNSPSC not found");
    }

    #[tokio::test]
    async fn blank_and_malformed_urls() {
        let (fetcher, p) = processor(StubFetcher::new());
        for url in [None, Some(""), Some("   "), Some("ftp://example.com/x")] {
            let r = p.process(2, url).await;
            assert_eq!(r.status, Status::InvalidUrl);
            assert_eq!(r.part, NOT_FOUND);
            assert_eq!(r.unspsc_code, NOT_FOUND);
            assert_eq!(r.error, "URL is empty or invalid");
        }
        assert_eq!(fetcher.total_calls(), 0);
    }

    #[tokio::test]
    async fn fetch_failures_map_to_statuses() {
        let (_, p) = processor(
            StubFetcher::new()
                .err("https://a.example/x", FetchError::Status(404))
                .err("https://b.example/x", FetchError::Timeout(20))
                .err("https://c.example/x", FetchError::Network("x".repeat(300))),
        );

        let r = p.process(1, Some("https://a.example/x")).await;
        assert_eq!(r.status, Status::HttpError(404));
        assert_eq!(r.error, "status 404");

        let r = p.process(2, Some("https://b.example/x")).await;
        assert_eq!(r.status, Status::Timeout);
        assert_eq!(r.error, "timed out after 20s");

        let r = p.process(3, Some("https://c.example/x")).await;
        assert_eq!(r.status, Status::Error);
        assert_eq!(r.error.chars().count(), 100);
    }

    #[tokio::test]
    async fn duplicate_urls_fetch_once() {
        let url = "https://example.com/p/SS-4BMRG-TW";
        let (fetcher, p) = processor(StubFetcher::new().ok(url, PAGE));
        let a = p.process(1, Some(url)).await;
        let b = p.process(7, Some(url)).await;
        assert_eq!(fetcher.calls_for(url), 1);
        assert_eq!(a.part, b.part);
        assert_eq!(a.unspsc_code, b.unspsc_code);
        assert_eq!(b.row, 7);
    }

    #[tokio::test]
    async fn failures_are_not_memoized() {
        let url = "https://example.com/down";
        let (fetcher, p) = processor(StubFetcher::new().err(url, FetchError::Status(500)));
        let _ = p.process(1, Some(url)).await;
        let _ = p.process(2, Some(url)).await;
        assert_eq!(fetcher.calls_for(url), 2);
    }
}
