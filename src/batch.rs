//! Bounded-parallel dispatch of one document's pages to a [`PageParser`].
//!
//! Pages are submitted in page-number order through
//! `stream::iter(..).buffer_unordered(workers)`, so at most `workers` parser
//! calls are in flight and completions arrive in any order. Each result is
//! written to the [`ResultStore`] as soon as it arrives.
//!
//! A per-page failure is data, never an error: it is counted, written as an
//! `<n>_error.txt` artifact and listed in the report. The only errors this
//! module returns concern the page set itself.

use crate::document::Page;
use crate::error::{ParseError, SliceError};
use crate::output::{BatchReport, PageFailure, ParseResult, CANCELLED_REASON};
use crate::pipeline::llm::PageParser;
use crate::progress::{ProgressEvent, ProgressObserver, Stage};
use crate::store::ResultStore;
use chrono::Local;
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Cooperative stop signal, checked before each page is submitted.
///
/// Clones share one flag. In-flight calls are not interrupted; they finish or
/// time out.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Scheduling limits for one batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchOptions {
    /// Maximum concurrent parser calls.
    pub workers: usize,
    /// Per-call timeout. Expiry yields `Failure("timeout")`.
    pub timeout: Duration,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: 2,
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Default)]
struct Counters {
    completed: usize,
    failed: usize,
}

/// Runs every page of a document through a parser.
#[derive(Clone)]
pub struct BatchCoordinator {
    parser: Arc<dyn PageParser>,
    options: BatchOptions,
}

impl BatchCoordinator {
    pub fn new(parser: Arc<dyn PageParser>, options: BatchOptions) -> Self {
        Self {
            parser,
            options: BatchOptions {
                workers: options.workers.max(1),
                ..options
            },
        }
    }

    pub fn options(&self) -> BatchOptions {
        self.options
    }

    /// Parse every page in `pages` and return once each has a result.
    ///
    /// After `cancel` fires no further page is submitted; pages that were
    /// never sent are recorded as `Failure("cancelled")`.
    pub async fn run(
        &self,
        document: &str,
        pages: &[Page],
        instruction: &str,
        store: &ResultStore,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<BatchReport, SliceError> {
        let items: Vec<Result<Page, PageFailure>> = pages.iter().cloned().map(Ok).collect();
        self.run_items(document, &items, instruction, store, observer, cancel)
            .await
    }

    /// Like [`run`](Self::run), but `Err` items are inputs that already
    /// failed before reaching the parser (an undecodable upload). They are
    /// recorded first, with their own reason, and count toward the totals.
    pub async fn run_items(
        &self,
        document: &str,
        items: &[Result<Page, PageFailure>],
        instruction: &str,
        store: &ResultStore,
        observer: &dyn ProgressObserver,
        cancel: &CancelToken,
    ) -> Result<BatchReport, SliceError> {
        check_unique(items.iter().map(|i| match i {
            Ok(p) => p.number,
            Err(f) => f.page,
        }))?;

        let started_at = Local::now();
        let clock = Instant::now();
        let total = items.len();
        let counters = Mutex::new(Counters::default());
        let timeout = self.options.timeout;
        let pages: Vec<&Page> = items.iter().filter_map(|i| i.as_ref().ok()).collect();

        info!(
            "{}: parsing {} pages with {} workers, {}s timeout",
            document,
            total,
            self.options.workers,
            timeout.as_secs()
        );

        let mut outcomes = BTreeMap::new();
        let mut persistence_errors = Vec::new();
        for rejected in items.iter().filter_map(|i| i.as_ref().err()) {
            warn!("{}: page {} rejected: {}", document, rejected.page, rejected.reason);
            let result = ParseResult::Failure(rejected.reason.clone());
            if let Err(e) = store.write_page(rejected.page, &result).await {
                warn!("{}: page {}: {}", document, rejected.page, e);
                persistence_errors.push(PageFailure {
                    page: rejected.page,
                    reason: e.to_string(),
                });
            }
            record(&counters, document, rejected.page, total, &result, observer);
            outcomes.insert(rejected.page, result);
        }

        let finished: Vec<_> = stream::iter(pages.iter().copied())
            .take_while(|_| futures::future::ready(!cancel.is_cancelled()))
            .map(|page| {
                let parser = Arc::clone(&self.parser);
                let counters = &counters;
                async move {
                    debug!("{}: page {} submitted", document, page.number);
                    let result = match tokio::time::timeout(
                        timeout,
                        parser.parse_page(page, instruction, timeout),
                    )
                    .await
                    {
                        Ok(Ok(text)) => ParseResult::Success(text),
                        Ok(Err(e)) => ParseResult::Failure(e.to_string()),
                        Err(_) => ParseResult::Failure(ParseError::Timeout.to_string()),
                    };
                    if let Some(reason) = result.reason() {
                        warn!("{}: page {} failed: {}", document, page.number, reason);
                    }

                    let write_error = store
                        .write_page(page.number, &result)
                        .await
                        .err()
                        .map(|e| {
                            warn!("{}: page {}: {}", document, page.number, e);
                            e.to_string()
                        });

                    record(counters, document, page.number, total, &result, observer);
                    (page.number, result, write_error)
                }
            })
            .buffer_unordered(self.options.workers)
            .collect()
            .await;

        for (number, result, write_error) in finished {
            if let Some(reason) = write_error {
                persistence_errors.push(PageFailure { page: number, reason });
            }
            outcomes.insert(number, result);
        }

        let cancelled = outcomes.len() < total;
        if cancelled {
            let skipped: Vec<&Page> = pages
                .iter()
                .copied()
                .filter(|p| !outcomes.contains_key(&p.number))
                .collect();
            warn!(
                "{}: cancelled, {} pages were not submitted",
                document,
                skipped.len()
            );
            for page in skipped {
                let result = ParseResult::Failure(CANCELLED_REASON.to_string());
                if let Err(e) = store.write_page(page.number, &result).await {
                    warn!("{}: page {}: {}", document, page.number, e);
                    persistence_errors.push(PageFailure {
                        page: page.number,
                        reason: e.to_string(),
                    });
                }
                record(&counters, document, page.number, total, &result, observer);
                outcomes.insert(page.number, result);
            }
        }
        persistence_errors.sort_by_key(|f| f.page);

        let success_count = outcomes.values().filter(|r| r.is_success()).count();
        let failure_count = outcomes.len() - success_count;

        observer.on_event(&ProgressEvent {
            stage: Stage::Finished,
            document: document.to_string(),
            completed: outcomes.len(),
            total,
            failed: failure_count,
            current_label: String::new(),
        });

        let report = BatchReport {
            document: document.to_string(),
            total_pages: total,
            success_count,
            failure_count,
            outcomes,
            cancelled,
            persistence_errors,
            started_at,
            finished_at: Local::now(),
            duration_ms: clock.elapsed().as_millis() as u64,
            kind: store.layout().kind,
            labels: BTreeMap::new(),
        };

        info!(
            "{}: {}/{} pages succeeded in {}ms",
            document, report.success_count, report.total_pages, report.duration_ms
        );
        Ok(report)
    }
}

/// Bump the counters and emit the snapshot while holding the lock, so
/// observers see `completed` strictly increasing.
fn record(
    counters: &Mutex<Counters>,
    document: &str,
    page: u32,
    total: usize,
    result: &ParseResult,
    observer: &dyn ProgressObserver,
) {
    let mut c = match counters.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    c.completed += 1;
    if !result.is_success() {
        c.failed += 1;
    }
    observer.on_event(&ProgressEvent {
        stage: Stage::Parsing,
        document: document.to_string(),
        completed: c.completed,
        total,
        failed: c.failed,
        current_label: format!("page {page}"),
    });
}

fn check_unique(numbers: impl Iterator<Item = u32>) -> Result<(), SliceError> {
    let mut seen = HashSet::new();
    for n in numbers {
        if n == 0 {
            return Err(SliceError::InvalidInput(
                "page numbers are 1-based; got page 0".into(),
            ));
        }
        if !seen.insert(n) {
            return Err(SliceError::InvalidInput(format!(
                "page {n} appears more than once"
            )));
        }
    }
    Ok(())
}
