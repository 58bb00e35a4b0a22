//! Result types: per-page outcomes, per-document reports, per-run reports.

use crate::document::PageKind;
use chrono::{DateTime, Local};
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Reason recorded for pages that were never submitted because the run was cancelled.
pub const CANCELLED_REASON: &str = "cancelled";

/// The outcome of one page's model call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "value", rename_all = "snake_case")]
pub enum ParseResult {
    /// Text returned by the model.
    Success(String),
    /// Why the call failed, verbatim from the underlying error.
    Failure(String),
}

impl ParseResult {
    pub fn is_success(&self) -> bool {
        matches!(self, ParseResult::Success(_))
    }

    /// The failure reason, if this is a failure.
    pub fn reason(&self) -> Option<&str> {
        match self {
            ParseResult::Failure(r) => Some(r),
            ParseResult::Success(_) => None,
        }
    }
}

/// A page number paired with a failure description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PageFailure {
    pub page: u32,
    pub reason: String,
}

/// Aggregate outcome for one document's page set.
#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    /// Source file name.
    pub document: String,
    pub total_pages: usize,
    pub success_count: usize,
    pub failure_count: usize,
    /// Every page's outcome, keyed and ordered by page number.
    pub outcomes: BTreeMap<u32, ParseResult>,
    /// Scheduling stopped early; unsubmitted pages carry [`CANCELLED_REASON`].
    pub cancelled: bool,
    /// Artifacts that could not be written. The pages still count by their parse outcome.
    pub persistence_errors: Vec<PageFailure>,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub duration_ms: u64,
    /// PDF pages or standalone images.
    pub kind: PageKind,
    /// Original file name per item, filled in for image batches.
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<u32, String>,
}

impl BatchReport {
    /// Success rate in percent; `0.0` for an empty batch.
    pub fn success_rate(&self) -> f64 {
        if self.total_pages == 0 {
            0.0
        } else {
            self.success_count as f64 * 100.0 / self.total_pages as f64
        }
    }

    /// Failed pages in page order.
    pub fn failures(&self) -> Vec<PageFailure> {
        self.outcomes
            .iter()
            .filter_map(|(&page, r)| {
                r.reason().map(|reason| PageFailure {
                    page,
                    reason: reason.to_string(),
                })
            })
            .collect()
    }

    /// True when the batch ran to completion and no page failed.
    pub fn all_succeeded(&self) -> bool {
        self.failure_count == 0 && self.success_count == self.total_pages
    }
}

/// What happened to one input document.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DocumentOutcome {
    /// Rasterised and parsed; page-level failures live inside the report.
    Completed {
        output_dir: PathBuf,
        report: BatchReport,
    },
    /// Aborted at document level (unreadable, render error, I/O).
    Failed { document: String, error: String },
}

impl DocumentOutcome {
    pub fn document(&self) -> &str {
        match self {
            DocumentOutcome::Completed { report, .. } => &report.document,
            DocumentOutcome::Failed { document, .. } => document,
        }
    }
}

/// All documents of one invocation, in input order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub documents: Vec<DocumentOutcome>,
}

impl RunReport {
    pub fn completed(&self) -> impl Iterator<Item = &BatchReport> {
        self.documents.iter().filter_map(|d| match d {
            DocumentOutcome::Completed { report, .. } => Some(report),
            DocumentOutcome::Failed { .. } => None,
        })
    }

    pub fn failed_documents(&self) -> usize {
        self.documents
            .iter()
            .filter(|d| matches!(d, DocumentOutcome::Failed { .. }))
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcomes: &[(u32, ParseResult)]) -> BatchReport {
        let now = Local::now();
        let success = outcomes.iter().filter(|(_, r)| r.is_success()).count();
        BatchReport {
            document: "doc.pdf".into(),
            total_pages: outcomes.len(),
            success_count: success,
            failure_count: outcomes.len() - success,
            outcomes: outcomes.iter().cloned().collect(),
            cancelled: false,
            persistence_errors: Vec::new(),
            started_at: now,
            finished_at: now,
            duration_ms: 0,
            kind: PageKind::Document,
            labels: BTreeMap::new(),
        }
    }

    #[test]
    fn success_rate_and_failures() {
        let r = report(&[
            (3, ParseResult::Success("c".into())),
            (1, ParseResult::Success("a".into())),
            (2, ParseResult::Failure("timeout".into())),
        ]);
        assert!((r.success_rate() - 66.666).abs() < 0.01);
        assert_eq!(
            r.failures(),
            vec![PageFailure {
                page: 2,
                reason: "timeout".into()
            }]
        );
        assert!(!r.all_succeeded());
    }

    #[test]
    fn empty_batch_rate_is_zero() {
        let r = report(&[]);
        assert_eq!(r.success_rate(), 0.0);
    }

    #[test]
    fn parse_result_serialises_tagged() {
        let json = serde_json::to_string(&ParseResult::Failure("timeout".into())).unwrap();
        assert_eq!(json, r#"{"status":"failure","value":"timeout"}"#);
    }
}
