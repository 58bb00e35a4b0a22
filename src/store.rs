//! Result persistence: per-page artifacts and the run summary.
//!
//! Layout for one document (root = configured output directory):
//!
//! ```text
//! <root>/<stem>/
//! ├── pdf/<original-filename>       copy of the source
//! ├── slice-pics/<n>.png            one raster per page, 1-based
//! └── summaries/
//!     ├── <n>.txt                   success: extracted text
//!     ├── <n>_error.txt             failure: page, reason, time
//!     └── _summary.txt              run report
//! ```
//!
//! A batch of standalone images gets a fresh timestamped directory instead:
//!
//! ```text
//! <root>/Image Parse Results/<YYYYmmdd_HHMMSS>/
//! ├── images/<n>.<ext>              copy of each upload, numbered by position
//! └── summaries/                    same artifact names as above
//! ```
//!
//! Successes and failures are told apart by file name alone. Every write goes
//! to `<file>.tmp` first and is renamed into place, so a crash never leaves a
//! half-written artifact under its final name. Re-running a document
//! overwrites artifacts page by page; nothing is merged or appended.

use crate::document::{document_stem, PageKind};
use crate::error::SliceError;
use crate::output::{BatchReport, ParseResult, CANCELLED_REASON};
use crate::pipeline::render::page_image_name;
use chrono::{DateTime, Local};
use once_cell::sync::Lazy;
use regex::Regex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

pub const SOURCE_DIR: &str = "pdf";
pub const IMAGES_DIR: &str = "slice-pics";
pub const SUMMARIES_DIR: &str = "summaries";
pub const SUMMARY_FILE: &str = "_summary.txt";
pub const IMAGE_RUNS_DIR: &str = "Image Parse Results";
pub const UPLOADS_DIR: &str = "images";
const RUN_DIR_FORMAT: &str = "%Y%m%d_%H%M%S";

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

static RE_SUCCESS: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.txt$").unwrap());
static RE_ERROR: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)_error\.txt$").unwrap());
static RE_IMAGE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(\d+)\.png$").unwrap());

/// `<n>.txt`
pub fn success_name(page: u32) -> String {
    format!("{page}.txt")
}

/// `<n>_error.txt`
pub fn error_name(page: u32) -> String {
    format!("{page}_error.txt")
}

fn timestamp(at: DateTime<Local>) -> String {
    at.format(TIMESTAMP_FORMAT).to_string()
}

fn item_label(kind: PageKind, n: u32) -> String {
    match kind {
        PageKind::Document => format!("Page {n}"),
        PageKind::Image => format!("Image {n}"),
    }
}

/// Directory structure of one document's (or one image batch's) output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentLayout {
    pub kind: PageKind,
    pub dir: PathBuf,
    pub source_dir: PathBuf,
    pub images_dir: PathBuf,
    pub summaries_dir: PathBuf,
}

impl DocumentLayout {
    /// `<output_root>/<stem of document_name>/…`
    pub fn new(output_root: &Path, document_name: &str) -> Self {
        let dir = output_root.join(document_stem(document_name));
        Self {
            kind: PageKind::Document,
            source_dir: dir.join(SOURCE_DIR),
            images_dir: dir.join(IMAGES_DIR),
            summaries_dir: dir.join(SUMMARIES_DIR),
            dir,
        }
    }

    /// `<output_root>/Image Parse Results/<YYYYmmdd_HHMMSS>/…`. A `_2`, `_3`…
    /// suffix is added when a batch started in the same second already exists.
    pub fn for_images(output_root: &Path, started: DateTime<Local>) -> Self {
        let parent = output_root.join(IMAGE_RUNS_DIR);
        let base = started.format(RUN_DIR_FORMAT).to_string();
        let mut dir = parent.join(&base);
        let mut n = 2;
        while dir.exists() {
            dir = parent.join(format!("{base}_{n}"));
            n += 1;
        }
        Self {
            kind: PageKind::Image,
            source_dir: dir.join(UPLOADS_DIR),
            images_dir: dir.join(UPLOADS_DIR),
            summaries_dir: dir.join(SUMMARIES_DIR),
            dir,
        }
    }

    /// Create every directory of the layout.
    pub async fn create(&self) -> Result<(), SliceError> {
        for d in [&self.dir, &self.source_dir, &self.images_dir, &self.summaries_dir] {
            tokio::fs::create_dir_all(d)
                .await
                .map_err(|e| SliceError::persistence(d, e))?;
        }
        Ok(())
    }

    pub fn image_path(&self, page: u32) -> PathBuf {
        self.images_dir.join(page_image_name(page))
    }

    pub fn success_path(&self, page: u32) -> PathBuf {
        self.summaries_dir.join(success_name(page))
    }

    pub fn error_path(&self, page: u32) -> PathBuf {
        self.summaries_dir.join(error_name(page))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.summaries_dir.join(SUMMARY_FILE)
    }
}

/// Page numbers found in the summaries directory, by artifact kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ArtifactIndex {
    pub successes: Vec<u32>,
    pub errors: Vec<u32>,
}

/// Writes one document's artifacts.
#[derive(Debug, Clone)]
pub struct ResultStore {
    layout: DocumentLayout,
    provenance_header: bool,
}

impl ResultStore {
    pub fn new(layout: DocumentLayout, provenance_header: bool) -> Self {
        Self {
            layout,
            provenance_header,
        }
    }

    pub fn layout(&self) -> &DocumentLayout {
        &self.layout
    }

    /// Copy the source bytes to `pdf/<file_name>` (`images/` for an image batch).
    pub async fn save_source(&self, file_name: &str, bytes: &[u8]) -> Result<PathBuf, SliceError> {
        let name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        let path = self.layout.source_dir.join(name);
        write_atomic(&path, bytes).await?;
        Ok(path)
    }

    /// Write the artifact for one page's result and drop the opposite kind
    /// for the same page, if a previous run left one.
    pub async fn write_page(&self, page: u32, result: &ParseResult) -> Result<PathBuf, SliceError> {
        let now = Local::now();
        let label = item_label(self.layout.kind, page);
        let (path, stale, body) = match result {
            ParseResult::Success(text) => (
                self.layout.success_path(page),
                self.layout.error_path(page),
                format_success(&label, text, self.provenance_header, now),
            ),
            ParseResult::Failure(reason) => (
                self.layout.error_path(page),
                self.layout.success_path(page),
                format_error(&label, reason, now),
            ),
        };

        write_atomic(&path, body.as_bytes()).await?;
        remove_if_exists(&stale).await?;
        debug!("Page {}: wrote {}", page, path.display());
        Ok(path)
    }

    /// Write `_summary.txt` for a finished batch.
    pub async fn write_summary(&self, report: &BatchReport) -> Result<PathBuf, SliceError> {
        let path = self.layout.summary_path();
        write_atomic(&path, format_summary(report).as_bytes()).await?;
        Ok(path)
    }

    /// Enumerate success and error artifacts by file name.
    pub async fn list_artifacts(&self) -> Result<ArtifactIndex, SliceError> {
        let mut index = ArtifactIndex::default();
        for name in read_names(&self.layout.summaries_dir).await? {
            if let Some(n) = numbered(&RE_SUCCESS, &name) {
                index.successes.push(n);
            } else if let Some(n) = numbered(&RE_ERROR, &name) {
                index.errors.push(n);
            }
        }
        index.successes.sort_unstable();
        index.errors.sort_unstable();
        Ok(index)
    }

    /// Page images and result artifacts numbered above `page_count`, left over
    /// from an earlier run of a longer document. They are reported, not deleted.
    pub async fn stale_artifacts(&self, page_count: usize) -> Result<Vec<PathBuf>, SliceError> {
        let limit = page_count as u64;
        let mut stale = Vec::new();

        for name in read_names(&self.layout.images_dir).await? {
            if numbered(&RE_IMAGE, &name).is_some_and(|n| n as u64 > limit) {
                stale.push(self.layout.images_dir.join(&name));
            }
        }
        for name in read_names(&self.layout.summaries_dir).await? {
            let n = numbered(&RE_SUCCESS, &name).or_else(|| numbered(&RE_ERROR, &name));
            if n.is_some_and(|n| n as u64 > limit) {
                stale.push(self.layout.summaries_dir.join(&name));
            }
        }

        stale.sort();
        if !stale.is_empty() {
            warn!(
                "{}: {} artifact(s) from an earlier run exceed the current {} pages, left in place",
                self.layout.dir.display(),
                stale.len(),
                page_count
            );
        }
        Ok(stale)
    }
}

fn numbered(re: &Regex, name: &str) -> Option<u32> {
    re.captures(name).and_then(|c| c[1].parse().ok())
}

async fn read_names(dir: &Path) -> Result<Vec<String>, SliceError> {
    let mut names = Vec::new();
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(e) => e,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(names),
        Err(e) => return Err(SliceError::persistence(dir, e)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|e| SliceError::persistence(dir, e))?
    {
        names.push(entry.file_name().to_string_lossy().into_owned());
    }
    Ok(names)
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), SliceError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .map_err(|e| SliceError::persistence(path, e))?;
    }
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes)
        .await
        .map_err(|e| SliceError::persistence(path, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| SliceError::persistence(path, e))
}

async fn remove_if_exists(path: &Path) -> Result<(), SliceError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(SliceError::persistence(path, e)),
    }
}

// ── Artifact formats ─────────────────────────────────────────────────────

/// Success artifact body. `label` is `Page <n>` or `Image <n>`.
pub fn format_success(label: &str, text: &str, header: bool, at: DateTime<Local>) -> String {
    if !header {
        return text.to_string();
    }
    format!(
        "=== {label} result ===\n\n{text}\n\n=== Parsed at: {} ===",
        timestamp(at)
    )
}

/// Error artifact body.
pub fn format_error(label: &str, reason: &str, at: DateTime<Local>) -> String {
    format!("{label} failed\nReason: {reason}\nTime: {}", timestamp(at))
}

const PREVIEW_CHARS: usize = 200;

fn preview(text: &str) -> String {
    let mut head: String = text.chars().take(PREVIEW_CHARS).collect();
    if text.chars().nth(PREVIEW_CHARS).is_some() {
        head.push_str("...");
    }
    head
}

/// `_summary.txt` body.
pub fn format_summary(report: &BatchReport) -> String {
    let (title, unit) = match report.kind {
        PageKind::Document => ("PDF Parse Summary", "pages"),
        PageKind::Image => ("Image Parse Summary", "images"),
    };

    let mut out = String::new();
    out.push_str(title);
    out.push('\n');
    out.push_str(&"=".repeat(50));
    out.push('\n');
    if report.kind == PageKind::Document {
        out.push_str(&format!("Document: {}\n", report.document));
    }
    out.push_str(&format!("Total {unit}: {}\n", report.total_pages));
    out.push_str(&format!("Succeeded: {}\n", report.success_count));
    out.push_str(&format!("Failed: {}\n", report.failure_count));
    out.push_str(&format!("Success rate: {:.1}%\n", report.success_rate()));
    out.push_str(&format!("Finished at: {}\n", timestamp(report.finished_at)));
    out.push_str(&format!(
        "Duration: {:.1}s\n",
        report.duration_ms as f64 / 1000.0
    ));
    if report.cancelled {
        out.push_str(&format!(
            "Note: run was cancelled; {unit} never sent are recorded as '{}'\n",
            CANCELLED_REASON
        ));
    }

    let failures = report.failures();
    if !failures.is_empty() {
        out.push_str(&format!("\nFailed {unit}:\n"));
        out.push_str(&"-".repeat(30));
        out.push('\n');
        for f in failures {
            let label = item_label(report.kind, f.page);
            out.push_str(&format!("{label}: {}\n", f.reason));
        }
    }

    if !report.persistence_errors.is_empty() {
        out.push_str("\nArtifacts that could not be written:\n");
        out.push_str(&"-".repeat(30));
        out.push('\n');
        for f in &report.persistence_errors {
            let label = item_label(report.kind, f.page);
            out.push_str(&format!("{label}: {}\n", f.reason));
        }
    }

    if report.kind == PageKind::Image {
        out.push_str("\nResults:\n");
        for (n, result) in &report.outcomes {
            let name = report.labels.get(n).map(String::as_str).unwrap_or("");
            out.push_str(&format!("\n{n}. {name}\n"));
            out.push_str(&"-".repeat(30));
            out.push('\n');
            match result {
                ParseResult::Success(text) => out.push_str(&preview(text)),
                ParseResult::Failure(reason) => out.push_str(&format!("failed: {reason}")),
            }
            out.push('\n');
        }
    }
    out
}
