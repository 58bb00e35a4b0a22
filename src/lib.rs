//! # slicebatch
//!
//! Slice PDF documents into page images and extract each page's content with a
//! vision model, several pages at a time.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Check   %PDF header, copy to <doc>/pdf/
//!  ├─ 2. Render  rasterise every page via pdfium (spawn_blocking) → slice-pics/<n>.png
//!  ├─ 3. Encode  PNG → base64 data URI
//!  ├─ 4. Parse   up to `workers` concurrent vision-model calls, each with a timeout
//!  └─ 5. Store   summaries/<n>.txt or <n>_error.txt per page, then _summary.txt
//! ```
//!
//! Standalone images (PNG, JPEG, GIF, BMP) can skip steps 1-2 through
//! [`Pipeline::process_images`]: each file becomes one item of a single batch
//! written under `Image Parse Results/<timestamp>/`.
//!
//! A failing page never stops the others: it becomes a `Failure(reason)` and an
//! error artifact. Only document-level problems (unreadable PDF, missing
//! pdfium, a page that will not render) abort a document.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slicebatch::{BatchConfig, CancelToken, FileSource, NoopObserver, Pipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = BatchConfig::builder()
//!         .api_key(std::env::var("ARK_API_KEY")?)
//!         .workers(3)
//!         .build()?;
//!     let pipeline = Pipeline::from_config(config)?;
//!     let (dir, report) = pipeline
//!         .process_document(
//!             &FileSource::new("plan.pdf"),
//!             slicebatch::prompts::DEFAULT_INSTRUCTION,
//!             Arc::new(NoopObserver),
//!             &CancelToken::new(),
//!         )
//!         .await?;
//!     println!("{}: {:.1}% of pages parsed", dir.display(), report.success_rate());
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | The `slicebatch` binary (clap, anyhow, tracing-subscriber, indicatif) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! slicebatch = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod batch;
pub mod config;
pub mod document;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod process;
pub mod progress;
pub mod prompts;
pub mod store;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use batch::{BatchCoordinator, BatchOptions, CancelToken};
pub use config::{BatchConfig, BatchConfigBuilder};
pub use document::{DocumentSource, FileSource, MemorySource, Page, PageKind};
pub use error::{ParseError, SliceError};
pub use output::{BatchReport, DocumentOutcome, PageFailure, ParseResult, RunReport};
pub use pipeline::llm::{PageParser, ProviderParser, SamplingParams, VisionClient};
pub use pipeline::render::Rasterizer;
pub use process::Pipeline;
pub use progress::{NoopObserver, ProgressEvent, ProgressObserver, SharedObserver, Stage};
pub use store::{DocumentLayout, ResultStore};
