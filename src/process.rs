//! Per-document and multi-document orchestration.
//!
//! One document goes through:
//!
//! ```text
//! read bytes ─▶ %PDF check ─▶ layout + source copy
//!            ─▶ rasterize ─▶ batch ─▶ _summary.txt
//! ```
//!
//! Anything before the batch that fails aborts the document with a
//! [`SliceError`]. [`Pipeline::process_documents`] records that as a failed
//! document and moves on to the next one.
//!
//! [`Pipeline::process_images`] skips rasterisation: each image file is one
//! item of a single batch, and a file that cannot be decoded fails alone.

use crate::batch::{BatchCoordinator, BatchOptions, CancelToken};
use crate::config::BatchConfig;
use crate::document::{check_pdf_magic, document_stem, DocumentSource, Page};
use crate::error::SliceError;
use crate::output::{BatchReport, DocumentOutcome, PageFailure, RunReport, CANCELLED_REASON};
use crate::pipeline::encode;
use crate::pipeline::llm::{PageParser, VisionClient};
use crate::pipeline::render::Rasterizer;
use crate::progress::SharedObserver;
use crate::store::{DocumentLayout, ResultStore};
use chrono::Local;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};

/// Everything needed to process documents with one configuration.
#[derive(Clone)]
pub struct Pipeline {
    config: BatchConfig,
    rasterizer: Rasterizer,
    coordinator: BatchCoordinator,
}

impl Pipeline {
    pub fn new(config: BatchConfig, parser: Arc<dyn PageParser>) -> Self {
        let rasterizer = Rasterizer::from_config(&config);
        let coordinator = BatchCoordinator::new(
            parser,
            BatchOptions {
                workers: config.workers,
                timeout: config.api_timeout(),
            },
        );
        Self {
            config,
            rasterizer,
            coordinator,
        }
    }

    /// Pipeline backed by the OpenAI-compatible endpoint in `config`.
    pub fn from_config(config: BatchConfig) -> Result<Self, SliceError> {
        let client = VisionClient::from_config(&config)?;
        Ok(Self::new(config, Arc::new(client)))
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Process one document; returns its output directory and report.
    pub async fn process_document(
        &self,
        source: &dyn DocumentSource,
        instruction: &str,
        observer: SharedObserver,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, BatchReport), SliceError> {
        let name = source.name().to_string();
        let bytes = source
            .read_bytes()
            .map_err(|e| SliceError::DocumentUnreadable {
                name: name.clone(),
                detail: e.to_string(),
            })?;
        check_pdf_magic(&name, &bytes)?;

        let layout = DocumentLayout::new(&self.config.output_root, &name);
        layout.create().await?;
        let store = ResultStore::new(layout.clone(), self.config.provenance_header);
        let pdf_path = store.save_source(&name, &bytes).await?;
        drop(bytes);
        info!("{}: output in {}", name, layout.dir.display());

        let pages = self
            .rasterizer
            .rasterize(&pdf_path, &name, &layout.images_dir, Arc::clone(&observer))
            .await?;
        store.stale_artifacts(pages.len()).await?;

        let report = self
            .coordinator
            .run(&name, &pages, instruction, &store, observer.as_ref(), cancel)
            .await?;
        store.write_summary(&report).await?;

        Ok((layout.dir, report))
    }

    /// Parse standalone image files (PNG, JPEG, GIF, BMP) as one batch.
    ///
    /// Images are numbered by input position and written under a fresh
    /// `Image Parse Results/<YYYYmmdd_HHMMSS>/` directory. An input that
    /// cannot be read or decoded is recorded as that item's failure; the
    /// others are still parsed.
    pub async fn process_images(
        &self,
        sources: &[Box<dyn DocumentSource>],
        instruction: &str,
        observer: SharedObserver,
        cancel: &CancelToken,
    ) -> Result<(PathBuf, BatchReport), SliceError> {
        if sources.is_empty() {
            return Err(SliceError::InvalidInput("no images given".into()));
        }

        let layout = DocumentLayout::for_images(&self.config.output_root, Local::now());
        layout.create().await?;
        let store = ResultStore::new(layout.clone(), self.config.provenance_header);
        let batch = layout
            .dir
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "images".to_string());
        info!("{} images: output in {}", sources.len(), layout.dir.display());

        let mut items = Vec::with_capacity(sources.len());
        let mut labels = BTreeMap::new();
        for (idx, source) in sources.iter().enumerate() {
            let number = idx as u32 + 1;
            labels.insert(number, source.name().to_string());

            let loaded = match source.read_bytes() {
                Err(e) => Err(format!("unreadable: {e}")),
                Ok(bytes) => match encode::prepare_image(&bytes) {
                    Err(e) => Err(format!("unsupported image: {e}")),
                    Ok(img) => {
                        let copy = format!("{number}.{}", img.extension);
                        store.save_source(&copy, &bytes).await?;
                        Ok(Page::from_image(
                            number,
                            img.bytes,
                            img.media_type,
                            img.width,
                            img.height,
                        ))
                    }
                },
            };
            items.push(loaded.map_err(|reason| PageFailure {
                page: number,
                reason,
            }));
        }

        let mut report = self
            .coordinator
            .run_items(&batch, &items, instruction, &store, observer.as_ref(), cancel)
            .await?;
        report.labels = labels;
        store.write_summary(&report).await?;

        Ok((layout.dir, report))
    }

    /// Process `sources` one after another.
    ///
    /// A document-level error is recorded and the run continues. Documents
    /// not yet started when `cancel` fires are recorded as cancelled.
    pub async fn process_documents(
        &self,
        sources: &[Box<dyn DocumentSource>],
        instruction: &str,
        observer: SharedObserver,
        cancel: &CancelToken,
    ) -> Result<RunReport, SliceError> {
        if sources.is_empty() {
            return Err(SliceError::InvalidInput("no documents given".into()));
        }
        if sources.len() > self.config.max_documents {
            return Err(SliceError::TooManyDocuments {
                count: sources.len(),
                max: self.config.max_documents,
            });
        }
        let mut stems: HashMap<String, &str> = HashMap::new();
        for source in sources {
            let stem = document_stem(source.name());
            if let Some(previous) = stems.insert(stem.clone(), source.name()) {
                return Err(SliceError::InvalidInput(format!(
                    "'{}' and '{}' would both write to '{}'",
                    previous,
                    source.name(),
                    stem
                )));
            }
        }

        let mut run = RunReport::default();
        for source in sources {
            let name = source.name().to_string();
            if cancel.is_cancelled() {
                warn!("{}: skipped, run cancelled", name);
                run.documents.push(DocumentOutcome::Failed {
                    document: name,
                    error: CANCELLED_REASON.to_string(),
                });
                continue;
            }

            let outcome = match self
                .process_document(source.as_ref(), instruction, Arc::clone(&observer), cancel)
                .await
            {
                Ok((output_dir, report)) => DocumentOutcome::Completed { output_dir, report },
                Err(e) => {
                    error!("{}: {}", name, e);
                    DocumentOutcome::Failed {
                        document: name,
                        error: e.to_string(),
                    }
                }
            };
            run.documents.push(outcome);
        }
        Ok(run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::MemorySource;
    use crate::error::ParseError;
    use crate::progress::NoopObserver;
    use async_trait::async_trait;
    use std::time::Duration;

    struct Unused;

    #[async_trait]
    impl PageParser for Unused {
        async fn parse_page(&self, _: &Page, _: &str, _: Duration) -> Result<String, ParseError> {
            Err(ParseError::Provider("not expected".into()))
        }
    }

    fn pipeline(root: &std::path::Path, max_documents: usize) -> Pipeline {
        let config = BatchConfig::builder()
            .output_root(root)
            .max_documents(max_documents)
            .build()
            .unwrap();
        Pipeline::new(config, Arc::new(Unused))
    }

    #[tokio::test]
    async fn too_many_documents_is_rejected_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), 1);
        let sources: Vec<Box<dyn DocumentSource>> = vec![
            Box::new(MemorySource::new("a.pdf", b"%PDF".to_vec())),
            Box::new(MemorySource::new("b.pdf", b"%PDF".to_vec())),
        ];
        let err = p
            .process_documents(&sources, "x", Arc::new(NoopObserver), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::TooManyDocuments { count: 2, max: 1 }));
    }

    #[tokio::test]
    async fn cancelled_run_skips_remaining_documents() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), 5);
        let sources: Vec<Box<dyn DocumentSource>> =
            vec![Box::new(MemorySource::new("a.pdf", b"%PDF".to_vec()))];
        let cancel = CancelToken::new();
        cancel.cancel();
        let run = p
            .process_documents(&sources, "x", Arc::new(NoopObserver), &cancel)
            .await
            .unwrap();
        assert_eq!(run.failed_documents(), 1);
        assert!(!dir.path().join("a").exists());
    }

    #[tokio::test]
    async fn documents_sharing_a_stem_are_rejected_before_any_work() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), 5);
        let sources: Vec<Box<dyn DocumentSource>> = vec![
            Box::new(MemorySource::new("in/report.pdf", b"%PDF".to_vec())),
            Box::new(MemorySource::new("other.pdf", b"%PDF".to_vec())),
            Box::new(MemorySource::new("archive/report.PDF", b"%PDF".to_vec())),
        ];
        let err = p
            .process_documents(&sources, "x", Arc::new(NoopObserver), &CancelToken::new())
            .await
            .unwrap_err();
        match err {
            SliceError::InvalidInput(msg) => {
                assert!(msg.contains("in/report.pdf"), "got {msg}");
                assert!(msg.contains("archive/report.PDF"), "got {msg}");
            }
            other => panic!("expected InvalidInput, got {other:?}"),
        }
        assert!(!dir.path().join("report").exists());
        assert!(!dir.path().join("other").exists());
    }

    #[tokio::test]
    async fn empty_image_batch_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let p = pipeline(dir.path(), 5);
        let err = p
            .process_images(&[], "x", Arc::new(NoopObserver), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, SliceError::InvalidInput(_)));
        assert!(!dir.path().join("Image Parse Results").exists());
    }

    #[test]
    fn from_config_needs_an_api_key() {
        let config = BatchConfig::builder().build().unwrap();
        assert!(Pipeline::from_config(config).is_err());
    }
}
