//! PDF rasterisation: render every page to PNG via pdfium.
//!
//! pdfium is CPU-bound and not async-safe, so all of it runs inside
//! `tokio::task::spawn_blocking`.
//!
//! A page's pixel size is its native point size × `dpi / 72`. Pages are
//! rendered strictly in order and each PNG is on disk before the next page
//! starts. A page that fails to render or encode aborts the whole document.

use crate::config::BatchConfig;
use crate::document::{Page, PageKind};
use crate::error::SliceError;
use crate::pipeline::encode;
use crate::progress::{ProgressEvent, ProgressObserver, SharedObserver, Stage};
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

/// File name of the image for a 1-indexed page.
pub fn page_image_name(page_num: u32) -> String {
    format!("{page_num}.png")
}

/// Renders PDF documents into page images at a fixed resolution.
#[derive(Debug, Clone)]
pub struct Rasterizer {
    dpi: u32,
    password: Option<String>,
    library_path: Option<PathBuf>,
}

impl Rasterizer {
    pub fn new(dpi: u32) -> Self {
        Self {
            dpi,
            password: None,
            library_path: None,
        }
    }

    pub fn from_config(config: &BatchConfig) -> Self {
        Self {
            dpi: config.dpi,
            password: config.password.clone(),
            library_path: config.pdfium_library_path.clone(),
        }
    }

    pub fn dpi(&self) -> u32 {
        self.dpi
    }

    /// Render every page of `pdf_path` into `images_dir/<n>.png`.
    ///
    /// `document` labels progress events. Returns pages in increasing
    /// page-number order, or an error and no pages.
    pub async fn rasterize(
        &self,
        pdf_path: &Path,
        document: &str,
        images_dir: &Path,
        observer: SharedObserver,
    ) -> Result<Vec<Page>, SliceError> {
        let this = self.clone();
        let path = pdf_path.to_path_buf();
        let dir = images_dir.to_path_buf();
        let document = document.to_string();

        tokio::task::spawn_blocking(move || {
            this.rasterize_blocking(&path, &document, &dir, observer.as_ref())
        })
        .await
        .map_err(|e| SliceError::Internal(format!("Render task panicked: {}", e)))?
    }

    fn rasterize_blocking(
        &self,
        pdf_path: &Path,
        document_name: &str,
        images_dir: &Path,
        observer: &dyn ProgressObserver,
    ) -> Result<Vec<Page>, SliceError> {
        let pdfium = bind_pdfium(self.library_path.as_deref())?;

        let document = pdfium
            .load_pdf_from_file(pdf_path, self.password.as_deref())
            .map_err(|e| unreadable(document_name, self.password.is_some(), &e))?;

        let pages = document.pages();
        let total = pages.len() as usize;
        info!("{}: {} pages at {} DPI", document_name, total, self.dpi);

        std::fs::create_dir_all(images_dir)
            .map_err(|e| SliceError::persistence(images_dir, e))?;

        let scale = self.dpi as f32 / 72.0;
        let render_config = PdfRenderConfig::new().scale_page_by_factor(scale);

        let mut results = Vec::with_capacity(total);
        for idx in 0..total {
            let page_num = idx as u32 + 1;
            let page = pages
                .get(idx as u16)
                .map_err(|e| SliceError::PageRender {
                    page: page_num,
                    detail: format!("{:?}", e),
                })?;

            let width_pt = page.width().value;
            let height_pt = page.height().value;

            let bitmap = page
                .render_with_config(&render_config)
                .map_err(|e| SliceError::PageRender {
                    page: page_num,
                    detail: format!("{:?}", e),
                })?;
            let image = bitmap.as_image();

            let png = encode::encode_png(&image).map_err(|e| SliceError::PageRender {
                page: page_num,
                detail: format!("PNG encoding failed: {}", e),
            })?;

            let out = images_dir.join(page_image_name(page_num));
            std::fs::write(&out, &png).map_err(|e| SliceError::persistence(&out, e))?;
            debug!(
                "Rendered page {} → {}x{} px, {}",
                page_num,
                image.width(),
                image.height(),
                out.display()
            );

            results.push(Page {
                number: page_num,
                kind: PageKind::Document,
                image: Arc::from(png),
                media_type: "image/png",
                width_px: image.width(),
                height_px: image.height(),
                dpi: self.dpi,
                width_pt,
                height_pt,
            });

            observer.on_event(&ProgressEvent {
                stage: Stage::Rendering,
                document: document_name.to_string(),
                completed: results.len(),
                total,
                failed: 0,
                current_label: format!("page {page_num}"),
            });
        }

        Ok(results)
    }
}

/// Bind pdfium from, in order: `library_path`, `PDFIUM_LIB_PATH`, the working
/// directory, the system library path. A directory path is resolved to the
/// platform library name inside it.
pub fn bind_pdfium(library_path: Option<&Path>) -> Result<Pdfium, SliceError> {
    let explicit = library_path
        .map(Path::to_path_buf)
        .or_else(|| std::env::var_os("PDFIUM_LIB_PATH").map(PathBuf::from));

    let bindings = match explicit {
        Some(path) => {
            let lib = if path.is_dir() {
                Pdfium::pdfium_platform_library_name_at_path(&path)
            } else {
                path
            };
            Pdfium::bind_to_library(&lib)
                .map_err(|e| SliceError::PdfiumUnavailable(format!("{}: {:?}", lib.display(), e)))?
        }
        None => Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
            .or_else(|_| Pdfium::bind_to_system_library())
            .map_err(|e| SliceError::PdfiumUnavailable(format!("{:?}", e)))?,
    };

    Ok(Pdfium::new(bindings))
}

fn unreadable(name: &str, had_password: bool, err: &PdfiumError) -> SliceError {
    let err_str = format!("{:?}", err);
    let detail = if err_str.contains("Password") || err_str.contains("password") {
        if had_password {
            "wrong password".to_string()
        } else {
            "document is encrypted and requires a password".to_string()
        }
    } else {
        err_str
    };
    SliceError::DocumentUnreadable {
        name: name.to_string(),
        detail,
    }
}
