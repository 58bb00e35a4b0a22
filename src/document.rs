//! Source documents and rendered pages.
//!
//! A document enters the pipeline as anything implementing
//! [`DocumentSource`]: a name plus readable bytes. The name decides the output
//! directory (`<root>/<stem>/`) and the file name of the saved source copy.

use crate::error::SliceError;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// PDF files start with this signature.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A readable byte source with a name.
pub trait DocumentSource: Send + Sync {
    /// Original file name, e.g. `report.pdf`.
    fn name(&self) -> &str;

    /// Read the whole document.
    fn read_bytes(&self) -> std::io::Result<Vec<u8>>;
}

/// A PDF on the local filesystem.
#[derive(Debug, Clone)]
pub struct FileSource {
    path: PathBuf,
    name: String,
}

impl FileSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "document.pdf".to_string());
        Self { path, name }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl DocumentSource for FileSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        std::fs::read(&self.path)
    }
}

/// A PDF already held in memory (uploads, database blobs, tests).
#[derive(Debug, Clone)]
pub struct MemorySource {
    name: String,
    bytes: Arc<[u8]>,
}

impl MemorySource {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

impl DocumentSource for MemorySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn read_bytes(&self) -> std::io::Result<Vec<u8>> {
        Ok(self.bytes.to_vec())
    }
}

/// Output directory name for a document: the file name without a trailing
/// `.pdf` (any case). Path separators in the name are ignored.
pub fn document_stem(name: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string());
    let stem = if base.len() > 4 && base.is_char_boundary(base.len() - 4) {
        let (head, ext) = base.split_at(base.len() - 4);
        if ext.eq_ignore_ascii_case(".pdf") {
            head.to_string()
        } else {
            base.clone()
        }
    } else {
        base.clone()
    };
    if stem.trim().is_empty() {
        "document".to_string()
    } else {
        stem
    }
}

/// Check the `%PDF` signature before handing bytes to pdfium.
pub fn check_pdf_magic(name: &str, bytes: &[u8]) -> Result<(), SliceError> {
    if bytes.len() < PDF_MAGIC.len() {
        return Err(SliceError::DocumentUnreadable {
            name: name.to_string(),
            detail: format!("file is too short to be a PDF ({} bytes)", bytes.len()),
        });
    }
    if &bytes[..4] != PDF_MAGIC {
        let mut magic = [0u8; 4];
        magic.copy_from_slice(&bytes[..4]);
        return Err(SliceError::DocumentUnreadable {
            name: name.to_string(),
            detail: format!("not a PDF, first bytes: {magic:?}"),
        });
    }
    Ok(())
}

/// Where a [`Page`] image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PageKind {
    /// Rasterised from a PDF page.
    Document,
    /// Supplied directly as an image file.
    Image,
}

/// One raster image handed to the parser: a rendered PDF page or a
/// standalone image.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    /// 1-indexed, unique within its batch.
    pub number: u32,
    pub kind: PageKind,
    /// Encoded image (PNG for rendered pages).
    #[serde(skip)]
    pub image: Arc<[u8]>,
    /// Media type of `image`.
    pub media_type: &'static str,
    pub width_px: u32,
    pub height_px: u32,
    /// Resolution the page was rendered at.
    pub dpi: u32,
    /// Native page size in PDF points (1/72 inch).
    pub width_pt: f32,
    pub height_pt: f32,
}

impl Page {
    /// Build a page from already-encoded PNG bytes.
    pub fn from_png(
        number: u32,
        png: impl Into<Arc<[u8]>>,
        width_px: u32,
        height_px: u32,
        dpi: u32,
    ) -> Self {
        let scale = 72.0 / dpi.max(1) as f32;
        Self {
            number,
            kind: PageKind::Document,
            image: png.into(),
            media_type: "image/png",
            width_px,
            height_px,
            dpi,
            width_pt: width_px as f32 * scale,
            height_pt: height_px as f32 * scale,
        }
    }

    /// Wrap an image file's bytes. Images have no native page size, so
    /// points are reported at 72 DPI (one point per pixel).
    pub fn from_image(
        number: u32,
        bytes: impl Into<Arc<[u8]>>,
        media_type: &'static str,
        width_px: u32,
        height_px: u32,
    ) -> Self {
        Self {
            number,
            kind: PageKind::Image,
            image: bytes.into(),
            media_type,
            width_px,
            height_px,
            dpi: 72,
            width_pt: width_px as f32,
            height_pt: height_px as f32,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stem_strips_pdf_extension_any_case() {
        assert_eq!(document_stem("report.pdf"), "report");
        assert_eq!(document_stem("REPORT.PDF"), "REPORT");
        assert_eq!(document_stem("scan.2024.Pdf"), "scan.2024");
        assert_eq!(document_stem("notes.txt"), "notes.txt");
        assert_eq!(document_stem("dir/sub/plan.pdf"), "plan");
        assert_eq!(document_stem(".pdf"), ".pdf");
        assert_eq!(document_stem(""), "document");
    }

    #[test]
    fn stem_handles_multibyte_names() {
        assert_eq!(document_stem("设计方案.pdf"), "设计方案");
        assert_eq!(document_stem("设计"), "设计");
    }

    #[test]
    fn magic_check() {
        assert!(check_pdf_magic("a.pdf", b"%PDF-1.7\n...").is_ok());
        assert!(matches!(
            check_pdf_magic("a.pdf", b"PK\x03\x04zip"),
            Err(SliceError::DocumentUnreadable { .. })
        ));
        assert!(matches!(
            check_pdf_magic("a.pdf", b"%P"),
            Err(SliceError::DocumentUnreadable { .. })
        ));
    }

    #[test]
    fn memory_source_round_trips_bytes() {
        let src = MemorySource::new("m.pdf", b"%PDF-1.4".to_vec());
        assert_eq!(src.name(), "m.pdf");
        assert_eq!(src.read_bytes().unwrap(), b"%PDF-1.4");
    }

    #[test]
    fn file_source_takes_file_name() {
        let src = FileSource::new("/some/where/Annual Report.pdf");
        assert_eq!(src.name(), "Annual Report.pdf");
        assert!(src.read_bytes().is_err());
    }

    #[test]
    fn page_points_follow_dpi() {
        let page = Page::from_png(1, vec![0u8; 4], 1700, 2200, 200);
        assert!((page.width_pt - 612.0).abs() < 0.01);
        assert!((page.height_pt - 792.0).abs() < 0.01);
        assert_eq!(page.kind, PageKind::Document);
    }

    #[test]
    fn image_page_reports_pixels_as_points() {
        let page = Page::from_image(3, vec![0u8; 4], "image/jpeg", 640, 480);
        assert_eq!(page.kind, PageKind::Image);
        assert_eq!(page.media_type, "image/jpeg");
        assert_eq!((page.width_pt, page.height_pt), (640.0, 480.0));
    }
}
