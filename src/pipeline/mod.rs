//! Per-page stages: turn a PDF into page images and page images into text.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ llm
//! (pdfium)   (base64)   (vision model)
//! ```
//!
//! 1. [`render`]: rasterise every page in order; runs in `spawn_blocking`
//!    because pdfium is not async-safe
//! 2. [`encode`]: PNG-encode each page and wrap it in a data URI for the
//!    request body
//! 3. [`llm`]:    the [`llm::PageParser`] seam and its two backends; the only
//!    stage with network I/O

pub mod encode;
pub mod llm;
pub mod render;
