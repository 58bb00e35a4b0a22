//! Configuration types for a slicing-and-parsing run.
//!
//! All run behaviour is controlled through [`BatchConfig`], built via its
//! [`BatchConfigBuilder`]. Setters clamp values into their supported ranges;
//! [`BatchConfigBuilder::build`] validates what cannot be clamped.
//!
//! The instruction text is deliberately *not* part of the config: it is an
//! input of each run, like the documents themselves.

use crate::error::SliceError;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Supported rendering resolution range (dots per inch).
pub const DPI_RANGE: (u32, u32) = (100, 400);
/// Supported worker-count range.
pub const WORKER_RANGE: (usize, usize) = (1, 5);
/// Supported per-call timeout range in seconds.
pub const TIMEOUT_RANGE_SECS: (u64, u64) = (10, 300);

/// Default OpenAI-compatible endpoint.
pub const DEFAULT_BASE_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";
/// Default vision model identifier on [`DEFAULT_BASE_URL`].
pub const DEFAULT_MODEL: &str = "ep-20250425135316-55rdv";
/// Folder created under the home directory (desktop when present) for results.
pub const DEFAULT_OUTPUT_FOLDER: &str = "PDF Parse Results";

/// Configuration for processing one or more PDF documents.
///
/// # Example
/// ```rust
/// use slicebatch::BatchConfig;
///
/// let config = BatchConfig::builder()
///     .dpi(150)
///     .workers(3)
///     .api_key("sk-test")
///     .output_root("/tmp/results")
///     .build()
///     .unwrap();
/// assert_eq!(config.workers, 3);
/// ```
#[derive(Clone)]
pub struct BatchConfig {
    /// Rendering DPI. Range: 100–400. Default: 200.
    ///
    /// Pixel size of a page is its point size × `dpi / 72`.
    pub dpi: u32,

    /// Maximum number of concurrent model calls. Range: 1–5. Default: 2.
    ///
    /// The cap exists to bound load on the remote endpoint.
    pub workers: usize,

    /// Per-call timeout in seconds. Range: 10–300. Default: 60.
    pub api_timeout_secs: u64,

    /// Root directory; each document gets `<root>/<stem>/`.
    pub output_root: PathBuf,

    /// Maximum documents per invocation. Default: 20.
    pub max_documents: usize,

    /// Wrap success artifacts in a page/timestamp header and footer. Default: true.
    pub provenance_header: bool,

    /// Base URL of the OpenAI-compatible endpoint (without `/chat/completions`).
    pub base_url: String,

    /// Model identifier sent with every request.
    pub model: String,

    /// Bearer credential. Required by [`crate::pipeline::llm::VisionClient`].
    pub api_key: Option<String>,

    /// Maximum tokens the model may generate per page. Default: 4096.
    pub max_tokens: usize,

    /// Sampling temperature. Default: 0.7.
    pub temperature: f32,

    /// Nucleus sampling. Default: 0.9.
    pub top_p: f32,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Explicit pdfium shared-library location (file or directory).
    pub pdfium_library_path: Option<PathBuf>,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            workers: 2,
            api_timeout_secs: 60,
            output_root: default_output_root(),
            max_documents: 20,
            provenance_header: true,
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key: None,
            max_tokens: 4096,
            temperature: 0.7,
            top_p: 0.9,
            password: None,
            pdfium_library_path: None,
        }
    }
}

impl fmt::Debug for BatchConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchConfig")
            .field("dpi", &self.dpi)
            .field("workers", &self.workers)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("output_root", &self.output_root)
            .field("max_documents", &self.max_documents)
            .field("provenance_header", &self.provenance_header)
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("top_p", &self.top_p)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("pdfium_library_path", &self.pdfium_library_path)
            .finish()
    }
}

impl BatchConfig {
    /// Create a new builder for `BatchConfig`.
    pub fn builder() -> BatchConfigBuilder {
        BatchConfigBuilder {
            config: Self::default(),
        }
    }

    /// Per-call timeout as a [`Duration`].
    pub fn api_timeout(&self) -> Duration {
        Duration::from_secs(self.api_timeout_secs)
    }
}

/// `~/Desktop/PDF Parse Results`, or `~/PDF Parse Results` without a desktop
/// directory, or a relative folder when no home directory is known.
pub fn default_output_root() -> PathBuf {
    dirs::desktop_dir()
        .or_else(dirs::home_dir)
        .map(|base| base.join(DEFAULT_OUTPUT_FOLDER))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_OUTPUT_FOLDER))
}

/// Builder for [`BatchConfig`].
#[derive(Debug)]
pub struct BatchConfigBuilder {
    config: BatchConfig,
}

impl BatchConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(DPI_RANGE.0, DPI_RANGE.1);
        self
    }

    pub fn workers(mut self, n: usize) -> Self {
        self.config.workers = n.clamp(WORKER_RANGE.0, WORKER_RANGE.1);
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.clamp(TIMEOUT_RANGE_SECS.0, TIMEOUT_RANGE_SECS.1);
        self
    }

    pub fn output_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.config.output_root = root.into();
        self
    }

    pub fn max_documents(mut self, n: usize) -> Self {
        self.config.max_documents = n.max(1);
        self
    }

    pub fn provenance_header(mut self, v: bool) -> Self {
        self.config.provenance_header = v;
        self
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = model.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = Some(key.into());
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n.max(1);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn top_p(mut self, p: f32) -> Self {
        self.config.top_p = p.clamp(0.0, 1.0);
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn pdfium_library_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.pdfium_library_path = Some(path.into());
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<BatchConfig, SliceError> {
        let c = &self.config;
        if c.dpi < DPI_RANGE.0 || c.dpi > DPI_RANGE.1 {
            return Err(SliceError::InvalidConfig(format!(
                "DPI must be {}–{}, got {}",
                DPI_RANGE.0, DPI_RANGE.1, c.dpi
            )));
        }
        if c.workers < WORKER_RANGE.0 || c.workers > WORKER_RANGE.1 {
            return Err(SliceError::InvalidConfig(format!(
                "Workers must be {}–{}, got {}",
                WORKER_RANGE.0, WORKER_RANGE.1, c.workers
            )));
        }
        if c.api_timeout_secs < TIMEOUT_RANGE_SECS.0 || c.api_timeout_secs > TIMEOUT_RANGE_SECS.1 {
            return Err(SliceError::InvalidConfig(format!(
                "Timeout must be {}–{}s, got {}s",
                TIMEOUT_RANGE_SECS.0, TIMEOUT_RANGE_SECS.1, c.api_timeout_secs
            )));
        }
        let base = c.base_url.trim();
        if !(base.starts_with("http://") || base.starts_with("https://")) {
            return Err(SliceError::InvalidConfig(format!(
                "Base URL must be http(s), got '{}'",
                c.base_url
            )));
        }
        if c.model.trim().is_empty() {
            return Err(SliceError::InvalidConfig("Model must not be empty".into()));
        }
        if c.output_root.as_os_str().is_empty() {
            return Err(SliceError::InvalidConfig(
                "Output root must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_reference_deployment() {
        let c = BatchConfig::default();
        assert_eq!(c.dpi, 200);
        assert_eq!(c.workers, 2);
        assert_eq!(c.api_timeout_secs, 60);
        assert_eq!(c.max_documents, 20);
        assert_eq!(c.max_tokens, 4096);
        assert!(c.provenance_header);
        assert!(c.output_root.ends_with(DEFAULT_OUTPUT_FOLDER));
    }

    #[test]
    fn setters_clamp_into_range() {
        let c = BatchConfig::builder()
            .dpi(900)
            .workers(0)
            .api_timeout_secs(1)
            .build()
            .unwrap();
        assert_eq!(c.dpi, 400);
        assert_eq!(c.workers, 1);
        assert_eq!(c.api_timeout_secs, 10);

        let c = BatchConfig::builder().dpi(10).workers(64).build().unwrap();
        assert_eq!(c.dpi, 100);
        assert_eq!(c.workers, 5);
    }

    #[test]
    fn build_rejects_bad_base_url() {
        let err = BatchConfig::builder()
            .base_url("ftp://example.com")
            .build()
            .unwrap_err();
        assert!(matches!(err, SliceError::InvalidConfig(_)));
    }

    #[test]
    fn build_rejects_empty_model() {
        assert!(BatchConfig::builder().model("  ").build().is_err());
    }

    #[test]
    fn debug_redacts_secrets() {
        let c = BatchConfig::builder()
            .api_key("sk-very-secret")
            .password("hunter2")
            .build()
            .unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("sk-very-secret"));
        assert!(!dbg.contains("hunter2"));
        assert!(dbg.contains("<redacted>"));
    }
}
