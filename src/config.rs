//! Configuration types for fetching, normalising and assembling documents.
//!
//! Everything the pipeline needs to know is carried by [`PipelineConfig`],
//! built via [`PipelineConfigBuilder`]. The network-facing subset lives in
//! [`FetchConfig`] and is handed to [`crate::pipeline::fetch::Fetcher::new`];
//! the fetcher owns the HTTP client built from it, so there is no process-wide
//! session or settings singleton.

use crate::error::{DocstampError, PageRangeError};
use crate::geometry::SUPPORTED_DPI;
use crate::progress::ProgressCallback;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Settings for the HTTP side of the source fetcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Name embedded in the `User-Agent` header. Default: `"filedl"`.
    pub client_name: String,

    /// Verify TLS certificates of remote sources. Default: true.
    pub verify_tls: bool,

    /// Whole-request timeout for URL inputs in seconds. Default: 120.
    pub timeout_secs: u64,

    /// Full `User-Agent` override. If None, `docstamp/<client_name>-<version>`.
    pub user_agent: Option<String>,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            client_name: "filedl".to_string(),
            verify_tls: true,
            timeout_secs: 120,
            user_agent: None,
        }
    }
}

impl FetchConfig {
    /// The `User-Agent` header value sent with every download.
    pub fn user_agent(&self) -> String {
        self.user_agent.clone().unwrap_or_else(|| {
            format!(
                "docstamp/{}-{}",
                self.client_name,
                env!("CARGO_PKG_VERSION")
            )
        })
    }
}

/// Configuration for an input-resolution pipeline.
///
/// Built via [`PipelineConfig::builder()`] or [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use docstamp::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .dpi(300)
///     .download_timeout_secs(30)
///     .verify_tls(false)
///     .build()
///     .unwrap();
/// assert_eq!(config.dpi, 300);
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// DPI used to fit images onto an A4 page. One of 72, 96, 150, 300. Default: 150.
    pub dpi: u32,

    /// Explicit image scale. `1.0` (default) means "fit to A4 at `dpi`";
    /// any other value sizes the page to `pixels * scale` points.
    pub image_scale: f32,

    /// HTTP client settings.
    pub fetch: FetchConfig,

    /// Directory downloads are written to. If None, a private temp directory
    /// is created per pipeline and removed when the pipeline is dropped.
    pub work_dir: Option<PathBuf>,

    /// Optional progress callback for per-input resolution events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dpi: 150,
            image_scale: 1.0,
            fetch: FetchConfig::default(),
            work_dir: None,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("dpi", &self.dpi)
            .field("image_scale", &self.image_scale)
            .field("fetch", &self.fetch)
            .field("work_dir", &self.work_dir)
            .field(
                "progress_callback",
                &self.progress_callback.as_ref().map(|_| "<dyn ResolveProgressCallback>"),
            )
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi;
        self
    }

    pub fn image_scale(mut self, scale: f32) -> Self {
        self.config.image_scale = scale;
        self
    }

    pub fn fetch(mut self, fetch: FetchConfig) -> Self {
        self.config.fetch = fetch;
        self
    }

    pub fn client_name(mut self, name: impl Into<String>) -> Self {
        self.config.fetch.client_name = name.into();
        self
    }

    pub fn verify_tls(mut self, verify: bool) -> Self {
        self.config.fetch.verify_tls = verify;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.fetch.timeout_secs = secs;
        self
    }

    pub fn user_agent(mut self, ua: impl Into<String>) -> Self {
        self.config.fetch.user_agent = Some(ua.into());
        self
    }

    pub fn work_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.work_dir = Some(dir.into());
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, DocstampError> {
        let c = &self.config;
        if !SUPPORTED_DPI.contains(&c.dpi) {
            return Err(DocstampError::InvalidConfig(format!(
                "DPI must be one of {:?}, got {}",
                SUPPORTED_DPI, c.dpi
            )));
        }
        if !(c.image_scale.is_finite() && c.image_scale > 0.0) {
            return Err(DocstampError::InvalidConfig(format!(
                "Image scale must be a positive number, got {}",
                c.image_scale
            )));
        }
        if c.fetch.timeout_secs == 0 {
            return Err(DocstampError::InvalidConfig(
                "Download timeout must be ≥ 1 second".into(),
            ));
        }
        Ok(self.config)
    }
}

// ── Page ranges ──────────────────────────────────────────────────────────

static PAGE_RANGES_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\d+(-\d+)?(,\d+(-\d+)?)*$").expect("static regex"));

/// Parse a page specifier such as `"1-2,3,4-5"` into inclusive `(start, end)`
/// pairs, in input order. Whitespace is ignored.
///
/// ```rust
/// use docstamp::config::parse_page_ranges;
///
/// assert_eq!(parse_page_ranges("3,1-2").unwrap(), vec![(3, 3), (1, 2)]);
/// assert!(parse_page_ranges("4-3").is_err());
/// ```
pub fn parse_page_ranges(input: &str) -> Result<Vec<(u32, u32)>, PageRangeError> {
    let compact: String = input.chars().filter(|c| !c.is_whitespace()).collect();
    let err = |reason: &str| PageRangeError {
        input: input.to_string(),
        reason: reason.to_string(),
    };

    if !PAGE_RANGES_RE.is_match(&compact) {
        return Err(err("expected comma-separated pages or ranges like '1-2,5'"));
    }

    compact
        .split(',')
        .map(|part| {
            let (start, end) = match part.split_once('-') {
                Some((s, e)) => (s, e),
                None => (part, part),
            };
            let start: u32 = start.parse().map_err(|_| err("page number too large"))?;
            let end: u32 = end.parse().map_err(|_| err("page number too large"))?;
            if start > end {
                return Err(err("start page is greater than end page"));
            }
            Ok((start, end))
        })
        .collect()
}

/// Expand 1-based page ranges into a set of 0-based page indices.
///
/// Page `0` has no 0-based counterpart and is ignored.
pub fn page_indices(ranges: &[(u32, u32)]) -> BTreeSet<usize> {
    ranges
        .iter()
        .flat_map(|&(start, end)| start.max(1)..=end)
        .map(|p| (p - 1) as usize)
        .collect()
}
