//! # docstamp
//!
//! Fetch, merge and stamp PDF and image documents.
//!
//! Inputs can be local paths, `file://` or `http(s)://` URLs, in-memory byte
//! streams or already-decoded images. Each input is fetched and, if it is an
//! image, converted to a one-page PDF. The resolved documents can then be
//! concatenated (with one outline entry per input) or stamped with text, an
//! image or another PDF.
//!
//! ## Pipeline Overview
//!
//! ```text
//! inputs
//!  │
//!  ├─ 1. Fetch      read local files, download URLs (5 in flight)
//!  ├─ 2. Normalize  images → one-page PDFs (spawn_blocking)
//!  ├─ 3a. Merge     renumber objects, rebuild page tree + outline + AcroForm
//!  ├─ 3b. Stamp     render overlay per page size, composite as Form XObject
//!  └─ 4. Output     path, caller sink, or spooled temporary
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use docstamp::{PdfTransform, PipelineConfig, StampOptions, StampSpec, TextStamp};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut transform = PdfTransform::from_sources(["report.pdf"], PipelineConfig::default())?;
//!     let mut stamp = TextStamp::new("DRAFT");
//!     stamp.over = true;
//!     let results = transform
//!         .stamp(&StampSpec::Text(stamp), StampOptions::default())
//!         .await?;
//!     for mut r in results {
//!         let len = r.read_all()?.len();
//!         eprintln!("{}: {} bytes", r.filename, len);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature  | Default | Description |
//! |----------|---------|-------------|
//! | `cli`    | on      | Enables the `docstamp` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `server` | off     | Adds `docstamp serve`, an axum HTTP API |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! docstamp = { version = "0.3", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod assemble;
pub mod config;
pub mod document;
pub mod error;
pub mod geometry;
pub mod output;
pub mod pdf;
pub mod pipeline;
pub mod progress;
#[cfg(feature = "server")]
pub mod server;
pub mod stamp;
pub mod transform;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{
    page_indices, parse_page_ranges, FetchConfig, PipelineConfig, PipelineConfigBuilder,
};
pub use document::{ByteStream, DecodedImage, InputReference, ResolvedDocument};
pub use error::{AssemblyError, DocstampError, FetchError, PageRangeError, StampError};
pub use geometry::{get_position, Anchor, Color, PageFormat, PageGeometry, Point};
pub use output::{OutputSpec, ResultDescriptor, ResultSummary};
pub use pipeline::{Pipeline, ResolutionState, BATCH_SIZE};
pub use progress::{NoopProgressCallback, ProgressCallback, ResolveProgressCallback};
pub use stamp::{ImageStamp, PdfStamp, StampLayout, StampSource, StampSpec, TextStamp};
pub use transform::{merge_sync, merge_to_file, MergeOptions, PdfTransform, StampOptions};
