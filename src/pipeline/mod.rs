//! Input resolution stages.
//!
//! ```text
//! InputReference ──▶ fetch ──▶ normalize ──▶ ResolvedDocument
//! (path/URL/bytes)   (reqwest)  (image→PDF)
//! ```
//!
//! 1. [`fetch`] reads local files and downloads URLs into the work directory
//! 2. [`normalize`] turns decodable images into one-page PDFs; runs in
//!    `spawn_blocking` because decoding and deflating are CPU-bound
//! 3. [`resolve`] drives both over the whole input list in batches and
//!    memoises the result on a [`Pipeline`]

pub mod fetch;
pub mod normalize;
pub mod resolve;

pub use fetch::Fetcher;
pub use resolve::{Pipeline, ResolutionState, BATCH_SIZE};
