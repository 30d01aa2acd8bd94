//! Batched, order-preserving resolution of an input list.
//!
//! Inputs are processed in consecutive batches of [`BATCH_SIZE`]. Members of
//! one batch are fetched and normalised concurrently; the next batch starts
//! only after the whole batch finished. The first failure aborts the run:
//! in-flight siblings are dropped (which cancels their requests) and no
//! further batch starts.

use crate::config::PipelineConfig;
use crate::document::{InputReference, ResolvedDocument};
use crate::error::DocstampError;
use crate::pipeline::fetch::Fetcher;
use crate::pipeline::normalize::{normalize, normalize_image};
use crate::progress::ResolveProgressCallback;
use futures::future::try_join_all;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};

/// Maximum number of inputs resolved at the same time.
pub const BATCH_SIZE: usize = 5;

/// Memoised result of resolving the current inputs.
#[derive(Debug, Clone, Default)]
pub enum ResolutionState {
    #[default]
    Unresolved,
    Resolved(Vec<ResolvedDocument>),
}

/// Owns an input list, the fetcher and its work directory.
///
/// The resolved list is computed on first use and reused until the inputs
/// change or [`Pipeline::invalidate`] is called. A failed resolution leaves
/// the pipeline unresolved, so the next call retries from scratch.
pub struct Pipeline {
    inputs: Vec<InputReference>,
    state: ResolutionState,
    config: PipelineConfig,
    fetcher: Fetcher,
    // Declared last so it is removed after the fetcher is gone.
    _work_dir: Option<TempDir>,
}

impl Pipeline {
    pub fn new(inputs: Vec<InputReference>, config: PipelineConfig) -> Result<Self, DocstampError> {
        let (work_dir, dest) = match &config.work_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir).map_err(|e| {
                    DocstampError::InvalidConfig(format!("work dir {}: {e}", dir.display()))
                })?;
                (None, dir.clone())
            }
            None => {
                let tmp = tempfile::Builder::new()
                    .prefix("docstamp-")
                    .tempdir()
                    .map_err(|e| DocstampError::Internal(format!("temp dir: {e}")))?;
                let path = tmp.path().to_path_buf();
                (Some(tmp), path)
            }
        };
        let fetcher = Fetcher::new(config.fetch.clone(), dest)?;
        Ok(Self {
            inputs,
            state: ResolutionState::Unresolved,
            config,
            fetcher,
            _work_dir: work_dir,
        })
    }

    pub fn inputs(&self) -> &[InputReference] {
        &self.inputs
    }

    /// Replace the inputs; the memoised result is dropped.
    pub fn set_inputs(&mut self, inputs: Vec<InputReference>) {
        self.inputs = inputs;
        self.invalidate();
    }

    /// Forget the memoised result.
    pub fn invalidate(&mut self) {
        self.state = ResolutionState::Unresolved;
    }

    pub fn is_resolved(&self) -> bool {
        matches!(self.state, ResolutionState::Resolved(_))
    }

    pub fn state(&self) -> &ResolutionState {
        &self.state
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn fetcher(&self) -> &Fetcher {
        &self.fetcher
    }

    /// Resolve all inputs, or return the memoised list.
    pub async fn resolve(&mut self) -> Result<&[ResolvedDocument], DocstampError> {
        if !self.is_resolved() {
            let docs = resolve_all(&self.inputs, &self.fetcher, &self.config).await?;
            self.state = ResolutionState::Resolved(docs);
        }
        match &self.state {
            ResolutionState::Resolved(docs) => Ok(docs),
            ResolutionState::Unresolved => Err(DocstampError::Internal(
                "resolution finished without a result".into(),
            )),
        }
    }
}

/// Resolve `inputs` in batches, preserving order.
pub async fn resolve_all(
    inputs: &[InputReference],
    fetcher: &Fetcher,
    config: &PipelineConfig,
) -> Result<Vec<ResolvedDocument>, DocstampError> {
    let callback = config.progress_callback.clone();
    if let Some(cb) = &callback {
        cb.on_resolve_start(inputs.len());
    }
    info!("Resolving {} inputs in batches of {}", inputs.len(), BATCH_SIZE);

    let mut resolved = Vec::with_capacity(inputs.len());
    for (batch_no, batch) in inputs.chunks(BATCH_SIZE).enumerate() {
        let base = batch_no * BATCH_SIZE;
        debug!("Batch {}: inputs {}..{}", batch_no, base, base + batch.len());
        let futures = batch
            .iter()
            .enumerate()
            .map(|(i, input)| {
                resolve_reporting(base + i, input, fetcher, config, callback.as_ref())
            });
        resolved.extend(try_join_all(futures).await?);
    }

    if let Some(cb) = &callback {
        cb.on_resolve_complete(inputs.len());
    }
    Ok(resolved)
}

async fn resolve_reporting(
    index: usize,
    input: &InputReference,
    fetcher: &Fetcher,
    config: &PipelineConfig,
    callback: Option<&Arc<dyn ResolveProgressCallback>>,
) -> Result<ResolvedDocument, DocstampError> {
    if let Some(cb) = callback {
        cb.on_input_start(index);
    }
    match resolve_one(input, fetcher, config).await {
        Ok(doc) => {
            if let Some(cb) = callback {
                cb.on_input_resolved(index, &doc.filename);
            }
            Ok(doc)
        }
        Err(e) => {
            warn!("Input {} ({}) failed: {}", index, input.describe(), e);
            if let Some(cb) = callback {
                cb.on_input_failed(index, &e.to_string());
            }
            Err(e)
        }
    }
}

/// Resolve a single input.
pub async fn resolve_one(
    input: &InputReference,
    fetcher: &Fetcher,
    config: &PipelineConfig,
) -> Result<ResolvedDocument, DocstampError> {
    let (dpi, scale) = (config.dpi, config.image_scale);
    let raw = match input {
        InputReference::Resolved(doc) => return Ok(doc.clone()),
        InputReference::DecodedImage(img) => {
            let (filename, image) = (img.filename.clone(), Arc::clone(&img.image));
            return tokio::task::spawn_blocking(move || normalize_image(filename, image, dpi, scale))
                .await
                .map_err(|e| DocstampError::Internal(format!("normalize task: {e}")))?
                .map_err(DocstampError::Internal);
        }
        InputReference::ByteStream(stream) => fetcher.fetch_stream(stream),
        InputReference::LocalPath(path) => fetcher.fetch_path(path).await?,
        InputReference::RemoteUrl(url) => fetcher.fetch(url).await?,
    };
    tokio::task::spawn_blocking(move || normalize(raw, dpi, scale))
        .await
        .map_err(|e| DocstampError::Internal(format!("normalize task: {e}")))
}
