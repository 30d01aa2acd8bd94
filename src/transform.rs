//! High-level merge and stamp entry points.
//!
//! [`PdfTransform`] owns a [`Pipeline`] over the caller's inputs. The first
//! operation resolves them (fetch + normalise); later operations on the same
//! transform reuse the resolved list. PDF work runs inside
//! `spawn_blocking` since lopdf parsing and deflating are CPU-bound.

use crate::assemble;
use crate::config::PipelineConfig;
use crate::document::{InputReference, ResolvedDocument};
use crate::error::DocstampError;
use crate::output::{generated_name, materialize, OutputSpec, ResultDescriptor};
use crate::pipeline::Pipeline;
use crate::stamp::{stamp_all, StampSpec};
use std::collections::BTreeSet;
use tracing::info;

/// Options for [`PdfTransform::merge`].
#[derive(Debug, Default)]
pub struct MergeOptions {
    /// Reported filename; `merged_<uuid>.pdf` when None and the output is not a path.
    pub name: Option<String>,
    /// Add one outline entry per input, titled with its filename.
    pub outline: bool,
    pub output: OutputSpec,
}

impl MergeOptions {
    pub fn new() -> Self {
        Self {
            outline: true,
            ..Self::default()
        }
    }
}

/// Options for [`PdfTransform::stamp`].
#[derive(Debug, Default)]
pub struct StampOptions {
    /// 0, 1 (single document) or one output per document.
    pub outputs: Vec<OutputSpec>,
    /// One 0-based page filter per document; None stamps every page.
    pub pages: Option<Vec<BTreeSet<usize>>>,
    /// Base for generated names; `stamped_<uuid>.pdf` when None.
    pub name: Option<String>,
}

/// A set of inputs plus the operations that can be applied to them.
///
/// # Example
/// ```rust,no_run
/// use docstamp::{MergeOptions, PdfTransform, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let mut transform = PdfTransform::from_sources(
///     ["cover.pdf", "https://example.com/scan.png"],
///     PipelineConfig::default(),
/// )?;
/// let mut merged = transform.merge(MergeOptions::new()).await?;
/// let bytes = merged.read_all()?;
/// println!("{} is {} bytes", merged.filename, bytes.len());
/// # Ok(())
/// # }
/// ```
pub struct PdfTransform {
    pipeline: Pipeline,
}

impl PdfTransform {
    pub fn new(inputs: Vec<InputReference>, config: PipelineConfig) -> Result<Self, DocstampError> {
        Ok(Self {
            pipeline: Pipeline::new(inputs, config)?,
        })
    }

    /// Build from path / URL strings.
    pub fn from_sources<I, S>(sources: I, config: PipelineConfig) -> Result<Self, DocstampError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let inputs = sources
            .into_iter()
            .map(|s| InputReference::parse(s.as_ref()))
            .collect();
        Self::new(inputs, config)
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn pipeline_mut(&mut self) -> &mut Pipeline {
        &mut self.pipeline
    }

    /// Resolved inputs, resolving them on first use.
    pub async fn files(&mut self) -> Result<&[ResolvedDocument], DocstampError> {
        self.pipeline.resolve().await
    }

    /// Concatenate all inputs into one document.
    pub async fn merge(
        &mut self,
        options: MergeOptions,
    ) -> Result<ResultDescriptor, DocstampError> {
        let docs = self.pipeline.resolve().await?.to_vec();
        let MergeOptions {
            name,
            outline,
            output,
        } = options;
        let filename = name.unwrap_or_else(|| match &output {
            OutputSpec::Path(p) => p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| generated_name("merged")),
            _ => generated_name("merged"),
        });
        info!("Merging {} documents into {}", docs.len(), filename);

        run_blocking(move || {
            let names: Option<Vec<String>> =
                outline.then(|| docs.iter().map(|d| d.filename.clone()).collect());
            let merged = assemble::merge(&docs, names.as_deref())?;
            Ok(materialize(&merged, output, filename)?)
        })
        .await
    }

    /// Stamp every input, one result per input in order.
    pub async fn stamp(
        &mut self,
        spec: &StampSpec,
        options: StampOptions,
    ) -> Result<Vec<ResultDescriptor>, DocstampError> {
        spec.validate()?;
        let docs = self.pipeline.resolve().await?.to_vec();
        let spec = spec.fetch_sources(self.pipeline.fetcher()).await?;
        info!("Stamping {} documents", docs.len());

        run_blocking(move || {
            stamp_all(
                &docs,
                &spec,
                options.outputs,
                options.pages.as_deref(),
                options.name.as_deref(),
            )
        })
        .await
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T, DocstampError>
where
    F: FnOnce() -> Result<T, DocstampError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| DocstampError::Internal(format!("worker task: {e}")))?
}

/// Merge `sources` into a file at `output_path`.
pub async fn merge_to_file(
    sources: &[&str],
    output_path: impl Into<std::path::PathBuf>,
    config: PipelineConfig,
) -> Result<ResultDescriptor, DocstampError> {
    let mut transform = PdfTransform::from_sources(sources.iter().copied(), config)?;
    transform
        .merge(MergeOptions {
            output: OutputSpec::Path(output_path.into()),
            ..MergeOptions::new()
        })
        .await
}

/// Synchronous wrapper around [`PdfTransform::merge`].
///
/// Creates a temporary tokio runtime internally.
pub fn merge_sync(
    inputs: Vec<InputReference>,
    options: MergeOptions,
    config: PipelineConfig,
) -> Result<ResultDescriptor, DocstampError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| DocstampError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(async move { PdfTransform::new(inputs, config)?.merge(options).await })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pdf::{self, testutil::sample_pdf};
    use crate::stamp::TextStamp;

    fn inputs(n: usize) -> Vec<InputReference> {
        (0..n)
            .map(|i| {
                InputReference::from_bytes(format!("doc{i}.pdf"), sample_pdf(1, 200.0, 200.0, "d"))
            })
            .collect()
    }

    #[tokio::test]
    async fn merge_reports_generated_name() {
        let mut t = PdfTransform::new(inputs(2), PipelineConfig::default()).unwrap();
        let mut result = t.merge(MergeOptions::new()).await.unwrap();
        assert!(result.filename.starts_with("merged_"));
        assert_eq!(pdf::page_count(&result.read_all().unwrap()).unwrap(), 2);
    }

    #[tokio::test]
    async fn merge_to_path_uses_file_name() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("all.pdf");
        let mut t = PdfTransform::new(inputs(2), PipelineConfig::default()).unwrap();
        let result = t
            .merge(MergeOptions {
                output: OutputSpec::Path(out.clone()),
                ..MergeOptions::new()
            })
            .await
            .unwrap();
        assert_eq!(result.filename, "all.pdf");
        assert_eq!(result.path(), Some(out.as_path()));
    }

    #[tokio::test]
    async fn stamp_positional_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let paths: Vec<_> = (0..3).map(|i| dir.path().join(format!("s{i}.pdf"))).collect();
        let mut t = PdfTransform::new(inputs(3), PipelineConfig::default()).unwrap();
        let results = t
            .stamp(
                &StampSpec::Text(TextStamp::new("OK")),
                StampOptions {
                    outputs: paths.iter().cloned().map(OutputSpec::Path).collect(),
                    ..StampOptions::default()
                },
            )
            .await
            .unwrap();
        for (r, p) in results.iter().zip(&paths) {
            assert_eq!(r.path(), Some(p.as_path()));
            assert!(p.exists());
        }
    }

    #[tokio::test]
    async fn stamp_rejects_empty_text_before_resolving() {
        let mut t = PdfTransform::new(inputs(1), PipelineConfig::default()).unwrap();
        let err = t
            .stamp(&StampSpec::Text(TextStamp::new("")), StampOptions::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no content") || err.to_string().contains("no text"));
        assert!(!t.pipeline().is_resolved());
    }

    #[test]
    fn merge_sync_works_outside_runtime() {
        let result = merge_sync(inputs(3), MergeOptions::new(), PipelineConfig::default()).unwrap();
        assert!(result.path().is_none());
    }
}
