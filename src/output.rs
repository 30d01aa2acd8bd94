//! Output materialisation: where finished documents go.
//!
//! Each result is written to exactly one [`OutputSpec`]:
//!
//! * [`OutputSpec::Path`] writes a file and reports its path.
//! * [`OutputSpec::Sink`] writes into a caller-supplied seekable handle.
//! * [`OutputSpec::Temporary`] writes into a spooled temporary buffer that
//!   stays in memory up to [`SPOOL_THRESHOLD`] and then moves to disk.
//!
//! In-memory results are rewound to position 0 before they are handed back.

use crate::error::AssemblyError;
use serde::Serialize;
use std::fmt;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tempfile::SpooledTempFile;
use tracing::debug;

/// In-memory size limit of a temporary output before it spills to disk.
pub const SPOOL_THRESHOLD: usize = 8 * 1024 * 1024;

/// Anything a result can be written into and read back from.
pub trait SeekableSink: Read + Write + Seek + Send {}

impl<T: Read + Write + Seek + Send> SeekableSink for T {}

/// Destination of one result.
#[derive(Default)]
pub enum OutputSpec {
    Path(PathBuf),
    Sink(Box<dyn SeekableSink>),
    #[default]
    Temporary,
}

impl fmt::Debug for OutputSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputSpec::Path(p) => f.debug_tuple("Path").field(p).finish(),
            OutputSpec::Sink(_) => f.write_str("Sink(..)"),
            OutputSpec::Temporary => f.write_str("Temporary"),
        }
    }
}

impl From<PathBuf> for OutputSpec {
    fn from(p: PathBuf) -> Self {
        OutputSpec::Path(p)
    }
}

impl From<&Path> for OutputSpec {
    fn from(p: &Path) -> Self {
        OutputSpec::Path(p.to_path_buf())
    }
}

/// Where a result's bytes ended up.
pub enum ResultOutput {
    /// A readable handle positioned at 0.
    Content(Box<dyn SeekableSink>),
    /// A file on disk.
    Path(PathBuf),
}

/// One finished document.
pub struct ResultDescriptor {
    pub filename: String,
    pub output: ResultOutput,
}

impl fmt::Debug for ResultDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("ResultDescriptor");
        s.field("filename", &self.filename);
        match &self.output {
            ResultOutput::Content(_) => s.field("content", &".."),
            ResultOutput::Path(p) => s.field("path", p),
        };
        s.finish()
    }
}

/// Serialisable view of a [`ResultDescriptor`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResultSummary {
    pub filename: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub in_memory: bool,
}

impl ResultDescriptor {
    pub fn path(&self) -> Option<&Path> {
        match &self.output {
            ResultOutput::Path(p) => Some(p),
            ResultOutput::Content(_) => None,
        }
    }

    pub fn content_mut(&mut self) -> Option<&mut dyn SeekableSink> {
        match &mut self.output {
            ResultOutput::Content(c) => Some(c.as_mut()),
            ResultOutput::Path(_) => None,
        }
    }

    /// Read the whole document, from the handle or from disk.
    pub fn read_all(&mut self) -> std::io::Result<Vec<u8>> {
        match &mut self.output {
            ResultOutput::Path(p) => std::fs::read(p),
            ResultOutput::Content(c) => {
                c.seek(SeekFrom::Start(0))?;
                let mut buf = Vec::new();
                c.read_to_end(&mut buf)?;
                c.seek(SeekFrom::Start(0))?;
                Ok(buf)
            }
        }
    }

    pub fn summary(&self) -> ResultSummary {
        ResultSummary {
            filename: self.filename.clone(),
            path: self.path().map(Path::to_path_buf),
            in_memory: matches!(self.output, ResultOutput::Content(_)),
        }
    }
}

/// Write `content` to `spec`.
///
/// Parent directories of a [`OutputSpec::Path`] are created as needed.
pub fn materialize(
    content: &[u8],
    spec: OutputSpec,
    filename: String,
) -> Result<ResultDescriptor, AssemblyError> {
    let write_err = |target: &str, e: std::io::Error| AssemblyError::WriteFailure {
        target: target.to_string(),
        detail: e.to_string(),
    };

    let output = match spec {
        OutputSpec::Path(path) => {
            let target = path.display().to_string();
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(|e| write_err(&target, e))?;
            }
            std::fs::write(&path, content).map_err(|e| write_err(&target, e))?;
            debug!("Wrote {} bytes to {}", content.len(), target);
            ResultOutput::Path(path)
        }
        OutputSpec::Sink(mut sink) => {
            sink.write_all(content)
                .and_then(|_| sink.flush())
                .and_then(|_| sink.seek(SeekFrom::Start(0)))
                .map_err(|e| write_err(&filename, e))?;
            ResultOutput::Content(sink)
        }
        OutputSpec::Temporary => {
            let mut spool = SpooledTempFile::new(SPOOL_THRESHOLD);
            spool
                .write_all(content)
                .and_then(|_| spool.seek(SeekFrom::Start(0)))
                .map_err(|e| write_err(&filename, e))?;
            ResultOutput::Content(Box::new(spool))
        }
    };
    Ok(ResultDescriptor { filename, output })
}

/// `"<prefix>_<uuid>.pdf"`.
pub fn generated_name(prefix: &str) -> String {
    format!("{prefix}_{}.pdf", uuid::Uuid::new_v4().simple())
}

/// Name of the `index`-th output derived from `base`.
///
/// Index 0 keeps `base`; later ones insert `_<index>` before the extension.
pub fn indexed_name(base: &str, index: usize) -> String {
    if index == 0 {
        return base.to_string();
    }
    match base.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{stem}_{index}.{ext}"),
        _ => format!("{base}_{index}"),
    }
}

/// Map `documents` results onto the caller's outputs.
///
/// Zero outputs means one temporary per document; otherwise the counts must
/// match. Each entry carries the filename its descriptor will report: the
/// file name for paths, a name derived from `base_name` otherwise.
pub fn plan_outputs(
    documents: usize,
    outputs: Vec<OutputSpec>,
    base_name: &str,
) -> Result<Vec<(OutputSpec, String)>, AssemblyError> {
    let outputs = if outputs.is_empty() {
        (0..documents).map(|_| OutputSpec::Temporary).collect()
    } else if outputs.len() == documents {
        outputs
    } else {
        return Err(AssemblyError::OutputCountMismatch {
            documents,
            outputs: outputs.len(),
        });
    };

    Ok(outputs
        .into_iter()
        .enumerate()
        .map(|(i, spec)| {
            let name = match &spec {
                OutputSpec::Path(p) => p
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| indexed_name(base_name, i)),
                _ => indexed_name(base_name, i),
            };
            (spec, name)
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn temporary_output_is_rewound() {
        let mut r = materialize(b"%PDF-data", OutputSpec::Temporary, "x.pdf".into()).unwrap();
        assert!(r.path().is_none());
        let mut buf = Vec::new();
        r.content_mut().unwrap().read_to_end(&mut buf).unwrap();
        assert_eq!(buf, b"%PDF-data");
    }

    #[test]
    fn sink_output_is_rewound() {
        let sink: Box<dyn SeekableSink> = Box::new(Cursor::new(Vec::new()));
        let mut r = materialize(b"abc", OutputSpec::Sink(sink), "s.pdf".into()).unwrap();
        assert_eq!(r.read_all().unwrap(), b"abc");
        assert!(r.summary().in_memory);
    }

    #[test]
    fn path_output_writes_file() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("out.pdf");
        let r = materialize(b"abc", OutputSpec::Path(p.clone()), "out.pdf".into()).unwrap();
        assert_eq!(r.path(), Some(p.as_path()));
        assert_eq!(std::fs::read(&p).unwrap(), b"abc");
    }

    #[test]
    fn path_output_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("nested").join("deeper").join("out.pdf");
        materialize(b"abc", OutputSpec::Path(p.clone()), "out.pdf".into()).unwrap();
        assert!(p.exists());
    }

    #[test]
    fn directory_target_is_write_failure() {
        let dir = tempfile::tempdir().unwrap();
        let err = materialize(
            b"abc",
            OutputSpec::Path(dir.path().to_path_buf()),
            "x.pdf".into(),
        )
        .unwrap_err();
        assert!(matches!(err, AssemblyError::WriteFailure { .. }));
    }

    #[test]
    fn indexed_names() {
        assert_eq!(indexed_name("report.pdf", 0), "report.pdf");
        assert_eq!(indexed_name("report.pdf", 2), "report_2.pdf");
        assert_eq!(indexed_name("report", 1), "report_1");
        assert!(generated_name("merged").starts_with("merged_"));
    }

    #[test]
    fn output_plan_counts() {
        assert_eq!(plan_outputs(3, Vec::new(), "s.pdf").unwrap().len(), 3);
        let err = plan_outputs(3, vec![OutputSpec::Temporary, OutputSpec::Temporary], "s.pdf")
            .unwrap_err();
        assert!(matches!(err, AssemblyError::OutputCountMismatch { documents: 3, outputs: 2 }));
        let plan = plan_outputs(1, vec![OutputSpec::Path(PathBuf::from("/tmp/a.pdf"))], "s.pdf")
            .unwrap();
        assert_eq!(plan[0].1, "a.pdf");
    }
}
