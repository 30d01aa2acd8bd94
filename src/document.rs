//! Data model shared by the pipeline stages.
//!
//! ```text
//! InputReference ──fetch──▶ RawFile ──normalize──▶ ResolvedDocument
//!  (what the caller gave)   (bytes + name)          (PDF-ready source)
//! ```
//!
//! Byte payloads are held as `Arc<[u8]>` so a resolved list can be cloned into
//! a blocking worker without copying document bodies.

use crate::pipeline::fetch::{classify, SourceKind};
use image::DynamicImage;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// An in-memory upload or buffer, e.g. a multipart file part.
#[derive(Clone)]
pub struct ByteStream {
    pub filename: String,
    pub data: Arc<[u8]>,
}

impl fmt::Debug for ByteStream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ByteStream")
            .field("filename", &self.filename)
            .field("len", &self.data.len())
            .finish()
    }
}

/// An image the caller has already decoded.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub filename: String,
    pub image: Arc<DynamicImage>,
}

/// One input handed to the resolution pipeline.
#[derive(Debug, Clone)]
pub enum InputReference {
    /// A file on the local filesystem.
    LocalPath(PathBuf),
    /// A URL; only `http`/`https` are fetchable, anything else is rejected
    /// at fetch time.
    RemoteUrl(String),
    /// Bytes already in memory.
    ByteStream(ByteStream),
    /// An already decoded image.
    DecodedImage(DecodedImage),
    /// A document resolved by an earlier pipeline run.
    Resolved(ResolvedDocument),
}

impl InputReference {
    /// Classify a user-supplied string.
    ///
    /// Anything with a `scheme://` prefix other than `file://` is treated as a
    /// URL; `file://` URLs (percent-decoded) and plain strings are local
    /// paths. Unsupported schemes stay URLs so fetching reports them.
    pub fn parse(input: &str) -> Self {
        match classify(input) {
            SourceKind::Local(path) => InputReference::LocalPath(path),
            SourceKind::Http(url) => InputReference::RemoteUrl(url),
            SourceKind::Unsupported { .. } => InputReference::RemoteUrl(input.to_string()),
        }
    }

    /// Wrap an in-memory buffer.
    pub fn from_bytes(filename: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Self {
        InputReference::ByteStream(ByteStream {
            filename: filename.into(),
            data: data.into(),
        })
    }

    /// Wrap a decoded image.
    pub fn from_image(filename: impl Into<String>, image: DynamicImage) -> Self {
        InputReference::DecodedImage(DecodedImage {
            filename: filename.into(),
            image: Arc::new(image),
        })
    }

    /// Short human-readable description for logs.
    pub fn describe(&self) -> String {
        match self {
            InputReference::LocalPath(p) => p.display().to_string(),
            InputReference::RemoteUrl(u) => u.clone(),
            InputReference::ByteStream(b) => {
                format!("<stream {} ({} bytes)>", b.filename, b.data.len())
            }
            InputReference::DecodedImage(i) => format!("<image {}>", i.filename),
            InputReference::Resolved(d) => format!("<resolved {}>", d.filename),
        }
    }
}

impl From<&str> for InputReference {
    fn from(s: &str) -> Self {
        InputReference::parse(s)
    }
}

impl From<String> for InputReference {
    fn from(s: String) -> Self {
        InputReference::parse(&s)
    }
}

impl From<PathBuf> for InputReference {
    fn from(p: PathBuf) -> Self {
        InputReference::LocalPath(p)
    }
}

impl From<ResolvedDocument> for InputReference {
    fn from(d: ResolvedDocument) -> Self {
        InputReference::Resolved(d)
    }
}

/// Raw bytes of one input plus where they came from.
#[derive(Clone)]
pub struct RawFile {
    /// Display / outline name, e.g. `report.pdf`.
    pub filename: String,
    /// Original path or URL.
    pub source: Option<String>,
    /// On-disk location: the local file itself or the downloaded copy.
    pub path: Option<PathBuf>,
    pub content: Arc<[u8]>,
}

impl fmt::Debug for RawFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawFile")
            .field("filename", &self.filename)
            .field("source", &self.source)
            .field("path", &self.path)
            .field("len", &self.content.len())
            .finish()
    }
}

/// The PDF-compatible payload of a resolved document.
#[derive(Clone)]
pub enum PdfSource {
    Bytes(Arc<[u8]>),
    Path(PathBuf),
}

impl PdfSource {
    /// Load the full payload, reading from disk for [`PdfSource::Path`].
    pub fn bytes(&self) -> io::Result<Arc<[u8]>> {
        match self {
            PdfSource::Bytes(b) => Ok(Arc::clone(b)),
            PdfSource::Path(p) => Ok(std::fs::read(p)?.into()),
        }
    }
}

impl fmt::Debug for PdfSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PdfSource::Bytes(b) => write!(f, "Bytes({} bytes)", b.len()),
            PdfSource::Path(p) => write!(f, "Path({})", p.display()),
        }
    }
}

/// One input after fetch + normalisation.
///
/// `pdf_source` is always populated. When the input was neither a PDF nor a
/// decodable image, `normalized` is false and `pdf_source` holds the raw
/// bytes unchanged; the PDF engine will reject them downstream.
#[derive(Debug, Clone)]
pub struct ResolvedDocument {
    pub filename: String,
    pub source: Option<String>,
    pub original_content: Option<Arc<[u8]>>,
    pub path: Option<PathBuf>,
    pub decoded_image: Option<Arc<DynamicImage>>,
    pub pdf_source: PdfSource,
    pub scale: f32,
    pub rotation_degrees: i32,
    pub normalized: bool,
}

impl ResolvedDocument {
    /// A document whose payload is already a PDF.
    pub fn from_pdf(filename: impl Into<String>, pdf: impl Into<Arc<[u8]>>) -> Self {
        Self {
            filename: filename.into(),
            source: None,
            original_content: None,
            path: None,
            decoded_image: None,
            pdf_source: PdfSource::Bytes(pdf.into()),
            scale: 1.0,
            rotation_degrees: 0,
            normalized: true,
        }
    }

    /// A PDF document read lazily from disk.
    pub fn from_pdf_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref().to_path_buf();
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Self {
            filename,
            source: Some(path.display().to_string()),
            original_content: None,
            path: Some(path.clone()),
            decoded_image: None,
            pdf_source: PdfSource::Path(path),
            scale: 1.0,
            rotation_degrees: 0,
            normalized: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_classifies_inputs() {
        assert!(matches!(
            InputReference::parse("https://example.com/doc.pdf"),
            InputReference::RemoteUrl(_)
        ));
        assert!(matches!(
            InputReference::parse("http://example.com/doc.pdf"),
            InputReference::RemoteUrl(_)
        ));
        assert!(matches!(
            InputReference::parse("s3://bucket/key.pdf"),
            InputReference::RemoteUrl(_)
        ));
        match InputReference::parse("file:///tmp/doc.pdf") {
            InputReference::LocalPath(p) => assert_eq!(p, PathBuf::from("/tmp/doc.pdf")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            InputReference::parse("relative/doc.pdf"),
            InputReference::LocalPath(_)
        ));
        assert!(matches!(InputReference::parse(""), InputReference::LocalPath(_)));
    }

    #[test]
    fn file_urls_are_percent_decoded() {
        match InputReference::parse("file:///tmp/a%20b.pdf") {
            InputReference::LocalPath(p) => assert_eq!(p, PathBuf::from("/tmp/a b.pdf")),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            InputReference::parse("not a scheme://x"),
            InputReference::LocalPath(_)
        ));
    }

    #[test]
    fn pdf_source_bytes_reads_paths() {
        let dir = tempfile::tempdir().unwrap();
        let p = dir.path().join("x.pdf");
        std::fs::write(&p, b"%PDF-1.5").unwrap();
        let src = PdfSource::Path(p);
        assert_eq!(&*src.bytes().unwrap(), b"%PDF-1.5");
    }

    #[test]
    fn describe_stream_reports_length() {
        let r = InputReference::from_bytes("up.pdf", vec![1u8, 2, 3]);
        assert_eq!(r.describe(), "<stream up.pdf (3 bytes)>");
    }
}
