//! Source fetching: turn a path or URL into raw bytes plus a filename.
//!
//! URL bodies are also written to the pipeline's work directory as
//! `<uuid>-<filename>`, so repeated fetches of the same name never collide
//! and the copies disappear together with the directory.

use crate::config::FetchConfig;
use crate::document::{ByteStream, RawFile};
use crate::error::{DocstampError, FetchError};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::header::{ACCEPT, CONTENT_DISPOSITION};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Where a string input points to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    Local(PathBuf),
    Http(String),
    Unsupported { scheme: String },
}

/// Check if the input string looks like an HTTP(S) URL.
pub fn is_url(input: &str) -> bool {
    matches!(classify(input), SourceKind::Http(_))
}

/// Classify a source string by its scheme.
///
/// Strings without a valid `scheme://` prefix are local paths; `file://`
/// URLs are stripped to their percent-decoded path component.
pub fn classify(input: &str) -> SourceKind {
    match input.split_once("://") {
        Some((scheme, rest)) if is_scheme(scheme) => match scheme.to_ascii_lowercase().as_str() {
            "file" => SourceKind::Local(PathBuf::from(
                urlencoding::decode(rest)
                    .map(|s| s.into_owned())
                    .unwrap_or_else(|_| rest.to_string()),
            )),
            "http" | "https" => SourceKind::Http(input.to_string()),
            other => SourceKind::Unsupported {
                scheme: other.to_string(),
            },
        },
        _ => SourceKind::Local(PathBuf::from(input)),
    }
}

/// RFC 3986 scheme: a letter followed by letters, digits, `+`, `-` or `.`.
fn is_scheme(s: &str) -> bool {
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '+' | '-' | '.'))
}

/// Downloads and reads inputs.
///
/// Owns the HTTP client built from a [`FetchConfig`]; clone-free sharing is
/// by reference since all methods take `&self`.
#[derive(Debug)]
pub struct Fetcher {
    client: reqwest::Client,
    config: FetchConfig,
    dest_dir: PathBuf,
}

impl Fetcher {
    /// Build a fetcher writing downloads into `dest_dir`.
    pub fn new(config: FetchConfig, dest_dir: impl Into<PathBuf>) -> Result<Self, DocstampError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent())
            .danger_accept_invalid_certs(!config.verify_tls)
            .build()
            .map_err(|e| DocstampError::InvalidConfig(format!("HTTP client: {e}")))?;
        Ok(Self {
            client,
            config,
            dest_dir: dest_dir.into(),
        })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// Directory downloads are written to.
    pub fn dest_dir(&self) -> &Path {
        &self.dest_dir
    }

    /// Fetch any string source, dispatching on its scheme.
    pub async fn fetch(&self, source: &str) -> Result<RawFile, FetchError> {
        match classify(source) {
            SourceKind::Local(path) => self.fetch_path(&path).await,
            SourceKind::Http(url) => self.fetch_url(&url).await,
            SourceKind::Unsupported { scheme } => Err(FetchError::UnsupportedScheme {
                input: source.to_string(),
                scheme,
            }),
        }
    }

    /// Read a local file.
    pub async fn fetch_path(&self, path: &Path) -> Result<RawFile, FetchError> {
        let content = tokio::fs::read(path).await.map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => FetchError::NotFound {
                path: path.to_path_buf(),
            },
            std::io::ErrorKind::PermissionDenied => FetchError::PermissionDenied {
                path: path.to_path_buf(),
            },
            _ => FetchError::Io {
                path: path.to_path_buf(),
                source: e,
            },
        })?;

        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        debug!("Read local file: {} ({} bytes)", path.display(), content.len());

        Ok(RawFile {
            filename,
            source: Some(path.display().to_string()),
            path: Some(path.to_path_buf()),
            content: content.into(),
        })
    }

    /// Download an HTTP(S) URL into the work directory.
    pub async fn fetch_url(&self, url: &str) -> Result<RawFile, FetchError> {
        info!("Downloading: {}", url);
        let secs = self.config.timeout_secs;
        let transport = |e: reqwest::Error| {
            if e.is_timeout() {
                FetchError::Timeout {
                    url: url.to_string(),
                    secs,
                }
            } else {
                FetchError::TransportFailure {
                    url: url.to_string(),
                    reason: e.to_string(),
                }
            }
        };

        let response = self
            .client
            .get(url)
            .header(ACCEPT, "*/*")
            .send()
            .await
            .map_err(transport)?;

        if !response.status().is_success() {
            return Err(FetchError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        let filename = response
            .headers()
            .get(CONTENT_DISPOSITION)
            .and_then(|v| v.to_str().ok())
            .and_then(filename_from_content_disposition)
            .or_else(|| filename_from_url(response.url().as_str()))
            .unwrap_or_else(|| uuid::Uuid::new_v4().simple().to_string());

        let bytes = response.bytes().await.map_err(transport)?;

        let file_path = self.dest_dir.join(format!(
            "{}-{}",
            uuid::Uuid::new_v4().simple(),
            sanitize_filename(&filename)
        ));
        tokio::fs::write(&file_path, &bytes)
            .await
            .map_err(|e| FetchError::Io {
                path: file_path.clone(),
                source: e,
            })?;

        info!("Downloaded {} bytes to: {}", bytes.len(), file_path.display());

        Ok(RawFile {
            filename,
            source: Some(url.to_string()),
            path: Some(file_path),
            content: Arc::from(bytes.as_ref()),
        })
    }

    /// Wrap an in-memory stream; no I/O happens.
    pub fn fetch_stream(&self, stream: &ByteStream) -> RawFile {
        RawFile {
            filename: stream.filename.clone(),
            source: None,
            path: None,
            content: Arc::clone(&stream.data),
        }
    }
}

static DISPOSITION_EXT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)filename\*\s*=\s*(?:[\w-]+)?'[^']*'([^;]+)"#).expect("static regex")
});

static DISPOSITION_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)filename\s*=\s*(?:"([^"]*)"|([^;]+))"#).expect("static regex")
});

/// Extract the filename parameter of a `Content-Disposition` header.
///
/// `filename*` (RFC 5987, percent-encoded) wins over plain `filename`;
/// surrounding quotes and whitespace are stripped.
pub fn filename_from_content_disposition(header: &str) -> Option<String> {
    if let Some(caps) = DISPOSITION_EXT_RE.captures(header) {
        let raw = caps.get(1)?.as_str().trim().trim_matches('"');
        let decoded = urlencoding::decode(raw)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| raw.to_string());
        if !decoded.is_empty() {
            return Some(decoded);
        }
    }
    let caps = DISPOSITION_RE.captures(header)?;
    let name = caps
        .get(1)
        .or_else(|| caps.get(2))?
        .as_str()
        .trim()
        .trim_matches('"');
    (!name.is_empty()).then(|| name.to_string())
}

/// URL-decoded last path segment, if non-empty.
pub fn filename_from_url(url: &str) -> Option<String> {
    let parsed = reqwest::Url::parse(url).ok()?;
    let last = parsed.path_segments()?.next_back()?;
    if last.is_empty() {
        return None;
    }
    Some(
        urlencoding::decode(last)
            .map(|s| s.into_owned())
            .unwrap_or_else(|_| last.to_string()),
    )
}

/// Replace path separators so a remote name cannot escape the work directory.
fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if matches!(c, '/' | '\\' | '\0') { '_' } else { c })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_url() {
        assert!(is_url("https://example.com/doc.pdf"));
        assert!(is_url("http://example.com/doc.pdf"));
        assert!(is_url("HTTPS://example.com/doc.pdf"));
        assert!(!is_url("/tmp/doc.pdf"));
        assert!(!is_url("doc.pdf"));
        assert!(!is_url("ftp://example.com/doc.pdf"));
        assert!(!is_url(""));
    }

    #[test]
    fn classify_file_urls_and_unknown_schemes() {
        assert_eq!(
            classify("file:///tmp/a%20b.pdf"),
            SourceKind::Local(PathBuf::from("/tmp/a b.pdf"))
        );
        assert_eq!(
            classify("s3://bucket/key"),
            SourceKind::Unsupported { scheme: "s3".into() }
        );
    }

    #[test]
    fn content_disposition_variants() {
        assert_eq!(
            filename_from_content_disposition(r#"attachment; filename="report.pdf""#).as_deref(),
            Some("report.pdf")
        );
        assert_eq!(
            filename_from_content_disposition("inline; filename=scan.png").as_deref(),
            Some("scan.png")
        );
        assert_eq!(
            filename_from_content_disposition(
                r#"attachment; filename="fallback.pdf"; filename*=UTF-8''r%C3%A9sum%C3%A9.pdf"#
            )
            .as_deref(),
            Some("résumé.pdf")
        );
        assert_eq!(filename_from_content_disposition("attachment"), None);
        assert_eq!(filename_from_content_disposition(r#"attachment; filename="""#), None);
    }

    #[test]
    fn url_filename_is_decoded_last_segment() {
        assert_eq!(
            filename_from_url("https://example.com/docs/my%20file.pdf?x=1").as_deref(),
            Some("my file.pdf")
        );
        assert_eq!(filename_from_url("https://example.com/"), None);
    }

    #[test]
    fn sanitize_strips_separators() {
        assert_eq!(sanitize_filename("../etc/passwd"), ".._etc_passwd");
    }

    #[tokio::test]
    async fn unsupported_scheme_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let fetcher = Fetcher::new(FetchConfig::default(), dir.path()).unwrap();
        let err = fetcher.fetch("ftp://example.com/a.pdf").await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedScheme { ref scheme, .. } if scheme == "ftp"));
    }

    #[test]
    fn missing_local_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.pdf");
        let err = tokio_test::block_on(async {
            let fetcher = Fetcher::new(FetchConfig::default(), dir.path()).unwrap();
            fetcher.fetch(path.to_str().unwrap()).await.unwrap_err()
        });
        assert!(matches!(err, FetchError::NotFound { .. }));
    }

    #[tokio::test]
    async fn local_file_keeps_its_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scan.png");
        std::fs::write(&path, b"bytes").unwrap();
        let fetcher = Fetcher::new(FetchConfig::default(), dir.path()).unwrap();
        let raw = fetcher.fetch_path(&path).await.unwrap();
        assert_eq!(raw.filename, "scan.png");
        assert_eq!(&*raw.content, b"bytes");
        assert_eq!(raw.path.as_deref(), Some(path.as_path()));
    }
}
