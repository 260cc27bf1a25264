//! Upload validation.
//!
//! Checks an uploaded image before a job is created for it and stores it in
//! the uploads directory as `<job_id>_<sanitized name>`.

use std::fs;
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use image::{ImageFormat, ImageReader};
use regex_lite::Regex;
use tracing::{debug, info, warn};

use crate::config::UploadConfig;

/// Extension used when the supplied one is not allowed.
const FALLBACK_EXTENSION: &str = ".png";

/// Stem used when nothing survives sanitization.
const FALLBACK_STEM: &str = "upload";

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("no filename provided")]
    MissingFilename,

    #[error("empty file")]
    Empty,

    #[error("file too large: {size} bytes exceeds limit of {max} bytes")]
    TooLarge { size: u64, max: u64 },

    #[error("not a decodable PNG, JPEG or WEBP image")]
    NotAnImage,

    #[error("input file not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

fn unsafe_chars() -> &'static Regex {
    static UNSAFE: OnceLock<Regex> = OnceLock::new();
    UNSAFE.get_or_init(|| Regex::new(r"[^A-Za-z0-9._-]").expect("valid regex"))
}

/// Make an uploaded filename safe to store.
///
/// Drops any directory part, replaces every character outside
/// `[A-Za-z0-9._-]` with `_`, and swaps an extension that is not in
/// `allowed` (compared lowercase) for `.png`.
pub fn sanitize_filename(name: &str, allowed: &[String]) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let safe = unsafe_chars().replace_all(base, "_").into_owned();

    let (stem, ext) = split_extension(&safe);
    let stem = if stem.is_empty() { FALLBACK_STEM } else { stem };
    let ext_lower = ext.to_ascii_lowercase();

    if !ext.is_empty() && allowed.iter().any(|a| a.eq_ignore_ascii_case(&ext_lower)) {
        format!("{}{}", stem, ext)
    } else {
        format!("{}{}", stem, FALLBACK_EXTENSION)
    }
}

/// `("photo", ".JPG")` for `"photo.JPG"`; a leading dot is part of the stem.
fn split_extension(name: &str) -> (&str, &str) {
    match name.rfind('.') {
        Some(0) | None => (name, ""),
        Some(i) => name.split_at(i),
    }
}

/// Image formats accepted for upload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageKind {
    Png,
    Jpeg,
    Webp,
}

impl ImageKind {
    pub const ALL: [ImageKind; 3] = [ImageKind::Png, ImageKind::Jpeg, ImageKind::Webp];

    pub fn from_format(format: ImageFormat) -> Option<Self> {
        match format {
            ImageFormat::Png => Some(ImageKind::Png),
            ImageFormat::Jpeg => Some(ImageKind::Jpeg),
            ImageFormat::WebP => Some(ImageKind::Webp),
            _ => None,
        }
    }

    /// Guess the format from content, then decode the whole image.
    ///
    /// A recognizable header over a corrupt body is rejected.
    pub fn decode(bytes: &[u8]) -> Result<Self, UploadError> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|_| UploadError::NotAnImage)?;
        let kind = reader
            .format()
            .and_then(ImageKind::from_format)
            .ok_or(UploadError::NotAnImage)?;

        if let Err(e) = reader.decode() {
            debug!(kind = kind.media_type(), error = %e, "upload does not decode");
            return Err(UploadError::NotAnImage);
        }
        Ok(kind)
    }

    pub fn media_type(&self) -> &'static str {
        match self {
            ImageKind::Png => "image/png",
            ImageKind::Jpeg => "image/jpeg",
            ImageKind::Webp => "image/webp",
        }
    }
}

/// Validates uploads and writes them to the uploads directory.
#[derive(Debug, Clone)]
pub struct UploadValidator {
    allowed_extensions: Vec<String>,
    max_size_mb: f64,
    max_bytes: u64,
    uploads_dir: PathBuf,
}

impl UploadValidator {
    pub fn new(config: &UploadConfig, uploads_dir: impl Into<PathBuf>) -> Self {
        Self {
            allowed_extensions: config
                .allowed_extensions
                .iter()
                .map(|e| e.to_ascii_lowercase())
                .collect(),
            max_size_mb: config.max_size_mb,
            max_bytes: config.max_size_bytes(),
            uploads_dir: uploads_dir.into(),
        }
    }

    /// Lowercase, with the leading dot
    pub fn allowed_extensions(&self) -> &[String] {
        &self.allowed_extensions
    }

    pub fn max_size_mb(&self) -> f64 {
        self.max_size_mb
    }

    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    pub fn uploads_dir(&self) -> &Path {
        &self.uploads_dir
    }

    /// Check `content` and store it for `job_id`.
    pub fn save(&self, job_id: &str, filename: &str, content: &[u8]) -> Result<PathBuf, UploadError> {
        info!(job_id, filename, "validating upload");
        if filename.trim().is_empty() {
            warn!(job_id, "upload has no filename");
            return Err(UploadError::MissingFilename);
        }

        self.check(content)?;

        let name = sanitize_filename(filename, &self.allowed_extensions);
        let path = self.uploads_dir.join(format!("{}_{}", job_id, name));

        fs::create_dir_all(&self.uploads_dir).map_err(|source| UploadError::Io {
            path: self.uploads_dir.clone(),
            source,
        })?;
        fs::write(&path, content).map_err(|source| UploadError::Io {
            path: path.clone(),
            source,
        })?;

        info!(job_id, path = %path.display(), bytes = content.len(), "upload saved");
        Ok(path)
    }

    /// Validate a file already on disk and copy it into the uploads directory.
    pub fn import(&self, job_id: &str, source: &Path) -> Result<PathBuf, UploadError> {
        let metadata = match fs::metadata(source) {
            Ok(m) if m.is_file() => m,
            Ok(_) => return Err(UploadError::NotFound(source.to_path_buf())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(UploadError::NotFound(source.to_path_buf()))
            }
            Err(e) => {
                return Err(UploadError::Io {
                    path: source.to_path_buf(),
                    source: e,
                })
            }
        };
        // Size is checked before reading so an oversized file is never loaded
        if metadata.len() > self.max_bytes {
            return Err(UploadError::TooLarge {
                size: metadata.len(),
                max: self.max_bytes,
            });
        }

        let content = fs::read(source).map_err(|e| UploadError::Io {
            path: source.to_path_buf(),
            source: e,
        })?;
        let filename = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        self.save(job_id, &filename, &content)
    }

    fn check(&self, content: &[u8]) -> Result<ImageKind, UploadError> {
        let size = content.len() as u64;
        debug!(size, max = self.max_bytes, "checking upload size");
        if size == 0 {
            return Err(UploadError::Empty);
        }
        if size > self.max_bytes {
            return Err(UploadError::TooLarge {
                size,
                max: self.max_bytes,
            });
        }
        ImageKind::decode(content)
    }
}
