//! Input sanitization and source references.
//!
//! Anything supplied from outside (video titles, uploaded filenames, URLs)
//! passes through here before it is used to build a path or a command.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use url::Url;

use crate::error::{ValidationError, ValidationResult};

/// Maximum length of a sanitized filename component.
pub const MAX_FILENAME_LEN: usize = 100;

const FALLBACK_NAME: &str = "video";

/// Reduce an untrusted name to a safe single path component.
///
/// - Only the last path component is kept (both `/` and `\` separate).
/// - Characters outside `[A-Za-z0-9_.-]` become `_`.
/// - Runs of dots collapse to one and leading dots are dropped, so the
///   result is never `.`, `..` or a hidden file.
/// - The result is at most [`MAX_FILENAME_LEN`] bytes and never empty.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    let mut out = String::with_capacity(base.len().min(MAX_FILENAME_LEN));
    let mut prev_dot = false;
    for c in base.chars() {
        let c = if c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.' {
            c
        } else {
            '_'
        };
        if c == '.' {
            if prev_dot || out.is_empty() {
                continue;
            }
            prev_dot = true;
        } else {
            prev_dot = false;
        }
        out.push(c);
        if out.len() >= MAX_FILENAME_LEN {
            break;
        }
    }

    if out.is_empty() {
        FALLBACK_NAME.to_string()
    } else {
        out
    }
}

/// Where a job's source video comes from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceRef {
    /// Remote video fetched by the downloader
    Url { url: String },
    /// Local file handed over by a front-end
    Upload {
        path: PathBuf,
        /// Name supplied by the uploader (untrusted)
        original_name: String,
    },
}

impl SourceRef {
    /// Parse a remote reference. Only `http` and `https` URLs with a host are accepted.
    pub fn url(input: &str) -> ValidationResult<Self> {
        let parsed = Url::parse(input.trim()).map_err(|_| ValidationError::InvalidUrl)?;
        if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
            return Err(ValidationError::InvalidUrl);
        }
        Ok(Self::Url {
            url: parsed.to_string(),
        })
    }

    /// Reference an uploaded file.
    pub fn upload(path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self::Upload {
            path: path.into(),
            original_name: original_name.into(),
        }
    }

    /// Interpret free-form input: anything with a scheme is treated as a URL,
    /// everything else as a local file.
    pub fn parse(input: &str) -> ValidationResult<Self> {
        let input = input.trim();
        if input.contains("://") {
            return Self::url(input);
        }
        let path = PathBuf::from(input);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| ValidationError::invalid_name(input))?;
        Ok(Self::upload(path, name))
    }
}
