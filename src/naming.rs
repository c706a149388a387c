// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Archive entry naming.
//!
//! Names come from, in order of preference:
//! 1. the `filename*=UTF-8''...` parameter of `Content-Disposition`
//! 2. its quoted `filename="..."` (or bare `filename=`) parameter
//! 3. the last path segment of the resolved URL
//! 4. `file<N>` where N is the 1-based position in the request
//!
//! A name with no extension, or with the generic `bin` extension, then gets
//! the default document extension. This is a guess, not content sniffing:
//! shared-drive links mostly point at documents and often arrive nameless.

use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;
use reqwest::header::{HeaderMap, CONTENT_DISPOSITION};
use reqwest::Url;

/// Extension servers use when they do not know what they are sending.
const GENERIC_BINARY_EXTENSION: &str = "bin";

static EXTENDED_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\*\s*=\s*([A-Za-z0-9_-]*)'[^']*'([^;\s]+)"#)
        .expect("extended filename regex is valid")
});

static QUOTED_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*"([^"]*)""#).expect("quoted filename regex is valid")
});

static TOKEN_FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)(?:^|;)\s*filename\s*=\s*([^;"\s]+)"#).expect("token filename regex is valid")
});

/// Computes entry names for fetched files.
#[derive(Debug, Clone)]
pub struct NameDeriver {
    default_extension: String,
}

impl NameDeriver {
    pub fn new(default_extension: impl AsRef<str>) -> Self {
        Self {
            default_extension: default_extension.as_ref().trim_start_matches('.').to_string(),
        }
    }

    /// Derive a non-empty entry name for the payload at `index`.
    pub fn derive(&self, final_url: &str, headers: &HeaderMap, index: usize) -> String {
        let base = disposition_filename(headers)
            .or_else(|| url_basename(final_url))
            .unwrap_or_else(|| format!("file{}", index + 1));
        self.normalize_extension(&base)
    }

    fn normalize_extension(&self, name: &str) -> String {
        match name.rsplit_once('.') {
            Some((stem, ext))
                if !stem.is_empty()
                    && !ext.is_empty()
                    && !ext.eq_ignore_ascii_case(GENERIC_BINARY_EXTENSION) =>
            {
                name.to_string()
            }
            Some((stem, _)) if !stem.is_empty() => format!("{}.{}", stem, self.default_extension),
            _ => format!("{}.{}", name, self.default_extension),
        }
    }
}

impl Default for NameDeriver {
    fn default() -> Self {
        Self::new("pdf")
    }
}

/// Filename from `Content-Disposition`.
///
/// The RFC 5987 `filename*` form wins, then the quoted form, then a bare
/// token. Header bytes are read as UTF-8 (lossily), so non-ASCII names that
/// servers send raw survive.
pub fn disposition_filename(headers: &HeaderMap) -> Option<String> {
    let value = String::from_utf8_lossy(headers.get(CONTENT_DISPOSITION)?.as_bytes());

    if let Some(name) = EXTENDED_FILENAME
        .captures(&value)
        .and_then(|caps| decode_extended(caps.get(1)?.as_str(), caps.get(2)?.as_str()))
        .and_then(|name| safe_component(&name))
    {
        return Some(name);
    }

    let raw = QUOTED_FILENAME
        .captures(&value)
        .or_else(|| TOKEN_FILENAME.captures(&value))?
        .get(1)?
        .as_str()
        .to_string();
    safe_component(&raw)
}

/// Percent-decode an extended parameter value in `charset`.
fn decode_extended(charset: &str, encoded: &str) -> Option<String> {
    let bytes = urlencoding::decode_binary(encoded.as_bytes());
    if charset.eq_ignore_ascii_case("iso-8859-1") {
        // Latin-1 bytes map one-to-one onto the first 256 code points.
        Some(bytes.iter().map(|&b| char::from(b)).collect())
    } else {
        String::from_utf8(bytes.into_owned()).ok()
    }
}

/// Last non-empty, percent-decoded path segment of `url`.
pub fn url_basename(url: &str) -> Option<String> {
    let url = Url::parse(url).ok()?;
    let segment = url.path_segments()?.filter(|s| !s.is_empty()).last()?;
    let decoded = urlencoding::decode(segment)
        .map(|s| s.into_owned())
        .unwrap_or_else(|_| segment.to_string());
    safe_component(&decoded)
}

/// Keep only the final path component so no entry escapes the archive root.
fn safe_component(raw: &str) -> Option<String> {
    let name = raw.rsplit(['/', '\\']).next()?.trim();
    match name {
        "" | "." | ".." => None,
        name => Some(name.to_string()),
    }
}

/// Tracks names already used in one archive.
///
/// ZIP writers reject duplicate member names, so repeats get a numeric
/// suffix before the extension: `report.pdf`, `report (2).pdf`, ...
#[derive(Debug, Default)]
pub struct NameRegistry {
    used: HashSet<String>,
}

impl NameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `name`, or the first free suffixed variant of it.
    pub fn claim(&mut self, name: String) -> String {
        if self.used.insert(name.clone()) {
            return name;
        }

        let (stem, ext) = match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem.to_string(), format!(".{}", ext)),
            _ => (name.clone(), String::new()),
        };

        let mut n = 1;
        loop {
            n += 1;
            let candidate = format!("{} ({}){}", stem, n, ext);
            if self.used.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    pub fn len(&self) -> usize {
        self.used.len()
    }

    pub fn is_empty(&self) -> bool {
        self.used.is_empty()
    }
}
