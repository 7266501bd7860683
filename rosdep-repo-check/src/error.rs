// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use thiserror::Error;

/// Error type for this crate.
#[derive(Debug, Error)]
pub enum RepoCheckError {
    #[error("URL parse error: {0:?}")]
    UrlParse(#[from] url::ParseError),

    #[error("error fetching {url}: {message}")]
    Fetch { url: String, message: String },

    #[error("HTTP {status} fetching {url}")]
    HttpStatus { url: String, status: u16 },

    #[error("repository I/O error on {0}: {1:?}")]
    IoPath(String, std::io::Error),

    #[error("XML error: {0:?}")]
    Xml(#[from] serde_xml_rs::Error),

    #[error("JSON error: {0:?}")]
    Json(#[from] serde_json::Error),

    #[error("YAML error: {0:?}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("YAML scan error: {0:?}")]
    YamlScan(#[from] yaml_rust::ScanError),

    #[error("regular expression error: {0:?}")]
    Regex(#[from] regex::Error),

    #[error("malformed repository metadata in {0}: {1}")]
    MalformedMetadata(String, String),

    #[error("all mirrors were tried: {0}")]
    AllMirrorsFailed(String),

    #[error("invalid package source !{tag}: {message}")]
    ConfigInvalidSource { tag: String, message: String },

    #[error("invalid rules document: {0}")]
    InvalidRules(String),
}

impl RepoCheckError {
    /// Whether a mirrorlist-backed enumeration may fall back to the next
    /// mirror after this error.
    ///
    /// Transport failures and malformed metadata are assumed to be a
    /// property of the individual mirror, not of the repository.
    pub fn allows_mirror_fallback(&self) -> bool {
        matches!(
            self,
            Self::Fetch { .. }
                | Self::HttpStatus { .. }
                | Self::IoPath(_, _)
                | Self::Xml(_)
                | Self::MalformedMetadata(_, _)
        )
    }
}

/// Result type for this crate.
pub type Result<T> = std::result::Result<T, RepoCheckError>;
