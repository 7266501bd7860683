// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! URL fetching with transparent decompression and bounded retry.

This module is the sole I/O entry point for every package-index
enumerator: retry and decompression policy live here and nowhere else.
*/

use {
    crate::error::{RepoCheckError, Result},
    reqwest::{blocking::Client, StatusCode},
    std::{io::Read, time::Duration},
    url::Url,
};

/// Default HTTP user agent string.
pub const USER_AGENT: &str =
    "rosdep-repo-check Rust crate (https://crates.io/crates/rosdep-repo-check)";

/// Compression format of a fetched byte stream.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Compression {
    /// No compression.
    None,
    /// Gzip compression.
    Gzip,
    /// Xz / lzma compression.
    Xz,
}

/// Knobs for a single fetch.
#[derive(Clone, Debug)]
pub struct FetchOptions {
    /// Number of times to re-attempt the download after a transient failure.
    pub retries: u32,
    /// Delay between retry attempts.
    pub retry_period: Duration,
    /// Time to wait for the remote host.
    pub timeout: Duration,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            retries: 2,
            retry_period: Duration::from_secs(1),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Join a path onto a base URL.
///
/// Unlike [Url::join], the base is always treated as a directory: the
/// relative path is appended after a single `/`.
pub fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}

fn compression_for_suffix(url: &str) -> Option<Compression> {
    // A query string may trail the meaningful part of the path.
    let path = url.split('?').next().unwrap_or(url);

    if path.ends_with(".gz") {
        Some(Compression::Gzip)
    } else if path.ends_with(".xz") {
        Some(Compression::Xz)
    } else {
        None
    }
}

fn compression_for_response(url: &str, response: &reqwest::blocking::Response) -> Compression {
    if let Some(compression) = compression_for_suffix(url) {
        return compression;
    }

    let header = |name: &str| {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
    };

    match header("Content-Encoding") {
        Some("gzip") => return Compression::Gzip,
        Some("xz") => return Compression::Xz,
        _ => {}
    }

    match header("Content-Type") {
        Some("application/x-gzip") => Compression::Gzip,
        Some("application/x-xz") => Compression::Xz,
        _ => Compression::None,
    }
}

fn decompressed(
    reader: Box<dyn Read>,
    compression: Compression,
    url: &str,
) -> Result<Box<dyn Read>> {
    Ok(match compression {
        Compression::None => reader,
        Compression::Gzip => Box::new(
            libflate::gzip::Decoder::new(reader)
                .map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?,
        ),
        Compression::Xz => Box::new(xz2::read::XzDecoder::new(reader)),
    })
}

/// Open a URL to a possibly compressed file with default [FetchOptions].
pub fn open_compressed_url(url: &str) -> Result<Box<dyn Read>> {
    open_compressed_url_with(url, &FetchOptions::default())
}

/// Open a URL to a possibly compressed file.
///
/// Gzip and xz payloads are decompressed transparently, detected from the
/// URL suffix, the `Content-Encoding` header, then the `Content-Type`
/// header, in that order. HTTP 503 responses and timeouts are retried up
/// to `options.retries` times; any other failure is surfaced immediately,
/// annotated with the URL.
///
/// `file://` URLs resolve to local files. Only suffix-based compression
/// detection applies to them.
pub fn open_compressed_url_with(url: &str, options: &FetchOptions) -> Result<Box<dyn Read>> {
    let parsed = Url::parse(url)?;

    if parsed.scheme() == "file" {
        let path = parsed.to_file_path().map_err(|_| RepoCheckError::Fetch {
            url: url.to_string(),
            message: "not a local file path".to_string(),
        })?;

        let file =
            std::fs::File::open(path).map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;

        let compression = compression_for_suffix(url).unwrap_or(Compression::None);

        return decompressed(Box::new(file), compression, url);
    }

    let client = Client::builder()
        .user_agent(USER_AGENT)
        .timeout(options.timeout)
        .build()
        .map_err(|e| RepoCheckError::Fetch {
            url: url.to_string(),
            message: format!("{:?}", e),
        })?;

    let mut remaining = options.retries;

    loop {
        match client
            .get(parsed.clone())
            .header("Accept-Encoding", "gzip")
            .send()
        {
            Ok(response) => {
                let status = response.status();

                if status == StatusCode::SERVICE_UNAVAILABLE && remaining > 0 {
                    remaining -= 1;
                    std::thread::sleep(options.retry_period);
                    continue;
                }

                if !status.is_success() {
                    return Err(RepoCheckError::HttpStatus {
                        url: url.to_string(),
                        status: status.as_u16(),
                    });
                }

                let compression = compression_for_response(url, &response);

                return decompressed(Box::new(response), compression, url);
            }
            Err(e) if e.is_timeout() && remaining > 0 => {
                remaining -= 1;
                std::thread::sleep(options.retry_period);
            }
            Err(e) => {
                return Err(RepoCheckError::Fetch {
                    url: url.to_string(),
                    message: format!("{:?}", e),
                });
            }
        }
    }
}
