// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! RPM package repository enumeration.

RPM repositories are defined by a base URL with a `repodata/repomd.xml`
file underneath. The `repomd.xml` document (represented by [RepoMd])
points at the *primary* metadata document (represented by [Primary]),
which lists every package along with the virtual names it provides.

Mirrorlist-backed repositories publish a plain-text list of candidate
base URLs instead; mirrors are tried in order until one can be
enumerated.
*/

use {
    crate::{
        error::{RepoCheckError, Result},
        fetch::{join_url, open_compressed_url},
        PackageEntry, PackageIter,
    },
    log::{info, warn},
    serde::Deserialize,
    std::io::{BufRead, BufReader, Read},
};

/// Replace RPM-specific tokens in a repository base URL.
pub fn replace_tokens(url: &str, os_name: &str, os_code_name: &str, os_arch: &str) -> String {
    url.replace("$basearch", os_arch)
        .replace("$distname", os_name)
        .replace("$releasever", os_code_name)
}

/// A `repomd.xml` file.
#[derive(Debug, Deserialize)]
pub struct RepoMd {
    /// Describes the metadata files constituting this repository.
    #[serde(default, rename = "data")]
    pub data: Vec<RepoMdData>,
}

impl RepoMd {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_xml_rs::from_reader(reader)?)
    }
}

/// A `<data>` element in a `repomd.xml` file.
#[derive(Debug, Deserialize)]
pub struct RepoMdData {
    /// The type of data, e.g. `primary`.
    #[serde(rename = "type")]
    pub data_type: String,

    /// Where the file is located.
    pub location: Location,
}

/// The location of a metadata or package file, relative to the
/// repository base URL.
#[derive(Debug, Deserialize)]
pub struct Location {
    pub href: String,
}

/// A `primary.xml` file, trimmed to the fields package lookup needs.
#[derive(Debug, Deserialize)]
pub struct Primary {
    /// `<package>` elements in this document.
    #[serde(default, rename = "package")]
    pub packages: Vec<Package>,
}

impl Primary {
    pub fn from_reader(reader: impl Read) -> Result<Self> {
        Ok(serde_xml_rs::from_reader(reader)?)
    }
}

/// A package as advertised in a `primary.xml` file.
#[derive(Debug, Deserialize)]
pub struct Package {
    /// The type/flavor of a package, e.g. `rpm`.
    #[serde(rename = "type")]
    pub package_type: String,

    /// The name of the package.
    pub name: String,

    /// The package version.
    pub version: PackageVersion,

    /// Where the package can be obtained from.
    pub location: Location,

    /// Additional metadata about the package.
    pub format: Option<PackageFormat>,
}

/// Describes a package version.
#[derive(Debug, Deserialize)]
pub struct PackageVersion {
    /// When the version came into existence.
    pub epoch: Option<String>,

    /// Version string.
    #[serde(rename = "ver")]
    pub version: Option<String>,

    /// Release string.
    #[serde(rename = "rel")]
    pub release: Option<String>,
}

/// Additional metadata about a package.
#[derive(Debug, Deserialize)]
pub struct PackageFormat {
    /// Name of the source RPM from which this package is derived.
    #[serde(rename = "sourcerpm")]
    pub source_rpm: Option<String>,

    /// Names that this package provides.
    pub provides: Option<Entries>,
}

/// A collection of package relationship entries.
#[derive(Debug, Deserialize)]
pub struct Entries {
    #[serde(default, rename = "entry")]
    pub entries: Vec<RelationEntry>,
}

/// Describes a package relationship.
#[derive(Debug, Deserialize)]
pub struct RelationEntry {
    /// Name of the provided package.
    pub name: String,

    /// Version comparison flags, e.g. `EQ`.
    pub flags: Option<String>,

    /// Epoch value.
    pub epoch: Option<String>,

    /// Version of the provided package.
    #[serde(rename = "ver")]
    pub version: Option<String>,

    /// Release of the provided package.
    #[serde(rename = "rel")]
    pub release: Option<String>,
}

/// Compose an `epoch:version-release` string.
///
/// The epoch is omitted when absent or `0`; the release is appended when
/// present.
fn compose_version(
    epoch: Option<&str>,
    version: Option<&str>,
    release: Option<&str>,
) -> Option<String> {
    let mut composed = version?.to_string();

    if let Some(epoch) = epoch {
        if epoch != "0" {
            composed = format!("{}:{}", epoch, composed);
        }
    }

    if let Some(release) = release {
        composed.push('-');
        composed.push_str(release);
    }

    Some(composed)
}

/// Derive the source package name from a `sourcerpm` file name by
/// stripping its trailing version and release segments.
fn source_name_from_rpm(source_rpm: &str) -> Option<String> {
    let parts: Vec<&str> = source_rpm.split('-').collect();

    if parts.len() < 3 {
        return None;
    }

    Some(parts[..parts.len() - 2].join("-"))
}

fn rpm_package_entries(
    base_url: &str,
    os_name: &str,
    os_code_name: &str,
    os_arch: &str,
) -> Result<Vec<PackageEntry>> {
    let base_url = replace_tokens(base_url, os_name, os_code_name, os_arch);
    let repomd_url = join_url(&base_url, "repodata/repomd.xml");

    info!("reading RPM repository metadata from {}", repomd_url);

    let repomd = RepoMd::from_reader(open_compressed_url(&repomd_url)?)?;

    let primary_href = repomd
        .data
        .iter()
        .find(|data| data.data_type == "primary")
        .map(|data| data.location.href.clone())
        .ok_or_else(|| {
            RepoCheckError::MalformedMetadata(
                repomd_url.clone(),
                "failed to determine primary data file name".to_string(),
            )
        })?;

    let primary_url = join_url(&base_url, &primary_href);

    info!("reading RPM primary metadata from {}", primary_url);

    let primary = Primary::from_reader(open_compressed_url(&primary_url)?)?;

    let mut entries = Vec::new();

    for package in primary
        .packages
        .iter()
        .filter(|package| package.package_type == "rpm")
    {
        let version = compose_version(
            package.version.epoch.as_deref(),
            package.version.version.as_deref(),
            package.version.release.as_deref(),
        );
        let url = join_url(&base_url, &package.location.href);

        let source_name = package
            .format
            .as_ref()
            .and_then(|format| format.source_rpm.as_deref())
            .and_then(source_name_from_rpm);

        let mut entry = PackageEntry::new(package.name.clone(), version, url.clone());
        if let Some(source_name) = &source_name {
            entry = entry.with_source_name(source_name.clone());
        }
        entries.push(entry);

        let provides = package
            .format
            .as_ref()
            .and_then(|format| format.provides.as_ref())
            .map(|provides| provides.entries.as_slice())
            .unwrap_or_default();

        for provided in provides {
            // Only EQ-flagged provides carry a meaningful version.
            let version = if provided.flags.as_deref() == Some("EQ") {
                compose_version(
                    provided.epoch.as_deref(),
                    provided.version.as_deref(),
                    provided.release.as_deref(),
                )
            } else {
                None
            };

            let mut alias = PackageEntry::new(provided.name.clone(), version, url.clone())
                .with_binary_name(package.name.clone());
            if let Some(source_name) = &source_name {
                alias = alias.with_source_name(source_name.clone());
            }
            entries.push(alias);
        }
    }

    Ok(entries)
}

/// Enumerate packages in an RPM repository.
pub fn enumerate_rpm_packages(
    base_url: &str,
    os_name: &str,
    os_code_name: &str,
    os_arch: &str,
) -> Result<PackageIter> {
    let entries = rpm_package_entries(base_url, os_name, os_code_name, os_arch)?;

    Ok(Box::new(entries.into_iter().map(Ok)))
}

/// Candidate base URLs from a mirrorlist file: one URL per line,
/// ignoring blanks and `#` comments.
fn mirror_base_urls(mirrorlist_url: &str) -> Result<Vec<String>> {
    let reader = BufReader::new(open_compressed_url(mirrorlist_url)?);
    let mut mirrors = Vec::new();

    for line in reader.lines() {
        let line = line.map_err(|e| RepoCheckError::IoPath(mirrorlist_url.to_string(), e))?;
        let line = line.trim();

        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        mirrors.push(line.to_string());
    }

    Ok(mirrors)
}

/// Enumerate packages in an RPM repository using a mirrorlist.
///
/// Mirrors are tried in listed order. Transport and metadata errors fall
/// through to the next mirror; exhausting every mirror is fatal.
pub fn enumerate_rpm_packages_from_mirrorlist(
    mirrorlist_url: &str,
    os_name: &str,
    os_code_name: &str,
    os_arch: &str,
) -> Result<PackageIter> {
    let mirrorlist_url = replace_tokens(mirrorlist_url, os_name, os_code_name, os_arch);

    info!("reading RPM mirrorlist from {}", mirrorlist_url);

    for base_url in mirror_base_urls(&mirrorlist_url)? {
        match rpm_package_entries(&base_url, os_name, os_code_name, os_arch) {
            Ok(entries) => return Ok(Box::new(entries.into_iter().map(Ok))),
            Err(e) if e.allows_mirror_fallback() => {
                warn!("error reading from mirror '{}': {}", base_url, e);
                warn!("falling back to next available mirror...");
            }
            Err(e) => return Err(e),
        }
    }

    Err(RepoCheckError::AllMirrorsFailed(mirrorlist_url))
}
