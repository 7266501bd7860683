// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! rosdep package repository checking.

This crate verifies that rosdep keys resolve to packages that actually
exist in the OS package repositories of every supported platform.

A platform is a `(os_name, os_code_name, os_arch)` tuple. For each
platform, a configured [config::PackageSource] knows how to enumerate the
repository's native index format (Debian `Packages.gz`, RPM
`repomd.xml`/`primary.xml`, Alpine `APKINDEX.tar.gz`, pacman
`.db.tar.gz`, or an OpenEmbedded layer index) into a stream of
[PackageEntry] values. Enumeration is lazy and cached: a
[RepositoryCacheCollection] memoizes one [RepositoryCache] per platform
tuple, and each cache drains its underlying single-pass enumeration only
as far as lookups require.

[find_package] performs the key-to-package existence lookup across the
configured sources, [verify::verify_rules] walks a rosdep rule tree and
reports every unresolvable `(os, version, arch, package)` combination,
and [suggest::make_suggestion] proposes likely package names for keys
that have no rule yet.
*/

pub mod apk;
pub mod config;
pub mod deb;
pub mod error;
pub mod fetch;
pub mod layer_index;
pub mod pacman;
pub mod rpm;
pub mod suggest;
pub mod verify;
pub mod yaml;

pub use crate::error::{RepoCheckError, Result};

use {
    crate::config::{Config, PackageSource, SourceGroup},
    log::warn,
    std::{
        cell::RefCell,
        collections::HashMap,
        fmt,
        hash::{Hash, Hasher},
        rc::Rc,
    },
};

/// A single-pass enumeration of package entries.
pub type PackageIter = Box<dyn Iterator<Item = Result<PackageEntry>>>;

/// Format an OS name and version for human consumption.
pub fn fmt_os(os_name: &str, os_code_name: &str) -> String {
    if os_code_name.is_empty() {
        os_name.to_string()
    } else {
        format!("{} {}", os_name, os_code_name)
    }
}

/// One resolvable package name in a repository.
///
/// Identity is defined by `name` alone: two entries with the same name
/// are interchangeable for containment checks even if their version or
/// URL differ. The remaining fields are descriptive payload.
#[derive(Clone, Debug)]
pub struct PackageEntry {
    /// The resolvable identifier: a real package name or a provided
    /// virtual name.
    pub name: String,

    /// Version of the package, when the index carries one.
    pub version: Option<String>,

    /// Location of the package artifact or recipe.
    pub url: String,

    /// Name of the source/origin package when this entry is a
    /// sub-package. Defaults to `name`.
    pub source_name: String,

    /// The installable package name when this entry represents a
    /// "provides" alias. Defaults to `name`.
    pub binary_name: String,
}

impl PackageEntry {
    pub fn new(
        name: impl Into<String>,
        version: Option<String>,
        url: impl Into<String>,
    ) -> Self {
        let name = name.into();

        Self {
            version,
            url: url.into(),
            source_name: name.clone(),
            binary_name: name.clone(),
            name,
        }
    }

    pub fn with_source_name(mut self, source_name: impl Into<String>) -> Self {
        self.source_name = source_name.into();
        self
    }

    pub fn with_binary_name(mut self, binary_name: impl Into<String>) -> Self {
        self.binary_name = binary_name.into();
        self
    }
}

impl PartialEq for PackageEntry {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PackageEntry {}

impl Hash for PackageEntry {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
    }
}

impl PartialEq<str> for PackageEntry {
    fn eq(&self, other: &str) -> bool {
        self.name == other
    }
}

impl PartialEq<&str> for PackageEntry {
    fn eq(&self, other: &&str) -> bool {
        self.name == *other
    }
}

impl fmt::Display for PackageEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// A cache of the packages in one repository.
///
/// Wraps exactly one lazy, single-pass enumeration plus the set of
/// entries already pulled from it. Lookups consult the cached entries
/// first, then continue draining the shared enumeration from wherever
/// the previous operation left off. Once the enumeration is exhausted it
/// is dropped and never queried again.
pub struct RepositoryCache {
    entries: Vec<PackageEntry>,
    by_name: HashMap<String, usize>,
    source: Option<PackageIter>,
}

impl RepositoryCache {
    pub fn new(source: PackageIter) -> Self {
        Self {
            entries: Vec::new(),
            by_name: HashMap::new(),
            source: Some(source),
        }
    }

    /// Whether the underlying enumeration has been fully drained.
    pub fn is_exhausted(&self) -> bool {
        self.source.is_none()
    }

    /// Pull the next previously-unseen entry from the source, caching it.
    ///
    /// Returns `Ok(None)` once the source is exhausted. Entries whose
    /// name was already cached are deduplicated (the first entry wins).
    fn pull(&mut self) -> Result<Option<PackageEntry>> {
        let source = match self.source.as_mut() {
            Some(source) => source,
            None => return Ok(None),
        };

        loop {
            match source.next() {
                Some(Ok(entry)) => {
                    if self.by_name.contains_key(&entry.name) {
                        continue;
                    }

                    self.by_name.insert(entry.name.clone(), self.entries.len());
                    self.entries.push(entry.clone());

                    return Ok(Some(entry));
                }
                Some(Err(e)) => return Err(e),
                None => {
                    self.source = None;
                    return Ok(None);
                }
            }
        }
    }

    /// Test whether a package with the given name is present, returning
    /// its entry.
    ///
    /// Checks the cache first, then drains the enumeration until the
    /// name appears or the source runs dry. Never restarts the source.
    pub fn find(&mut self, name: &str) -> Result<Option<PackageEntry>> {
        if let Some(&index) = self.by_name.get(name) {
            return Ok(Some(self.entries[index].clone()));
        }

        while let Some(entry) = self.pull()? {
            if entry.name == name {
                return Ok(Some(entry));
            }
        }

        Ok(None)
    }

    /// Enumerate all packages: cached entries first, then the remainder
    /// of the shared enumeration.
    pub fn iter_packages(&mut self) -> CachedPackageIter<'_> {
        CachedPackageIter {
            cache: self,
            position: 0,
        }
    }
}

/// Iterator returned by [RepositoryCache::iter_packages].
pub struct CachedPackageIter<'a> {
    cache: &'a mut RepositoryCache,
    position: usize,
}

impl Iterator for CachedPackageIter<'_> {
    type Item = Result<PackageEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position < self.cache.entries.len() {
            let entry = self.cache.entries[self.position].clone();
            self.position += 1;

            return Some(Ok(entry));
        }

        match self.cache.pull() {
            Ok(Some(entry)) => {
                self.position = self.cache.entries.len();
                Some(Ok(entry))
            }
            Ok(None) => None,
            Err(e) => Some(Err(e)),
        }
    }
}

/// A collection of per-platform repository caches for one package source.
///
/// Creates a [RepositoryCache] on first request for each distinct
/// `(os_name, os_code_name, os_arch)` tuple and memoizes it for the
/// lifetime of the collection. The backing enumeration for a given tuple
/// is assumed pure, so this memoization is sound.
pub struct RepositoryCacheCollection {
    source: PackageSource,
    caches: RefCell<HashMap<(String, String, String), Rc<RefCell<RepositoryCache>>>>,
}

impl RepositoryCacheCollection {
    pub fn new(source: PackageSource) -> Self {
        Self {
            source,
            caches: RefCell::new(HashMap::new()),
        }
    }

    /// The source definition backing this collection.
    pub fn source(&self) -> &PackageSource {
        &self.source
    }

    /// Obtain the (possibly freshly created) cache for a platform tuple.
    ///
    /// Repeat calls for the same tuple return the identical cache
    /// object.
    pub fn enumerate_packages(
        &self,
        os_name: &str,
        os_code_name: &str,
        os_arch: &str,
    ) -> Result<Rc<RefCell<RepositoryCache>>> {
        let key = (
            os_name.to_string(),
            os_code_name.to_string(),
            os_arch.to_string(),
        );

        if let Some(cache) = self.caches.borrow().get(&key) {
            return Ok(Rc::clone(cache));
        }

        let source = self.source.enumerate(os_name, os_code_name, os_arch)?;
        let cache = Rc::new(RefCell::new(RepositoryCache::new(source)));
        self.caches.borrow_mut().insert(key, Rc::clone(&cache));

        Ok(cache)
    }
}

/// Find a package by name for the given platform.
///
/// Candidate sources are consulted in their configured declaration
/// order; the first entry matching the name wins. `Ok(None)` means no
/// configured source knows the package. An OS/version combination with
/// zero configured sources degrades to a logged warning.
pub fn find_package(
    config: &Config,
    pkg_name: &str,
    os_name: &str,
    os_code_name: &str,
    os_arch: &str,
) -> Result<Option<PackageEntry>> {
    let groups = match config.package_sources.get(os_name) {
        Some(groups) => groups,
        None => return Ok(None),
    };

    for group in groups {
        let sources: Vec<&RepositoryCacheCollection> = match group {
            SourceGroup::AllVersions(source) => vec![source],
            SourceGroup::ByVersion(versions) => versions
                .get(os_code_name)
                .map(|sources| sources.iter().collect())
                .unwrap_or_default(),
        };

        if sources.is_empty() {
            warn!("no sources for {}", fmt_os(os_name, os_code_name));
        }

        for source in sources {
            let cache = source.enumerate_packages(os_name, os_code_name, os_arch)?;
            let found = cache.borrow_mut().find(pkg_name)?;
            if let Some(entry) = found {
                return Ok(Some(entry));
            }
        }
    }

    Ok(None)
}

/// Get an informational link about a package.
///
/// The first configured dashboard whose pattern matches the start of the
/// package URL has its template expanded: regex capture groups first,
/// then `{placeholder}` substitution. Without a matching dashboard the
/// package URL itself is returned.
pub fn get_package_link(
    config: &Config,
    pkg: &PackageEntry,
    os_name: &str,
    os_code_name: &str,
    os_arch: &str,
) -> String {
    for dashboard in &config.package_dashboards {
        let captures = match dashboard.pattern.captures(&pkg.url) {
            Some(captures) => captures,
            None => continue,
        };

        // Patterns match from the beginning of the URL.
        if captures.get(0).map(|m| m.start()) != Some(0) {
            continue;
        }

        let mut expanded = String::new();
        captures.expand(&dashboard.url, &mut expanded);

        let version = pkg.version.as_deref().unwrap_or("");

        for (placeholder, value) in [
            ("{binary_name}", pkg.binary_name.as_str()),
            ("{name}", pkg.name.as_str()),
            ("{os_arch}", os_arch),
            ("{os_code_name}", os_code_name),
            ("{os_name}", os_name),
            ("{source_name}", pkg.source_name.as_str()),
            ("{url}", pkg.url.as_str()),
            ("{version}", version),
        ] {
            expanded = expanded.replace(placeholder, value);
        }

        return expanded;
    }

    pkg.url.clone()
}

/// Create a human-readable summary regarding missing packages.
///
/// Results are grouped by platform and sorted for stable output.
pub fn summarize_broken_packages(broken: &[verify::VerificationOutcome]) -> String {
    let mut grouped: std::collections::BTreeMap<String, std::collections::BTreeSet<String>> =
        std::collections::BTreeMap::new();

    for outcome in broken {
        let platform = format!(
            "{} on {}",
            fmt_os(&outcome.os_name, &outcome.os_version),
            outcome.os_arch
        );

        grouped.entry(platform).or_default().insert(format!(
            "- Package {} for rosdep key {}",
            outcome.package, outcome.key
        ));
    }

    grouped
        .into_iter()
        .map(|(platform, messages)| {
            format!(
                "* The following {} packages were not found for {}:\n{}",
                messages.len(),
                platform,
                messages.into_iter().collect::<Vec<_>>().join("\n")
            )
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}
