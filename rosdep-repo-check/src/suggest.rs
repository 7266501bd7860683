// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Heuristic package name suggestions.

When a rosdep key has no rule for some OS, the key's name is often a
near-miss of a real package name on that OS. This module searches for
likely candidates by mutating the name through a fixed sequence of
conventions (`-dev` vs `-devel`, `lib` prefixes, `cmake()`/`pkgconfig()`
provides, `pythonNdist()` provides). Results are advisory, never
authoritative.
*/

use {
    crate::{config::Config, error::Result, find_package, PackageEntry},
    log::info,
    once_cell::sync::Lazy,
    regex::Regex,
};

static PYTHON_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^python(\d)-(.*)").unwrap());

/// Attempt to find a package which may satisfy a key based on its name.
///
/// The key is looked up verbatim against the OS's newest supported
/// version and primary architecture, then each applicable heuristic is
/// tried in order, recursing on the mutated name. The first hit wins.
pub fn make_suggestion(
    config: &Config,
    key: &str,
    os_name: &str,
) -> Result<Option<PackageEntry>> {
    let os_version = match config
        .supported_versions
        .get(os_name)
        .and_then(|versions| versions.last())
    {
        Some(os_version) => os_version,
        None => return Ok(None),
    };
    let os_arch = match config
        .supported_arches
        .get(os_name)
        .and_then(|arches| arches.first())
    {
        Some(os_arch) => os_arch,
        None => return Ok(None),
    };

    if let Some(suggestion) = find_package(config, key, os_name, os_version, os_arch)? {
        info!(
            "suggesting '{}' package for {}",
            suggestion.binary_name, os_name
        );

        return Ok(Some(suggestion));
    }

    info!(
        "no '{}' package for {} {} ({}), looking for variants...",
        key, os_name, os_version, os_arch
    );

    if let Some(base) = key.strip_suffix("-dev") {
        if let Some(suggestion) = make_suggestion(config, &format!("{}-devel", base), os_name)? {
            return Ok(Some(suggestion));
        }
    }

    if let Some(stripped) = key.strip_prefix("lib") {
        if let Some(suggestion) = make_suggestion(config, stripped, os_name)? {
            return Ok(Some(suggestion));
        }
    }

    if let Some(base) = key.strip_suffix("-devel") {
        for candidate in [format!("cmake({})", base), format!("pkgconfig({})", base)] {
            if let Some(suggestion) = make_suggestion(config, &candidate, os_name)? {
                return Ok(Some(suggestion));
            }
        }
    }

    if let Some(captures) = PYTHON_PATTERN.captures(key) {
        let python_version = &captures[1];
        let rest = &captures[2];

        let candidate = format!("python{}dist({})", python_version, rest);
        if let Some(suggestion) = make_suggestion(config, &candidate, os_name)? {
            return Ok(Some(suggestion));
        }

        if rest.contains('-') {
            let candidate =
                format!("python{}dist({})", python_version, rest.replace('-', "_"));
            if let Some(suggestion) = make_suggestion(config, &candidate, os_name)? {
                return Ok(Some(suggestion));
            }
        }
    }

    Ok(None)
}
