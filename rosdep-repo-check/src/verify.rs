// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! rosdep rule verification.

A rule tree maps rosdep key to OS name to either a flat package list
(applying to every supported version of that OS) or a mapping from OS
version to a package list, where `*` acts as a default for versions
without an explicit entry. Verification resolves every in-scope
`(os, version, arch, package)` combination through [find_package] and
reports the ones that do not exist.
*/

use {
    crate::{
        config::Config,
        error::Result,
        find_package,
        yaml::{AnnotatedValue, YamlNode},
        PackageEntry,
    },
    std::collections::HashSet,
};

/// Result of checking one `(os, version, arch, package)` combination.
#[derive(Clone, Debug)]
pub struct VerificationOutcome {
    pub os_name: String,
    pub os_version: String,
    pub os_arch: String,
    /// The rosdep key the package was listed under.
    pub key: String,
    /// The package name after name replacements.
    pub package: String,
    /// The matching entry, or `None` if the package was not found.
    pub provider: Option<PackageEntry>,
    /// Source line of the rule, for diagnostics.
    pub line: Option<usize>,
}

struct VersionedPackages {
    os_version: String,
    packages: Vec<String>,
    line: Option<usize>,
}

fn package_names(value: &AnnotatedValue) -> Vec<String> {
    value
        .as_sequence()
        .unwrap_or_default()
        .iter()
        .filter_map(|item| item.as_str().map(str::to_string))
        .collect()
}

/// Version keys explicitly present for a key/OS pair in the complete
/// rule tree.
///
/// The wildcard check consults the complete tree, not the subset under
/// verification, so that isolating a `*` entry does not re-default
/// versions that have an explicit rule elsewhere in the document.
fn explicit_versions(all_rules: &AnnotatedValue, key: &str, os_name: &str) -> HashSet<String> {
    all_rules
        .get(key)
        .and_then(|rules| rules.get(os_name))
        .and_then(AnnotatedValue::as_mapping)
        .unwrap_or_default()
        .iter()
        .filter_map(|(version, _)| version.as_str().map(str::to_string))
        .collect()
}

fn packages_to_check(
    config: &Config,
    all_rules: &AnnotatedValue,
    key: &str,
    os_name: &str,
    os_name_line: usize,
    os_rules: &AnnotatedValue,
) -> Vec<VersionedPackages> {
    let supported = config
        .supported_versions
        .get(os_name)
        .map(Vec::as_slice)
        .unwrap_or_default();

    let mapping = match &os_rules.node {
        YamlNode::Mapping(entries) => entries,
        // A flat list (or an empty rule) applies to every supported
        // version.
        _ => {
            let packages = package_names(os_rules);

            return supported
                .iter()
                .map(|os_version| VersionedPackages {
                    os_version: os_version.clone(),
                    packages: packages.clone(),
                    line: Some(os_name_line),
                })
                .collect();
        }
    };

    let mut checks: Vec<VersionedPackages> = mapping
        .iter()
        .filter_map(|(version, packages)| {
            let os_version = version.as_str()?.to_string();

            Some(VersionedPackages {
                os_version,
                packages: package_names(packages),
                line: Some(version.line),
            })
        })
        .collect();

    if let Some(wildcard) = os_rules.get("*") {
        let explicit = explicit_versions(all_rules, key, os_name);
        let packages = package_names(wildcard);

        for os_version in supported {
            if explicit.contains(os_version)
                || checks.iter().any(|check| &check.os_version == os_version)
            {
                continue;
            }

            checks.push(VersionedPackages {
                os_version: os_version.clone(),
                packages: packages.clone(),
                line: Some(os_name_line),
            });
        }
    }

    checks
}

/// Verify the rules in `rules_to_check` against the configured package
/// sources.
///
/// `all_rules` is the complete document `rules_to_check` was isolated
/// from (pass the same tree when verifying everything). Returns one
/// outcome per unresolvable combination, plus one per resolvable
/// combination when `include_found` is set.
pub fn verify_rules(
    config: &Config,
    rules_to_check: &AnnotatedValue,
    all_rules: &AnnotatedValue,
    include_found: bool,
) -> Result<Vec<VerificationOutcome>> {
    let mut outcomes = Vec::new();

    for (key_node, rules) in rules_to_check.as_mapping().unwrap_or_default() {
        let key = match key_node.as_str() {
            Some(key) => key,
            None => continue,
        };

        for (os_node, os_rules) in rules.as_mapping().unwrap_or_default() {
            let os_name = match os_node.as_str() {
                Some(os_name) => os_name,
                None => continue,
            };

            if !config.package_sources.contains_key(os_name) {
                continue;
            }

            let supported = config
                .supported_versions
                .get(os_name)
                .map(Vec::as_slice)
                .unwrap_or_default();

            for check in
                packages_to_check(config, all_rules, key, os_name, os_node.line, os_rules)
            {
                if check.os_version == "*" || !supported.contains(&check.os_version) {
                    continue;
                }

                let replacements = config
                    .name_replacements
                    .get(os_name)
                    .and_then(|by_version| by_version.get(&check.os_version));

                for package in &check.packages {
                    let mut package = package.clone();

                    if let Some(replacements) = replacements {
                        for (needle, replacement) in replacements {
                            package = package.replace(needle.as_str(), replacement);
                        }
                    }

                    for os_arch in config
                        .supported_arches
                        .get(os_name)
                        .map(Vec::as_slice)
                        .unwrap_or_default()
                    {
                        let provider =
                            find_package(config, &package, os_name, &check.os_version, os_arch)?;

                        if provider.is_some() && !include_found {
                            continue;
                        }

                        outcomes.push(VerificationOutcome {
                            os_name: os_name.to_string(),
                            os_version: check.os_version.clone(),
                            os_arch: os_arch.clone(),
                            key: key.to_string(),
                            package: package.clone(),
                            provider,
                            line: check.line,
                        });
                    }
                }
            }
        }
    }

    Ok(outcomes)
}

#[cfg(test)]
mod test {
    use {
        super::*,
        crate::yaml::load_annotated,
        indoc::indoc,
        std::io::Write,
    };

    fn write_packages(dir: &std::path::Path, os_code_name: &str, packages: &[&str]) {
        let packages_dir = dir.join(format!("dists/{}/main/binary-amd64", os_code_name));
        std::fs::create_dir_all(&packages_dir).unwrap();

        let text = packages
            .iter()
            .map(|name| {
                format!(
                    "Package: {}\nVersion: 1.0-1\nFilename: pool/main/{}_1.0-1_amd64.deb\n",
                    name, name
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(text.as_bytes()).unwrap();
        std::fs::write(
            packages_dir.join("Packages.gz"),
            encoder.finish().into_result().unwrap(),
        )
        .unwrap();
    }

    fn test_config(dir: &std::path::Path) -> Config {
        let base_url = url::Url::from_directory_path(dir).unwrap();

        Config::parse(&format!(
            indoc! {"
                package_sources:
                  ubuntu:
                  - !deb_base_url '{} main'
                supported_versions:
                  ubuntu: [focal, jammy]
                supported_arches:
                  ubuntu: [amd64]
                name_replacements:
                  ubuntu:
                    jammy:
                      'python3-': 'python3really-'
            "},
            base_url
        ))
        .unwrap()
    }

    #[test]
    fn flat_rules_apply_to_every_supported_version() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_packages(dir.path(), "focal", &["libfoo"]);
        write_packages(dir.path(), "jammy", &[]);

        let config = test_config(dir.path());
        let rules = load_annotated("mykey:\n  ubuntu: [libfoo]\n")?;

        let broken = verify_rules(&config, &rules, &rules, false)?;

        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].os_version, "jammy");
        assert_eq!(broken[0].package, "libfoo");
        assert!(broken[0].provider.is_none());
        // Flat lists report the OS key's line.
        assert_eq!(broken[0].line, Some(2));

        Ok(())
    }

    #[test]
    fn wildcard_defaults_only_unlisted_versions() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_packages(dir.path(), "focal", &["libfocal"]);
        write_packages(dir.path(), "jammy", &["libwild"]);

        let config = test_config(dir.path());
        let rules = load_annotated(indoc! {"
            mykey:
              ubuntu:
                '*': [libwild]
                focal: [libfocal]
        "})?;

        let outcomes = verify_rules(&config, &rules, &rules, true)?;

        // focal keeps its explicit rule; jammy falls back to the
        // wildcard. Both resolve.
        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.provider.is_some()));
        assert!(outcomes
            .iter()
            .any(|o| o.os_version == "focal" && o.package == "libfocal"));
        assert!(outcomes
            .iter()
            .any(|o| o.os_version == "jammy" && o.package == "libwild"));

        Ok(())
    }

    #[test]
    fn wildcard_respects_versions_explicit_in_full_document() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_packages(dir.path(), "focal", &["libfocal"]);
        write_packages(dir.path(), "jammy", &["libwild"]);

        let config = test_config(dir.path());
        let all_rules = load_annotated(indoc! {"
            mykey:
              ubuntu:
                '*': [libwild]
                focal: [libfocal]
        "})?;
        // Isolation kept only the wildcard entry.
        let subset = load_annotated(indoc! {"
            mykey:
              ubuntu:
                '*': [libwild]
        "})?;

        let outcomes = verify_rules(&config, &subset, &all_rules, true)?;

        // focal is explicitly ruled in the full document, so the
        // wildcard only expands to jammy.
        assert_eq!(outcomes.len(), 1);
        assert_eq!(outcomes[0].os_version, "jammy");
        assert_eq!(outcomes[0].package, "libwild");

        Ok(())
    }

    #[test]
    fn version_rules_report_their_own_line() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_packages(dir.path(), "focal", &[]);
        write_packages(dir.path(), "jammy", &[]);

        let config = test_config(dir.path());
        let rules = load_annotated(indoc! {"
            mykey:
              ubuntu:
                focal: [libmissing]
        "})?;

        let broken = verify_rules(&config, &rules, &rules, false)?;

        assert_eq!(broken.len(), 1);
        assert_eq!(broken[0].line, Some(3));
        assert_eq!(broken[0].key, "mykey");
        assert_eq!(broken[0].os_arch, "amd64");

        Ok(())
    }

    #[test]
    fn name_replacements_apply_before_lookup() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_packages(dir.path(), "focal", &["python3-foo"]);
        write_packages(dir.path(), "jammy", &["python3really-foo"]);

        let config = test_config(dir.path());
        let rules = load_annotated("mykey:\n  ubuntu: [python3-foo]\n")?;

        let outcomes = verify_rules(&config, &rules, &rules, true)?;

        assert_eq!(outcomes.len(), 2);
        assert!(outcomes.iter().all(|o| o.provider.is_some()));
        assert!(outcomes
            .iter()
            .any(|o| o.os_version == "jammy" && o.package == "python3really-foo"));

        Ok(())
    }

    #[test]
    fn unconfigured_os_and_unsupported_versions_are_skipped() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_packages(dir.path(), "focal", &[]);
        write_packages(dir.path(), "jammy", &[]);

        let config = test_config(dir.path());
        let rules = load_annotated(indoc! {"
            mykey:
              debian: [libmissing]
              ubuntu:
                trusty: [libancient]
        "})?;

        let broken = verify_rules(&config, &rules, &rules, false)?;

        assert!(broken.is_empty());

        Ok(())
    }

    #[test]
    fn null_rules_check_nothing() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_packages(dir.path(), "focal", &[]);
        write_packages(dir.path(), "jammy", &[]);

        let config = test_config(dir.path());
        let rules = load_annotated("mykey:\n  ubuntu:\n")?;

        let broken = verify_rules(&config, &rules, &rules, false)?;

        assert!(broken.is_empty());

        Ok(())
    }
}
