// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Configuration file loading.

The configuration is a YAML document using custom tags to declare
package sources, e.g. `!deb_base_url "http://archive.ubuntu.com/ubuntu
main"`. Top-level keys: `package_sources`, `supported_versions`,
`supported_arches`, `name_replacements`, and `package_dashboards`.
*/

use {
    crate::{
        apk::enumerate_apk_packages,
        deb::enumerate_deb_packages,
        error::{RepoCheckError, Result},
        layer_index::enumerate_layer_index_packages,
        pacman::enumerate_pacman_packages,
        rpm::{enumerate_rpm_packages, enumerate_rpm_packages_from_mirrorlist},
        PackageIter, RepositoryCacheCollection,
    },
    regex::Regex,
    serde::Deserialize,
    serde_yaml::Value,
    std::{collections::BTreeMap, path::Path},
};

/// Declaration of one package repository to enumerate.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PackageSource {
    /// A Debian repository component.
    Deb { base_url: String, component: String },
    /// An RPM repository.
    Rpm { base_url: String },
    /// An RPM repository behind a mirrorlist.
    RpmMirrorlist { mirrorlist_url: String },
    /// An Alpine repository.
    Apk { base_url: String },
    /// A pacman repository.
    Pacman { base_url: String, repo_name: String },
    /// An OpenEmbedded layer index.
    LayerIndex { base_url: String },
}

impl PackageSource {
    /// Construct a source from a YAML tag and its scalar payload.
    pub fn from_tagged(tag: &str, payload: &str) -> Result<Self> {
        let split_payload = || {
            payload.rsplit_once(' ').ok_or_else(|| {
                RepoCheckError::ConfigInvalidSource {
                    tag: tag.to_string(),
                    message: "expected a URL and a name separated by a space".to_string(),
                }
            })
        };

        Ok(match tag {
            "deb_base_url" => {
                let (base_url, component) = split_payload()?;
                Self::Deb {
                    base_url: base_url.to_string(),
                    component: component.to_string(),
                }
            }
            "rpm_base_url" => Self::Rpm {
                base_url: payload.to_string(),
            },
            "rpm_mirrorlist_url" => Self::RpmMirrorlist {
                mirrorlist_url: payload.to_string(),
            },
            "apk_base_url" => Self::Apk {
                base_url: payload.to_string(),
            },
            "pacman_base_url" => {
                let (base_url, repo_name) = split_payload()?;
                Self::Pacman {
                    base_url: base_url.to_string(),
                    repo_name: repo_name.to_string(),
                }
            }
            "layer_index_url" => Self::LayerIndex {
                base_url: payload.to_string(),
            },
            _ => {
                return Err(RepoCheckError::ConfigInvalidSource {
                    tag: tag.to_string(),
                    message: "unknown package source tag".to_string(),
                })
            }
        })
    }

    /// Start enumerating packages for a platform tuple.
    pub fn enumerate(
        &self,
        os_name: &str,
        os_code_name: &str,
        os_arch: &str,
    ) -> Result<PackageIter> {
        match self {
            Self::Deb {
                base_url,
                component,
            } => enumerate_deb_packages(base_url, component, os_code_name, os_arch),
            Self::Rpm { base_url } => {
                enumerate_rpm_packages(base_url, os_name, os_code_name, os_arch)
            }
            Self::RpmMirrorlist { mirrorlist_url } => enumerate_rpm_packages_from_mirrorlist(
                mirrorlist_url,
                os_name,
                os_code_name,
                os_arch,
            ),
            Self::Apk { base_url } => enumerate_apk_packages(base_url, os_code_name, os_arch),
            Self::Pacman {
                base_url,
                repo_name,
            } => enumerate_pacman_packages(base_url, repo_name, os_arch),
            Self::LayerIndex { base_url } => {
                enumerate_layer_index_packages(base_url, os_code_name)
            }
        }
    }
}

/// One entry in an OS's `package_sources` list.
///
/// Either a single source applying to every version of the OS, or a
/// mapping from OS version to the sources for that version.
pub enum SourceGroup {
    AllVersions(RepositoryCacheCollection),
    ByVersion(BTreeMap<String, Vec<RepositoryCacheCollection>>),
}

/// A regex over package URLs paired with a human-readable URL template.
#[derive(Debug)]
pub struct PackageDashboard {
    pub pattern: Regex,
    pub url: String,
}

/// Loaded configuration, read-only after loading.
pub struct Config {
    /// OS name to its ordered list of source groups.
    pub package_sources: BTreeMap<String, Vec<SourceGroup>>,

    /// OS name to its ordered list of supported versions, oldest first.
    pub supported_versions: BTreeMap<String, Vec<String>>,

    /// OS name to its supported architectures, primary first.
    pub supported_arches: BTreeMap<String, Vec<String>>,

    /// OS name to OS version to literal package name substitutions.
    pub name_replacements: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,

    /// Dashboards for informational package links, in match order.
    pub package_dashboards: Vec<PackageDashboard>,
}

#[derive(Deserialize)]
struct RawConfig {
    #[serde(default)]
    package_sources: BTreeMap<String, Vec<Value>>,
    #[serde(default)]
    supported_versions: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    supported_arches: BTreeMap<String, Vec<String>>,
    #[serde(default)]
    name_replacements: BTreeMap<String, BTreeMap<String, BTreeMap<String, String>>>,
    #[serde(default)]
    package_dashboards: Vec<RawDashboard>,
}

#[derive(Deserialize)]
struct RawDashboard {
    pattern: Value,
    url: String,
}

fn tagged_scalar(value: &Value) -> Result<(String, String)> {
    if let Value::Tagged(tagged) = value {
        if let Value::String(payload) = &tagged.value {
            let tag = tagged.tag.to_string();

            return Ok((tag.trim_start_matches('!').to_string(), payload.clone()));
        }
    }

    Err(RepoCheckError::InvalidRules(
        "expected a tagged scalar value".to_string(),
    ))
}

fn source_collection(value: &Value) -> Result<RepositoryCacheCollection> {
    let (tag, payload) = tagged_scalar(value)?;

    Ok(RepositoryCacheCollection::new(PackageSource::from_tagged(
        &tag, &payload,
    )?))
}

fn source_group(value: &Value) -> Result<SourceGroup> {
    match value {
        Value::Tagged(_) => Ok(SourceGroup::AllVersions(source_collection(value)?)),
        Value::Mapping(mapping) => {
            let mut by_version = BTreeMap::new();

            for (version, sources) in mapping {
                let version = version.as_str().ok_or_else(|| {
                    RepoCheckError::InvalidRules(
                        "package source version keys must be strings".to_string(),
                    )
                })?;
                let sources = sources.as_sequence().ok_or_else(|| {
                    RepoCheckError::InvalidRules(format!(
                        "package sources for version {} must be a list",
                        version
                    ))
                })?;

                by_version.insert(
                    version.to_string(),
                    sources
                        .iter()
                        .map(source_collection)
                        .collect::<Result<Vec<_>>>()?,
                );
            }

            Ok(SourceGroup::ByVersion(by_version))
        }
        _ => Err(RepoCheckError::InvalidRules(
            "package sources must be tagged scalars or version mappings".to_string(),
        )),
    }
}

impl Config {
    /// Load configuration from a YAML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| RepoCheckError::IoPath(path.display().to_string(), e))?;

        Self::parse(&text)
    }

    /// Parse configuration from YAML text.
    pub fn parse(text: &str) -> Result<Self> {
        let raw: RawConfig = serde_yaml::from_str(text)?;

        let mut package_sources = BTreeMap::new();
        for (os_name, groups) in &raw.package_sources {
            package_sources.insert(
                os_name.clone(),
                groups.iter().map(source_group).collect::<Result<Vec<_>>>()?,
            );
        }

        let mut package_dashboards = Vec::new();
        for dashboard in &raw.package_dashboards {
            let (tag, payload) = tagged_scalar(&dashboard.pattern)?;

            if tag != "regular_expression" {
                return Err(RepoCheckError::ConfigInvalidSource {
                    tag,
                    message: "dashboard patterns must be regular expressions".to_string(),
                });
            }

            package_dashboards.push(PackageDashboard {
                pattern: Regex::new(&payload)?,
                url: dashboard.url.clone(),
            });
        }

        Ok(Self {
            package_sources,
            supported_versions: raw.supported_versions,
            supported_arches: raw.supported_arches,
            name_replacements: raw.name_replacements,
            package_dashboards,
        })
    }
}

#[cfg(test)]
mod test {
    use {super::*, crate::find_package, indoc::indoc, std::io::Write, std::rc::Rc};

    const CONFIG_YAML: &str = indoc! {r#"
        package_sources:
          ubuntu:
          - !deb_base_url 'http://archive.ubuntu.com/ubuntu main'
          - focal:
            - !deb_base_url 'http://ppa.example.com/ros focal-main'
          fedora:
          - !rpm_mirrorlist_url 'https://mirrors.fedoraproject.org/mirrorlist?repo=fedora-$releasever&arch=$basearch'
          alpine:
          - !apk_base_url 'http://dl-cdn.alpinelinux.org/alpine/$releasever/main'
          arch:
          - !pacman_base_url 'http://mirror.example.com/archlinux/$repo/os/$arch extra'
          openembedded:
          - !layer_index_url 'https://layers.openembedded.org/layerindex/api/'
        supported_versions:
          ubuntu: [focal, jammy]
        supported_arches:
          ubuntu: [amd64, arm64]
        name_replacements:
          ubuntu:
            focal:
              'python3-': 'python3.8-'
        package_dashboards:
        - pattern: !regular_expression 'http://archive\.ubuntu\.com/ubuntu/pool/(.*)'
          url: 'https://packages.ubuntu.com/{os_code_name}/{binary_name}'
    "#};

    #[test]
    fn parses_tagged_package_sources() -> Result<()> {
        let config = Config::parse(CONFIG_YAML)?;

        let ubuntu = &config.package_sources["ubuntu"];
        assert_eq!(ubuntu.len(), 2);

        match &ubuntu[0] {
            SourceGroup::AllVersions(collection) => assert_eq!(
                collection.source(),
                &PackageSource::Deb {
                    base_url: "http://archive.ubuntu.com/ubuntu".to_string(),
                    component: "main".to_string(),
                }
            ),
            SourceGroup::ByVersion(_) => panic!("expected an all-versions source"),
        }

        match &ubuntu[1] {
            SourceGroup::ByVersion(by_version) => {
                assert_eq!(by_version["focal"].len(), 1);
                assert_eq!(
                    by_version["focal"][0].source(),
                    &PackageSource::Deb {
                        base_url: "http://ppa.example.com/ros".to_string(),
                        component: "focal-main".to_string(),
                    }
                );
            }
            SourceGroup::AllVersions(_) => panic!("expected a by-version source"),
        }

        match &config.package_sources["arch"][0] {
            SourceGroup::AllVersions(collection) => assert_eq!(
                collection.source(),
                &PackageSource::Pacman {
                    base_url: "http://mirror.example.com/archlinux/$repo/os/$arch".to_string(),
                    repo_name: "extra".to_string(),
                }
            ),
            SourceGroup::ByVersion(_) => panic!("expected an all-versions source"),
        }

        Ok(())
    }

    #[test]
    fn parses_versions_replacements_and_dashboards() -> Result<()> {
        let config = Config::parse(CONFIG_YAML)?;

        assert_eq!(config.supported_versions["ubuntu"], ["focal", "jammy"]);
        assert_eq!(config.supported_arches["ubuntu"], ["amd64", "arm64"]);
        assert_eq!(
            config.name_replacements["ubuntu"]["focal"]["python3-"],
            "python3.8-"
        );

        assert_eq!(config.package_dashboards.len(), 1);
        assert!(config.package_dashboards[0]
            .pattern
            .is_match("http://archive.ubuntu.com/ubuntu/pool/main/f/foo/foo_1.deb"));

        Ok(())
    }

    #[test]
    fn deb_source_without_component_is_invalid() {
        let result = Config::parse("package_sources:\n  ubuntu:\n  - !deb_base_url 'nospace'\n");

        assert!(matches!(
            result,
            Err(RepoCheckError::ConfigInvalidSource { .. })
        ));
    }

    #[test]
    fn unknown_source_tag_is_invalid() {
        let result = Config::parse("package_sources:\n  ubuntu:\n  - !mystery_url 'http://x'\n");

        assert!(matches!(
            result,
            Err(RepoCheckError::ConfigInvalidSource { .. })
        ));
    }

    fn write_deb_repo(dir: &std::path::Path) {
        let packages_dir = dir.join("dists/focal/main/binary-amd64");
        std::fs::create_dir_all(&packages_dir).unwrap();

        let text = indoc! {"
            Package: libfoo
            Version: 1.0-1
            Filename: pool/main/f/foo/libfoo_1.0-1_amd64.deb
        "};

        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(text.as_bytes()).unwrap();
        std::fs::write(
            packages_dir.join("Packages.gz"),
            encoder.finish().into_result().unwrap(),
        )
        .unwrap();
    }

    #[test]
    fn lookup_through_loaded_config_memoizes_caches() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_deb_repo(dir.path());

        let base_url = url::Url::from_directory_path(dir.path()).unwrap();
        let config = Config::parse(&format!(
            "package_sources:\n  ubuntu:\n  - !deb_base_url '{} main'\n",
            base_url
        ))?;

        let found = find_package(&config, "libfoo", "ubuntu", "focal", "amd64")?;
        assert_eq!(found.as_ref().map(|e| e.name.as_str()), Some("libfoo"));
        assert_eq!(found.unwrap().version.as_deref(), Some("1.0-1"));

        assert!(find_package(&config, "missing", "ubuntu", "focal", "amd64")?.is_none());

        // Repeat requests for the same platform share one cache.
        match &config.package_sources["ubuntu"][0] {
            SourceGroup::AllVersions(collection) => {
                let first = collection.enumerate_packages("ubuntu", "focal", "amd64")?;
                let second = collection.enumerate_packages("ubuntu", "focal", "amd64")?;
                assert!(Rc::ptr_eq(&first, &second));
            }
            SourceGroup::ByVersion(_) => panic!("expected an all-versions source"),
        }

        Ok(())
    }
}
