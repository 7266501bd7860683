// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Debian package repository enumeration.

Debian repositories advertise binary packages in
`dists/<codename>/<component>/binary-<arch>/Packages.gz`: a gzip
compressed series of RFC822-style paragraphs, one per package,
separated by blank lines.
*/

use {
    crate::{
        error::{RepoCheckError, Result},
        fetch::{join_url, open_compressed_url},
        PackageEntry, PackageIter,
    },
    log::info,
    std::{
        collections::HashMap,
        io::{BufRead, BufReader},
    },
};

/// A field value in a package index paragraph.
///
/// Continuation lines (lines starting with whitespace) turn a field into
/// a list of its continuation values.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum FieldValue {
    Simple(String),
    List(Vec<String>),
}

impl FieldValue {
    /// The value as a single line, if it is one.
    pub fn as_simple(&self) -> Option<&str> {
        match self {
            Self::Simple(value) => Some(value),
            Self::List(_) => None,
        }
    }
}

/// Streaming reader of blank-line-delimited `key: value` blocks.
///
/// Each item is one parsed block. Continuation lines accumulate into
/// [FieldValue::List] entries. Empty blocks (from consecutive blank
/// lines or a trailing newline) are skipped.
pub struct ControlBlocks<R> {
    reader: R,
    url: String,
    done: bool,
}

impl<R: BufRead> ControlBlocks<R> {
    pub fn new(reader: R, url: impl Into<String>) -> Self {
        Self {
            reader,
            url: url.into(),
            done: false,
        }
    }

    fn malformed(&self, message: &str) -> RepoCheckError {
        RepoCheckError::MalformedMetadata(self.url.clone(), message.to_string())
    }

    fn next_block(&mut self) -> Result<Option<HashMap<String, FieldValue>>> {
        let mut block = HashMap::new();
        let mut key: Option<String> = None;

        loop {
            let mut line = String::new();
            let read = self
                .reader
                .read_line(&mut line)
                .map_err(|e| RepoCheckError::IoPath(self.url.clone(), e))?;

            if read == 0 {
                self.done = true;
                return Ok(if block.is_empty() { None } else { Some(block) });
            }

            if line.starts_with('\r') || line.starts_with('\n') {
                if block.is_empty() {
                    continue;
                }

                return Ok(Some(block));
            }

            if line.starts_with(' ') || line.starts_with('\t') {
                let key = key
                    .as_ref()
                    .ok_or_else(|| self.malformed("list element at block beginning"))?;

                let items = match block.remove(key) {
                    Some(FieldValue::List(items)) => items,
                    Some(FieldValue::Simple(value)) if value.is_empty() => Vec::new(),
                    Some(FieldValue::Simple(value)) => vec![value],
                    None => Vec::new(),
                };

                let mut items = items;
                items.push(line.trim().to_string());
                block.insert(key.clone(), FieldValue::List(items));

                continue;
            }

            let (name, value) = line
                .split_once(':')
                .ok_or_else(|| self.malformed("field line without separator"))?;
            let name = name.trim();

            if name.is_empty() {
                return Err(self.malformed("empty key"));
            }

            block.insert(
                name.to_string(),
                FieldValue::Simple(value.trim().to_string()),
            );
            key = Some(name.to_string());
        }
    }
}

impl<R: BufRead> Iterator for ControlBlocks<R> {
    type Item = Result<HashMap<String, FieldValue>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.next_block() {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None) => None,
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

fn simple_field<'a>(
    block: &'a HashMap<String, FieldValue>,
    name: &str,
    url: &str,
) -> Result<&'a str> {
    block
        .get(name)
        .and_then(|value| value.as_simple())
        .ok_or_else(|| {
            RepoCheckError::MalformedMetadata(
                url.to_string(),
                format!("package block is missing the {} field", name),
            )
        })
}

fn entry_from_block(
    base_url: &str,
    packages_url: &str,
    block: &HashMap<String, FieldValue>,
) -> Result<PackageEntry> {
    let package = simple_field(block, "Package", packages_url)?;
    let version = simple_field(block, "Version", packages_url)?;
    let filename = simple_field(block, "Filename", packages_url)?;

    let source = block
        .get("Source")
        .and_then(|value| value.as_simple())
        .unwrap_or(package);

    Ok(PackageEntry::new(
        package,
        Some(version.to_string()),
        join_url(base_url, filename),
    )
    .with_source_name(source))
}

/// Enumerate the binary packages in a Debian repository component.
pub fn enumerate_deb_packages(
    base_url: &str,
    component: &str,
    os_code_name: &str,
    os_arch: &str,
) -> Result<PackageIter> {
    let packages_url = join_url(
        base_url,
        &format!(
            "dists/{}/{}/binary-{}/Packages.gz",
            os_code_name, component, os_arch
        ),
    );

    info!("reading Debian package metadata from {}", packages_url);

    let reader = open_compressed_url(&packages_url)?;

    let base_url = base_url.to_string();
    let blocks = ControlBlocks::new(BufReader::new(reader), packages_url.clone());

    Ok(Box::new(blocks.map(move |block| {
        entry_from_block(&base_url, &packages_url, &block?)
    })))
}
