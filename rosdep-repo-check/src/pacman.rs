// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Pacman package repository enumeration.

A pacman repository publishes `<repo>.db.tar.gz`: a gzip compressed tar
archive with one `<name>-<version>/desc` member per package. Each desc
file is a series of `%KEY%` headers, each followed by one value per line
and terminated by a blank line.
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

/// Replace pacman-specific tokens in a repository base URL.
pub fn replace_tokens(url: &str, repo_name: &str, os_arch: &str) -> String {
    url.replace("$arch", os_arch).replace("$repo", repo_name)
}

/// Parse one desc file into a key to values mapping.
///
/// Keys keep their `%` markers, e.g. `%NAME%`.
fn parse_desc(reader: impl BufRead, url: &str) -> Result<HashMap<String, Vec<String>>> {
    let mut block = HashMap::new();
    let mut lines = reader.lines();

    while let Some(key) = lines.next() {
        let key = key.map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;
        let key = key.trim();

        if key.is_empty() {
            continue;
        }

        let mut values = Vec::new();

        for line in lines.by_ref() {
            let line = line.map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;
            let line = line.trim();

            if line.is_empty() {
                break;
            }

            values.push(line.to_string());
        }

        block.insert(key.to_string(), values);
    }

    Ok(block)
}

fn desc_blocks(url: &str) -> Result<Vec<HashMap<String, Vec<String>>>> {
    let mut archive = tar::Archive::new(open_compressed_url(url)?);

    let entries = archive
        .entries()
        .map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;

    let mut blocks = Vec::new();

    for entry in entries {
        let entry = entry.map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;

        let is_desc = entry
            .path()
            .map(|path| path.to_string_lossy().ends_with("/desc"))
            .unwrap_or(false);

        if !is_desc {
            continue;
        }

        let block = parse_desc(BufReader::new(entry), url)?;

        if !block.is_empty() {
            blocks.push(block);
        }
    }

    Ok(blocks)
}

fn single_value<'a>(
    block: &'a HashMap<String, Vec<String>>,
    key: &str,
    url: &str,
) -> Result<&'a str> {
    block
        .get(key)
        .and_then(|values| values.first())
        .map(String::as_str)
        .ok_or_else(|| {
            RepoCheckError::MalformedMetadata(
                url.to_string(),
                format!("desc file is missing the {} field", key),
            )
        })
}

/// Enumerate packages in a pacman repository.
pub fn enumerate_pacman_packages(
    base_url: &str,
    repo_name: &str,
    os_arch: &str,
) -> Result<PackageIter> {
    let base_url = replace_tokens(base_url, repo_name, os_arch);
    let db_url = join_url(&base_url, &format!("{}.db.tar.gz", repo_name));

    info!("reading pacman package metadata from {}", db_url);

    let mut entries = Vec::new();

    for block in desc_blocks(&db_url)? {
        let name = single_value(&block, "%NAME%", &db_url)?;
        let version = single_value(&block, "%VERSION%", &db_url)?;
        let filename = single_value(&block, "%FILENAME%", &db_url)?;

        let url = join_url(&base_url, filename);

        entries.push(PackageEntry::new(name, Some(version.to_string()), url.clone()));

        for provided in block.get("%PROVIDES%").map(Vec::as_slice).unwrap_or_default() {
            entries.push(
                PackageEntry::new(provided, Some(version.to_string()), url.clone())
                    .with_source_name(name)
                    .with_binary_name(name),
            );
        }
    }

    Ok(Box::new(entries.into_iter().map(Ok)))
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc, std::io::Write};

    const FOO_DESC: &str = indoc! {"
        %FILENAME%
        foo-1.2-1-x86_64.pkg.tar.zst

        %NAME%
        foo

        %VERSION%
        1.2-1

        %PROVIDES%
        libfoo.so
        foo-virtual
    "};

    const BAR_DESC: &str = indoc! {"
        %FILENAME%
        bar-2.0-1-x86_64.pkg.tar.zst

        %NAME%
        bar

        %VERSION%
        2.0-1
    "};

    fn write_db(dir: &std::path::Path, repo_name: &str) {
        let mut tarball = tar::Builder::new(Vec::new());

        for (path, desc) in [
            ("foo-1.2-1/desc", FOO_DESC),
            ("foo-1.2-1/files", "ignored"),
            ("bar-2.0-1/desc", BAR_DESC),
        ] {
            let mut header = tar::Header::new_gnu();
            header.set_size(desc.len() as u64);
            header.set_mode(0o644);
            header.set_cksum();
            tarball.append_data(&mut header, path, desc.as_bytes()).unwrap();
        }

        let tarball = tarball.into_inner().unwrap();

        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(&tarball).unwrap();

        std::fs::write(
            dir.join(format!("{}.db.tar.gz", repo_name)),
            encoder.finish().into_result().unwrap(),
        )
        .unwrap();
    }

    fn dir_url(path: &std::path::Path) -> String {
        url::Url::from_directory_path(path).unwrap().to_string()
    }

    #[test]
    fn token_replacement() {
        assert_eq!(
            replace_tokens("http://mirror/$repo/os/$arch", "extra", "x86_64"),
            "http://mirror/extra/os/x86_64"
        );
    }

    #[test]
    fn desc_parses_into_value_lists() -> Result<()> {
        let block = parse_desc(std::io::Cursor::new(FOO_DESC), "test://desc")?;

        assert_eq!(block.get("%NAME%"), Some(&vec!["foo".to_string()]));
        assert_eq!(
            block.get("%PROVIDES%"),
            Some(&vec!["libfoo.so".to_string(), "foo-virtual".to_string()])
        );

        Ok(())
    }

    #[test]
    fn enumerates_main_and_provided_entries() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_db(dir.path(), "extra");

        let entries: Vec<PackageEntry> =
            enumerate_pacman_packages(&dir_url(dir.path()), "extra", "x86_64")?
                .collect::<Result<_>>()?;

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["foo", "libfoo.so", "foo-virtual", "bar"]);

        assert_eq!(entries[0].version.as_deref(), Some("1.2-1"));
        assert!(entries[0].url.ends_with("foo-1.2-1-x86_64.pkg.tar.zst"));

        // Provided names point back at the real package.
        assert_eq!(entries[1].source_name, "foo");
        assert_eq!(entries[1].binary_name, "foo");
        assert_eq!(entries[1].version.as_deref(), Some("1.2-1"));

        Ok(())
    }

    #[test]
    fn desc_without_name_is_malformed() {
        let dir = tempfile::tempdir().unwrap();

        let mut tarball = tar::Builder::new(Vec::new());
        let desc = "%VERSION%\n1.0\n";
        let mut header = tar::Header::new_gnu();
        header.set_size(desc.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tarball
            .append_data(&mut header, "broken-1.0/desc", desc.as_bytes())
            .unwrap();
        let tarball = tarball.into_inner().unwrap();

        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(&tarball).unwrap();
        std::fs::write(
            dir.path().join("extra.db.tar.gz"),
            encoder.finish().into_result().unwrap(),
        )
        .unwrap();

        let result = enumerate_pacman_packages(&dir_url(dir.path()), "extra", "x86_64");

        assert!(matches!(
            result,
            Err(RepoCheckError::MalformedMetadata(_, _))
        ));
    }
}
