// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

/*! Alpine package repository enumeration.

An Alpine repository publishes `<arch>/APKINDEX.tar.gz`: a gzip
compressed tar archive whose `APKINDEX` member is a series of
blank-line-delimited blocks of single-letter `K:value` fields, one block
per package.
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
        io::{BufRead, BufReader, Read},
    },
};

/// Replace Alpine-specific tokens in a repository base URL.
pub fn replace_tokens(url: &str, os_code_name: &str) -> String {
    url.replace("$releasever", os_code_name)
}

fn apkindex_reader(url: &str) -> Result<Box<dyn Read>> {
    // The index itself is a .tar.gz; the fetch layer already stripped the
    // gzip layer based on the URL suffix.
    let mut archive = tar::Archive::new(open_compressed_url(url)?);

    let entries = archive
        .entries()
        .map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;

    for entry in entries {
        let entry = entry.map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;

        let is_index = entry
            .path()
            .map(|path| path.as_ref() == std::path::Path::new("APKINDEX"))
            .unwrap_or(false);

        if is_index {
            let mut data = Vec::new();
            let mut entry = entry;
            entry
                .read_to_end(&mut data)
                .map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;

            return Ok(Box::new(std::io::Cursor::new(data)));
        }
    }

    Err(RepoCheckError::MalformedMetadata(
        url.to_string(),
        "archive has no APKINDEX member".to_string(),
    ))
}

fn parse_blocks(reader: impl BufRead, url: &str) -> Result<Vec<HashMap<String, String>>> {
    let mut blocks = Vec::new();
    let mut block = HashMap::new();

    for line in reader.lines() {
        let line = line.map_err(|e| RepoCheckError::IoPath(url.to_string(), e))?;

        if line.trim().is_empty() {
            if !block.is_empty() {
                blocks.push(std::mem::take(&mut block));
            }

            continue;
        }

        let (key, value) = line.split_once(':').ok_or_else(|| {
            RepoCheckError::MalformedMetadata(
                url.to_string(),
                "index line without separator".to_string(),
            )
        })?;

        block.insert(key.to_string(), value.to_string());
    }

    if !block.is_empty() {
        blocks.push(block);
    }

    Ok(blocks)
}

fn required_field<'a>(
    block: &'a HashMap<String, String>,
    name: &str,
    index_url: &str,
) -> Result<&'a str> {
    block.get(name).map(String::as_str).ok_or_else(|| {
        RepoCheckError::MalformedMetadata(
            index_url.to_string(),
            format!("package block is missing the {} field", name),
        )
    })
}

fn entries_from_block(
    base_url: &str,
    index_url: &str,
    block: &HashMap<String, String>,
) -> Result<Vec<PackageEntry>> {
    let name = required_field(block, "P", index_url)?;
    let version = required_field(block, "V", index_url)?;
    let source = required_field(block, "o", index_url)?;

    let url = join_url(base_url, &format!("{}-{}.apk", name, version));

    let mut entries = vec![PackageEntry::new(
        name,
        Some(version.to_string()),
        url.clone(),
    )
    .with_source_name(source)];

    // Provides tokens look like `name`, `name=version`, or
    // `type:name=version`. Typed provides (so:, pc:, cmd:) are not plain
    // package aliases; versioned ones still report the package's own
    // version.
    if let Some(provides) = block.get("p") {
        for token in provides.split_whitespace() {
            if token.contains(':') {
                continue;
            }

            let alias = token.split_once('=').map(|(alias, _)| alias).unwrap_or(token);

            entries.push(
                PackageEntry::new(alias, Some(version.to_string()), url.clone())
                    .with_source_name(source)
                    .with_binary_name(name),
            );
        }
    }

    Ok(entries)
}

/// Enumerate packages in an Alpine repository.
pub fn enumerate_apk_packages(
    base_url: &str,
    os_code_name: &str,
    os_arch: &str,
) -> Result<PackageIter> {
    let base_url = replace_tokens(base_url, os_code_name);
    // Package URLs are relative to the repository base, not the
    // per-architecture index directory.
    let index_url = join_url(&base_url, &format!("{}/APKINDEX.tar.gz", os_arch));

    info!("reading Alpine package metadata from {}", index_url);

    let blocks = parse_blocks(BufReader::new(apkindex_reader(&index_url)?), &index_url)?;

    let mut entries = Vec::new();
    for block in &blocks {
        entries.extend(entries_from_block(&base_url, &index_url, block)?);
    }

    Ok(Box::new(entries.into_iter().map(Ok)))
}

#[cfg(test)]
mod test {
    use {super::*, indoc::indoc, std::io::Write};

    const APKINDEX: &str = indoc! {"
        C:Q1abcdef
        P:libfoo
        V:1.4-r2
        o:foo
        p:foo-compat=1.0 foo-virtual so:libfoo.so.1=1 cmd:foo=1.4-r2

        C:Q1ghijkl
        P:bar
        V:2.0-r0
        o:bar
    "};

    fn write_index(dir: &std::path::Path, arch: &str) {
        let arch_dir = dir.join(arch);
        std::fs::create_dir_all(&arch_dir).unwrap();

        let mut tarball = tar::Builder::new(Vec::new());

        let mut header = tar::Header::new_gnu();
        header.set_size(APKINDEX.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        tarball
            .append_data(&mut header, "APKINDEX", APKINDEX.as_bytes())
            .unwrap();

        let tarball = tarball.into_inner().unwrap();

        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(&tarball).unwrap();
        let payload = encoder.finish().into_result().unwrap();

        std::fs::write(arch_dir.join("APKINDEX.tar.gz"), payload).unwrap();
    }

    fn dir_url(path: &std::path::Path) -> String {
        url::Url::from_directory_path(path).unwrap().to_string()
    }

    #[test]
    fn parses_blocks_with_single_letter_fields() -> Result<()> {
        let blocks = parse_blocks(std::io::Cursor::new(APKINDEX), "test://APKINDEX")?;

        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].get("P").map(String::as_str), Some("libfoo"));
        assert_eq!(blocks[1].get("V").map(String::as_str), Some("2.0-r0"));

        Ok(())
    }

    #[test]
    fn provides_become_aliases_without_typed_tokens() -> Result<()> {
        let blocks = parse_blocks(std::io::Cursor::new(APKINDEX), "test://APKINDEX")?;
        let entries = entries_from_block("http://repo/v3.15/main/x86_64", "test://APKINDEX", &blocks[0])?;

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, ["libfoo", "foo-compat", "foo-virtual"]);

        // Aliases report the providing package's version, not the
        // version advertised by the provides token.
        assert_eq!(entries[1].version.as_deref(), Some("1.4-r2"));
        assert_eq!(entries[2].version.as_deref(), Some("1.4-r2"));

        for entry in &entries {
            assert_eq!(entry.source_name, "foo");
            assert!(entry.url.ends_with("libfoo-1.4-r2.apk"));
        }
        assert_eq!(entries[1].binary_name, "libfoo");

        Ok(())
    }

    #[test]
    fn missing_origin_is_malformed() {
        let mut block = HashMap::new();
        block.insert("P".to_string(), "foo".to_string());
        block.insert("V".to_string(), "1.0".to_string());

        let result = entries_from_block("http://repo/main", "test://APKINDEX", &block);

        assert!(matches!(
            result,
            Err(RepoCheckError::MalformedMetadata(_, _))
        ));
    }

    #[test]
    fn enumerates_from_archive() -> Result<()> {
        let dir = tempfile::tempdir().unwrap();
        write_index(dir.path(), "x86_64");

        let entries: Vec<PackageEntry> =
            enumerate_apk_packages(&dir_url(dir.path()), "v3.15", "x86_64")?
                .collect::<Result<_>>()?;

        assert_eq!(entries.len(), 4);
        assert_eq!(entries[0].name, "libfoo");
        assert_eq!(entries[3].name, "bar");

        Ok(())
    }

    #[test]
    fn archive_without_index_member_is_malformed() {
        let dir = tempfile::tempdir().unwrap();
        let arch_dir = dir.path().join("x86_64");
        std::fs::create_dir_all(&arch_dir).unwrap();

        let mut tarball = tar::Builder::new(Vec::new());
        let mut header = tar::Header::new_gnu();
        header.set_size(2);
        header.set_mode(0o644);
        header.set_cksum();
        tarball.append_data(&mut header, "OTHER", &b"hi"[..]).unwrap();
        let tarball = tarball.into_inner().unwrap();

        let mut encoder = libflate::gzip::Encoder::new(Vec::new()).unwrap();
        encoder.write_all(&tarball).unwrap();
        std::fs::write(
            arch_dir.join("APKINDEX.tar.gz"),
            encoder.finish().into_result().unwrap(),
        )
        .unwrap();

        let result = enumerate_apk_packages(&dir_url(dir.path()), "v3.15", "x86_64");

        assert!(matches!(
            result,
            Err(RepoCheckError::MalformedMetadata(_, _))
        ));
    }
}
