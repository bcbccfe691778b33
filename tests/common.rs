// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use rpmrepo_publish::utils;
use rpmrepo_publish::{
    ChecksumType, DependencyFlags, FileFlags, HeaderRange, Headers, MetadataError, PackageReader,
    Signer,
};

pub const HORSE_FILENAME: &str = "horse-4.1-1.noarch.rpm";
pub const HORSE_CONTENT: &[u8] = b"hello";
pub const HORSE_PKGID: &str = "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824";
pub const HEADER_RANGE: HeaderRange = HeaderRange {
    start: 4504,
    end: 8377,
};

/// A minimal package with one file of each type.
pub fn horse_headers() -> Headers {
    let mut headers = package_headers("horse", "4.1", "1", "noarch");
    headers.summary = Some("A dummy package of horse".to_owned());
    headers.build_time = Some(1331831374);
    headers.installed_size = Some(42);
    headers.archive_size = Some(296);
    headers.license = Some("GPLv2".to_owned());
    headers
        .provides
        .push("horse", DependencyFlags::EQUAL.bits(), "4.1-1");
    headers.requires.push("bash", 0, "");

    headers.basenames = vec!["horse".into(), "horse".into(), "README".into()];
    headers.dirnames = vec![
        "/etc/".into(),
        "/usr/bin/".into(),
        "/usr/share/doc/horse/".into(),
    ];
    headers.dir_indexes = vec![0, 1, 2];
    headers.file_flags = vec![0, 0, FileFlags::DOC.bits()];
    headers.file_modes = vec![0o40755, 0o100755, 0o100644];

    headers.changelog_times = vec![1331831374];
    headers.changelog_authors = vec!["Bojack Horseman <bojack@horse.com> - 4.1-1".into()];
    headers.changelog_texts = vec!["- Initial release".into()];
    headers
}

pub fn package_headers(name: &str, version: &str, release: &str, arch: &str) -> Headers {
    Headers {
        name: name.to_owned(),
        arch: arch.to_owned(),
        version: version.to_owned(),
        release: release.to_owned(),
        ..Default::default()
    }
}

/// Serves headers by the file name of the package being read.
#[derive(Default)]
pub struct FakeReader {
    headers: HashMap<String, Headers>,
}

impl FakeReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, filename: &str, headers: Headers) -> Self {
        self.headers.insert(filename.to_owned(), headers);
        self
    }
}

impl PackageReader for FakeReader {
    fn read_headers(&self, path: &Path) -> Result<(Headers, HeaderRange), MetadataError> {
        let filename = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();
        let headers = self.headers.get(filename).cloned().ok_or_else(|| {
            MetadataError::PackageReadError(path.to_owned(), "no such package".to_owned())
        })?;
        Ok((headers, HEADER_RANGE))
    }
}

/// Writes a fake signature which embeds the checksum of the signed file.
pub struct FakeSigner;

impl Signer for FakeSigner {
    fn sign_detached(&self, path: &Path, signature_path: &Path) -> Result<(), MetadataError> {
        let checksum = utils::checksum_file(path, ChecksumType::Sha256)?;
        std::fs::write(
            signature_path,
            format!(
                "-----BEGIN PGP SIGNATURE-----\n{}\n-----END PGP SIGNATURE-----\n",
                checksum.digest()
            ),
        )?;
        Ok(())
    }
}

pub struct FailingSigner;

impl Signer for FailingSigner {
    fn sign_detached(&self, path: &Path, _signature_path: &Path) -> Result<(), MetadataError> {
        Err(MetadataError::SigningError(
            path.to_owned(),
            "no secret key".to_owned(),
        ))
    }
}

pub fn write_package_file(dir: &Path, filename: &str, content: &[u8]) -> PathBuf {
    let path = dir.join(filename);
    std::fs::write(&path, content).unwrap();
    path
}
