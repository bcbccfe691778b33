// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use pretty_assertions::assert_eq;
use rpmrepo_publish::{DependencyFlags, EVR, FileType, MetadataError, Package, RequirementType};
use tempdir::TempDir;

mod common;
use common::*;

fn load_horse(tmp: &TempDir) -> Package {
    let path = write_package_file(tmp.path(), HORSE_FILENAME, HORSE_CONTENT);
    let reader = FakeReader::new().with(HORSE_FILENAME, horse_headers());
    Package::load(&path, HORSE_FILENAME, &reader).unwrap()
}

#[test]
fn test_package_identity() {
    let tmp = TempDir::new("test_package_identity").unwrap();
    let package = load_horse(&tmp);

    assert_eq!(package.name(), "horse");
    assert_eq!(package.arch(), "noarch");
    assert_eq!(package.evr(), &EVR::parse("0:4.1-1").unwrap());
    assert_eq!(package.pkgid(), HORSE_PKGID);
    assert_eq!(package.nvra(), "horse-4.1-1.noarch");
    assert_eq!(package.nevra(), "horse-0:4.1-1.noarch");
    assert_eq!(package.filename(), HORSE_FILENAME);
    assert_eq!(package.source().size, HORSE_CONTENT.len() as u64);
    assert_eq!(package.header_range(), HEADER_RANGE);

    let types: Vec<FileType> = package.files().iter().map(|f| f.filetype()).collect();
    assert_eq!(types, vec![FileType::Dir, FileType::File, FileType::File]);

    let provides = &package.provides()[0];
    assert_eq!(provides.comparison(), Some(RequirementType::EQ));
    assert_eq!(provides.evr.to_string(), "4.1-1");
}

#[test]
fn test_package_epoch() {
    let tmp = TempDir::new("test_package_epoch").unwrap();
    let path = write_package_file(tmp.path(), "apple.rpm", b"apple");
    let mut headers = package_headers("apple", "0.1", "1.fc40", "x86_64");
    headers.epoch = Some(2);
    let reader = FakeReader::new().with("apple.rpm", headers);

    let package = Package::load(&path, "apple-0.1-1.fc40.x86_64.rpm", &reader).unwrap();
    assert_eq!(package.evr().to_string(), "2:0.1-1.fc40");
    assert_eq!(package.filename(), "apple-0.1-1.fc40.x86_64.rpm");
}

#[test]
fn test_package_missing_name() {
    let tmp = TempDir::new("test_package_missing_name").unwrap();
    let path = write_package_file(tmp.path(), "nameless.rpm", b"nameless");
    let reader = FakeReader::new().with("nameless.rpm", package_headers("", "1.0", "1", "noarch"));

    let result = Package::load(&path, "nameless.rpm", &reader);
    assert!(matches!(result, Err(MetadataError::MissingFieldError("name"))));
}

#[test]
fn test_package_unreadable() {
    let tmp = TempDir::new("test_package_unreadable").unwrap();
    let path = write_package_file(tmp.path(), "unknown.rpm", b"unknown");

    let result = Package::load(&path, "unknown.rpm", &FakeReader::new());
    assert!(matches!(result, Err(MetadataError::PackageReadError(..))));
}

#[test]
fn test_requires_filtering() {
    let tmp = TempDir::new("test_requires_filtering").unwrap();
    let path = write_package_file(tmp.path(), "tool.rpm", b"tool");

    let mut headers = package_headers("tool", "1.0", "1", "x86_64");
    for name in [
        "A",
        "A",
        "rpmlib(X)",
        "/usr/bin/tool",
        "libc.so.6(GLIBC_2.3.4)",
        "libc.so.6(GLIBC_2.4)",
    ] {
        headers.requires.push(name, 0, "");
    }
    headers.provides.push("A", 0, "");
    headers.basenames = vec!["tool".into()];
    headers.dirnames = vec!["/usr/bin/".into()];
    headers.dir_indexes = vec![0];
    let reader = FakeReader::new().with("tool.rpm", headers);

    let package = Package::load(&path, "tool.rpm", &reader).unwrap();
    let requires: Vec<&str> = package.requires().iter().map(|r| r.name.as_str()).collect();
    assert_eq!(requires, vec!["libc.so.6(GLIBC_2.4)"]);

    // the other relations are published as they are
    assert_eq!(package.provides().len(), 1);
}

#[test]
fn test_requires_pre_and_versions() {
    let tmp = TempDir::new("test_requires_pre").unwrap();
    let path = write_package_file(tmp.path(), "pre.rpm", b"pre");

    let mut headers = package_headers("pre", "1.0", "1", "x86_64");
    headers.requires.push(
        "/bin/sh",
        (DependencyFlags::SCRIPT_PRE | DependencyFlags::SCRIPT_POST).bits(),
        "",
    );
    headers
        .requires
        .push("glibc", DependencyFlags::GE.bits(), "2.28");
    let reader = FakeReader::new().with("pre.rpm", headers);

    let package = Package::load(&path, "pre.rpm", &reader).unwrap();
    let xml = package.primary_fragment().to_xml_string().unwrap();
    assert!(xml.contains(r#"<rpm:entry name="/bin/sh" pre="1"/>"#));
    assert!(xml.contains(r#"<rpm:entry name="glibc" flags="GE" epoch="0" ver="2.28"/>"#));
}

#[test]
fn test_primary_fragment() {
    let tmp = TempDir::new("test_primary_fragment").unwrap();
    let package = load_horse(&tmp);

    let expected = format!(
        r#"<package type="rpm">
  <name>horse</name>
  <arch>noarch</arch>
  <version epoch="0" ver="4.1" rel="1"/>
  <checksum type="sha256" pkgid="YES">{HORSE_PKGID}</checksum>
  <summary>A dummy package of horse</summary>
  <description></description>
  <packager></packager>
  <url></url>
  <time file="{}" build="1331831374"/>
  <size package="5" installed="42" archive="296"/>
  <location href="horse-4.1-1.noarch.rpm"/>
  <format>
    <rpm:license>GPLv2</rpm:license>
    <rpm:header-range start="4504" end="8377"/>
    <rpm:provides>
      <rpm:entry name="horse" flags="EQ" epoch="0" ver="4.1" rel="1"/>
    </rpm:provides>
    <rpm:requires>
      <rpm:entry name="bash"/>
    </rpm:requires>
    <file type="dir">/etc/horse</file>
    <file>/usr/bin/horse</file>
  </format>
</package>"#,
        package.source().mtime
    );
    assert_eq!(package.primary_fragment().to_xml_string().unwrap(), expected);
}

#[test]
fn test_filelist_fragment() {
    let tmp = TempDir::new("test_filelist_fragment").unwrap();
    let package = load_horse(&tmp);

    let expected = format!(
        r#"<package pkgid="{HORSE_PKGID}" name="horse" arch="noarch">
  <version epoch="0" ver="4.1" rel="1"/>
  <file type="dir">/etc/horse</file>
  <file>/usr/bin/horse</file>
  <file>/usr/share/doc/horse/README</file>
</package>"#
    );
    assert_eq!(package.filelist_fragment().to_xml_string().unwrap(), expected);
}

#[test]
fn test_other_fragment() {
    let tmp = TempDir::new("test_other_fragment").unwrap();
    let package = load_horse(&tmp);

    let expected = format!(
        r#"<package pkgid="{HORSE_PKGID}" name="horse" arch="noarch">
  <version epoch="0" ver="4.1" rel="1"/>
  <changelog author="Bojack Horseman &lt;bojack@horse.com&gt; - 4.1-1" date="1331831374">- Initial release</changelog>
</package>"#
    );
    assert_eq!(package.other_fragment().to_xml_string().unwrap(), expected);
}

#[test]
fn test_ghost_files() {
    let tmp = TempDir::new("test_ghost_files").unwrap();
    let path = write_package_file(tmp.path(), "ghost.rpm", b"ghost");

    let mut headers = package_headers("ghost", "1.0", "1", "x86_64");
    headers.basenames = vec!["ghost.pid".into()];
    headers.dirnames = vec!["/run/".into()];
    headers.dir_indexes = vec![0];
    headers.file_flags = vec![rpmrepo_publish::FileFlags::GHOST.bits()];
    headers.file_modes = vec![0o100644];
    let reader = FakeReader::new().with("ghost.rpm", headers);

    let package = Package::load(&path, "ghost.rpm", &reader).unwrap();
    let xml = package.filelist_fragment().to_xml_string().unwrap();
    assert!(xml.contains(r#"<file type="ghost">/run/ghost.pid</file>"#));
    // not a primary path
    assert!(
        !package
            .primary_fragment()
            .to_xml_string()
            .unwrap()
            .contains("ghost.pid")
    );
}
