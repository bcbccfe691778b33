// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesText, Event};

use crate::filelist::push_file;
use crate::fragment::{XmlFragment, tag, version_tag};
use crate::metadata::{PrimaryXml, Requirement, RpmMetadata, XML_NS_COMMON, XML_NS_RPM};
use crate::{MetadataError, Package, Repository};

const TAG_METADATA: &str = "metadata";
const TAG_PACKAGE: &str = "package";
const TAG_NAME: &str = "name";
const TAG_ARCH: &str = "arch";
const TAG_CHECKSUM: &str = "checksum";
const TAG_SUMMARY: &str = "summary";
const TAG_DESCRIPTION: &str = "description";
const TAG_PACKAGER: &str = "packager";
const TAG_URL: &str = "url";
const TAG_TIME: &str = "time";
const TAG_SIZE: &str = "size";
const TAG_LOCATION: &str = "location";
const TAG_FORMAT: &str = "format";

const TAG_RPM_LICENSE: &str = "rpm:license";
const TAG_RPM_VENDOR: &str = "rpm:vendor";
const TAG_RPM_GROUP: &str = "rpm:group";
const TAG_RPM_BUILDHOST: &str = "rpm:buildhost";
const TAG_RPM_SOURCERPM: &str = "rpm:sourcerpm";
const TAG_RPM_HEADER_RANGE: &str = "rpm:header-range";

const TAG_RPM_ENTRY: &str = "rpm:entry";
const TAG_RPM_PROVIDES: &str = "rpm:provides";
const TAG_RPM_REQUIRES: &str = "rpm:requires";
const TAG_RPM_CONFLICTS: &str = "rpm:conflicts";
const TAG_RPM_OBSOLETES: &str = "rpm:obsoletes";
const TAG_RPM_SUGGESTS: &str = "rpm:suggests";
const TAG_RPM_ENHANCES: &str = "rpm:enhances";
const TAG_RPM_SUPPLEMENTS: &str = "rpm:supplements";
const TAG_RPM_RECOMMENDS: &str = "rpm:recommends";

impl RpmMetadata for PrimaryXml {
    fn filename() -> &'static str {
        "primary.xml"
    }

    fn write_metadata<W: Write>(
        repository: &Repository,
        writer: Writer<W>,
    ) -> Result<(), MetadataError> {
        let mut writer = Self::new_writer(writer);
        writer.write_header(repository.len())?;
        for package in repository.packages() {
            writer.write_package(package)?;
        }
        writer.finish()
    }
}

impl PrimaryXml {
    pub fn new_writer<W: Write>(writer: Writer<W>) -> PrimaryXmlWriter<W> {
        PrimaryXmlWriter { writer }
    }
}

pub struct PrimaryXmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> PrimaryXmlWriter<W> {
    pub fn write_header(&mut self, num_pkgs: usize) -> Result<(), MetadataError> {
        // <?xml version="1.0" encoding="UTF-8"?>
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        // <metadata xmlns="http://linux.duke.edu/metadata/common" xmlns:rpm="http://linux.duke.edu/metadata/rpm" packages="200">
        let mut metadata_tag = tag(TAG_METADATA);
        metadata_tag.push_attribute(("xmlns", XML_NS_COMMON));
        metadata_tag.push_attribute(("xmlns:rpm", XML_NS_RPM));
        metadata_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        self.writer.write_event(Event::Start(metadata_tag))?;

        Ok(())
    }

    pub fn write_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        package.primary_fragment().write_to(&mut self.writer)
    }

    pub fn finish(&mut self) -> Result<(), MetadataError> {
        // </metadata>
        self.writer
            .write_event(Event::End(BytesEnd::new(TAG_METADATA)))?;

        // trailing newline
        self.writer
            .write_event(Event::Text(BytesText::new("\n")))?;

        // write everything out to disk - otherwise it won't happen until drop() which impedes debugging
        self.writer.get_mut().flush()?;

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Build the `<package>` record of primary.xml.
pub(crate) fn package_fragment(package: &Package) -> XmlFragment {
    let headers = package.headers();
    let mut fragment = XmlFragment::new();

    // <package type="rpm">
    let mut package_tag = tag(TAG_PACKAGE);
    package_tag.push_attribute(("type", "rpm"));
    fragment.start(package_tag);

    // <name>horse</name>
    fragment.text_element(tag(TAG_NAME), package.name());

    // <arch>noarch</arch>
    fragment.text_element(tag(TAG_ARCH), package.arch());

    // <version epoch="0" ver="4.1" rel="1"/>
    fragment.empty(version_tag(package.evr()));

    // <checksum type="sha256" pkgid="YES">6d0fd7f08cc63677a0b2ba6ab6be1fd3d1f8a9fc3b6a14d3f4b43b19a9a6f6e5</checksum>
    let mut checksum_tag = tag(TAG_CHECKSUM);
    checksum_tag.push_attribute(("type", "sha256"));
    checksum_tag.push_attribute(("pkgid", "YES"));
    fragment.text_element(checksum_tag, package.pkgid());

    // <summary>A dummy package of horse</summary>
    // <description>A dummy package of horse</description>
    // <packager>Bojack Horseman</packager>
    // <url>http://tiny.cc/justin_bieber</url>
    let or_empty = |value: &Option<String>| value.clone().unwrap_or_default();
    fragment.text_element(tag(TAG_SUMMARY), &or_empty(&headers.summary));
    fragment.text_element(tag(TAG_DESCRIPTION), &or_empty(&headers.description));
    fragment.text_element(tag(TAG_PACKAGER), &or_empty(&headers.packager));
    fragment.text_element(tag(TAG_URL), &or_empty(&headers.url));

    // <time file="1615451135" build="1331831374"/>
    let mut time_tag = tag(TAG_TIME);
    time_tag.push_attribute(("file", package.source().mtime.to_string().as_str()));
    if let Some(build_time) = headers.build_time {
        time_tag.push_attribute(("build", build_time.to_string().as_str()));
    }
    fragment.empty(time_tag);

    // <size package="1846" installed="42" archive="296"/>
    let mut size_tag = tag(TAG_SIZE);
    size_tag.push_attribute(("package", package.source().size.to_string().as_str()));
    size_tag.push_attribute((
        "installed",
        headers.installed_size.unwrap_or(0).to_string().as_str(),
    ));
    size_tag.push_attribute((
        "archive",
        headers.archive_size.unwrap_or(0).to_string().as_str(),
    ));
    fragment.empty(size_tag);

    // <location href="horse-4.1-1.noarch.rpm"/>
    let mut location_tag = tag(TAG_LOCATION);
    location_tag.push_attribute(("href", package.filename()));
    fragment.empty(location_tag);

    // <format>
    fragment.start(tag(TAG_FORMAT));

    for (name, value) in [
        (TAG_RPM_LICENSE, &headers.license),
        (TAG_RPM_VENDOR, &headers.vendor),
        (TAG_RPM_GROUP, &headers.group),
        (TAG_RPM_BUILDHOST, &headers.build_host),
        (TAG_RPM_SOURCERPM, &headers.source_rpm),
    ] {
        if let Some(value) = value {
            fragment.text_element(tag(name), value);
        }
    }

    // <rpm:header-range start="280" end="1697"/>
    let header_range = package.header_range();
    let mut header_range_tag = tag(TAG_RPM_HEADER_RANGE);
    header_range_tag.push_attribute(("start", header_range.start.to_string().as_str()));
    header_range_tag.push_attribute(("end", header_range.end.to_string().as_str()));
    fragment.empty(header_range_tag);

    push_requirement_section(&mut fragment, TAG_RPM_PROVIDES, package.provides());
    push_requirement_section(&mut fragment, TAG_RPM_REQUIRES, package.requires());
    push_requirement_section(&mut fragment, TAG_RPM_CONFLICTS, package.conflicts());
    push_requirement_section(&mut fragment, TAG_RPM_OBSOLETES, package.obsoletes());
    push_requirement_section(&mut fragment, TAG_RPM_SUGGESTS, package.suggests());
    push_requirement_section(&mut fragment, TAG_RPM_ENHANCES, package.enhances());
    push_requirement_section(&mut fragment, TAG_RPM_SUPPLEMENTS, package.supplements());
    push_requirement_section(&mut fragment, TAG_RPM_RECOMMENDS, package.recommends());

    // <file>/etc/fonts/conf.avail</file>
    for file in package.files().iter().filter(|f| f.is_primary()) {
        push_file(&mut fragment, file);
    }

    // </format>
    fragment.end(TAG_FORMAT);

    // </package>
    fragment.end(TAG_PACKAGE);

    fragment
}

fn push_requirement_section(fragment: &mut XmlFragment, section: &str, entries: &[Requirement]) {
    if entries.is_empty() {
        return;
    }

    // <rpm:provides>
    fragment.start(tag(section));

    // <rpm:entry name="horse" flags="EQ" epoch="0" ver="4.1" rel="1"/>
    for entry in entries {
        let mut entry_tag = tag(TAG_RPM_ENTRY);
        entry_tag.push_attribute(("name", entry.name.as_str()));

        if let Some(comparison) = entry.comparison() {
            let (epoch, version, release) = entry.evr.values();
            entry_tag.push_attribute(("flags", comparison.as_str()));
            entry_tag.push_attribute(("epoch", epoch));
            entry_tag.push_attribute(("ver", version));
            if let Some(release) = release {
                entry_tag.push_attribute(("rel", release));
            }
        }

        if entry.is_prerequisite() {
            entry_tag.push_attribute(("pre", "1"));
        }

        fragment.empty(entry_tag);
    }

    // </rpm:provides>
    fragment.end(section);
}
