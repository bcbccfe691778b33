// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesText, Event};

use crate::fragment::{XmlFragment, start_package_ref, tag};
use crate::metadata::{OtherXml, RpmMetadata, XML_NS_OTHER};
use crate::{MetadataError, Package, Repository};

const TAG_OTHERDATA: &str = "otherdata";
const TAG_PACKAGE: &str = "package";
const TAG_CHANGELOG: &str = "changelog";

impl RpmMetadata for OtherXml {
    fn filename() -> &'static str {
        "other.xml"
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

impl OtherXml {
    pub fn new_writer<W: Write>(writer: Writer<W>) -> OtherXmlWriter<W> {
        OtherXmlWriter { writer }
    }
}

pub struct OtherXmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> OtherXmlWriter<W> {
    pub fn write_header(&mut self, num_pkgs: usize) -> Result<(), MetadataError> {
        // <?xml version="1.0" encoding="UTF-8"?>
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        // <otherdata xmlns="http://linux.duke.edu/metadata/other" packages="200">
        let mut other_tag = tag(TAG_OTHERDATA);
        other_tag.push_attribute(("xmlns", XML_NS_OTHER));
        other_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        self.writer.write_event(Event::Start(other_tag))?;

        Ok(())
    }

    pub fn write_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        package.other_fragment().write_to(&mut self.writer)
    }

    pub fn finish(&mut self) -> Result<(), MetadataError> {
        // </otherdata>
        self.writer
            .write_event(Event::End(BytesEnd::new(TAG_OTHERDATA)))?;

        // trailing newline
        self.writer
            .write_event(Event::Text(BytesText::new("\n")))?;

        self.writer.get_mut().flush()?;

        Ok(())
    }

    pub fn into_inner(self) -> W {
        self.writer.into_inner()
    }
}

/// Build the `<package>` record of other.xml.
pub(crate) fn package_fragment(package: &Package) -> XmlFragment {
    let mut fragment = XmlFragment::new();

    // <package pkgid="6a915b6e1ad740994aa9688d70a67ff2b6b72e0ced668794aeb27b2d0f2e237b" name="fontconfig" arch="x86_64">
    //   <version epoch="0" ver="2.8.0" rel="5.fc33"/>
    start_package_ref(&mut fragment, package);

    // <changelog author="dalley &lt;dalley@redhat.com&gt; - 2.7-1" date="1251720000">- Update to 2.7</changelog>
    for changelog in package.changelogs() {
        let mut changelog_tag = tag(TAG_CHANGELOG);
        changelog_tag.push_attribute(("author", changelog.author.as_str()));
        changelog_tag.push_attribute(("date", changelog.timestamp.to_string().as_str()));
        fragment.text_element(changelog_tag, &changelog.description);
    }

    // </package>
    fragment.end(TAG_PACKAGE);

    fragment
}
