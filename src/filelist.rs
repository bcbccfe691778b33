// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesDecl, BytesEnd, BytesText, Event};

use crate::fragment::{XmlFragment, start_package_ref, tag};
use crate::metadata::{FilelistsXml, PackageFile, RpmMetadata, XML_NS_FILELISTS};
use crate::{MetadataError, Package, Repository};

const TAG_FILELISTS: &str = "filelists";
const TAG_PACKAGE: &str = "package";
const TAG_FILE: &str = "file";

impl RpmMetadata for FilelistsXml {
    fn filename() -> &'static str {
        "filelists.xml"
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

impl FilelistsXml {
    pub fn new_writer<W: Write>(writer: Writer<W>) -> FilelistsXmlWriter<W> {
        FilelistsXmlWriter { writer }
    }
}

pub struct FilelistsXmlWriter<W: Write> {
    writer: Writer<W>,
}

impl<W: Write> FilelistsXmlWriter<W> {
    pub fn write_header(&mut self, num_pkgs: usize) -> Result<(), MetadataError> {
        // <?xml version="1.0" encoding="UTF-8"?>
        self.writer
            .write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        // <filelists xmlns="http://linux.duke.edu/metadata/filelists" packages="210">
        let mut filelists_tag = tag(TAG_FILELISTS);
        filelists_tag.push_attribute(("xmlns", XML_NS_FILELISTS));
        filelists_tag.push_attribute(("packages", num_pkgs.to_string().as_str()));
        self.writer.write_event(Event::Start(filelists_tag))?;

        Ok(())
    }

    pub fn write_package(&mut self, package: &Package) -> Result<(), MetadataError> {
        package.filelist_fragment().write_to(&mut self.writer)
    }

    pub fn finish(&mut self) -> Result<(), MetadataError> {
        // </filelists>
        self.writer
            .write_event(Event::End(BytesEnd::new(TAG_FILELISTS)))?;

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

/// Build the `<package>` record of filelists.xml.
pub(crate) fn package_fragment(package: &Package) -> XmlFragment {
    let mut fragment = XmlFragment::new();

    // <package pkgid="a2d3bce512f79b0bc840ff7d5a9a36e5e9e0ab9f4d0a0ef5a9c8d7f9bd24a8b1" name="fontconfig" arch="x86_64">
    //   <version epoch="0" ver="2.8.0" rel="5.fc33"/>
    start_package_ref(&mut fragment, package);

    for file in package.files() {
        push_file(&mut fragment, file);
    }

    // </package>
    fragment.end(TAG_PACKAGE);

    fragment
}

/// `<file type="dir">/etc/fonts/conf.avail</file>`, plain files carry no type.
pub(crate) fn push_file(fragment: &mut XmlFragment, file: &PackageFile) {
    let mut file_tag = tag(TAG_FILE);
    if let Some(filetype) = file.filetype().to_values() {
        file_tag.push_attribute(("type", filetype));
    }
    fragment.text_element(file_tag, &file.path());
}
