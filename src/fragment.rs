// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;

use quick_xml::Writer;
use quick_xml::events::{BytesEnd, BytesStart, BytesText, Event};

use crate::{EVR, MetadataError, Package};

/// A pre-rendered metadata record.
///
/// Packages build one fragment per document when they are constructed. Writing a document is then
/// just a matter of replaying each package's events into a shared [`Writer`], which takes care of
/// indentation relative to the enclosing root element.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct XmlFragment {
    events: Vec<Event<'static>>,
}

impl XmlFragment {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, tag: BytesStart<'static>) -> &mut Self {
        self.events.push(Event::Start(tag));
        self
    }

    pub fn end(&mut self, name: &str) -> &mut Self {
        self.events
            .push(Event::End(BytesEnd::new(name.to_owned())));
        self
    }

    pub fn empty(&mut self, tag: BytesStart<'static>) -> &mut Self {
        self.events.push(Event::Empty(tag));
        self
    }

    /// `<name attrs...>text</name>`, the text is escaped.
    pub fn text_element(&mut self, tag: BytesStart<'static>, text: &str) -> &mut Self {
        let end = tag.to_end().into_owned();
        self.events.push(Event::Start(tag));
        self.events
            .push(Event::Text(BytesText::new(text).into_owned()));
        self.events.push(Event::End(end));
        self
    }

    pub fn write_to<W: Write>(&self, writer: &mut Writer<W>) -> Result<(), MetadataError> {
        for event in &self.events {
            writer.write_event(event.borrow())?;
        }
        Ok(())
    }

    /// Render the fragment on its own, mostly useful for inspection and tests.
    pub fn to_xml_string(&self) -> Result<String, MetadataError> {
        let mut writer = Writer::new_with_indent(Vec::new(), b' ', 2);
        self.write_to(&mut writer)?;
        Ok(String::from_utf8(writer.into_inner()).map_err(|e| e.utf8_error())?)
    }
}

/// Shorthand for an owned start tag.
pub(crate) fn tag(name: &str) -> BytesStart<'static> {
    BytesStart::new(name.to_owned())
}

/// `<version epoch="0" ver="1.0" rel="1"/>`
pub(crate) fn version_tag(evr: &EVR) -> BytesStart<'static> {
    let (epoch, version, release) = evr.values();
    let mut version_tag = tag("version");
    version_tag.push_attribute(("epoch", epoch));
    version_tag.push_attribute(("ver", version));
    if let Some(release) = release {
        version_tag.push_attribute(("rel", release));
    }
    version_tag
}

/// `<package pkgid="..." name="..." arch="...">` followed by the version, shared by the
/// filelists and other records.
pub(crate) fn start_package_ref(fragment: &mut XmlFragment, package: &Package) {
    let mut package_tag = tag("package");
    package_tag.push_attribute(("pkgid", package.pkgid()));
    package_tag.push_attribute(("name", package.name()));
    package_tag.push_attribute(("arch", package.arch()));
    fragment.start(package_tag).empty(version_tag(package.evr()));
}
