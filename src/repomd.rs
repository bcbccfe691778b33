// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use quick_xml::events::{BytesDecl, BytesEnd, BytesStart, BytesText, Event};
use quick_xml::{Reader, Writer};

use crate::metadata::{
    Checksum, RepomdData, RepomdRecord, RepomdXml, XML_NS_REPO, XML_NS_RPM,
};
use crate::MetadataError;

const TAG_REPOMD: &str = "repomd";
const TAG_REVISION: &str = "revision";
const TAG_DATA: &str = "data";
const TAG_LOCATION: &str = "location";
const TAG_CHECKSUM: &str = "checksum";
const TAG_OPEN_CHECKSUM: &str = "open-checksum";
const TAG_TIMESTAMP: &str = "timestamp";
const TAG_SIZE: &str = "size";
const TAG_OPEN_SIZE: &str = "open-size";

impl RepomdXml {
    pub fn filename() -> &'static str {
        "repomd.xml"
    }

    pub fn write_data<W: Write>(
        repomd_data: &RepomdData,
        writer: &mut Writer<W>,
    ) -> Result<(), MetadataError> {
        // <?xml version="1.0" encoding="UTF-8"?>
        writer.write_event(Event::Decl(BytesDecl::new("1.0", Some("UTF-8"), None)))?;

        // <repomd xmlns="http://linux.duke.edu/metadata/repo" xmlns:rpm="http://linux.duke.edu/metadata/rpm">
        let mut repomd_tag = BytesStart::new(TAG_REPOMD);
        repomd_tag.push_attribute(("xmlns", XML_NS_REPO));
        repomd_tag.push_attribute(("xmlns:rpm", XML_NS_RPM));
        writer.write_event(Event::Start(repomd_tag.borrow()))?;

        // <revision>1615686706</revision>
        if let Some(revision) = repomd_data.revision() {
            writer
                .create_element(TAG_REVISION)
                .write_text_content(BytesText::new(revision))?;
        }

        for record in repomd_data.records() {
            write_data_block(writer, record)?;
        }

        // </repomd>
        writer.write_event(Event::End(repomd_tag.to_end()))?;

        // trailing newline
        writer.write_event(Event::Text(BytesText::new("\n")))?;

        writer.get_mut().flush()?;

        Ok(())
    }

    pub fn read_data<R: BufRead>(reader: R) -> Result<RepomdData, MetadataError> {
        let mut reader = Reader::from_reader(reader);
        reader.config_mut().trim_text(true);

        let mut repomd = RepomdData::default();
        let mut buf = Vec::new();
        let mut text_buf = Vec::new();
        let mut found_root = false;

        loop {
            match reader.read_event_into(&mut buf)? {
                Event::Start(e) if e.name().as_ref() == TAG_REPOMD.as_bytes() => {
                    found_root = true;
                }
                Event::Start(e) if e.name().as_ref() == TAG_REVISION.as_bytes() => {
                    let revision = read_text(&mut reader, &mut text_buf)?;
                    repomd.set_revision(&revision);
                }
                Event::Start(e) if e.name().as_ref() == TAG_DATA.as_bytes() => {
                    let metadata_name = attribute_value(&e, "type")?;
                    let record = parse_data_block(&mut reader, metadata_name)?;
                    repomd.add_record(record);
                }
                Event::Eof => break,
                _ => (),
            }
            buf.clear();
            text_buf.clear();
        }

        if !found_root {
            return Err(MetadataError::MissingAttributeError("repomd"));
        }
        Ok(repomd)
    }
}

impl RepomdData {
    /// Parse an existing repomd.xml file.
    pub fn load(path: &Path) -> Result<Self, MetadataError> {
        RepomdXml::read_data(BufReader::new(File::open(path)?))
    }
}

//   <data type="primary">
//     <checksum type="sha256">1cb61ea996355add02b1426ed4c1780ea75ce0c04c5d1107c025c3fbd7d8bcae</checksum>
//     <open-checksum type="sha256">e7a9a3d1dca5d4e8f5e3e8c3b6c1ad4a6e4c5f8f3a1b2c3d4e5f6a7b8c9d0e1f</open-checksum>
//     <location href="repodata/primary.xml.gz"/>
//     <timestamp>1614969700</timestamp>
//     <size>5830</size>
//     <open-size>40366</open-size>
//   </data>
fn write_data_block<W: Write>(
    writer: &mut Writer<W>,
    record: &RepomdRecord,
) -> Result<(), MetadataError> {
    let mut data_tag = BytesStart::new(TAG_DATA);
    data_tag.push_attribute(("type", record.metadata_name.as_str()));
    writer.write_event(Event::Start(data_tag.borrow()))?;

    let (checksum_type, checksum_value) = record.checksum.to_values();
    writer
        .create_element(TAG_CHECKSUM)
        .with_attribute(("type", checksum_type))
        .write_text_content(BytesText::new(checksum_value))?;

    if let Some(open_checksum) = &record.open_checksum {
        let (checksum_type, checksum_value) = open_checksum.to_values();
        writer
            .create_element(TAG_OPEN_CHECKSUM)
            .with_attribute(("type", checksum_type))
            .write_text_content(BytesText::new(checksum_value))?;
    }

    let href = record.location_href.to_string_lossy();
    writer
        .create_element(TAG_LOCATION)
        .with_attribute(("href", &*href))
        .write_empty()?;

    writer
        .create_element(TAG_TIMESTAMP)
        .write_text_content(BytesText::new(&record.timestamp.to_string()))?;

    if let Some(size) = record.size {
        writer
            .create_element(TAG_SIZE)
            .write_text_content(BytesText::new(&size.to_string()))?;
    }

    if let Some(open_size) = record.open_size {
        writer
            .create_element(TAG_OPEN_SIZE)
            .write_text_content(BytesText::new(&open_size.to_string()))?;
    }

    writer.write_event(Event::End(BytesEnd::new(TAG_DATA)))?;

    Ok(())
}

fn parse_data_block<R: BufRead>(
    reader: &mut Reader<R>,
    metadata_name: String,
) -> Result<RepomdRecord, MetadataError> {
    let mut buf = Vec::new();
    let mut text_buf = Vec::new();

    let mut location_href = None;
    let mut timestamp = None;
    let mut checksum = None;
    let mut open_checksum = None;
    let mut size = None;
    let mut open_size = None;

    loop {
        match reader.read_event_into(&mut buf)? {
            Event::End(e) if e.name().as_ref() == TAG_DATA.as_bytes() => break,
            Event::Start(e) => match e.name().as_ref() {
                n if n == TAG_CHECKSUM.as_bytes() => {
                    let checksum_type = attribute_value(&e, "type")?;
                    let value = read_text(reader, &mut text_buf)?;
                    checksum = Some(Checksum::try_create(&checksum_type, &value)?);
                }
                n if n == TAG_OPEN_CHECKSUM.as_bytes() => {
                    let checksum_type = attribute_value(&e, "type")?;
                    let value = read_text(reader, &mut text_buf)?;
                    open_checksum = Some(Checksum::try_create(&checksum_type, &value)?);
                }
                n if n == TAG_TIMESTAMP.as_bytes() => {
                    timestamp = Some(read_text(reader, &mut text_buf)?.parse()?);
                }
                n if n == TAG_SIZE.as_bytes() => {
                    size = Some(read_text(reader, &mut text_buf)?.parse()?);
                }
                n if n == TAG_OPEN_SIZE.as_bytes() => {
                    open_size = Some(read_text(reader, &mut text_buf)?.parse()?);
                }
                _ => (),
            },
            Event::Empty(e) if e.name().as_ref() == TAG_LOCATION.as_bytes() => {
                location_href = Some(PathBuf::from(attribute_value(&e, "href")?));
            }
            Event::Eof => return Err(MetadataError::MissingAttributeError("data")),
            _ => (),
        }
        buf.clear();
        text_buf.clear();
    }

    Ok(RepomdRecord {
        metadata_name,
        location_href: location_href.ok_or(MetadataError::MissingAttributeError("location"))?,
        timestamp: timestamp.ok_or(MetadataError::MissingAttributeError("timestamp"))?,
        size,
        checksum: checksum.ok_or(MetadataError::MissingAttributeError("checksum"))?,
        open_size,
        open_checksum,
    })
}

fn attribute_value(tag: &BytesStart, name: &'static str) -> Result<String, MetadataError> {
    let attr = tag
        .try_get_attribute(name)?
        .ok_or(MetadataError::MissingAttributeError(name))?;
    Ok(std::str::from_utf8(&attr.value)?.to_owned())
}

/// Collect the text content up to the closing tag of the element just opened.
fn read_text<R: BufRead>(
    reader: &mut Reader<R>,
    buf: &mut Vec<u8>,
) -> Result<String, MetadataError> {
    let mut text = String::new();
    loop {
        match reader.read_event_into(buf)? {
            Event::Text(t) => text.push_str(std::str::from_utf8(&t)?),
            Event::End(_) => break,
            Event::Eof => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::UnexpectedEof,
                    "unterminated element in repomd.xml",
                )
                .into());
            }
            _ => (),
        }
        buf.clear();
    }
    Ok(text)
}
