// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::io::Write;
use std::path::PathBuf;

use bitflags::bitflags;
use quick_xml::Writer;
use thiserror::Error;

use crate::{EVR, Repository};

pub struct RepomdXml;
pub struct PrimaryXml;
pub struct FilelistsXml;
pub struct OtherXml;

pub const METADATA_PRIMARY: &str = "primary";
pub const METADATA_FILELISTS: &str = "filelists";
pub const METADATA_OTHER: &str = "other";

#[derive(Error, Debug)]
pub enum MetadataError {
    #[cfg(feature = "read_rpm")]
    #[error(transparent)]
    RpmReadError(#[from] rpm::Error),
    #[cfg(feature = "sign_pgp")]
    #[error(transparent)]
    PgpError(#[from] pgp::errors::Error),
    #[error(transparent)]
    XmlParseError(#[from] quick_xml::Error),
    #[error(transparent)]
    XmlAttributeError(#[from] quick_xml::events::attributes::AttrError),
    #[error(transparent)]
    Utf8Error(#[from] std::str::Utf8Error),
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error(transparent)]
    IntFieldParseError(#[from] std::num::ParseIntError),
    #[error(transparent)]
    UnsupportedCompressionTypeError(#[from] niffler::Error),
    #[error("Compression type {0} is not supported")]
    UnknownCompressionTypeError(String),
    #[error("Checksum type {0} is not supported")]
    UnsupportedChecksumTypeError(String),
    #[error("\"{0}\" is not a valid checksum of type \"{1:?}\"")]
    InvalidChecksumError(String, ChecksumType),
    #[error("\"{0}\" is not a valid EVR string: {1}")]
    InvalidEvrError(String, String),
    #[error("Package header is inconsistent: {0}")]
    InvalidHeaderError(String),
    #[error("Missing package header field: {0}")]
    MissingFieldError(&'static str),
    #[error("Missing metadata attribute: {0}")]
    MissingAttributeError(&'static str),
    #[error("Failed to read package {0}: {1}")]
    PackageReadError(PathBuf, String),
    #[error("A package with id {0} is already present in the repository")]
    DuplicatePackageIdError(String),
    #[error("Package {0} is already present in the repository")]
    DuplicatePackageError(String),
    #[error("A package file named {0} is already present in the repository")]
    DuplicateFilenameError(String),
    #[error("Failed to sign {0}: {1}")]
    SigningError(PathBuf, String),
    #[error("Invalid signing key parameters: {0}")]
    SigningKeyError(String),
}

/// Default namespace for primary.xml
pub const XML_NS_COMMON: &str = "http://linux.duke.edu/metadata/common";
/// Default namespace for filelists.xml
pub const XML_NS_FILELISTS: &str = "http://linux.duke.edu/metadata/filelists";
/// Default namespace for other.xml
pub const XML_NS_OTHER: &str = "http://linux.duke.edu/metadata/other";
/// Default namespace for repomd.xml
pub const XML_NS_REPO: &str = "http://linux.duke.edu/metadata/repo";
/// Namespace for rpm (used in primary.xml and repomd.xml)
pub const XML_NS_RPM: &str = "http://linux.duke.edu/metadata/rpm";

/// A metadata document which can be rendered from a whole [`Repository`].
pub trait RpmMetadata {
    fn filename() -> &'static str;

    fn write_metadata<W: Write>(
        repository: &Repository,
        writer: Writer<W>,
    ) -> Result<(), MetadataError>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CompressionType {
    Gzip,
    Xz,
    Bz2,
    Zstd,
}

impl CompressionType {
    pub fn to_file_extension(&self) -> &str {
        match self {
            CompressionType::Gzip => ".gz",
            CompressionType::Xz => ".xz",
            CompressionType::Bz2 => ".bz2",
            CompressionType::Zstd => ".zst",
        }
    }
}

impl TryFrom<&str> for CompressionType {
    type Error = MetadataError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "gzip" | "gz" => Ok(CompressionType::Gzip),
            "bz2" => Ok(CompressionType::Bz2),
            "xz" => Ok(CompressionType::Xz),
            "zstd" | "zst" => Ok(CompressionType::Zstd),
            _ => Err(MetadataError::UnknownCompressionTypeError(value.to_owned())),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub enum ChecksumType {
    Md5,
    Sha1,
    Sha224,
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl ChecksumType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChecksumType::Md5 => "md5",
            ChecksumType::Sha1 => "sha1",
            ChecksumType::Sha224 => "sha224",
            ChecksumType::Sha256 => "sha256",
            ChecksumType::Sha384 => "sha384",
            ChecksumType::Sha512 => "sha512",
        }
    }

    /// Length of the hex encoded digest.
    fn hex_len(&self) -> usize {
        match self {
            ChecksumType::Md5 => 32,
            ChecksumType::Sha1 => 40,
            ChecksumType::Sha224 => 56,
            ChecksumType::Sha256 => 64,
            ChecksumType::Sha384 => 96,
            ChecksumType::Sha512 => 128,
        }
    }
}

impl TryFrom<&str> for ChecksumType {
    type Error = MetadataError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "md5" => Ok(ChecksumType::Md5),
            "sha" | "sha1" => Ok(ChecksumType::Sha1),
            "sha224" => Ok(ChecksumType::Sha224),
            "sha256" => Ok(ChecksumType::Sha256),
            "sha384" => Ok(ChecksumType::Sha384),
            "sha512" => Ok(ChecksumType::Sha512),
            _ => Err(MetadataError::UnsupportedChecksumTypeError(value.to_owned())),
        }
    }
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub enum Checksum {
    Md5(String),
    Sha1(String),
    Sha224(String),
    Sha256(String),
    Sha384(String),
    Sha512(String),
}

impl Checksum {
    pub fn new(checksum_type: ChecksumType, digest: String) -> Self {
        match checksum_type {
            ChecksumType::Md5 => Checksum::Md5(digest),
            ChecksumType::Sha1 => Checksum::Sha1(digest),
            ChecksumType::Sha224 => Checksum::Sha224(digest),
            ChecksumType::Sha256 => Checksum::Sha256(digest),
            ChecksumType::Sha384 => Checksum::Sha384(digest),
            ChecksumType::Sha512 => Checksum::Sha512(digest),
        }
    }

    /// Create a checksum from the values found in metadata, validating the digest length.
    pub fn try_create(checksum_type: &str, digest: &str) -> Result<Self, MetadataError> {
        let checksum_type = ChecksumType::try_from(checksum_type)?;
        if digest.len() != checksum_type.hex_len()
            || !digest.bytes().all(|c| c.is_ascii_hexdigit())
        {
            return Err(MetadataError::InvalidChecksumError(
                digest.to_owned(),
                checksum_type,
            ));
        }
        Ok(Checksum::new(checksum_type, digest.to_owned()))
    }

    pub fn checksum_type(&self) -> ChecksumType {
        match self {
            Checksum::Md5(_) => ChecksumType::Md5,
            Checksum::Sha1(_) => ChecksumType::Sha1,
            Checksum::Sha224(_) => ChecksumType::Sha224,
            Checksum::Sha256(_) => ChecksumType::Sha256,
            Checksum::Sha384(_) => ChecksumType::Sha384,
            Checksum::Sha512(_) => ChecksumType::Sha512,
        }
    }

    pub fn digest(&self) -> &str {
        match self {
            Checksum::Md5(c)
            | Checksum::Sha1(c)
            | Checksum::Sha224(c)
            | Checksum::Sha256(c)
            | Checksum::Sha384(c)
            | Checksum::Sha512(c) => c,
        }
    }

    pub fn to_values(&self) -> (&'static str, &str) {
        (self.checksum_type().as_str(), self.digest())
    }
}

bitflags! {
    /// Dependency sense flags (`RPMSENSE_*`) as stored in the package header.
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
    pub struct DependencyFlags: u32 {
        const ANY = 0;
        const LESS = 1 << 1;
        const GREATER = 1 << 2;
        const EQUAL = 1 << 3;

        const LE = Self::LESS.bits() | Self::EQUAL.bits();
        const GE = Self::GREATER.bits() | Self::EQUAL.bits();

        const PROVIDES = 1 << 4;
        const POSTTRANS = 1 << 5;
        const PREREQ = 1 << 6;
        const PRETRANS = 1 << 7;
        const INTERP = 1 << 8;
        const SCRIPT_PRE = 1 << 9;
        const SCRIPT_POST = 1 << 10;
        const SCRIPT_PREUN = 1 << 11;
        const SCRIPT_POSTUN = 1 << 12;
        const SCRIPT_VERIFY = 1 << 13;
        const FIND_REQUIRES = 1 << 14;
        const FIND_PROVIDES = 1 << 15;
        const TRIGGERIN = 1 << 16;
        const TRIGGERUN = 1 << 17;
        const TRIGGERPOSTUN = 1 << 18;
        const MISSINGOK = 1 << 19;
        const RPMLIB = 1 << 24;
        const TRIGGERPREIN = 1 << 25;
        const KEYRING = 1 << 26;
        const CONFIG = 1 << 28;

        /// Any of these makes the dependency a prerequisite (`pre="1"`)
        const PREREQUISITE = Self::PREREQ.bits()
            | Self::SCRIPT_PRE.bits()
            | Self::POSTTRANS.bits()
            | Self::PRETRANS.bits()
            | Self::SCRIPT_POST.bits();
    }
}

bitflags! {
    /// Per-file flags (`RPMFILE_*`) as stored in the package header.
    #[derive(Copy, Clone, Debug, Default, Eq, Hash, PartialEq)]
    pub struct FileFlags: u32 {
        const CONFIG = 1;  // %%config
        const DOC = 1 << 1;  // %%doc
        const ICON = 1 << 2;  // %%donotuse
        const MISSINGOK = 1 << 3;  // %%config(missingok)
        const NOREPLACE = 1 << 4;  // %%config(noreplace)
        const SPECFILE = 1 << 5;
        const GHOST = 1 << 6;  // %%ghost
        const LICENSE = 1 << 7;  // %%license
        const README = 1 << 8;  // %%readme
        // bits 9-10 unused
        const PUBKEY = 1 << 11;  // %%pubkey
        const ARTIFACT = 1 << 12;  // %%artifact
    }
}

#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub enum RequirementType {
    LT,
    GT,
    EQ,
    LE,
    GE,
}

impl RequirementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequirementType::LT => "LT",
            RequirementType::GT => "GT",
            RequirementType::EQ => "EQ",
            RequirementType::LE => "LE",
            RequirementType::GE => "GE",
        }
    }
}

impl TryFrom<DependencyFlags> for RequirementType {
    type Error = DependencyFlags;

    /// Decode the comparison from the 4 low bits. Anything other than a single comparison bit or
    /// one of the LE / GE combinations is not a valid comparison.
    fn try_from(flags: DependencyFlags) -> Result<Self, Self::Error> {
        let sense = flags & DependencyFlags::from_bits_retain(0xf);
        let reqtype = if sense == DependencyFlags::LESS {
            RequirementType::LT
        } else if sense == DependencyFlags::GREATER {
            RequirementType::GT
        } else if sense == DependencyFlags::EQUAL {
            RequirementType::EQ
        } else if sense == DependencyFlags::LE {
            RequirementType::LE
        } else if sense == DependencyFlags::GE {
            RequirementType::GE
        } else {
            return Err(sense);
        };
        Ok(reqtype)
    }
}

/// One relational reference from a package header (Provides, Requires, Conflicts, ...).
#[derive(Clone, Debug, PartialEq)]
pub struct Requirement {
    pub name: String,
    pub flags: DependencyFlags,
    pub evr: EVR,
}

impl Requirement {
    pub fn new(name: impl Into<String>, flags: DependencyFlags, evr: EVR) -> Self {
        Requirement {
            name: name.into(),
            flags,
            evr,
        }
    }

    /// Build a requirement from the raw header values.
    pub fn from_header(name: &str, flags: u32, version: &str) -> Result<Self, MetadataError> {
        Ok(Requirement::new(
            name,
            DependencyFlags::from_bits_retain(flags),
            EVR::parse(version)?,
        ))
    }

    pub fn comparison(&self) -> Option<RequirementType> {
        RequirementType::try_from(self.flags).ok()
    }

    pub fn is_prerequisite(&self) -> bool {
        self.flags.intersects(DependencyFlags::PREREQUISITE)
    }

    /// Whether two requirements would render to the same metadata entry.
    pub fn is_duplicate_of(&self, other: &Requirement) -> bool {
        self.name == other.name
            && self.evr == other.evr
            && self.comparison() == other.comparison()
            && self.is_prerequisite() == other.is_prerequisite()
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Hash)]
pub enum FileType {
    File,
    Dir,
    Ghost,
}

impl FileType {
    /// Value of the `type` attribute in metadata, plain files have none.
    pub fn to_values(&self) -> Option<&'static str> {
        match self {
            FileType::File => None,
            FileType::Dir => Some("dir"),
            FileType::Ghost => Some("ghost"),
        }
    }
}

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;

/// One path packaged by an RPM.
#[derive(Clone, Debug, PartialEq)]
pub struct PackageFile {
    pub basename: String,
    pub dirname: String,
    pub flags: FileFlags,
    pub mode: u32,
}

impl PackageFile {
    pub fn new(
        basename: impl Into<String>,
        dirname: impl Into<String>,
        flags: FileFlags,
        mode: u32,
    ) -> Self {
        PackageFile {
            basename: basename.into(),
            dirname: dirname.into(),
            flags,
            mode,
        }
    }

    pub fn path(&self) -> String {
        format!("{}{}", self.dirname, self.basename)
    }

    pub fn filetype(&self) -> FileType {
        if self.mode & 0xffff & S_IFMT == S_IFDIR {
            FileType::Dir
        } else if self.flags.contains(FileFlags::GHOST) {
            FileType::Ghost
        } else {
            FileType::File
        }
    }

    /// Files which package managers expect to find in primary.xml without loading filelists.xml.
    pub fn is_primary(&self) -> bool {
        // strange algorithm, but it's what createrepo uses
        self.dirname.starts_with("/etc/")
            || self.dirname.starts_with("/usr/lib/sendmail")
            || self.dirname.contains("bin/")
    }
}

#[derive(Clone, Debug, Default, Hash, PartialEq)]
pub struct Changelog {
    pub author: String,
    pub timestamp: u64,
    pub description: String,
}

#[derive(Copy, Clone, Debug, Default, Hash, PartialEq)]
pub struct HeaderRange {
    pub start: u64,
    pub end: u64,
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct RepomdData {
    revision: Option<String>,
    metadata_files: Vec<RepomdRecord>,
}

impl RepomdData {
    pub fn add_record(&mut self, record: RepomdRecord) {
        self.metadata_files.push(record);
    }

    pub fn get_record(&self, rectype: &str) -> Option<&RepomdRecord> {
        self.metadata_files
            .iter()
            .find(|r| r.metadata_name == rectype)
    }

    pub fn records(&self) -> &[RepomdRecord] {
        &self.metadata_files
    }

    pub fn set_revision(&mut self, revision: &str) {
        self.revision = Some(revision.to_owned());
    }

    pub fn revision(&self) -> Option<&str> {
        self.revision.as_deref()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RepomdRecord {
    /// Record type
    pub metadata_name: String,
    /// Relative location of the file in a repository
    pub location_href: PathBuf,
    /// Mtime of the file
    pub timestamp: i64,
    /// Size of the file
    pub size: Option<u64>,
    /// Checksum of the file
    pub checksum: Checksum,

    /// Size of the archive content
    pub open_size: Option<u64>,
    /// Checksum of the archive content
    pub open_checksum: Option<Checksum>,
}
