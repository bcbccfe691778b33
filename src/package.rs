// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use log::debug;

use crate::common::compare_abi_versions;
use crate::fragment::XmlFragment;
use crate::metadata::{Changelog, FileFlags, HeaderRange, PackageFile, Requirement};
use crate::{ChecksumType, EVR, MetadataError, filelist, other, primary, utils};

/// Only this many of the most recent changelog entries are published.
pub const MAX_CHANGELOG_ENTRIES: usize = 10;

/// A header value which has no dedicated field in [`Headers`].
#[derive(Clone, Debug, PartialEq)]
pub enum HeaderValue {
    Integer(u64),
    String(String),
}

/// The parallel name / flags / version arrays of one dependency kind.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct DependencyHeaders {
    pub names: Vec<String>,
    pub flags: Vec<u32>,
    pub versions: Vec<String>,
}

impl DependencyHeaders {
    pub fn push(&mut self, name: impl Into<String>, flags: u32, version: impl Into<String>) {
        self.names.push(name.into());
        self.flags.push(flags);
        self.versions.push(version.into());
    }

    // names drive the iteration, a short flags or versions array is padded with 0 / ""
    fn requirements(&self) -> Result<Vec<Requirement>, MetadataError> {
        self.names
            .iter()
            .enumerate()
            .map(|(idx, name)| {
                let flags = self.flags.get(idx).copied().unwrap_or(0);
                let version = self.versions.get(idx).map(String::as_str).unwrap_or("");
                Requirement::from_header(name, flags, version)
            })
            .collect()
    }
}

/// Header data extracted from a package file.
///
/// The tags needed to build metadata are decoded into typed fields. Anything else a reader wants
/// to pass along goes into `extra`, which is exposed unchanged through [`Package::headers`].
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Headers {
    pub name: String,
    pub arch: String,
    pub epoch: Option<u32>,
    pub version: String,
    pub release: String,

    pub summary: Option<String>,
    pub description: Option<String>,
    pub packager: Option<String>,
    pub url: Option<String>,
    pub build_time: Option<u64>,
    pub installed_size: Option<u64>,
    pub archive_size: Option<u64>,

    pub license: Option<String>,
    pub vendor: Option<String>,
    pub group: Option<String>,
    pub build_host: Option<String>,
    pub source_rpm: Option<String>,

    pub provides: DependencyHeaders,
    pub requires: DependencyHeaders,
    pub conflicts: DependencyHeaders,
    pub obsoletes: DependencyHeaders,
    pub suggests: DependencyHeaders,
    pub enhances: DependencyHeaders,
    pub supplements: DependencyHeaders,
    pub recommends: DependencyHeaders,

    pub basenames: Vec<String>,
    pub dirnames: Vec<String>,
    pub dir_indexes: Vec<u32>,
    pub file_flags: Vec<u32>,
    pub file_modes: Vec<u32>,

    pub changelog_times: Vec<u64>,
    pub changelog_authors: Vec<String>,
    pub changelog_texts: Vec<String>,

    pub extra: BTreeMap<String, HeaderValue>,
}

impl Headers {
    fn files(&self) -> Result<Vec<PackageFile>, MetadataError> {
        self.basenames
            .iter()
            .enumerate()
            .map(|(idx, basename)| {
                let dir_index = *self.dir_indexes.get(idx).ok_or_else(|| {
                    MetadataError::InvalidHeaderError(format!(
                        "file '{basename}' has no directory index"
                    ))
                })?;
                let dirname = self.dirnames.get(dir_index as usize).ok_or_else(|| {
                    MetadataError::InvalidHeaderError(format!(
                        "directory index {dir_index} of file '{basename}' is out of range"
                    ))
                })?;
                Ok(PackageFile::new(
                    basename.as_str(),
                    dirname.as_str(),
                    FileFlags::from_bits_retain(self.file_flags.get(idx).copied().unwrap_or(0)),
                    self.file_modes.get(idx).copied().unwrap_or(0),
                ))
            })
            .collect()
    }

    fn changelogs(&self) -> Vec<Changelog> {
        let mut changelogs: Vec<Changelog> = self
            .changelog_times
            .iter()
            .zip(&self.changelog_authors)
            .zip(&self.changelog_texts)
            .map(|((timestamp, author), description)| Changelog {
                author: author.clone(),
                timestamp: *timestamp,
                description: description.clone(),
            })
            .collect();
        changelogs.sort_by_key(|c| c.timestamp);
        let excess = changelogs.len().saturating_sub(MAX_CHANGELOG_ENTRIES);
        changelogs.drain(..excess);
        changelogs
    }
}

/// Extracts headers from a package file.
pub trait PackageReader: Sync {
    /// Return the package headers and the byte range of the header section within the file.
    fn read_headers(&self, path: &Path) -> Result<(Headers, HeaderRange), MetadataError>;
}

/// Where a package came from: the file it was read from and the name it is published under.
#[derive(Clone, Debug, PartialEq)]
pub struct PackageSource {
    pub path: PathBuf,
    pub filename: String,
    pub pkgid: String,
    pub size: u64,
    pub mtime: u64,
}

impl PackageSource {
    /// Stat and checksum a package file.
    pub fn from_path(path: &Path, filename: &str) -> Result<Self, MetadataError> {
        let metadata = std::fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(SystemTime::UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        let pkgid = utils::checksum_file(path, ChecksumType::Sha256)?;

        Ok(PackageSource {
            path: path.to_owned(),
            filename: filename.to_owned(),
            pkgid: pkgid.digest().to_owned(),
            size: metadata.len(),
            mtime,
        })
    }
}

/// One package, with every metadata record it contributes already rendered.
#[derive(Clone, Debug)]
pub struct Package {
    source: PackageSource,
    evr: EVR,
    headers: Headers,
    header_range: HeaderRange,

    files: Vec<PackageFile>,
    provides: Vec<Requirement>,
    requires: Vec<Requirement>,
    conflicts: Vec<Requirement>,
    obsoletes: Vec<Requirement>,
    suggests: Vec<Requirement>,
    enhances: Vec<Requirement>,
    supplements: Vec<Requirement>,
    recommends: Vec<Requirement>,
    changelogs: Vec<Changelog>,

    primary: XmlFragment,
    filelist: XmlFragment,
    other: XmlFragment,
}

impl Package {
    /// Read a package file, publishing it under `filename`.
    pub fn load<R: PackageReader + ?Sized>(
        path: &Path,
        filename: &str,
        reader: &R,
    ) -> Result<Self, MetadataError> {
        let source = PackageSource::from_path(path, filename)?;
        let (headers, header_range) = reader.read_headers(path)?;
        Self::from_headers(source, headers, header_range)
    }

    pub fn from_headers(
        source: PackageSource,
        headers: Headers,
        header_range: HeaderRange,
    ) -> Result<Self, MetadataError> {
        if headers.name.is_empty() {
            return Err(MetadataError::MissingFieldError("name"));
        }
        if headers.arch.is_empty() {
            return Err(MetadataError::MissingFieldError("arch"));
        }
        if headers.version.is_empty() {
            return Err(MetadataError::MissingFieldError("version"));
        }

        let epoch = headers.epoch.unwrap_or(0).to_string();
        let evr = EVR::new(&epoch, headers.version.as_str(), Some(headers.release.as_str()))?;

        let files = headers.files()?;
        let provides = headers.provides.requirements()?;
        let requires = {
            let primary_files: Vec<&PackageFile> =
                files.iter().filter(|f| f.is_primary()).collect();
            filter_requires(headers.requires.requirements()?, &provides, &primary_files)
        };

        let mut package = Package {
            evr,
            header_range,
            files,
            provides,
            requires,
            conflicts: headers.conflicts.requirements()?,
            obsoletes: headers.obsoletes.requirements()?,
            suggests: headers.suggests.requirements()?,
            enhances: headers.enhances.requirements()?,
            supplements: headers.supplements.requirements()?,
            recommends: headers.recommends.requirements()?,
            changelogs: headers.changelogs(),
            source,
            headers,
            primary: XmlFragment::new(),
            filelist: XmlFragment::new(),
            other: XmlFragment::new(),
        };
        package.primary = primary::package_fragment(&package);
        package.filelist = filelist::package_fragment(&package);
        package.other = other::package_fragment(&package);

        debug!(
            "built package {} ({} files, {} requires)",
            package.nevra(),
            package.files.len(),
            package.requires.len()
        );
        Ok(package)
    }

    pub fn name(&self) -> &str {
        &self.headers.name
    }

    pub fn arch(&self) -> &str {
        &self.headers.arch
    }

    pub fn evr(&self) -> &EVR {
        &self.evr
    }

    /// The sha256 of the package file.
    pub fn pkgid(&self) -> &str {
        &self.source.pkgid
    }

    pub fn nvra(&self) -> String {
        format!(
            "{}-{}-{}.{}",
            self.name(),
            self.evr.version(),
            self.evr.release().unwrap_or_default(),
            self.arch()
        )
    }

    pub fn nevra(&self) -> String {
        format!(
            "{}-{}:{}-{}.{}",
            self.name(),
            self.evr.epoch(),
            self.evr.version(),
            self.evr.release().unwrap_or_default(),
            self.arch()
        )
    }

    pub fn source(&self) -> &PackageSource {
        &self.source
    }

    pub fn filename(&self) -> &str {
        &self.source.filename
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header_range(&self) -> HeaderRange {
        self.header_range
    }

    pub fn files(&self) -> &[PackageFile] {
        &self.files
    }

    pub fn provides(&self) -> &[Requirement] {
        &self.provides
    }

    pub fn requires(&self) -> &[Requirement] {
        &self.requires
    }

    pub fn conflicts(&self) -> &[Requirement] {
        &self.conflicts
    }

    pub fn obsoletes(&self) -> &[Requirement] {
        &self.obsoletes
    }

    pub fn suggests(&self) -> &[Requirement] {
        &self.suggests
    }

    pub fn enhances(&self) -> &[Requirement] {
        &self.enhances
    }

    pub fn supplements(&self) -> &[Requirement] {
        &self.supplements
    }

    pub fn recommends(&self) -> &[Requirement] {
        &self.recommends
    }

    /// Up to 10 most recent entries, oldest first.
    pub fn changelogs(&self) -> &[Changelog] {
        &self.changelogs
    }

    pub fn primary_fragment(&self) -> &XmlFragment {
        &self.primary
    }

    pub fn filelist_fragment(&self) -> &XmlFragment {
        &self.filelist
    }

    pub fn other_fragment(&self) -> &XmlFragment {
        &self.other
    }

    /// Sort key of a repository.
    pub(crate) fn cmp_key(&self, other: &Package) -> Ordering {
        self.name()
            .cmp(other.name())
            .then_with(|| self.evr.cmp(&other.evr))
            .then_with(|| self.arch().cmp(other.arch()))
    }
}

/// Drop the requirements a package manager never needs to resolve.
///
/// Survivors keep their order. Of all the `libc.so.6` requirements only the one with the highest
/// ABI version is kept, and it is moved to the end.
pub(crate) fn filter_requires(
    requires: Vec<Requirement>,
    provides: &[Requirement],
    primary_files: &[&PackageFile],
) -> Vec<Requirement> {
    let (mut kept, latest_libc) = requires.into_iter().fold(
        (Vec::<Requirement>::new(), None::<Requirement>),
        |(mut kept, latest_libc), req| {
            if req.name.starts_with("rpmlib(") {
                debug!("dropping rpmlib requirement {}", req.name);
                return (kept, latest_libc);
            }
            if provides.iter().any(|p| p.name == req.name) {
                debug!("dropping self-provided requirement {}", req.name);
                return (kept, latest_libc);
            }
            if req.name.starts_with('/') && primary_files.iter().any(|f| f.path() == req.name) {
                debug!("dropping requirement {} on a packaged file", req.name);
                return (kept, latest_libc);
            }
            if kept.iter().any(|k| k.is_duplicate_of(&req)) {
                return (kept, latest_libc);
            }
            if req.name.starts_with("libc.so.6") {
                let latest_libc = match latest_libc {
                    None => req,
                    Some(current) => match compare_abi_versions(&req.name, &current.name) {
                        Some(Ordering::Greater) => req,
                        Some(_) => current,
                        None => {
                            debug!(
                                "skipping libc requirement {}, not comparable with {}",
                                req.name, current.name
                            );
                            current
                        }
                    },
                };
                return (kept, Some(latest_libc));
            }
            kept.push(req);
            (kept, latest_libc)
        },
    );
    kept.extend(latest_libc);
    kept
}

#[cfg(feature = "read_rpm")]
pub mod rpm_parsing {
    use std::fs::File;
    use std::io::BufReader;

    use super::*;
    use rpm;

    /// Reads headers from real package files.
    #[derive(Clone, Copy, Debug, Default)]
    pub struct RpmPackageReader;

    // tags which are optional in practice fail with TagNotFound
    fn optional<T>(value: Result<T, rpm::Error>) -> Result<Option<T>, MetadataError> {
        match value {
            Ok(v) => Ok(Some(v)),
            Err(rpm::Error::TagNotFound(_)) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn optional_string(value: Result<&str, rpm::Error>) -> Result<Option<String>, MetadataError> {
        Ok(optional(value)?.map(str::to_owned))
    }

    fn string_array(
        tags: &rpm::Header<rpm::IndexTag>,
        tag: rpm::IndexTag,
    ) -> Result<Vec<String>, MetadataError> {
        Ok(optional(tags.get_entry_data_as_string_array(tag))?
            .unwrap_or_default()
            .into_iter()
            .map(str::to_owned)
            .collect())
    }

    fn dependencies(
        value: Result<Vec<rpm::Dependency>, rpm::Error>,
    ) -> Result<DependencyHeaders, MetadataError> {
        let mut headers = DependencyHeaders::default();
        for d in optional(value)?.unwrap_or_default() {
            headers.push(d.name, d.flags.bits(), d.version);
        }
        Ok(headers)
    }

    impl PackageReader for RpmPackageReader {
        fn read_headers(&self, path: &Path) -> Result<(Headers, HeaderRange), MetadataError> {
            let file = File::open(path)?;
            let pkg = rpm::PackageMetadata::parse(&mut BufReader::new(&file))?;

            let arch = if pkg.is_source_package() {
                "src"
            } else {
                pkg.get_arch()?
            };

            let archive_size = optional(
                pkg.signature
                    .get_entry_data_as_u64(rpm::IndexSignatureTag::RPMSIGTAG_LONGARCHIVESIZE),
            )?
            .or(optional(
                pkg.header
                    .get_entry_data_as_u32(rpm::IndexTag::RPMTAG_ARCHIVESIZE),
            )?
            .map(u64::from))
            .or(optional(
                pkg.signature
                    .get_entry_data_as_u32(rpm::IndexSignatureTag::RPMSIGTAG_PAYLOADSIZE),
            )?
            .map(u64::from));

            let mut headers = Headers {
                name: pkg.get_name()?.to_owned(),
                arch: arch.to_owned(),
                epoch: optional(pkg.get_epoch())?,
                version: pkg.get_version()?.to_owned(),
                release: pkg.get_release()?.to_owned(),
                summary: optional_string(pkg.get_summary())?,
                description: optional_string(pkg.get_description())?,
                packager: optional_string(pkg.get_packager())?,
                url: optional_string(pkg.get_url())?,
                build_time: optional(pkg.get_build_time())?,
                installed_size: optional(pkg.get_installed_size())?,
                archive_size,
                license: optional_string(pkg.get_license())?,
                vendor: optional_string(pkg.get_vendor())?,
                group: optional_string(pkg.get_group())?,
                build_host: optional_string(pkg.get_build_host())?,
                source_rpm: optional_string(pkg.get_source_rpm())?,
                provides: dependencies(pkg.get_provides())?,
                requires: dependencies(pkg.get_requires())?,
                conflicts: dependencies(pkg.get_conflicts())?,
                obsoletes: dependencies(pkg.get_obsoletes())?,
                suggests: dependencies(pkg.get_suggests())?,
                enhances: dependencies(pkg.get_enhances())?,
                supplements: dependencies(pkg.get_supplements())?,
                recommends: dependencies(pkg.get_recommends())?,
                ..Default::default()
            };

            let tags = &pkg.header;
            headers.basenames = string_array(tags, rpm::IndexTag::RPMTAG_BASENAMES)?;
            headers.dirnames = string_array(tags, rpm::IndexTag::RPMTAG_DIRNAMES)?;
            headers.dir_indexes =
                optional(tags.get_entry_data_as_u32_array(rpm::IndexTag::RPMTAG_DIRINDEXES))?
                    .unwrap_or_default();
            headers.file_flags =
                optional(tags.get_entry_data_as_u32_array(rpm::IndexTag::RPMTAG_FILEFLAGS))?
                    .unwrap_or_default();
            // FILEMODES is an INT16 array, the type bits fit but have to be widened
            headers.file_modes =
                optional(tags.get_entry_data_as_u16_array(rpm::IndexTag::RPMTAG_FILEMODES))?
                    .unwrap_or_default()
                    .into_iter()
                    .map(u32::from)
                    .collect();

            for entry in optional(pkg.get_changelog_entries())?.unwrap_or_default() {
                headers.changelog_times.push(entry.timestamp);
                headers.changelog_authors.push(entry.name);
                headers.changelog_texts.push(entry.description);
            }

            for (key, tag) in [
                ("os", rpm::IndexTag::RPMTAG_OS),
                ("platform", rpm::IndexTag::RPMTAG_PLATFORM),
                ("payloadformat", rpm::IndexTag::RPMTAG_PAYLOADFORMAT),
            ] {
                if let Some(value) = optional_string(tags.get_entry_data_as_string(tag))? {
                    headers
                        .extra
                        .insert(key.to_owned(), HeaderValue::String(value));
                }
            }
            if let Some(algo) =
                optional(tags.get_entry_data_as_u32(rpm::IndexTag::RPMTAG_FILEDIGESTALGO))?
            {
                headers
                    .extra
                    .insert("filedigestalgo".to_owned(), HeaderValue::Integer(algo.into()));
            }

            let offsets = pkg.get_package_segment_offsets();
            let header_range = HeaderRange {
                start: offsets.header,
                end: offsets.payload,
            };

            Ok((headers, header_range))
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::metadata::DependencyFlags;
    use pretty_assertions::assert_eq;

    fn req(name: &str, flags: DependencyFlags, version: &str) -> Requirement {
        Requirement::new(name, flags, EVR::parse(version).unwrap())
    }

    fn names(reqs: &[Requirement]) -> Vec<&str> {
        reqs.iter().map(|r| r.name.as_str()).collect()
    }

    #[test]
    fn test_filter_requires() {
        let tool = PackageFile::new("tool", "/usr/bin/", FileFlags::empty(), 0o100755);
        let requires = vec![
            req("A", DependencyFlags::ANY, ""),
            req("A", DependencyFlags::ANY, ""),
            req("rpmlib(X)", DependencyFlags::LE | DependencyFlags::RPMLIB, "3.0.4-1"),
            req("/usr/bin/tool", DependencyFlags::ANY, ""),
            req("libc.so.6(GLIBC_2.3.4)", DependencyFlags::ANY, ""),
            req("libc.so.6(GLIBC_2.4)", DependencyFlags::ANY, ""),
        ];
        let provides = vec![req("A", DependencyFlags::ANY, "")];

        let filtered = filter_requires(requires, &provides, &[&tool]);
        assert_eq!(names(&filtered), vec!["libc.so.6(GLIBC_2.4)"]);
    }

    #[test]
    fn test_filter_requires_order_and_duplicates() {
        let requires = vec![
            req("libc.so.6(GLIBC_2.4)(64bit)", DependencyFlags::ANY, ""),
            req("bash", DependencyFlags::ANY, ""),
            req("zlib", DependencyFlags::GE, "1.2-1"),
            req("zlib", DependencyFlags::GE, "1.2-1"),
            req("zlib", DependencyFlags::GE, "1.3-1"),
            req("zlib", DependencyFlags::GE | DependencyFlags::SCRIPT_PRE, "1.2-1"),
            req("libc.so.6(GLIBC_2.2.5)(64bit)", DependencyFlags::ANY, ""),
            req("/bin/sh", DependencyFlags::ANY, ""),
        ];

        let filtered = filter_requires(requires, &[], &[]);
        assert_eq!(
            names(&filtered),
            vec![
                "bash",
                "zlib",
                "zlib",
                "zlib",
                "/bin/sh",
                "libc.so.6(GLIBC_2.4)(64bit)"
            ]
        );
        assert!(filtered[3].is_prerequisite());
    }

    #[test]
    fn test_filter_requires_incomparable_libc() {
        let requires = vec![
            req("libc.so.6", DependencyFlags::ANY, ""),
            req("libc.so.6.1(GLIBC_2.4)", DependencyFlags::ANY, ""),
            req("libc.so.6(GLIBC_2.4)", DependencyFlags::ANY, ""),
        ];

        let filtered = filter_requires(requires, &[], &[]);
        assert_eq!(names(&filtered), vec!["libc.so.6(GLIBC_2.4)"]);
    }

    #[test]
    fn test_headers_changelogs_retention() {
        let mut headers = Headers::default();
        for i in (0..15u64).rev() {
            headers.changelog_times.push(1000 + i);
            headers.changelog_authors.push(format!("author {i}"));
            headers.changelog_texts.push(format!("- change {i}"));
        }

        let changelogs = headers.changelogs();
        assert_eq!(changelogs.len(), 10);
        assert_eq!(changelogs.first().unwrap().timestamp, 1005);
        assert_eq!(changelogs.last().unwrap().timestamp, 1014);
        assert!(changelogs.windows(2).all(|w| w[0].timestamp <= w[1].timestamp));
    }

    #[test]
    fn test_headers_files() {
        let headers = Headers {
            basenames: vec!["complex".into(), "complex_a".into(), "README".into()],
            dirnames: vec!["/etc/".into(), "/usr/bin/".into(), "/usr/share/doc/complex/".into()],
            dir_indexes: vec![0, 1, 2],
            file_flags: vec![0, 0, FileFlags::DOC.bits()],
            file_modes: vec![0o40755, 0o100755],
            ..Default::default()
        };

        let files = headers.files().unwrap();
        assert_eq!(files.len(), 3);
        assert_eq!(files[0].path(), "/etc/complex");
        assert_eq!(files[1].path(), "/usr/bin/complex_a");
        assert_eq!(files[2].mode, 0);
        assert_eq!(files[2].flags, FileFlags::DOC);
    }

    #[test]
    fn test_headers_files_bad_dir_index() {
        let headers = Headers {
            basenames: vec!["complex".into()],
            dirnames: vec!["/etc/".into()],
            dir_indexes: vec![1],
            ..Default::default()
        };
        assert!(matches!(
            headers.files(),
            Err(MetadataError::InvalidHeaderError(_))
        ));
    }

    #[test]
    fn test_dependency_headers_padding() {
        let deps = DependencyHeaders {
            names: vec!["foo".into(), "bar".into()],
            flags: vec![DependencyFlags::EQUAL.bits()],
            versions: vec!["1:2.0-3".into()],
        };
        let reqs = deps.requirements().unwrap();
        assert_eq!(reqs[0].evr, EVR::parse("1:2.0-3").unwrap());
        assert_eq!(reqs[1].flags, DependencyFlags::ANY);
        assert_eq!(reqs[1].evr.version(), "");
        assert_eq!(reqs[1].evr.release(), None);
    }
}
