// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use indexmap::IndexMap;
use log::{debug, info, warn};
use quick_xml::Writer;
use rayon::prelude::*;

use super::filelist::FilelistsXmlWriter;
use super::metadata::{
    ChecksumType, CompressionType, FilelistsXml, METADATA_FILELISTS, METADATA_OTHER,
    METADATA_PRIMARY, OtherXml, PrimaryXml, RepomdData, RepomdRecord, RepomdXml, RpmMetadata,
};
use super::other::OtherXmlWriter;
use super::primary::PrimaryXmlWriter;
use super::{MetadataError, Package, PackageReader, Signer, utils};

const REPODATA_DIR: &str = "repodata";
const PACKAGE_EXTENSION: &str = "rpm";

/// A set of packages from which repository metadata is generated.
///
/// This struct upholds the following invariants:
///  a) no two packages share a pkgid (the checksum of the package file)
///  b) no two packages share the same name, EVR and architecture
///  c) no two packages are published under the same file name
///  d) packages are always ordered by name, EVR and architecture
///
/// Every check happens before a package is inserted, so a failed insertion leaves the repository
/// untouched.
#[derive(Debug, Default)]
pub struct Repository {
    packages: IndexMap<String, Package>,
}

impl Repository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Packages in repository order.
    pub fn packages(&self) -> impl ExactSizeIterator<Item = &Package> {
        self.packages.values()
    }

    /// Look up a package by its pkgid.
    pub fn get(&self, pkgid: &str) -> Option<&Package> {
        self.packages.get(pkgid)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Read a package file from disk and add it to the repository.
    #[cfg(feature = "read_rpm")]
    pub fn add_package(&mut self, path: &Path) -> Result<&Package, MetadataError> {
        self.add_package_with_reader(path, &crate::RpmPackageReader)
    }

    /// Read a package file using the provided [`PackageReader`] and add it to the repository.
    pub fn add_package_with_reader<R: PackageReader + ?Sized>(
        &mut self,
        path: &Path,
        reader: &R,
    ) -> Result<&Package, MetadataError> {
        let package = Package::load(path, package_filename(path)?, reader)?;
        self.insert_package(package)
    }

    /// Read many package files and add them all to the repository.
    ///
    /// Packages are read in parallel and then inserted one at a time in the order given. The first
    /// failure is returned; packages inserted before it stay in the repository.
    pub fn add_packages<R, P>(&mut self, paths: &[P], reader: &R) -> Result<usize, MetadataError>
    where
        R: PackageReader + ?Sized,
        P: AsRef<Path> + Sync,
    {
        let packages = paths
            .par_iter()
            .map(|path| {
                let path = path.as_ref();
                Package::load(path, package_filename(path)?, reader)
            })
            .collect::<Result<Vec<_>, _>>()?;

        let count = packages.len();
        for package in packages {
            self.insert_package(package)?;
        }
        Ok(count)
    }

    /// Add an already constructed package, keeping the repository sorted.
    pub fn insert_package(&mut self, package: Package) -> Result<&Package, MetadataError> {
        if self.packages.contains_key(package.pkgid()) {
            return Err(MetadataError::DuplicatePackageIdError(
                package.pkgid().to_owned(),
            ));
        }

        let index = match self.packages.binary_search_by(|_, p| p.cmp_key(&package)) {
            Ok(_) => return Err(MetadataError::DuplicatePackageError(package.nevra())),
            Err(index) => index,
        };

        // every package file is copied into the same directory on export
        if self.packages().any(|p| p.filename() == package.filename()) {
            return Err(MetadataError::DuplicateFilenameError(
                package.filename().to_owned(),
            ));
        }

        debug!("adding package {} at position {}", package.nevra(), index);
        self.packages
            .shift_insert(index, package.pkgid().to_owned(), package);
        Ok(&self.packages[index])
    }

    /// Write repository metadata to a String.
    pub fn write_metadata_string<M: RpmMetadata>(&self) -> Result<String, MetadataError> {
        let bytes = self.write_metadata_bytes::<M>()?;
        Ok(String::from_utf8(bytes).map_err(|e| e.utf8_error())?)
    }

    /// Write repository metadata to a buffer of bytes.
    pub fn write_metadata_bytes<M: RpmMetadata>(&self) -> Result<Vec<u8>, MetadataError> {
        let mut buf = Vec::new();
        let writer = Writer::new_with_indent(&mut buf, b' ', 2);
        M::write_metadata(self, writer)?;
        Ok(buf)
    }

    /// Publish the repository to `root` with default options.
    pub fn export<S: Signer + ?Sized>(
        &self,
        root: &Path,
        signer: &S,
    ) -> Result<RepomdData, MetadataError> {
        self.export_with_options(root, signer, RepositoryOptions::default())
    }

    /// Publish the repository to `root`.
    ///
    /// `root/repodata` is regenerated from scratch, then every package file is copied into `root`,
    /// replacing any package files found there. A failure at any point leaves an incomplete
    /// repository behind; running the export again regenerates everything.
    pub fn export_with_options<S: Signer + ?Sized>(
        &self,
        root: &Path,
        signer: &S,
        options: RepositoryOptions,
    ) -> Result<RepomdData, MetadataError> {
        let now = utils::truncate_to_seconds(options.timestamp.unwrap_or_else(SystemTime::now));
        let options = options.timestamp(now);

        if self.is_empty() {
            warn!("exporting a repository without packages to {}", root.display());
        }

        let mut writer = RepositoryWriter::new_with_options(root, self.len(), options)?;
        for package in self.packages() {
            writer.add_package(package)?;
        }
        let repomd = writer.finish(signer)?;

        self.sync_packages(root)?;
        info!("synchronized {} packages into {}", self.len(), root.display());

        Ok(repomd)
    }

    fn sync_packages(&self, root: &Path) -> Result<(), MetadataError> {
        for entry in std::fs::read_dir(root)? {
            let path = entry?.path();
            let is_package = path.is_file()
                && path.extension().is_some_and(|ext| ext == PACKAGE_EXTENSION);
            if !is_package {
                continue;
            }
            if self.packages().any(|p| same_file(&p.source().path, &path)) {
                continue;
            }
            debug!("removing stale package file {}", path.display());
            std::fs::remove_file(&path)?;
        }

        for package in self.packages() {
            let destination = root.join(package.filename());
            if same_file(&package.source().path, &destination) {
                continue;
            }
            utils::copy_preserving_mtime(&package.source().path, &destination)?;
        }
        Ok(())
    }
}

fn package_filename(path: &Path) -> Result<&str, MetadataError> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            MetadataError::PackageReadError(path.to_owned(), "not a valid file name".to_owned())
        })
}

fn same_file(a: &Path, b: &Path) -> bool {
    match (a.canonicalize(), b.canonicalize()) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

/// Options for writing RPM repository metadata.
///
/// - `keep_unzipped` - Keep the uncompressed metadata documents next to the compressed ones.
/// - `metadata_compression_type` - The type of compression to use for repository metadata.
/// - `metadata_checksum_type` - The type of checksums to use for metadata.
/// - `timestamp` - The time recorded as the revision and forced as the mtime of every metadata
///   file. Defaults to the current time.
#[derive(Copy, Clone, Debug)]
pub struct RepositoryOptions {
    pub keep_unzipped: bool,
    pub metadata_compression_type: CompressionType,
    pub metadata_checksum_type: ChecksumType,
    pub timestamp: Option<SystemTime>,
}

impl Default for RepositoryOptions {
    fn default() -> Self {
        Self {
            keep_unzipped: false,
            metadata_compression_type: CompressionType::Gzip,
            metadata_checksum_type: ChecksumType::Sha256,
            timestamp: None,
        }
    }
}

impl RepositoryOptions {
    pub fn keep_unzipped(self, val: bool) -> Self {
        Self {
            keep_unzipped: val,
            ..self
        }
    }

    pub fn metadata_checksum_type(self, chktype: ChecksumType) -> Self {
        Self {
            metadata_checksum_type: chktype,
            ..self
        }
    }

    pub fn metadata_compression_type(self, comptype: CompressionType) -> Self {
        Self {
            metadata_compression_type: comptype,
            ..self
        }
    }

    pub fn timestamp(self, timestamp: SystemTime) -> Self {
        Self {
            timestamp: Some(timestamp),
            ..self
        }
    }
}

/// Helper for writing RPM repository metadata manually.
///
/// The metadata documents are streamed to disk uncompressed as packages are added, and compressed,
/// checksummed and indexed in `repomd.xml` when the writer is finished. Package files themselves
/// are not touched.
pub struct RepositoryWriter {
    options: RepositoryOptions,
    path: PathBuf,
    now: SystemTime,

    primary_xml_writer: PrimaryXmlWriter<BufWriter<File>>,
    filelists_xml_writer: FilelistsXmlWriter<BufWriter<File>>,
    other_xml_writer: OtherXmlWriter<BufWriter<File>>,

    num_pkgs_written: usize,
    num_pkgs: usize,
}

impl RepositoryWriter {
    /// Constructor for a new [`RepositoryWriter`] with default options. See [`RepositoryOptions`].
    pub fn new(path: &Path, num_pkgs: usize) -> Result<Self, MetadataError> {
        Self::new_with_options(path, num_pkgs, RepositoryOptions::default())
    }

    /// Constructor for a new [`RepositoryWriter`] with user-provided options. See [`RepositoryOptions`].
    ///
    /// Any existing `repodata` directory under `path` is removed.
    pub fn new_with_options(
        path: &Path,
        num_pkgs: usize,
        options: RepositoryOptions,
    ) -> Result<Self, MetadataError> {
        let repodata_dir = path.join(REPODATA_DIR);
        if repodata_dir.exists() {
            std::fs::remove_dir_all(&repodata_dir)?;
        }
        std::fs::create_dir_all(&repodata_dir)?;
        info!("reset {}", repodata_dir.display());

        let mut primary_xml_writer =
            PrimaryXml::new_writer(xml_writer(&repodata_dir.join(PrimaryXml::filename()))?);
        let mut filelists_xml_writer =
            FilelistsXml::new_writer(xml_writer(&repodata_dir.join(FilelistsXml::filename()))?);
        let mut other_xml_writer =
            OtherXml::new_writer(xml_writer(&repodata_dir.join(OtherXml::filename()))?);

        primary_xml_writer.write_header(num_pkgs)?;
        filelists_xml_writer.write_header(num_pkgs)?;
        other_xml_writer.write_header(num_pkgs)?;

        Ok(Self {
            now: options.timestamp.unwrap_or_else(SystemTime::now),
            options,
            path: path.to_owned(),

            primary_xml_writer,
            filelists_xml_writer,
            other_xml_writer,

            num_pkgs,
            num_pkgs_written: 0,
        })
    }

    /// Write a `Package` to the repo metadata.
    pub fn add_package(&mut self, pkg: &Package) -> Result<(), MetadataError> {
        self.num_pkgs_written += 1;
        assert!(
            self.num_pkgs_written <= self.num_pkgs,
            "Num packages written {} is more than number of packages declared in the header {}",
            self.num_pkgs_written,
            self.num_pkgs
        );

        self.primary_xml_writer.write_package(pkg)?;
        self.filelists_xml_writer.write_package(pkg)?;
        self.other_xml_writer.write_package(pkg)?;

        Ok(())
    }

    /// Consume the [`RepositoryWriter`], and finish writing the repository metadata to disk.
    ///
    /// - Checks that the number of packages written matches the number of packages declared.
    /// - Completes, compresses and checksums all metadata files.
    /// - Writes `repomd.xml` and signs it.
    pub fn finish<S: Signer + ?Sized>(mut self, signer: &S) -> Result<RepomdData, MetadataError> {
        assert_eq!(
            self.num_pkgs_written, self.num_pkgs,
            "Number of packages written {} is different from the number declared in the header {}.",
            self.num_pkgs_written, self.num_pkgs
        );

        self.primary_xml_writer.finish()?;
        self.filelists_xml_writer.finish()?;
        self.other_xml_writer.finish()?;
        info!(
            "wrote metadata for {} packages to {}",
            self.num_pkgs,
            self.path.display()
        );

        let documents = [
            (METADATA_PRIMARY, PrimaryXml::filename()),
            (METADATA_FILELISTS, FilelistsXml::filename()),
            (METADATA_OTHER, OtherXml::filename()),
        ];
        let records = documents
            .par_iter()
            .map(|(name, filename)| self.summarize(name, filename))
            .collect::<Result<Vec<_>, _>>()?;

        let mut repomd_data = RepomdData::default();
        repomd_data.set_revision(&utils::unix_seconds(self.now).to_string());
        for record in records {
            repomd_data.add_record(record);
        }

        let repomd_path = self.path.join(REPODATA_DIR).join(RepomdXml::filename());
        let mut repomd_writer = xml_writer(&repomd_path)?;
        RepomdXml::write_data(&repomd_data, &mut repomd_writer)?;
        drop(repomd_writer);
        utils::set_mtime(&repomd_path, self.now)?;
        info!("wrote {}", repomd_path.display());

        let mut signature_path = repomd_path.clone().into_os_string();
        signature_path.push(".asc");
        signer.sign_detached(&repomd_path, Path::new(&signature_path))?;
        info!("signed {}", repomd_path.display());

        Ok(repomd_data)
    }

    /// Compress one finished document and describe it for repomd.xml.
    fn summarize(&self, name: &str, filename: &str) -> Result<RepomdRecord, MetadataError> {
        let compression = self.options.metadata_compression_type;
        let checksum_type = self.options.metadata_checksum_type;

        let relative_path = PathBuf::from(REPODATA_DIR).join(filename);
        let compressed_relative_path = PathBuf::from(REPODATA_DIR)
            .join(format!("{}{}", filename, compression.to_file_extension()));
        let open_path = self.path.join(&relative_path);
        let compressed_path = self.path.join(&compressed_relative_path);

        utils::set_mtime(&open_path, self.now)?;
        let open_size = std::fs::metadata(&open_path)?.len();
        let open_checksum = utils::checksum_file(&open_path, checksum_type)?;

        utils::compress_file(&open_path, &compressed_path, compression, self.now)?;
        utils::set_mtime(&compressed_path, self.now)?;
        let size = std::fs::metadata(&compressed_path)?.len();
        let checksum = utils::checksum_file(&compressed_path, checksum_type)?;
        debug!(
            "compressed {} ({} -> {} bytes)",
            open_path.display(),
            open_size,
            size
        );

        if !self.options.keep_unzipped {
            std::fs::remove_file(&open_path)?;
        }

        Ok(RepomdRecord {
            metadata_name: name.to_owned(),
            location_href: compressed_relative_path,
            timestamp: utils::unix_seconds(self.now) as i64,
            size: Some(size),
            checksum,
            open_size: Some(open_size),
            open_checksum: Some(open_checksum),
        })
    }
}

fn xml_writer(path: &Path) -> Result<Writer<BufWriter<File>>, MetadataError> {
    let file = BufWriter::new(File::create(path)?);
    Ok(Writer::new_with_indent(file, b' ', 2))
}
