// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

//! Generate signed RPM repository metadata (`repodata/`) from a set of package files.

mod common;
mod filelist;
mod fragment;
mod metadata;
mod other;
mod package;
mod primary;
mod repomd;
mod repository;
mod signer;
pub mod utils;

pub use common::{EVR, compare_abi_versions, rpmvercmp};
pub use filelist::FilelistsXmlWriter;
pub use fragment::XmlFragment;
pub use metadata::{
    Changelog, Checksum, ChecksumType, CompressionType, DependencyFlags, FileFlags, FileType,
    FilelistsXml, HeaderRange, MetadataError, OtherXml, PackageFile, PrimaryXml, RepomdData,
    RepomdRecord, RepomdXml, Requirement, RequirementType, RpmMetadata, XML_NS_COMMON,
    XML_NS_FILELISTS, XML_NS_OTHER, XML_NS_REPO, XML_NS_RPM,
};
pub use other::OtherXmlWriter;
#[cfg(feature = "read_rpm")]
pub use package::rpm_parsing::RpmPackageReader;
pub use package::{
    DependencyHeaders, HeaderValue, Headers, MAX_CHANGELOG_ENTRIES, Package, PackageReader,
    PackageSource,
};
pub use primary::PrimaryXmlWriter;
pub use repository::{Repository, RepositoryOptions, RepositoryWriter};
#[cfg(feature = "sign_pgp")]
pub use signer::pgp_signing::{
    PgpSigner, create_self_signed_key, create_signing_key, signing_key_params_builder,
};
pub use signer::{GpgSigner, Signer};
