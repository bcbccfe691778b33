// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::fs::{File, FileTimes};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::time::{Duration, SystemTime};

use digest::Digest;
use flate2::GzBuilder;

use crate::{Checksum, ChecksumType, CompressionType, MetadataError};

fn digest_reader<D: Digest, R: Read>(mut reader: R) -> Result<String, MetadataError> {
    let mut hasher = D::new();
    let mut buffer = [0; 65536];

    loop {
        let count = reader.read(&mut buffer)?;
        if count == 0 {
            break;
        }
        hasher.update(&buffer[..count]);
    }
    Ok(hex::encode(hasher.finalize()))
}

pub fn checksum_reader<R: Read>(
    reader: R,
    checksum_type: ChecksumType,
) -> Result<Checksum, MetadataError> {
    let digest = match checksum_type {
        ChecksumType::Md5 => digest_reader::<md5::Md5, _>(reader)?,
        ChecksumType::Sha1 => digest_reader::<sha1::Sha1, _>(reader)?,
        ChecksumType::Sha224 => digest_reader::<sha2::Sha224, _>(reader)?,
        ChecksumType::Sha256 => digest_reader::<sha2::Sha256, _>(reader)?,
        ChecksumType::Sha384 => digest_reader::<sha2::Sha384, _>(reader)?,
        ChecksumType::Sha512 => digest_reader::<sha2::Sha512, _>(reader)?,
    };
    Ok(Checksum::new(checksum_type, digest))
}

pub fn checksum_file(path: &Path, checksum_type: ChecksumType) -> Result<Checksum, MetadataError> {
    checksum_reader(BufReader::new(File::open(path)?), checksum_type)
}

/// Compress `source` into `destination`.
///
/// Gzip embeds the original file name and `mtime` into its header; the other formats carry no
/// timestamp. Output only depends on the input bytes and `mtime`.
pub fn compress_file(
    source: &Path,
    destination: &Path,
    compression: CompressionType,
    mtime: SystemTime,
) -> Result<(), MetadataError> {
    let mut input = BufReader::new(File::open(source)?);
    let output = BufWriter::new(File::create(destination)?);

    match compression {
        CompressionType::Gzip => {
            let filename = source
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            let mut encoder = GzBuilder::new()
                .filename(filename)
                .mtime(unix_seconds(mtime) as u32)
                .write(output, flate2::Compression::best());
            std::io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
        }
        CompressionType::Bz2 => {
            let mut encoder = bzip2::write::BzEncoder::new(output, bzip2::Compression::best());
            std::io::copy(&mut input, &mut encoder)?;
            encoder.finish()?.flush()?;
        }
        CompressionType::Xz | CompressionType::Zstd => {
            let format = match compression {
                CompressionType::Xz => niffler::compression::Format::Lzma,
                _ => niffler::compression::Format::Zstd,
            };
            // the encoders finalize the stream when dropped
            let mut encoder = niffler::get_writer(Box::new(output), format, niffler::Level::Nine)?;
            std::io::copy(&mut input, &mut encoder)?;
            encoder.flush()?;
        }
    }
    Ok(())
}

/// Force both the access and modification time of a file.
pub fn set_mtime(path: &Path, time: SystemTime) -> Result<(), MetadataError> {
    let file = File::options().write(true).open(path)?;
    file.set_times(FileTimes::new().set_accessed(time).set_modified(time))?;
    Ok(())
}

/// Copy a file, preserving its modification time.
pub fn copy_preserving_mtime(source: &Path, destination: &Path) -> Result<(), MetadataError> {
    std::fs::copy(source, destination)?;
    let modified = std::fs::metadata(source)?.modified()?;
    set_mtime(destination, modified)
}

/// Whole seconds since the epoch, times before it clamp to 0.
pub fn unix_seconds(time: SystemTime) -> u64 {
    time.duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Drop the sub-second part so that the time survives a round trip through metadata.
pub fn truncate_to_seconds(time: SystemTime) -> SystemTime {
    SystemTime::UNIX_EPOCH + Duration::from_secs(unix_seconds(time))
}
