// Copyright (c) 2022 Daniel Alley
//
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at http://mozilla.org/MPL/2.0/.

use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use log::debug;

use crate::MetadataError;

/// Produces detached signatures for repository metadata.
pub trait Signer: Sync {
    /// Sign the file at `path`, writing an ASCII-armored detached signature to `signature_path`.
    fn sign_detached(&self, path: &Path, signature_path: &Path) -> Result<(), MetadataError>;
}

/// Signs by invoking GnuPG.
#[derive(Clone, Debug)]
pub struct GpgSigner {
    program: PathBuf,
    homedir: Option<PathBuf>,
    local_user: Option<String>,
    passphrase: Option<String>,
}

impl Default for GpgSigner {
    fn default() -> Self {
        Self {
            program: PathBuf::from("gpg"),
            homedir: None,
            local_user: None,
            passphrase: None,
        }
    }
}

impl GpgSigner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Path to the `gpg` executable.
    pub fn program(self, program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            ..self
        }
    }

    pub fn homedir(self, homedir: impl Into<PathBuf>) -> Self {
        Self {
            homedir: Some(homedir.into()),
            ..self
        }
    }

    /// Key to sign with, otherwise gpg picks the default key.
    pub fn local_user(self, key_id: impl Into<String>) -> Self {
        Self {
            local_user: Some(key_id.into()),
            ..self
        }
    }

    /// Passphrase of the signing key. It is handed to gpg on stdin using loopback pinentry.
    pub fn passphrase(self, passphrase: impl Into<String>) -> Self {
        Self {
            passphrase: Some(passphrase.into()),
            ..self
        }
    }

    fn arguments(&self, path: &Path, signature_path: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec!["--batch".into(), "--yes".into()];
        if let Some(homedir) = &self.homedir {
            args.push("--homedir".into());
            args.push(homedir.into());
        }
        if let Some(local_user) = &self.local_user {
            args.push("--local-user".into());
            args.push(local_user.into());
        }
        if self.passphrase.is_some() {
            args.extend(["--pinentry-mode", "loopback", "--passphrase-fd", "0"].map(OsString::from));
        }
        args.extend(["--armor", "--detach-sign", "--output"].map(OsString::from));
        args.push(signature_path.into());
        args.push(path.into());
        args
    }
}

impl Signer for GpgSigner {
    fn sign_detached(&self, path: &Path, signature_path: &Path) -> Result<(), MetadataError> {
        let args = self.arguments(path, signature_path);
        debug!("running {} {:?}", self.program.display(), args);

        let mut child = Command::new(&self.program)
            .args(&args)
            .stdin(if self.passphrase.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .spawn()?;

        if let (Some(passphrase), Some(mut stdin)) = (&self.passphrase, child.stdin.take()) {
            stdin.write_all(passphrase.as_bytes())?;
            stdin.write_all(b"\n")?;
        }

        let output = child.wait_with_output()?;
        if !output.status.success() {
            return Err(MetadataError::SigningError(
                path.to_owned(),
                String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            ));
        }
        Ok(())
    }
}

/// In-process OpenPGP signing, without a gpg installation or keyring.
#[cfg(feature = "sign_pgp")]
pub mod pgp_signing {
    use std::fs::File;
    use std::io::{BufReader, Cursor, Read};

    use chrono::SubsecRound;
    use pgp::crypto::{HashAlgorithm, SymmetricKeyAlgorithm};
    use pgp::packet::{Packet, SignatureConfig, SignatureType, Subpacket};
    use pgp::types::{CompressionAlgorithm, KeyTrait, KeyVersion, SecretKeyTrait};
    use pgp::{
        Deserializable, KeyType, SecretKeyParams, SecretKeyParamsBuilder, SignedPublicKey,
        SignedSecretKey,
    };
    use smallvec::{SmallVec, smallvec};

    use super::*;

    /// Signs with an OpenPGP secret key held in memory.
    ///
    /// `PW` supplies the passphrase that unlocks the key. It is called once per signature.
    pub struct PgpSigner<PW = fn() -> String> {
        key: SignedSecretKey,
        key_passphrase: PW,
        hash_algorithm: HashAlgorithm,
    }

    impl PgpSigner {
        /// A signer for a key which is not protected by a passphrase.
        pub fn new(key: SignedSecretKey) -> Self {
            Self {
                key,
                key_passphrase: String::new,
                hash_algorithm: HashAlgorithm::SHA2_256,
            }
        }

        /// Load an ASCII-armored secret key, e.g. the output of `gpg --export-secret-keys --armor`.
        pub fn from_armored_key(armored: &str) -> Result<Self, MetadataError> {
            let (key, _) = SignedSecretKey::from_armor_single(Cursor::new(armored.as_bytes()))?;
            key.verify()?;
            Ok(Self::new(key))
        }
    }

    impl<PW> PgpSigner<PW> {
        pub fn with_passphrase<F>(self, key_passphrase: F) -> PgpSigner<F>
        where
            F: Fn() -> String + Sync,
        {
            PgpSigner {
                key: self.key,
                key_passphrase,
                hash_algorithm: self.hash_algorithm,
            }
        }

        /// Digest used for the signature, SHA-256 unless set otherwise.
        pub fn hash_algorithm(self, hash_algorithm: HashAlgorithm) -> Self {
            Self {
                hash_algorithm,
                ..self
            }
        }

        pub fn key(&self) -> &SignedSecretKey {
            &self.key
        }
    }

    impl<PW> Signer for PgpSigner<PW>
    where
        PW: Fn() -> String + Sync,
    {
        fn sign_detached(&self, path: &Path, signature_path: &Path) -> Result<(), MetadataError> {
            debug!("signing {} with key {:?}", path.display(), self.key.key_id());
            let data = BufReader::new(File::open(path)?);
            let armored = detached_signature(
                &self.key,
                || (self.key_passphrase)(),
                self.hash_algorithm,
                data,
            )
            .map_err(|e| MetadataError::SigningError(path.to_owned(), e.to_string()))?;
            std::fs::write(signature_path, armored)?;
            Ok(())
        }
    }

    fn detached_signature<PW, R>(
        key: &impl SecretKeyTrait,
        key_passphrase: PW,
        hash_algorithm: HashAlgorithm,
        data: R,
    ) -> pgp::errors::Result<Vec<u8>>
    where
        PW: FnOnce() -> String,
        R: Read,
    {
        let hashed_subpackets = vec![
            Subpacket::IssuerFingerprint(KeyVersion::V4, SmallVec::from_slice(&key.fingerprint())),
            Subpacket::SignatureCreationTime(chrono::Utc::now().trunc_subsecs(0)),
        ];
        let unhashed_subpackets = vec![Subpacket::Issuer(key.key_id())];

        let config = SignatureConfig::new_v4(
            Default::default(),
            SignatureType::Binary,
            key.algorithm(),
            hash_algorithm,
            hashed_subpackets,
            unhashed_subpackets,
        );
        let signature = config.sign(key, key_passphrase, data)?;

        let mut armored = Vec::new();
        pgp::armor::write(
            &Packet::Signature(signature),
            pgp::armor::BlockType::Signature,
            &mut armored,
            None,
        )?;
        Ok(armored)
    }

    /// Parameters for an RSA key suitable for signing repository metadata.
    ///
    /// The builder can be adjusted further before calling `build()`.
    pub fn signing_key_params_builder(primary_user_id: impl ToString) -> SecretKeyParamsBuilder {
        let mut key_params = SecretKeyParamsBuilder::default();
        key_params
            .key_type(KeyType::Rsa(2048))
            .preferred_symmetric_algorithms(smallvec![SymmetricKeyAlgorithm::AES256])
            .preferred_hash_algorithms(smallvec![
                HashAlgorithm::SHA2_256,
                HashAlgorithm::SHA2_384,
                HashAlgorithm::SHA2_512
            ])
            .preferred_compression_algorithms(smallvec![CompressionAlgorithm::ZLIB])
            .can_create_certificates(false)
            .can_sign(true)
            .primary_user_id(primary_user_id.to_string());

        key_params
    }

    /// Generate a key pair and self-sign both halves.
    ///
    /// The public key is what clients import (e.g. with `rpm --import`) to verify `repomd.xml.asc`.
    pub fn create_self_signed_key<PW>(
        params: SecretKeyParams,
        key_passphrase: PW,
    ) -> Result<(SignedSecretKey, SignedPublicKey), MetadataError>
    where
        PW: (FnOnce() -> String) + Clone,
    {
        let secret_key = params.generate()?;
        let secret_key_signed = secret_key.sign(key_passphrase.clone())?;

        let public_key = secret_key_signed.public_key();
        let public_key_signed = public_key.sign(&secret_key_signed, key_passphrase)?;

        Ok((secret_key_signed, public_key_signed))
    }

    /// Shorthand for generating a default signing key for `primary_user_id`.
    pub fn create_signing_key<PW>(
        primary_user_id: impl ToString,
        key_passphrase: PW,
    ) -> Result<(SignedSecretKey, SignedPublicKey), MetadataError>
    where
        PW: (FnOnce() -> String) + Clone,
    {
        let params = signing_key_params_builder(primary_user_id)
            .build()
            .map_err(|e| MetadataError::SigningKeyError(e.to_string()))?;
        create_self_signed_key(params, key_passphrase)
    }

}
