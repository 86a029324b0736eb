//! Bundle Archive - Zip Assembly, Verification, Storage
//!
//! Members are written in name order with a fixed timestamp and deflate
//! compression, so identical members always give identical archive bytes.

use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{Cursor, Read, Seek, Write};
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, TempDir};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::hashing::sha256_hex;
use crate::manifest::{BundleFiles, Manifest, ManifestError, MANIFEST_FILE, SIGNATURE_FILE};
use crate::signing::{DetachedSignature, SignatureKind, SigningError};

pub const PASS_FILE: &str = "pass.json";
pub const BUNDLE_EXTENSION: &str = "pkpass";

/// Bounds on what `read_archive` will inflate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadLimits {
    pub max_members: usize,
    pub max_member_bytes: u64,
    pub max_total_bytes: u64,
}

impl ReadLimits {
    pub const DEFAULT: ReadLimits = ReadLimits {
        max_members: 256,
        max_member_bytes: 16 * 1024 * 1024,
        max_total_bytes: 64 * 1024 * 1024,
    };
}

impl Default for ReadLimits {
    fn default() -> Self {
        Self::DEFAULT
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("bundle is missing {0}")]
    MissingMember(&'static str),

    #[error("bundle lists {0} twice")]
    DuplicateMember(String),

    #[error("unusable bundle name {0:?}")]
    InvalidName(String),

    #[error("bundle has {count} members, limit is {limit}")]
    TooManyMembers { count: usize, limit: usize },

    #[error("bundle member {name} inflates past {limit} bytes")]
    MemberTooLarge { name: String, limit: u64 },

    #[error("bundle inflates past {limit} bytes")]
    ArchiveTooLarge { limit: u64 },

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Signature(#[from] SigningError),
}

fn member_options() -> SimpleFileOptions {
    SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .last_modified_time(zip::DateTime::default())
        .unix_permissions(0o644)
}

/// Write every member, in name order, to `writer`.
pub fn write_archive<W: Write + Seek>(files: &BundleFiles, writer: W) -> Result<W, ArchiveError> {
    let mut zip = ZipWriter::new(writer);
    for (name, bytes) in files {
        zip.start_file(name.as_str(), member_options())?;
        zip.write_all(bytes)?;
    }
    Ok(zip.finish()?)
}

pub fn archive_bytes(files: &BundleFiles) -> Result<Vec<u8>, ArchiveError> {
    Ok(write_archive(files, Cursor::new(Vec::new()))?.into_inner())
}

/// Assemble the archive inside a staging directory and read it back.
/// The staging directory is removed when `staging` drops, on every path.
pub fn stage_archive(files: &BundleFiles, staging: &TempDir) -> Result<Vec<u8>, ArchiveError> {
    let path = staging.path().join(format!("bundle.{BUNDLE_EXTENSION}"));
    let file = File::create(&path)?;
    write_archive(files, file)?.sync_all()?;
    Ok(fs::read(&path)?)
}

pub fn read_archive(bytes: &[u8]) -> Result<BundleFiles, ArchiveError> {
    read_archive_with(bytes, &ReadLimits::DEFAULT)
}

/// Sizes declared in the zip headers are not trusted; each member is read
/// through a cap one byte past its limit.
pub fn read_archive_with(bytes: &[u8], limits: &ReadLimits) -> Result<BundleFiles, ArchiveError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))?;
    if archive.len() > limits.max_members {
        return Err(ArchiveError::TooManyMembers {
            count: archive.len(),
            limit: limits.max_members,
        });
    }
    let mut files = BundleFiles::new();
    let mut total: u64 = 0;
    for i in 0..archive.len() {
        let member = archive.by_index(i)?;
        if member.is_dir() {
            continue;
        }
        let name = member.name().to_string();
        let mut buf = Vec::new();
        member
            .take(limits.max_member_bytes + 1)
            .read_to_end(&mut buf)?;
        let size = buf.len() as u64;
        if size > limits.max_member_bytes {
            return Err(ArchiveError::MemberTooLarge {
                name,
                limit: limits.max_member_bytes,
            });
        }
        total += size;
        if total > limits.max_total_bytes {
            return Err(ArchiveError::ArchiveTooLarge {
                limit: limits.max_total_bytes,
            });
        }
        if files.insert(name.clone(), buf).is_some() {
            return Err(ArchiveError::DuplicateMember(name));
        }
    }
    Ok(files)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationReport {
    pub signer: String,
    pub signing_time: chrono::DateTime<chrono::Utc>,
    pub signature_kind: SignatureKind,
    pub manifest_entries: usize,
}

/// Recompute every digest, compare with the manifest exactly, then check the
/// signature over the manifest bytes as stored.
pub fn verify_bundle(bytes: &[u8]) -> Result<VerificationReport, ArchiveError> {
    let files = read_archive(bytes)?;
    if !files.contains_key(PASS_FILE) {
        return Err(ArchiveError::MissingMember(PASS_FILE));
    }
    let manifest_bytes = files
        .get(MANIFEST_FILE)
        .ok_or(ArchiveError::MissingMember(MANIFEST_FILE))?;
    let signature_bytes = files
        .get(SIGNATURE_FILE)
        .ok_or(ArchiveError::MissingMember(SIGNATURE_FILE))?;

    let manifest = Manifest::from_bytes(manifest_bytes)?;
    manifest.verify(&files)?;

    let signature = DetachedSignature::from_bytes(signature_bytes)?;
    let signer = signature.verify(manifest_bytes)?;

    Ok(VerificationReport {
        signer,
        signing_time: signature.signing_time,
        signature_kind: signature.kind,
        manifest_entries: manifest.len(),
    })
}

/// Where a finished bundle ended up.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredBundle {
    pub location: String,
    pub serial_number: String,
    pub size: u64,
    pub sha256: String,
}

/// Storage collaborator for finished archives.
pub trait BundleStore: Send + Sync {
    fn store(&self, serial_number: &str, archive: &[u8]) -> Result<StoredBundle, ArchiveError>;
}

/// Writes `<serial>.pkpass` into a directory, atomically.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    dir: PathBuf,
}

impl DirectoryStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, serial_number: &str) -> Result<PathBuf, ArchiveError> {
        let safe = !serial_number.is_empty()
            && serial_number != "."
            && serial_number != ".."
            && serial_number
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
        if !safe {
            return Err(ArchiveError::InvalidName(serial_number.to_string()));
        }
        Ok(self.dir.join(format!("{serial_number}.{BUNDLE_EXTENSION}")))
    }
}

impl BundleStore for DirectoryStore {
    fn store(&self, serial_number: &str, archive: &[u8]) -> Result<StoredBundle, ArchiveError> {
        let target = self.path_for(serial_number)?;
        fs::create_dir_all(&self.dir)?;

        // Same directory as the target so persist is a rename, never a copy.
        let mut tmp = NamedTempFile::new_in(&self.dir)?;
        tmp.write_all(archive)?;
        tmp.as_file().sync_all()?;
        tmp.persist(&target).map_err(|e| ArchiveError::Io(e.error))?;

        tracing::info!(path = %target.display(), bytes = archive.len(), "bundle stored");
        Ok(StoredBundle {
            location: target.display().to_string(),
            serial_number: serial_number.to_string(),
            size: archive.len() as u64,
            sha256: sha256_hex(archive),
        })
    }
}
