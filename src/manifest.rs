//! Bundle Manifest - Per-File Digests
//!
//! The manifest lists every bundle file except itself and the signature.
//! Serialized as canonical JSON so the signed bytes are reproducible.

use std::collections::BTreeMap;

use crate::hashing::{canonical_json, is_digest_hex, sha256_hex};

pub const MANIFEST_FILE: &str = "manifest.json";
pub const SIGNATURE_FILE: &str = "signature";

/// Bundle members by archive name. Sorted, so iteration order is stable.
pub type BundleFiles = BTreeMap<String, Vec<u8>>;

#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("manifest is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("manifest entry {file} has malformed digest")]
    MalformedDigest { file: String },

    #[error("manifest may not list {0}")]
    ReservedName(String),

    #[error("digest mismatch for {file}")]
    DigestMismatch { file: String },

    #[error("{file} is listed in the manifest but missing from the bundle")]
    Missing { file: String },

    #[error("{file} is in the bundle but not listed in the manifest")]
    Unlisted { file: String },
}

fn is_reserved(name: &str) -> bool {
    name == MANIFEST_FILE || name == SIGNATURE_FILE
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    entries: BTreeMap<String, String>,
}

impl Manifest {
    pub fn compute(files: &BundleFiles) -> Self {
        let entries = files
            .iter()
            .filter(|(name, _)| !is_reserved(name))
            .map(|(name, bytes)| (name.clone(), sha256_hex(bytes)))
            .collect();
        Self { entries }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, ManifestError> {
        Ok(canonical_json(&self.entries)?.into_bytes())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ManifestError> {
        let entries: BTreeMap<String, String> = serde_json::from_slice(bytes)?;
        if let Some(name) = entries.keys().find(|n| is_reserved(n)) {
            return Err(ManifestError::ReservedName(name.clone()));
        }
        if let Some((file, _)) = entries.iter().find(|(_, d)| !is_digest_hex(d)) {
            return Err(ManifestError::MalformedDigest { file: file.clone() });
        }
        Ok(Self { entries })
    }

    pub fn get(&self, file: &str) -> Option<&str> {
        self.entries.get(file).map(String::as_str)
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Exact match: same file set, same digests.
    pub fn verify(&self, files: &BundleFiles) -> Result<(), ManifestError> {
        for (name, bytes) in files.iter().filter(|(name, _)| !is_reserved(name)) {
            match self.entries.get(name) {
                None => return Err(ManifestError::Unlisted { file: name.clone() }),
                Some(expected) if *expected != sha256_hex(bytes) => {
                    return Err(ManifestError::DigestMismatch { file: name.clone() })
                }
                Some(_) => {}
            }
        }
        if let Some(file) = self.entries.keys().find(|k| !files.contains_key(*k)) {
            return Err(ManifestError::Missing { file: file.clone() });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn files() -> BundleFiles {
        let mut files = BundleFiles::new();
        files.insert("pass.json".into(), b"{}".to_vec());
        files.insert("icon.png".into(), vec![1, 2, 3]);
        files.insert(MANIFEST_FILE.into(), b"ignored".to_vec());
        files
    }

    #[test]
    fn excludes_manifest_and_signature() {
        let m = Manifest::compute(&files());
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(MANIFEST_FILE), None);
        assert!(m.entries().all(|(_, d)| d.len() == 64));
    }

    #[test]
    fn serialization_is_sorted_and_compact() {
        let bytes = Manifest::compute(&files()).to_bytes().unwrap();
        let text = String::from_utf8(bytes.clone()).unwrap();
        assert!(text.starts_with(r#"{"icon.png":""#));
        assert!(!text.contains(' '));
        assert_eq!(Manifest::from_bytes(&bytes).unwrap(), Manifest::compute(&files()));
    }

    #[test]
    fn verify_detects_each_discrepancy() {
        let m = Manifest::compute(&files());
        assert!(m.verify(&files()).is_ok());

        let mut changed = files();
        changed.insert("icon.png".into(), vec![1, 2, 4]);
        assert!(matches!(m.verify(&changed), Err(ManifestError::DigestMismatch { .. })));

        let mut extra = files();
        extra.insert("strip.png".into(), vec![]);
        assert!(matches!(m.verify(&extra), Err(ManifestError::Unlisted { .. })));

        let mut missing = files();
        missing.remove("icon.png");
        assert!(matches!(m.verify(&missing), Err(ManifestError::Missing { .. })));
    }

    #[test]
    fn rejects_malformed_digests() {
        let err = Manifest::from_bytes(br#"{"pass.json":"abc"}"#).unwrap_err();
        assert!(matches!(err, ManifestError::MalformedDigest { .. }));
    }
}
