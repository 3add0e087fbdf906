//! Hash kinds and file digests used by the verification collaborator.
//!
//! Digests are computed off the transfer path, after a method reports a
//! completed download.

use anyhow::{Context, Result};
use sha2::{Digest, Sha256, Sha512};
use std::fs::File;
use std::io::Read;
use std::path::Path;

const BUF_SIZE: usize = 64 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashKind {
    Sha256,
    Sha512,
}

impl HashKind {
    /// The name used in `Expected-<name>` request headers.
    pub fn field_name(&self) -> &'static str {
        match self {
            HashKind::Sha256 => "SHA256",
            HashKind::Sha512 => "SHA512",
        }
    }

    pub fn from_field_name(name: &str) -> Option<Self> {
        match name.to_ascii_uppercase().as_str() {
            "SHA256" => Some(HashKind::Sha256),
            "SHA512" => Some(HashKind::Sha512),
            _ => None,
        }
    }
}

/// A single expected digest, as lowercase hex.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HashString {
    pub kind: HashKind,
    pub hex: String,
}

impl HashString {
    pub fn new(kind: HashKind, hex: impl Into<String>) -> Self {
        Self {
            kind,
            hex: hex.into().to_ascii_lowercase(),
        }
    }
}

/// The set of digests expected for one item (possibly empty).
#[derive(Debug, Clone, Default)]
pub struct HashList(Vec<HashString>);

impl HashList {
    pub fn push(&mut self, hash: HashString) {
        self.0.push(hash);
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &HashString> {
        self.0.iter()
    }
}

/// Compute a digest of a file and return it as lowercase hex.
/// Reads in chunks to keep memory use bounded; suitable for large files.
pub fn hash_path(path: &Path, kind: HashKind) -> Result<String> {
    let mut f = File::open(path).with_context(|| format!("open {}", path.display()))?;
    match kind {
        HashKind::Sha256 => digest_reader(&mut f, Sha256::new(), path),
        HashKind::Sha512 => digest_reader(&mut f, Sha512::new(), path),
    }
}

fn digest_reader<D: Digest>(f: &mut File, mut hasher: D, path: &Path) -> Result<String> {
    let mut buf = [0u8; BUF_SIZE];
    loop {
        let n = f
            .read(&mut buf)
            .with_context(|| format!("read {}", path.display()))?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn sha256_known_content() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        let digest = hash_path(f.path(), HashKind::Sha256).unwrap();
        assert_eq!(
            digest,
            "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03"
        );
    }

    #[test]
    fn sha256_empty_file() {
        let f = tempfile::NamedTempFile::new().unwrap();
        let digest = hash_path(f.path(), HashKind::Sha256).unwrap();
        assert_eq!(
            digest,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn field_names_roundtrip() {
        for kind in [HashKind::Sha256, HashKind::Sha512] {
            assert_eq!(HashKind::from_field_name(kind.field_name()), Some(kind));
        }
        assert_eq!(HashKind::from_field_name("CRC32"), None);
    }

    #[test]
    fn hash_string_normalizes_to_lowercase() {
        let h = HashString::new(HashKind::Sha256, "ABCDEF");
        assert_eq!(h.hex, "abcdef");
    }
}
