//! Post-download integrity check.
//!
//! Runs after a method reports 201 URI Done; a mismatch converts the
//! completed item into a terminal failure. Integrity failures are never
//! transient, so nothing here feeds the retry policy.

use anyhow::Result;
use std::path::Path;

use crate::hash::{hash_path, HashList};

/// Outcome of checking a completed file against its expected digests.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    /// All expected digests matched (or none were expected).
    Ok,
    /// At least one digest differed.
    Mismatch {
        kind: &'static str,
        expected: String,
        actual: String,
    },
}

/// Check `path` against every digest in `expected`. Stops at the first
/// mismatch; an unreadable file is an error, not a mismatch.
pub fn verify_file(path: &Path, expected: &HashList) -> Result<Verdict> {
    for h in expected.iter() {
        let actual = hash_path(path, h.kind)?;
        if actual != h.hex {
            return Ok(Verdict::Mismatch {
                kind: h.kind.field_name(),
                expected: h.hex.clone(),
                actual,
            });
        }
    }
    Ok(Verdict::Ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::{HashKind, HashString};
    use std::io::Write;

    const HELLO_SHA256: &str = "5891b5b522d5df086d0ff0b110fbd9d21bb4fc7163af34d08286a2e846f6be03";

    fn hello_file() -> tempfile::NamedTempFile {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"hello\n").unwrap();
        f.flush().unwrap();
        f
    }

    #[test]
    fn empty_expectation_passes() {
        let f = hello_file();
        assert_eq!(verify_file(f.path(), &HashList::default()).unwrap(), Verdict::Ok);
    }

    #[test]
    fn matching_digest_passes() {
        let f = hello_file();
        let mut hashes = HashList::default();
        hashes.push(HashString::new(HashKind::Sha256, HELLO_SHA256));
        assert_eq!(verify_file(f.path(), &hashes).unwrap(), Verdict::Ok);
    }

    #[test]
    fn mismatch_is_reported_with_both_digests() {
        let f = hello_file();
        let mut hashes = HashList::default();
        hashes.push(HashString::new(HashKind::Sha256, "00".repeat(32)));
        match verify_file(f.path(), &hashes).unwrap() {
            Verdict::Mismatch { kind, expected, actual } => {
                assert_eq!(kind, "SHA256");
                assert_eq!(expected, "00".repeat(32));
                assert_eq!(actual, HELLO_SHA256);
            }
            Verdict::Ok => panic!("expected mismatch"),
        }
    }

    #[test]
    fn missing_file_is_an_error() {
        let mut hashes = HashList::default();
        hashes.push(HashString::new(HashKind::Sha256, HELLO_SHA256));
        assert!(verify_file(Path::new("/nonexistent/paq-test"), &hashes).is_err());
    }
}
