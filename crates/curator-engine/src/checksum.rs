//! Checksum validation for downloaded files.
//!
//! A mismatch is a download failure, not a separate error class: the
//! orchestrator handles it exactly like a broken transfer.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use crate::error::FetchError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChecksumAlgorithm {
    Md5,
    Sha1,
    Sha256,
    Sha512,
}

impl std::fmt::Display for ChecksumAlgorithm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Md5 => "md5",
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
            Self::Sha512 => "sha512",
        };
        f.write_str(s)
    }
}

impl FromStr for ChecksumAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "md5" => Ok(Self::Md5),
            "sha1" => Ok(Self::Sha1),
            "sha256" => Ok(Self::Sha256),
            "sha512" => Ok(Self::Sha512),
            other => Err(format!("unknown checksum algorithm: {other}")),
        }
    }
}

/// Expected digest for a produced file.
#[derive(Debug, Clone)]
pub struct Checksum {
    pub algorithm: ChecksumAlgorithm,
    /// Lowercase hex digest.
    pub digest: String,
}

impl Checksum {
    pub fn new(algorithm: ChecksumAlgorithm, digest: impl Into<String>) -> Self {
        Self {
            algorithm,
            digest: digest.into().to_ascii_lowercase(),
        }
    }

    pub fn md5(digest: impl Into<String>) -> Self {
        Self::new(ChecksumAlgorithm::Md5, digest)
    }

    pub fn sha1(digest: impl Into<String>) -> Self {
        Self::new(ChecksumAlgorithm::Sha1, digest)
    }

    pub fn sha256(digest: impl Into<String>) -> Self {
        Self::new(ChecksumAlgorithm::Sha256, digest)
    }

    pub fn sha512(digest: impl Into<String>) -> Self {
        Self::new(ChecksumAlgorithm::Sha512, digest)
    }

    /// Validate a file against the expected digest.
    pub fn verify(&self, path: &Path) -> Result<(), FetchError> {
        let actual = hex_digest(self.algorithm, path)?;
        if actual == self.digest {
            Ok(())
        } else {
            Err(FetchError::Checksum {
                algorithm: self.algorithm,
                expected: self.digest.clone(),
                actual,
            })
        }
    }
}

/// Streaming hex digest of a file.
pub fn hex_digest(algorithm: ChecksumAlgorithm, path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    match algorithm {
        ChecksumAlgorithm::Md5 => digest_reader::<Md5>(&mut file),
        ChecksumAlgorithm::Sha1 => digest_reader::<Sha1>(&mut file),
        ChecksumAlgorithm::Sha256 => digest_reader::<Sha256>(&mut file),
        ChecksumAlgorithm::Sha512 => digest_reader::<Sha512>(&mut file),
    }
}

fn digest_reader<D: Digest>(reader: &mut impl Read) -> io::Result<String> {
    let mut hasher = D::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = reader.read(&mut buf)?;
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

    fn abc_file(dir: &tempfile::TempDir) -> std::path::PathBuf {
        let path = dir.path().join("abc.txt");
        std::fs::write(&path, b"abc").unwrap();
        path
    }

    #[test]
    fn md5_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = abc_file(&dir);
        assert_eq!(
            hex_digest(ChecksumAlgorithm::Md5, &path).unwrap(),
            "900150983cd24fb0d6963f7d28e17f72"
        );
    }

    #[test]
    fn sha1_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = abc_file(&dir);
        assert_eq!(
            hex_digest(ChecksumAlgorithm::Sha1, &path).unwrap(),
            "a9993e364706816aba3e25717850c26c9cd0d89d"
        );
    }

    #[test]
    fn sha256_known_vector() {
        let dir = tempfile::tempdir().unwrap();
        let path = abc_file(&dir);
        assert_eq!(
            hex_digest(ChecksumAlgorithm::Sha256, &path).unwrap(),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn verify_accepts_matching_digest() {
        let dir = tempfile::tempdir().unwrap();
        let path = abc_file(&dir);
        let checksum = Checksum::sha256(
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad",
        );
        checksum.verify(&path).unwrap();
    }

    #[test]
    fn verify_rejects_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        let path = abc_file(&dir);
        let checksum = Checksum::md5("ffffffffffffffffffffffffffffffff");
        match checksum.verify(&path) {
            Err(FetchError::Checksum { algorithm, .. }) => {
                assert_eq!(algorithm, ChecksumAlgorithm::Md5);
            }
            other => panic!("expected checksum error, got {other:?}"),
        }
    }

    #[test]
    fn uppercase_digest_normalized() {
        let dir = tempfile::tempdir().unwrap();
        let path = abc_file(&dir);
        let checksum = Checksum::md5("900150983CD24FB0D6963F7D28E17F72");
        checksum.verify(&path).unwrap();
    }

    #[test]
    fn algorithm_from_str() {
        assert_eq!(
            "sha512".parse::<ChecksumAlgorithm>().unwrap(),
            ChecksumAlgorithm::Sha512
        );
        assert!("crc32".parse::<ChecksumAlgorithm>().is_err());
    }
}
