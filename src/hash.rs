//! Content digests sent in `SendHashes`.

use clap::ValueEnum;

/// Digest algorithm used to answer `CompareFiles`.
pub trait HashPolicy: Send + Sync {
    fn name(&self) -> &'static str;
    fn digest(&self, contents: &[u8]) -> Vec<u8>;
}

/// 32-byte Blake3 digest.
#[derive(Debug, Clone, Copy, Default)]
pub struct Blake3;

impl HashPolicy for Blake3 {
    fn name(&self) -> &'static str {
        "blake3"
    }

    fn digest(&self, contents: &[u8]) -> Vec<u8> {
        blake3::hash(contents).as_bytes().to_vec()
    }
}

/// 8-byte XXH3, a cheap integrity check rather than a cryptographic one.
#[derive(Debug, Clone, Copy, Default)]
pub struct Xxh3;

impl HashPolicy for Xxh3 {
    fn name(&self) -> &'static str {
        "xxh3"
    }

    fn digest(&self, contents: &[u8]) -> Vec<u8> {
        xxhash_rust::xxh3::xxh3_64(contents).to_be_bytes().to_vec()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum HashAlgorithm {
    #[default]
    Blake3,
    Xxh3,
}

impl HashAlgorithm {
    pub fn policy(self) -> Box<dyn HashPolicy> {
        match self {
            HashAlgorithm::Blake3 => Box::new(Blake3),
            HashAlgorithm::Xxh3 => Box::new(Xxh3),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_widths() {
        assert_eq!(Blake3.digest(b"hello world").len(), 32);
        assert_eq!(Xxh3.digest(b"hello world").len(), 8);
    }

    #[test]
    fn digests_are_deterministic_and_content_sensitive() {
        for policy in [HashAlgorithm::Blake3.policy(), HashAlgorithm::Xxh3.policy()] {
            assert_eq!(policy.digest(b"abc"), policy.digest(b"abc"), "{}", policy.name());
            assert_ne!(policy.digest(b"abc"), policy.digest(b"abd"), "{}", policy.name());
        }
    }
}
