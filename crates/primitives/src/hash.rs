use ripemd::{Digest as RipemdDigest, Ripemd160};
use sha2::Sha256;

use crate::Hash256;

pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

pub fn sha256d(data: &[u8]) -> Hash256 {
    let first = Sha256::digest(data);
    let second = Sha256::digest(first);
    let mut out = [0u8; 32];
    out.copy_from_slice(&second);
    out
}

pub fn hash160(data: &[u8]) -> [u8; 20] {
    let sha = sha256(data);
    let digest = Ripemd160::digest(sha);
    let mut out = [0u8; 20];
    out.copy_from_slice(&digest);
    out
}

/// SHA-256 over a length-prefixed domain tag followed by each part in order.
pub fn tagged_sha256(tag: &[u8], parts: &[&[u8]]) -> Hash256 {
    let mut hasher = Sha256::new();
    hasher.update([tag.len() as u8]);
    hasher.update(tag);
    for part in parts {
        hasher.update(part);
    }
    let mut out = [0u8; 32];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tagged_hash_separates_domains() {
        let a = tagged_sha256(b"account", &[&[1, 2, 3]]);
        let b = tagged_sha256(b"address", &[&[1, 2, 3]]);
        assert_ne!(a, b);
        assert_eq!(a, tagged_sha256(b"account", &[[1u8].as_slice(), [2u8, 3].as_slice()]));
    }
}
