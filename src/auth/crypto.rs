//! Crypto primitives shared by the authentication flows

use crate::{Error, Result};
use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256, Sha512};

/// Hash function selector for [`pbkdf2`], [`hmac`] and [`hash`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    /// SHA-256 (32-byte output)
    Sha256,
    /// SHA-512 (64-byte output)
    Sha512,
}

/// PBKDF2 with HMAC of the given hash, producing `key_len` bytes
pub fn pbkdf2(
    password: &[u8],
    salt: &[u8],
    iterations: u32,
    key_len: usize,
    algorithm: HashAlgorithm,
) -> Result<Vec<u8>> {
    let mut out = vec![0u8; key_len];
    let derived = match algorithm {
        HashAlgorithm::Sha256 => {
            ::pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, &mut out)
        }
        HashAlgorithm::Sha512 => {
            ::pbkdf2::pbkdf2::<Hmac<Sha512>>(password, salt, iterations, &mut out)
        }
    };
    derived.map_err(|e| Error::Authentication(format!("pbkdf2 failed: {}", e)))?;
    Ok(out)
}

/// HMAC of `message` keyed with `key`
pub fn hmac(key: &[u8], message: &[u8], algorithm: HashAlgorithm) -> Result<Vec<u8>> {
    let invalid_key =
        |e: hmac::digest::InvalidLength| Error::Authentication(format!("HMAC key error: {}", e));
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(message);
            Ok(mac.finalize().into_bytes().to_vec())
        }
        HashAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(invalid_key)?;
            mac.update(message);
            Ok(mac.finalize().into_bytes().to_vec())
        }
    }
}

/// Plain digest of `data`
pub fn hash(data: &[u8], algorithm: HashAlgorithm) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
    }
}

/// Constant-time comparison to prevent timing attacks.
///
/// Inputs of different length compare unequal immediately; the length of a secret is not
/// itself secret here (digests and fixed-size keys).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

/// Lowercase hex MD5 of `data`
pub fn md5_hex(data: &[u8]) -> String {
    format!("{:x}", md5::compute(data))
}

/// Postgres' stored form of an MD5 password: `md5hex(password || user)` (no prefix)
pub fn pre_hash_md5_password(user: &str, password: &str) -> String {
    let mut input = Vec::with_capacity(password.len() + user.len());
    input.extend_from_slice(password.as_bytes());
    input.extend_from_slice(user.as_bytes());
    md5_hex(&input)
}

/// Expected client answer to an MD5 challenge, from the pre-hashed password:
/// `"md5" + md5hex(pre_hashed || salt)`
pub fn salt_md5_password(pre_hashed: &str, salt: &[u8; 4]) -> String {
    let mut input = Vec::with_capacity(pre_hashed.len() + 4);
    input.extend_from_slice(pre_hashed.as_bytes());
    input.extend_from_slice(salt);
    format!("md5{}", md5_hex(&input))
}

/// What a client sends in response to an MD5 challenge
pub fn hash_md5_password(user: &str, password: &str, salt: &[u8; 4]) -> String {
    salt_md5_password(&pre_hash_md5_password(user, password), salt)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{:02x}", b)).collect()
    }

    #[test]
    fn test_pbkdf2_sha256_rfc7914_vector() {
        let out = pbkdf2(b"passwd", b"salt", 1, 64, HashAlgorithm::Sha256).unwrap();
        assert_eq!(
            hex(&out[..16]),
            "55ac046e56e3089fec1691c22544b605"
        );
    }

    #[test]
    fn test_pbkdf2_depends_on_algorithm() {
        let a = pbkdf2(b"pw", b"salt", 2, 32, HashAlgorithm::Sha256).unwrap();
        let b = pbkdf2(b"pw", b"salt", 2, 32, HashAlgorithm::Sha512).unwrap();
        assert_eq!(a.len(), 32);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hmac_rfc4231_case_2() {
        let mac = hmac(b"Jefe", b"what do ya want for nothing?", HashAlgorithm::Sha256).unwrap();
        assert_eq!(
            hex(&mac),
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hash_lengths() {
        assert_eq!(hash(b"", HashAlgorithm::Sha256).len(), 32);
        assert_eq!(hash(b"", HashAlgorithm::Sha512).len(), 64);
        assert_eq!(
            hex(&hash(b"abc", HashAlgorithm::Sha256)),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hell"));
        assert!(constant_time_eq(b"", b""));
    }

    #[test]
    fn test_md5_password_layers() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");

        let pre = pre_hash_md5_password("u", "p");
        assert_eq!(pre, md5_hex(b"pu"));

        let salt = [1, 2, 3, 4];
        let mut salted = pre.as_bytes().to_vec();
        salted.extend_from_slice(&salt);
        let expected = format!("md5{}", md5_hex(&salted));
        assert_eq!(hash_md5_password("u", "p", &salt), expected);
        assert_eq!(expected.len(), 35);
    }
}
