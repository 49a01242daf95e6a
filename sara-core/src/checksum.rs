//! Checksums over file content: CRC-32, MD5, SHA-1 and SHA-256.

use std::io::Read;

use md5::Md5;
use sha1::Sha1;
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};
use crate::flags::ChecksumType;

const READ_BUF: usize = 64 * 1024;

/// Hash everything `input` yields with algorithm `ct`.
///
/// CRC-32 is returned as 4 big-endian bytes. `ChecksumType::None` is not an
/// algorithm and fails with `UnsupportedChecksum`.
pub fn hash<R: Read>(ct: ChecksumType, input: R) -> Result<Vec<u8>> {
    let digest = match ct {
        ChecksumType::None => return Err(Error::UnsupportedChecksum(ct.token().to_string())),
        ChecksumType::Crc32 => crc32(input)?,
        ChecksumType::Md5 => digest::<Md5, _>(input)?,
        ChecksumType::Sha1 => digest::<Sha1, _>(input)?,
        ChecksumType::Sha256 => digest::<Sha256, _>(input)?,
    };
    let expected = ct.expected_len();
    if digest.len() != expected {
        return Err(Error::ChecksumLengthMismatch {
            expected,
            got: digest.len(),
        });
    }
    Ok(digest)
}

/// Hash `input` and compare against `expected`.
pub fn verify<R: Read>(ct: ChecksumType, input: R, expected: &[u8]) -> Result<bool> {
    Ok(hash(ct, input)? == expected)
}

fn digest<D: Digest, R: Read>(mut input: R) -> Result<Vec<u8>> {
    let mut hasher = D::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_vec())
}

fn crc32<R: Read>(mut input: R) -> Result<Vec<u8>> {
    let mut hasher = crc32fast::Hasher::new();
    let mut buf = vec![0u8; READ_BUF];
    loop {
        let n = input.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(hasher.finalize().to_be_bytes().to_vec())
}
