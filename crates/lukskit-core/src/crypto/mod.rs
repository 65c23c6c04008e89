//! Pluggable cryptographic primitives consumed by the header codec and the
//! key-slot manager. `RustCrypto` backs everything with the RustCrypto crates.

mod sector;
mod spec;

use crate::error::{LuksError, LuksResult};
use hmac::Hmac;
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha512};

use sector::{crypt_sectors, Direction};

pub use sector::SECTOR_SIZE;
pub use spec::{CipherMode, CipherSpec, HashSpec, IvGenerator, SUPPORTED_CIPHERS};

/// Primitive operations the LUKS machinery needs from a crypto backend.
pub trait CryptoProvider {
    /// Fill `buf` from a cryptographically secure source.
    fn fill_random(&self, buf: &mut [u8]) -> LuksResult<()>;

    /// Hash the concatenation of `parts`.
    fn hash(&self, hash: HashSpec, parts: &[&[u8]]) -> LuksResult<Vec<u8>>;

    /// PBKDF2-HMAC over `hash`, filling `out` entirely.
    fn pbkdf2(
        &self,
        hash: HashSpec,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        out: &mut [u8],
    ) -> LuksResult<()>;

    /// Encrypt whole sectors in place; IVs count from `first_sector`.
    fn encrypt_sectors(
        &self,
        cipher: &CipherSpec,
        key: &[u8],
        first_sector: u64,
        buf: &mut [u8],
    ) -> LuksResult<()>;

    fn decrypt_sectors(
        &self,
        cipher: &CipherSpec,
        key: &[u8],
        first_sector: u64,
        buf: &mut [u8],
    ) -> LuksResult<()>;
}

/// Software provider built on the RustCrypto crates and the OS RNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct RustCrypto;

impl CryptoProvider for RustCrypto {
    fn fill_random(&self, buf: &mut [u8]) -> LuksResult<()> {
        OsRng
            .try_fill_bytes(buf)
            .map_err(|err| LuksError::Crypto(format!("random source unavailable: {err}")))
    }

    fn hash(&self, hash: HashSpec, parts: &[&[u8]]) -> LuksResult<Vec<u8>> {
        Ok(match hash {
            HashSpec::Sha1 => digest::<Sha1>(parts),
            HashSpec::Sha256 => digest::<Sha256>(parts),
            HashSpec::Sha512 => digest::<Sha512>(parts),
        })
    }

    fn pbkdf2(
        &self,
        hash: HashSpec,
        password: &[u8],
        salt: &[u8],
        iterations: u32,
        out: &mut [u8],
    ) -> LuksResult<()> {
        if iterations == 0 {
            return Err(LuksError::InvalidArgument(
                "PBKDF2 iteration count must be positive".into(),
            ));
        }
        match hash {
            HashSpec::Sha1 => pbkdf2::pbkdf2::<Hmac<Sha1>>(password, salt, iterations, out),
            HashSpec::Sha256 => pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, iterations, out),
            HashSpec::Sha512 => pbkdf2::pbkdf2::<Hmac<Sha512>>(password, salt, iterations, out),
        }
        .map_err(|err| LuksError::Crypto(format!("pbkdf2: {err}")))
    }

    fn encrypt_sectors(
        &self,
        cipher: &CipherSpec,
        key: &[u8],
        first_sector: u64,
        buf: &mut [u8],
    ) -> LuksResult<()> {
        crypt_sectors(cipher, key, first_sector, buf, Direction::Encrypt)
    }

    fn decrypt_sectors(
        &self,
        cipher: &CipherSpec,
        key: &[u8],
        first_sector: u64,
        buf: &mut [u8],
    ) -> LuksResult<()> {
        crypt_sectors(cipher, key, first_sector, buf, Direction::Decrypt)
    }
}

fn digest<D: Digest>(parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}
