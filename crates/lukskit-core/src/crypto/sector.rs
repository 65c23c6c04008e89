//! Sector-granular AES transforms matching dm-crypt's cipher modes.

use super::spec::{CipherMode, CipherSpec, HashSpec, IvGenerator};
use crate::error::{LuksError, LuksResult};
use aes::cipher::{BlockCipher, BlockDecrypt, BlockEncrypt};
use aes::{Aes128, Aes192, Aes256, Block};
use cbc::cipher::block_padding::NoPadding;
use cbc::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use sha2::{Digest, Sha256};
use xts_mode::Xts128;
use zeroize::Zeroizing;

pub const SECTOR_SIZE: usize = 512;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Direction {
    Encrypt,
    Decrypt,
}

/// AES with the key length picked at runtime.
enum AesBlock {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

impl AesBlock {
    fn new(key: &[u8]) -> LuksResult<Self> {
        let invalid = |_| LuksError::Crypto(format!("invalid AES key length {}", key.len()));
        match key.len() {
            16 => Aes128::new_from_slice(key).map(AesBlock::Aes128).map_err(invalid),
            24 => Aes192::new_from_slice(key).map(AesBlock::Aes192).map_err(invalid),
            32 => Aes256::new_from_slice(key).map(AesBlock::Aes256).map_err(invalid),
            other => Err(LuksError::Crypto(format!("invalid AES key length {other}"))),
        }
    }

    fn apply(&self, block: &mut [u8], direction: Direction) {
        let block = Block::from_mut_slice(block);
        match (self, direction) {
            (AesBlock::Aes128(c), Direction::Encrypt) => c.encrypt_block(block),
            (AesBlock::Aes128(c), Direction::Decrypt) => c.decrypt_block(block),
            (AesBlock::Aes192(c), Direction::Encrypt) => c.encrypt_block(block),
            (AesBlock::Aes192(c), Direction::Decrypt) => c.decrypt_block(block),
            (AesBlock::Aes256(c), Direction::Encrypt) => c.encrypt_block(block),
            (AesBlock::Aes256(c), Direction::Decrypt) => c.decrypt_block(block),
        }
    }
}

/// Encrypt or decrypt `buf` in place, numbering sectors from `first_sector`.
pub(crate) fn crypt_sectors(
    spec: &CipherSpec,
    key: &[u8],
    first_sector: u64,
    buf: &mut [u8],
    direction: Direction,
) -> LuksResult<()> {
    if buf.len() % SECTOR_SIZE != 0 {
        return Err(LuksError::InvalidArgument(format!(
            "buffer of {} bytes is not sector aligned",
            buf.len()
        )));
    }
    spec.check_key_size(key.len())?;

    match spec.mode {
        CipherMode::Ecb => {
            let cipher = AesBlock::new(key)?;
            for block in buf.chunks_exact_mut(16) {
                cipher.apply(block, direction);
            }
            Ok(())
        }
        CipherMode::Cbc(ivgen) => {
            let essiv = essiv_cipher(ivgen, key)?;
            for (index, sector) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
                let iv = sector_iv(ivgen, essiv.as_ref(), first_sector + index as u64);
                match key.len() {
                    16 => cbc_sector::<Aes128>(key, &iv, sector, direction)?,
                    24 => cbc_sector::<Aes192>(key, &iv, sector, direction)?,
                    _ => cbc_sector::<Aes256>(key, &iv, sector, direction)?,
                }
            }
            Ok(())
        }
        CipherMode::Xts(ivgen) => {
            let (k1, k2) = key.split_at(key.len() / 2);
            match key.len() {
                32 => xts_sectors(
                    Xts128::new(Aes128::new_from_slice(k1).map_err(xts_key)?, Aes128::new_from_slice(k2).map_err(xts_key)?),
                    ivgen,
                    first_sector,
                    buf,
                    direction,
                ),
                _ => xts_sectors(
                    Xts128::new(Aes256::new_from_slice(k1).map_err(xts_key)?, Aes256::new_from_slice(k2).map_err(xts_key)?),
                    ivgen,
                    first_sector,
                    buf,
                    direction,
                ),
            }
            Ok(())
        }
    }
}

fn xts_key(err: aes::cipher::InvalidLength) -> LuksError {
    LuksError::Crypto(format!("xts key: {err}"))
}

fn xts_sectors<C>(xts: Xts128<C>, ivgen: IvGenerator, first_sector: u64, buf: &mut [u8], direction: Direction)
where
    C: BlockEncrypt + BlockDecrypt + BlockCipher,
{
    for (index, sector) in buf.chunks_exact_mut(SECTOR_SIZE).enumerate() {
        let tweak = sector_iv(ivgen, None, first_sector + index as u64);
        match direction {
            Direction::Encrypt => xts.encrypt_sector(sector, tweak),
            Direction::Decrypt => xts.decrypt_sector(sector, tweak),
        }
    }
}

fn cbc_sector<C>(key: &[u8], iv: &[u8; 16], sector: &mut [u8], direction: Direction) -> LuksResult<()>
where
    C: BlockCipher + BlockEncryptMut + BlockDecryptMut + KeyInit,
{
    let len = sector.len();
    match direction {
        Direction::Encrypt => {
            cbc::Encryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| LuksError::Crypto(format!("cbc init: {e}")))?
                .encrypt_padded_mut::<NoPadding>(sector, len)
                .map_err(|e| LuksError::Crypto(format!("cbc encrypt: {e:?}")))?;
        }
        Direction::Decrypt => {
            cbc::Decryptor::<C>::new_from_slices(key, iv)
                .map_err(|e| LuksError::Crypto(format!("cbc init: {e}")))?
                .decrypt_padded_mut::<NoPadding>(sector)
                .map_err(|e| LuksError::Crypto(format!("cbc decrypt: {e:?}")))?;
        }
    }
    Ok(())
}

/// ESSIV salt cipher: AES keyed with `hash(volume key)`.
fn essiv_cipher(ivgen: IvGenerator, key: &[u8]) -> LuksResult<Option<AesBlock>> {
    match ivgen {
        IvGenerator::Essiv(HashSpec::Sha256) => {
            let salt = Zeroizing::new(Sha256::digest(key).to_vec());
            AesBlock::new(&salt).map(Some)
        }
        IvGenerator::Essiv(other) => Err(LuksError::UnsupportedCipher(format!("essiv:{other}"))),
        _ => Ok(None),
    }
}

fn sector_iv(ivgen: IvGenerator, essiv: Option<&AesBlock>, sector: u64) -> [u8; 16] {
    let mut iv = [0u8; 16];
    match ivgen {
        IvGenerator::Plain => iv[..4].copy_from_slice(&(sector as u32).to_le_bytes()),
        IvGenerator::Plain64 => iv[..8].copy_from_slice(&sector.to_le_bytes()),
        IvGenerator::Essiv(_) => {
            iv[..8].copy_from_slice(&sector.to_le_bytes());
            if let Some(cipher) = essiv {
                cipher.apply(&mut iv, Direction::Encrypt);
            }
        }
    }
    iv
}
