//! Anti-forensic information splitter.
//!
//! A key of `n` bytes is expanded into `stripes * n` bytes such that every
//! stripe is needed to recover it; destroying any part of the area destroys
//! the key.

use crate::crypto::{CryptoProvider, HashSpec};
use crate::error::{LuksError, LuksResult};
use zeroize::Zeroizing;

/// Split `key` into `stripes` stripes, filling the first `stripes - 1` from
/// the provider's random source.
pub fn split<K: CryptoProvider + ?Sized>(
    crypto: &K,
    hash: HashSpec,
    key: &[u8],
    stripes: u32,
) -> LuksResult<Zeroizing<Vec<u8>>> {
    let block = key.len();
    check_geometry(block, stripes)?;
    let mut out = Zeroizing::new(vec![0u8; block * stripes as usize]);
    let (random, last) = out.split_at_mut(block * (stripes as usize - 1));
    crypto.fill_random(random)?;

    let acc = accumulate(crypto, hash, random, block)?;
    for (dst, (a, k)) in last.iter_mut().zip(acc.iter().zip(key)) {
        *dst = a ^ k;
    }
    Ok(out)
}

/// Recover a `block`-byte key from split material.
pub fn merge<K: CryptoProvider + ?Sized>(
    crypto: &K,
    hash: HashSpec,
    material: &[u8],
    block: usize,
    stripes: u32,
) -> LuksResult<Zeroizing<Vec<u8>>> {
    check_geometry(block, stripes)?;
    let needed = block * stripes as usize;
    if material.len() < needed {
        return Err(LuksError::InvalidArgument(format!(
            "split material holds {} bytes, {stripes} stripes of {block} need {needed}",
            material.len()
        )));
    }
    let (head, tail) = material[..needed].split_at(block * (stripes as usize - 1));
    let acc = accumulate(crypto, hash, head, block)?;
    let key = acc.iter().zip(tail).map(|(a, t)| a ^ t).collect();
    Ok(Zeroizing::new(key))
}

fn check_geometry(block: usize, stripes: u32) -> LuksResult<()> {
    if block == 0 || stripes == 0 {
        return Err(LuksError::InvalidArgument(
            "key length and stripe count must be positive".into(),
        ));
    }
    Ok(())
}

/// XOR each stripe into the accumulator and diffuse after every one.
fn accumulate<K: CryptoProvider + ?Sized>(
    crypto: &K,
    hash: HashSpec,
    stripes: &[u8],
    block: usize,
) -> LuksResult<Zeroizing<Vec<u8>>> {
    let mut acc = Zeroizing::new(vec![0u8; block]);
    for stripe in stripes.chunks_exact(block) {
        for (a, s) in acc.iter_mut().zip(stripe) {
            *a ^= s;
        }
        acc = diffuse(crypto, hash, &acc)?;
    }
    Ok(acc)
}

/// Hash every digest-sized chunk prefixed by its big-endian index; the last
/// chunk keeps only as many bytes as it had.
fn diffuse<K: CryptoProvider + ?Sized>(
    crypto: &K,
    hash: HashSpec,
    src: &[u8],
) -> LuksResult<Zeroizing<Vec<u8>>> {
    let mut out = Zeroizing::new(vec![0u8; src.len()]);
    for (index, (chunk, dst)) in src
        .chunks(hash.digest_len())
        .zip(out.chunks_mut(hash.digest_len()))
        .enumerate()
    {
        let iv = (index as u32).to_be_bytes();
        let digest = Zeroizing::new(crypto.hash(hash, &[&iv[..], chunk])?);
        dst.copy_from_slice(&digest[..dst.len()]);
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::RustCrypto;

    #[test]
    fn merge_recovers_split_key() {
        let key: Vec<u8> = (0u8..32).collect();
        for hash in [HashSpec::Sha1, HashSpec::Sha256, HashSpec::Sha512] {
            let material = split(&RustCrypto, hash, &key, 4000).unwrap();
            assert_eq!(material.len(), 32 * 4000);
            let merged = merge(&RustCrypto, hash, &material, 32, 4000).unwrap();
            assert_eq!(&merged[..], &key[..]);
        }
    }

    #[test]
    fn damaged_stripe_breaks_merge() {
        let key = [0x7fu8; 16];
        let mut material = split(&RustCrypto, HashSpec::Sha1, &key, 10).unwrap();
        material[3] ^= 0x01;
        let merged = merge(&RustCrypto, HashSpec::Sha1, &material, 16, 10).unwrap();
        assert_ne!(&merged[..], &key[..]);
    }

    #[test]
    fn single_stripe_is_identity() {
        let key = [0xa5u8; 24];
        let material = split(&RustCrypto, HashSpec::Sha256, &key, 1).unwrap();
        assert_eq!(&material[..], &key[..]);
    }

    #[test]
    fn merge_rejects_short_material() {
        let err = merge(&RustCrypto, HashSpec::Sha1, &[0u8; 10], 32, 2).unwrap_err();
        assert!(matches!(err, LuksError::InvalidArgument(_)));
    }
}
