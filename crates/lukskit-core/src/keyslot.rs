//! Passphrase key slots: PBKDF2 calibration, sealing the master key into a
//! slot, and unlocking it again.

use crate::af;
use crate::crypto::{CryptoProvider, HashSpec, SECTOR_SIZE};
use crate::device::BlockDevice;
use crate::error::{LuksError, LuksResult};
use crate::header::{
    af_sectors, KeySlot, LuksHeader, SlotState, LUKS_DIGEST_SIZE, LUKS_MIN_ITERATIONS,
    LUKS_SALT_SIZE,
};
use log::debug;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

const PROBE_START: u32 = 1000;
const PROBE_MIN_ELAPSED: Duration = Duration::from_millis(50);
const PROBE_MAX: u32 = 1 << 26;

/// Volume master key. Scrubbed from memory on drop.
#[derive(Clone)]
pub struct MasterKey(Zeroizing<Vec<u8>>);

impl MasterKey {
    pub fn generate<K: CryptoProvider + ?Sized>(crypto: &K, len: usize) -> LuksResult<Self> {
        let mut key = Zeroizing::new(vec![0u8; len]);
        crypto.fill_random(&mut key)?;
        Ok(Self(key))
    }

    pub fn from_bytes(bytes: &[u8]) -> Self {
        Self(Zeroizing::new(bytes.to_vec()))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MasterKey([redacted; {}])", self.0.len())
    }
}

/// A populated slot descriptor plus its encrypted key material, ready to be
/// written with [`KeySlotManager::store`].
pub struct SealedSlot {
    pub slot: KeySlot,
    pub material: Zeroizing<Vec<u8>>,
}

/// Slot operations bound to one crypto provider.
pub struct KeySlotManager<'a, K: CryptoProvider + ?Sized> {
    crypto: &'a K,
    rates: RefCell<HashMap<HashSpec, f64>>,
}

impl<'a, K: CryptoProvider + ?Sized> KeySlotManager<'a, K> {
    pub fn new(crypto: &'a K) -> Self {
        Self {
            crypto,
            rates: RefCell::new(HashMap::new()),
        }
    }

    /// PBKDF2 iterations that take roughly `iteration_time_ms` on this host,
    /// never fewer than 1000. The per-hash rate is measured once per manager.
    pub fn benchmark_iterations(&self, hash: HashSpec, iteration_time_ms: u64) -> LuksResult<u32> {
        let rate = self.iterations_per_ms(hash)?;
        let scaled = (rate * iteration_time_ms as f64).min(f64::from(u32::MAX));
        Ok((scaled as u32).max(LUKS_MIN_ITERATIONS))
    }

    fn iterations_per_ms(&self, hash: HashSpec) -> LuksResult<f64> {
        if let Some(rate) = self.rates.borrow().get(&hash) {
            return Ok(*rate);
        }

        let mut out = Zeroizing::new(vec![0u8; hash.digest_len()]);
        let mut probe = PROBE_START;
        let rate = loop {
            let started = Instant::now();
            self.crypto
                .pbkdf2(hash, b"lukskit-probe", &[0u8; LUKS_SALT_SIZE], probe, &mut out)?;
            let elapsed = started.elapsed();
            if elapsed >= PROBE_MIN_ELAPSED || probe >= PROBE_MAX {
                break f64::from(probe) / (elapsed.as_secs_f64() * 1000.0).max(0.001);
            }
            probe = probe.saturating_mul(2);
        };
        debug!("pbkdf2-{hash}: {rate:.0} iterations/ms");
        self.rates.borrow_mut().insert(hash, rate);
        Ok(rate)
    }

    /// PBKDF2 over the master key with the header's digest parameters.
    pub fn master_key_digest(
        &self,
        hash: HashSpec,
        key: &MasterKey,
        salt: &[u8],
        iterations: u32,
    ) -> LuksResult<[u8; LUKS_DIGEST_SIZE]> {
        let mut digest = [0u8; LUKS_DIGEST_SIZE];
        self.crypto
            .pbkdf2(hash, key.as_bytes(), salt, iterations, &mut digest)?;
        Ok(digest)
    }

    /// Fill the header's digest salt, iterations and digest for `key`.
    /// Iterations are calibrated to an eighth of `iteration_time_ms`.
    pub fn seal_digest(
        &self,
        header: &mut LuksHeader,
        key: &MasterKey,
        iteration_time_ms: u64,
    ) -> LuksResult<()> {
        self.crypto.fill_random(&mut header.mk_digest_salt)?;
        header.mk_digest_iterations = self.benchmark_iterations(header.hash, iteration_time_ms / 8)?;
        header.mk_digest = self.master_key_digest(
            header.hash,
            key,
            &header.mk_digest_salt,
            header.mk_digest_iterations,
        )?;
        Ok(())
    }

    /// Constant-time check of `candidate` against the header digest.
    pub fn verify(&self, header: &LuksHeader, candidate: &MasterKey) -> LuksResult<bool> {
        let digest = self.master_key_digest(
            header.hash,
            candidate,
            &header.mk_digest_salt,
            header.mk_digest_iterations,
        )?;
        Ok(bool::from(digest[..].ct_eq(&header.mk_digest[..])))
    }

    /// Derive a slot key from `passphrase`, split `key` into `stripes` and
    /// encrypt the stripes under the slot key.
    pub fn derive_and_split(
        &self,
        header: &LuksHeader,
        key: &MasterKey,
        passphrase: &[u8],
        iteration_time_ms: u64,
        key_material_offset: u32,
        stripes: u32,
    ) -> LuksResult<SealedSlot> {
        if key.len() != header.key_len() {
            return Err(LuksError::InvalidArgument(format!(
                "master key is {} bytes, header expects {}",
                key.len(),
                header.key_bytes
            )));
        }

        let mut salt = [0u8; LUKS_SALT_SIZE];
        self.crypto.fill_random(&mut salt)?;
        let iterations = self.benchmark_iterations(header.hash, iteration_time_ms)?;
        let slot_key = self.slot_key(header, passphrase, &salt, iterations)?;

        let split = af::split(self.crypto, header.hash, key.as_bytes(), stripes)?;
        let sectors = af_sectors(header.key_len(), stripes) as usize;
        let mut material = Zeroizing::new(vec![0u8; sectors * SECTOR_SIZE]);
        material[..split.len()].copy_from_slice(&split);
        self.crypto
            .encrypt_sectors(&header.cipher, &slot_key, 0, &mut material)?;

        Ok(SealedSlot {
            slot: KeySlot {
                state: SlotState::Active,
                iterations,
                salt,
                key_material_offset,
                stripes,
            },
            material,
        })
    }

    /// Write sealed key material to its area on `device`.
    pub fn store(&self, device: &BlockDevice, sealed: &SealedSlot) -> LuksResult<()> {
        device.write_sectors(u64::from(sealed.slot.key_material_offset), &sealed.material)
    }

    /// Unlock slot `index` with `passphrase`.
    pub fn merge(
        &self,
        device: &BlockDevice,
        header: &LuksHeader,
        index: usize,
        passphrase: &[u8],
    ) -> LuksResult<MasterKey> {
        let slot = header.slot(index)?;
        if !slot.is_active() {
            return Err(LuksError::SlotInactive(index));
        }

        let sectors = slot_area(device, header.key_len(), slot, index)?;
        let mut material = Zeroizing::new(vec![0u8; sectors * SECTOR_SIZE]);
        device.read_sectors(u64::from(slot.key_material_offset), &mut material)?;

        let slot_key = self.slot_key(header, passphrase, &slot.salt, slot.iterations)?;
        self.crypto
            .decrypt_sectors(&header.cipher, &slot_key, 0, &mut material)?;
        let merged = af::merge(
            self.crypto,
            header.hash,
            &material,
            header.key_len(),
            slot.stripes,
        )?;
        let candidate = MasterKey(merged);

        if self.verify(header, &candidate)? {
            Ok(candidate)
        } else {
            Err(LuksError::WrongPassphrase)
        }
    }

    /// Try every active slot in ascending order; the first one that opens wins.
    pub fn recover(
        &self,
        device: &BlockDevice,
        header: &LuksHeader,
        passphrase: &[u8],
    ) -> LuksResult<(usize, MasterKey)> {
        for index in header.active_slots() {
            match self.merge(device, header, index, passphrase) {
                Ok(key) => {
                    debug!("key slot {index} unlocked");
                    return Ok((index, key));
                }
                Err(LuksError::WrongPassphrase) => continue,
                Err(err) => return Err(err),
            }
        }
        Err(LuksError::NoMatchingSlot)
    }

    /// Overwrite the slot's key material with random bytes and mark it
    /// inactive. The caller writes the updated header.
    pub fn destroy(
        &self,
        device: &BlockDevice,
        header: &mut LuksHeader,
        index: usize,
    ) -> LuksResult<()> {
        let key_len = header.key_len();
        let slot = header.slot_mut(index)?;
        let sectors = slot_area(device, key_len, slot, index)?;
        let mut noise = vec![0u8; sectors * SECTOR_SIZE];
        self.crypto.fill_random(&mut noise)?;
        device.write_sectors(u64::from(slot.key_material_offset), &noise)?;
        device.sync()?;

        slot.state = SlotState::Inactive;
        slot.iterations = 0;
        slot.salt = [0u8; LUKS_SALT_SIZE];
        Ok(())
    }

    fn slot_key(
        &self,
        header: &LuksHeader,
        passphrase: &[u8],
        salt: &[u8],
        iterations: u32,
    ) -> LuksResult<Zeroizing<Vec<u8>>> {
        let mut key = Zeroizing::new(vec![0u8; header.key_len()]);
        self.crypto
            .pbkdf2(header.hash, passphrase, salt, iterations, &mut key)?;
        Ok(key)
    }
}

/// Sectors of key material for `slot`, refusing areas that run past the
/// end of `device` before anything is allocated for them.
fn slot_area(
    device: &BlockDevice,
    key_len: usize,
    slot: &KeySlot,
    index: usize,
) -> LuksResult<usize> {
    let sectors = af_sectors(key_len, slot.stripes);
    let end = u64::from(slot.key_material_offset) + sectors;
    let available = device.size_sectors()?;
    if end > available {
        return Err(LuksError::InvalidHeader(format!(
            "key slot {index} material ends at sector {end}, device has {available}"
        )));
    }
    usize::try_from(sectors)
        .map_err(|_| LuksError::InvalidHeader(format!("key slot {index} is too large")))
}
