//! LUKS1 on-disk header codec and key-material layout.

use crate::crypto::{CipherSpec, HashSpec, SECTOR_SIZE};
use crate::error::{LuksError, LuksResult};
use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read, Write};

pub const LUKS_MAGIC: [u8; 6] = *b"LUKS\xBA\xBE";
pub const LUKS_VERSION: u16 = 1;
pub const LUKS_PHDR_SIZE: usize = 592;
pub const LUKS_NUMKEYS: usize = 8;
pub const LUKS_STRIPES: u32 = 4000;
pub const LUKS_DIGEST_SIZE: usize = 20;
pub const LUKS_SALT_SIZE: usize = 32;
pub const LUKS_KEY_ENABLED: u32 = 0x00AC_71F3;
pub const LUKS_KEY_DISABLED: u32 = 0x0000_DEAD;
/// Key-material areas start on 4 KiB boundaries.
pub const LUKS_ALIGN_KEYSLOTS: u64 = 4096;
pub const LUKS_MIN_ITERATIONS: u32 = 1000;
/// Default payload alignment in sectors (1 MiB).
pub const DEFAULT_ALIGN_PAYLOAD: u32 = 2048;

const NAME_LEN: usize = 32;
const UUID_LEN: usize = 40;
const KEY_SLOTS_OFFSET: u64 = 208;
const SLOT_ALIGN_SECTORS: u64 = LUKS_ALIGN_KEYSLOTS / SECTOR_SIZE as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Active,
    Inactive,
}

/// Per-index status as reported by `LuksHeader::slot_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotStatus {
    Invalid,
    Inactive,
    Active,
    /// The only active slot left on the volume.
    ActiveLast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySlot {
    pub state: SlotState,
    pub iterations: u32,
    pub salt: [u8; LUKS_SALT_SIZE],
    /// Start of the key-material area, in sectors.
    pub key_material_offset: u32,
    pub stripes: u32,
}

impl KeySlot {
    pub fn inactive(key_material_offset: u32, stripes: u32) -> Self {
        Self {
            state: SlotState::Inactive,
            iterations: 0,
            salt: [0u8; LUKS_SALT_SIZE],
            key_material_offset,
            stripes,
        }
    }

    pub fn is_active(&self) -> bool {
        self.state == SlotState::Active
    }
}

/// Sector positions of the eight key-material areas and the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyLayout {
    pub slot_offsets: [u32; LUKS_NUMKEYS],
    pub payload_offset: u32,
}

impl KeyLayout {
    /// Lay out key material for `key_bytes` split into `stripes` stripes.
    ///
    /// Every area starts on an 8-sector boundary; the payload follows the last
    /// area, rounded up to `align_payload` sectors when that is non-zero.
    pub fn compute(key_bytes: usize, stripes: u32, align_payload: u32) -> LuksResult<Self> {
        if key_bytes == 0 || stripes == 0 {
            return Err(LuksError::InvalidArgument(
                "key size and stripe count must be positive".into(),
            ));
        }
        if stripes > LUKS_STRIPES {
            return Err(LuksError::InvalidArgument(format!(
                "{stripes} stripes requested, at most {LUKS_STRIPES} allowed"
            )));
        }
        let area = af_sectors(key_bytes, stripes);
        let mut slot_offsets = [0u32; LUKS_NUMKEYS];
        let mut cursor = SLOT_ALIGN_SECTORS;
        for offset in slot_offsets.iter_mut() {
            *offset = to_sector_u32(cursor)?;
            cursor = round_up(cursor + area, SLOT_ALIGN_SECTORS);
        }
        let payload = if align_payload > 0 {
            round_up(cursor, u64::from(align_payload))
        } else {
            cursor
        };
        Ok(Self {
            slot_offsets,
            payload_offset: to_sector_u32(payload)?,
        })
    }
}

/// Sectors occupied by one slot's key material.
pub fn af_sectors(key_bytes: usize, stripes: u32) -> u64 {
    let bytes = key_bytes as u64 * u64::from(stripes);
    bytes.div_ceil(SECTOR_SIZE as u64)
}

fn round_up(value: u64, align: u64) -> u64 {
    value.div_ceil(align) * align
}

fn to_sector_u32(value: u64) -> LuksResult<u32> {
    u32::try_from(value)
        .map_err(|_| LuksError::InvalidArgument(format!("sector offset {value} exceeds 32 bits")))
}

/// Decoded LUKS1 partition header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuksHeader {
    pub cipher: CipherSpec,
    pub hash: HashSpec,
    /// Start of the encrypted payload, in sectors.
    pub payload_offset: u32,
    pub key_bytes: u32,
    pub mk_digest: [u8; LUKS_DIGEST_SIZE],
    pub mk_digest_salt: [u8; LUKS_SALT_SIZE],
    pub mk_digest_iterations: u32,
    pub uuid: String,
    pub key_slots: [KeySlot; LUKS_NUMKEYS],
}

impl LuksHeader {
    /// Fresh header with every slot inactive and positioned per `layout`.
    pub fn new(
        cipher: CipherSpec,
        hash: HashSpec,
        key_bytes: u32,
        uuid: String,
        layout: &KeyLayout,
        stripes: u32,
    ) -> Self {
        Self {
            cipher,
            hash,
            payload_offset: layout.payload_offset,
            key_bytes,
            mk_digest: [0u8; LUKS_DIGEST_SIZE],
            mk_digest_salt: [0u8; LUKS_SALT_SIZE],
            mk_digest_iterations: 0,
            uuid,
            key_slots: layout
                .slot_offsets
                .map(|offset| KeySlot::inactive(offset, stripes)),
        }
    }

    pub fn encode(&self) -> LuksResult<[u8; LUKS_PHDR_SIZE]> {
        let mut out = [0u8; LUKS_PHDR_SIZE];
        let mut cursor = Cursor::new(&mut out[..]);

        cursor.write_all(&LUKS_MAGIC)?;
        cursor.write_u16::<BigEndian>(LUKS_VERSION)?;
        write_name(&mut cursor, "cipher name", self.cipher.cipher_name(), NAME_LEN)?;
        write_name(&mut cursor, "cipher mode", &self.cipher.mode_string(), NAME_LEN)?;
        write_name(&mut cursor, "hash spec", self.hash.as_str(), NAME_LEN)?;
        cursor.write_u32::<BigEndian>(self.payload_offset)?;
        cursor.write_u32::<BigEndian>(self.key_bytes)?;
        cursor.write_all(&self.mk_digest)?;
        cursor.write_all(&self.mk_digest_salt)?;
        cursor.write_u32::<BigEndian>(self.mk_digest_iterations)?;
        write_name(&mut cursor, "uuid", &self.uuid, UUID_LEN)?;

        debug_assert_eq!(cursor.position(), KEY_SLOTS_OFFSET);
        for slot in &self.key_slots {
            cursor.write_u32::<BigEndian>(match slot.state {
                SlotState::Active => LUKS_KEY_ENABLED,
                SlotState::Inactive => LUKS_KEY_DISABLED,
            })?;
            cursor.write_u32::<BigEndian>(slot.iterations)?;
            cursor.write_all(&slot.salt)?;
            cursor.write_u32::<BigEndian>(slot.key_material_offset)?;
            cursor.write_u32::<BigEndian>(slot.stripes)?;
        }

        Ok(out)
    }

    pub fn decode(bytes: &[u8]) -> LuksResult<Self> {
        if bytes.len() < LUKS_PHDR_SIZE {
            return Err(LuksError::TruncatedHeader {
                expected: LUKS_PHDR_SIZE,
                actual: bytes.len(),
            });
        }
        let mut cursor = Cursor::new(&bytes[..LUKS_PHDR_SIZE]);

        let mut magic = [0u8; 6];
        cursor.read_exact(&mut magic)?;
        if magic != LUKS_MAGIC {
            return Err(LuksError::InvalidMagic(magic));
        }
        let version = cursor.read_u16::<BigEndian>()?;
        if version != LUKS_VERSION {
            return Err(LuksError::UnsupportedVersion(version));
        }

        let cipher_name = read_name(&mut cursor, NAME_LEN)?;
        let cipher_mode = read_name(&mut cursor, NAME_LEN)?;
        let hash_spec = read_name(&mut cursor, NAME_LEN)?;
        let payload_offset = cursor.read_u32::<BigEndian>()?;
        let key_bytes = cursor.read_u32::<BigEndian>()?;
        let mut mk_digest = [0u8; LUKS_DIGEST_SIZE];
        cursor.read_exact(&mut mk_digest)?;
        let mut mk_digest_salt = [0u8; LUKS_SALT_SIZE];
        cursor.read_exact(&mut mk_digest_salt)?;
        let mk_digest_iterations = cursor.read_u32::<BigEndian>()?;
        let uuid = read_name(&mut cursor, UUID_LEN)?;

        let cipher = CipherSpec::from_parts(&cipher_name, &cipher_mode).map_err(|_| {
            LuksError::InvalidHeader(format!("cipher `{cipher_name}-{cipher_mode}` is not supported"))
        })?;
        let hash = hash_spec
            .parse::<HashSpec>()
            .map_err(|_| LuksError::InvalidHeader(format!("hash `{hash_spec}` is not supported")))?;
        cipher.check_key_size(key_bytes as usize).map_err(|_| {
            LuksError::InvalidHeader(format!("{key_bytes}-byte master key does not fit {cipher}"))
        })?;
        if uuid.len() != 36 || uuid::Uuid::parse_str(&uuid).is_err() {
            return Err(LuksError::InvalidHeader(format!("malformed uuid `{uuid}`")));
        }

        let mut key_slots = Vec::with_capacity(LUKS_NUMKEYS);
        for index in 0..LUKS_NUMKEYS {
            let state = match cursor.read_u32::<BigEndian>()? {
                LUKS_KEY_ENABLED => SlotState::Active,
                LUKS_KEY_DISABLED => SlotState::Inactive,
                other => {
                    return Err(LuksError::InvalidHeader(format!(
                        "key slot {index} has unknown state 0x{other:08x}"
                    )))
                }
            };
            let iterations = cursor.read_u32::<BigEndian>()?;
            let mut salt = [0u8; LUKS_SALT_SIZE];
            cursor.read_exact(&mut salt)?;
            let key_material_offset = cursor.read_u32::<BigEndian>()?;
            let stripes = cursor.read_u32::<BigEndian>()?;
            key_slots.push(KeySlot {
                state,
                iterations,
                salt,
                key_material_offset,
                stripes,
            });
        }

        let header = Self {
            cipher,
            hash,
            payload_offset,
            key_bytes,
            mk_digest,
            mk_digest_salt,
            mk_digest_iterations,
            uuid,
            key_slots: key_slots
                .try_into()
                .map_err(|_| LuksError::InvalidHeader("key slot table is incomplete".into()))?,
        };
        header.check_layout()?;
        Ok(header)
    }

    /// Read and decode the header from the start of `reader`.
    pub fn from_reader<R: Read>(reader: R) -> LuksResult<Self> {
        let mut buf = Vec::with_capacity(LUKS_PHDR_SIZE);
        reader.take(LUKS_PHDR_SIZE as u64).read_to_end(&mut buf)?;
        Self::decode(&buf)
    }

    fn check_layout(&self) -> LuksResult<()> {
        let header_sectors = (LUKS_PHDR_SIZE as u64).div_ceil(SECTOR_SIZE as u64);
        if u64::from(self.payload_offset) < header_sectors {
            return Err(LuksError::InvalidHeader(format!(
                "payload offset {} overlaps the header",
                self.payload_offset
            )));
        }
        for (index, slot) in self.key_slots.iter().enumerate() {
            if !slot.is_active() {
                continue;
            }
            if slot.stripes == 0 || slot.iterations == 0 {
                return Err(LuksError::InvalidHeader(format!(
                    "key slot {index} has zero stripes or iterations"
                )));
            }
            if slot.stripes > LUKS_STRIPES {
                return Err(LuksError::InvalidHeader(format!(
                    "key slot {index} has {} stripes, at most {LUKS_STRIPES} allowed",
                    slot.stripes
                )));
            }
            let start = u64::from(slot.key_material_offset);
            let end = start + af_sectors(self.key_bytes as usize, slot.stripes);
            if start < header_sectors || end > u64::from(self.payload_offset) {
                return Err(LuksError::InvalidHeader(format!(
                    "key slot {index} material [{start}, {end}) is outside the key area"
                )));
            }
        }
        Ok(())
    }

    pub fn key_len(&self) -> usize {
        self.key_bytes as usize
    }

    /// Indices of active slots in ascending order.
    pub fn active_slots(&self) -> impl Iterator<Item = usize> + '_ {
        self.key_slots
            .iter()
            .enumerate()
            .filter(|(_, slot)| slot.is_active())
            .map(|(index, _)| index)
    }

    pub fn first_free_slot(&self) -> Option<usize> {
        self.key_slots.iter().position(|slot| !slot.is_active())
    }

    pub fn slot_status(&self, index: usize) -> SlotStatus {
        match self.key_slots.get(index) {
            None => SlotStatus::Invalid,
            Some(slot) if !slot.is_active() => SlotStatus::Inactive,
            Some(_) if self.active_slots().count() == 1 => SlotStatus::ActiveLast,
            Some(_) => SlotStatus::Active,
        }
    }

    /// Slot descriptor by index, `InvalidSlot` when out of range.
    pub fn slot(&self, index: usize) -> LuksResult<&KeySlot> {
        self.key_slots.get(index).ok_or(LuksError::InvalidSlot(index))
    }

    pub fn slot_mut(&mut self, index: usize) -> LuksResult<&mut KeySlot> {
        self.key_slots
            .get_mut(index)
            .ok_or(LuksError::InvalidSlot(index))
    }
}

fn write_name<W: Write>(writer: &mut W, field: &str, value: &str, width: usize) -> LuksResult<()> {
    let bytes = value.as_bytes();
    if bytes.len() >= width || bytes.contains(&0) {
        return Err(LuksError::InvalidArgument(format!(
            "{field} `{value}` does not fit a {width}-byte NUL terminated field"
        )));
    }
    let mut field_buf = vec![0u8; width];
    field_buf[..bytes.len()].copy_from_slice(bytes);
    writer.write_all(&field_buf)?;
    Ok(())
}

fn read_name<R: Read>(reader: &mut R, width: usize) -> LuksResult<String> {
    let mut raw = vec![0u8; width];
    reader.read_exact(&mut raw)?;
    let end = raw.iter().position(|b| *b == 0).unwrap_or(width);
    String::from_utf8(raw[..end].to_vec())
        .map_err(|_| LuksError::InvalidHeader("header string field is not UTF-8".into()))
}
