use crate::error::{LuksError, LuksResult};
use crate::keyslot::MasterKey;
use std::path::{Path, PathBuf};
use zeroize::Zeroizing;

/// Everything the kernel needs to set up a crypt target.
///
/// The master key moves in with the request and is scrubbed when the mapping
/// value is dropped, whether activation succeeded or not.
#[derive(Debug)]
pub struct CryptMapping {
    pub name: String,
    pub device: PathBuf,
    /// dm cipher string, e.g. `aes-cbc-essiv:sha256`.
    pub cipher: String,
    pub key: MasterKey,
    /// Payload start on the backing device, in sectors.
    pub offset: u64,
    /// IV offset; always 0 for LUKS1.
    pub skip: u64,
    /// Mapped length in sectors.
    pub size: u64,
    pub read_only: bool,
}

impl CryptMapping {
    /// `dmsetup` table line. Contains the hex encoded key, so the line is
    /// assembled in one preallocated buffer that is scrubbed on drop.
    pub fn table(&self) -> LuksResult<Zeroizing<Vec<u8>>> {
        let key = self.key.as_bytes();
        let head = format!("0 {} crypt {} ", self.size, self.cipher);
        let tail = format!(" {} {} {}", self.skip, self.device.display(), self.offset);

        let mut line = Zeroizing::new(vec![0u8; head.len() + key.len() * 2 + tail.len()]);
        let (start, rest) = line.split_at_mut(head.len());
        let (hex_key, end) = rest.split_at_mut(key.len() * 2);
        start.copy_from_slice(head.as_bytes());
        hex::encode_to_slice(key, hex_key)
            .map_err(|err| LuksError::Crypto(format!("failed to encode mapping key: {err}")))?;
        end.copy_from_slice(tail.as_bytes());
        Ok(line)
    }
}

/// Live crypt mapping as reported by the device-mapper.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MappingInfo {
    pub name: String,
    pub cipher: String,
    pub key_bits: u32,
    pub device: PathBuf,
    pub offset: u64,
    pub size: u64,
    pub skip: u64,
    pub read_only: bool,
    pub open_count: u32,
}

/// Abstraction over device-mapper control.
///
/// Implementations wrap the system interface so volume operations can be
/// exercised without touching the kernel.
pub trait DeviceMapper {
    /// Create and resume a crypt mapping.
    fn activate(&self, mapping: &CryptMapping) -> LuksResult<()>;

    /// Remove the mapping called `name`.
    fn deactivate(&self, name: &str) -> LuksResult<()>;

    /// Look up `name`; `Ok(None)` when no such mapping exists.
    fn query(&self, name: &str) -> LuksResult<Option<MappingInfo>>;

    /// Directory holding the mapped device nodes.
    fn dir(&self) -> &Path;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mapping(key: &[u8]) -> CryptMapping {
        CryptMapping {
            name: "vault".into(),
            device: PathBuf::from("/dev/loop0"),
            cipher: "aes-cbc-essiv:sha256".into(),
            key: MasterKey::from_bytes(key),
            offset: 4096,
            skip: 0,
            size: 28672,
            read_only: false,
        }
    }

    #[test]
    fn table_line_matches_dm_crypt_syntax() {
        let table = mapping(&[0xab; 4]).table().unwrap();
        assert_eq!(
            &table[..],
            b"0 28672 crypt aes-cbc-essiv:sha256 abababab 0 /dev/loop0 4096"
        );
    }

    #[test]
    fn debug_output_hides_the_key() {
        let rendered = format!("{:?}", mapping(&[0xcd; 32]));
        assert!(rendered.contains("vault"));
        assert!(!rendered.contains("cdcd"));
        assert!(!rendered.contains("205"));
    }
}
