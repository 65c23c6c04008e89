//! Volume-level operations: format, open, close, status and key management.

use crate::callbacks::{Callbacks, LogLevel};
use crate::config::LukskitConfig;
use crate::crypto::{CipherSpec, CryptoProvider, HashSpec, RustCrypto, SECTOR_SIZE};
use crate::device::BlockDevice;
use crate::error::{LuksError, LuksResult};
use crate::header::{KeyLayout, LuksHeader, SlotStatus, LUKS_NUMKEYS};
use crate::keyfile::read_key_file;
use crate::keyslot::{KeySlotManager, MasterKey};
use crate::mapper::{CryptMapping, DeviceMapper};
use crate::options::CryptOptions;
use log::{debug, info};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zeroize::Zeroizing;

/// Sectors zeroed per write while wiping the key area.
const WIPE_CHUNK_SECTORS: u64 = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AccessMode::ReadOnly => "readonly",
            AccessMode::ReadWrite => "read/write",
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Details of an active mapping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusReport {
    pub dir: PathBuf,
    pub name: String,
    pub cipher: String,
    pub key_size: u32,
    pub device: PathBuf,
    pub offset: u64,
    pub size: u64,
    pub skip: u64,
    pub mode: AccessMode,
}

impl StatusReport {
    pub fn path(&self) -> PathBuf {
        self.dir.join(&self.name)
    }
}

/// Outcome of a status query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LuksStatus {
    Active(StatusReport),
    Inactive,
    /// The query itself failed; carries a negative errno.
    Failed(i32),
}

impl LuksStatus {
    /// 1 for active, 0 for inactive, negative errno on failure.
    pub fn code(&self) -> i32 {
        match self {
            LuksStatus::Active(_) => 1,
            LuksStatus::Inactive => 0,
            LuksStatus::Failed(errno) => *errno,
        }
    }
}

/// Coordinates the header codec, key slots, block device and device-mapper.
pub struct CryptSetup<M: DeviceMapper, K: CryptoProvider = RustCrypto> {
    config: Arc<LukskitConfig>,
    mapper: M,
    crypto: K,
    callbacks: Box<dyn Callbacks>,
}

impl<M: DeviceMapper> CryptSetup<M, RustCrypto> {
    pub fn new(config: Arc<LukskitConfig>, mapper: M, callbacks: Box<dyn Callbacks>) -> Self {
        Self::with_crypto(config, mapper, RustCrypto, callbacks)
    }
}

impl<M: DeviceMapper, K: CryptoProvider> CryptSetup<M, K> {
    pub fn with_crypto(
        config: Arc<LukskitConfig>,
        mapper: M,
        crypto: K,
        callbacks: Box<dyn Callbacks>,
    ) -> Self {
        Self {
            config,
            mapper,
            crypto,
            callbacks,
        }
    }

    pub fn config(&self) -> &LukskitConfig {
        &self.config
    }

    pub fn mapper(&self) -> &M {
        &self.mapper
    }

    /// Ask the injected callbacks for a yes/no answer.
    pub fn confirm(&self, message: &str) -> bool {
        self.callbacks.confirm(message)
    }

    pub fn log(&self, level: LogLevel, message: &str) {
        self.callbacks.log(level, message)
    }

    /// Write a fresh LUKS1 header and a first key slot to `options.device`.
    pub fn luks_format(&self, options: &CryptOptions) -> LuksResult<()> {
        let bits = options.key_size_bits;
        if bits == 0 || bits % 8 != 0 {
            return Err(LuksError::InvalidArgument(format!(
                "key size must be a positive multiple of 8 bits, got {bits}"
            )));
        }
        let key_bytes = (bits / 8) as usize;
        let cipher = CipherSpec::parse(self.or_default(&options.cipher, &self.config.defaults.cipher))?;
        let hash = self
            .or_default(&options.hash, &self.config.defaults.hash)
            .parse::<HashSpec>()?;
        cipher.check_key_size(key_bytes)?;
        let stripes = self.stripes(options);
        let slot_index = options.key_slot.unwrap_or(0);
        if slot_index >= LUKS_NUMKEYS {
            return Err(LuksError::InvalidSlot(slot_index));
        }

        let layout = KeyLayout::compute(key_bytes, stripes, options.align_payload)?;
        let device = BlockDevice::open(&options.device, true)?;
        let actual = device.size_sectors()?;
        let required = u64::from(layout.payload_offset) + 1;
        if actual < required {
            return Err(LuksError::DeviceTooSmall {
                device: options.device.clone(),
                required,
                actual,
            });
        }

        if device.read_header().is_ok() {
            self.log(
                LogLevel::Normal,
                &format!(
                    "{} already contains a LUKS header; it will be replaced",
                    options.device.display()
                ),
            );
        }
        if !options.flags.batch {
            let question = format!(
                "This will overwrite data on {} irrevocably.",
                options.device.display()
            );
            if !self.confirm(&question) {
                return Err(LuksError::Aborted(format!(
                    "format of {} declined",
                    options.device.display()
                )));
            }
        }

        let passphrase = self.new_passphrase(options)?;
        let manager = KeySlotManager::new(&self.crypto);
        let master_key = MasterKey::generate(&self.crypto, key_bytes)?;
        let uuid = uuid::Uuid::new_v4().to_string();
        let mut header = LuksHeader::new(cipher, hash, bits / 8, uuid, &layout, stripes);
        manager.seal_digest(&mut header, &master_key, options.iteration_time_ms)?;

        wipe_sectors(&device, 0, u64::from(layout.payload_offset))?;

        let sealed = manager.derive_and_split(
            &header,
            &master_key,
            &passphrase,
            options.iteration_time_ms,
            header.key_slots[slot_index].key_material_offset,
            stripes,
        )?;
        manager.store(&device, &sealed)?;
        header.key_slots[slot_index] = sealed.slot;
        device.write_header(&header)?;

        info!(
            "formatted {} as LUKS1 ({cipher}, {bits} bits, uuid {})",
            options.device.display(),
            header.uuid
        );
        self.log(
            LogLevel::Verbose,
            &format!("Key slot {slot_index} created."),
        );
        Ok(())
    }

    /// Unlock the volume and activate mapping `options.name`. Returns the key
    /// slot that opened.
    pub fn luks_open(&self, options: &CryptOptions) -> LuksResult<usize> {
        let name = mapping_name(options)?;
        if self.mapper.query(name)?.is_some() {
            return Err(LuksError::MappingNameInUse(name.to_string()));
        }

        let device = BlockDevice::open(&options.device, false)?;
        let header = device.read_header()?;
        let passphrase = self.unlock_passphrase(options)?;

        let manager = KeySlotManager::new(&self.crypto);
        let (slot, master_key) = manager
            .recover(&device, &header, &passphrase)
            .map_err(unlock_error)?;

        let payload = u64::from(header.payload_offset);
        let size = match options.size {
            Some(size) => size,
            None => {
                let actual = device.size_sectors()?;
                let size = actual.saturating_sub(payload);
                if size == 0 {
                    return Err(LuksError::DeviceTooSmall {
                        device: options.device.clone(),
                        required: payload + 1,
                        actual,
                    });
                }
                size
            }
        };

        let mapping = CryptMapping {
            name: name.to_string(),
            device: options.device.clone(),
            cipher: header.cipher.to_string(),
            key: master_key,
            offset: payload,
            skip: 0,
            size,
            read_only: options.flags.read_only,
        };
        self.mapper.activate(&mapping)?;
        drop(mapping);

        info!("activated {name} from {} (slot {slot})", options.device.display());
        self.log(LogLevel::Verbose, &format!("Key slot {slot} unlocked."));
        Ok(slot)
    }

    /// Remove mapping `name`, asking first when it is still held open.
    pub fn luks_close(&self, name: &str) -> LuksResult<()> {
        let name = check_name(name)?;
        let info = self
            .mapper
            .query(name)?
            .ok_or_else(|| LuksError::NoSuchMapping(name.to_string()))?;
        if info.open_count > 0 {
            let question = format!(
                "Device {name} is still in use ({} open). Remove it anyway?",
                info.open_count
            );
            if !self.confirm(&question) {
                return Err(LuksError::Aborted(format!("close of {name} declined")));
            }
        }
        self.mapper.deactivate(name)?;
        info!("removed mapping {name}");
        Ok(())
    }

    /// 0 when `device` carries a valid LUKS1 header, a negative errno
    /// otherwise.
    pub fn is_luks(&self, device: &Path) -> i32 {
        match BlockDevice::open(device, false).and_then(|dev| dev.read_header()) {
            Ok(_) => 0,
            Err(err) => {
                debug!("{} is not LUKS: {err}", device.display());
                err.errno()
            }
        }
    }

    pub fn luks_uuid(&self, device: &Path) -> LuksResult<String> {
        Ok(self.luks_dump(device)?.uuid)
    }

    pub fn luks_status(&self, name: &str) -> LuksStatus {
        match check_name(name).and_then(|name| self.mapper.query(name)) {
            Ok(Some(info)) => LuksStatus::Active(StatusReport {
                dir: self.mapper.dir().to_path_buf(),
                name: info.name,
                cipher: info.cipher,
                key_size: info.key_bits,
                device: info.device,
                offset: info.offset,
                size: info.size,
                skip: info.skip,
                mode: if info.read_only {
                    AccessMode::ReadOnly
                } else {
                    AccessMode::ReadWrite
                },
            }),
            Ok(None) => LuksStatus::Inactive,
            Err(err) => {
                self.log(LogLevel::Error, &err.to_string());
                LuksStatus::Failed(err.errno())
            }
        }
    }

    /// Add the new passphrase to a free slot, authorised by an existing one.
    /// Returns the slot written.
    pub fn luks_add_key(&self, options: &CryptOptions) -> LuksResult<usize> {
        let device = BlockDevice::open(&options.device, true)?;
        let mut header = device.read_header()?;

        let target = match options.key_slot {
            Some(index) => match header.slot_status(index) {
                SlotStatus::Invalid => return Err(LuksError::InvalidSlot(index)),
                SlotStatus::Active | SlotStatus::ActiveLast => {
                    return Err(LuksError::SlotInUse(index))
                }
                SlotStatus::Inactive => index,
            },
            None => header.first_free_slot().ok_or(LuksError::KeySlotFull)?,
        };

        let passphrase = self.unlock_passphrase(options)?;
        let manager = KeySlotManager::new(&self.crypto);
        let (_, master_key) = manager
            .recover(&device, &header, &passphrase)
            .map_err(unlock_error)?;

        let new_passphrase = self.new_passphrase(options)?;
        let descriptor = header.slot(target)?;
        let sealed = manager.derive_and_split(
            &header,
            &master_key,
            &new_passphrase,
            options.iteration_time_ms,
            descriptor.key_material_offset,
            descriptor.stripes,
        )?;
        manager.store(&device, &sealed)?;
        header.key_slots[target] = sealed.slot;
        device.write_header(&header)?;

        self.log(LogLevel::Verbose, &format!("Key slot {target} created."));
        Ok(target)
    }

    /// Destroy key slot `index`, asking first when it is the last one.
    pub fn luks_kill_slot(&self, options: &CryptOptions, index: usize) -> LuksResult<()> {
        let device = BlockDevice::open(&options.device, true)?;
        let mut header = device.read_header()?;

        match header.slot_status(index) {
            SlotStatus::Invalid => return Err(LuksError::InvalidSlot(index)),
            SlotStatus::Inactive => return Err(LuksError::SlotInactive(index)),
            SlotStatus::ActiveLast if !options.flags.batch => {
                let question = format!(
                    "Key slot {index} is the last one on {}; the device will become unusable after purging it.",
                    options.device.display()
                );
                if !self.confirm(&question) {
                    return Err(LuksError::Aborted(format!("kill of key slot {index} declined")));
                }
            }
            SlotStatus::Active | SlotStatus::ActiveLast => {}
        }

        KeySlotManager::new(&self.crypto).destroy(&device, &mut header, index)?;
        device.write_header(&header)?;
        self.log(LogLevel::Verbose, &format!("Key slot {index} destroyed."));
        Ok(())
    }

    pub fn luks_dump(&self, device: &Path) -> LuksResult<LuksHeader> {
        BlockDevice::open(device, false)?.read_header()
    }

    fn or_default<'a>(&self, value: &'a str, fallback: &'a str) -> &'a str {
        if value.is_empty() {
            fallback
        } else {
            value
        }
    }

    fn stripes(&self, options: &CryptOptions) -> u32 {
        if options.stripes == 0 {
            self.config.defaults.stripes
        } else {
            options.stripes
        }
    }

    /// Passphrase that unlocks an existing slot.
    fn unlock_passphrase(&self, options: &CryptOptions) -> LuksResult<Zeroizing<Vec<u8>>> {
        if let Some(passphrase) = &options.passphrase {
            return Ok(Zeroizing::new(passphrase.as_bytes().to_vec()));
        }
        if let Some(path) = &options.key_file {
            return read_key_file(path);
        }
        self.prompt(&format!(
            "Enter passphrase for {}: ",
            options.device.display()
        ))
    }

    /// Passphrase for the slot being created.
    fn new_passphrase(&self, options: &CryptOptions) -> LuksResult<Zeroizing<Vec<u8>>> {
        if let Some(passphrase) = &options.new_passphrase {
            return Ok(Zeroizing::new(passphrase.as_bytes().to_vec()));
        }
        if let Some(path) = &options.new_key_file {
            return read_key_file(path);
        }
        self.prompt("Enter new passphrase: ")
    }

    fn prompt(&self, prompt: &str) -> LuksResult<Zeroizing<Vec<u8>>> {
        match self.callbacks.passphrase(prompt) {
            Some(passphrase) if !passphrase.is_empty() => {
                Ok(Zeroizing::new(passphrase.as_bytes().to_vec()))
            }
            _ => Err(LuksError::InvalidArgument(
                "no passphrase or key file supplied".into(),
            )),
        }
    }
}

fn mapping_name(options: &CryptOptions) -> LuksResult<&str> {
    match options.name.as_deref() {
        Some(name) => check_name(name),
        None => Err(LuksError::InvalidArgument("mapping name is required".into())),
    }
}

/// Mapping names must be non-blank and must not contain `/`.
fn check_name(name: &str) -> LuksResult<&str> {
    if name.trim().is_empty() || name.contains('/') {
        return Err(LuksError::InvalidArgument(format!(
            "invalid mapping name `{name}`"
        )));
    }
    Ok(name)
}

fn unlock_error(err: LuksError) -> LuksError {
    match err {
        LuksError::NoMatchingSlot => LuksError::WrongPassphrase,
        other => other,
    }
}

fn wipe_sectors(device: &BlockDevice, start: u64, count: u64) -> LuksResult<()> {
    let zeros = vec![0u8; WIPE_CHUNK_SECTORS as usize * SECTOR_SIZE];
    let mut sector = start;
    let end = start + count;
    while sector < end {
        let chunk = (end - sector).min(WIPE_CHUNK_SECTORS);
        device.write_sectors(sector, &zeros[..chunk as usize * SECTOR_SIZE])?;
        sector += chunk;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mapper::MappingInfo;
    use std::collections::HashMap;
    use std::fs;
    use std::sync::Mutex;
    use tempfile::{tempdir, NamedTempFile};

    const IMAGE_BYTES: u64 = 16 * 1024 * 1024;

    #[derive(Default)]
    struct MockMapper {
        mappings: Mutex<HashMap<String, MappingInfo>>,
        keys: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MockMapper {
        fn set_open_count(&self, name: &str, count: u32) {
            if let Some(info) = self.mappings.lock().unwrap().get_mut(name) {
                info.open_count = count;
            }
        }

        fn key_for(&self, name: &str) -> Option<Vec<u8>> {
            self.keys.lock().unwrap().get(name).cloned()
        }
    }

    impl DeviceMapper for MockMapper {
        fn activate(&self, mapping: &CryptMapping) -> LuksResult<()> {
            let mut guard = self.mappings.lock().unwrap();
            if guard.contains_key(&mapping.name) {
                return Err(LuksError::TargetBusy(mapping.name.clone()));
            }
            guard.insert(
                mapping.name.clone(),
                MappingInfo {
                    name: mapping.name.clone(),
                    cipher: mapping.cipher.clone(),
                    key_bits: (mapping.key.len() * 8) as u32,
                    device: mapping.device.clone(),
                    offset: mapping.offset,
                    size: mapping.size,
                    skip: mapping.skip,
                    read_only: mapping.read_only,
                    open_count: 0,
                },
            );
            self.keys
                .lock()
                .unwrap()
                .insert(mapping.name.clone(), mapping.key.as_bytes().to_vec());
            Ok(())
        }

        fn deactivate(&self, name: &str) -> LuksResult<()> {
            self.mappings
                .lock()
                .unwrap()
                .remove(name)
                .map(|_| ())
                .ok_or_else(|| LuksError::NoSuchMapping(name.to_string()))
        }

        fn query(&self, name: &str) -> LuksResult<Option<MappingInfo>> {
            if name == "broken" {
                return Err(LuksError::Provider("dmsetup exploded".into()));
            }
            Ok(self.mappings.lock().unwrap().get(name).cloned())
        }

        fn dir(&self) -> &Path {
            Path::new("/dev/mapper")
        }
    }

    #[derive(Default)]
    struct Record {
        decline: bool,
        prompt_answer: Option<String>,
        questions: Mutex<Vec<String>>,
        logs: Mutex<Vec<(LogLevel, String)>>,
    }

    struct Recording(Arc<Record>);

    impl Callbacks for Recording {
        fn confirm(&self, message: &str) -> bool {
            self.0.questions.lock().unwrap().push(message.to_string());
            !self.0.decline
        }

        fn log(&self, level: LogLevel, message: &str) {
            self.0.logs.lock().unwrap().push((level, message.to_string()));
        }

        fn passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
            self.0.prompt_answer.clone().map(Zeroizing::new)
        }
    }

    struct Harness {
        image: NamedTempFile,
        record: Arc<Record>,
        crypt: CryptSetup<MockMapper>,
    }

    impl Harness {
        fn new(bytes: u64, record: Record) -> Self {
            let image = NamedTempFile::new().unwrap();
            image.as_file().set_len(bytes).unwrap();
            let record = Arc::new(record);
            let crypt = CryptSetup::new(
                Arc::new(LukskitConfig::default()),
                MockMapper::default(),
                Box::new(Recording(record.clone())),
            );
            Self {
                image,
                record,
                crypt,
            }
        }

        fn device(&self) -> &Path {
            self.image.path()
        }

        fn options(&self) -> CryptOptions {
            let mut opts = self.crypt.config().options_for(self.device());
            opts.iteration_time_ms = 10;
            opts
        }

        fn format(&self, passphrase: &str) {
            let opts = self.options().with_new_passphrase(passphrase);
            self.crypt.luks_format(&opts).unwrap();
        }
    }

    #[test]
    fn format_open_status_close_lifecycle() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("hunter2");

        assert_eq!(h.crypt.is_luks(h.device()), 0);
        let uuid = h.crypt.luks_uuid(h.device()).unwrap();
        assert_eq!(uuid.len(), 36);

        let opts = h.options().with_name("vault").with_passphrase("hunter2");
        assert_eq!(h.crypt.luks_open(&opts).unwrap(), 0);

        match h.crypt.luks_status("vault") {
            LuksStatus::Active(report) => {
                assert_eq!(report.cipher, "aes-cbc-essiv:sha256");
                assert_eq!(report.key_size, 256);
                assert_eq!(report.offset, 4096);
                assert_eq!(report.size, IMAGE_BYTES / 512 - 4096);
                assert_eq!(report.mode, AccessMode::ReadWrite);
                assert_eq!(report.path(), PathBuf::from("/dev/mapper/vault"));
            }
            other => panic!("unexpected status {other:?}"),
        }
        assert_eq!(h.crypt.luks_status("vault").code(), 1);

        h.crypt.luks_close("vault").unwrap();
        assert_eq!(h.crypt.luks_status("vault"), LuksStatus::Inactive);
        assert_eq!(h.crypt.luks_status("vault").code(), 0);

        let questions = h.record.questions.lock().unwrap();
        assert_eq!(questions.len(), 1);
        assert!(questions[0].contains("overwrite"));
    }

    #[test]
    fn opened_key_matches_header_digest() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("pw");
        let opts = h.options().with_name("check").with_passphrase("pw");
        h.crypt.luks_open(&opts).unwrap();

        let key = MasterKey::from_bytes(&h.crypt.mapper().key_for("check").unwrap());
        let header = h.crypt.luks_dump(h.device()).unwrap();
        let manager = KeySlotManager::new(&RustCrypto);
        assert!(manager.verify(&header, &key).unwrap());
    }

    #[test]
    fn format_rejects_odd_key_sizes() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        let mut opts = h.options().with_new_passphrase("pw");
        opts.key_size_bits = 255;
        assert!(matches!(
            h.crypt.luks_format(&opts).unwrap_err(),
            LuksError::InvalidArgument(_)
        ));
        assert_eq!(h.crypt.is_luks(h.device()), -22);
    }

    #[test]
    fn format_rejects_unknown_cipher_and_small_devices() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        let mut opts = h.options().with_new_passphrase("pw");
        opts.cipher = "serpent-cbc-plain".into();
        assert!(matches!(
            h.crypt.luks_format(&opts).unwrap_err(),
            LuksError::UnsupportedCipher(_)
        ));

        let small = Harness::new(1024 * 1024, Record::default());
        let opts = small.options().with_new_passphrase("pw");
        match small.crypt.luks_format(&opts).unwrap_err() {
            LuksError::DeviceTooSmall { required, actual, .. } => {
                assert_eq!(required, 4097);
                assert_eq!(actual, 2048);
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn declined_format_leaves_device_untouched() {
        let h = Harness::new(
            IMAGE_BYTES,
            Record {
                decline: true,
                ..Record::default()
            },
        );
        let opts = h.options().with_new_passphrase("pw");
        assert!(matches!(
            h.crypt.luks_format(&opts).unwrap_err(),
            LuksError::Aborted(_)
        ));
        assert_ne!(h.crypt.is_luks(h.device()), 0);

        let mut batch = opts.clone();
        batch.flags.batch = true;
        h.crypt.luks_format(&batch).unwrap();
        assert_eq!(h.crypt.is_luks(h.device()), 0);
    }

    #[test]
    fn reformat_logs_existing_header() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("first");
        let before = h.crypt.luks_uuid(h.device()).unwrap();
        h.format("second");
        assert_ne!(h.crypt.luks_uuid(h.device()).unwrap(), before);

        let logs = h.record.logs.lock().unwrap();
        assert!(logs
            .iter()
            .any(|(level, line)| *level == LogLevel::Normal && line.contains("already contains")));
    }

    #[test]
    fn wrong_passphrase_creates_no_mapping() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("right");
        let opts = h.options().with_name("vault").with_passphrase("wrong");
        assert!(matches!(
            h.crypt.luks_open(&opts).unwrap_err(),
            LuksError::WrongPassphrase
        ));
        assert_eq!(h.crypt.luks_status("vault"), LuksStatus::Inactive);
    }

    #[test]
    fn open_validates_name_and_collisions() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("pw");

        let unnamed = h.options().with_passphrase("pw");
        assert!(matches!(
            h.crypt.luks_open(&unnamed).unwrap_err(),
            LuksError::InvalidArgument(_)
        ));

        let opts = h.options().with_name("vault").with_passphrase("pw");
        h.crypt.luks_open(&opts).unwrap();
        assert!(matches!(
            h.crypt.luks_open(&opts).unwrap_err(),
            LuksError::MappingNameInUse(name) if name == "vault"
        ));
    }

    #[test]
    fn open_reports_not_luks_for_blank_device() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        let opts = h.options().with_name("vault").with_passphrase("pw");
        assert!(matches!(
            h.crypt.luks_open(&opts).unwrap_err(),
            LuksError::NotLuks { .. }
        ));
    }

    #[test]
    fn passphrases_come_from_key_files_and_prompts() {
        let h = Harness::new(
            IMAGE_BYTES,
            Record {
                prompt_answer: Some("prompted".into()),
                ..Record::default()
            },
        );
        // no passphrase in the options, so the callback supplies it
        h.crypt.luks_format(&h.options()).unwrap();

        let dir = tempdir().unwrap();
        let key_path = dir.path().join("key");
        fs::write(&key_path, b"prompted").unwrap();
        let mut opts = h.options().with_name("vault");
        opts.key_file = Some(key_path);
        opts.flags.read_only = true;
        h.crypt.luks_open(&opts).unwrap();

        match h.crypt.luks_status("vault") {
            LuksStatus::Active(report) => assert_eq!(report.mode, AccessMode::ReadOnly),
            other => panic!("unexpected status {other:?}"),
        }
    }

    #[test]
    fn format_without_any_passphrase_source_fails() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        assert!(matches!(
            h.crypt.luks_format(&h.options()).unwrap_err(),
            LuksError::InvalidArgument(_)
        ));
    }

    #[test]
    fn add_key_and_kill_slot() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("original");

        let add = h
            .options()
            .with_passphrase("original")
            .with_new_passphrase("second");
        assert_eq!(h.crypt.luks_add_key(&add).unwrap(), 1);

        let mut occupied = add.clone();
        occupied.key_slot = Some(0);
        assert!(matches!(
            h.crypt.luks_add_key(&occupied).unwrap_err(),
            LuksError::SlotInUse(0)
        ));

        h.crypt.luks_kill_slot(&h.options(), 0).unwrap();
        assert!(matches!(
            h.crypt.luks_kill_slot(&h.options(), 0).unwrap_err(),
            LuksError::SlotInactive(0)
        ));
        assert!(matches!(
            h.crypt.luks_kill_slot(&h.options(), 9).unwrap_err(),
            LuksError::InvalidSlot(9)
        ));

        let old = h.options().with_name("a").with_passphrase("original");
        assert!(matches!(
            h.crypt.luks_open(&old).unwrap_err(),
            LuksError::WrongPassphrase
        ));
        let new = h.options().with_name("b").with_passphrase("second");
        assert_eq!(h.crypt.luks_open(&new).unwrap(), 1);
    }

    #[test]
    fn killing_last_slot_needs_confirmation() {
        let h = Harness::new(
            IMAGE_BYTES,
            Record {
                decline: true,
                ..Record::default()
            },
        );
        let mut opts = h.options().with_new_passphrase("only");
        opts.flags.batch = true;
        h.crypt.luks_format(&opts).unwrap();

        assert!(matches!(
            h.crypt.luks_kill_slot(&h.options(), 0).unwrap_err(),
            LuksError::Aborted(_)
        ));
        assert_eq!(
            h.crypt.luks_dump(h.device()).unwrap().slot_status(0),
            SlotStatus::ActiveLast
        );

        h.crypt.luks_kill_slot(&opts, 0).unwrap();
        assert_eq!(
            h.crypt.luks_dump(h.device()).unwrap().slot_status(0),
            SlotStatus::Inactive
        );
    }

    #[test]
    fn add_key_reports_full_table() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("pw");
        let add = h.options().with_passphrase("pw").with_new_passphrase("pw");
        for expected in 1..LUKS_NUMKEYS {
            assert_eq!(h.crypt.luks_add_key(&add).unwrap(), expected);
        }
        assert!(matches!(
            h.crypt.luks_add_key(&add).unwrap_err(),
            LuksError::KeySlotFull
        ));
    }

    #[test]
    fn close_checks_existence_and_open_count() {
        let h = Harness::new(
            IMAGE_BYTES,
            Record {
                decline: true,
                ..Record::default()
            },
        );
        assert!(matches!(
            h.crypt.luks_close("ghost").unwrap_err(),
            LuksError::NoSuchMapping(_)
        ));

        let mut opts = h.options().with_new_passphrase("pw");
        opts.flags.batch = true;
        h.crypt.luks_format(&opts).unwrap();
        let open = h.options().with_name("busy").with_passphrase("pw");
        h.crypt.luks_open(&open).unwrap();
        h.crypt.mapper().set_open_count("busy", 2);

        assert!(matches!(
            h.crypt.luks_close("busy").unwrap_err(),
            LuksError::Aborted(_)
        ));
        assert_eq!(h.crypt.luks_status("busy").code(), 1);
    }

    #[test]
    fn failed_status_query_returns_errno() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        let status = h.crypt.luks_status("broken");
        assert_eq!(status, LuksStatus::Failed(-5));
        assert_eq!(status.code(), -5);
    }

    #[test]
    fn close_and_status_validate_names() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        for name in ["", "  ", "../vault"] {
            assert!(matches!(
                h.crypt.luks_close(name).unwrap_err(),
                LuksError::InvalidArgument(_)
            ));
            assert_eq!(h.crypt.luks_status(name), LuksStatus::Failed(-22));
        }
    }

    #[test]
    fn crafted_stripe_count_is_not_luks() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        h.format("pw");
        let mut header = h.crypt.luks_dump(h.device()).unwrap();
        header.payload_offset = u32::MAX;
        header.key_slots[0].stripes = 120_000_000;
        let device = BlockDevice::open(h.device(), true).unwrap();
        device.write_header(&header).unwrap();

        assert_eq!(h.crypt.is_luks(h.device()), -22);
        let opts = h.options().with_name("vault").with_passphrase("pw");
        assert!(matches!(
            h.crypt.luks_open(&opts).unwrap_err(),
            LuksError::NotLuks { .. }
        ));
        assert_eq!(h.crypt.luks_status("vault"), LuksStatus::Inactive);
    }

    #[test]
    fn pass_through_callbacks() {
        let h = Harness::new(IMAGE_BYTES, Record::default());
        assert!(h.crypt.confirm("proceed?"));
        h.crypt.log(LogLevel::Debug, "hello");
        let logs = h.record.logs.lock().unwrap();
        assert_eq!(logs.as_slice(), &[(LogLevel::Debug, "hello".to_string())]);
    }
}
