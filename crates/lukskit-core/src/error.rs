use std::path::PathBuf;
use thiserror::Error;

/// Result alias for core operations.
pub type LuksResult<T> = Result<T, LuksError>;

/// Coarse error buckets callers can branch on without matching every variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Format,
    Crypto,
    Passphrase,
    Device,
    Mapping,
    InvalidArgument,
    Config,
    Aborted,
}

#[derive(Error, Debug)]
pub enum LuksError {
    #[error("[LK1000] io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("[LK1001] toml config parse error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("[LK1002] yaml config parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("[LK1100] configuration error: {0}")]
    InvalidConfig(String),

    #[error("[LK1300] unusable key file {path}: {reason}")]
    InvalidKeyFile { path: PathBuf, reason: String },

    #[error("[LK1400] device {device} too small: need {required} sectors, have {actual}")]
    DeviceTooSmall {
        device: PathBuf,
        required: u64,
        actual: u64,
    },

    #[error("[LK2000] invalid LUKS magic: {0:02x?}")]
    InvalidMagic([u8; 6]),

    #[error("[LK2001] unsupported LUKS version: {0}")]
    UnsupportedVersion(u16),

    #[error("[LK2002] truncated header: need {expected} bytes, got {actual}")]
    TruncatedHeader { expected: usize, actual: usize },

    #[error("[LK2003] invalid LUKS header: {0}")]
    InvalidHeader(String),

    #[error("[LK2004] {device} is not a LUKS device: {reason}")]
    NotLuks { device: PathBuf, reason: String },

    #[error("[LK2100] invalid argument: {0}")]
    InvalidArgument(String),

    #[error("[LK2101] unsupported cipher: {0}")]
    UnsupportedCipher(String),

    #[error("[LK2200] key slot {0} is out of range")]
    InvalidSlot(usize),

    #[error("[LK2201] key slot {0} is not active")]
    SlotInactive(usize),

    #[error("[LK2202] key slot {0} is already in use")]
    SlotInUse(usize),

    #[error("[LK2203] all key slots are in use")]
    KeySlotFull,

    #[error("[LK3000] crypto backend error: {0}")]
    Crypto(String),

    #[error("[LK4000] passphrase does not unlock this key slot")]
    WrongPassphrase,

    #[error("[LK4001] no key available with this passphrase")]
    NoMatchingSlot,

    #[error("[LK5000] mapping `{0}` is already active")]
    MappingNameInUse(String),

    #[error("[LK5001] mapping `{0}` does not exist")]
    NoSuchMapping(String),

    #[error("[LK5002] device-mapper target `{0}` is busy")]
    TargetBusy(String),

    #[error("[LK5003] kernel rejected crypt table for `{name}`: {reason}")]
    KernelRejected { name: String, reason: String },

    #[error("[LK5100] device-mapper provider error: {0}")]
    Provider(String),

    #[error("[LK6000] operation declined: {0}")]
    Aborted(String),
}

impl LuksError {
    pub fn code(&self) -> &'static str {
        match self {
            LuksError::Io(_) => "LK1000",
            LuksError::Toml(_) => "LK1001",
            LuksError::Yaml(_) => "LK1002",
            LuksError::InvalidConfig(_) => "LK1100",
            LuksError::InvalidKeyFile { .. } => "LK1300",
            LuksError::DeviceTooSmall { .. } => "LK1400",
            LuksError::InvalidMagic(_) => "LK2000",
            LuksError::UnsupportedVersion(_) => "LK2001",
            LuksError::TruncatedHeader { .. } => "LK2002",
            LuksError::InvalidHeader(_) => "LK2003",
            LuksError::NotLuks { .. } => "LK2004",
            LuksError::InvalidArgument(_) => "LK2100",
            LuksError::UnsupportedCipher(_) => "LK2101",
            LuksError::InvalidSlot(_) => "LK2200",
            LuksError::SlotInactive(_) => "LK2201",
            LuksError::SlotInUse(_) => "LK2202",
            LuksError::KeySlotFull => "LK2203",
            LuksError::Crypto(_) => "LK3000",
            LuksError::WrongPassphrase => "LK4000",
            LuksError::NoMatchingSlot => "LK4001",
            LuksError::MappingNameInUse(_) => "LK5000",
            LuksError::NoSuchMapping(_) => "LK5001",
            LuksError::TargetBusy(_) => "LK5002",
            LuksError::KernelRejected { .. } => "LK5003",
            LuksError::Provider(_) => "LK5100",
            LuksError::Aborted(_) => "LK6000",
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            LuksError::InvalidMagic(_)
            | LuksError::UnsupportedVersion(_)
            | LuksError::TruncatedHeader { .. }
            | LuksError::InvalidHeader(_)
            | LuksError::NotLuks { .. } => ErrorCategory::Format,
            LuksError::Crypto(_) => ErrorCategory::Crypto,
            LuksError::WrongPassphrase | LuksError::NoMatchingSlot => ErrorCategory::Passphrase,
            LuksError::Io(_) | LuksError::DeviceTooSmall { .. } | LuksError::InvalidKeyFile { .. } => {
                ErrorCategory::Device
            }
            LuksError::MappingNameInUse(_)
            | LuksError::NoSuchMapping(_)
            | LuksError::TargetBusy(_)
            | LuksError::KernelRejected { .. }
            | LuksError::Provider(_) => ErrorCategory::Mapping,
            LuksError::InvalidArgument(_)
            | LuksError::UnsupportedCipher(_)
            | LuksError::InvalidSlot(_)
            | LuksError::SlotInactive(_)
            | LuksError::SlotInUse(_)
            | LuksError::KeySlotFull => ErrorCategory::InvalidArgument,
            LuksError::Toml(_) | LuksError::Yaml(_) | LuksError::InvalidConfig(_) => {
                ErrorCategory::Config
            }
            LuksError::Aborted(_) => ErrorCategory::Aborted,
        }
    }

    /// Negative errno matching the status codes libcryptsetup hands back.
    pub fn errno(&self) -> i32 {
        const EPERM: i32 = 1;
        const ENOENT: i32 = 2;
        const EIO: i32 = 5;
        const ENOMEM: i32 = 12;
        const EBUSY: i32 = 16;
        const EEXIST: i32 = 17;
        const ENODEV: i32 = 19;
        const EINVAL: i32 = 22;
        const ENOSPC: i32 = 28;

        let errno = match self {
            LuksError::Io(err) => err.raw_os_error().unwrap_or(EIO),
            LuksError::DeviceTooSmall { .. } => ENOSPC,
            LuksError::WrongPassphrase | LuksError::NoMatchingSlot => EPERM,
            LuksError::NoSuchMapping(_) => ENODEV,
            LuksError::MappingNameInUse(_) => EEXIST,
            LuksError::TargetBusy(_) => EBUSY,
            LuksError::KeySlotFull => ENOSPC,
            LuksError::InvalidKeyFile { .. } => ENOENT,
            LuksError::Crypto(_) => ENOMEM,
            LuksError::Provider(_) => EIO,
            LuksError::Aborted(_) => EPERM,
            _ => EINVAL,
        };
        -errno
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_errors_map_to_einval() {
        assert_eq!(LuksError::InvalidMagic([0u8; 6]).errno(), -22);
        assert_eq!(LuksError::UnsupportedVersion(2).errno(), -22);
        assert_eq!(
            LuksError::TruncatedHeader {
                expected: 592,
                actual: 10
            }
            .category(),
            ErrorCategory::Format
        );
    }

    #[test]
    fn codes_appear_in_messages() {
        let err = LuksError::NoSuchMapping("vault".into());
        assert!(err.to_string().starts_with(&format!("[{}]", err.code())));
        assert_eq!(err.category(), ErrorCategory::Mapping);
    }

    #[test]
    fn io_errors_keep_os_errno() {
        let err = LuksError::from(std::io::Error::from_raw_os_error(13));
        assert_eq!(err.errno(), -13);
        assert_eq!(err.category(), ErrorCategory::Device);
    }
}
