//! LUKS1 volume management: on-disk header, key slots, and device-mapper
//! activation behind pluggable crypto and mapper backends.

pub mod af;
pub mod callbacks;
pub mod config;
pub mod crypto;
pub mod device;
pub mod error;
pub mod header;
pub mod keyfile;
pub mod keyslot;
pub mod logging;
pub mod mapper;
pub mod options;
pub mod volume;

pub use callbacks::{Callbacks, LogCallbacks, LogLevel, Unattended};
pub use config::{DefaultsCfg, DmCfg, LukskitConfig};
pub use crypto::{CipherSpec, CryptoProvider, HashSpec, RustCrypto};
pub use error::{ErrorCategory, LuksError, LuksResult};
pub use header::{KeySlot, LuksHeader, SlotState, SlotStatus};
pub use keyslot::{KeySlotManager, MasterKey};
pub use mapper::{CryptMapping, DeviceMapper, MappingInfo};
pub use options::{CryptFlags, CryptOptions};
pub use volume::{AccessMode, CryptSetup, LuksStatus, StatusReport};
