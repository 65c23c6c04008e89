use std::fmt;
use std::path::PathBuf;
use zeroize::Zeroizing;

/// Flags that alter how an operation interacts with the caller and kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CryptFlags {
    pub read_only: bool,
    /// Skip confirmation prompts.
    pub batch: bool,
}

/// Request-scoped parameters for a volume operation.
///
/// Build one from configuration defaults with
/// [`LukskitConfig::options_for`](crate::config::LukskitConfig::options_for)
/// and fill in the per-call fields.
#[derive(Clone, Default)]
pub struct CryptOptions {
    pub device: PathBuf,
    pub name: Option<String>,
    /// Combined cipher spec, e.g. `aes-cbc-essiv:sha256`.
    pub cipher: String,
    pub hash: String,
    pub key_size_bits: u32,
    pub key_slot: Option<usize>,
    pub key_file: Option<PathBuf>,
    pub new_key_file: Option<PathBuf>,
    pub passphrase: Option<Zeroizing<String>>,
    pub new_passphrase: Option<Zeroizing<String>>,
    pub iteration_time_ms: u64,
    pub align_payload: u32,
    /// Explicit mapping size in sectors; device size minus payload otherwise.
    pub size: Option<u64>,
    pub stripes: u32,
    pub flags: CryptFlags,
}

impl CryptOptions {
    pub fn with_passphrase(mut self, passphrase: &str) -> Self {
        self.passphrase = Some(Zeroizing::new(passphrase.to_string()));
        self
    }

    pub fn with_new_passphrase(mut self, passphrase: &str) -> Self {
        self.new_passphrase = Some(Zeroizing::new(passphrase.to_string()));
        self
    }

    pub fn with_name(mut self, name: &str) -> Self {
        self.name = Some(name.to_string());
        self
    }
}

/// Passphrases print as `<redacted>`.
impl fmt::Debug for CryptOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |secret: &Option<Zeroizing<String>>| secret.as_ref().map(|_| "<redacted>");
        f.debug_struct("CryptOptions")
            .field("device", &self.device)
            .field("name", &self.name)
            .field("cipher", &self.cipher)
            .field("hash", &self.hash)
            .field("key_size_bits", &self.key_size_bits)
            .field("key_slot", &self.key_slot)
            .field("key_file", &self.key_file)
            .field("new_key_file", &self.new_key_file)
            .field("passphrase", &redact(&self.passphrase))
            .field("new_passphrase", &redact(&self.new_passphrase))
            .field("iteration_time_ms", &self.iteration_time_ms)
            .field("align_payload", &self.align_payload)
            .field("size", &self.size)
            .field("stripes", &self.stripes)
            .field("flags", &self.flags)
            .finish()
    }
}
