use crate::crypto::{CipherSpec, HashSpec};
use crate::error::{LuksError, LuksResult};
use crate::header::{DEFAULT_ALIGN_PAYLOAD, LUKS_STRIPES};
use crate::options::CryptOptions;
use log::debug;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Parameters used when an operation does not override them.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DefaultsCfg {
    #[serde(default = "default_cipher")]
    pub cipher: String,

    #[serde(default = "default_hash")]
    pub hash: String,

    /// Master-key size in bits.
    #[serde(default = "default_key_size")]
    pub key_size: u32,

    /// PBKDF2 calibration budget per key slot.
    #[serde(default = "default_iteration_time_ms")]
    pub iteration_time_ms: u64,

    /// Payload alignment in 512-byte sectors; 0 packs it after the key slots.
    #[serde(default = "default_align_payload")]
    pub align_payload: u32,

    #[serde(default = "default_stripes")]
    pub stripes: u32,
}

fn default_cipher() -> String {
    "aes-cbc-essiv:sha256".to_string()
}

fn default_hash() -> String {
    "sha1".to_string()
}

fn default_key_size() -> u32 {
    256
}

fn default_iteration_time_ms() -> u64 {
    1000
}

fn default_align_payload() -> u32 {
    DEFAULT_ALIGN_PAYLOAD
}

fn default_stripes() -> u32 {
    LUKS_STRIPES
}

impl Default for DefaultsCfg {
    fn default() -> Self {
        Self {
            cipher: default_cipher(),
            hash: default_hash(),
            key_size: default_key_size(),
            iteration_time_ms: default_iteration_time_ms(),
            align_payload: default_align_payload(),
            stripes: default_stripes(),
        }
    }
}

/// Device-mapper control settings.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DmCfg {
    /// Explicit `dmsetup` binary; searched in the usual locations otherwise.
    #[serde(default)]
    pub dmsetup_path: Option<String>,

    #[serde(default = "default_dm_dir")]
    pub dir: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_dm_dir() -> String {
    "/dev/mapper".to_string()
}

fn default_timeout_secs() -> u64 {
    10
}

impl Default for DmCfg {
    fn default() -> Self {
        Self {
            dmsetup_path: None,
            dir: default_dm_dir(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct LukskitConfig {
    #[serde(default)]
    pub defaults: DefaultsCfg,

    #[serde(default)]
    pub dm: DmCfg,

    #[serde(skip)]
    pub path: PathBuf,
}

impl LukskitConfig {
    /// Load a TOML (by `.toml` extension) or YAML file and reject it when
    /// [`validate`](Self::validate) reports problems.
    pub fn load<P: AsRef<Path>>(path: P) -> LuksResult<Self> {
        let cfg = Self::parse(path.as_ref())?;
        let issues = cfg.validate();
        if !issues.is_empty() {
            return Err(LuksError::InvalidConfig(issues.join("; ")));
        }
        Ok(cfg)
    }

    /// Like [`load`](Self::load), but a missing file yields built-in defaults.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> LuksResult<Self> {
        let path = path.as_ref();
        if !path.exists() {
            debug!("{} not found, using built-in defaults", path.display());
            return Ok(Self {
                path: path.to_path_buf(),
                ..Self::default()
            });
        }
        Self::load(path)
    }

    /// Parse without validating, for tooling that reports issues itself.
    pub fn parse(path: &Path) -> LuksResult<Self> {
        let contents = fs::read_to_string(path)?;
        let mut cfg = if matches!(path.extension().and_then(|ext| ext.to_str()), Some(ext) if ext.eq_ignore_ascii_case("toml"))
        {
            toml::from_str::<Self>(&contents)?
        } else {
            serde_yaml::from_str::<Self>(&contents)?
        };
        cfg.path = path.to_path_buf();
        Ok(cfg)
    }

    /// Human-readable list of problems; empty when the config is usable.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        let d = &self.defaults;

        match CipherSpec::parse(&d.cipher) {
            Ok(spec) => {
                if d.key_size % 8 != 0 {
                    issues.push(format!("defaults.key_size {} is not a multiple of 8", d.key_size));
                } else if let Err(err) = spec.check_key_size((d.key_size / 8) as usize) {
                    issues.push(format!("defaults.key_size: {err}"));
                }
            }
            Err(err) => issues.push(format!("defaults.cipher: {err}")),
        }
        if let Err(err) = d.hash.parse::<HashSpec>() {
            issues.push(format!("defaults.hash: {err}"));
        }
        if d.stripes == 0 || d.stripes > LUKS_STRIPES {
            issues.push(format!(
                "defaults.stripes must be between 1 and {LUKS_STRIPES}, got {}",
                d.stripes
            ));
        }
        if self.dm.timeout_secs == 0 {
            issues.push("dm.timeout_secs must be positive".to_string());
        }
        if self.dm.dir.trim().is_empty() {
            issues.push("dm.dir must not be empty".to_string());
        }

        issues
    }

    /// Options for `device` pre-filled from `[defaults]`.
    pub fn options_for(&self, device: &Path) -> CryptOptions {
        CryptOptions {
            device: device.to_path_buf(),
            cipher: self.defaults.cipher.clone(),
            hash: self.defaults.hash.clone(),
            key_size_bits: self.defaults.key_size,
            iteration_time_ms: self.defaults.iteration_time_ms,
            align_payload: self.defaults.align_payload,
            stripes: self.defaults.stripes,
            ..CryptOptions::default()
        }
    }

    pub fn dm_timeout(&self) -> Duration {
        Duration::from_secs(self.dm.timeout_secs)
    }

    pub fn dmsetup_path(&self) -> Option<PathBuf> {
        self.dm.dmsetup_path.as_ref().map(PathBuf::from)
    }

    pub fn dm_dir(&self) -> PathBuf {
        PathBuf::from(&self.dm.dir)
    }
}
