//! Allow-listed algorithm names accepted in LUKS headers and cipher specs.

use crate::error::{LuksError, LuksResult};
use std::fmt;
use std::str::FromStr;

/// Hash algorithms usable for PBKDF2, AF diffusion and ESSIV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HashSpec {
    Sha1,
    Sha256,
    Sha512,
}

impl HashSpec {
    pub fn as_str(&self) -> &'static str {
        match self {
            HashSpec::Sha1 => "sha1",
            HashSpec::Sha256 => "sha256",
            HashSpec::Sha512 => "sha512",
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            HashSpec::Sha1 => 20,
            HashSpec::Sha256 => 32,
            HashSpec::Sha512 => 64,
        }
    }
}

impl FromStr for HashSpec {
    type Err = LuksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha1" => Ok(HashSpec::Sha1),
            "sha256" => Ok(HashSpec::Sha256),
            "sha512" => Ok(HashSpec::Sha512),
            other => Err(LuksError::UnsupportedCipher(format!("hash `{other}`"))),
        }
    }
}

impl fmt::Display for HashSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-sector IV generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IvGenerator {
    /// 32-bit little-endian sector number.
    Plain,
    /// 64-bit little-endian sector number.
    Plain64,
    /// Sector number encrypted under `hash(key)`.
    Essiv(HashSpec),
}

/// Block chaining mode plus its IV generator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherMode {
    Ecb,
    Cbc(IvGenerator),
    Xts(IvGenerator),
}

impl CipherMode {
    /// Master-key lengths (bytes) the mode accepts with AES.
    pub fn key_sizes(&self) -> &'static [usize] {
        match self {
            CipherMode::Ecb | CipherMode::Cbc(_) => &[16, 24, 32],
            CipherMode::Xts(_) => &[32, 64],
        }
    }
}

impl FromStr for CipherMode {
    type Err = LuksError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.to_ascii_lowercase();
        if lowered == "ecb" {
            return Ok(CipherMode::Ecb);
        }

        let (chain, iv) = lowered
            .split_once('-')
            .ok_or_else(|| LuksError::UnsupportedCipher(format!("mode `{s}` lacks an IV generator")))?;

        let iv = match iv.split_once(':') {
            None if iv == "plain" => IvGenerator::Plain,
            None if iv == "plain64" => IvGenerator::Plain64,
            Some(("essiv", hash)) => match hash.parse::<HashSpec>()? {
                // ESSIV keys AES with the full digest, so only 256-bit digests fit.
                HashSpec::Sha256 => IvGenerator::Essiv(HashSpec::Sha256),
                other => {
                    return Err(LuksError::UnsupportedCipher(format!(
                        "essiv hash `{other}` does not produce an AES key"
                    )))
                }
            },
            _ => return Err(LuksError::UnsupportedCipher(format!("IV generator `{iv}`"))),
        };

        match chain {
            "cbc" => Ok(CipherMode::Cbc(iv)),
            "xts" if !matches!(iv, IvGenerator::Essiv(_)) => Ok(CipherMode::Xts(iv)),
            _ => Err(LuksError::UnsupportedCipher(format!("mode `{s}`"))),
        }
    }
}

impl fmt::Display for CipherMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (chain, iv) = match self {
            CipherMode::Ecb => return f.write_str("ecb"),
            CipherMode::Cbc(iv) => ("cbc", iv),
            CipherMode::Xts(iv) => ("xts", iv),
        };
        match iv {
            IvGenerator::Plain => write!(f, "{chain}-plain"),
            IvGenerator::Plain64 => write!(f, "{chain}-plain64"),
            IvGenerator::Essiv(hash) => write!(f, "{chain}-essiv:{hash}"),
        }
    }
}

/// Parsed `cipher-chainmode-ivgen[:ivhash]` specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CipherSpec {
    pub mode: CipherMode,
}

/// Only AES is wired into the software provider.
pub const SUPPORTED_CIPHERS: &[&str] = &["aes"];

impl CipherSpec {
    /// Parse the combined form used on the command line and in dm tables,
    /// e.g. `aes-cbc-essiv:sha256`.
    pub fn parse(spec: &str) -> LuksResult<Self> {
        let (cipher, mode) = spec
            .split_once('-')
            .ok_or_else(|| LuksError::UnsupportedCipher(format!("`{spec}` has no mode")))?;
        Self::from_parts(cipher, mode)
    }

    /// Build from the separate cipher-name and cipher-mode header fields.
    pub fn from_parts(cipher: &str, mode: &str) -> LuksResult<Self> {
        if !SUPPORTED_CIPHERS.contains(&cipher.to_ascii_lowercase().as_str()) {
            return Err(LuksError::UnsupportedCipher(format!("cipher `{cipher}`")));
        }
        Ok(Self { mode: mode.parse()? })
    }

    pub fn cipher_name(&self) -> &'static str {
        "aes"
    }

    pub fn mode_string(&self) -> String {
        self.mode.to_string()
    }

    /// Check that `key_bytes` is a key length this cipher/mode pair accepts.
    pub fn check_key_size(&self, key_bytes: usize) -> LuksResult<()> {
        if self.mode.key_sizes().contains(&key_bytes) {
            Ok(())
        } else {
            Err(LuksError::UnsupportedCipher(format!(
                "{} does not accept a {}-bit key (valid: {:?} bits)",
                self,
                key_bytes * 8,
                self.mode
                    .key_sizes()
                    .iter()
                    .map(|bytes| bytes * 8)
                    .collect::<Vec<_>>()
            )))
        }
    }
}

impl fmt::Display for CipherSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.cipher_name(), self.mode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_common_specs() {
        let spec = CipherSpec::parse("aes-cbc-essiv:sha256").unwrap();
        assert_eq!(spec.mode, CipherMode::Cbc(IvGenerator::Essiv(HashSpec::Sha256)));
        assert_eq!(spec.to_string(), "aes-cbc-essiv:sha256");
        assert_eq!(spec.mode_string(), "cbc-essiv:sha256");

        let xts = CipherSpec::parse("aes-xts-plain64").unwrap();
        assert_eq!(xts.mode, CipherMode::Xts(IvGenerator::Plain64));
        assert_eq!(CipherSpec::parse("aes-ecb").unwrap().mode, CipherMode::Ecb);
    }

    #[test]
    fn rejects_unknown_algorithms() {
        for bad in [
            "twofish-cbc-plain",
            "aes",
            "aes-cbc",
            "aes-ctr-plain",
            "aes-xts-essiv:sha256",
            "aes-cbc-essiv:sha1",
            "aes-cbc-benbi",
        ] {
            let err = CipherSpec::parse(bad).unwrap_err();
            assert!(matches!(err, LuksError::UnsupportedCipher(_)), "{bad}: {err}");
        }
    }

    #[test]
    fn key_sizes_follow_mode() {
        let cbc = CipherSpec::parse("aes-cbc-plain").unwrap();
        assert!(cbc.check_key_size(32).is_ok());
        assert!(cbc.check_key_size(64).is_err());

        let xts = CipherSpec::parse("aes-xts-plain").unwrap();
        assert!(xts.check_key_size(64).is_ok());
        assert!(xts.check_key_size(16).is_err());
    }

    #[test]
    fn hash_names_are_case_insensitive() {
        assert_eq!("SHA256".parse::<HashSpec>().unwrap(), HashSpec::Sha256);
        assert!("ripemd160".parse::<HashSpec>().is_err());
    }
}
