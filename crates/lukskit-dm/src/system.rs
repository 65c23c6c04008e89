//! `DeviceMapper` backed by the host's `dmsetup` binary. Crypt tables travel
//! over stdin so key material never shows up in the process list.

use crate::command::{CommandRunner, Output};
use crate::parse::{parse_crypt_table, parse_info};
use log::debug;
use lukskit_core::config::LukskitConfig;
use lukskit_core::error::{LuksError, LuksResult};
use lukskit_core::mapper::{CryptMapping, DeviceMapper, MappingInfo};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Locations probed for `dmsetup` when the config does not name one.
pub const DEFAULT_DMSETUP_PATHS: &[&str] = &[
    "/sbin/dmsetup",
    "/usr/sbin/dmsetup",
    "/usr/local/sbin/dmsetup",
    "/bin/dmsetup",
];

#[derive(Debug, Clone)]
pub struct SystemDeviceMapper {
    runner: CommandRunner,
    dir: PathBuf,
}

impl SystemDeviceMapper {
    /// Use `[dm]` from the config, discovering the binary when no path is set.
    pub fn from_config(config: &LukskitConfig) -> LuksResult<Self> {
        let timeout = config.dm_timeout();
        let dir = config.dm_dir();
        match config.dmsetup_path() {
            Some(path) => Self::with_path(path, timeout, dir),
            None => Self::discover(timeout, dir),
        }
    }

    pub fn with_path(path: PathBuf, timeout: Duration, dir: PathBuf) -> LuksResult<Self> {
        Ok(Self {
            runner: Self::runner_with_path(path, timeout)?,
            dir,
        })
    }

    /// Walk [`DEFAULT_DMSETUP_PATHS`] and take the first binary present.
    pub fn discover(timeout: Duration, dir: PathBuf) -> LuksResult<Self> {
        let path = DEFAULT_DMSETUP_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .ok_or_else(|| {
                LuksError::InvalidConfig(format!(
                    "unable to locate dmsetup; tried {DEFAULT_DMSETUP_PATHS:?}"
                ))
            })?;
        Self::with_path(path.to_path_buf(), timeout, dir)
    }

    fn runner_with_path(path: PathBuf, timeout: Duration) -> LuksResult<CommandRunner> {
        if !path.exists() {
            return Err(LuksError::InvalidConfig(format!(
                "dmsetup not found at {}",
                path.display()
            )));
        }
        Ok(CommandRunner::new(path, timeout))
    }

    fn run_checked(&self, name: &str, args: &[&str], input: Option<&[u8]>) -> LuksResult<Output> {
        let out = self.runner.run(args, input)?;
        if !out.success() {
            return Err(Self::classify_cli_error(self.runner.binary(), name, args, &out));
        }
        Ok(out)
    }

    /// Sort a failed invocation into the matching error. Only the subcommand
    /// and mapping name are echoed, never the table.
    fn classify_cli_error(binary: &Path, name: &str, args: &[&str], output: &Output) -> LuksError {
        let diagnostic = output.diagnostic();
        let lower = diagnostic.to_ascii_lowercase();
        let subcommand = args.first().copied().unwrap_or_default();

        if lower.contains("not found") || lower.contains("does not exist") {
            return LuksError::NoSuchMapping(name.to_string());
        }
        if lower.contains("busy") || lower.contains("already exists") {
            return LuksError::TargetBusy(name.to_string());
        }
        if subcommand == "create" {
            return LuksError::KernelRejected {
                name: name.to_string(),
                reason: first_line(diagnostic).to_string(),
            };
        }

        LuksError::Provider(format!(
            "{} {subcommand} {name} exited with code {}: {}",
            binary.display(),
            output.status,
            if diagnostic.is_empty() {
                "no additional output"
            } else {
                first_line(diagnostic)
            }
        ))
    }
}

fn first_line(text: &str) -> &str {
    text.lines().next().unwrap_or_default().trim()
}

impl DeviceMapper for SystemDeviceMapper {
    fn activate(&self, mapping: &CryptMapping) -> LuksResult<()> {
        let name = mapping.name.as_str();
        if self.query(name)?.is_some() {
            return Err(LuksError::TargetBusy(name.to_string()));
        }
        let mut args = vec!["create", name];
        if mapping.read_only {
            args.push("--readonly");
        }
        let table = mapping.table()?;
        self.run_checked(name, &args, Some(&table[..]))?;
        debug!("dmsetup created {name} ({} sectors)", mapping.size);
        Ok(())
    }

    fn deactivate(&self, name: &str) -> LuksResult<()> {
        self.run_checked(name, &["remove", name], None)?;
        debug!("dmsetup removed {name}");
        Ok(())
    }

    fn query(&self, name: &str) -> LuksResult<Option<MappingInfo>> {
        let info = match self.run_checked(name, &["info", name], None) {
            Ok(out) => out,
            Err(LuksError::NoSuchMapping(_)) => return Ok(None),
            Err(err) => return Err(err),
        };
        let Some(info) = parse_info(&info.stdout) else {
            return Ok(None);
        };
        if !info.active {
            return Ok(None);
        }

        // The raw output carries the key and is scrubbed as soon as it is parsed.
        let table = {
            let out = self.run_checked(name, &["table", "--showkeys", name], None)?;
            parse_crypt_table(&out.stdout)?
        };
        Ok(Some(MappingInfo {
            name: info.name,
            cipher: table.cipher,
            key_bits: table.key_bits,
            device: PathBuf::from(table.device),
            offset: table.offset,
            size: table.size,
            skip: table.skip,
            read_only: info.read_only,
            open_count: info.open_count,
        }))
    }

    fn dir(&self) -> &Path {
        &self.dir
    }
}
