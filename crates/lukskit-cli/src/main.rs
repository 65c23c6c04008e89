//! lukskit command-line interface: format, unlock and maintain LUKS1 volumes.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use lukskit_core::{header::LuksHeader, logging, CryptSetup, LukskitConfig, LuksStatus};
use lukskit_dm::SystemDeviceMapper;
use schemars::schema_for;
use serde_json::to_string_pretty;
use std::path::{Path, PathBuf};
use std::sync::Arc;

mod terminal;

use terminal::TerminalCallbacks;

/// Top-level options shared by every subcommand.
#[derive(Parser, Debug)]
#[command(name = "lukskit", version, about = "Manage LUKS1 encrypted block devices.")]
struct Cli {
    /// Path to the lukskit configuration file; built-in defaults apply when absent.
    #[arg(short, long, global = true, default_value = "/etc/lukskit.toml")]
    config: PathBuf,

    /// Do not ask for confirmation.
    #[arg(short = 'q', long, global = true)]
    batch: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write a new LUKS1 header and first key slot, destroying existing data.
    Format {
        device: PathBuf,

        /// Read the new passphrase from this file (`-` for one line of stdin).
        new_key_file: Option<PathBuf>,

        /// Cipher specification, e.g. aes-xts-plain64.
        #[arg(short, long)]
        cipher: Option<String>,

        /// Hash used for PBKDF2 and the anti-forensic splitter.
        #[arg(long)]
        hash: Option<String>,

        /// Master-key size in bits.
        #[arg(short = 's', long)]
        key_size: Option<u32>,

        /// Slot that receives the first passphrase.
        #[arg(short = 'S', long)]
        key_slot: Option<usize>,

        /// PBKDF2 time budget in milliseconds.
        #[arg(short = 'i', long)]
        iter_time: Option<u64>,

        /// Payload alignment in 512-byte sectors.
        #[arg(long)]
        align_payload: Option<u32>,
    },

    /// Unlock DEVICE and map it as /dev/mapper/NAME.
    Open {
        device: PathBuf,
        name: String,

        /// Read the passphrase from this file (`-` for one line of stdin).
        #[arg(short = 'd', long)]
        key_file: Option<PathBuf>,

        /// Create a read-only mapping.
        #[arg(short, long)]
        readonly: bool,

        /// Mapping size in sectors; defaults to everything after the header.
        #[arg(short = 'b', long)]
        size: Option<u64>,
    },

    /// Remove an active mapping.
    Close { name: String },

    /// Report whether a mapping is active and how it is set up.
    Status { name: String },

    /// Print the UUID stored in a LUKS header.
    Uuid { device: PathBuf },

    /// Exit 0 when DEVICE carries a LUKS1 header.
    IsLuks { device: PathBuf },

    /// Add a passphrase to a free key slot.
    AddKey {
        device: PathBuf,

        /// Read the new passphrase from this file.
        new_key_file: Option<PathBuf>,

        /// Read an existing passphrase from this file.
        #[arg(short = 'd', long)]
        key_file: Option<PathBuf>,

        /// Slot to fill; the first free slot otherwise.
        #[arg(short = 'S', long)]
        key_slot: Option<usize>,

        #[arg(short = 'i', long)]
        iter_time: Option<u64>,
    },

    /// Wipe a key slot.
    KillSlot { device: PathBuf, slot: usize },

    /// Show header fields and key slot state.
    Dump { device: PathBuf },

    /// Validate a configuration file or emit the config schema.
    Validate {
        /// Configuration file to validate; `--config` otherwise.
        #[arg(short = 'f', long)]
        file: Option<PathBuf>,

        /// Output the JSON schema instead of validating a file.
        #[arg(long)]
        schema: bool,
    },
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

/// Dispatch to the requested subcommand and return the process exit code.
fn run() -> Result<i32> {
    logging::init("info");
    let cli = Cli::parse();

    if let Commands::Validate { file, schema } = &cli.command {
        return validate(file.as_deref().unwrap_or(&cli.config), *schema);
    }

    let config = Arc::new(LukskitConfig::load_or_default(&cli.config).with_context(|| {
        format!("failed to load configuration from {}", cli.config.display())
    })?);
    let mapper = SystemDeviceMapper::from_config(&config)?;
    let crypt = CryptSetup::new(config.clone(), mapper, Box::new(TerminalCallbacks));
    let base = |device: &Path| {
        let mut options = config.options_for(device);
        options.flags.batch = cli.batch;
        options
    };

    match cli.command {
        Commands::Format {
            device,
            new_key_file,
            cipher,
            hash,
            key_size,
            key_slot,
            iter_time,
            align_payload,
        } => {
            let mut options = base(&device);
            if let Some(cipher) = cipher {
                options.cipher = cipher;
            }
            if let Some(hash) = hash {
                options.hash = hash;
            }
            if let Some(bits) = key_size {
                options.key_size_bits = bits;
            }
            if let Some(ms) = iter_time {
                options.iteration_time_ms = ms;
            }
            if let Some(align) = align_payload {
                options.align_payload = align;
            }
            options.key_slot = key_slot;
            options.new_key_file = new_key_file;
            crypt
                .luks_format(&options)
                .with_context(|| format!("failed to format {}", device.display()))?;
        }
        Commands::Open {
            device,
            name,
            key_file,
            readonly,
            size,
        } => {
            let mut options = base(&device).with_name(&name);
            options.key_file = key_file;
            options.size = size;
            options.flags.read_only = readonly;
            let slot = crypt
                .luks_open(&options)
                .with_context(|| format!("failed to open {}", device.display()))?;
            println!("Key slot {slot} unlocked.");
        }
        Commands::Close { name } => {
            crypt
                .luks_close(&name)
                .with_context(|| format!("failed to close {name}"))?;
        }
        Commands::Status { name } => {
            let status = crypt.luks_status(&name);
            print_status(&name, &status, &config);
            return Ok(match status {
                LuksStatus::Active(_) => 0,
                LuksStatus::Inactive => 4,
                LuksStatus::Failed(_) => 1,
            });
        }
        Commands::Uuid { device } => {
            println!("{}", crypt.luks_uuid(&device)?);
        }
        Commands::IsLuks { device } => {
            return Ok(if crypt.is_luks(&device) == 0 { 0 } else { 1 });
        }
        Commands::AddKey {
            device,
            new_key_file,
            key_file,
            key_slot,
            iter_time,
        } => {
            let mut options = base(&device);
            options.key_file = key_file;
            options.new_key_file = new_key_file;
            options.key_slot = key_slot;
            if let Some(ms) = iter_time {
                options.iteration_time_ms = ms;
            }
            let slot = crypt
                .luks_add_key(&options)
                .with_context(|| format!("failed to add key to {}", device.display()))?;
            println!("Key slot {slot} created.");
        }
        Commands::KillSlot { device, slot } => {
            crypt
                .luks_kill_slot(&base(&device), slot)
                .with_context(|| format!("failed to kill slot {slot} on {}", device.display()))?;
        }
        Commands::Dump { device } => {
            let header = crypt.luks_dump(&device)?;
            print_dump(&device, &header);
        }
        Commands::Validate { file, schema } => {
            return validate(file.as_deref().unwrap_or(&cli.config), schema)
        }
    }

    Ok(0)
}

fn validate(file: &Path, schema: bool) -> Result<i32> {
    if schema {
        let schema = schema_for!(LukskitConfig);
        println!("{}", to_string_pretty(&schema)?);
        return Ok(0);
    }

    let cfg = LukskitConfig::parse(file)
        .with_context(|| format!("failed to load configuration from {}", file.display()))?;
    let issues = cfg.validate();
    if issues.is_empty() {
        println!(
            "Configuration valid (default cipher {}, {} bits).",
            cfg.defaults.cipher, cfg.defaults.key_size
        );
        return Ok(0);
    }
    eprintln!("Configuration validation failed:");
    for issue in issues {
        eprintln!("  - {issue}");
    }
    Ok(1)
}

fn print_status(name: &str, status: &LuksStatus, config: &LukskitConfig) {
    match status {
        LuksStatus::Active(report) => {
            println!("{} is active.", report.path().display());
            println!("  cipher:  {}", report.cipher);
            println!("  keysize: {} bits", report.key_size);
            println!("  device:  {}", report.device.display());
            println!("  offset:  {} sectors", report.offset);
            println!("  size:    {} sectors", report.size);
            if report.skip != 0 {
                println!("  skipped: {} sectors", report.skip);
            }
            println!("  mode:    {}", report.mode);
        }
        LuksStatus::Inactive => {
            println!("{} is inactive.", config.dm_dir().join(name).display());
        }
        LuksStatus::Failed(errno) => {
            eprintln!("status query for {name} failed (errno {errno})");
        }
    }
}

fn print_dump(device: &Path, header: &LuksHeader) {
    println!("LUKS header information for {}", device.display());
    println!();
    println!("Version:       \t1");
    println!("Cipher name:   \t{}", header.cipher.cipher_name());
    println!("Cipher mode:   \t{}", header.cipher.mode_string());
    println!("Hash spec:     \t{}", header.hash);
    println!("Payload offset:\t{}", header.payload_offset);
    println!("MK bits:       \t{}", header.key_bytes * 8);
    println!("MK digest:     \t{}", spaced_hex(&header.mk_digest));
    println!("MK salt:       \t{}", spaced_hex(&header.mk_digest_salt));
    println!("MK iterations: \t{}", header.mk_digest_iterations);
    println!("UUID:          \t{}", header.uuid);
    println!();
    for (index, slot) in header.key_slots.iter().enumerate() {
        if !slot.is_active() {
            println!("Key Slot {index}: DISABLED");
            continue;
        }
        println!("Key Slot {index}: ENABLED");
        println!("\tIterations:         \t{}", slot.iterations);
        println!("\tSalt:               \t{}", spaced_hex(&slot.salt));
        println!("\tKey material offset:\t{}", slot.key_material_offset);
        println!("\tAF stripes:         \t{}", slot.stripes);
    }
}

fn spaced_hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect::<Vec<_>>()
        .join(" ")
}
