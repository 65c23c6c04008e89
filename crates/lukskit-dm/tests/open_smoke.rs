use lukskit_core::config::{DefaultsCfg, DmCfg, LukskitConfig};
use lukskit_core::volume::{AccessMode, CryptSetup, LuksStatus};
use lukskit_core::{LuksError, LuksResult, Unattended};
use lukskit_dm::SystemDeviceMapper;
use std::fs::{self, File};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::tempdir;

const FAKE_DMSETUP: &str = include_str!("fixtures/fake_dmsetup.py");

const IMAGE_BYTES: u64 = 16 * 1024 * 1024;

#[test]
fn format_open_status_close_through_dmsetup() -> LuksResult<()> {
    let tmp = tempdir()?;
    let dmsetup = tmp.path().join("dmsetup");
    fs::write(&dmsetup, FAKE_DMSETUP)?;
    make_executable(&dmsetup)?;

    let image = tmp.path().join("disk.img");
    File::create(&image)?.set_len(IMAGE_BYTES)?;

    let config = Arc::new(LukskitConfig {
        defaults: DefaultsCfg {
            iteration_time_ms: 10,
            ..DefaultsCfg::default()
        },
        dm: DmCfg {
            dmsetup_path: Some(dmsetup.to_string_lossy().into_owned()),
            dir: "/dev/mapper".into(),
            timeout_secs: 10,
        },
        path: PathBuf::from("/etc/lukskit.toml"),
    });

    let mapper = SystemDeviceMapper::from_config(&config)?;
    let crypt = CryptSetup::new(config.clone(), mapper, Box::new(Unattended));

    let format = config
        .options_for(&image)
        .with_new_passphrase("correct horse");
    crypt.luks_format(&format)?;
    assert_eq!(crypt.is_luks(&image), 0);

    let wrong = config
        .options_for(&image)
        .with_name("vault")
        .with_passphrase("battery staple");
    assert!(matches!(
        crypt.luks_open(&wrong).unwrap_err(),
        LuksError::WrongPassphrase
    ));
    assert_eq!(crypt.luks_status("vault"), LuksStatus::Inactive);

    let open = config
        .options_for(&image)
        .with_name("vault")
        .with_passphrase("correct horse");
    assert_eq!(crypt.luks_open(&open)?, 0);
    assert!(matches!(
        crypt.luks_open(&open).unwrap_err(),
        LuksError::MappingNameInUse(_)
    ));

    match crypt.luks_status("vault") {
        LuksStatus::Active(report) => {
            assert_eq!(report.path(), Path::new("/dev/mapper/vault"));
            assert_eq!(report.cipher, "aes-cbc-essiv:sha256");
            assert_eq!(report.key_size, 256);
            assert_eq!(report.device, image);
            assert_eq!(report.offset, 4096);
            assert_eq!(report.size, IMAGE_BYTES / 512 - 4096);
            assert_eq!(report.mode, AccessMode::ReadWrite);
        }
        other => panic!("expected active mapping, got {other:?}"),
    }

    crypt.luks_close("vault")?;
    assert_eq!(crypt.luks_status("vault"), LuksStatus::Inactive);
    assert!(matches!(
        crypt.luks_close("vault").unwrap_err(),
        LuksError::NoSuchMapping(_)
    ));
    Ok(())
}

#[test]
fn busy_mapping_cannot_be_removed() -> LuksResult<()> {
    let tmp = tempdir()?;
    let dmsetup = tmp.path().join("dmsetup");
    fs::write(&dmsetup, FAKE_DMSETUP)?;
    make_executable(&dmsetup)?;
    fs::write(
        tmp.path().join("state.json"),
        r#"{"held": {"table": "0 8 crypt aes-xts-plain64 00ff 0 /dev/loop0 4096", "read_only": true, "open": 1}}"#,
    )?;

    let config = Arc::new(LukskitConfig {
        dm: DmCfg {
            dmsetup_path: Some(dmsetup.to_string_lossy().into_owned()),
            ..DmCfg::default()
        },
        ..LukskitConfig::default()
    });
    let mapper = SystemDeviceMapper::from_config(&config)?;
    let crypt = CryptSetup::new(config, mapper, Box::new(Unattended));

    match crypt.luks_status("held") {
        LuksStatus::Active(report) => {
            assert_eq!(report.mode, AccessMode::ReadOnly);
            assert_eq!(report.key_size, 16);
        }
        other => panic!("expected active mapping, got {other:?}"),
    }
    assert!(matches!(
        crypt.luks_close("held").unwrap_err(),
        LuksError::TargetBusy(_)
    ));
    Ok(())
}

fn make_executable(path: &Path) -> std::io::Result<()> {
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(0o755);
    fs::set_permissions(path, perms)
}
