//! Turns `dmsetup info` and `dmsetup table` output into structured values.

use lukskit_core::error::{LuksError, LuksResult};

/// Fields of interest from `dmsetup info <name>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct DmInfo {
    pub name: String,
    pub active: bool,
    pub read_only: bool,
    pub open_count: u32,
}

/// One `crypt` target line from `dmsetup table --showkeys`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CryptTable {
    pub size: u64,
    pub cipher: String,
    pub key_bits: u32,
    pub skip: u64,
    pub device: String,
    pub offset: u64,
}

/// Split `Key:   value` lines; lines without a colon are ignored.
fn key_values(output: &str) -> impl Iterator<Item = (&str, &str)> {
    output.lines().filter_map(|line| {
        let (key, value) = line.split_once(':')?;
        let key = key.trim();
        (!key.is_empty()).then(|| (key, value.trim()))
    })
}

pub(crate) fn parse_info(output: &str) -> Option<DmInfo> {
    let mut name = None;
    let mut state = None;
    let mut open_count = 0;
    for (key, value) in key_values(output) {
        match key.to_ascii_lowercase().as_str() {
            "name" => name = Some(value.to_string()),
            "state" => state = Some(value.to_ascii_uppercase()),
            "open count" => open_count = value.parse().unwrap_or(0),
            _ => {}
        }
    }
    let state = state?;
    Some(DmInfo {
        name: name?,
        active: state.starts_with("ACTIVE"),
        read_only: state.contains("READ-ONLY"),
        open_count,
    })
}

/// Parse `<start> <len> crypt <cipher> <key> <iv_offset> <device> <offset> [opts]`.
pub(crate) fn parse_crypt_table(output: &str) -> LuksResult<CryptTable> {
    let line = output
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| LuksError::Provider("dmsetup table returned no targets".into()))?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 8 {
        return Err(malformed("too few fields"));
    }
    if fields[2] != "crypt" {
        return Err(malformed("target is not crypt"));
    }

    let number = |index: usize| -> LuksResult<u64> {
        fields[index]
            .parse::<u64>()
            .map_err(|_| malformed(&format!("field {index} is not a number")))
    };

    Ok(CryptTable {
        size: number(1)?,
        cipher: fields[3].to_string(),
        key_bits: key_bits(fields[4]).ok_or_else(|| malformed("unreadable key"))?,
        skip: number(5)?,
        device: fields[6].to_string(),
        offset: number(7)?,
    })
}

/// Key size from a hex key, or from a `:<bytes>:<type>:<desc>` keyring reference.
fn key_bits(key: &str) -> Option<u32> {
    if let Some(rest) = key.strip_prefix(':') {
        let bytes: u32 = rest.split(':').next()?.parse().ok()?;
        return Some(bytes * 8);
    }
    if key == "-" {
        return Some(0);
    }
    key.bytes()
        .all(|b| b.is_ascii_hexdigit())
        .then(|| key.len() as u32 * 4)
}

/// The offending line is never echoed; with `--showkeys` it carries the key.
fn malformed(reason: &str) -> LuksError {
    LuksError::Provider(format!("malformed crypt table: {reason}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    const INFO: &str = "Name:              vault\n\
State:             ACTIVE\n\
Read Ahead:        256\n\
Tables present:    LIVE\n\
Open count:        2\n\
Event number:      0\n\
Major, minor:      253, 0\n\
Number of targets: 1\n";

    #[test]
    fn info_block_is_parsed() {
        let info = parse_info(INFO).unwrap();
        assert_eq!(info.name, "vault");
        assert!(info.active);
        assert!(!info.read_only);
        assert_eq!(info.open_count, 2);
    }

    #[test]
    fn read_only_state_is_detected() {
        let out = INFO.replace("ACTIVE", "ACTIVE (READ-ONLY)");
        assert!(parse_info(&out).unwrap().read_only);
        assert!(parse_info("Device does not exist.").is_none());
    }

    #[test]
    fn crypt_table_is_parsed() {
        let key = "ab".repeat(32);
        let out = format!("0 28672 crypt aes-cbc-essiv:sha256 {key} 0 7:0 4096\n");
        let table = parse_crypt_table(&out).unwrap();
        assert_eq!(
            table,
            CryptTable {
                size: 28672,
                cipher: "aes-cbc-essiv:sha256".into(),
                key_bits: 256,
                skip: 0,
                device: "7:0".into(),
                offset: 4096,
            }
        );
    }

    #[test]
    fn keyring_references_report_size() {
        let out = "0 100 crypt aes-xts-plain64 :64:logon:cryptsetup:abc 0 /dev/sda2 4096 1 allow_discards";
        assert_eq!(parse_crypt_table(out).unwrap().key_bits, 512);
    }

    #[test]
    fn non_crypt_targets_are_rejected() {
        let err = parse_crypt_table("0 100 linear /dev/sda 0\n").unwrap_err();
        assert!(matches!(err, LuksError::Provider(_)));
        let err = parse_crypt_table("0 100 linear /dev/sda 0 1 2 3\n").unwrap_err();
        assert!(matches!(err, LuksError::Provider(msg) if !msg.contains("/dev/sda")));
    }
}
