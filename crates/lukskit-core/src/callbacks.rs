//! Hooks the caller injects for confirmations, log lines and passphrase
//! prompts.

use log::{debug, error, info};
use zeroize::Zeroizing;

/// Message levels, numbered like libcryptsetup's log levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Normal,
    Error,
    Verbose,
    Debug,
}

impl LogLevel {
    pub fn code(&self) -> i32 {
        match self {
            LogLevel::Normal => 0,
            LogLevel::Error => 1,
            LogLevel::Verbose => 2,
            LogLevel::Debug => -1,
        }
    }

    pub fn from_code(code: i32) -> Option<Self> {
        match code {
            0 => Some(LogLevel::Normal),
            1 => Some(LogLevel::Error),
            2 => Some(LogLevel::Verbose),
            -1 => Some(LogLevel::Debug),
            _ => None,
        }
    }
}

/// Caller-supplied interaction points.
///
/// Methods are invoked synchronously and possibly several times per
/// operation. An implementation that cannot get an answer from `confirm`
/// must return `false`.
pub trait Callbacks {
    fn confirm(&self, _message: &str) -> bool {
        true
    }

    fn log(&self, _level: LogLevel, _message: &str) {}

    /// Ask for a passphrase; `None` means no interactive source exists.
    fn passphrase(&self, _prompt: &str) -> Option<Zeroizing<String>> {
        None
    }
}

/// Accepts every confirmation, discards log lines, never prompts.
#[derive(Debug, Clone, Copy, Default)]
pub struct Unattended;

impl Callbacks for Unattended {}

/// Forwards log lines to the `log` facade; confirms everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogCallbacks;

impl Callbacks for LogCallbacks {
    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Error => error!("{message}"),
            LogLevel::Debug => debug!("{message}"),
            LogLevel::Normal | LogLevel::Verbose => info!("{message}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn level_codes_round_trip() {
        for level in [LogLevel::Normal, LogLevel::Error, LogLevel::Verbose, LogLevel::Debug] {
            assert_eq!(LogLevel::from_code(level.code()), Some(level));
        }
        assert_eq!(LogLevel::from_code(7), None);
    }

    #[test]
    fn defaults_allow_and_stay_silent() {
        assert!(Unattended.confirm("wipe everything?"));
        assert!(Unattended.passphrase("Enter passphrase:").is_none());
        Unattended.log(LogLevel::Error, "ignored");
    }
}
