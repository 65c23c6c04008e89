//! Terminal-facing `Callbacks`: confirmations on stdin, passphrases through
//! `rpassword`, messages on stdout/stderr.

use log::debug;
use lukskit_core::callbacks::{Callbacks, LogLevel};
use rpassword::prompt_password;
use std::io::{self, BufRead, Write};
use zeroize::Zeroizing;

#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalCallbacks;

impl Callbacks for TerminalCallbacks {
    /// Only an uppercase `YES` counts; EOF or a read error declines.
    fn confirm(&self, message: &str) -> bool {
        println!();
        println!("WARNING!");
        println!("========");
        println!("{message}");
        println!();
        print!("Are you sure? (Type uppercase yes): ");
        if io::stdout().flush().is_err() {
            return false;
        }
        let mut answer = String::new();
        match io::stdin().lock().read_line(&mut answer) {
            Ok(0) | Err(_) => false,
            Ok(_) => answer.trim_end() == "YES",
        }
    }

    fn log(&self, level: LogLevel, message: &str) {
        match level {
            LogLevel::Normal => println!("{message}"),
            LogLevel::Error => eprintln!("{message}"),
            LogLevel::Verbose | LogLevel::Debug => debug!("{message}"),
        }
    }

    fn passphrase(&self, prompt: &str) -> Option<Zeroizing<String>> {
        match prompt_password(prompt) {
            Ok(value) => Some(Zeroizing::new(value)),
            Err(err) => {
                debug!("passphrase prompt unavailable: {err}");
                None
            }
        }
    }
}
