//! Logger bootstrap shared by the lukskit binaries.

use env_logger::Env;
use log::Record;
use serde_json::json;
use std::env;
use std::io::Write;
use std::sync::OnceLock;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "LUKSKIT_LOG_FORMAT";
const LEVEL_ENV: &str = "LUKSKIT_LOG_LEVEL";

/// Output flavour for log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Plain,
}

impl LogFormat {
    /// `plain` or `text` select line output; anything else, or nothing, is JSON.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("plain") || v.eq_ignore_ascii_case("text") => {
                LogFormat::Plain
            }
            _ => LogFormat::Json,
        }
    }
}

/// Initialize the global logger.
///
/// The first caller wins; later calls are no-ops. `RUST_LOG` takes priority,
/// then `LUKSKIT_LOG_LEVEL`, then `default_level`. Set `LUKSKIT_LOG_FORMAT`
/// to `plain` for human-readable lines instead of JSON.
pub fn init(default_level: &str) {
    let _ = INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let format = LogFormat::parse(env::var(FORMAT_ENV).ok().as_deref());

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    builder.format(move |buf, record| {
        let line = render(format, &buf.timestamp().to_string(), record);
        writeln!(buf, "{line}")
    });

    if let Err(err) = builder.try_init() {
        eprintln!("lukskit: logger already installed: {err}");
    }
}

/// One log line without the trailing newline.
fn render(format: LogFormat, timestamp: &str, record: &Record<'_>) -> String {
    match format {
        LogFormat::Json => {
            let mut entry = json!({
                "ts": timestamp,
                "level": record.level().as_str(),
                "target": record.target(),
                "msg": record.args().to_string(),
            });
            if let Some(line) = record.line() {
                entry["line"] = json!(line);
            }
            entry.to_string()
        }
        LogFormat::Plain => format!(
            "{timestamp} {:<5} [{}] {}",
            record.level(),
            record.target(),
            record.args()
        ),
    }
}
