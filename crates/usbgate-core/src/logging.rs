//! Logger bootstrap shared by the daemon and the CLI.
//!
//! Settings come from the environment:
//! - `USBGATE_LOG_FORMAT`: `json` (default) or `plain`;
//! - `USBGATE_LOG_LEVEL`: filter used when `RUST_LOG` is unset.

use env_logger::fmt::Formatter;
use env_logger::Env;
use log::Record;
use serde_json::json;
use std::env;
use std::io::{self, Write};
use std::sync::OnceLock;
use std::thread;

static INIT: OnceLock<()> = OnceLock::new();

const FORMAT_ENV: &str = "USBGATE_LOG_FORMAT";
const LEVEL_ENV: &str = "USBGATE_LOG_LEVEL";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line, tagged with the emitting thread.
    Json,
    Plain,
}

impl LogFormat {
    /// Anything other than `plain` keeps the JSON default.
    pub fn parse(value: Option<&str>) -> Self {
        match value.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("plain") => LogFormat::Plain,
            _ => LogFormat::Json,
        }
    }
}

/// Initialize the global logger; calls after the first are no-ops.
pub fn init(default_level: &str) {
    INIT.get_or_init(|| configure(default_level));
}

fn configure(default_level: &str) {
    let level = env::var(LEVEL_ENV).unwrap_or_else(|_| default_level.to_string());
    let format = LogFormat::parse(env::var(FORMAT_ENV).ok().as_deref());

    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or(level));
    match format {
        LogFormat::Json => builder.format(write_json),
        LogFormat::Plain => builder.format(write_plain),
    };

    if let Err(err) = builder.try_init() {
        eprintln!("usbgate: logger already installed: {err}");
    }
}

fn write_json(buf: &mut Formatter, record: &Record) -> io::Result<()> {
    let line = json_line(
        &buf.timestamp().to_string(),
        record,
        thread::current().name().unwrap_or("-"),
    );
    writeln!(buf, "{line}")
}

fn write_plain(buf: &mut Formatter, record: &Record) -> io::Result<()> {
    writeln!(
        buf,
        "{} {:<5} [{}] {}",
        buf.timestamp(),
        record.level(),
        record.target(),
        record.args()
    )
}

fn json_line(timestamp: &str, record: &Record, thread: &str) -> serde_json::Value {
    json!({
        "timestamp": timestamp,
        "level": record.level().as_str().to_ascii_lowercase(),
        "target": record.target(),
        "thread": thread,
        "message": record.args().to_string(),
    })
}
