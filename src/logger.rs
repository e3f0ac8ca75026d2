//! stderr back end for the `log` facade.

use std::io::Write;
use std::str::FromStr;

use anyhow::{Context, Result};
use log::{Level, LevelFilter, Log, Metadata, Record};

/// Environment variable holding the default level.
pub const LOG_ENV: &str = "RUSTY_MKFAT_LOG";

struct StderrLogger;

impl Log for StderrLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let now = chrono::Local::now().format("%H:%M:%S").to_string();
        let line = format_line(&now, record.level(), &record.args().to_string());
        let _ = writeln!(std::io::stderr().lock(), "{line}");
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn format_line(timestamp: &str, level: Level, message: &str) -> String {
    let prefix = match level {
        Level::Error => "ERR ",
        Level::Warn => "WARN",
        Level::Info => "INFO",
        Level::Debug => "DBG ",
        Level::Trace => "TRC ",
    };
    format!("{timestamp} [{prefix}] {message}")
}

/// Pick the level: `-v` and `-q` win, then the environment, then the
/// persisted setting, then `info`.
pub fn resolve_level(verbose: bool, quiet: bool, env: Option<&str>, setting: &str) -> LevelFilter {
    if verbose {
        return LevelFilter::Debug;
    }
    if quiet {
        return LevelFilter::Warn;
    }
    env.and_then(|v| LevelFilter::from_str(v.trim()).ok())
        .or_else(|| LevelFilter::from_str(setting.trim()).ok())
        .unwrap_or(LevelFilter::Info)
}

/// Install the stderr logger. Fails if a logger is already installed.
/// The level can be changed later with [`log::set_max_level`].
pub fn init(level: LevelFilter) -> Result<()> {
    log::set_boxed_logger(Box::new(StderrLogger)).context("a logger is already installed")?;
    log::set_max_level(level);
    Ok(())
}
