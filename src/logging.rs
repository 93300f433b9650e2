//! Log setup shared by the plugin binaries.
//!
//! Stdout belongs to the agent, so logs go to stderr.

use chrono::Utc;
use fern;
use log;

/// Map a `-v` count onto a level filter.
pub fn level(verbose: u64) -> log::LevelFilter {
    match verbose {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Warn,
        2 => log::LevelFilter::Info,
        3 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    }
}

/// Install the global logger.
pub fn init(verbose: u64) -> Result<(), log::SetLoggerError> {
    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{}][{}][{}][{}] {}",
                record.module_path().unwrap_or("?"),
                record.line().unwrap_or(0),
                Utc::now().to_rfc3339(),
                record.level(),
                message
            ))
        })
        .level(level(verbose))
        .chain(std::io::stderr())
        .apply()
}
