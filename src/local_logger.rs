use std::env;
use std::io::Write;

use crate::prelude::*;
use console::Style;
use log::Log;
use simplelog::{CombinedLogger, SharedLogger};

pub const LOG_LEVEL_ENV: &str = "PROCTREE_LOG";

/// Writes log records to stderr so that the rendered tree on stdout stays clean.
pub struct LocalLogger {
    log_level: log::LevelFilter,
}

impl LocalLogger {
    pub fn new() -> Self {
        LocalLogger {
            log_level: log_level_from_env(),
        }
    }
}

fn log_level_from_env() -> log::LevelFilter {
    env::var(LOG_LEVEL_ENV)
        .ok()
        .and_then(|log_level| log_level.parse::<log::LevelFilter>().ok())
        .unwrap_or(log::LevelFilter::Warn)
}

impl Log for LocalLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        metadata.level() <= self.log_level
    }

    fn log(&self, record: &log::Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        print_record(record);
    }

    fn flush(&self) {
        let _ = std::io::stderr().flush();
    }
}

fn print_record(record: &log::Record) {
    let style = match record.level() {
        log::Level::Error => Style::new().red(),
        log::Level::Warn => Style::new().yellow(),
        log::Level::Info => Style::new().white(),
        log::Level::Debug => Style::new().blue().dim(),
        log::Level::Trace => Style::new().black().dim(),
    };

    match record.level() {
        log::Level::Error | log::Level::Warn | log::Level::Info => {
            eprintln!("{}", style.apply_to(record.args()))
        }
        level => eprintln!(
            "{}",
            style.apply_to(format!("[{level}::{}] {}", record.target(), record.args()))
        ),
    }
}

impl SharedLogger for LocalLogger {
    fn level(&self) -> log::LevelFilter {
        self.log_level
    }

    fn config(&self) -> Option<&simplelog::Config> {
        None
    }

    fn as_log(self: Box<Self>) -> Box<dyn Log> {
        Box::new(*self)
    }
}

pub fn get_local_logger() -> Box<dyn SharedLogger> {
    Box::new(LocalLogger::new())
}

pub fn init_local_logger() -> Result<()> {
    CombinedLogger::init(vec![get_local_logger()])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_log_level() {
        temp_env::with_var_unset(LOG_LEVEL_ENV, || {
            assert_eq!(log_level_from_env(), log::LevelFilter::Warn);
        });
    }

    #[test]
    fn test_log_level_from_env() {
        temp_env::with_var(LOG_LEVEL_ENV, Some("debug"), || {
            assert_eq!(LocalLogger::new().level(), log::LevelFilter::Debug);
        });
    }

    #[test]
    fn test_invalid_log_level_falls_back() {
        temp_env::with_var(LOG_LEVEL_ENV, Some("loud"), || {
            assert_eq!(log_level_from_env(), log::LevelFilter::Warn);
        });
    }
}
