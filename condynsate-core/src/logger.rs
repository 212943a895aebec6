use std::{io::Write, sync::RwLock, thread, time::Instant};

use colored::Colorize;
use condynsate_macros::config_derives;
use lazy_static::lazy_static;
use log::warn;

use crate::utils::enum_tools::ToVec;

static INTERNAL_LOG_LEVEL: RwLock<Vec<InternalLog>> = RwLock::new(Vec::new());

lazy_static! {
    static ref START_TIME: Instant = Instant::now();
}

#[config_derives(tag_content)]
pub enum LogLevel {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Internal(Vec<InternalLog>),
}

impl From<log::LevelFilter> for LogLevel {
    fn from(level: log::LevelFilter) -> Self {
        match level {
            log::LevelFilter::Off => LogLevel::Off,
            log::LevelFilter::Error => LogLevel::Error,
            log::LevelFilter::Warn => LogLevel::Warn,
            log::LevelFilter::Info => LogLevel::Info,
            log::LevelFilter::Debug | log::LevelFilter::Trace => LogLevel::Debug,
        }
    }
}

impl From<LogLevel> for log::LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Off => log::LevelFilter::Off,
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
            LogLevel::Internal(_) => log::LevelFilter::Debug,
        }
    }
}

/// Verbose trace categories, only shown when listed in [`LogLevel::Internal`].
#[config_derives]
#[derive(Copy, condynsate_macros::ToVec)]
pub enum InternalLog {
    All,
    ActionQueue,
    Worker,
    Recording,
    Keyboard,
    Lifecycle,
}

#[config_derives]
pub struct LoggerConfig {
    pub log_level: LogLevel,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            log_level: LogLevel::Info,
        }
    }
}

/// Installs the colored stdout logger and records the internal categories.
///
/// Calling it twice keeps the first logger and only updates the internal
/// categories.
pub fn init_log(config: &LoggerConfig) {
    set_internal_logs(&config.log_level);
    lazy_static::initialize(&START_TIME);

    if env_logger::builder()
        .target(env_logger::Target::Stdout)
        .format(|buf, record| {
            let current = thread::current();
            let thread_name = current.name().unwrap_or("unnamed");
            writeln!(
                buf,
                "[{:5}][{:.3}, {}] {}",
                match record.level() {
                    log::Level::Error => "ERROR".red(),
                    log::Level::Warn => "WARN".yellow(),
                    log::Level::Info => "INFO".green(),
                    log::Level::Debug => "DEBUG".blue(),
                    log::Level::Trace => "TRACE".normal(),
                },
                START_TIME.elapsed().as_secs_f64(),
                thread_name,
                record.args()
            )
        })
        .format_timestamp(None)
        .filter_level(config.log_level.clone().into())
        .try_init()
        .is_err()
    {
        warn!("Logger already initialized!");
    }
}

fn set_internal_logs(level: &LogLevel) {
    let internals = match level {
        LogLevel::Internal(v) => v.clone(),
        _ => Vec::new(),
    };
    if let Ok(mut guard) = INTERNAL_LOG_LEVEL.write() {
        *guard = internals;
    }
}

pub fn is_enabled(internal_level: InternalLog) -> bool {
    if let InternalLog::All = internal_level {
        return true;
    }
    match INTERNAL_LOG_LEVEL.read() {
        Ok(levels) => levels.contains(&InternalLog::All) || levels.contains(&internal_level),
        Err(_) => false,
    }
}

/// Names of every internal category, as accepted in the YAML configuration.
pub fn internal_log_names() -> Vec<String> {
    InternalLog::to_vec().iter().map(|l| l.to_string()).collect()
}
