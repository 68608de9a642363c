// Copyright (c) 2021 Xu Shaohua <shaohua@biofan.org>. All rights reserved.
// Use of this source is governed by Affero General Public License that can be found
// in the LICENSE file.

//! Rolling-file logger setup: `log4rs` configured for human-readable lines,
//! a 500 MB rolling file with gzip'd history, and a stderr console mirror.

use std::path::Path;

use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::append::rolling_file::policy::compound::roll::fixed_window::FixedWindowRoller;
use log4rs::append::rolling_file::policy::compound::trigger::size::SizeTrigger;
use log4rs::append::rolling_file::policy::compound::CompoundPolicy;
use log4rs::append::rolling_file::RollingFileAppender;
use log4rs::config::{Appender, Config, Root};
use log4rs::encode::pattern::PatternEncoder;

use crate::error::{Error, ErrorKind};

/// Roll the log file once it reaches this size.
const LOG_FILE_SIZE: u64 = 500 * 1024 * 1024;
const ROLLER_PATTERN: &str = ".{}.gz";
const ROLLER_COUNT: u32 = 10;

const STDOUT_NAME: &str = "stdout";
const ROLLER_NAME: &str = "roller";

/// Install the global `log` logger. Safe to call once per process.
///
/// # Errors
/// Returns [`ErrorKind::LoggerError`] if `log_file`'s path can't be used to
/// build the rolling-file appender, or if `log4rs` fails to initialize.
pub fn init_log(log_file: &Path, level: LevelFilter) -> Result<(), Error> {
    let stdout = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d} {h({l})} - {m}{n}")))
        .build();

    let roller_pattern = log_file.to_str().ok_or_else(|| {
        Error::from_string(
            ErrorKind::LoggerError,
            format!("log file path is not valid UTF-8: {log_file:?}"),
        )
    })?;
    let roller_pattern = roller_pattern.to_string() + ROLLER_PATTERN;
    let roller = FixedWindowRoller::builder()
        .build(&roller_pattern, ROLLER_COUNT)
        .map_err(|err| {
            Error::from_string(ErrorKind::LoggerError, format!("failed to build log roller: {err:?}"))
        })?;
    let policy = Box::new(CompoundPolicy::new(Box::new(SizeTrigger::new(LOG_FILE_SIZE)), Box::new(roller)));
    let rolling_file = RollingFileAppender::builder().build(log_file, policy).map_err(|err| {
        Error::from_string(
            ErrorKind::LoggerError,
            format!("failed to build rolling file appender: {err:?}"),
        )
    })?;

    let config = Config::builder()
        .appender(Appender::builder().build(STDOUT_NAME, Box::new(stdout)))
        .appender(Appender::builder().build(ROLLER_NAME, Box::new(rolling_file)))
        .build(Root::builder().appenders([ROLLER_NAME, STDOUT_NAME]).build(level))
        .map_err(|err| {
            Error::from_string(ErrorKind::LoggerError, format!("failed to build log4rs config: {err:?}"))
        })?;

    log4rs::init_config(config)
        .map_err(|err| Error::from_string(ErrorKind::LoggerError, format!("failed to init log4rs: {err:?}")))?;
    Ok(())
}
