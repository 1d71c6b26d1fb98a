use std::fs::File;

use time::{
    format_description::{self, parse},
    OffsetDateTime,
};
use tracing::{subscriber::set_global_default, warn, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

use crate::error::HarnessError;

/// Installs a file subscriber writing to `<date>_<time>_harness_log.txt` in the working
/// directory.
///
/// If another global subscriber is already installed, it is kept and a warning is emitted
/// through it.
pub fn init_logger() -> Result<(), HarnessError> {
    let file_name = log_file_name();
    let file = File::create(&file_name)?;
    let writer = BoxMakeWriter::new(file);
    let local_offset =
        time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]")
            .map_err(|e| HarnessError::InvalidConfiguration(e.to_string()))?,
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::TRACE)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    if set_global_default(subscriber).is_err() {
        warn!(%file_name, "a tracing subscriber is already set, not logging to file");
    }
    Ok(())
}

fn log_file_name() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    parse("[year]-[month]-[day]_[hour]:[minute]:[second]_harness_log.txt")
        .ok()
        .and_then(|format| now.format(&format).ok())
        .unwrap_or_else(|| format!("{}_harness_log.txt", now.unix_timestamp()))
}
