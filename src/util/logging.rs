use env_logger::{Builder, Env};
use log::{LevelFilter, Record};
use std::io::{self, Write};

use crate::config::LogLevel;

/// Write one record as `YYYY-mm-dd HH:MM:SS [LEVEL] - message`
fn write_record<W: Write>(buf: &mut W, record: &Record<'_>) -> io::Result<()> {
    writeln!(
        buf,
        "{} [{}] - {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        record.level(),
        record.args()
    )
}

/// Initialize logging at `level`; `RUST_LOG` still overrides per module
///
/// Safe to call more than once; later calls keep the first logger.
pub fn init(level: LogLevel) {
    let mut builder = Builder::new();
    builder
        .format(|buf, record| write_record(buf, record))
        .filter(None, LevelFilter::from(level))
        .parse_env(Env::default());

    if builder.try_init().is_err() {
        log::debug!("Logger already initialized");
    }
}
