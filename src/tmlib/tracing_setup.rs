use backtrace::Backtrace;
use std::{cell::RefCell, io, path::Path};
use tracing::{info, Level};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::LevelFilter, fmt, prelude::*};

pub const LOG_FILE_PREFIX: &str = "tilemark.log";

thread_local! {
    pub static BACKTRACE: RefCell<Option<Backtrace>> = const { RefCell::new(None) };
}

fn keep_backtrace_of_panics() {
    std::panic::set_hook(Box::new(|_| {
        let trace = Backtrace::new();
        BACKTRACE.with(move |b| b.borrow_mut().replace(trace));
    }));
}

/// Sends events up to `level` to stdout and to `tilemark.log.<date>` in `log_folder`. Each
/// run starts with a line naming the version and the arguments. Dropping the returned
/// guard flushes the file.
///
/// # Panics
/// In case a global subscriber has already been set.
pub fn tracing_setup(log_folder: &Path, level: Level) -> WorkerGuard {
    let file_appender = tracing_appender::rolling::daily(log_folder, LOG_FILE_PREFIX);
    let (file_writer, guard_flush_file) = tracing_appender::non_blocking(file_appender);
    let file_layer = fmt::layer()
        .with_writer(file_writer)
        .with_ansi(false)
        .compact()
        .with_file(true)
        .with_line_number(true)
        .with_filter(LevelFilter::from_level(level));
    let stdout_layer = fmt::layer()
        .with_writer(io::stdout)
        .with_file(true)
        .with_line_number(true)
        .with_filter(LevelFilter::from_level(level));
    tracing_subscriber::registry()
        .with(file_layer)
        .with(stdout_layer)
        .init();
    keep_backtrace_of_panics();
    info!(
        "tilemark {} ({}) logging at {level} to {log_folder:?}, args {:?}",
        env!("CARGO_PKG_VERSION"),
        option_env!("GIT_DESC").unwrap_or("unknown revision"),
        std::env::args().skip(1).collect::<Vec<_>>()
    );
    guard_flush_file
}

/// Debug output captured by the test harness. Safe to call from every test.
pub fn init_tracing_for_tests() {
    // only the first call installs the subscriber
    let _ = fmt()
        .with_max_level(Level::DEBUG)
        .with_test_writer()
        .try_init();
}
