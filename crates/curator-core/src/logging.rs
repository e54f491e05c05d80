//! Log output that cooperates with active download bars.
//!
//! TTY mode routes every record through `MultiProgress::suspend` so a
//! log line never tears an in-flight bar. Non-TTY mode is plain
//! `env_logger` with millisecond timestamps for log aggregation.

use indicatif::MultiProgress;
use log::Level;

/// `RUST_LOG`-style filter applied when the variable is unset. The
/// HTTP stack is noisy at debug, so it stays at warn even with
/// `debug = true`.
fn default_filter(quiet: bool, debug: bool) -> String {
    let level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    format!("{level},reqwest=warn,hyper=warn,hyper_util=warn")
}

fn level_color(level: Level) -> &'static str {
    match level {
        Level::Error => "\x1b[31m",
        Level::Warn => "\x1b[33m",
        Level::Info => "\x1b[32m",
        Level::Debug | Level::Trace => "\x1b[2m",
    }
}

/// Logger wrapper that prints above managed progress bars.
pub struct IndicatifLogger {
    inner: env_logger::Logger,
    multi: MultiProgress,
}

impl IndicatifLogger {
    pub fn new(inner: env_logger::Logger, multi: MultiProgress) -> Self {
        Self { inner, multi }
    }
}

impl log::Log for IndicatifLogger {
    fn enabled(&self, metadata: &log::Metadata) -> bool {
        self.inner.enabled(metadata)
    }

    fn log(&self, record: &log::Record) {
        if !self.inner.enabled(record.metadata()) {
            return;
        }
        // Compact, no timestamp: interleaves with bars on a terminal
        let color = level_color(record.level());
        let line = format!("{color}{:>5}\x1b[0m {}", record.level(), record.args());
        self.multi.suspend(|| eprintln!("{line}"));
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize global logging.
///
/// Pass the progress `MultiProgress` when bars are active (TTY);
/// `None` selects the timestamped plain format.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let env = env_logger::Env::default().default_filter_or(default_filter(quiet, debug));
    match multi {
        Some(multi) => {
            let logger = env_logger::Builder::from_env(env).build();
            let max_level = logger.filter();
            log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone())))
                .expect("failed to init logger");
            log::set_max_level(max_level);
        }
        None => {
            env_logger::Builder::from_env(env)
                .format_timestamp_millis()
                .init();
        }
    }
}
