//! Logging setup: env_logger, routed through indicatif when on a TTY

use std::io::Write;

use indicatif::MultiProgress;

/// Five-column tag for a level.
fn level_tag(level: log::Level) -> &'static str {
    match level {
        log::Level::Error => "ERROR",
        log::Level::Warn => "WARN ",
        log::Level::Info => "INFO ",
        log::Level::Debug => "DEBUG",
        log::Level::Trace => "TRACE",
    }
}

/// SGR foreground code: red, yellow, green, cyan, magenta.
fn level_color(level: log::Level) -> u8 {
    30 + match level {
        log::Level::Error => 1,
        log::Level::Warn => 3,
        log::Level::Info => 2,
        log::Level::Debug => 6,
        log::Level::Trace => 5,
    }
}

/// Name of the calling thread, `main` for the orchestrator.
fn thread_label() -> String {
    std::thread::current()
        .name()
        .unwrap_or("unnamed")
        .to_string()
}

fn format_line(record: &log::Record, color: bool) -> String {
    let tag = level_tag(record.level());
    let thread = thread_label();
    if color {
        let code = level_color(record.level());
        format!("[\x1b[{code}m{tag}\x1b[0m] {thread:<14} {}", record.args())
    } else {
        format!("[{tag}] {thread:<14} {}", record.args())
    }
}

/// Logger that prints through indicatif MultiProgress so log lines don't
/// tear the status line.
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
        if self.inner.matches(record) {
            let line = format_line(record, true);
            self.multi.suspend(|| eprintln!("{line}"));
        }
    }

    fn flush(&self) {
        self.inner.flush();
    }
}

/// Initialize logging. `RUST_LOG` overrides the level picked from the flags.
///
/// With `multi` set (TTY), lines are colored and printed above the progress
/// line; otherwise plain lines go to stderr for log aggregation.
pub fn init_logging(quiet: bool, debug: bool, multi: Option<&MultiProgress>) {
    let default_level = if debug {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    // reqwest/hyper are chatty at debug
    let filter = format!("{default_level},hyper=warn,hyper_util=warn,reqwest=warn");
    let env = env_logger::Env::default().default_filter_or(filter);

    if let Some(multi) = multi {
        let logger = env_logger::Builder::from_env(env).build();
        let max_level = logger.filter();
        if log::set_boxed_logger(Box::new(IndicatifLogger::new(logger, multi.clone()))).is_ok() {
            log::set_max_level(max_level);
        }
    } else {
        let _ = env_logger::Builder::from_env(env)
            .format(|buf, record| writeln!(buf, "{}", format_line(record, false)))
            .try_init();
    }
}
