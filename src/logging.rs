use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Mutex;

use clap::{Args, ValueEnum};
use log::{Level, LevelFilter, Log, Metadata, Record};

type SyslogLogger = syslog::Logger<syslog::LoggerBackend, syslog::Formatter3164>;

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl From<LogLevel> for LevelFilter {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Error => LevelFilter::Error,
            LogLevel::Warn => LevelFilter::Warn,
            LogLevel::Info => LevelFilter::Info,
            LogLevel::Debug => LevelFilter::Debug,
        }
    }
}

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Log level (default: warn for one-shot, info for serve)
    #[arg(long = "log-level", value_enum)]
    pub log_level: Option<LogLevel>,

    /// Append log messages to a file
    #[arg(long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// Send log messages to syslog
    #[arg(long)]
    pub syslog: bool,
}

/// Where formatted records end up. Stderr is always present.
enum Sink {
    Stderr,
    File(Mutex<File>),
    Syslog(Mutex<SyslogLogger>),
}

impl Sink {
    fn emit(&self, record: &Record, line: &str) {
        match self {
            Sink::Stderr => {
                let _ = writeln!(io::stderr().lock(), "{}", line);
            }
            Sink::File(file) => {
                if let Ok(mut f) = file.lock() {
                    let _ = writeln!(f, "{}", line);
                }
            }
            // Syslog adds its own process tag and severity.
            Sink::Syslog(logger) => {
                if let Ok(mut l) = logger.lock() {
                    let text = record.args().to_string();
                    let _ = match record.level() {
                        Level::Error => l.err(text),
                        Level::Warn => l.warning(text),
                        Level::Info => l.info(text),
                        Level::Debug | Level::Trace => l.debug(text),
                    };
                }
            }
        }
    }

    fn flush(&self) {
        if let Sink::File(file) = self {
            if let Ok(mut f) = file.lock() {
                let _ = f.flush();
            }
        }
    }
}

struct FortunadLogger {
    level: LevelFilter,
    sinks: Vec<Sink>,
}

fn level_tag(level: Level) -> &'static str {
    match level {
        Level::Error => "error",
        Level::Warn => "warning",
        Level::Info => "info",
        Level::Debug | Level::Trace => "debug",
    }
}

/// Daemon threads log under `fortunad::daemon`, `fortunad::server`,
/// `fortunad::source` and `fortunad::queue`; everything else is the
/// one-shot tool or the generator itself.
fn prefix(target: &str) -> &'static str {
    match target.rsplit("::").next() {
        Some("daemon") | Some("server") => "fortunad serve",
        Some("source") | Some("queue") => "fortunad entropy",
        _ => "fortunad",
    }
}

fn format_line(record: &Record) -> String {
    format!(
        "[{}] {}: {}",
        prefix(record.target()),
        level_tag(record.level()),
        record.args()
    )
}

impl Log for FortunadLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format_line(record);
        for sink in &self.sinks {
            sink.emit(record, &line);
        }
    }

    fn flush(&self) {
        for sink in &self.sinks {
            sink.flush();
        }
    }
}

/// Builds the sink list. Sinks that cannot be opened are skipped and
/// reported back so they can be logged once the logger is up.
fn open_sinks(args: &LogArgs) -> (Vec<Sink>, Vec<String>) {
    let mut sinks = vec![Sink::Stderr];
    let mut problems = Vec::new();

    if let Some(path) = &args.log_file {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => sinks.push(Sink::File(Mutex::new(f))),
            Err(e) => problems.push(format!("cannot open log file {}: {}", path.display(), e)),
        }
    }

    if args.syslog {
        let formatter = syslog::Formatter3164 {
            facility: syslog::Facility::LOG_DAEMON,
            hostname: None,
            process: "fortunad".into(),
            pid: std::process::id(),
        };
        match syslog::unix(formatter) {
            Ok(l) => sinks.push(Sink::Syslog(Mutex::new(l))),
            Err(e) => problems.push(format!("cannot connect to syslog: {}", e)),
        }
    }

    (sinks, problems)
}

pub fn init(args: &LogArgs, is_daemon: bool) {
    let level: LevelFilter = args
        .log_level
        .unwrap_or(if is_daemon { LogLevel::Info } else { LogLevel::Warn })
        .into();

    let (sinks, problems) = open_sinks(args);

    if log::set_boxed_logger(Box::new(FortunadLogger { level, sinks })).is_ok() {
        log::set_max_level(level);
    }
    for p in problems {
        log::warn!("{}", p);
    }
}
