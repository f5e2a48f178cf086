//! Logger bootstrap for hosts of the library.
//!
//! Library code only talks to the `log` facade. A host (the CLI, a test that
//! wants output) calls [`init_logging`] once; records then go either to size
//! rotated files under a directory or to stderr. Calling it again with the
//! same level and target is a no-op, anything else is an error, and it never
//! panics.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Once;

use flexi_logger::{Cleanup, Criterion, Duplicate, FileSpec, Logger, LoggerHandle, Naming, WriteMode};
use log::{error, info, LevelFilter};
use once_cell::sync::OnceCell;

use crate::interface::{CodeLibError, CodeLibResult};

const FILE_STEM: &str = "codelib";
const ROTATE_AT_BYTES: u64 = 8 * 1024 * 1024;
const KEPT_LOG_FILES: usize = 7;
/// Panic messages may quote snippet content.
const PANIC_MESSAGE_LIMIT: usize = 200;

static ACTIVE: OnceCell<ActiveLogger> = OnceCell::new();
static PANIC_HOOK: Once = Once::new();

/// Where records are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogTarget {
    Stderr,
    Directory(PathBuf),
}

impl LogTarget {
    fn from_dir(dir: Option<&Path>) -> Self {
        dir.map_or(LogTarget::Stderr, |d| LogTarget::Directory(d.to_path_buf()))
    }
}

impl fmt::Display for LogTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogTarget::Stderr => f.write_str("stderr"),
            LogTarget::Directory(dir) => write!(f, "{}", dir.display()),
        }
    }
}

struct ActiveLogger {
    level: LevelFilter,
    target: LogTarget,
    _handle: LoggerHandle,
}

/// Start logging at `level`, into rotated files under `log_dir` or to stderr.
pub fn init_logging(level: &str, log_dir: Option<&Path>) -> CodeLibResult<()> {
    let level = parse_level(level)?;
    let target = LogTarget::from_dir(log_dir);

    let active = ACTIVE.get_or_try_init(|| start(level, target.clone()))?;
    if active.level == level && active.target == target {
        return Ok(());
    }
    Err(CodeLibError::Configuration(format!(
        "logger is running at {} to {}; cannot reconfigure it to {} to {}",
        active.level, active.target, level, target
    )))
}

fn start(level: LevelFilter, target: LogTarget) -> CodeLibResult<ActiveLogger> {
    let spec = level.to_string().to_lowercase();
    let logger = Logger::try_with_str(&spec)
        .map_err(|e| CodeLibError::Configuration(format!("log level {spec}: {e}")))?;

    let logger = match &target {
        LogTarget::Stderr => logger
            .log_to_stderr()
            .format_for_stderr(flexi_logger::default_format),
        LogTarget::Directory(dir) => {
            std::fs::create_dir_all(dir)?;
            logger
                .log_to_file(FileSpec::default().directory(dir.as_path()).basename(FILE_STEM))
                .rotate(
                    Criterion::Size(ROTATE_AT_BYTES),
                    Naming::Numbers,
                    Cleanup::KeepLogFiles(KEPT_LOG_FILES),
                )
                .append()
                .write_mode(WriteMode::BufferAndFlush)
                .format_for_files(flexi_logger::detailed_format)
                // Warnings still reach the terminal of an interactive run.
                .duplicate_to_stderr(Duplicate::Warn)
        }
    };
    let handle = logger
        .start()
        .map_err(|e| CodeLibError::Configuration(format!("cannot start logger: {e}")))?;

    PANIC_HOOK.call_once(install_panic_hook);
    info!(
        "event=logging_init module=logging status=ok level={} target={} version={}",
        level,
        target,
        env!("CARGO_PKG_VERSION")
    );

    Ok(ActiveLogger {
        level,
        target,
        _handle: handle,
    })
}

/// Level and target of the running logger, if [`init_logging`] succeeded.
pub fn logging_status() -> Option<(LevelFilter, LogTarget)> {
    ACTIVE.get().map(|a| (a.level, a.target.clone()))
}

/// `debug` in debug builds, `info` in release builds.
pub fn default_log_level() -> &'static str {
    if cfg!(debug_assertions) {
        "debug"
    } else {
        "info"
    }
}

/// Parse a level name, case-insensitively. `warning` is accepted for `warn`.
pub fn parse_level(name: &str) -> CodeLibResult<LevelFilter> {
    let name = name.trim().to_ascii_lowercase();
    let name = if name == "warning" { "warn" } else { name.as_str() };
    name.parse::<LevelFilter>().map_err(|_| {
        CodeLibError::Configuration(format!(
            "unknown log level '{name}' (use off, error, warn, info, debug or trace)"
        ))
    })
}

fn install_panic_hook() {
    let previous = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |panic| {
        let message = panic
            .payload()
            .downcast_ref::<&str>()
            .copied()
            .or_else(|| panic.payload().downcast_ref::<String>().map(String::as_str))
            .unwrap_or("<non-string payload>");
        let at = panic
            .location()
            .map_or_else(|| "?".to_string(), |l| format!("{}:{}", l.file(), l.line()));
        error!(
            "event=panic module=logging status=error at={} message={}",
            at,
            one_line(message, PANIC_MESSAGE_LIMIT)
        );
        previous(panic);
    }));
}

/// Control characters become spaces; more than `limit` chars are cut.
fn one_line(text: &str, limit: usize) -> String {
    let flat: String = text
        .chars()
        .map(|c| if c.is_control() { ' ' } else { c })
        .collect();
    match flat.char_indices().nth(limit) {
        Some((cut, _)) => format!("{}...", &flat[..cut]),
        None => flat,
    }
}
