//! Logging and verbosity control.
//!
//! Provides a global logger with three verbosity levels:
//! - Quiet: Only errors and final results
//! - Normal: Progress bars and essential info (default)
//! - Verbose: Everything including debug details
//!
//! Library callers that never call `init` get a logger at Normal level, so
//! the query path can emit warnings without any setup.

use std::sync::OnceLock;

/// Verbosity level for controlling output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbosityLevel {
    /// Only errors and final results
    Quiet,
    /// Progress bars and essential info (default)
    Normal,
    /// Everything including debug details
    Verbose,
}

/// Global logger instance.
static LOGGER: OnceLock<Logger> = OnceLock::new();

/// Thread-safe logger for controlling application output.
#[derive(Debug)]
pub struct Logger {
    level: VerbosityLevel,
}

impl Logger {
    /// Initialize the global logger with the specified verbosity level.
    ///
    /// A second call is a no-op; the first level wins.
    pub fn init(level: VerbosityLevel) {
        let _ = LOGGER.set(Logger { level });
    }

    /// Get the global logger instance, defaulting to Normal verbosity.
    pub fn instance() -> &'static Logger {
        LOGGER.get_or_init(|| Logger {
            level: VerbosityLevel::Normal,
        })
    }

    /// Check if the current level is at least the given level.
    fn is_at_least(&self, level: VerbosityLevel) -> bool {
        (self.level as i32) >= (level as i32)
    }

    /// Returns true if verbose mode is enabled.
    pub fn is_verbose(&self) -> bool {
        self.level == VerbosityLevel::Verbose
    }

    /// Log an error message (always displayed).
    pub fn error(&self, msg: &str) {
        eprintln!("Error: {}", msg);
    }

    /// Log a warning (displayed in normal mode and above).
    pub fn warn(&self, msg: &str) {
        if self.is_at_least(VerbosityLevel::Normal) {
            eprintln!("Warning: {}", msg);
        }
    }

    /// Log a success message (displayed in quiet mode and above).
    pub fn success(&self, msg: &str) {
        if self.is_at_least(VerbosityLevel::Quiet) {
            println!("{}", msg);
        }
    }

    /// Log an info message (displayed in normal mode and above).
    pub fn info(&self, msg: &str) {
        if self.is_at_least(VerbosityLevel::Normal) {
            println!("{}", msg);
        }
    }

    /// Log a debug message (displayed only in verbose mode).
    pub fn debug(&self, msg: &str) {
        if self.is_at_least(VerbosityLevel::Verbose) {
            eprintln!("[DEBUG] {}", msg);
        }
    }
}

/// Log an error message (always displayed).
#[allow(dead_code)]
pub fn error(msg: &str) {
    Logger::instance().error(msg);
}

/// Log a warning (displayed in normal mode and above).
pub fn warn(msg: &str) {
    Logger::instance().warn(msg);
}

/// Log a success message (displayed in quiet mode and above).
pub fn success(msg: &str) {
    Logger::instance().success(msg);
}

/// Log an info message (displayed in normal mode and above).
pub fn info(msg: &str) {
    Logger::instance().info(msg);
}

/// Log a debug message (displayed only in verbose mode).
pub fn debug(msg: &str) {
    Logger::instance().debug(msg);
}
