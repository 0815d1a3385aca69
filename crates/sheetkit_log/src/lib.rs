//! `sheetkit_log` v1:
//! Logging facade shared by all sheetkit crates.
//!
//! Every crate logs through the `sheet_*` macros below, which forward to the
//! `log` facade. Hosts pick the backend; [`initialize`] installs a terminal
//! logger for command-line style hosts and [`initialize_for_tests`] is the
//! idempotent variant used from `#[cfg(test)]` modules.

#![deny(missing_docs)]

pub use log;
pub use log::LevelFilter;

/// Logs a trace-level message using the global logging facade.
#[macro_export]
macro_rules! sheet_trace {
    ($($arg:tt)*) => {{
        $crate::log::trace!($($arg)*);
    }};
}

/// Logs a debug-level message using the global logging facade.
#[macro_export]
macro_rules! sheet_debug {
    ($($arg:tt)*) => {{
        $crate::log::debug!($($arg)*);
    }};
}

/// Logs an info-level message using the global logging facade.
#[macro_export]
macro_rules! sheet_info {
    ($($arg:tt)*) => {{
        $crate::log::info!($($arg)*);
    }};
}

/// Logs a warn-level message using the global logging facade.
#[macro_export]
macro_rules! sheet_warn {
    ($($arg:tt)*) => {{
        $crate::log::warn!($($arg)*);
    }};
}

/// Logs an error-level message using the global logging facade.
#[macro_export]
macro_rules! sheet_error {
    ($($arg:tt)*) => {{
        $crate::log::error!($($arg)*);
    }};
}

/// Install a terminal logger at `level`.
///
/// Returns an error text when a global logger is already installed.
pub fn initialize(level: LevelFilter) -> Result<(), String> {
    use simplelog::{ColorChoice, ConfigBuilder, TermLogger, TerminalMode};

    let cfg_logger = ConfigBuilder::new()
        .set_target_level(LevelFilter::Error)
        .set_thread_level(LevelFilter::Debug)
        .build();

    TermLogger::init(level, cfg_logger, TerminalMode::Mixed, ColorChoice::Auto)
        .map_err(|err| format!("Failed to initialize logger: {err}"))
}

/// Parse a textual level (`"info"`, `"DEBUG"`, ...) into a [`LevelFilter`].
///
/// Unknown values fall back to `Info`.
pub fn parse_level(level: &str) -> LevelFilter {
    level
        .trim()
        .parse::<LevelFilter>()
        .unwrap_or(LevelFilter::Info)
}

/// Initializes a simple terminal logger for use in unit tests.
///
/// This safely no-ops if another logger has already been initialized.
pub fn initialize_for_tests() {
    let level = if cfg!(debug_assertions) {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    let _ = initialize(level);
}
