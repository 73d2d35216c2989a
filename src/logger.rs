//! Logging abstraction, carried over from the teacher's `src/logger.rs`.
//!
//! Services are handed an `&impl ILogger` rather than calling `log::info!`
//! directly, so tests can swap in a silent/capturing logger without touching
//! the component under test.

use std::error::Error;

use log::{error, info, warn};

pub trait ILogger {
    fn inform(&self, message: impl AsRef<str>) {
        println!("{}", message.as_ref());
    }

    fn error(&self, error: &(dyn Error + 'static)) {
        println!("ERROR | {error}")
    }

    fn warn(&self, warning: impl AsRef<str>) {
        println!("WARN | {}", warning.as_ref())
    }
}

/// Println-based logger, used in tests and the benches.
pub struct DefaultLogger;

/// `log`-crate-backed logger, used by the running service.
pub struct Logger;

impl ILogger for DefaultLogger {}

impl ILogger for Logger {
    fn inform(&self, message: impl AsRef<str>) {
        info!("{}", message.as_ref());
    }

    fn warn(&self, warning: impl AsRef<str>) {
        warn!("{}", warning.as_ref());
    }

    fn error(&self, error: &(dyn Error + 'static)) {
        error!("{error}");
    }
}

/// Initializes `pretty_env_logger` from `RUST_LOG`, defaulting to `info`.
pub fn init() {
    if std::env::var("RUST_LOG").is_err() {
        // SAFETY: called once, very early in `main`, before any other thread exists.
        unsafe { std::env::set_var("RUST_LOG", "info") };
    }
    pretty_env_logger::init();
}
