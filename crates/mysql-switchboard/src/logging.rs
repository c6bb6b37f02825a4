//! Logging macros that set target to "mysql_switchboard" for all log calls.
//!
//! Without an explicit target, tracing uses the full module path
//! (e.g., "mysql_switchboard::session::router"), which makes `RUST_LOG`
//! filters and log lines noisy. These macros keep every log from this crate
//! under a single "mysql_switchboard" target.

macro_rules! trace {
    ($($arg:tt)*) => { ::tracing::trace!(target: "mysql_switchboard", $($arg)*) };
}

macro_rules! debug {
    ($($arg:tt)*) => { ::tracing::debug!(target: "mysql_switchboard", $($arg)*) };
}

macro_rules! info {
    ($($arg:tt)*) => { ::tracing::info!(target: "mysql_switchboard", $($arg)*) };
}

macro_rules! warn {
    ($($arg:tt)*) => { ::tracing::warn!(target: "mysql_switchboard", $($arg)*) };
}

macro_rules! error {
    ($($arg:tt)*) => { ::tracing::error!(target: "mysql_switchboard", $($arg)*) };
}
