//! Process-wide log facade
//!
//! The library logs through a small sink with four channels: `verbose`,
//! `debug`, `error`, and `stacktrace`. The default writer forwards to
//! `tracing`; embedders can install their own writer. Levels gate the
//! channels: VERBOSE passes everything, DEBUG drops verbose, ERROR keeps
//! only error and stacktrace, SILENT drops all four.
//!
//! Like the random source, reconfiguration after the first session is
//! undefined: in-flight calls may still observe the previous writer.

use std::fmt::Display;
use std::sync::{Arc, PoisonError, RwLock};

/// Log verbosity levels
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    /// All channels
    Verbose = 0,
    /// Everything except verbose
    Debug = 1,
    /// Error and stacktrace only
    Error = 2,
    /// Nothing
    Silent = 3,
}

/// Destination for log output
pub trait LogWriter: Send + Sync {
    /// Verbose channel
    fn verbose(&self, tag: &str, message: &str);
    /// Debug channel
    fn debug(&self, tag: &str, message: &str);
    /// Error channel
    fn error(&self, tag: &str, message: &str);
    /// Error-class channel carrying a source error
    fn stacktrace(&self, tag: &str, error: &dyn Display);
}

struct TracingWriter;

impl LogWriter for TracingWriter {
    fn verbose(&self, tag: &str, message: &str) {
        tracing::trace!(target: "silkwire", "[{tag}] {message}");
    }

    fn debug(&self, tag: &str, message: &str) {
        tracing::debug!(target: "silkwire", "[{tag}] {message}");
    }

    fn error(&self, tag: &str, message: &str) {
        tracing::error!(target: "silkwire", "[{tag}] {message}");
    }

    fn stacktrace(&self, tag: &str, error: &dyn Display) {
        tracing::error!(target: "silkwire", "[{tag}] {error}");
    }
}

struct State {
    level: Level,
    writer: Arc<dyn LogWriter>,
}

static STATE: RwLock<Option<State>> = RwLock::new(None);

fn with_state<R>(f: impl FnOnce(&State) -> R) -> R {
    {
        let guard = STATE.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(state) = guard.as_ref() {
            return f(state);
        }
    }
    let mut guard = STATE.write().unwrap_or_else(PoisonError::into_inner);
    let state = guard.get_or_insert_with(|| State {
        level: Level::Error,
        writer: Arc::new(TracingWriter),
    });
    f(state)
}

/// Set the log level
pub fn set_level(level: Level) {
    with_state(|_| {});
    let mut guard = STATE.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(state) = guard.as_mut() {
        state.level = level;
    }
}

/// Install a log writer
pub fn set_writer(writer: Arc<dyn LogWriter>) {
    with_state(|_| {});
    let mut guard = STATE.write().unwrap_or_else(PoisonError::into_inner);
    if let Some(state) = guard.as_mut() {
        state.writer = writer;
    }
}

/// Log on the verbose channel
pub fn verbose(tag: &str, message: &str) {
    with_state(|state| {
        if state.level <= Level::Verbose {
            state.writer.verbose(tag, message);
        }
    });
}

/// Log on the debug channel
pub fn debug(tag: &str, message: &str) {
    with_state(|state| {
        if state.level <= Level::Debug {
            state.writer.debug(tag, message);
        }
    });
}

/// Log on the error channel
pub fn error(tag: &str, message: &str) {
    with_state(|state| {
        if state.level <= Level::Error {
            state.writer.error(tag, message);
        }
    });
}

/// Log a source error on the error-class channel
pub fn stacktrace(tag: &str, error: &dyn Display) {
    with_state(|state| {
        if state.level <= Level::Error {
            state.writer.stacktrace(tag, error);
        }
    });
}
