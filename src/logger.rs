use std::{
    fmt,
    panic::Location,
    sync::{Arc, Mutex, OnceLock},
};

use crate::error::ConfigError;
use crate::event::{Field, Level, Record};

/// Destination for emitted log events.
///
/// Implementations must tolerate concurrent calls from every worker thread.
pub trait LogSink: Send + Sync {
    fn emit(&self, record: &Record, location: &'static Location<'static>);
}

static GLOBAL: OnceLock<Logger> = OnceLock::new();

/// Logging handle passed to every middleware.
///
/// A handle carries fields bound with [`Logger::with`]; they are prepended
/// to every event it emits. Cloning is cheap.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    bound: Arc<[Field]>,
}

impl Logger {
    pub fn new<T: LogSink + 'static>(sink: T) -> Self {
        Logger::from_arc(Arc::new(sink))
    }

    pub fn from_arc(sink: Arc<dyn LogSink>) -> Self {
        Logger {
            sink,
            bound: Arc::from(Vec::new()),
        }
    }

    /// Process-wide handle used by the `Default` middleware constructors.
    ///
    /// Falls back to the `log` crate backend (or a discarding sink without the
    /// `log` feature) when nothing was installed with [`Logger::set_global`].
    pub fn global() -> Logger {
        GLOBAL.get_or_init(Logger::fallback).clone()
    }

    /// Install the process-wide handle. Call once at the composition root,
    /// before building the middleware chain.
    pub fn set_global(logger: Logger) -> Result<(), ConfigError> {
        GLOBAL
            .set(logger)
            .map_err(|_| ConfigError::GlobalLoggerAlreadySet)
    }

    #[cfg(feature = "log")]
    fn fallback() -> Logger {
        Logger::new(crate::wrapper::rust_log::RustLogSink::default())
    }

    #[cfg(not(feature = "log"))]
    fn fallback() -> Logger {
        Logger::new(DiscardSink)
    }

    /// Scoped handle with `fields` bound after the already bound ones.
    pub fn with(&self, fields: Vec<Field>) -> Logger {
        if fields.is_empty() {
            return self.clone();
        }
        let bound: Vec<Field> = self.bound.iter().cloned().chain(fields).collect();
        Logger {
            sink: Arc::clone(&self.sink),
            bound: Arc::from(bound),
        }
    }

    pub fn bound_fields(&self) -> &[Field] {
        &self.bound
    }

    #[track_caller]
    pub fn emit(&self, level: Level, message: impl Into<String>, fields: Vec<Field>) {
        let fields = if self.bound.is_empty() {
            fields
        } else {
            self.bound.iter().cloned().chain(fields).collect()
        };
        let record = Record {
            level,
            message: message.into(),
            fields,
        };
        self.sink.emit(&record, Location::caller());
    }

    #[track_caller]
    pub fn debug(&self, message: impl Into<String>, fields: Vec<Field>) {
        self.emit(Level::Debug, message, fields)
    }

    #[track_caller]
    pub fn info(&self, message: impl Into<String>, fields: Vec<Field>) {
        self.emit(Level::Info, message, fields)
    }

    #[track_caller]
    pub fn warn(&self, message: impl Into<String>, fields: Vec<Field>) {
        self.emit(Level::Warn, message, fields)
    }

    #[track_caller]
    pub fn error(&self, message: impl Into<String>, fields: Vec<Field>) {
        self.emit(Level::Error, message, fields)
    }
}

impl Default for Logger {
    fn default() -> Self {
        Logger::global()
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("bound", &self.bound)
            .finish_non_exhaustive()
    }
}

/// Sink that drops every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardSink;

impl LogSink for DiscardSink {
    fn emit(&self, _record: &Record, _location: &'static Location<'static>) {}
}

/// Sink that keeps events in memory, for tests and diagnostics.
///
/// Clones share the same buffer.
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    records: Arc<Mutex<Vec<Record>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        MemorySink::default()
    }

    /// Handle writing into this sink.
    pub fn logger(&self) -> Logger {
        Logger::new(self.clone())
    }

    pub fn records(&self) -> Vec<Record> {
        match self.records.lock() {
            Ok(records) => records.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn len(&self) -> usize {
        self.records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Events whose message equals `message`.
    pub fn with_message(&self, message: &str) -> Vec<Record> {
        self.records()
            .into_iter()
            .filter(|record| record.message == message)
            .collect()
    }

    pub fn clear(&self) {
        match self.records.lock() {
            Ok(mut records) => records.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }
}

impl LogSink for MemorySink {
    fn emit(&self, record: &Record, _location: &'static Location<'static>) {
        match self.records.lock() {
            Ok(mut records) => records.push(record.clone()),
            Err(poisoned) => poisoned.into_inner().push(record.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_emit_prepends_bound_fields() {
        let sink = MemorySink::new();
        let logger = sink
            .logger()
            .with(vec![Field::str("request_id", "abc")]);

        logger.info("Processing", vec![Field::str("step", "one")]);

        let records = sink.records();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].level, Level::Info);
        assert_eq!(records[0].message, "Processing");
        assert_eq!(records[0].keys(), vec!["request_id", "step"]);
    }

    #[test]
    fn test_with_empty_fields_keeps_handle() {
        let sink = MemorySink::new();
        let logger = sink.logger();
        let scoped = logger.with(Vec::new());
        assert!(scoped.bound_fields().is_empty());

        let scoped = scoped
            .with(vec![Field::str("a", "1")])
            .with(vec![Field::str("b", "2")]);
        let keys: Vec<&str> = scoped.bound_fields().iter().map(Field::key).collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn test_memory_sink_clones_share_buffer() {
        let sink = MemorySink::new();
        let other = sink.clone();
        sink.logger().warn("first", Vec::new());
        other.logger().error("second", Vec::new());

        assert_eq!(sink.len(), 2);
        assert_eq!(other.with_message("second").len(), 1);
        assert_eq!(other.with_message("second")[0].level, Level::Error);

        sink.clear();
        assert!(other.is_empty());
    }

    #[test]
    fn test_discard_sink() {
        let logger = Logger::new(DiscardSink);
        logger.debug("dropped", vec![Field::uint("n", 1)]);
        assert!(logger.bound_fields().is_empty());
    }
}
