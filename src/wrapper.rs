#[cfg(feature = "log")]
pub mod rust_log {
    use std::{borrow::Cow, panic::Location};

    use crate::event::{Level, Record, Value};
    use crate::logger::LogSink;

    /// Forwards events to the `log` crate facade with typed key/values.
    ///
    /// Durations are forwarded as seconds (`f64`), timestamps as RFC 3339.
    #[derive(Debug, Clone)]
    pub struct RustLogSink {
        target: Cow<'static, str>,
    }

    impl RustLogSink {
        pub fn new() -> Self {
            RustLogSink::default()
        }

        /// Sets the logging target to `target`.
        ///
        /// By default the target is `actix_web_middleware_reqlog`.
        pub fn log_target(mut self, target: impl Into<Cow<'static, str>>) -> Self {
            self.target = target.into();
            self
        }

        pub fn target(&self) -> &str {
            &self.target
        }
    }

    impl Default for RustLogSink {
        fn default() -> Self {
            RustLogSink {
                target: Cow::Borrowed("actix_web_middleware_reqlog"),
            }
        }
    }

    impl LogSink for RustLogSink {
        fn emit(&self, record: &Record, location: &'static Location<'static>) {
            log(to_log_level(record.level), &self.target, location, record);
        }
    }

    fn to_log_level(level: Level) -> log::Level {
        match level {
            Level::Debug => log::Level::Debug,
            Level::Info => log::Level::Info,
            Level::Warn => log::Level::Warn,
            Level::Error => log::Level::Error,
        }
    }

    pub fn log(level: log::Level, target: &str, loc: &'static Location, record: &Record) {
        if level > log::max_level() {
            return;
        }

        let kvs: Vec<(&str, log::kv::Value)> = record
            .fields
            .iter()
            .map(|field| {
                let value = match field.value() {
                    Value::Str(s) => log::kv::Value::from(s.as_str()),
                    Value::Int(n) => log::kv::Value::from(*n),
                    Value::UInt(n) => log::kv::Value::from(*n),
                    Value::Duration(d) => log::kv::Value::from(d.as_secs_f64()),
                    Value::Time(_) => log::kv::Value::from_display(field.value()),
                };
                (field.key(), value)
            })
            .collect();
        let kvs = kvs.as_slice();

        log::logger().log(
            &log::Record::builder()
                .args(format_args!("{}", record.message))
                .level(level)
                .target(target)
                .module_path_static(Some(module_path!()))
                .file_static(Some(loc.file()))
                .line(Some(loc.line()))
                .key_values(&kvs)
                .build(),
        );
    }

    #[cfg(test)]
    mod tests {
        use super::*;

        #[test]
        fn test_log_target() {
            assert_eq!(RustLogSink::default().target(), "actix_web_middleware_reqlog");
            assert_eq!(RustLogSink::new().log_target("http").target(), "http");
        }

        #[test]
        fn test_level_mapping() {
            assert_eq!(to_log_level(Level::Debug), log::Level::Debug);
            assert_eq!(to_log_level(Level::Warn), log::Level::Warn);
            assert_eq!(to_log_level(Level::Error), log::Level::Error);
        }
    }
}
