//! Logging configuration and the in-memory run log.
//!
//! Every run keeps a copy of its own log output in a [`RunLog`] so the text can
//! be uploaded next to the results, both on success and when the run aborts.

use std::io;
use std::sync::{Arc, Mutex};

use tracing::Level;
use tracing_subscriber::fmt::MakeWriter;

/// Maximum length for a single logged value before it is truncated.
pub const MAX_FIELD_LENGTH: usize = 512;

/// Truncates a string to the maximum field length if needed.
pub fn truncate_field(value: &str, max_length: usize) -> String {
    if value.len() <= max_length {
        return value.to_string();
    }
    let mut end = max_length;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...(truncated)", &value[..end])
}

/// A cloneable, thread-safe buffer that collects formatted log lines.
///
/// Clones share the same buffer. It implements [`MakeWriter`] so it can be
/// plugged into a `tracing_subscriber::fmt` layer.
#[derive(Debug, Clone, Default)]
pub struct RunLog {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends raw text, used for lines that do not go through `tracing`.
    pub fn append(&self, text: &str) {
        if let Ok(mut buf) = self.buf.lock() {
            buf.extend_from_slice(text.as_bytes());
            if !text.ends_with('\n') {
                buf.push(b'\n');
            }
        }
    }

    /// Returns the collected text so far.
    pub fn contents(&self) -> String {
        self.buf
            .lock()
            .map(|buf| String::from_utf8_lossy(&buf).into_owned())
            .unwrap_or_default()
    }

    /// Returns the collected text and empties the buffer.
    pub fn take(&self) -> String {
        self.buf
            .lock()
            .map(|mut buf| String::from_utf8_lossy(&std::mem::take(&mut *buf)).into_owned())
            .unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.lock().map(|buf| buf.is_empty()).unwrap_or(true)
    }
}

/// Writer handed out by [`RunLog`] for each formatted event.
#[derive(Debug)]
pub struct RunLogWriter {
    buf: Arc<Mutex<Vec<u8>>>,
}

impl io::Write for RunLogWriter {
    fn write(&mut self, data: &[u8]) -> io::Result<usize> {
        let mut buf = self
            .buf
            .lock()
            .map_err(|_| io::Error::new(io::ErrorKind::Other, "run log lock poisoned"))?;
        buf.extend_from_slice(data);
        Ok(data.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for RunLog {
    type Writer = RunLogWriter;

    fn make_writer(&'a self) -> Self::Writer {
        RunLogWriter {
            buf: Arc::clone(&self.buf),
        }
    }
}

/// Configuration for the process-wide logging setup.
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level for dependencies
    pub level: Level,
    /// Log level for the linter's own modules
    pub linter_level: Level,
    /// Whether console output is JSON
    pub json_format: bool,
    /// Environment filter override
    pub env_filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: Level::WARN,
            linter_level: Level::INFO,
            json_format: false,
            env_filter: None,
        }
    }
}

impl LoggingConfig {
    /// Creates a configuration for production use.
    pub fn production() -> Self {
        Self {
            level: Level::WARN,
            linter_level: Level::INFO,
            json_format: true,
            env_filter: None,
        }
    }

    /// Creates a configuration for development use.
    pub fn development() -> Self {
        Self {
            level: Level::INFO,
            linter_level: Level::DEBUG,
            json_format: false,
            env_filter: None,
        }
    }

    pub fn with_level(mut self, level: Level) -> Self {
        self.level = level;
        self
    }

    pub fn with_linter_level(mut self, level: Level) -> Self {
        self.linter_level = level;
        self
    }

    pub fn with_json_format(mut self, enabled: bool) -> Self {
        self.json_format = enabled;
        self
    }

    pub fn with_env_filter(mut self, filter: impl Into<String>) -> Self {
        self.env_filter = Some(filter.into());
        self
    }

    /// Builds the environment filter string.
    pub fn env_filter(&self) -> String {
        match self.env_filter {
            Some(ref filter) => filter.clone(),
            None => format!(
                "{},data_linter={}",
                self.level.as_str().to_lowercase(),
                self.linter_level.as_str().to_lowercase()
            ),
        }
    }
}

/// Installs the global subscriber.
///
/// Console output goes to stderr. When `run_log` is given, a second plain-text
/// layer without ANSI colours writes into it so the run log can be uploaded.
///
/// # Examples
///
/// ```rust,no_run
/// use data_linter::logging::{init_logging, LoggingConfig, RunLog};
///
/// let run_log = RunLog::new();
/// init_logging(LoggingConfig::development(), Some(run_log.clone())).unwrap();
/// ```
pub fn init_logging(
    config: LoggingConfig,
    run_log: Option<RunLog>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(config.env_filter()));

    let console_layer = if config.json_format {
        tracing_subscriber::fmt::layer()
            .json()
            .with_writer(io::stderr)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer()
            .with_writer(io::stderr)
            .boxed()
    };

    let capture_layer = run_log.map(|log| {
        tracing_subscriber::fmt::layer()
            .with_ansi(false)
            .with_target(false)
            .with_writer(log)
    });

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(capture_layer)
        .try_init()?;

    Ok(())
}

/// Returns a subscriber that writes only into `run_log`.
///
/// Useful to scope capture to a block with `tracing::subscriber::set_default`.
pub fn capture_subscriber(run_log: RunLog) -> impl tracing::Subscriber + Send + Sync {
    tracing_subscriber::fmt()
        .with_ansi(false)
        .with_target(false)
        .with_max_level(Level::DEBUG)
        .with_writer(run_log)
        .finish()
}
