// Logging for the Kestrel runtime
//
// Built on the `tracing` ecosystem. The runtime itself only emits events and
// spans; installing a subscriber is left to the application, which can use
// the helpers below or any subscriber of its own.
//
// # Usage Examples
//
// ## Basic Initialization
//
// ```rust
// use kestrel::logging;
//
// // INFO level, human readable console output
// logging::init_default();
//
// // Or with custom settings
// let config = logging::LogConfig {
//     level: tracing::Level::DEBUG,
//     json_format: false,
//     ..Default::default()
// };
// logging::init(config);
// ```
//
// ## Presets
//
// - `init_development()`: DEBUG, colours, file/line, runtime internals at TRACE
// - `init_production()`: INFO, JSON, no file/line
// - `init_test()`: WARN only, compact
//
// ## File Logging
//
// ```rust
// use kestrel::logging;
//
// logging::init_with_file(logging::LogConfig::default(), "/var/log/kestrel/engine.log").unwrap();
// ```
//
// ## Runtime spans
//
// Every process task runs inside `actor_span!(address, id)`, so events
// logged from a receiver carry the pid of the actor that emitted them.
// Lifecycle transitions are logged with `log_lifecycle!` at DEBUG.

use std::io;
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt, prelude::*, EnvFilter, Layer};

/// Configuration for the logging helpers
///
/// # Examples
///
/// ```rust
/// use kestrel::logging::LogConfig;
/// use tracing::Level;
///
/// let config = LogConfig {
///     level: Level::DEBUG,
///     json_format: true,
///     show_file_line: false,
///     show_thread_info: true,
///     show_time: true,
///     target_filters: Some("kestrel=debug,kestrel::mailbox=trace".to_string()),
/// };
/// ```
#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Minimum log level to display
    pub level: Level,
    /// Whether to use JSON format for logs
    pub json_format: bool,
    /// Whether to include file and line information
    pub show_file_line: bool,
    /// Whether to include thread name/id
    pub show_thread_info: bool,
    /// Whether to include timestamps
    pub show_time: bool,
    /// Target filter expressions (format: "target=level,target2=level2,...")
    pub target_filters: Option<String>,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: Level::INFO,
            json_format: false,
            show_file_line: true,
            show_thread_info: true,
            show_time: true,
            target_filters: None,
        }
    }
}

// Initialization guard to ensure we only initialize once
static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            match directive.trim().parse() {
                Ok(directive) => filter = filter.add_directive(directive),
                Err(err) => eprintln!("Ignoring invalid log filter '{}': {}", directive, err),
            }
        }
    }
    filter
}

fn console_layer<S>(config: &LogConfig) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    let layer = fmt::layer()
        .with_ansi(atty::is(atty::Stream::Stdout))
        .with_file(config.show_file_line)
        .with_line_number(config.show_file_line)
        .with_thread_names(config.show_thread_info)
        .with_thread_ids(config.show_thread_info);

    match (config.json_format, config.show_time) {
        (true, true) => layer.json().flatten_event(true).boxed(),
        (true, false) => layer.json().flatten_event(true).without_time().boxed(),
        (false, true) => layer.boxed(),
        (false, false) => layer.without_time().boxed(),
    }
}

/// Initialize the logging system with the given configuration
///
/// Safe to call multiple times; only the first call takes effect. `RUST_LOG`
/// directives are honoured in addition to `config`.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer(&config));
        set_global_subscriber(subscriber);
    });
}

// Helper function to set the global subscriber
fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` for appending, creating it if needed
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging with both console and file output
///
/// The file always receives plain text with file, line and thread
/// information, whatever the console settings.
///
/// # Errors
/// Returns an error if `log_file` cannot be opened.
pub fn init_with_file(config: LogConfig, log_file: &str) -> io::Result<()> {
    // Fail early instead of silently falling back to stderr.
    file_writer(log_file)?;

    INIT.call_once(|| {
        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer(&config))
            .with(file_layer);
        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// INFO level, human readable console output
pub fn init_default() {
    init(LogConfig::default());
}

/// Initialize logging optimized for development
///
/// DEBUG for the runtime, TRACE for the mailbox and registry, coloured
/// console output with file/line and thread information.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("kestrel=debug,kestrel::mailbox=trace,kestrel::registry=trace".to_string()),
    });
}

/// Initialize logging optimized for production
///
/// JSON output for log aggregators, no file/line information.
pub fn init_production() {
    init(LogConfig {
        level: Level::INFO,
        json_format: true,
        show_file_line: false,
        show_thread_info: true,
        show_time: true,
        target_filters: None,
    });
}

/// Initialize logging for tests
///
/// Only warnings and errors, without thread information or timestamps.
pub fn init_test() {
    init(LogConfig {
        level: Level::WARN,
        json_format: false,
        show_file_line: true,
        show_thread_info: false,
        show_time: false,
        target_filters: None,
    });
}

/// Span wrapping everything a process does
///
/// # Examples
///
/// ```rust
/// use kestrel::actor_span;
///
/// let span = actor_span!("local", "orders/1");
/// let _guard = span.enter();
///
/// let span = actor_span!("local", "orders/1", restarts = 2);
/// ```
#[macro_export]
macro_rules! actor_span {
    ($address:expr, $id:expr) => {
        tracing::info_span!("actor", address = %$address, id = %$id)
    };
    ($address:expr, $id:expr, $($fields:tt)*) => {
        tracing::info_span!("actor", address = %$address, id = %$id, $($fields)*)
    };
}

/// Log a process lifecycle transition
///
/// # Examples
///
/// ```rust
/// use kestrel::log_lifecycle;
/// use kestrel_api::Pid;
///
/// let pid = Pid::new("local", "orders/1");
/// log_lifecycle!(pid, "started");
/// log_lifecycle!(pid, "stopped", restarts = 1);
/// ```
#[macro_export]
macro_rules! log_lifecycle {
    ($pid:expr, $event:expr) => {
        tracing::debug!(pid = %$pid, event = $event)
    };
    ($pid:expr, $event:expr, $($fields:tt)*) => {
        tracing::debug!(pid = %$pid, event = $event, $($fields)*)
    };
}

/// Log an error value with optional context fields
///
/// # Examples
///
/// ```rust
/// use kestrel::log_error;
///
/// let error = std::io::Error::new(std::io::ErrorKind::NotFound, "File not found");
/// log_error!(error);
/// log_error!(error, component = "remote", operation = "start");
/// ```
#[macro_export]
macro_rules! log_error {
    ($error:expr) => {
        tracing::error!(error = %$error)
    };
    ($error:expr, $($fields:tt)*) => {
        tracing::error!(error = %$error, $($fields)*)
    };
}

/// The current tracing dispatcher
///
/// Carry it into threads the runtime does not spawn so their events reach
/// the same subscriber.
///
/// ```rust
/// use kestrel::logging;
/// use std::thread;
///
/// let dispatcher = logging::current_subscriber();
/// thread::spawn(move || {
///     let _guard = tracing::dispatcher::set_default(&dispatcher);
///     tracing::info!("producer thread started");
/// });
/// ```
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

// Re-export the most commonly used tracing macros for convenience
pub use tracing::{debug, error, info, trace, warn};
