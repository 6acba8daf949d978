// Logging for the grid
//
// Built on `tracing`. The grid itself only emits events; installing a
// subscriber is left to the embedding process, which can use the helpers
// below.
//
// # Usage Examples
//
// ```rust
// use grid::logging;
//
// // INFO level, human-readable console output
// logging::init(logging::LogConfig::default());
//
// // or DEBUG with file/line info while working on routing
// logging::init_development();
// ```
//
// ## Domain macros
//
// ```rust
// let span = grid::node_span!(node_id);
// let _guard = span.enter();
//
// grid::log_routing!("user-17", "remote", owner = 2);
// grid::log_relocation!("user-17", "shipped", to = 2, pending = 3);
// grid::log_buffer!("outbound-2", "deferred", queued = 4);
// ```

use std::io;
use std::sync::Once;

use tracing::{Level, Subscriber};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Configuration for the grid's subscriber setup
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

static INIT: Once = Once::new();

fn env_filter(config: &LogConfig) -> EnvFilter {
    let mut filter = EnvFilter::from_default_env().add_directive(config.level.into());
    if let Some(filters) = &config.target_filters {
        for directive in filters.split(',') {
            if let Ok(directive) = directive.parse() {
                filter = filter.add_directive(directive);
            }
        }
    }
    filter
}

/// Initialize the global subscriber with the given configuration.
///
/// Safe to call multiple times; only the first call takes effect.
pub fn init(config: LogConfig) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(&config));

        let subscriber: Box<dyn Subscriber + Send + Sync> = if config.json_format {
            Box::new(registry.with(fmt::layer().json().flatten_event(true)))
        } else if config.show_time {
            Box::new(
                registry.with(
                    fmt::layer()
                        .with_ansi(atty::is(atty::Stream::Stdout))
                        .with_file(config.show_file_line)
                        .with_line_number(config.show_file_line)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            )
        } else {
            Box::new(
                registry.with(
                    fmt::layer()
                        .without_time()
                        .with_ansi(atty::is(atty::Stream::Stdout))
                        .with_file(config.show_file_line)
                        .with_line_number(config.show_file_line)
                        .with_thread_names(config.show_thread_info)
                        .with_thread_ids(config.show_thread_info),
                ),
            )
        };

        set_global_subscriber(subscriber);
    });
}

fn set_global_subscriber<S>(subscriber: S)
where
    S: Subscriber + Send + Sync + 'static,
{
    if let Err(err) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Error setting global tracing subscriber: {}", err);
    }
}

/// Opens `path` in append mode for a file layer.
pub fn file_writer(path: &str) -> io::Result<Box<dyn io::Write + Send + Sync + 'static>> {
    use std::fs::OpenOptions;

    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Box::new(file))
}

/// Initialize logging to the console and to `log_file`.
///
/// The file is checked up front so a bad path is reported to the caller
/// instead of silently falling back to stderr.
pub fn init_with_file(config: LogConfig, log_file: &str) -> Result<(), io::Error> {
    file_writer(log_file)?;

    INIT.call_once(|| {
        let console_layer = fmt::layer()
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_file(config.show_file_line)
            .with_line_number(config.show_file_line)
            .with_thread_names(config.show_thread_info)
            .with_thread_ids(config.show_thread_info);

        let log_file_path = log_file.to_string();
        let file_layer = fmt::layer()
            .with_ansi(false)
            .with_writer(move || match file_writer(&log_file_path) {
                Ok(writer) => writer,
                Err(_) => Box::new(std::io::stderr()),
            })
            .with_file(true)
            .with_line_number(true)
            .with_thread_names(true)
            .with_thread_ids(true);

        let subscriber = tracing_subscriber::registry()
            .with(env_filter(&config))
            .with(console_layer)
            .with(file_layer);

        set_global_subscriber(subscriber);
    });

    Ok(())
}

/// DEBUG for the grid, TRACE for routing decisions, colored output with file/line info.
pub fn init_development() {
    init(LogConfig {
        level: Level::DEBUG,
        json_format: false,
        show_file_line: true,
        show_thread_info: true,
        show_time: true,
        target_filters: Some("grid=debug,grid::mailbox=trace".to_string()),
    });
}

/// INFO level JSON output without file/line info, for log aggregators.
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

/// Warnings and errors only, to keep test output readable.
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

/// Span covering the work one grid node does.
///
/// ```rust
/// let span = grid::node_span!(3u64);
/// let span = grid::node_span!(3u64, component = "inbound");
/// ```
#[macro_export]
macro_rules! node_span {
    ($node:expr) => {
        $crate::__tracing::info_span!("grid_node", node = %$node)
    };
    ($node:expr, $($fields:tt)*) => {
        $crate::__tracing::info_span!("grid_node", node = %$node, $($fields)*)
    };
}

/// Routing decision for one address: local, remote, forward, localized.
#[macro_export]
macro_rules! log_routing {
    ($address:expr, $route:expr) => {
        $crate::__tracing::debug!(address = %$address, route = $route)
    };
    ($address:expr, $route:expr, $($fields:tt)*) => {
        $crate::__tracing::debug!(address = %$address, route = $route, $($fields)*)
    };
}

/// Relocation progress for one address.
#[macro_export]
macro_rules! log_relocation {
    ($address:expr, $stage:expr) => {
        $crate::__tracing::info!(address = %$address, stage = $stage)
    };
    ($address:expr, $stage:expr, $($fields:tt)*) => {
        $crate::__tracing::info!(address = %$address, stage = $stage, $($fields)*)
    };
}

/// Health gate activity: deferred, drained, discarded.
#[macro_export]
macro_rules! log_buffer {
    ($gate:expr, $event:expr) => {
        $crate::__tracing::debug!(gate = $gate, event = $event)
    };
    ($gate:expr, $event:expr, $($fields:tt)*) => {
        $crate::__tracing::debug!(gate = $gate, event = $event, $($fields)*)
    };
}

/// The current dispatcher, for carrying the configuration into spawned threads.
#[inline]
pub fn current_subscriber() -> tracing::Dispatch {
    tracing::dispatcher::get_default(|d| d.clone())
}

pub use tracing::{debug, error, info, trace, warn};
