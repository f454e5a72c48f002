use time::{UtcOffset, format_description::well_known::Rfc3339};
use tracing::Subscriber;
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::{self, time::OffsetTime},
    layer::{Layered, SubscriberExt},
    registry::LookupSpan,
    util::{SubscriberInitExt, TryInitError},
};

use crate::logger::{config::LoggerConfig, error::LoggerError, format::LoggerFormat};

type Filtered = Layered<EnvFilter, Registry>;

/// Build the subscriber for `cfg` and make it the global default.
pub(crate) fn install(cfg: &LoggerConfig) -> Result<(), LoggerError> {
    let base = tracing_subscriber::registry().with(env_filter(&cfg.level)?);

    let installed = match cfg.format {
        LoggerFormat::Text => base.with(text_layer(cfg)).try_init(),
        LoggerFormat::Json => base.with(json_layer(cfg)).try_init(),
        LoggerFormat::Journald => return install_journald(base),
    };
    installed.map_err(init_error)
}

fn env_filter(level: &str) -> Result<EnvFilter, LoggerError> {
    EnvFilter::try_new(level).map_err(|_| LoggerError::InvalidLogLevel(level.to_string()))
}

/// RFC 3339 timestamps in the local offset, UTC when it cannot be determined.
fn local_timer() -> OffsetTime<Rfc3339> {
    let offset = UtcOffset::current_local_offset().unwrap_or(UtcOffset::UTC);
    OffsetTime::new(offset, Rfc3339)
}

fn text_layer<S>(cfg: &LoggerConfig) -> impl Layer<S> + use<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .with_ansi(cfg.use_color)
        .with_target(cfg.with_targets)
        .with_timer(local_timer())
}

fn json_layer<S>(cfg: &LoggerConfig) -> impl Layer<S> + use<S>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fmt::layer()
        .json()
        .with_ansi(false)
        .with_target(cfg.with_targets)
        .with_current_span(true)
        .with_timer(local_timer())
}

#[cfg(all(target_os = "linux", feature = "journald"))]
fn install_journald(base: Filtered) -> Result<(), LoggerError> {
    let journald = tracing_journald::layer()
        .map_err(|e| LoggerError::InitializationFailed(format!("journald: {e}")))?
        .with_syslog_identifier("keel".to_string());
    base.with(journald).try_init().map_err(init_error)
}

#[cfg(not(all(target_os = "linux", feature = "journald")))]
fn install_journald(_base: Filtered) -> Result<(), LoggerError> {
    Err(LoggerError::JournaldNotSupported)
}

/// Rejections by `tracing`'s global dispatcher and by the `log` bridge.
const ALREADY_SET: [&str; 2] = [
    "a global default trace dispatcher has already been set",
    "attempted to set a logger after the logging system was already initialized",
];

fn init_error(e: TryInitError) -> LoggerError {
    classify_init_failure(e.to_string())
}

fn classify_init_failure(message: String) -> LoggerError {
    if ALREADY_SET.contains(&message.as_str()) {
        LoggerError::AlreadyInitialized
    } else {
        LoggerError::InitializationFailed(message)
    }
}
