use std::fmt;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::{Event, Subscriber};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::fmt::format::Writer;
use tracing_subscriber::fmt::{FmtContext, FormatEvent, FormatFields, FormattedFields};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::retention::LOG_TIMESTAMP_FORMAT;

#[derive(Debug, Clone)]
pub struct LogConfig {
    pub log_level: String,
    pub log_file: PathBuf,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_file: PathBuf::from("logs.txt"),
        }
    }
}

/// Line layout of the persistent log:
/// `2024-03-09 08:30:00,123456 attempt_stats_etl::db INFO: message`.
///
/// The timestamp prefix is what [`crate::retention`] parses.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogLineFormat;

impl<S, N> FormatEvent<S, N> for LogLineFormat
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        let meta = event.metadata();
        write!(
            writer,
            "{} {} {}: ",
            Local::now().format(LOG_TIMESTAMP_FORMAT),
            meta.target(),
            meta.level()
        )?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Installs the global subscriber: human-readable stderr output plus the
/// append-mode log file.
///
/// The returned guard flushes the file writer when dropped and must live for
/// the whole run.
pub fn init_tracing(config: &LogConfig) -> std::io::Result<WorkerGuard> {
    let (file_writer, guard) = tracing_appender::non_blocking(open_append(&config.log_file)?);

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let stderr_layer = tracing_fmt::layer()
        .with_target(true)
        .with_writer(std::io::stderr);

    let file_layer = tracing_fmt::layer()
        .event_format(LogLineFormat)
        .with_ansi(false)
        .with_writer(file_writer);

    // A subscriber may already be installed when running under the test harness.
    if let Err(e) = Registry::default()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
    {
        eprintln!("tracing already initialised: {e}");
    }

    Ok(guard)
}

fn open_append(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}
