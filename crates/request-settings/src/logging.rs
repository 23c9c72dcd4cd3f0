//! Initialization of `tracing` output for binaries driving the reconciler.
use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing::level_filters::LevelFilter;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitFileAppender {
        source: tracing_appender::rolling::InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InitSubscriber {
        source: tracing_subscriber::util::TryInitError,
    },
}

/// Initializes `tracing` logging with the filter directives read from the environment variable
/// `env`, falling back to the INFO level.
///
/// We encourage `env` to be the application name plus `_LOG`, e.g. `REQUEST_SETTINGS_LOG`.
///
/// Log output can be copied to a file by setting `{env}_DIRECTORY` to a directory path. The file
/// is rotated hourly and at most six files are kept.
pub fn initialize_logging(env: &str, app_name: &str) -> Result<(), Error> {
    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .with_env_var(env)
        .from_env_lossy();

    let directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_layer = directory
        .as_ref()
        .map(|directory| {
            RollingFileAppender::builder()
                .rotation(Rotation::HOURLY)
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(directory)
                .with_context(|_| InitFileAppenderSnafu {
                    directory: directory.clone(),
                })
        })
        .transpose()?
        .map(|appender| {
            tracing_subscriber::fmt::layer()
                .with_ansi(false)
                .with_writer(appender)
        });

    Registry::default()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .try_init()
        .context(InitSubscriberSnafu)?;

    // The subscriber has to be installed before anything can be logged.
    match directory {
        Some(directory) => {
            tracing::info!(directory = %directory.display(), "file logging enabled");
        }
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }

    Ok(())
}
