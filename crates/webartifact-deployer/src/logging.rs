use std::path::PathBuf;

use snafu::{ResultExt, Snafu};
use tracing_appender::rolling::{InitError, RollingFileAppender};
use tracing_subscriber::{
    EnvFilter, Layer, Registry,
    fmt::MakeWriter,
    layer::SubscriberExt,
    util::{SubscriberInitExt, TryInitError},
};

#[derive(Debug, Snafu)]
pub enum Error {
    #[snafu(display("failed to initialize rolling file appender in {directory:?}"))]
    InitFileAppender {
        source: InitError,
        directory: PathBuf,
    },

    #[snafu(display("failed to install the global tracing subscriber"))]
    InstallSubscriber { source: TryInitError },
}

/// Output format of log lines written to stdout and the log file.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum LogFormat {
    #[default]
    Plain,
    Json,
}

/// Initializes `tracing` logging with options from the environment variable
/// given in the `env` parameter, e.g. `WEBARTIFACTCTL_LOG=debug`.
///
/// If the environment variable is not set, the maximum log level is INFO.
///
/// Log output is copied to a file if `{env}_DIRECTORY` (e.g.
/// `WEBARTIFACTCTL_LOG_DIRECTORY`) points to a directory. The file is rotated
/// regularly.
pub fn initialize_logging(env: &str, app_name: &str, format: LogFormat) -> Result<(), Error> {
    let filter = EnvFilter::try_from_env(env)
        .unwrap_or_else(|_| EnvFilter::new(tracing::Level::INFO.to_string()));

    let file_appender_directory = std::env::var_os(format!("{env}_DIRECTORY")).map(PathBuf::from);
    let file_appender = file_appender_directory
        .as_deref()
        .map(|log_dir| {
            RollingFileAppender::builder()
                .filename_suffix(format!("{app_name}.log"))
                .max_log_files(6)
                .build(log_dir)
                .context(InitFileAppenderSnafu {
                    directory: log_dir,
                })
        })
        .transpose()?;
    let mut layers = vec![format_layer(format, std::io::stdout, true)];
    if let Some(file_appender) = file_appender {
        layers.push(format_layer(format, file_appender, false));
    }

    Registry::default()
        .with(layers)
        .with(filter)
        .try_init()
        .context(InstallSubscriberSnafu)?;

    // need to delay logging until after tracing is initialized
    match file_appender_directory {
        Some(dir) => tracing::info!(directory = %dir.display(), "file logging enabled"),
        None => tracing::debug!("file logging disabled, because no log directory set"),
    }
    Ok(())
}

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Formats events to `writer`. Escape codes are only written to terminals.
fn format_layer<W>(format: LogFormat, writer: W, ansi: bool) -> BoxedLayer
where
    W: for<'writer> MakeWriter<'writer> + Send + Sync + 'static,
{
    let layer = tracing_subscriber::fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi);
    match format {
        LogFormat::Plain => layer.boxed(),
        LogFormat::Json => layer.json().boxed(),
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{Read, Seek, SeekFrom},
        sync::Arc,
    };

    use tracing::{debug, error, info};

    use super::*;

    // Run `WEBARTIFACT_TEST_LOG=debug cargo test default_level -- --nocapture`
    // to see all messages.
    #[test]
    fn default_level_is_info() {
        initialize_logging("WEBARTIFACT_TEST_LOG", "test", LogFormat::Plain).unwrap();

        error!("ERROR level messages should be seen.");
        info!("INFO level messages should also be seen by default.");
        debug!("DEBUG level messages should be seen only if the env var is set.");

        // The global subscriber can only be installed once.
        assert!(matches!(
            initialize_logging("WEBARTIFACT_TEST_LOG", "test", LogFormat::Json),
            Err(Error::InstallSubscriber { .. })
        ));
    }

    #[test]
    fn file_lines_are_plain_json() {
        let file = Arc::new(tempfile::tempfile().unwrap());
        let subscriber =
            Registry::default().with(format_layer(LogFormat::Json, Arc::clone(&file), false));
        tracing::subscriber::with_default(subscriber, || {
            info!(component = "shop-acme", "deployed web artifact");
        });

        let mut output = String::new();
        (&*file).seek(SeekFrom::Start(0)).unwrap();
        (&*file).read_to_string(&mut output).unwrap();

        assert!(!output.contains('\u{1b}'));
        let line: serde_json::Value = serde_json::from_str(output.trim()).unwrap();
        assert_eq!(line["fields"]["component"], "shop-acme");
        assert_eq!(line["fields"]["message"], "deployed web artifact");
    }
}
