use clap::{Parser, ValueEnum};
use is_terminal::IsTerminal;
use tracing::{Dispatch, dispatcher};
use tracing_log::AsLog;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
pub struct LoggingOpts {
    #[clap(long, env = "COLLNET_LOG_FORMAT", default_value = "text")]
    pub log_format: LogFormat,

    #[clap(long, env = "COLLNET_LOG_COLOR", default_value = "auto")]
    pub log_color: LogColor,

    /// Additional per-target directives in the RUST_LOG syntax. Anything
    /// set in the RUST_LOG environment variable takes priority.
    pub log_directives: Option<String>,
}

impl Default for LoggingOpts {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            log_color: LogColor::Auto,
            log_directives: None,
        }
    }
}

pub fn init(opts: &LoggingOpts) -> Result<(), anyhow::Error> {
    let color = match opts.log_color {
        // tracing_subscriber::fmt probes stdout for terminal detection.
        LogColor::Auto => std::io::stdout().is_terminal(),
        LogColor::Always => true,
        LogColor::Never => false,
    };

    let mut log_filter_builder = EnvFilter::builder();
    if let Some(directives) = &opts.log_directives {
        log_filter_builder =
            log_filter_builder.with_default_directive(directives.parse()?);
    }

    let log_filter = log_filter_builder.from_env_lossy();
    let builder = tracing_subscriber::fmt().with_env_filter(log_filter);

    #[cfg(test)]
    let builder = builder.with_test_writer();

    #[cfg(not(test))]
    let builder = builder.with_writer(std::io::stderr);

    let dispatch: Dispatch = match opts.log_format {
        LogFormat::Text => {
            let subscriber = builder.with_ansi(color).finish();
            subscriber.into()
        }
        LogFormat::Json => {
            let subscriber = builder.json().finish();
            subscriber.into()
        }
    };
    dispatcher::set_global_default(dispatch)?;

    // The log-crate bridge must be installed after the global default so
    // it picks up the subscriber's max level hint.
    tracing_log::LogTracer::builder()
        .with_max_level(tracing_core::LevelFilter::current().as_log())
        .init()?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Text,
    Json,
}

#[derive(Debug, Clone, PartialEq, Eq, ValueEnum)]
pub enum LogColor {
    Auto,
    Always,
    Never,
}
