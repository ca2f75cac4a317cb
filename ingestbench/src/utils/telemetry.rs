use std::{io::IsTerminal as _, path::Path};

use rama::{
    error::{BoxError, ErrorContext as _},
    telemetry::tracing::{
        self,
        metadata::LevelFilter,
        subscriber::{
            EnvFilter,
            filter::{Directive, ParseError},
            fmt::writer::BoxMakeWriter,
        },
    },
};

use crate::Args;

/// Log settings, taken from the global CLI flags.
#[derive(Debug, Clone, Copy)]
pub struct TelemetryConfig<'a> {
    pub verbose: bool,
    pub pretty: bool,
    pub output: Option<&'a Path>,
}

impl<'a> From<&'a Args> for TelemetryConfig<'a> {
    fn from(args: &'a Args) -> Self {
        Self {
            verbose: args.verbose,
            pretty: args.pretty,
            output: args.output.as_deref(),
        }
    }
}

/// Debug logs of this tool only.
///
/// The http stack logs per request at debug level,
/// which would drown the benchmark's own logs.
fn verbose_directive() -> Result<Directive, ParseError> {
    format!("{}=debug", env!("CARGO_CRATE_NAME")).parse()
}

/// Set up logging to stderr, or to the `--output` file.
///
/// Stdout is reserved for the report lines.
/// `RUST_LOG` overrides the default INFO level.
pub fn init_tracing(cfg: TelemetryConfig<'_>) -> Result<(), BoxError> {
    let mut filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy();
    if cfg.verbose {
        filter = filter.add_directive(verbose_directive()?);
    }

    let (make_writer, ansi) = match cfg.output {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .append(true)
                .create(true)
                .open(path)
                .with_context(|| format!("open log file '{}'", path.display()))?;
            (BoxMakeWriter::new(file), false)
        }
        None => (
            BoxMakeWriter::new(std::io::stderr),
            std::io::stderr().is_terminal(),
        ),
    };

    let subscriber = tracing::subscriber::fmt()
        .with_ansi(ansi)
        .with_env_filter(filter)
        .with_writer(make_writer);

    if cfg.pretty {
        subscriber.pretty().try_init()?;
    } else {
        subscriber.try_init()?;
    }

    tracing::debug!(output = ?cfg.output, "tracing is set up");
    Ok(())
}
