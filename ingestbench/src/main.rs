use std::{path::PathBuf, sync::Arc, time::Duration};

use clap::Parser;
use parking_lot::Mutex;
use rama::{
    error::{BoxError, OpaqueError},
    graceful,
    telemetry::tracing,
};

pub mod bench;
pub mod config;
pub mod metrics;
pub mod statsd;
pub mod utils;

#[cfg(target_family = "unix")]
#[global_allocator]
static ALLOC: jemallocator::Jemalloc = jemallocator::Jemalloc;

#[cfg(target_os = "windows")]
#[global_allocator]
static ALLOC: mimalloc::MiMalloc = mimalloc::MiMalloc;

/// Load generator for a metrics ingestion endpoint.
#[derive(Debug, Clone, Parser)]
#[command(name = "ingestbench")]
#[command(bin_name = "ingestbench")]
#[command(version, about, long_about = None)]
#[command(after_help = bench::reporter::LEGEND)]
pub struct Args {
    #[command(flatten)]
    bench: config::BenchConfig,

    /// debug logging for this tool instead of Info; use RUST_LOG env for more options
    #[arg(long, short = 'v', default_value_t = false)]
    pub verbose: bool,

    /// enable pretty logging (format for humans)
    #[arg(long, default_value_t = false)]
    pub pretty: bool,

    /// write the tracing output to the provided (log) file instead of stderr
    #[arg(long, short = 'o')]
    pub output: Option<PathBuf>,

    #[arg(long, value_name = "SECONDS", default_value_t = 0.)]
    /// the graceful shutdown timeout (<= 0.0 = no timeout)
    pub graceful: f64,
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    let args = Args::parse();

    utils::telemetry::init_tracing(utils::telemetry::TelemetryConfig::from(&args))?;

    let base_shutdown_signal = graceful::default_signal();
    if let Err(err) = run_with_args(base_shutdown_signal, args).await {
        eprintln!("🚩 exit with error: {err}");
        std::process::exit(1);
    }

    Ok(())
}

/// run the benchmark with the given args
async fn run_with_args<F>(base_shutdown_signal: F, args: Args) -> Result<(), BoxError>
where
    F: Future<Output: Send + 'static> + Send + 'static,
{
    let graceful_timeout = (args.graceful > 0.).then(|| Duration::from_secs_f64(args.graceful));

    let fatal_err = Arc::new(Mutex::new(None));
    let (error_tx, error_rx) = tokio::sync::oneshot::channel::<OpaqueError>();
    let graceful = graceful::Shutdown::new(new_shutdown_signal(
        error_rx,
        base_shutdown_signal,
        fatal_err.clone(),
    ));

    graceful.spawn_task_fn(async move |guard| {
        if let Err(err) = self::bench::exec(guard, args.bench).await {
            let _ = error_tx.send(err);
        }
    });

    let delay = match graceful_timeout {
        Some(duration) => graceful.shutdown_with_limit(duration).await?,
        None => graceful.shutdown().await,
    };

    tracing::debug!("gracefully shutdown with a delay of: {delay:?}");

    match fatal_err.lock().take() {
        Some(err) => Err(err.into()),
        None => Ok(()),
    }
}

fn new_shutdown_signal(
    error_rx: tokio::sync::oneshot::Receiver<OpaqueError>,
    base_shutdown_signal: impl Future<Output: Send + 'static> + Send + 'static,
    fatal_err: Arc<Mutex<Option<OpaqueError>>>,
) -> impl Future + Send + 'static {
    async move {
        tokio::select! {
            _ = base_shutdown_signal => {
                tracing::debug!("default signal triggered: init graceful shutdown");
            }
            result = error_rx => {
                match result {
                    Ok(err) => {
                        tracing::error!("fatal err received: {err}; abort");
                        *fatal_err.lock() = Some(err);
                    },
                    Err(_) => {
                        tracing::debug!("benchmark is finished without error, return control");
                    },
                }
            }
        }
    }
}
