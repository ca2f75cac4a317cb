//! The benchmark run: batch chains, dispatching and throughput reporting.

use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use rama::{
    Service,
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing,
};

use crate::{
    config::BenchConfig,
    metrics::BatchBuilder,
    statsd::{StatsdSink, TimingSink},
};

pub mod client;
pub mod counters;
pub mod dispatcher;
pub mod driver;
pub mod reporter;

use self::{
    counters::Counters,
    dispatcher::Dispatcher,
    driver::{BatchDriver, ChainSchedule},
    reporter::{HumanReporter, JsonlReporter, Reporter, RunPlan, WindowedReporter},
};

/// Run the benchmark against the configured ingestion endpoint.
pub async fn exec(guard: ShutdownGuard, cfg: BenchConfig) -> Result<(), OpaqueError> {
    let client = self::client::new_ingest_client(cfg.batch_count as usize)
        .context("create ingest web client")?;

    let telemetry: Option<Arc<dyn TimingSink>> = if cfg.statsd {
        let sink = StatsdSink::try_new(cfg.statsd_address, &cfg.statsd_prefix)
            .context("create statsd timing sink")?;
        Some(Arc::new(sink))
    } else {
        None
    };

    let reporter: Box<dyn Reporter> = if cfg.json {
        Box::new(JsonlReporter::new())
    } else {
        Box::new(HumanReporter::new())
    };

    let now_ms = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock is set before the unix epoch")?
        .as_millis() as i64;

    run(guard, &cfg, client, telemetry, reporter, now_ms).await
}

#[derive(Debug)]
enum RunOutcome {
    Completed(u64),
    ReportsBound,
    Interrupted,
    Failed(OpaqueError),
}

async fn run<S>(
    guard: ShutdownGuard,
    cfg: &BenchConfig,
    client: S,
    telemetry: Option<Arc<dyn TimingSink>>,
    reporter: Box<dyn Reporter>,
    now_ms: i64,
) -> Result<(), OpaqueError>
where
    S: Service<Request, Output = Response, Error = OpaqueError>,
{
    let uri = cfg.ingest_uri()?;
    let counters = Arc::new(Counters::new());

    let mut dispatcher =
        Dispatcher::new(client, uri.clone(), counters.clone()).with_chunked(cfg.chunked);
    if let Some(sink) = telemetry {
        dispatcher = dispatcher.with_telemetry(sink);
    }

    let schedule = ChainSchedule {
        now_ms,
        duration: cfg.duration(),
        interval: cfg.interval(),
    };
    let driver = BatchDriver::new(
        dispatcher,
        BatchBuilder::new(cfg.metrics_per_batch as usize),
        schedule,
        cfg.batch_count as usize,
    )
    .with_seed(cfg.seed);

    let mut reporter = WindowedReporter::new(
        counters,
        reporter,
        cfg.metrics_per_batch,
        cfg.window as usize,
    )
    .with_max_reports(cfg.max_reports());

    tracing::info!(
        %uri,
        metrics_per_batch = cfg.metrics_per_batch,
        interval_ms = cfg.interval,
        duration_min = cfg.duration,
        chains = cfg.batch_count,
        chunked = cfg.chunked,
        max_reports = cfg.max_reports,
        window = cfg.window,
        "benchmark config ready",
    );

    reporter.start(&RunPlan {
        metrics_per_batch: cfg.metrics_per_batch,
        batch_count: cfg.batch_count,
        interval: cfg.interval(),
        duration: cfg.duration(),
        points_per_metric: cfg.batches_per_chain(),
    });

    let outcome = tokio::select! {
        _ = guard.cancelled() => RunOutcome::Interrupted,
        result = driver.run(guard.clone()) => match result {
            Ok(sent) => RunOutcome::Completed(sent),
            Err(err) => RunOutcome::Failed(err),
        },
        _ = reporter.run() => RunOutcome::ReportsBound,
    };

    match outcome {
        RunOutcome::Completed(sent) => {
            tracing::info!(%sent, "all batches sent: benchmark finished");
            reporter.report_final();
            Ok(())
        }
        RunOutcome::ReportsBound => {
            tracing::info!("maximum number of reports reached: benchmark finished");
            Ok(())
        }
        RunOutcome::Interrupted => {
            tracing::warn!("benchmark interrupted: guard shutdown");
            reporter.report_final();
            Ok(())
        }
        RunOutcome::Failed(err) => {
            tracing::error!("benchmark aborted: {err}");
            reporter.report_fatal(&err);
            Err(err)
        }
    }
}
