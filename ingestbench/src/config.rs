use std::{net::SocketAddr, num::NonZeroU64, time::Duration};

use rama::{
    error::{ErrorContext as _, OpaqueError},
    http::Uri,
};

/// Benchmark configuration.
///
/// Each batch chain sends `ceil(duration / interval)` batches
/// of `metrics` points, `batches` chains run concurrently.
#[derive(Debug, Clone, clap::Args)]
pub struct BenchConfig {
    /// base URI of the ingestion endpoint
    #[arg(long, value_name = "URI", default_value = "http://127.0.0.1:19000")]
    pub endpoint: Uri,

    /// tenant to ingest metrics for
    #[arg(long = "id", alias = "tenant-id", value_name = "TENANT", default_value = "123456")]
    pub tenant_id: String,

    /// Number of metrics per batch.
    #[arg(
        short = 'n',
        long = "metrics",
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    pub metrics_per_batch: u64,

    /// Interval in milliseconds between the collection times of consecutive batches.
    #[arg(
        short = 'i',
        long,
        value_name = "MILLISECONDS",
        default_value_t = 30_000,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    pub interval: u64,

    /// How many minutes ago the first data point is reported as having been collected.
    #[arg(short = 'd', long, value_name = "MINUTES", default_value_t = 60)]
    pub duration: u64,

    /// Number of batch chains sending concurrently.
    #[arg(
        short = 'b',
        long = "batches",
        value_name = "B",
        default_value_t = 20,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    pub batch_count: u64,

    /// Use chunked transfer encoding instead of a Content-Length header.
    #[arg(short = 'c', long, default_value_t = false)]
    pub chunked: bool,

    /// Maximum number of reporting intervals (each 10s) before stopping (0 = no limit).
    #[arg(short = 'r', long = "reports", value_name = "N", default_value_t = 0)]
    pub max_reports: u64,

    /// Include the K most recent samples for the M/s-K figure.
    #[arg(
        short = 'k',
        long = "ksamples",
        value_name = "K",
        default_value_t = 6,
        value_parser = clap::value_parser!(u64).range(1..),
    )]
    pub window: u64,

    /// Report request timings to StatsD.
    #[arg(long, value_name = "BOOL", default_value_t = true, action = clap::ArgAction::Set)]
    pub statsd: bool,

    /// StatsD (UDP) address timings are reported to.
    #[arg(long, value_name = "ADDRESS", default_value = "127.0.0.1:8125")]
    pub statsd_address: SocketAddr,

    /// Prefix of every StatsD metric name, joined with a dot.
    #[arg(long, value_name = "PREFIX", default_value = "")]
    pub statsd_prefix: String,

    /// Seed for the generated metric values (random if not defined).
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// report json lines instead of a human-friendly format
    #[arg(long, default_value_t = false)]
    pub json: bool,
}

impl BenchConfig {
    /// Full URI metrics are posted to.
    pub fn ingest_uri(&self) -> Result<Uri, OpaqueError> {
        let scheme = self.endpoint.scheme_str().unwrap_or("http");
        let authority = self
            .endpoint
            .authority()
            .ok_or_else(|| {
                OpaqueError::from_display("endpoint URI requires an authority (host:port)")
            })?;
        let base_path = self.endpoint.path().trim_end_matches('/');

        format!(
            "{scheme}://{authority}{base_path}/v1.0/{}/experimental/metrics",
            self.tenant_id
        )
        .parse()
        .with_context(|| format!("create ingest URI for tenant '{}'", self.tenant_id))
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval)
    }

    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration.saturating_mul(60))
    }

    /// Batches every chain sends over the full run.
    pub fn batches_per_chain(&self) -> u64 {
        (self.duration.saturating_mul(60_000)).div_ceil(self.interval.max(1))
    }

    pub fn max_reports(&self) -> Option<NonZeroU64> {
        NonZeroU64::new(self.max_reports)
    }
}
