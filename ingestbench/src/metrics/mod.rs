//! Synthetic metric data as sent to the ingestion endpoint.

use rand::RngExt as _;
use serde::Serialize;

mod timestamps;

pub use self::timestamps::TimestampSequence;

/// Time to live attached to every generated point (2 days).
pub const DEFAULT_TTL_SECONDS: u64 = 172_800;

/// Unit attached to every generated point.
pub const DEFAULT_UNIT: &str = "seconds";

/// Upper bound (exclusive) of generated metric values.
const MAX_METRIC_VALUE: f64 = 100.0;

/// A single data point in the ingestion wire format.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricPoint {
    /// milliseconds since the unix epoch
    pub collection_time: i64,
    pub metric_name: String,
    pub metric_value: f64,
    pub ttl_in_seconds: u64,
    pub unit: &'static str,
}

/// N metric points sharing one collection time,
/// sent together as a single request.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    prefix: usize,
    index: usize,
    points: Vec<MetricPoint>,
}

impl Batch {
    /// Chain this batch belongs to.
    pub fn prefix(&self) -> usize {
        self.prefix
    }

    /// Position of this batch within its chain.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn points(&self) -> &[MetricPoint] {
        &self.points
    }

    /// Serialize to the JSON array expected by the ingestion endpoint.
    pub fn to_json(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(&self.points)
    }
}

/// Builds batches of a fixed size.
#[derive(Debug, Clone, Copy)]
pub struct BatchBuilder {
    metrics_per_batch: usize,
}

impl BatchBuilder {
    pub fn new(metrics_per_batch: usize) -> Self {
        Self { metrics_per_batch }
    }

    /// Build batch `index` of chain `prefix`, collected at `timestamp`.
    ///
    /// Points are named `{prefix}.{j}` for `j` in `0..N` and carry
    /// an independent random value in `[0, 100)` drawn from `rng`.
    pub fn build<R>(&self, prefix: usize, index: usize, timestamp: i64, rng: &mut R) -> Batch
    where
        R: rand::Rng + ?Sized,
    {
        let points = (0..self.metrics_per_batch)
            .map(|j| MetricPoint {
                collection_time: timestamp,
                metric_name: format!("{prefix}.{j}"),
                metric_value: rng.random_range(0.0..MAX_METRIC_VALUE),
                ttl_in_seconds: DEFAULT_TTL_SECONDS,
                unit: DEFAULT_UNIT,
            })
            .collect();

        Batch {
            prefix,
            index,
            points,
        }
    }
}
