use rama::error::OpaqueError;

use super::{Reporter, RunPlan, ThroughputReport};

/// One json object per line, for automated collection of results.
#[derive(Debug, Default)]
pub struct JsonlReporter;

impl JsonlReporter {
    pub fn new() -> Self {
        Self
    }

    fn plan_json(plan: &RunPlan) -> serde_json::Value {
        serde_json::json!({
            "type": "plan",
            "points": plan.total_metrics(),
            "metrics_per_batch": plan.metrics_per_batch,
            "batches": plan.batch_count,
            "interval_ms": plan.interval.as_millis() as u64,
            "duration_min": plan.duration.as_secs() / 60,
            "points_per_metric": plan.points_per_metric,
        })
    }

    fn report_json(report: &ThroughputReport) -> serde_json::Value {
        serde_json::json!({
            "type": "report",
            "tick": report.tick,
            "t_ms": report.elapsed.as_millis() as u64,
            "metrics_per_sec": report.all_time,
            "metrics_per_sec_window": report.recent,
            "metrics_per_sec_interval": report.instant,
            "requests_per_sec": report.requests_per_sec,
            "total": report.counters.requests_issued,
            "ok": report.counters.successes,
            "final": report.is_final,
        })
    }
}

impl Reporter for JsonlReporter {
    fn on_start(&mut self, plan: &RunPlan) {
        println!("{}", Self::plan_json(plan));
    }

    fn on_report(&mut self, report: &ThroughputReport) {
        println!("{}", Self::report_json(report));
    }

    fn on_fatal(&mut self, err: &OpaqueError) {
        let line = serde_json::json!({
            "type": "error",
            "error": err.to_string(),
            "final": true,
        });
        println!("{line}");
    }
}
