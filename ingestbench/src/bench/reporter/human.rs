use rama::error::OpaqueError;

use super::{Reporter, RunPlan, ThroughputReport};

/// Column legend, also part of the CLI help.
pub const LEGEND: &str = "\
M/s    -- All time metrics per second.
M/s-K  -- Metrics per second over the course of the past K 10-second samples.
M/s-10 -- Metrics per second during the most recent 10 seconds.
Req/s  -- Successful requests per second.
Total  -- Total requests made (includes in-progress requests).
2xx    -- Successful requests (only includes completed requests).
Time   -- Total time since starting the benchmark, in milliseconds.";

const PLAN_HEADER: &str = "Points\tMetrics\tBatches\tM/Batch\tInterv\tDur\tPoints/metric";
const REPORT_HEADER: &str = "M/s\tM/s-K\tM/s-10\tReq/s\tTotal\t2xx\tTime";
const ERROR_LINE: &str = "err\terr\terr\terr\terr\terr\terr\tfinal";
const DONE_BANNER: &str = "~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~~DONE~~~~~~~~~~~~~~~~~~~~~~~~";

/// Tab separated report lines, meant to be pasted in a spreadsheet.
#[derive(Debug, Default)]
pub struct HumanReporter;

impl HumanReporter {
    pub fn new() -> Self {
        Self
    }

    fn format_plan(plan: &RunPlan) -> String {
        format!(
            "{PLAN_HEADER}\n{}\t{}\t{}\t{}\t{}ms\t{}m\t{}",
            plan.total_metrics(),
            plan.metrics_per_batch,
            plan.batch_count,
            plan.metrics_per_batch,
            plan.interval.as_millis(),
            plan.duration.as_secs() / 60,
            plan.points_per_metric,
        )
    }

    fn format_report(report: &ThroughputReport) -> String {
        let mut line = format!(
            "{:.0}\t{:.0}\t{:.0}\t{:.0}\t{}\t{}\t{}ms",
            report.all_time,
            report.recent,
            report.instant,
            report.requests_per_sec,
            report.counters.requests_issued,
            report.counters.successes,
            report.elapsed.as_millis(),
        );
        if report.is_final {
            line.push_str("\tfinal");
        }
        line
    }
}

impl Reporter for HumanReporter {
    fn on_start(&mut self, plan: &RunPlan) {
        println!("{}", Self::format_plan(plan));
        println!("{REPORT_HEADER}");
    }

    fn on_report(&mut self, report: &ThroughputReport) {
        println!("{}", Self::format_report(report));
        if report.is_final {
            println!("{DONE_BANNER}\n\n");
        }
    }

    fn on_fatal(&mut self, _err: &OpaqueError) {
        println!("{ERROR_LINE}");
    }
}
