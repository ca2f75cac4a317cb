use std::{num::NonZeroU64, sync::Arc, time::Duration};

use rama::{error::OpaqueError, telemetry::tracing};
use tokio::time::{Instant, MissedTickBehavior};

use super::counters::Counters;

mod human;
mod json;
mod window;

pub use self::{
    human::{HumanReporter, LEGEND},
    json::JsonlReporter,
    window::{ThroughputReport, ThroughputWindow},
};

/// Fixed time between two reports.
pub const REPORT_INTERVAL: Duration = Duration::from_secs(10);

/// Output of a benchmark run.
pub trait Reporter: Send + 'static {
    fn on_start(&mut self, plan: &RunPlan);
    fn on_report(&mut self, report: &ThroughputReport);
    fn on_fatal(&mut self, err: &OpaqueError);
}

/// What a run is about to send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunPlan {
    pub metrics_per_batch: u64,
    pub batch_count: u64,
    pub interval: Duration,
    pub duration: Duration,
    /// batches per chain, which equals the points sent per metric
    pub points_per_metric: u64,
}

impl RunPlan {
    /// Distinct metrics over all chains.
    pub fn total_metrics(&self) -> u64 {
        self.metrics_per_batch.saturating_mul(self.batch_count)
    }
}

/// Periodically samples the run counters and reports throughput.
pub struct WindowedReporter {
    counters: Arc<Counters>,
    window: ThroughputWindow,
    reporter: Box<dyn Reporter>,
    period: Duration,
    max_reports: Option<NonZeroU64>,
    start: Instant,
}

impl WindowedReporter {
    pub fn new(
        counters: Arc<Counters>,
        reporter: Box<dyn Reporter>,
        metrics_per_batch: u64,
        k: usize,
    ) -> Self {
        Self::new_with_period(counters, reporter, metrics_per_batch, k, REPORT_INTERVAL)
    }

    fn new_with_period(
        counters: Arc<Counters>,
        reporter: Box<dyn Reporter>,
        metrics_per_batch: u64,
        k: usize,
        period: Duration,
    ) -> Self {
        Self {
            counters,
            window: ThroughputWindow::new(metrics_per_batch, k, period),
            reporter,
            period,
            max_reports: None,
            start: Instant::now(),
        }
    }

    /// Stop reporting after the given amount of reports.
    pub fn with_max_reports(mut self, max_reports: Option<NonZeroU64>) -> Self {
        self.max_reports = max_reports;
        self
    }

    pub fn start(&mut self, plan: &RunPlan) {
        self.start = Instant::now();
        self.reporter.on_start(plan);
    }

    /// Report every period until the reports bound is reached.
    ///
    /// Never returns when no bound is configured.
    pub async fn run(&mut self) {
        let mut ticker = tokio::time::interval_at(self.start + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let mut report = self.sample();
            if let Some(max_reports) = self.max_reports
                && report.tick >= max_reports.get()
            {
                tracing::debug!(tick = report.tick, "reports bound reached");
                report.is_final = true;
                self.reporter.on_report(&report);
                return;
            }

            self.reporter.on_report(&report);
        }
    }

    /// Emit a final report right away.
    pub fn report_final(&mut self) {
        let mut report = self.sample();
        report.is_final = true;
        self.reporter.on_report(&report);
    }

    pub fn report_fatal(&mut self, err: &OpaqueError) {
        self.reporter.on_fatal(err);
    }

    fn sample(&mut self) -> ThroughputReport {
        let elapsed = self.start.elapsed();
        self.window.record(elapsed, self.counters.snapshot())
    }
}


#[cfg(test)]
mod tests {
    use super::{test_utils::RecordingReporter, *};

    #[tokio::test(start_paused = true)]
    async fn stops_after_max_reports() {
        let counters = Arc::new(Counters::new());
        let recorder = RecordingReporter::default();

        let mut reporter =
            WindowedReporter::new(counters.clone(), Box::new(recorder.clone()), 2, 6)
                .with_max_reports(NonZeroU64::new(3));

        counters.record_issued();
        counters.record_success();

        reporter.run().await;

        let reports = recorder.reports();
        assert_eq!(reports.len(), 3);
        for (i, report) in reports.iter().enumerate() {
            assert_eq!(report.tick, i as u64 + 1);
            assert_eq!(report.elapsed, REPORT_INTERVAL * (i as u32 + 1));
            assert_eq!(report.is_final, i == 2);
        }
        assert_eq!(reports[0].instant, 2. / 10.);
        assert_eq!(reports[1].instant, 0.);
    }

    #[tokio::test(start_paused = true)]
    async fn single_report_bound_finishes_after_one_interval() {
        let recorder = RecordingReporter::default();
        let mut reporter = WindowedReporter::new(
            Arc::new(Counters::new()),
            Box::new(recorder.clone()),
            1,
            6,
        )
        .with_max_reports(NonZeroU64::new(1));

        let start = Instant::now();
        reporter.run().await;
        assert_eq!(start.elapsed(), REPORT_INTERVAL);

        let reports = recorder.reports();
        assert_eq!(reports.len(), 1);
        assert!(reports[0].is_final);
    }

    #[tokio::test(start_paused = true)]
    async fn unbounded_reporter_keeps_reporting() {
        let recorder = RecordingReporter::default();
        let mut reporter = WindowedReporter::new_with_period(
            Arc::new(Counters::new()),
            Box::new(recorder.clone()),
            1,
            6,
            Duration::from_secs(1),
        );

        let result = tokio::time::timeout(Duration::from_millis(5_500), reporter.run()).await;
        assert!(result.is_err(), "unbounded reporter must not return");
        assert_eq!(recorder.reports().len(), 5);
        assert!(recorder.reports().iter().all(|report| !report.is_final));
    }

    #[tokio::test(start_paused = true)]
    async fn final_and_fatal_reports() {
        let counters = Arc::new(Counters::new());
        let recorder = RecordingReporter::default();
        let mut reporter =
            WindowedReporter::new(counters.clone(), Box::new(recorder.clone()), 4, 6);

        let plan = RunPlan {
            metrics_per_batch: 4,
            batch_count: 2,
            interval: Duration::from_secs(30),
            duration: Duration::from_secs(60),
            points_per_metric: 2,
        };
        reporter.start(&plan);

        tokio::time::advance(Duration::from_secs(4)).await;
        counters.record_issued();
        counters.record_success();
        reporter.report_final();
        reporter.report_fatal(&OpaqueError::from_display("boom"));

        let events = recorder.events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[0], test_utils::Event::Start(plan));
        match &events[1] {
            test_utils::Event::Report(report) => {
                assert!(report.is_final);
                assert_eq!(report.elapsed, Duration::from_secs(4));
                assert_eq!(report.all_time, 1.);
            }
            other => panic!("unexpected event: {other:?}"),
        }
        assert!(
            matches!(&events[2], test_utils::Event::Fatal(msg) if msg.contains("boom")),
            "{:?}",
            events[2]
        );
    }
}
