use std::{sync::Arc, time::Duration};

use rama::{
    Service,
    error::{ErrorContext as _, OpaqueError},
    graceful::ShutdownGuard,
    http::{Request, Response},
    telemetry::tracing,
};
use rand::{SeedableRng as _, rngs::SmallRng};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use super::dispatcher::Dispatcher;
use crate::metrics::{BatchBuilder, TimestampSequence};

/// Time span covered by every chain.
#[derive(Debug, Clone, Copy)]
pub struct ChainSchedule {
    /// end of the simulated time span, ms since the unix epoch
    pub now_ms: i64,
    pub duration: Duration,
    pub interval: Duration,
}

impl ChainSchedule {
    pub fn timestamps(&self) -> TimestampSequence {
        TimestampSequence::new(self.now_ms, self.duration, self.interval)
    }
}

/// Runs `batch_count` independent batch chains concurrently.
///
/// Each chain sends its batches strictly one after the other,
/// so there are never more requests in flight than chains.
pub struct BatchDriver<S> {
    dispatcher: Arc<Dispatcher<S>>,
    builder: BatchBuilder,
    schedule: ChainSchedule,
    batch_count: usize,
    seed: Option<u64>,
}

impl<S> BatchDriver<S>
where
    S: Service<Request, Output = Response, Error = OpaqueError>,
{
    pub fn new(
        dispatcher: Dispatcher<S>,
        builder: BatchBuilder,
        schedule: ChainSchedule,
        batch_count: usize,
    ) -> Self {
        Self {
            dispatcher: Arc::new(dispatcher),
            builder,
            schedule,
            batch_count,
            seed: None,
        }
    }

    /// Seed metric values, chain `i` uses seed `seed + i`.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    /// Run all chains to completion, returning the number of batches sent.
    ///
    /// The first chain to fail stops all other chains: a failing chain
    /// cancels the run before it returns, and no chain issues another
    /// request once the run is cancelled.
    /// Chains stop early, without error, once the guard is cancelled.
    pub async fn run(&self, guard: ShutdownGuard) -> Result<u64, OpaqueError> {
        let mut chains = JoinSet::new();
        let failed = CancellationToken::new();

        for prefix in 0..self.batch_count {
            let rng = match self.seed {
                Some(seed) => SmallRng::seed_from_u64(seed.wrapping_add(prefix as u64)),
                None => SmallRng::from_os_rng(),
            };
            chains.spawn(run_chain(
                guard.clone(),
                failed.clone(),
                self.dispatcher.clone(),
                self.builder,
                self.schedule.timestamps(),
                prefix,
                rng,
            ));
        }

        tracing::debug!(
            chains = self.batch_count,
            batches_per_chain = self.schedule.timestamps().len(),
            first_collection_time = self.schedule.timestamps().start(),
            "batch chains started",
        );

        let mut sent = 0;
        while let Some(result) = chains.join_next().await {
            match result {
                Ok(Ok(count)) => sent += count,
                Ok(Err(err)) => {
                    failed.cancel();
                    chains.abort_all();
                    return Err(err);
                }
                Err(err) => {
                    failed.cancel();
                    chains.abort_all();
                    return Err(err).context("join batch chain task");
                }
            }
        }

        tracing::debug!(%sent, "all batch chains finished");
        Ok(sent)
    }
}

async fn run_chain<S>(
    guard: ShutdownGuard,
    failed: CancellationToken,
    dispatcher: Arc<Dispatcher<S>>,
    builder: BatchBuilder,
    timestamps: TimestampSequence,
    prefix: usize,
    mut rng: SmallRng,
) -> Result<u64, OpaqueError>
where
    S: Service<Request, Output = Response, Error = OpaqueError>,
{
    let mut sent = 0;

    for (index, timestamp) in timestamps.enumerate() {
        if failed.is_cancelled() {
            tracing::debug!(%prefix, %sent, "exit batch chain early: another chain failed");
            return Ok(sent);
        }

        let batch = builder.build(prefix, index, timestamp, &mut rng);

        tokio::select! {
            biased;

            _ = failed.cancelled() => {
                tracing::debug!(%prefix, %sent, "abandon in-flight batch: another chain failed");
                return Ok(sent);
            }
            _ = guard.cancelled() => {
                tracing::debug!(%prefix, %sent, "exit batch chain early: guard shutdown");
                return Ok(sent);
            }
            result = dispatcher.dispatch(&batch) => match result {
                Ok(outcome) => {
                    tracing::trace!(
                        %prefix,
                        %index,
                        latency_ms = outcome.latency.as_millis(),
                        payload_size = outcome.payload_size,
                        "batch delivered",
                    );
                }
                Err(err) => {
                    failed.cancel();
                    return Err(err)
                        .with_context(|| format!("dispatch batch #{index} of chain {prefix}"));
                }
            },
        }

        sent += 1;
    }

    tracing::debug!(%prefix, %sent, "batch chain finished");
    Ok(sent)
}
