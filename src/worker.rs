use std::sync::{Arc, Mutex};
use tokio::time::{self, Duration, Instant};
use tracing::{debug, error, info};

use crate::aggregator::{AggregateSnapshot, ResultAggregator};
use crate::config::StopCondition;
use crate::executor::RequestExecutor;
use crate::pacing::{Admission, PacingController};

/// What a finished run hands to the reporter.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub snapshot: AggregateSnapshot,
    /// Wall-clock time from pool start until every worker joined.
    pub elapsed: Duration,
}

/// Stop condition evaluation, owned by the pool and shared by its workers.
#[derive(Debug)]
struct RunControl {
    condition: StopCondition,
    /// End of the window in Duration mode. `None` if it lies past the clock.
    deadline: Option<Instant>,
    /// Dispatch slots handed out in RequestCount mode.
    claimed: Mutex<u64>,
}

impl RunControl {
    fn new(condition: StopCondition, start: Instant) -> Self {
        let deadline = match condition {
            StopCondition::Duration(duration) => start.checked_add(duration),
            StopCondition::RequestCount(_) => None,
        };
        Self {
            condition,
            deadline,
            claimed: Mutex::new(0),
        }
    }

    fn count_reached(&self, aggregator: &ResultAggregator) -> bool {
        match self.condition {
            StopCondition::RequestCount(target) => aggregator.attempted() >= target,
            StopCondition::Duration(_) => false,
        }
    }

    /// Reserves one dispatch. In RequestCount mode at most `target` claims
    /// ever succeed, so the attempted count lands on the target exactly.
    fn try_claim(&self) -> bool {
        match self.condition {
            StopCondition::RequestCount(target) => {
                let mut claimed = self
                    .claimed
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner());
                if *claimed < target {
                    *claimed += 1;
                    true
                } else {
                    false
                }
            }
            StopCondition::Duration(_) => true,
        }
    }
}

struct WorkerContext {
    pacer: Arc<PacingController>,
    aggregator: Arc<ResultAggregator>,
    executor: RequestExecutor,
    control: RunControl,
}

/// A fixed set of workers sharing one pacer and one aggregator.
pub struct WorkerPool {
    concurrency: usize,
    stop_condition: StopCondition,
    pacer: Arc<PacingController>,
    aggregator: Arc<ResultAggregator>,
    executor: RequestExecutor,
}

impl WorkerPool {
    pub fn new(
        concurrency: usize,
        stop_condition: StopCondition,
        pacer: Arc<PacingController>,
        executor: RequestExecutor,
    ) -> Self {
        Self {
            concurrency: concurrency.max(1),
            stop_condition,
            pacer,
            aggregator: Arc::new(ResultAggregator::new()),
            executor,
        }
    }

    pub fn aggregator(&self) -> Arc<ResultAggregator> {
        Arc::clone(&self.aggregator)
    }

    /// Spawns every worker, waits for all of them, and returns the final
    /// snapshot. The pacer is Stopped on return.
    pub async fn run(self) -> RunResult {
        let start_time = Instant::now();
        self.pacer.start(start_time);

        let context = Arc::new(WorkerContext {
            pacer: Arc::clone(&self.pacer),
            aggregator: Arc::clone(&self.aggregator),
            executor: self.executor,
            control: RunControl::new(self.stop_condition, start_time),
        });

        info!(
            concurrency = self.concurrency,
            stop_condition = ?self.stop_condition,
            "Starting worker pool"
        );

        let mut handles = Vec::with_capacity(self.concurrency);
        for task_id in 0..self.concurrency {
            let context = Arc::clone(&context);
            handles.push(tokio::spawn(async move {
                run_worker(task_id, context).await;
            }));
        }

        for (task_id, handle) in handles.into_iter().enumerate() {
            if let Err(e) = handle.await {
                error!(task_id, error = %e, "Worker task failed");
            }
        }

        self.pacer.stop();
        let elapsed = start_time.elapsed();
        let snapshot = self.aggregator.snapshot();
        info!(
            attempted = snapshot.total_attempted,
            elapsed_secs = elapsed.as_secs_f64(),
            "All workers joined"
        );

        RunResult { snapshot, elapsed }
    }
}

/// One worker loop: check the stop condition, ask for admission, dispatch.
///
/// In Duration mode a worker that finishes a request after the deadline
/// stops at once; only a request already in flight runs past it. A worker
/// that was idle in a pacing backoff when the deadline passed asks once
/// more as of the deadline, so a slot that fell due inside the window is
/// still served. That costs at most one extra dispatch per worker.
async fn run_worker(task_id: usize, context: Arc<WorkerContext>) {
    debug!(task_id, "Worker starting");
    let mut dispatched: u64 = 0;
    let mut woke_from_backoff = false;

    loop {
        if context.control.count_reached(&context.aggregator) {
            context.pacer.stop();
            break;
        }

        let now = Instant::now();
        let deadline = context.control.deadline;
        let last_chance = deadline.is_some_and(|end| now >= end);
        // Workers still in backoff may need the pacer, so the pool stops it
        // after the join.
        if last_chance && !woke_from_backoff {
            break;
        }
        woke_from_backoff = false;
        let admit_at = match deadline {
            Some(end) if last_chance => end,
            _ => now,
        };

        match context.pacer.try_admit_at(admit_at) {
            Admission::Granted => {}
            Admission::Stopped => break,
            Admission::Wait(_) if last_chance => break,
            Admission::Wait(backoff) => {
                let backoff = deadline.map_or(backoff, |end| {
                    backoff.min(end.saturating_duration_since(now))
                });
                time::sleep(backoff).await;
                woke_from_backoff = true;
                continue;
            }
        }

        if !context.control.try_claim() {
            context.pacer.stop();
            break;
        }

        let outcome = context.executor.execute(task_id).await;
        context.aggregator.record_attempt(&outcome);
        dispatched += 1;
    }

    info!(task_id, dispatched, "Worker stopping");
}
