//! # Bounded-concurrency lanes
//!
//! [`run_lanes`] splits an ordered task list into `width` lanes by
//! `index % width`. Each lane is a spawned task that runs its share strictly
//! one after another; lanes run concurrently with each other. Every result is
//! written back at the task's original index, so the output order always
//! matches the input order no matter how the lanes interleave.
//!
//! Two aggregation policies are available:
//!
//! - [`Aggregation::FailFast`]: the first error rejects the aggregate. The
//!   failing lane stops; other lanes keep running detached and their results
//!   are discarded.
//! - [`Aggregation::SettleAll`]: nothing short-circuits, every slot ends up
//!   holding either a value or an error.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::deferred::{Resolver, deferred};
use crate::error::Abandoned;

/// How lane outcomes are combined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Aggregation {
    /// Reject on the first failing task.
    #[default]
    FailFast,
    /// Wait for every task and keep each outcome.
    SettleAll,
}

/// Run `tasks` over `width` lanes and fail on the first error.
pub async fn all_limit<F, Fut, T, E>(tasks: Vec<F>, width: usize) -> Result<Vec<T>, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<Abandoned> + Send + 'static,
{
    run_lanes(tasks, width, Aggregation::FailFast)
        .await?
        .into_iter()
        .collect()
}

/// Run `tasks` over `width` lanes and keep every outcome.
pub async fn all_settled_limit<F, Fut, T, E>(tasks: Vec<F>, width: usize) -> Vec<Result<T, E>>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<Abandoned> + Send + 'static,
{
    let total = tasks.len();
    match run_lanes(tasks, width, Aggregation::SettleAll).await {
        Ok(outcomes) => outcomes,
        // Nothing rejects under settle-all; only a lost lane set lands here.
        Err(_) => (0..total).map(|_| Err(E::from(Abandoned))).collect(),
    }
}

/// Run `tasks` over `width` lanes with the given aggregation policy.
///
/// The returned list has one entry per task, in submission order. Under
/// [`Aggregation::FailFast`] the outer `Err` carries the first failure.
/// A `width` of zero is treated as one.
pub async fn run_lanes<F, Fut, T, E>(
    tasks: Vec<F>,
    width: usize,
    aggregation: Aggregation,
) -> Result<Vec<Result<T, E>>, E>
where
    F: FnOnce() -> Fut + Send + 'static,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: Send + 'static,
    E: From<Abandoned> + Send + 'static,
{
    let total = tasks.len();
    if total == 0 {
        return Ok(Vec::new());
    }

    let width = width.max(1);
    let lanes = partition(tasks, width);
    debug!(
        tasks = total,
        lanes = lanes.len(),
        ?aggregation,
        "Starting task lanes"
    );

    let (promise, resolver) = deferred();
    let shared = Arc::new(LaneSet {
        slots: Mutex::new((0..total).map(|_| None).collect()),
        running: AtomicUsize::new(lanes.len()),
        resolver,
    });

    for (lane, queue) in lanes.into_iter().enumerate() {
        let shared = Arc::clone(&shared);
        tokio::spawn(async move {
            let _guard = LaneGuard {
                shared: Arc::clone(&shared),
                lane,
            };
            for (index, task) in queue {
                trace!(lane, index, "Starting task");
                match task().await {
                    Ok(value) => shared.write(index, Ok(value)),
                    Err(err) if aggregation == Aggregation::FailFast => {
                        debug!(lane, index, "Task failed, rejecting lane set");
                        shared.resolver.reject(err);
                        return;
                    }
                    Err(err) => shared.write(index, Err(err)),
                }
            }
        });
    }
    drop(shared);

    promise.await
}

/// Assign task `i` to lane `i % width`, keeping each task's global index.
fn partition<F>(tasks: Vec<F>, width: usize) -> Vec<Vec<(usize, F)>> {
    let mut lanes: Vec<Vec<(usize, F)>> = Vec::with_capacity(width.min(tasks.len()));
    for (index, task) in tasks.into_iter().enumerate() {
        let lane = index % width;
        if lane == lanes.len() {
            lanes.push(Vec::new());
        }
        lanes[lane].push((index, task));
    }
    lanes
}

struct LaneSet<T, E> {
    slots: Mutex<Vec<Option<Result<T, E>>>>,
    running: AtomicUsize,
    resolver: Resolver<Vec<Result<T, E>>, E>,
}

impl<T, E> LaneSet<T, E> {
    fn write(&self, index: usize, outcome: Result<T, E>) {
        let mut slots = self.slots.lock();
        debug_assert!(slots[index].is_none(), "slot {index} written twice");
        slots[index] = Some(outcome);
    }
}

/// Settles the lane set once the last lane exits, even if it panicked.
struct LaneGuard<T, E: From<Abandoned>> {
    shared: Arc<LaneSet<T, E>>,
    lane: usize,
}

impl<T, E: From<Abandoned>> Drop for LaneGuard<T, E> {
    fn drop(&mut self) {
        trace!(lane = self.lane, "Lane finished");
        if self.shared.running.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        if self.shared.resolver.is_settled() {
            return;
        }

        let slots = std::mem::take(&mut *self.shared.slots.lock());
        let outcomes = slots
            .into_iter()
            .map(|slot| slot.unwrap_or_else(|| Err(E::from(Abandoned))))
            .collect();
        debug!("All task lanes finished");
        self.shared.resolver.resolve(outcomes);
    }
}
