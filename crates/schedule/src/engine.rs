use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use absint_core::{Abstract, InferError, InferenceKey, Location, ScheduleConfig, WorkerId};
use rayon::prelude::*;
use tracing::{debug, info, warn};

use crate::cache::{Claim, ResultCacheManager};
use crate::scheduler::{AnalysisSchedule, AsyncResult, WorkerContext};

/// Inference callback for one graph location under one argument list.
///
/// The engine invokes it at most once per key between cache clears. Rules
/// recurse through [`InferContext::infer`] and fork control-flow branches
/// through [`InferContext::evaluate_branches`].
pub trait InferRule<L, A>: Send + Sync {
    fn name(&self) -> &str {
        "infer"
    }

    fn infer(&self, cx: &InferContext<L, A>, key: &InferenceKey<L, A>) -> Result<A, InferError>;
}

struct EngineShared<L, A> {
    config: ScheduleConfig,
    schedule: Arc<AnalysisSchedule>,
    cache: ResultCacheManager<InferenceKey<L, A>, A>,
    rule: Box<dyn InferRule<L, A>>,
    invocations: AtomicUsize,
}

/// Drives inference runs over a shared [`AnalysisSchedule`] and result cache.
pub struct InferenceEngine<L, A> {
    shared: Arc<EngineShared<L, A>>,
}

impl<L: Location, A: Abstract> InferenceEngine<L, A> {
    /// Start the schedule and wrap `rule`.
    pub fn new(config: ScheduleConfig, rule: impl InferRule<L, A> + 'static) -> Result<Self, InferError> {
        config.log_summary();
        let schedule = AnalysisSchedule::start(&config)?;
        info!("Inference engine ready (rule: {})", rule.name());
        Ok(Self {
            shared: Arc::new(EngineShared {
                config,
                schedule,
                cache: ResultCacheManager::new(),
                rule: Box::new(rule),
                invocations: AtomicUsize::new(0),
            }),
        })
    }

    /// Infer `key` on the calling thread as the root worker, then wait for
    /// every forked worker to retire.
    ///
    /// On success the queued join configurations are verified; on failure
    /// the caches are cleared so the next run starts fresh.
    pub fn run(&self, key: &InferenceKey<L, A>) -> Result<A, InferError> {
        let start = Instant::now();
        let schedule = &self.shared.schedule;
        if !schedule.reset() {
            warn!("Run of {} started while workers are still registered", key);
        }

        let registered = WorkerContext::root(Arc::clone(schedule)).register();
        let cx = InferContext::new(Arc::clone(&self.shared), registered.context().clone());
        let result = cx.infer(key);
        drop(registered);

        let outcome = schedule.wait().and(result);
        self.finish(outcome.is_ok());
        info!(
            "Inference of {} finished in {:.3}s: {}",
            key,
            start.elapsed().as_secs_f64(),
            match &outcome {
                Ok(value) => value.to_string(),
                Err(e) => e.to_string(),
            }
        );
        outcome
    }

    /// Infer every key as an independent root on a rayon pool. Results keep
    /// the order of `keys`.
    pub fn run_all(&self, keys: &[InferenceKey<L, A>]) -> Result<Vec<A>, InferError> {
        let start = Instant::now();
        let threads = self.shared.config.resolved_worker_threads();
        let prefix = self.shared.config.thread_name_prefix.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(move |i| format!("{}-pool-{}", prefix, i))
            .build()
            .map_err(|e| InferError::Spawn {
                worker: "pool".to_string(),
                message: e.to_string(),
            })?;

        let schedule = &self.shared.schedule;
        if !schedule.reset() {
            warn!("Batch of {} roots started while workers are still registered", keys.len());
        }
        info!("Inferring {} roots on {} threads", keys.len(), threads);

        let results: Vec<Result<A, InferError>> = pool.install(|| {
            keys.par_iter()
                .enumerate()
                .map(|(i, key)| {
                    // Registered only once running: a root still queued in
                    // the pool must not hold back arbitration.
                    let registered =
                        WorkerContext::new(WorkerId::new(format!("r{}", i)), Arc::clone(schedule)).register();
                    let cx = InferContext::new(Arc::clone(&self.shared), registered.context().clone());
                    cx.infer(key)
                })
                .collect()
        });

        let outcome = schedule
            .wait()
            .and_then(|()| results.into_iter().collect::<Result<Vec<_>, _>>());
        self.finish(outcome.is_ok());
        info!(
            "Batch of {} roots finished in {:.3}s (ok: {})",
            keys.len(),
            start.elapsed().as_secs_f64(),
            outcome.is_ok()
        );
        outcome
    }

    fn finish(&self, succeeded: bool) {
        if succeeded {
            let diverged = self.shared.cache.verify_todo();
            if !diverged.is_empty() {
                warn!("{} join configurations diverged from their switch value", diverged.len());
            }
        } else {
            debug!("Schedule status after failed run: {}", self.shared.schedule.status());
            debug!("Clearing caches after failed run:\n{}", self.shared.cache.dump());
            self.shared.cache.clear();
        }
    }

    pub fn cache(&self) -> &ResultCacheManager<InferenceKey<L, A>, A> {
        &self.shared.cache
    }

    pub fn schedule(&self) -> &Arc<AnalysisSchedule> {
        &self.shared.schedule
    }

    pub fn config(&self) -> &ScheduleConfig {
        &self.shared.config
    }

    /// Forget every cached result and the fatal error of the last run.
    pub fn clear(&self) {
        self.shared.cache.clear();
        self.shared.schedule.reset();
    }

    /// How many times the rule has been invoked.
    pub fn invocations(&self) -> usize {
        self.shared.invocations.load(Ordering::Relaxed)
    }
}

impl<L, A> Drop for InferenceEngine<L, A> {
    fn drop(&mut self) {
        self.shared.schedule.stop();
    }
}

/// What a rule sees while it runs: the worker it runs on and a way to
/// request other inference results.
pub struct InferContext<L, A> {
    shared: Arc<EngineShared<L, A>>,
    worker: WorkerContext,
}

impl<L: Location, A: Abstract> InferContext<L, A> {
    fn new(shared: Arc<EngineShared<L, A>>, worker: WorkerContext) -> Self {
        Self { shared, worker }
    }

    pub fn worker(&self) -> &WorkerContext {
        &self.worker
    }

    /// Result for `key`: memoized, awaited from the worker computing it, or
    /// computed here.
    pub fn infer(&self, key: &InferenceKey<L, A>) -> Result<A, InferError> {
        match self.shared.cache.claim(key) {
            Claim::Cached(value) => Ok(value),
            Claim::Pending(cell) => {
                debug!("{} waiting for {}", self.worker.label(), key);
                cell.get_result(&self.worker)
            }
            Claim::Owner(_) => {
                self.shared.invocations.fetch_add(1, Ordering::Relaxed);
                debug!("{} inferring {}", self.worker.label(), key);
                match catch_rule_panic(key, || self.shared.rule.infer(self, key)) {
                    Ok(value) => {
                        debug!("{} {} => {}", self.worker.label(), key, value);
                        self.shared.cache.publish(key, value.clone());
                        Ok(value)
                    }
                    Err(e) => {
                        warn!("{} inference of {} failed: {}", self.worker.label(), key, e);
                        self.shared.schedule.handle_exception(e.clone());
                        Err(e)
                    }
                }
            }
        }
    }

    /// Evaluate each branch on its own worker and join their results.
    ///
    /// Returns once the first branch produced a result, joined with every
    /// other branch already finished (or with all of them when
    /// `wait_for_all_branches` is set). Branches still running keep feeding
    /// the verification channel of `join_key`, so a late incompatible branch
    /// fails the run.
    pub fn evaluate_branches(
        &self,
        join_key: &InferenceKey<L, A>,
        branches: Vec<InferenceKey<L, A>>,
    ) -> Result<A, InferError> {
        if branches.is_empty() {
            return Err(InferError::NoBranches(join_key.to_string()));
        }
        let cache = &self.shared.cache;
        cache.init_switch_value(join_key);
        cache.push_todo(join_key.clone());

        let main: Arc<AsyncResult<A>> = Arc::new(AsyncResult::new());
        let mut branch_cells = Vec::with_capacity(branches.len());
        for (i, branch_key) in branches.into_iter().enumerate() {
            let cell: Arc<AsyncResult<A>> = Arc::new(AsyncResult::new());
            branch_cells.push(Arc::clone(&cell));

            // Registered before the thread starts so the parent cannot be
            // woken ahead of its branches.
            let registered = self.worker.fork(i).register();
            let branch_id = registered.context().id().clone();
            let name = format!("{}-{}", self.shared.config.thread_name_prefix, branch_id);
            let cx = InferContext::new(Arc::clone(&self.shared), registered.context().clone());
            let main = Arc::clone(&main);
            let join_key = join_key.clone();

            // A failed spawn drops the closure, which retires the branch.
            let spawned = thread::Builder::new().name(name).spawn(move || {
                let _registered = registered;
                cx.run_branch(&join_key, &branch_key, &cell, &main);
            });
            if let Err(e) = spawned {
                return Err(InferError::Spawn {
                    worker: branch_id.to_string(),
                    message: e.to_string(),
                });
            }
        }

        let first = main.get_result(&self.worker)?;
        let mut joined: Option<A> = None;
        for cell in &branch_cells {
            let value = if self.shared.config.wait_for_all_branches {
                Some(cell.get_result(&self.worker)?)
            } else {
                cell.try_get()
            };
            let Some(value) = value else {
                continue;
            };
            joined = Some(match joined {
                None => value,
                Some(previous) => previous
                    .join(&value)
                    .ok_or_else(|| InferError::join_mismatch(join_key, &previous, &value))?,
            });
        }
        let joined = joined.unwrap_or(first);
        cache.set_switch_value(join_key, Some(joined.clone()))?;
        debug!("{} {} joined to {}", self.worker.label(), join_key, joined);
        Ok(joined)
    }

    /// Body of a branch worker thread. Failures, panics included, become the
    /// run's fatal error.
    fn run_branch(
        &self,
        join_key: &InferenceKey<L, A>,
        branch_key: &InferenceKey<L, A>,
        cell: &AsyncResult<A>,
        main: &AsyncResult<A>,
    ) {
        let outcome = catch_rule_panic(branch_key, || {
            let value = self.infer(branch_key)?;
            self.shared.cache.check_switch_value_joinable(join_key, value.clone())?;
            let value = value.broaden();
            cell.set(value.clone());
            main.set(value);
            Ok(())
        });
        if let Err(e) = outcome {
            warn!("{} branch {} failed: {}", self.worker.label(), branch_key, e);
            self.shared.schedule.handle_exception(e);
        }
    }
}

/// Run `f`, turning a panic into [`InferError::Failed`] at `location`.
fn catch_rule_panic<T>(
    location: &impl fmt::Display,
    f: impl FnOnce() -> Result<T, InferError>,
) -> Result<T, InferError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        Err(InferError::failed(
            location,
            format!("rule panicked: {}", panic_message(payload.as_ref())),
        ))
    })
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
