use std::collections::VecDeque;
use std::fmt;
use std::hash::Hash;
use std::sync::{Arc, Mutex};

use absint_core::{Abstract, InferError};
use tracing::{debug, warn};

use crate::scheduler::{AsyncResult, WorkerContext, lock};

use super::local::LocalCache;
use super::thread_safe::ThreadSafeCache;

type Cell<V> = Arc<AsyncResult<V>>;

/// Outcome of asking for a configuration's result.
pub enum Claim<V> {
    /// Memoized final result.
    Cached(V),
    /// Another worker is computing it; wait on the cell.
    Pending(Cell<V>),
    /// The caller computes it and must [`publish`](ResultCacheManager::publish)
    /// the result.
    Owner(Cell<V>),
}

impl<V: fmt::Display> fmt::Debug for Claim<V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Claim::Cached(value) => write!(f, "Cached({})", value),
            Claim::Pending(cell) => write!(f, "Pending({})", cell),
            Claim::Owner(cell) => write!(f, "Owner({})", cell),
        }
    }
}

/// Per-configuration bookkeeping of inference results.
///
/// - value channel: memoized results plus one in-flight cell per
///   configuration, so each configuration is computed by a single worker.
/// - switch channel: the joined result of a multi-branch evaluation.
/// - verification channel: every branch result joined into one cell, which
///   surfaces incompatible branches as [`InferError::JoinMismatch`].
pub struct ResultCacheManager<K, V> {
    cache: Mutex<LocalCache<K, V>>,
    pending: ThreadSafeCache<K, Cell<V>>,
    switch_cache: ThreadSafeCache<K, Cell<V>>,
    switch_cache_for_check: ThreadSafeCache<K, Cell<V>>,
    todo: Mutex<VecDeque<K>>,
}

impl<K, V> Default for ResultCacheManager<K, V> {
    fn default() -> Self {
        Self {
            cache: Mutex::new(LocalCache::default()),
            pending: ThreadSafeCache::default(),
            switch_cache: ThreadSafeCache::default(),
            switch_cache_for_check: ThreadSafeCache::default(),
            todo: Mutex::new(VecDeque::new()),
        }
    }
}

impl<K, V> ResultCacheManager<K, V>
where
    K: Clone + Eq + Hash + fmt::Display + Send + Sync,
    V: Abstract,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up `key`, registering the caller as its producer when nobody
    /// computes it yet.
    pub fn claim(&self, key: &K) -> Claim<V> {
        let memo = lock(&self.cache);
        if let Some(value) = memo.get(key) {
            return Claim::Cached(value.clone());
        }
        let (cell, inserted) = self.pending.get_or_insert_with(key.clone(), || Arc::new(AsyncResult::new()));
        if inserted {
            debug!("Claimed {}", key);
            Claim::Owner(cell)
        } else {
            Claim::Pending(cell)
        }
    }

    /// Memoize the result of a claimed key and release its waiters.
    pub fn publish(&self, key: &K, value: V) {
        let mut memo = lock(&self.cache);
        memo.set(key.clone(), value.clone());
        if let Some(cell) = self.pending.remove(key) {
            cell.set(value);
        }
    }

    pub fn get_value(&self, key: &K) -> Option<V> {
        lock(&self.cache).get(key).cloned()
    }

    pub fn set_value(&self, key: K, value: V) {
        lock(&self.cache).set(key, value);
    }

    pub fn memoized_len(&self) -> usize {
        lock(&self.cache).len()
    }

    pub fn push_todo(&self, key: K) {
        lock(&self.todo).push_back(key);
    }

    pub fn drain_todo(&self) -> Vec<K> {
        lock(&self.todo).drain(..).collect()
    }

    /// Compare each queued join configuration's memoized result with its
    /// switch value. Returns the configurations where they differ.
    pub fn verify_todo(&self) -> Vec<K> {
        let mut diverged = Vec::new();
        for key in self.drain_todo() {
            let (Some(memo), Some(switch)) = (self.get_value(&key), self.try_get_switch_value(&key)) else {
                continue;
            };
            if memo != switch {
                warn!("Switch value of {} is {}, but {} was memoized", key, switch, memo);
                diverged.push(key);
            }
        }
        diverged
    }

    pub fn init_switch_value(&self, conf: &K) {
        self.switch_cache
            .get_or_insert_with(conf.clone(), || Arc::new(AsyncResult::new()));
    }

    /// Wait for the switch value of `conf`. `None` when no switch was
    /// initialised for it.
    pub fn get_switch_value(&self, worker: &WorkerContext, conf: &K) -> Result<Option<V>, InferError> {
        match self.switch_cache.get(conf) {
            Some(cell) => cell.get_result(worker).map(Some),
            None => Ok(None),
        }
    }

    pub fn try_get_switch_value(&self, conf: &K) -> Option<V> {
        self.switch_cache.get(conf).and_then(|cell| cell.try_get())
    }

    /// Join `value` into the switch value of `conf`.
    pub fn set_switch_value(&self, conf: &K, value: Option<V>) -> Result<(), InferError> {
        let value = value.ok_or_else(|| InferError::EmptyResult(conf.to_string()))?;
        let (cell, _) = self
            .switch_cache
            .get_or_insert_with(conf.clone(), || Arc::new(AsyncResult::new()));
        cell.join_with(value, |previous, current| join_or_mismatch(conf, previous, current))?;
        Ok(())
    }

    /// Join a branch result into the verification cell of `conf`.
    pub fn check_switch_value_joinable(&self, conf: &K, value: V) -> Result<(), InferError> {
        let cell = self.set_cache_value(conf);
        cell.join_with(value, |previous, current| join_or_mismatch(conf, previous, current))
            .map(|joined| debug!("Branches of {} join to {}", conf, joined))
            .inspect_err(|e| warn!("{}", e))
    }

    /// Join of every branch result verified for `conf` so far.
    pub fn try_get_joinable_value(&self, conf: &K) -> Option<V> {
        self.switch_cache_for_check.get(conf).and_then(|cell| cell.try_get())
    }

    fn set_cache_value(&self, conf: &K) -> Cell<V> {
        self.switch_cache_for_check
            .get_or_insert_with(conf.clone(), || Arc::new(AsyncResult::new()))
            .0
    }

    /// Drop every cached result, in-flight cell and queued configuration.
    pub fn clear(&self) {
        lock(&self.cache).clear();
        self.pending.clear();
        self.switch_cache.clear();
        self.switch_cache_for_check.clear();
        lock(&self.todo).clear();
    }

    pub fn dump(&self) -> String {
        format!(
            "cache:\n{}\npending:\n{}\nswitch:\n{}\nswitch (check):\n{}",
            lock(&self.cache).dump(),
            self.pending.dump(),
            self.switch_cache.dump(),
            self.switch_cache_for_check.dump()
        )
    }
}

fn join_or_mismatch<K: fmt::Display, V: Abstract>(conf: &K, previous: &V, current: &V) -> Result<V, InferError> {
    previous
        .join(current)
        .ok_or_else(|| InferError::join_mismatch(conf, previous, current))
}

impl<K, V> fmt::Debug for ResultCacheManager<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResultCacheManager")
            .field("pending", &self.pending)
            .field("switch_cache", &self.switch_cache)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use absint_core::ScheduleConfig;

    use super::*;
    use crate::scheduler::AnalysisSchedule;

    #[derive(Debug, Clone, PartialEq, Eq, Hash)]
    enum Ty {
        Int,
        Num,
        Str,
    }

    impl fmt::Display for Ty {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{:?}", self)
        }
    }

    impl Abstract for Ty {
        fn join(&self, other: &Self) -> Option<Self> {
            match (self, other) {
                (a, b) if a == b => Some(a.clone()),
                (Ty::Int, Ty::Num) | (Ty::Num, Ty::Int) => Some(Ty::Num),
                _ => None,
            }
        }
    }

    #[test]
    fn first_claim_owns_the_key() {
        let cache: ResultCacheManager<String, Ty> = ResultCacheManager::new();
        let key = "f(Int)".to_string();

        let owner = match cache.claim(&key) {
            Claim::Owner(cell) => cell,
            other => panic!("expected owner, got {:?}", other),
        };
        let waiter = match cache.claim(&key) {
            Claim::Pending(cell) => cell,
            other => panic!("expected pending, got {:?}", other),
        };
        assert!(Arc::ptr_eq(&owner, &waiter));

        cache.publish(&key, Ty::Int);
        assert_eq!(waiter.try_get(), Some(Ty::Int));
        assert!(matches!(cache.claim(&key), Claim::Cached(Ty::Int)));
        assert_eq!(cache.memoized_len(), 1);
    }

    #[test]
    fn clear_forgets_memoized_keys() {
        let cache: ResultCacheManager<String, Ty> = ResultCacheManager::new();
        let key = "g(Str)".to_string();
        cache.set_value(key.clone(), Ty::Str);
        cache.push_todo(key.clone());

        cache.clear();
        assert_eq!(cache.get_value(&key), None);
        assert!(cache.drain_todo().is_empty());
        assert!(matches!(cache.claim(&key), Claim::Owner(_)));
    }

    #[test]
    fn incompatible_branches_are_not_joined() {
        let cache: ResultCacheManager<String, Ty> = ResultCacheManager::new();
        let conf = "switch(x)".to_string();

        assert!(cache.check_switch_value_joinable(&conf, Ty::Int).is_ok());
        assert!(cache.check_switch_value_joinable(&conf, Ty::Num).is_ok());
        assert_eq!(cache.try_get_joinable_value(&conf), Some(Ty::Num));
        let err = cache.check_switch_value_joinable(&conf, Ty::Str).unwrap_err();
        assert_eq!(err, InferError::join_mismatch("switch(x)", "Num", "Str"));
        assert_eq!(cache.get_value(&conf), None);
    }

    #[test]
    fn switch_value_joins_and_rejects_empty() {
        let cache: ResultCacheManager<String, Ty> = ResultCacheManager::new();
        let conf = "switch(y)".to_string();
        assert_eq!(cache.try_get_switch_value(&conf), None);

        cache.init_switch_value(&conf);
        assert_eq!(
            cache.set_switch_value(&conf, None),
            Err(InferError::EmptyResult("switch(y)".into()))
        );
        cache.set_switch_value(&conf, Some(Ty::Int)).unwrap();
        cache.set_switch_value(&conf, Some(Ty::Num)).unwrap();
        assert_eq!(cache.try_get_switch_value(&conf), Some(Ty::Num));
        assert!(cache.set_switch_value(&conf, Some(Ty::Str)).unwrap_err().is_join_mismatch());
    }

    #[test]
    fn get_switch_value_waits_only_when_initialised() {
        let config = ScheduleConfig {
            check_period_ms: 20,
            ..ScheduleConfig::default()
        };
        let schedule = AnalysisSchedule::start(&config).unwrap();
        let worker = WorkerContext::root(Arc::clone(&schedule));
        let cache: ResultCacheManager<String, Ty> = ResultCacheManager::new();
        let conf = "switch(z)".to_string();

        assert_eq!(cache.get_switch_value(&worker, &conf), Ok(None));
        cache.set_switch_value(&conf, Some(Ty::Str)).unwrap();
        assert_eq!(cache.get_switch_value(&worker, &conf), Ok(Some(Ty::Str)));
        schedule.stop();
    }

    #[test]
    fn verify_todo_reports_divergence() {
        let cache: ResultCacheManager<String, Ty> = ResultCacheManager::new();
        let same = "if(a)".to_string();
        let different = "if(b)".to_string();
        for conf in [&same, &different] {
            cache.set_switch_value(conf, Some(Ty::Int)).unwrap();
            cache.push_todo(conf.clone());
        }
        cache.set_value(same.clone(), Ty::Int);
        cache.set_value(different.clone(), Ty::Num);

        assert_eq!(cache.verify_todo(), vec![different]);
        assert!(cache.drain_todo().is_empty());
        assert!(cache.dump().contains("if(a): Int"));
    }
}
