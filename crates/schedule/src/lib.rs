pub mod cache;
pub mod engine;
pub mod scheduler;

pub use cache::{Claim, LocalCache, ResultCacheManager, ThreadSafeCache};
pub use engine::{InferContext, InferRule, InferenceEngine};
pub use scheduler::{
    AnalysisSchedule, AsyncResult, FatalErrorSink, PendingTask, RegisteredWorker, Schedulable,
    ScheduleMetrics, WorkerContext,
};
