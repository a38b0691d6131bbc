use std::fmt;
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Identity of an inference worker.
///
/// The root worker of a run is `m`; branch workers forked from a parent are
/// named `parent.index`, so the id doubles as a trace of how the worker was
/// spawned.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(String);

impl WorkerId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The worker that drives a top-level run.
    pub fn root() -> Self {
        Self("m".to_string())
    }

    /// Id of the `index`-th branch worker forked by this worker.
    pub fn branch(&self, index: usize) -> Self {
        Self(format!("{}.{}", self.0, index))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WorkerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// An abstract value: the argument and result currency of inference.
pub trait Abstract:
    Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static
{
    /// Least upper bound of two values, or `None` when they cannot be merged
    /// (for example two branches inferring different types).
    fn join(&self, other: &Self) -> Option<Self>;

    /// Widen a branch result before it flows back to the join point.
    fn broaden(&self) -> Self {
        self.clone()
    }
}

/// Identity of a graph location.
pub trait Location: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

impl<T> Location for T where T: Clone + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {}

/// A graph location evaluated under a list of argument abstractions.
///
/// Equality and hash cover the location and every argument.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InferenceKey<L, A> {
    location: L,
    args: Vec<A>,
}

impl<L: Location, A: Abstract> InferenceKey<L, A> {
    pub fn new(location: L, args: Vec<A>) -> Self {
        Self { location, args }
    }

    pub fn location(&self) -> &L {
        &self.location
    }

    pub fn args(&self) -> &[A] {
        &self.args
    }

    /// Same arguments at another location.
    pub fn with_location(&self, location: L) -> Self {
        Self {
            location,
            args: self.args.clone(),
        }
    }
}

impl<L: fmt::Display, A: fmt::Display> fmt::Display for InferenceKey<L, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.location, args_to_string(&self.args))
    }
}

/// Render an argument list as `a, b, c`.
pub fn args_to_string<A: fmt::Display>(args: &[A]) -> String {
    args.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
