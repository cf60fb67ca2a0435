mod guard;
mod runner;

use std::num::NonZeroUsize;

use crate::TaskFailure;

pub(crate) use crate::engine::runner::run;
pub use crate::engine::runner::{Diagnostics, TaskExecution, WaveExecution};

/// The result left in a task's slot: the produced value, or the failure the
/// panic guard captured in its place.
pub type Outcome<T> = Result<T, TaskFailure>;

/// A type-erased task, for batches that mix different closures.
///
/// ```
/// use parallelize::{BoxTask, parallelize};
///
/// let tasks: Vec<BoxTask<String>> = vec![
///     Box::new(|| "left".to_string()),
///     Box::new(|| format!("{}", 40 + 2)),
/// ];
///
/// let results = parallelize(tasks).unwrap();
/// assert_eq!(results[1].as_deref().unwrap(), "42");
/// ```
pub type BoxTask<'a, T> = Box<dyn FnOnce() -> T + Send + 'a>;

/// How a batch is spread over execution units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Strategy {
    /// One execution unit per task, all running at once.
    #[default]
    Unbounded,
    /// Sequential waves of at most `n` tasks. A wave starts only once every
    /// task of the previous wave has finished, so a single slow task holds
    /// back everything queued after it.
    Waves(NonZeroUsize),
    /// `n` persistent workers pulling tasks in submission order. At most `n`
    /// tasks run at any instant, without a barrier between them.
    Pool(NonZeroUsize),
}

impl Strategy {
    /// Maps a throttle factor onto a strategy. Zero and negative factors both
    /// mean "no bound".
    pub fn from_factor(factor: isize) -> Self {
        match usize::try_from(factor).ok().and_then(NonZeroUsize::new) {
            Some(size) => Strategy::Waves(size),
            None => Strategy::Unbounded,
        }
    }

    /// Number of tasks allowed to run at the same time for a batch of
    /// `total` tasks.
    pub fn concurrency(&self, total: usize) -> usize {
        match self {
            Strategy::Unbounded => total,
            Strategy::Waves(n) | Strategy::Pool(n) => n.get().min(total),
        }
    }
}
