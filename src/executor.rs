use std::borrow::Cow;
use std::fmt::Debug;

use anyhow::Context;

use crate::engine::{Diagnostics, Outcome, Strategy};
use crate::{ExecutorError, Sink, TaskFailure, TracingSink};

/// A configured batch runner.
///
/// ```
/// use parallelize::{CollectSink, Executor};
///
/// let executor = Executor::builder()
///     .name("squares")
///     .throttle(2)
///     .sink(CollectSink::new())
///     .build();
///
/// let report = executor.run((1..=5).map(|n| move || n * n).collect()).unwrap();
/// assert_eq!(report.into_result().unwrap(), [1, 4, 9, 16, 25]);
/// ```
pub struct Executor {
    name: Cow<'static, str>,
    strategy: Strategy,
    sink: Box<dyn Sink>,
}

impl Executor {
    pub fn builder() -> ExecutorBuilder {
        ExecutorBuilder::default()
    }

    /// An executor using `strategy`, reporting panics through `tracing`.
    pub fn new(strategy: Strategy) -> Self {
        Self::builder().strategy(strategy).build()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn strategy(&self) -> Strategy {
        self.strategy
    }

    /// Runs every task and blocks until all of them have finished, normally
    /// or by panicking. Outcome `i` of the report belongs to task `i`,
    /// whatever order the tasks actually finished in.
    ///
    /// There is no timeout: a task that never returns blocks this call.
    pub fn run<T, F>(&self, tasks: Vec<F>) -> Result<Report<T>, ExecutorError>
    where
        T: Send,
        F: FnOnce() -> T + Send,
    {
        let (outcomes, diagnostics) =
            crate::engine::run(&self.name, self.strategy, &*self.sink, tasks)?;

        Ok(Report {
            name: self.name.clone(),
            outcomes,
            diagnostics,
        })
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl Debug for Executor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Executor")
            .field("name", &self.name)
            .field("strategy", &self.strategy)
            .finish_non_exhaustive()
    }
}

/// Builder for [`Executor`]. By default the batch is unbounded, named
/// `batch`, and panics are reported to [`TracingSink`].
pub struct ExecutorBuilder {
    name: Cow<'static, str>,
    strategy: Strategy,
    sink: Box<dyn Sink>,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self {
            name: Cow::Borrowed("batch"),
            strategy: Strategy::Unbounded,
            sink: Box::new(TracingSink),
        }
    }
}

impl ExecutorBuilder {
    /// Name used in log events, progress bars and `anyhow` contexts.
    pub fn name(mut self, name: impl Into<Cow<'static, str>>) -> Self {
        self.name = name.into();
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Shorthand for wave throttling with a plain factor, see
    /// [`Strategy::from_factor`].
    pub fn throttle(self, factor: isize) -> Self {
        self.strategy(Strategy::from_factor(factor))
    }

    /// Where contained panics are reported.
    pub fn sink(mut self, sink: impl Sink + 'static) -> Self {
        self.sink = Box::new(sink);
        self
    }

    pub fn build(self) -> Executor {
        Executor {
            name: self.name,
            strategy: self.strategy,
            sink: self.sink,
        }
    }
}

/// Everything a finished batch produced.
#[derive(Debug)]
pub struct Report<T> {
    pub name: Cow<'static, str>,
    /// One outcome per task, in submission order.
    pub outcomes: Vec<Outcome<T>>,
    pub diagnostics: Diagnostics,
}

impl<T> Report<T> {
    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn failures(&self) -> impl Iterator<Item = &TaskFailure> {
        self.outcomes.iter().filter_map(|o| o.as_ref().err())
    }

    /// The values with `None` in place of every panicked task.
    pub fn values(&self) -> Vec<Option<&T>> {
        self.outcomes.iter().map(|o| o.as_ref().ok()).collect()
    }

    pub fn into_outcomes(self) -> Vec<Outcome<T>> {
        self.outcomes
    }

    pub fn into_parts(self) -> (Vec<Outcome<T>>, Diagnostics) {
        (self.outcomes, self.diagnostics)
    }

    /// All values, or an error for the first task that panicked.
    pub fn into_result(self) -> anyhow::Result<Vec<T>> {
        let name = self.name;
        self.outcomes
            .into_iter()
            .map(|outcome| outcome.with_context(|| format!("Batch '{name}'")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::CollectSink;

    fn tasks(poison: usize) -> Vec<impl FnOnce() -> usize + Send> {
        (0..6)
            .map(move |i| {
                move || {
                    if i == poison {
                        panic!("task {i} failed");
                    }
                    i * 10
                }
            })
            .collect()
    }

    #[test]
    fn test_builder_defaults() {
        let executor = Executor::default();
        assert_eq!(executor.name(), "batch");
        assert_eq!(executor.strategy(), Strategy::Unbounded);
    }

    #[test]
    fn test_builder_throttle() {
        let executor = Executor::builder().throttle(4).build();
        assert_eq!(
            executor.strategy(),
            Strategy::Waves(NonZeroUsize::new(4).unwrap())
        );

        let executor = Executor::builder().throttle(-2).build();
        assert_eq!(executor.strategy(), Strategy::Unbounded);
    }

    #[test]
    fn test_report_helpers() {
        let executor = Executor::builder().name("tens").sink(CollectSink::new()).build();
        let report = executor.run(tasks(2)).unwrap();

        assert_eq!(report.len(), 6);
        assert!(!report.is_empty());
        assert_eq!(
            report.values(),
            [Some(&0), Some(&10), None, Some(&30), Some(&40), Some(&50)]
        );

        let failures: Vec<_> = report.failures().collect();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].index, 2);
        assert_eq!(failures[0].message, "task 2 failed");
    }

    #[test]
    fn test_into_result_reports_first_failure() {
        let executor = Executor::builder().name("tens").sink(|_: &TaskFailure| {}).build();

        let error = executor.run(tasks(4)).unwrap().into_result().unwrap_err();
        assert_eq!(error.to_string(), "Batch 'tens'");
        assert_eq!(error.downcast_ref::<TaskFailure>().unwrap().index, 4);

        let values = executor.run(tasks(usize::MAX)).unwrap().into_result().unwrap();
        assert_eq!(values, [0, 10, 20, 30, 40, 50]);
    }

    #[test]
    fn test_custom_sink_sees_each_panic_once() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let executor = Executor::builder()
            .strategy(Strategy::Pool(NonZeroUsize::new(2).unwrap()))
            .sink(move |failure: &TaskFailure| {
                assert_eq!(failure.index, 1);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .build();

        let report = executor.run(tasks(1)).unwrap();
        assert_eq!(report.failures().count(), 1);
        assert_eq!(seen.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_diagnostics_cover_every_task() {
        let executor = Executor::builder().throttle(4).sink(CollectSink::new()).build();
        let (outcomes, diagnostics) = executor.run(tasks(0)).unwrap().into_parts();

        assert_eq!(outcomes.len(), 6);
        assert_eq!(diagnostics.execution_times.len(), 6);
        assert_eq!(diagnostics.waves.len(), 2);
        assert_eq!(diagnostics.failed, [0]);

        // panicked tasks are timed like any other
        let waves: Vec<_> = diagnostics.execution_times.iter().map(|t| t.wave).collect();
        assert_eq!(waves, [0, 0, 0, 0, 1, 1]);
    }
}
