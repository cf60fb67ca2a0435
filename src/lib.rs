#![forbid(unsafe_code)]
#![doc = include_str!("../README.md")]

mod engine;
mod error;
mod executor;
mod sink;
mod utils;

pub use crate::engine::{
    BoxTask, Diagnostics, Outcome, Strategy, TaskExecution, WaveExecution,
};
pub use crate::error::*;
pub use crate::executor::{Executor, ExecutorBuilder, Report};
pub use crate::sink::{CollectSink, Sink, TracingSink};
#[cfg(feature = "logging")]
pub use crate::utils::init_logging;

/// Runs every task at the same time, one execution unit per task, and waits
/// for all of them.
///
/// The returned vector has one outcome per task in submission order. A task
/// that panicked leaves a [`TaskFailure`] in its slot and is reported through
/// [`TracingSink`]; the other tasks are unaffected.
///
/// An empty batch returns an empty vector without starting anything.
pub fn parallelize<T, F>(tasks: Vec<F>) -> Result<Vec<Outcome<T>>, ExecutorError>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    Ok(Executor::default().run(tasks)?.into_outcomes())
}

/// Like [`parallelize`], but never runs more than `factor` tasks at once.
///
/// The batch is cut into consecutive waves of `factor` tasks (the last one
/// holds the remainder). A wave starts only after the previous one has fully
/// completed. A `factor` of zero or below removes the bound and behaves
/// exactly like [`parallelize`].
///
/// For a bound without barriers between waves use [`Strategy::Pool`] with an
/// [`Executor`].
pub fn parallelize_throttled<T, F>(
    tasks: Vec<F>,
    factor: isize,
) -> Result<Vec<Outcome<T>>, ExecutorError>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let executor = Executor::builder().throttle(factor).build();
    Ok(executor.run(tasks)?.into_outcomes())
}
