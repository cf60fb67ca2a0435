mod diagnostics;

use std::ops::Range;
use std::time::{Duration, Instant};

use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{Level, Span};
use tracing_indicatif::span_ext::IndicatifSpanExt;

use crate::engine::guard::guard;
use crate::engine::{Outcome, Strategy};
use crate::{ExecutorError, Sink};

pub use diagnostics::Diagnostics;

/// When a single task ran, and in which wave.
#[derive(Debug, Clone)]
pub struct TaskExecution {
    pub start: Instant,
    pub duration: Duration,
    pub wave: usize,
}

impl TaskExecution {
    pub fn end(&self) -> Instant {
        self.start + self.duration
    }
}

/// When a wave ran, and which slice of the batch it covered.
#[derive(Debug, Clone)]
pub struct WaveExecution {
    pub range: Range<usize>,
    pub start: Instant,
    pub duration: Duration,
}

impl WaveExecution {
    pub fn end(&self) -> Instant {
        self.start + self.duration
    }
}

/// The single write a unit makes into its slot.
struct Completed<T> {
    outcome: Outcome<T>,
    execution: TaskExecution,
}

type Slot<T> = Option<Completed<T>>;

/// State shared by every execution unit of one batch.
struct Unit<'a> {
    sink: &'a dyn Sink,
    progress: Span,
}

impl Unit<'_> {
    fn execute<T, F>(&self, index: usize, wave: usize, task: F) -> Completed<T>
    where
        F: FnOnce() -> T,
    {
        // rayon workers never entered the batch span, so name it explicitly
        let span = tracing::span!(parent: &self.progress, Level::TRACE, "task", index, wave);
        let _enter = span.enter();

        let start = Instant::now();
        let outcome = guard(index, task, self.sink);
        let duration = start.elapsed();

        self.progress.pb_inc(1);

        Completed {
            outcome,
            execution: TaskExecution {
                start,
                duration,
                wave,
            },
        }
    }
}

fn thread_pool(threads: usize) -> Result<ThreadPool, ExecutorError> {
    let pool = ThreadPoolBuilder::new()
        .num_threads(threads)
        .thread_name(|i| format!("parallelize-{i}"))
        .build()?;

    Ok(pool)
}

/// Executes a batch according to `strategy` and returns the outcomes in
/// submission order, together with timing diagnostics.
///
/// The result collector is a vector of slots, one per task. Each unit gets an
/// exclusive borrow of its own slot, so the collector needs no lock and no
/// unit ever observes another's result.
pub(crate) fn run<T, F>(
    name: &str,
    strategy: Strategy,
    sink: &dyn Sink,
    tasks: Vec<F>,
) -> Result<(Vec<Outcome<T>>, Diagnostics), ExecutorError>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let total = tasks.len();
    if total == 0 {
        return Ok((Vec::new(), Diagnostics::default()));
    }

    let threads = strategy.concurrency(total);
    let pool = thread_pool(threads)?;

    let root_span = tracing::span!(Level::INFO, "batch", batch = name, tasks = total);
    root_span.pb_set_style(&crate::utils::get_style_batch()?);
    root_span.pb_set_length(total as u64);
    root_span.pb_set_message(&format!("Running {name}..."));
    let _enter = root_span.enter();

    tracing::debug!(?strategy, threads, "starting batch of {total} tasks");

    let unit = Unit {
        sink,
        progress: root_span.clone(),
    };

    let mut slots: Vec<Slot<T>> = std::iter::repeat_with(|| None).take(total).collect();

    let waves = match strategy {
        Strategy::Unbounded | Strategy::Waves(_) => {
            run_waves(&pool, tasks, &mut slots, threads, &unit)
        }
        Strategy::Pool(_) => run_pool(&pool, tasks, &mut slots, threads, &unit),
    };

    let mut outcomes = Vec::with_capacity(total);
    let mut execution_times = Vec::with_capacity(total);
    let mut failed = Vec::new();

    for (index, slot) in slots.into_iter().enumerate() {
        // The scope barrier only returns once every spawned unit has finished,
        // and every unit writes its slot before finishing.
        let Completed { outcome, execution } = slot.expect("unit finished without writing its slot");

        if outcome.is_err() {
            failed.push(index);
        }
        outcomes.push(outcome);
        execution_times.push(execution);
    }

    if !failed.is_empty() {
        tracing::warn!("{} of {total} tasks panicked in {name}", failed.len());
    }
    tracing::debug!("batch {name} complete");

    Ok((
        outcomes,
        Diagnostics {
            execution_times,
            waves,
            failed,
        },
    ))
}

/// Splits the batch into contiguous waves of `size` tasks and runs them one
/// after another. Inside a wave every task gets its own unit, and the wave
/// ends at the scope barrier. With `size == tasks.len()` this is the
/// unbounded runner.
fn run_waves<T, F>(
    pool: &ThreadPool,
    tasks: Vec<F>,
    slots: &mut [Slot<T>],
    size: usize,
    unit: &Unit<'_>,
) -> Vec<WaveExecution>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let mut tasks = tasks.into_iter();
    let mut waves = Vec::with_capacity(slots.len().div_ceil(size));

    for (wave, chunk) in slots.chunks_mut(size).enumerate() {
        let offset = wave * size;
        let range = offset..offset + chunk.len();

        let span = tracing::span!(Level::DEBUG, "wave", index = wave, size = chunk.len());
        let _enter = span.enter();

        let start = Instant::now();
        pool.scope(|s| {
            // Zipping the chunk first stops before pulling a task that
            // belongs to the next wave.
            for ((local, slot), task) in chunk.iter_mut().enumerate().zip(tasks.by_ref()) {
                s.spawn(move |_| {
                    *slot = Some(unit.execute(offset + local, wave, task));
                });
            }
        });

        waves.push(WaveExecution {
            range,
            start,
            duration: start.elapsed(),
        });
    }

    waves
}

/// Feeds every task through a FIFO queue drained by `workers` long-lived
/// workers. Slots are still addressed by the task's batch index.
fn run_pool<T, F>(
    pool: &ThreadPool,
    tasks: Vec<F>,
    slots: &mut [Slot<T>],
    workers: usize,
    unit: &Unit<'_>,
) -> Vec<WaveExecution>
where
    T: Send,
    F: FnOnce() -> T + Send,
{
    let total = slots.len();
    let (sender, receiver) = crossbeam_channel::unbounded();

    for (index, (slot, task)) in slots.iter_mut().zip(tasks).enumerate() {
        sender
            .send((index, slot, task))
            .expect("job queue receiver dropped while filling");
    }
    drop(sender);

    let start = Instant::now();
    pool.scope(|s| {
        for _ in 0..workers {
            let receiver = receiver.clone();
            s.spawn(move |_| {
                for (index, slot, task) in receiver {
                    *slot = Some(unit.execute(index, 0, task));
                }
            });
        }
    });

    vec![WaveExecution {
        range: 0..total,
        start,
        duration: start.elapsed(),
    }]
}
