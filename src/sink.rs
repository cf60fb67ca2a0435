use std::io::{self, Write};
use std::sync::{Arc, Mutex, PoisonError};

use console::style;

use crate::TaskFailure;

/// Receives a report every time the panic guard contains a failing task.
///
/// Sinks are shared by all execution units of a batch, so they are called
/// concurrently from many threads. Any `Fn(&TaskFailure) + Send + Sync`
/// closure is a sink.
pub trait Sink: Send + Sync {
    fn report(&self, failure: &TaskFailure);
}

impl<F> Sink for F
where
    F: Fn(&TaskFailure) + Send + Sync,
{
    fn report(&self, failure: &TaskFailure) {
        self(failure)
    }
}

/// The default sink, emits every failure as a `tracing` error event with the
/// captured backtrace attached.
///
/// Until a `tracing` subscriber has been installed the event would go
/// nowhere, so the same report is written to stderr instead.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl TracingSink {
    fn write_report(failure: &TaskFailure, out: &mut impl Write) -> io::Result<()> {
        let location = failure.location.as_deref().unwrap_or("<unknown>");
        writeln!(out, "{} {}", style("panic contained:").red().bold(), failure)?;
        writeln!(out, "  at {location}")?;
        writeln!(out, "{}", failure.backtrace)
    }
}

impl Sink for TracingSink {
    fn report(&self, failure: &TaskFailure) {
        if !tracing::dispatcher::has_been_set() {
            // nothing left to do if stderr itself is gone
            let _ = Self::write_report(failure, &mut io::stderr().lock());
            return;
        }

        tracing::error!(
            task = failure.index,
            location = failure.location.as_deref().unwrap_or("<unknown>"),
            "{} {}\n{}",
            style("panic contained:").red().bold(),
            failure,
            failure.backtrace,
        );
    }
}

/// Keeps every reported failure in memory. Clones share the same list, so a
/// clone can be handed to an [`Executor`](crate::Executor) and inspected
/// afterwards.
#[derive(Debug, Default, Clone)]
pub struct CollectSink {
    failures: Arc<Mutex<Vec<TaskFailure>>>,
}

impl CollectSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Removes and returns the failures collected so far, in the order they
    /// were reported.
    pub fn take(&self) -> Vec<TaskFailure> {
        std::mem::take(&mut *self.lock())
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<TaskFailure>> {
        // a poisoned list is still a valid list
        self.failures.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Sink for CollectSink {
    fn report(&self, failure: &TaskFailure) {
        self.lock().push(failure.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    fn failure(index: usize) -> TaskFailure {
        TaskFailure::new(index, "boom".into(), None, String::new())
    }

    #[test]
    fn test_collect_sink() {
        let sink = CollectSink::new();
        assert!(sink.is_empty());

        sink.report(&failure(1));
        sink.report(&failure(4));
        assert_eq!(sink.len(), 2);

        let taken = sink.take();
        assert_eq!(taken.iter().map(|f| f.index).collect::<Vec<_>>(), [1, 4]);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_collect_sink_clones_share_storage() {
        let sink = CollectSink::new();
        let handle = sink.clone();

        handle.report(&failure(9));
        assert_eq!(sink.take()[0].index, 9);
        assert!(handle.is_empty());
    }

    #[test]
    fn test_closure_sink() {
        let count = AtomicUsize::new(0);
        let sink = |_: &TaskFailure| {
            count.fetch_add(1, Ordering::Relaxed);
        };

        sink.report(&failure(0));
        Sink::report(&sink, &failure(1));
        assert_eq!(count.load(Ordering::Relaxed), 2);
    }

    #[test]
    fn test_tracing_sink_without_subscriber() {
        TracingSink.report(&failure(0));
    }

    #[test]
    fn test_tracing_sink_report_carries_backtrace() {
        let failure = TaskFailure::new(
            3,
            "boom".into(),
            Some("src/jobs.rs:12:5".into()),
            "   0: jobs::explode\n   1: jobs::run".into(),
        );

        let mut out = Vec::new();
        TracingSink::write_report(&failure, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();

        assert!(text.contains("panic contained:"), "{text}");
        assert!(text.contains("task #3 panicked: boom"), "{text}");
        assert!(text.contains("at src/jobs.rs:12:5"), "{text}");
        assert!(text.contains("0: jobs::explode\n   1: jobs::run"), "{text}");
    }

    #[test]
    fn test_tracing_sink_report_without_location() {
        let mut out = Vec::new();
        TracingSink::write_report(&failure(0), &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("at <unknown>"), "{text}");
    }
}
