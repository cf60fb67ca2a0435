use thiserror::Error;

/// A task that terminated abnormally.
///
/// This is what the panic guard leaves in a result slot instead of a value.
/// Unlike a zero or placeholder value it can't be confused with a legitimate
/// result, and it carries everything needed to find the failing task.
#[derive(Debug, Clone, Error)]
#[error("task #{index} panicked: {message}")]
pub struct TaskFailure {
    /// Position of the task in the submitted batch.
    pub index: usize,
    /// The panic payload rendered as text.
    pub message: String,
    /// Source location of the `panic!`, if the panic hook saw it.
    pub location: Option<String>,
    /// Backtrace captured at the panic site.
    pub backtrace: String,
}

impl TaskFailure {
    pub(crate) fn new(
        index: usize,
        message: String,
        location: Option<String>,
        backtrace: String,
    ) -> Self {
        Self {
            index,
            message,
            location,
            backtrace,
        }
    }
}

/// Failures of the executor itself, as opposed to the tasks it runs.
///
/// These happen before any task has started.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("Couldn't start the execution units.\n{0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Invalid progress bar template.\n{0}")]
    ProgressStyle(#[from] indicatif::style::TemplateError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_display() {
        let failure = TaskFailure::new(3, "boom".into(), None, String::new());
        assert_eq!(failure.to_string(), "task #3 panicked: boom");
    }

    #[test]
    fn test_failure_into_anyhow() {
        let failure = TaskFailure::new(7, "bad input".into(), Some("src/x.rs:1:1".into()), String::new());
        let error = anyhow::Error::from(failure);
        let failure = error.downcast_ref::<TaskFailure>().unwrap();
        assert_eq!(failure.index, 7);
        assert_eq!(failure.location.as_deref(), Some("src/x.rs:1:1"));
    }
}
