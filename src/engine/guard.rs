use std::any::Any;
use std::backtrace::Backtrace;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Once;

use crate::engine::Outcome;
use crate::{Sink, TaskFailure};

/// What the panic hook saw at the panic site.
#[derive(Default)]
struct PanicSite {
    location: Option<String>,
    backtrace: String,
}

thread_local! {
    /// Set while a guarded task runs on this thread.
    static GUARDED: Cell<bool> = const { Cell::new(false) };
    /// Filled by the hook, drained by the guard.
    static SITE: RefCell<Option<PanicSite>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Installs a process wide panic hook once. For panics raised inside a guarded
/// task it records the location and a backtrace for the guard and keeps the
/// default report off stderr. Every other panic goes to the previous hook.
fn install_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            if !GUARDED.with(Cell::get) {
                return previous(info);
            }

            let site = PanicSite {
                location: info.location().map(ToString::to_string),
                backtrace: Backtrace::force_capture().to_string(),
            };
            SITE.with(|slot| *slot.borrow_mut() = Some(site));
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        String::from("panic with unknown payload")
    }
}

/// Runs a single task, turning a panic into a [`TaskFailure`] that is
/// reported to `sink` and returned in place of a value. The panic never
/// leaves this function.
pub(crate) fn guard<T, F>(index: usize, task: F, sink: &dyn Sink) -> Outcome<T>
where
    F: FnOnce() -> T,
{
    install_hook();

    // A panic the previous task caught itself still left its site behind,
    // and a `resume_unwind` in this task would not replace it.
    SITE.take();

    let outer = GUARDED.replace(true);
    // The task owns everything it touches, the slot it feeds is only written
    // after the unwind has been stopped.
    let result = panic::catch_unwind(AssertUnwindSafe(task));
    GUARDED.set(outer);

    let payload = match result {
        Ok(value) => return Ok(value),
        Err(payload) => payload,
    };

    let site = SITE.take().unwrap_or_default();
    let failure = TaskFailure::new(
        index,
        payload_message(&*payload),
        site.location,
        site.backtrace,
    );

    sink.report(&failure);
    Err(failure)
}

#[cfg(test)]
mod tests {
    use crate::CollectSink;

    use super::*;

    #[test]
    fn test_value_passes_through() {
        let sink = CollectSink::new();
        let outcome = guard(0, || 2 + 2, &sink);
        assert_eq!(outcome.unwrap(), 4);
        assert!(sink.is_empty());
    }

    #[test]
    fn test_str_payload() {
        let sink = CollectSink::new();
        let outcome: Outcome<()> = guard(5, || panic!("p[an"), &sink);

        let failure = outcome.unwrap_err();
        assert_eq!(failure.index, 5);
        assert_eq!(failure.message, "p[an");

        let reported = sink.take();
        assert_eq!(reported.len(), 1);
        assert_eq!(reported[0].index, 5);
    }

    #[test]
    fn test_string_payload() {
        let sink = CollectSink::new();
        let code = 13;
        let outcome: Outcome<u8> = guard(0, || panic!("bad value {code}"), &sink);
        assert_eq!(outcome.unwrap_err().message, "bad value 13");
    }

    #[test]
    fn test_unknown_payload() {
        let sink = CollectSink::new();
        let outcome: Outcome<()> = guard(0, || std::panic::panic_any(42_u32), &sink);
        assert_eq!(outcome.unwrap_err().message, "panic with unknown payload");
    }

    #[test]
    fn test_panic_site_is_captured() {
        let sink = CollectSink::new();
        let outcome: Outcome<()> = guard(1, || panic!("here"), &sink);

        let failure = outcome.unwrap_err();
        let location = failure.location.unwrap();
        assert!(location.contains("guard.rs"), "{location}");
        assert!(!failure.backtrace.is_empty());
    }

    #[test]
    fn test_nested_guard_restores_flag() {
        let sink = CollectSink::new();
        let outcome = guard(
            0,
            || {
                let inner: Outcome<()> = guard(1, || panic!("inner"), &sink);
                assert!(GUARDED.with(Cell::get));
                inner.is_err()
            },
            &sink,
        );

        assert!(outcome.unwrap());
        assert!(!GUARDED.with(Cell::get));
        assert_eq!(sink.take()[0].index, 1);
    }

    #[test]
    fn test_recovered_panic_site_does_not_leak() {
        let sink = CollectSink::new();

        let recovered = guard(
            0,
            || panic::catch_unwind(|| panic!("handled inside")).is_err(),
            &sink,
        );
        assert!(recovered.unwrap());

        // resume_unwind skips the hook, so nothing describes this panic site
        let outcome: Outcome<()> = guard(1, || panic::resume_unwind(Box::new("rethrown")), &sink);

        let failure = outcome.unwrap_err();
        assert_eq!(failure.message, "rethrown");
        assert_eq!(failure.location, None);
        assert!(failure.backtrace.is_empty());
    }
}
