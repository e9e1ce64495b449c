//! Thread-local execution flags consulted by nested computation.
//!
//! The recording flag tells autograd whether to build a trace, the training flag selects
//! training-time versus inference-time semantics. Both live in thread-local cells so that
//! tasks running concurrently on different workers override them independently. Overrides
//! are installed with [`FlagScope`], which restores the previous values when dropped, including
//! during unwinding.

use std::cell::Cell;
use std::marker::PhantomData;

thread_local! {
    static RECORDING: Cell<bool> = const { Cell::new(false) };
    static TRAINING: Cell<bool> = const { Cell::new(false) };
}

pub fn is_recording() -> bool {
    RECORDING.with(Cell::get)
}

/// Sets the recording flag for the current thread and returns the previous value.
pub fn set_is_recording(recording: bool) -> bool {
    RECORDING.with(|cell| cell.replace(recording))
}

pub fn is_training() -> bool {
    TRAINING.with(Cell::get)
}

/// Sets the training flag for the current thread and returns the previous value.
pub fn set_is_training(training: bool) -> bool {
    TRAINING.with(|cell| cell.replace(training))
}

/// Snapshot of both flags, captured at push time and installed around task execution.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ExecFlags {
    pub recording: bool,
    pub training: bool,
}

impl ExecFlags {
    pub fn new(recording: bool, training: bool) -> Self {
        ExecFlags {
            recording,
            training,
        }
    }

    /// Reads the flags currently in effect on this thread.
    pub fn current() -> Self {
        ExecFlags {
            recording: is_recording(),
            training: is_training(),
        }
    }
}

/// RAII guard that installs a flag override and restores the previous values on drop.
///
/// The guard is tied to the thread that created it.
pub struct FlagScope {
    prev: ExecFlags,
    _not_send: PhantomData<*const ()>,
}

impl FlagScope {
    pub fn enter(flags: ExecFlags) -> Self {
        let recording = set_is_recording(flags.recording);
        let training = set_is_training(flags.training);
        FlagScope {
            prev: ExecFlags {
                recording,
                training,
            },
            _not_send: PhantomData,
        }
    }

    /// The values that will be restored when the guard drops.
    pub fn previous(&self) -> ExecFlags {
        self.prev
    }
}

impl Drop for FlagScope {
    fn drop(&mut self) {
        set_is_training(self.prev.training);
        set_is_recording(self.prev.recording);
    }
}

/// Runs `f` with `flags` installed on the current thread.
pub fn with_flags<F, R>(flags: ExecFlags, f: F) -> R
where
    F: FnOnce() -> R,
{
    let scope = FlagScope::enter(flags);
    let result = f();
    drop(scope);
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::panic;

    #[test]
    fn setters_return_previous_value() {
        let _reset = FlagScope::enter(ExecFlags::default());
        assert!(!set_is_recording(true));
        assert!(set_is_recording(false));
        assert!(!set_is_training(true));
        assert!(is_training());
    }

    #[test]
    fn nested_scopes_unwind_in_order() {
        let _reset = FlagScope::enter(ExecFlags::new(false, true));
        with_flags(ExecFlags::new(true, false), || {
            assert_eq!(ExecFlags::current(), ExecFlags::new(true, false));
            with_flags(ExecFlags::new(true, true), || {
                assert_eq!(ExecFlags::current(), ExecFlags::new(true, true));
            });
            assert_eq!(ExecFlags::current(), ExecFlags::new(true, false));
        });
        assert_eq!(ExecFlags::current(), ExecFlags::new(false, true));
    }

    #[test]
    fn scope_reports_the_values_it_will_restore() {
        let outer = FlagScope::enter(ExecFlags::new(false, true));
        let inner = FlagScope::enter(ExecFlags::new(true, false));
        assert_eq!(inner.previous(), ExecFlags::new(false, true));
        drop(inner);
        assert_eq!(ExecFlags::current(), ExecFlags::new(false, true));
        assert_eq!(outer.previous(), ExecFlags::default());
    }

    #[test]
    fn scope_restores_after_panic() {
        let _reset = FlagScope::enter(ExecFlags::new(false, false));
        let result = panic::catch_unwind(|| {
            let _scope = FlagScope::enter(ExecFlags::new(true, true));
            panic!("boom");
        });
        assert!(result.is_err());
        assert_eq!(ExecFlags::current(), ExecFlags::new(false, false));
    }

    #[test]
    fn flags_are_per_thread() {
        let _scope = FlagScope::enter(ExecFlags::new(true, true));
        let seen = std::thread::spawn(ExecFlags::current)
            .join()
            .expect("probe thread panicked");
        assert_eq!(seen, ExecFlags::default());
        assert_eq!(ExecFlags::current(), ExecFlags::new(true, true));
    }
}
