use std::fmt;

use crate::error::TaskError;

/// Device a pushed operator call targets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum Device {
    #[default]
    Cpu,
    Gpu(u32),
}

type CompletionFn = Box<dyn FnOnce(Result<(), TaskError>) + Send + 'static>;

/// Execution context handed to [`CustomOpEngine::push`](super::CustomOpEngine::push).
///
/// Owns the completion signal, which the engine consumes exactly once per task.
pub struct OpContext {
    device: Device,
    on_complete: CompletionFn,
}

impl OpContext {
    pub fn new<F>(device: Device, on_complete: F) -> Self
    where
        F: FnOnce(Result<(), TaskError>) + Send + 'static,
    {
        OpContext {
            device,
            on_complete: Box::new(on_complete),
        }
    }

    pub fn device(&self) -> Device {
        self.device
    }

    pub(crate) fn complete(self, result: Result<(), TaskError>) {
        (self.on_complete)(result);
    }
}

impl fmt::Debug for OpContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpContext")
            .field("device", &self.device)
            .finish_non_exhaustive()
    }
}
