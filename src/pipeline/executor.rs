use tokio::runtime::Handle;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// The execution context completions are delivered on.
pub trait CompletionExecutor: Send + Sync {
    fn execute(&self, job: Job);
}

/// Runs completions on whichever thread finished the request.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateExecutor;

impl CompletionExecutor for ImmediateExecutor {
    fn execute(&self, job: Job) {
        job()
    }
}

/// Runs completions as blocking tasks on a tokio runtime.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// Uses the runtime of the calling context, if there is one.
    pub fn current() -> Option<Self> {
        Handle::try_current().ok().map(Self::new)
    }
}

impl CompletionExecutor for TokioExecutor {
    fn execute(&self, job: Job) {
        self.handle.spawn_blocking(job);
    }
}
