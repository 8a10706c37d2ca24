use tokio::runtime::{Handle, Runtime};

pub(crate) fn new(worker_threads: usize) -> std::io::Result<Runtime> {
    assert!(
        worker_threads > 0,
        "Parameter worker_threads must be larger than 0"
    );

    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(worker_threads)
        .thread_name("httpstub-transport")
        .enable_all()
        .build()
}

/// A runtime owned by a transport.
///
/// The last reference may be released from inside one of the runtime's own
/// tasks (a completion callback holding the transport), where a blocking
/// shutdown would panic. Dropping therefore always shuts down in the background.
pub(crate) struct BackgroundRuntime {
    runtime: Option<Runtime>,
    handle: Handle,
}

impl BackgroundRuntime {
    pub(crate) fn new(worker_threads: usize) -> std::io::Result<Self> {
        let runtime = new(worker_threads)?;
        Ok(Self {
            handle: runtime.handle().clone(),
            runtime: Some(runtime),
        })
    }

    pub(crate) fn handle(&self) -> &Handle {
        &self.handle
    }
}

impl Drop for BackgroundRuntime {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}
