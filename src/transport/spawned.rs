use std::sync::{Arc, Mutex};

use bytes::Bytes;
use http::Request;
use tokio::{runtime::Handle, sync::oneshot};

use crate::{
    common::{http::AsyncTransport, runtime::BackgroundRuntime, util::lock},
    transport::{TaskHandle, Transport, TransportCallback, TransportError, TransportOutcome},
};

/// Runs an [`AsyncTransport`] on a tokio runtime and exposes it through the
/// callback based [`Transport`] contract.
///
/// Cancelling a task drops the in-flight request future and completes the
/// task with [`TransportError::Cancelled`].
pub struct SpawnedTransport<T> {
    transport: Arc<T>,
    handle: Handle,
    _runtime: Option<Arc<BackgroundRuntime>>,
}

impl<T> SpawnedTransport<T>
where
    T: AsyncTransport + Send + Sync + 'static,
{
    /// Spawns tasks onto an existing runtime.
    pub fn new(transport: T, handle: Handle) -> Self {
        Self {
            transport: Arc::new(transport),
            handle,
            _runtime: None,
        }
    }

    /// Spawns tasks onto a runtime owned by the returned transport.
    pub fn with_own_runtime(transport: T, worker_threads: usize) -> std::io::Result<Self> {
        let runtime = BackgroundRuntime::new(worker_threads.max(1))?;
        Ok(Self {
            transport: Arc::new(transport),
            handle: runtime.handle().clone(),
            _runtime: Some(Arc::new(runtime)),
        })
    }
}

struct SpawnedTask {
    cancel: Mutex<Option<oneshot::Sender<()>>>,
}

impl TaskHandle for SpawnedTask {
    fn cancel(&self) {
        if let Some(sender) = lock(&self.cancel).take() {
            let _ = sender.send(());
        }
    }
}

impl<T> Transport for SpawnedTransport<T>
where
    T: AsyncTransport + Send + Sync + 'static,
{
    fn perform_request(
        &self,
        request: Request<Bytes>,
        on_complete: TransportCallback,
    ) -> Box<dyn TaskHandle> {
        let (cancel_sender, cancel_receiver) = oneshot::channel::<()>();
        let transport = self.transport.clone();

        self.handle.spawn(async move {
            let outcome = tokio::select! {
                result = transport.send(request) => match result {
                    Ok(response) => TransportOutcome::from_response(response),
                    Err(err) => TransportOutcome::failed(err),
                },
                Ok(()) = cancel_receiver => TransportOutcome::failed(TransportError::Cancelled),
            };
            on_complete(outcome);
        });

        Box::new(SpawnedTask {
            cancel: Mutex::new(Some(cancel_sender)),
        })
    }
}

#[cfg(test)]
mod test {
    use super::SpawnedTransport;
    use crate::{
        common::http::AsyncTransport,
        transport::{Transport, TransportError, TransportOutcome},
    };
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{Request, Response};
    use std::time::Duration;
    use tokio::sync::oneshot;

    struct SlowEcho {
        delay: Duration,
    }

    #[async_trait]
    impl AsyncTransport for SlowEcho {
        async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
            tokio::time::sleep(self.delay).await;
            Ok(Response::new(req.into_body()))
        }
    }

    fn send(
        transport: &SpawnedTransport<SlowEcho>,
        body: &'static str,
    ) -> (Box<dyn crate::transport::TaskHandle>, oneshot::Receiver<TransportOutcome>) {
        let (sender, receiver) = oneshot::channel();
        let request = Request::new(Bytes::from_static(body.as_bytes()));
        let handle = transport.perform_request(
            request,
            Box::new(move |outcome| {
                let _ = sender.send(outcome);
            }),
        );
        (handle, receiver)
    }

    #[tokio::test]
    async fn completes_with_response() {
        let transport = SpawnedTransport::new(
            SlowEcho {
                delay: Duration::from_millis(1),
            },
            tokio::runtime::Handle::current(),
        );

        let (_handle, receiver) = send(&transport, "ping");
        let outcome = receiver.await.unwrap();

        assert_eq!(outcome.body.unwrap(), Bytes::from_static(b"ping"));
        assert!(outcome.error.is_none());
    }

    #[tokio::test]
    async fn cancel_completes_with_cancelled_error() {
        let transport = SpawnedTransport::new(
            SlowEcho {
                delay: Duration::from_secs(30),
            },
            tokio::runtime::Handle::current(),
        );

        let (handle, receiver) = send(&transport, "ping");
        handle.cancel();
        handle.cancel();
        let outcome = receiver.await.unwrap();

        assert_eq!(outcome.error, Some(TransportError::Cancelled));
        assert!(outcome.response.is_none());
    }

    #[test]
    fn own_runtime_completes_requests() {
        let transport = SpawnedTransport::with_own_runtime(
            SlowEcho {
                delay: Duration::from_millis(1),
            },
            1,
        )
        .unwrap();

        let (_handle, receiver) = send(&transport, "pong");
        let outcome = receiver.blocking_recv().unwrap();

        assert_eq!(outcome.body.unwrap(), Bytes::from_static(b"pong"));
    }
}
