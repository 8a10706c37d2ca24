use async_trait::async_trait;
use bytes::Bytes;
use http::{Request, Response};

use crate::transport::TransportError;

#[cfg(feature = "remote")]
pub use self::hyper_client::HyperTransport;

/// A transport expressed as an async function.
///
/// Wrap one in a [`SpawnedTransport`](crate::transport::SpawnedTransport) to
/// use it with the callback based [`Transport`](crate::transport::Transport)
/// contract.
#[async_trait]
pub trait AsyncTransport {
    async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError>;
}

#[cfg(feature = "remote")]
mod hyper_client {
    use async_trait::async_trait;
    use bytes::Bytes;
    use http::{Request, Response};
    use http_body_util::{BodyExt, Full};
    use hyper_util::{
        client::legacy::{connect::HttpConnector, Client},
        rt::TokioExecutor,
    };

    use super::AsyncTransport;
    use crate::transport::TransportError;

    /// A plain HTTP/1 network transport built on the hyper-util client.
    #[derive(Clone)]
    pub struct HyperTransport {
        client: Client<HttpConnector, Full<Bytes>>,
    }

    impl HyperTransport {
        pub fn new() -> Self {
            Self {
                client: Client::builder(TokioExecutor::new()).build(HttpConnector::new()),
            }
        }
    }

    impl Default for HyperTransport {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl AsyncTransport for HyperTransport {
        async fn send(&self, req: Request<Bytes>) -> Result<Response<Bytes>, TransportError> {
            let uri = req.uri().clone();
            if uri.scheme().is_none() || uri.authority().is_none() {
                return Err(TransportError::InvalidRequestUrl(uri.to_string()));
            }

            let (req_parts, req_body) = req.into_parts();
            let hyper_req = Request::from_parts(req_parts, Full::new(req_body));

            let res = self.client.request(hyper_req).await.map_err(|err| {
                if err.is_connect() {
                    TransportError::Connection(err.to_string())
                } else {
                    TransportError::Http(err.to_string())
                }
            })?;

            let (res_parts, res_body) = res.into_parts();
            let body = res_body
                .collect()
                .await
                .map_err(|err| TransportError::Http(err.to_string()))?
                .to_bytes();

            tracing::trace!("Received {} from {}", res_parts.status, uri);

            Ok(Response::from_parts(res_parts, body))
        }
    }
}
