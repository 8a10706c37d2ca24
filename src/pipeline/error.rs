use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;

use crate::{
    common::data::ResponseMetadata, pipeline::validation::ValidationError,
    transport::TransportError,
};

pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Why a request ended without a usable response.
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// The request has no URL a transport could use. Never retried.
    #[error("request URL cannot be resolved: {0}")]
    InvalidRequestUrl(String),
    /// The adapter refused the request. No transport attempt was made.
    #[error("request adaptation failed: {0}")]
    AdaptationFailed(#[source] Arc<dyn std::error::Error + Send + Sync + 'static>),
    #[error("transport failed: {source}")]
    TransportFailed {
        #[source]
        source: TransportError,
        response: Option<ResponseMetadata>,
    },
    #[error("response validation failed: {source}")]
    ValidationFailed {
        #[source]
        source: ValidationError,
        response: ResponseMetadata,
        body: Option<Bytes>,
    },
    #[error("the request was cancelled")]
    Cancelled,
    #[error("the transport completed without a response or an error")]
    UnexpectedEmptyResult,
    /// `perform` was called on a pipeline that already ran a request.
    #[error("the pipeline has already performed a request")]
    AlreadyPerformed,
}

impl PipelineError {
    pub fn adaptation_failed(cause: BoxError) -> Self {
        PipelineError::AdaptationFailed(Arc::from(cause))
    }

    /// Transport and validation failures may be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PipelineError::TransportFailed { .. } | PipelineError::ValidationFailed { .. }
        )
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::Cancelled)
    }

    /// The response received before the failure, if any.
    pub fn response(&self) -> Option<&ResponseMetadata> {
        match self {
            PipelineError::TransportFailed { response, .. } => response.as_ref(),
            PipelineError::ValidationFailed { response, .. } => Some(response),
            _ => None,
        }
    }

    pub fn body(&self) -> Option<&Bytes> {
        match self {
            PipelineError::ValidationFailed { body, .. } => body.as_ref(),
            _ => None,
        }
    }
}
