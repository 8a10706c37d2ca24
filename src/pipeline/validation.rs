use std::ops::Range;

use bytes::Bytes;
use thiserror::Error;

use crate::common::data::ResponseMetadata;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("unacceptable status code {0}")]
    UnacceptableStatusCode(u16),
    #[error("unacceptable content type '{actual}', expected one of {acceptable:?}")]
    UnacceptableContentType {
        acceptable: Vec<String>,
        actual: String,
    },
    #[error("response has no content type, expected one of {0:?}")]
    MissingContentType(Vec<String>),
    #[error("{0}")]
    Custom(String),
}

/// Inspects a received response and may still reject it.
pub trait ResponseValidator: Send + Sync {
    fn validate(
        &self,
        response: &ResponseMetadata,
        body: Option<&Bytes>,
    ) -> Result<(), ValidationError>;
}

impl<F> ResponseValidator for F
where
    F: Fn(&ResponseMetadata, Option<&Bytes>) -> Result<(), ValidationError> + Send + Sync,
{
    fn validate(
        &self,
        response: &ResponseMetadata,
        body: Option<&Bytes>,
    ) -> Result<(), ValidationError> {
        (self)(response, body)
    }
}

/// Accepts status codes within a range.
#[derive(Debug, Clone)]
pub struct StatusCodeValidator {
    acceptable: Range<u16>,
}

impl StatusCodeValidator {
    pub fn new(acceptable: Range<u16>) -> Self {
        Self { acceptable }
    }

    /// Accepts `200..300`.
    pub fn success() -> Self {
        Self::new(200..300)
    }
}

impl ResponseValidator for StatusCodeValidator {
    fn validate(
        &self,
        response: &ResponseMetadata,
        _: Option<&Bytes>,
    ) -> Result<(), ValidationError> {
        let status = response.status.as_u16();
        if self.acceptable.contains(&status) {
            Ok(())
        } else {
            Err(ValidationError::UnacceptableStatusCode(status))
        }
    }
}

/// Accepts responses whose `Content-Type` is one of the given mime types.
///
/// `type/*` and `*/*` act as wildcards. Responses without a body pass
/// regardless of their content type.
#[derive(Debug, Clone)]
pub struct ContentTypeValidator {
    acceptable: Vec<String>,
}

impl ContentTypeValidator {
    pub fn new<I, S>(acceptable: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            acceptable: acceptable
                .into_iter()
                .map(|s| s.into().to_lowercase())
                .collect(),
        }
    }

    fn accepts(&self, mime_type: &str) -> bool {
        let (main, sub) = mime_type.split_once('/').unwrap_or((mime_type, ""));
        self.acceptable.iter().any(|candidate| {
            let (c_main, c_sub) = candidate.split_once('/').unwrap_or((candidate.as_str(), ""));
            (c_main == "*" || c_main == main) && (c_sub == "*" || c_sub == sub)
        })
    }
}

impl ResponseValidator for ContentTypeValidator {
    fn validate(
        &self,
        response: &ResponseMetadata,
        body: Option<&Bytes>,
    ) -> Result<(), ValidationError> {
        if body.map_or(true, |b| b.is_empty()) {
            return Ok(());
        }

        match response.mime_type() {
            None => Err(ValidationError::MissingContentType(self.acceptable.clone())),
            Some(mime_type) if self.accepts(&mime_type) => Ok(()),
            Some(mime_type) => Err(ValidationError::UnacceptableContentType {
                acceptable: self.acceptable.clone(),
                actual: mime_type,
            }),
        }
    }
}

#[cfg(test)]
mod test {
    use super::{ContentTypeValidator, ResponseValidator, StatusCodeValidator, ValidationError};
    use crate::common::data::ResponseMetadata;
    use bytes::Bytes;
    use http::{header::CONTENT_TYPE, HeaderValue, StatusCode};

    fn response(status: u16, content_type: Option<&'static str>) -> ResponseMetadata {
        let mut metadata = ResponseMetadata::new(StatusCode::from_u16(status).unwrap());
        if let Some(ct) = content_type {
            metadata
                .headers
                .insert(CONTENT_TYPE, HeaderValue::from_static(ct));
        }
        metadata
    }

    #[test]
    fn status_code_validator() {
        let validator = StatusCodeValidator::success();

        assert!(validator.validate(&response(204, None), None).is_ok());
        assert_eq!(
            validator.validate(&response(404, None), None),
            Err(ValidationError::UnacceptableStatusCode(404))
        );
    }

    #[test]
    fn content_type_validator_supports_wildcards() {
        let body = Bytes::from_static(b"{}");
        let json = ContentTypeValidator::new(["application/json"]);
        let any_text = ContentTypeValidator::new(["text/*"]);

        let res = response(200, Some("application/json; charset=utf-8"));
        assert!(json.validate(&res, Some(&body)).is_ok());
        assert!(any_text.validate(&res, Some(&body)).is_err());
        assert!(any_text
            .validate(&response(200, Some("text/html")), Some(&body))
            .is_ok());
        assert!(matches!(
            json.validate(&response(200, None), Some(&body)),
            Err(ValidationError::MissingContentType(_))
        ));
        assert!(json.validate(&response(200, None), None).is_ok());
    }

    #[test]
    fn closures_are_validators() {
        let validator = |res: &ResponseMetadata, _: Option<&Bytes>| {
            if res.headers.contains_key("x-ok") {
                Ok(())
            } else {
                Err(ValidationError::Custom("missing x-ok".to_string()))
            }
        };

        assert!(validator.validate(&response(200, None), None).is_err());
    }
}
