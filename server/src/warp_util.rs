#![deny(warnings)]

use {
    crate::Error as BurstError,
    anyhow::Error,
    hyper::StatusCode,
    serde_derive::Serialize,
    std::{borrow::Cow, convert::Infallible},
    warp::{
        body::BodyDeserializeError,
        cors::CorsForbidden,
        reject::{InvalidQuery, LengthRequired, MethodNotAllowed, PayloadTooLarge, Reject},
        reply, Rejection, Reply,
    },
};

#[derive(Serialize)]
#[serde(remote = "StatusCode")]
struct StatusCodeU16(#[serde(getter = "StatusCode::as_u16")] u16);

#[derive(Clone, Serialize, Debug, thiserror::Error)]
#[error("HTTP {}: {}", status, message)]
pub struct HttpError {
    pub message: Cow<'static, str>,
    #[serde(with = "StatusCodeU16")]
    pub status: StatusCode,
}

impl HttpError {
    pub fn from_slice(status: StatusCode, message: &'static str) -> Self {
        Self {
            status,
            message: Cow::Borrowed(message),
        }
    }

    pub fn internal_server_error() -> Self {
        HttpError::from_slice(StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
    }

    /// Classify an error by its root cause: domain errors map to 4xx statuses, anything else is a 500.
    pub fn from(error: Error) -> Self {
        let root = error.root_cause();

        if let Some(e) = root.downcast_ref::<HttpError>() {
            e.clone()
        } else if let Some(e) = root.downcast_ref::<BurstError>() {
            Self {
                status: match e {
                    BurstError::NotFound(_) => StatusCode::NOT_FOUND,
                    BurstError::Validation(_) => StatusCode::BAD_REQUEST,
                },
                message: Cow::Owned(e.to_string()),
            }
        } else {
            Self::internal_server_error()
        }
    }

    pub fn as_reply(&self) -> impl Reply {
        reply::with_status(reply::json(&self), self.status)
    }
}

impl Reject for HttpError {}

pub async fn handle_rejection(rejection: Rejection) -> Result<impl Reply, Infallible> {
    let error = if rejection.is_not_found() {
        HttpError::from_slice(StatusCode::NOT_FOUND, "not found")
    } else if let Some(error) = rejection.find::<HttpError>() {
        error.clone()
    } else if rejection.find::<BodyDeserializeError>().is_some() {
        HttpError::from_slice(StatusCode::BAD_REQUEST, "malformed request body")
    } else if rejection.find::<InvalidQuery>().is_some() {
        HttpError::from_slice(StatusCode::BAD_REQUEST, "malformed query string")
    } else if rejection.find::<LengthRequired>().is_some() {
        HttpError::from_slice(StatusCode::LENGTH_REQUIRED, "content length required")
    } else if rejection.find::<PayloadTooLarge>().is_some() {
        HttpError::from_slice(StatusCode::PAYLOAD_TOO_LARGE, "payload too large")
    } else if rejection.find::<CorsForbidden>().is_some() {
        HttpError::from_slice(StatusCode::FORBIDDEN, "origin not allowed")
    } else if rejection.find::<MethodNotAllowed>().is_some() {
        HttpError::from_slice(StatusCode::METHOD_NOT_ALLOWED, "method not allowed")
    } else {
        HttpError::internal_server_error()
    };

    Ok(error.as_reply())
}
