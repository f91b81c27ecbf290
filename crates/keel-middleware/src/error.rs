//! Request-scoped errors.
//!
//! [`RequestError`] is what handlers and interceptors return when a single
//! request fails. It carries the HTTP status to reply with plus an
//! application `code` and `message`, rendered as the JSON body
//! `{"code": …, "message": …}`. gRPC servers translate the status into a
//! [`GrpcCode`] for the `grpc-status` trailer.
//!
//! A `RequestError` never leaves the connection that produced it.

use bytes::Bytes;
use http::{header, HeaderValue, StatusCode};
use serde::Serialize;
use std::fmt;
use thiserror::Error;

use crate::types::Response;

/// A failed request.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[error("{message}")]
pub struct RequestError {
    #[serde(skip)]
    status: StatusCode,
    /// Set when the error was raised with a gRPC code, which is kept as is.
    #[serde(skip)]
    grpc: Option<GrpcCode>,
    code: i64,
    message: String,
}

impl RequestError {
    /// Creates an error with an explicit status and application code.
    #[must_use]
    pub fn new(status: StatusCode, code: i64, message: impl Into<String>) -> Self {
        Self {
            status,
            grpc: None,
            code,
            message: message.into(),
        }
    }

    /// Creates an error whose application code equals the HTTP status.
    #[must_use]
    pub fn from_status(status: StatusCode, message: impl Into<String>) -> Self {
        Self::new(status, i64::from(status.as_u16()), message)
    }

    /// Creates an error from a gRPC status code.
    ///
    /// The HTTP status is derived from `code`, but [`grpc_code`](Self::grpc_code)
    /// returns `code` itself even where several codes share one status.
    #[must_use]
    pub fn from_grpc(code: GrpcCode, message: impl Into<String>) -> Self {
        Self {
            grpc: Some(code),
            ..Self::from_status(code.http_status(), message)
        }
    }

    /// 400 Bad Request.
    #[must_use]
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::from_status(StatusCode::BAD_REQUEST, message)
    }

    /// 401 Unauthorized.
    #[must_use]
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::from_status(StatusCode::UNAUTHORIZED, message)
    }

    /// 403 Forbidden.
    #[must_use]
    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::from_status(StatusCode::FORBIDDEN, message)
    }

    /// 404 Not Found.
    #[must_use]
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::from_status(StatusCode::NOT_FOUND, message)
    }

    /// 405 Method Not Allowed.
    #[must_use]
    pub fn method_not_allowed(message: impl Into<String>) -> Self {
        Self::from_status(StatusCode::METHOD_NOT_ALLOWED, message)
    }

    /// 500 Internal Server Error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::from_status(StatusCode::INTERNAL_SERVER_ERROR, message)
    }

    /// 503 Service Unavailable.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::from_status(StatusCode::SERVICE_UNAVAILABLE, message)
    }

    /// Returns the HTTP status.
    #[must_use]
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the application error code.
    #[must_use]
    pub fn code(&self) -> i64 {
        self.code
    }

    /// Returns the message.
    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Returns the gRPC code this error was raised with, or the one matching
    /// its HTTP status.
    #[must_use]
    pub fn grpc_code(&self) -> GrpcCode {
        self.grpc
            .unwrap_or_else(|| GrpcCode::from_http_status(self.status))
    }

    /// Returns the JSON body `{"code": …, "message": …}`.
    #[must_use]
    pub fn to_json(&self) -> Bytes {
        serde_json::to_vec(self)
            .map(Bytes::from)
            .unwrap_or_else(|_| Bytes::from_static(b"{\"code\":500,\"message\":\"internal error\"}"))
    }

    /// Renders the error as an HTTP response.
    #[must_use]
    pub fn into_response(self) -> Response {
        let mut response = Response::new(self.to_json());
        *response.status_mut() = self.status;
        response.headers_mut().insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        response
    }
}

impl From<serde_json::Error> for RequestError {
    fn from(err: serde_json::Error) -> Self {
        Self::bad_request(err.to_string())
    }
}

/// gRPC status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum GrpcCode {
    /// Success.
    Ok = 0,
    /// The call was cancelled, usually by the caller.
    Cancelled = 1,
    /// Unknown error.
    Unknown = 2,
    /// The client specified an invalid argument.
    InvalidArgument = 3,
    /// The deadline expired before the operation could complete.
    DeadlineExceeded = 4,
    /// Some requested entity was not found.
    NotFound = 5,
    /// The entity a client attempted to create already exists.
    AlreadyExists = 6,
    /// The caller does not have permission.
    PermissionDenied = 7,
    /// Some resource has been exhausted.
    ResourceExhausted = 8,
    /// The system is not in a state required for the operation.
    FailedPrecondition = 9,
    /// The operation was aborted.
    Aborted = 10,
    /// The operation was attempted past the valid range.
    OutOfRange = 11,
    /// The operation is not implemented.
    Unimplemented = 12,
    /// Internal error.
    Internal = 13,
    /// The service is currently unavailable.
    Unavailable = 14,
    /// Unrecoverable data loss or corruption.
    DataLoss = 15,
    /// The request lacks valid authentication credentials.
    Unauthenticated = 16,
}

impl GrpcCode {
    /// Maps an HTTP status to the closest gRPC code.
    #[must_use]
    pub fn from_http_status(status: StatusCode) -> Self {
        match status.as_u16() {
            200..=299 => Self::Ok,
            400 => Self::InvalidArgument,
            401 => Self::Unauthenticated,
            403 => Self::PermissionDenied,
            404 => Self::NotFound,
            409 => Self::AlreadyExists,
            429 => Self::ResourceExhausted,
            499 => Self::Cancelled,
            501 => Self::Unimplemented,
            503 => Self::Unavailable,
            504 => Self::DeadlineExceeded,
            402..=498 => Self::FailedPrecondition,
            _ => Self::Internal,
        }
    }

    /// Maps a gRPC code to the HTTP status a JSON gateway would use.
    #[must_use]
    pub fn http_status(self) -> StatusCode {
        match self {
            Self::Ok => StatusCode::OK,
            Self::Cancelled => StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
            Self::InvalidArgument | Self::OutOfRange => StatusCode::BAD_REQUEST,
            Self::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
            Self::NotFound => StatusCode::NOT_FOUND,
            Self::AlreadyExists | Self::Aborted => StatusCode::CONFLICT,
            Self::PermissionDenied => StatusCode::FORBIDDEN,
            Self::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            Self::FailedPrecondition => StatusCode::PRECONDITION_FAILED,
            Self::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            Self::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::Unauthenticated => StatusCode::UNAUTHORIZED,
            Self::Unknown | Self::Internal | Self::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for GrpcCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_u8())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_body() {
        let err = RequestError::new(StatusCode::CONFLICT, 10042, "order already paid");
        let body: serde_json::Value = serde_json::from_slice(&err.to_json()).unwrap();
        assert_eq!(body["code"], 10042);
        assert_eq!(body["message"], "order already paid");
        assert!(body.get("status").is_none());
    }

    #[test]
    fn test_into_response() {
        let response = RequestError::not_found("no such user").into_response();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            HeaderValue::from_static("application/json")
        );

        let body: serde_json::Value = serde_json::from_slice(response.body()).unwrap();
        assert_eq!(body["code"], 404);
    }

    #[test]
    fn test_json_errors_are_bad_requests() {
        let parse_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = RequestError::from(parse_err);
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.code(), 400);
    }

    #[test]
    fn test_grpc_mapping() {
        assert_eq!(RequestError::bad_request("x").grpc_code(), GrpcCode::InvalidArgument);
        assert_eq!(RequestError::unauthorized("x").grpc_code(), GrpcCode::Unauthenticated);
        assert_eq!(RequestError::forbidden("x").grpc_code(), GrpcCode::PermissionDenied);
        assert_eq!(RequestError::not_found("x").grpc_code(), GrpcCode::NotFound);
        assert_eq!(RequestError::unavailable("x").grpc_code(), GrpcCode::Unavailable);
        assert_eq!(RequestError::internal("x").grpc_code(), GrpcCode::Internal);
        assert_eq!(
            RequestError::from_status(StatusCode::IM_A_TEAPOT, "x").grpc_code(),
            GrpcCode::FailedPrecondition
        );
    }

    #[test]
    fn test_grpc_code_survives_shared_http_status() {
        let all = [
            GrpcCode::Ok,
            GrpcCode::Cancelled,
            GrpcCode::Unknown,
            GrpcCode::InvalidArgument,
            GrpcCode::DeadlineExceeded,
            GrpcCode::NotFound,
            GrpcCode::AlreadyExists,
            GrpcCode::PermissionDenied,
            GrpcCode::ResourceExhausted,
            GrpcCode::FailedPrecondition,
            GrpcCode::Aborted,
            GrpcCode::OutOfRange,
            GrpcCode::Unimplemented,
            GrpcCode::Internal,
            GrpcCode::Unavailable,
            GrpcCode::DataLoss,
            GrpcCode::Unauthenticated,
        ];
        for (wire, code) in all.into_iter().enumerate() {
            assert_eq!(usize::from(code.as_u8()), wire);
            let err = RequestError::from_grpc(code, "x");
            assert_eq!(err.grpc_code(), code);
            assert_eq!(err.status(), code.http_status());
        }

        // Aborted and AlreadyExists both answer 409 over HTTP.
        let aborted = RequestError::from_grpc(GrpcCode::Aborted, "retry");
        assert_eq!(aborted.status(), StatusCode::CONFLICT);
        assert_eq!(aborted.grpc_code(), GrpcCode::Aborted);
        assert_eq!(aborted.to_json(), RequestError::from_status(StatusCode::CONFLICT, "retry").to_json());
    }

    #[test]
    fn test_grpc_code_display() {
        assert_eq!(GrpcCode::Unauthenticated.to_string(), "16");
        assert_eq!(GrpcCode::Ok.to_string(), "0");
    }
}
