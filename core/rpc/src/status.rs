// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Failure taxonomy shared by the server pipeline and the client transport.
//!
//! Every failure is tagged with exactly one [`ErrorKind`]. The kind decides
//! the wire status returned to callers, the log severity on the server and
//! whether a client may retry.

use std::fmt;

use http::StatusCode;
use tonic::Code;

/// Closed set of failure kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ErrorKind {
    /// The caller sent a malformed or semantically invalid request
    InvalidArgument,
    /// The requested entity does not exist
    NotFound,
    /// The entity the caller tried to create already exists
    AlreadyExists,
    /// The caller is known but not allowed to perform the operation
    PermissionDenied,
    /// The caller could not be authenticated
    Unauthenticated,
    /// A quota or rate limit was hit
    ResourceExhausted,
    /// The system is not in the state required by the operation
    FailedPrecondition,
    /// The operation was aborted, typically on a concurrency conflict
    Aborted,
    /// The operation went past a valid range
    OutOfRange,
    /// The operation is not implemented by this server
    Unimplemented,
    /// Invariant broken inside the server. Untagged failures land here.
    #[default]
    Internal,
    /// The server or one of its dependencies is temporarily unavailable
    Unavailable,
    /// The deadline expired before the operation completed
    DeadlineExceeded,
    /// Unrecoverable data loss or corruption
    DataLoss,
    /// The caller cancelled the operation
    Canceled,
}

impl ErrorKind {
    /// All kinds, in wire code order.
    pub const ALL: [ErrorKind; 15] = [
        ErrorKind::Canceled,
        ErrorKind::InvalidArgument,
        ErrorKind::DeadlineExceeded,
        ErrorKind::NotFound,
        ErrorKind::AlreadyExists,
        ErrorKind::PermissionDenied,
        ErrorKind::ResourceExhausted,
        ErrorKind::FailedPrecondition,
        ErrorKind::Aborted,
        ErrorKind::OutOfRange,
        ErrorKind::Unimplemented,
        ErrorKind::Internal,
        ErrorKind::Unavailable,
        ErrorKind::DataLoss,
        ErrorKind::Unauthenticated,
    ];

    /// Wire status for this kind. Total and stable across versions.
    pub fn to_wire_status(self) -> Code {
        match self {
            ErrorKind::InvalidArgument => Code::InvalidArgument,
            ErrorKind::NotFound => Code::NotFound,
            ErrorKind::AlreadyExists => Code::AlreadyExists,
            ErrorKind::PermissionDenied => Code::PermissionDenied,
            ErrorKind::Unauthenticated => Code::Unauthenticated,
            ErrorKind::ResourceExhausted => Code::ResourceExhausted,
            ErrorKind::FailedPrecondition => Code::FailedPrecondition,
            ErrorKind::Aborted => Code::Aborted,
            ErrorKind::OutOfRange => Code::OutOfRange,
            ErrorKind::Unimplemented => Code::Unimplemented,
            ErrorKind::Internal => Code::Internal,
            ErrorKind::Unavailable => Code::Unavailable,
            ErrorKind::DeadlineExceeded => Code::DeadlineExceeded,
            ErrorKind::DataLoss => Code::DataLoss,
            ErrorKind::Canceled => Code::Cancelled,
        }
    }

    /// Kind for a wire status. Total: `Ok` and `Unknown` carry no failure
    /// kind of their own and collapse to [`ErrorKind::Internal`].
    pub fn from_wire_status(code: Code) -> ErrorKind {
        match code {
            Code::Cancelled => ErrorKind::Canceled,
            Code::InvalidArgument => ErrorKind::InvalidArgument,
            Code::DeadlineExceeded => ErrorKind::DeadlineExceeded,
            Code::NotFound => ErrorKind::NotFound,
            Code::AlreadyExists => ErrorKind::AlreadyExists,
            Code::PermissionDenied => ErrorKind::PermissionDenied,
            Code::ResourceExhausted => ErrorKind::ResourceExhausted,
            Code::FailedPrecondition => ErrorKind::FailedPrecondition,
            Code::Aborted => ErrorKind::Aborted,
            Code::OutOfRange => ErrorKind::OutOfRange,
            Code::Unimplemented => ErrorKind::Unimplemented,
            Code::Unavailable => ErrorKind::Unavailable,
            Code::DataLoss => ErrorKind::DataLoss,
            Code::Unauthenticated => ErrorKind::Unauthenticated,
            Code::Ok | Code::Unknown | Code::Internal => ErrorKind::Internal,
            #[allow(unreachable_patterns)]
            _ => ErrorKind::Internal,
        }
    }

    /// HTTP status used when the peer speaks plain HTTP.
    pub fn to_http_status(self) -> StatusCode {
        match self {
            ErrorKind::InvalidArgument
            | ErrorKind::FailedPrecondition
            | ErrorKind::OutOfRange => StatusCode::BAD_REQUEST,
            ErrorKind::Unauthenticated => StatusCode::UNAUTHORIZED,
            ErrorKind::PermissionDenied => StatusCode::FORBIDDEN,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::AlreadyExists | ErrorKind::Aborted => StatusCode::CONFLICT,
            ErrorKind::ResourceExhausted => StatusCode::TOO_MANY_REQUESTS,
            // 499 "client closed request", no named constant in `http`
            ErrorKind::Canceled => {
                StatusCode::from_u16(499).unwrap_or(StatusCode::REQUEST_TIMEOUT)
            }
            ErrorKind::Internal | ErrorKind::DataLoss => StatusCode::INTERNAL_SERVER_ERROR,
            ErrorKind::Unimplemented => StatusCode::NOT_IMPLEMENTED,
            ErrorKind::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::DeadlineExceeded => StatusCode::GATEWAY_TIMEOUT,
        }
    }

    /// Kind for an HTTP status, `None` when the status is not a failure.
    ///
    /// Collapses: 400 reads back as `InvalidArgument` (also sent for
    /// `FailedPrecondition` and `OutOfRange`), 409 as `AlreadyExists` (also
    /// sent for `Aborted`), 500 as `Internal` (also sent for `DataLoss`).
    pub fn from_http_status(status: StatusCode) -> Option<ErrorKind> {
        if !status.is_client_error() && !status.is_server_error() {
            return None;
        }

        let kind = match status.as_u16() {
            400 => ErrorKind::InvalidArgument,
            401 => ErrorKind::Unauthenticated,
            403 => ErrorKind::PermissionDenied,
            404 => ErrorKind::NotFound,
            408 | 504 => ErrorKind::DeadlineExceeded,
            409 => ErrorKind::AlreadyExists,
            412 => ErrorKind::FailedPrecondition,
            416 => ErrorKind::OutOfRange,
            429 => ErrorKind::ResourceExhausted,
            499 => ErrorKind::Canceled,
            501 => ErrorKind::Unimplemented,
            502 | 503 => ErrorKind::Unavailable,
            _ if status.is_client_error() => ErrorKind::InvalidArgument,
            _ => ErrorKind::Internal,
        };

        Some(kind)
    }

    /// True when the kind means the serving process or its dependencies are
    /// unhealthy, false when it is a legitimate business outcome.
    pub fn is_infrastructure(self) -> bool {
        matches!(
            self,
            ErrorKind::Internal
                | ErrorKind::Unavailable
                | ErrorKind::DeadlineExceeded
                | ErrorKind::DataLoss
        )
    }

    /// Stable snake_case label, used in logs and metrics.
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::InvalidArgument => "invalid_argument",
            ErrorKind::NotFound => "not_found",
            ErrorKind::AlreadyExists => "already_exists",
            ErrorKind::PermissionDenied => "permission_denied",
            ErrorKind::Unauthenticated => "unauthenticated",
            ErrorKind::ResourceExhausted => "resource_exhausted",
            ErrorKind::FailedPrecondition => "failed_precondition",
            ErrorKind::Aborted => "aborted",
            ErrorKind::OutOfRange => "out_of_range",
            ErrorKind::Unimplemented => "unimplemented",
            ErrorKind::Internal => "internal",
            ErrorKind::Unavailable => "unavailable",
            ErrorKind::DeadlineExceeded => "deadline_exceeded",
            ErrorKind::DataLoss => "data_loss",
            ErrorKind::Canceled => "canceled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<Code> for ErrorKind {
    fn from(code: Code) -> Self {
        ErrorKind::from_wire_status(code)
    }
}

impl From<ErrorKind> for Code {
    fn from(kind: ErrorKind) -> Self {
        kind.to_wire_status()
    }
}

/// Label of a wire status as it appears in logs and metrics ("ok",
/// "not_found", ...).
pub fn code_label(code: Code) -> &'static str {
    match code {
        Code::Ok => "ok",
        Code::Unknown => "unknown",
        other => ErrorKind::from_wire_status(other).as_str(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_round_trip() {
        for kind in ErrorKind::ALL {
            assert_eq!(ErrorKind::from_wire_status(kind.to_wire_status()), kind);
        }
    }

    #[test]
    fn test_wire_mapping_is_injective() {
        let mut codes: Vec<i32> = ErrorKind::ALL
            .iter()
            .map(|k| k.to_wire_status() as i32)
            .collect();
        codes.sort();
        codes.dedup();
        assert_eq!(codes.len(), ErrorKind::ALL.len());
    }

    #[test]
    fn test_collapsed_wire_codes() {
        assert_eq!(ErrorKind::from_wire_status(Code::Unknown), ErrorKind::Internal);
        assert_eq!(ErrorKind::from_wire_status(Code::Ok), ErrorKind::Internal);
    }

    #[test]
    fn test_default_is_internal() {
        assert_eq!(ErrorKind::default(), ErrorKind::Internal);
    }

    #[test]
    fn test_http_mapping() {
        assert_eq!(ErrorKind::NotFound.to_http_status(), StatusCode::NOT_FOUND);
        assert_eq!(ErrorKind::Canceled.to_http_status().as_u16(), 499);
        assert_eq!(
            ErrorKind::from_http_status(StatusCode::SERVICE_UNAVAILABLE),
            Some(ErrorKind::Unavailable)
        );
        assert_eq!(
            ErrorKind::from_http_status(StatusCode::METHOD_NOT_ALLOWED),
            Some(ErrorKind::InvalidArgument)
        );
        assert_eq!(
            ErrorKind::from_http_status(StatusCode::HTTP_VERSION_NOT_SUPPORTED),
            Some(ErrorKind::Internal)
        );
        assert_eq!(ErrorKind::from_http_status(StatusCode::OK), None);
        assert_eq!(ErrorKind::from_http_status(StatusCode::FOUND), None);
    }

    #[test]
    fn test_http_round_trip_except_collapsed() {
        let collapsed = [
            ErrorKind::FailedPrecondition,
            ErrorKind::OutOfRange,
            ErrorKind::Aborted,
            ErrorKind::DataLoss,
        ];

        for kind in ErrorKind::ALL {
            if collapsed.contains(&kind) {
                continue;
            }
            assert_eq!(
                ErrorKind::from_http_status(kind.to_http_status()),
                Some(kind),
                "{kind}"
            );
        }
    }

    #[test]
    fn test_infrastructure_kinds() {
        let infra: Vec<_> = ErrorKind::ALL
            .into_iter()
            .filter(|k| k.is_infrastructure())
            .collect();
        assert_eq!(
            infra,
            vec![
                ErrorKind::DeadlineExceeded,
                ErrorKind::Internal,
                ErrorKind::Unavailable,
                ErrorKind::DataLoss,
            ]
        );
    }

    #[test]
    fn test_code_label() {
        assert_eq!(code_label(Code::Ok), "ok");
        assert_eq!(code_label(Code::NotFound), "not_found");
        assert_eq!(code_label(Code::Unknown), "unknown");
    }
}
