// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use std::error::Error as StdError;
use std::io;

use thiserror::Error;
use tower::BoxError;

use crate::status::ErrorKind;

/// A failure tagged with its [`ErrorKind`].
///
/// Business handlers return this type; the error mapping stage turns it
/// into a wire status. The message may reach the caller, the source chain
/// never does.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct RpcError {
    kind: ErrorKind,
    message: String,
    #[source]
    source: Option<BoxError>,
}

impl RpcError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        RpcError {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the underlying cause.
    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Tag an arbitrary error. An `RpcError` anywhere at the top of the
    /// value is kept as is, anything else is classified with [`kind_of`].
    pub fn from_error(err: impl Into<BoxError>) -> Self {
        let err: BoxError = err.into();
        match err.downcast::<RpcError>() {
            Ok(rpc) => *rpc,
            Err(err) => match err.downcast::<tonic::Status>() {
                Ok(status) => RpcError::from(*status),
                Err(err) => {
                    let kind = kind_of(err.as_ref());
                    RpcError::new(kind, err.to_string()).with_source(err)
                }
            },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn is_infrastructure(&self) -> bool {
        self.kind.is_infrastructure()
    }

    /// Wire representation: normalized code plus the diagnostic message.
    pub fn to_status(&self) -> tonic::Status {
        tonic::Status::new(self.kind.to_wire_status(), self.message.clone())
    }

    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::InvalidArgument, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn already_exists(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::AlreadyExists, message)
    }

    pub fn permission_denied(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PermissionDenied, message)
    }

    pub fn unauthenticated(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unauthenticated, message)
    }

    pub fn resource_exhausted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ResourceExhausted, message)
    }

    pub fn failed_precondition(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedPrecondition, message)
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Aborted, message)
    }

    pub fn out_of_range(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::OutOfRange, message)
    }

    pub fn unimplemented(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unimplemented, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Unavailable, message)
    }

    pub fn deadline_exceeded(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeadlineExceeded, message)
    }

    pub fn data_loss(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DataLoss, message)
    }

    pub fn canceled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Canceled, message)
    }
}

impl From<tonic::Status> for RpcError {
    fn from(status: tonic::Status) -> Self {
        RpcError::new(status.code().into(), status.message())
    }
}

impl From<RpcError> for tonic::Status {
    fn from(err: RpcError) -> Self {
        err.to_status()
    }
}

impl From<io::Error> for RpcError {
    fn from(err: io::Error) -> Self {
        RpcError::new(kind_of(&err), err.to_string()).with_source(err)
    }
}

impl From<tokio::time::error::Elapsed> for RpcError {
    fn from(err: tokio::time::error::Elapsed) -> Self {
        RpcError::deadline_exceeded(err.to_string())
    }
}

/// Kind of an arbitrary error.
///
/// The source chain is walked from the outermost error inwards and the
/// first recognised type decides. Untagged errors are `Internal`.
pub fn kind_of(err: &(dyn StdError + 'static)) -> ErrorKind {
    let mut current = Some(err);
    while let Some(err) = current {
        if let Some(rpc) = err.downcast_ref::<RpcError>() {
            return rpc.kind();
        }
        if let Some(status) = err.downcast_ref::<tonic::Status>() {
            return status.code().into();
        }
        if let Some(io) = err.downcast_ref::<io::Error>() {
            // io::Error::source skips a custom payload, look at it directly
            match (io_kind(io), io.get_ref()) {
                (ErrorKind::Internal, Some(inner)) => {
                    current = Some(inner as &(dyn StdError + 'static));
                    continue;
                }
                (kind, _) => return kind,
            }
        }
        if err.is::<tokio::time::error::Elapsed>() {
            return ErrorKind::DeadlineExceeded;
        }
        current = err.source();
    }

    ErrorKind::Internal
}

/// True when `err` means the process or a dependency is unhealthy rather
/// than a valid business outcome. Drives log severity and retries.
pub fn is_infrastructure_failure(err: &(dyn StdError + 'static)) -> bool {
    kind_of(err).is_infrastructure()
}

fn io_kind(err: &io::Error) -> ErrorKind {
    match err.kind() {
        io::ErrorKind::TimedOut => ErrorKind::DeadlineExceeded,
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => ErrorKind::Unavailable,
        _ => ErrorKind::Internal,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Error, Debug)]
    #[error("repository failure")]
    struct RepoError(#[source] RpcError);

    #[derive(Error, Debug)]
    #[error("something odd")]
    struct Untagged;

    #[test]
    fn test_kind_of_tagged() {
        let err = RpcError::not_found("order 42");
        assert_eq!(kind_of(&err), ErrorKind::NotFound);
        assert!(!is_infrastructure_failure(&err));
    }

    #[test]
    fn test_kind_of_walks_sources() {
        let err = RepoError(RpcError::already_exists("dup"));
        assert_eq!(kind_of(&err), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_kind_of_looks_inside_io_payload() {
        let err = io::Error::other(RpcError::not_found("order 7"));
        assert_eq!(kind_of(&err), ErrorKind::NotFound);
        assert!(!is_infrastructure_failure(&err));
        assert_eq!(RpcError::from(err).kind(), ErrorKind::NotFound);

        let boxed = RpcError::from_error(io::Error::other(RpcError::already_exists("dup")));
        assert_eq!(boxed.kind(), ErrorKind::AlreadyExists);

        // a mapped io kind wins over the payload
        let err = io::Error::new(io::ErrorKind::ConnectionReset, Untagged);
        assert_eq!(kind_of(&err), ErrorKind::Unavailable);

        assert_eq!(kind_of(&io::Error::other(Untagged)), ErrorKind::Internal);
    }

    #[test]
    fn test_untagged_is_internal() {
        assert_eq!(kind_of(&Untagged), ErrorKind::Internal);
        assert!(is_infrastructure_failure(&Untagged));

        let rpc = RpcError::from_error(Untagged);
        assert_eq!(rpc.kind(), ErrorKind::Internal);
        assert_eq!(rpc.to_status().code(), tonic::Code::Internal);
    }

    #[test]
    fn test_io_errors() {
        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset by peer");
        assert_eq!(kind_of(&reset), ErrorKind::Unavailable);
        assert!(is_infrastructure_failure(&reset));

        let timeout = io::Error::new(io::ErrorKind::TimedOut, "slow");
        assert_eq!(RpcError::from(timeout).kind(), ErrorKind::DeadlineExceeded);
    }

    #[test]
    fn test_from_error_keeps_rpc_error() {
        let rpc = RpcError::from_error(RpcError::permission_denied("nope"));
        assert_eq!(rpc.kind(), ErrorKind::PermissionDenied);
        assert_eq!(rpc.message(), "nope");

        let rpc = RpcError::from_error(tonic::Status::unavailable("down"));
        assert_eq!(rpc.kind(), ErrorKind::Unavailable);
    }

    #[test]
    fn test_status_conversion() {
        let status: tonic::Status = RpcError::out_of_range("page 9").into();
        assert_eq!(status.code(), tonic::Code::OutOfRange);
        assert_eq!(status.message(), "page 9");
    }
}
