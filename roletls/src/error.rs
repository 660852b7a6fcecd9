use std::sync::Arc;

use aws_credential_types::provider::error::CredentialsError;
use thiserror::Error;

/// Errors produced while establishing or using a role-authenticated
/// connection.
#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid ARN: {arn:?}")]
    InvalidArn { arn: String },

    #[error("invalid IAM role ARN {arn:?}: {reason}")]
    InvalidRoleArn { arn: String, reason: String },

    #[error("invalid STS assumed-role ARN {arn:?}: {reason}")]
    InvalidAssumedRoleArn { arn: String, reason: String },

    #[error("unrecognized STS region: {region:?}")]
    InvalidRegion { region: String },

    #[error("failed to retrieve AWS credentials: {source}")]
    Credentials {
        #[from]
        source: CredentialsError,
    },

    #[error("request signing failed: {message}")]
    Signing { message: String },

    #[error("failed to unmask message body")]
    Mask,

    #[error("STS request failed: {source}")]
    Network {
        #[from]
        source: hyper::Error,
    },

    #[error("STS rejected the signed message: {status}")]
    SignatureInvalid { status: hyper::StatusCode },

    #[error("malformed data on a protocol boundary: {message}")]
    Decode { message: String },

    #[error("peer identity {arn:?} is not an allowed source")]
    SourceRejected { arn: String },

    /// Terminal outcome of a failed handshake. The underlying failure is
    /// shared so the connection can replay it to every subsequent caller.
    #[error("handshake rejected: {reason}")]
    HandshakeRejected { reason: Arc<Error> },

    #[error("handshake timed out")]
    HandshakeTimeout,

    #[error("handshake was interrupted before it completed")]
    HandshakeInterrupted,

    #[error("handshake I/O failed: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    #[error("TLS failure: {message}")]
    Tls { message: String },
}

impl Error {
    pub(crate) fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    pub(crate) fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub(crate) fn tls(source: impl std::fmt::Display) -> Self {
        Self::Tls {
            message: source.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(source: serde_json::Error) -> Self {
        Self::Decode {
            message: source.to_string(),
        }
    }
}

impl From<Error> for std::io::Error {
    fn from(source: Error) -> Self {
        match source {
            Error::Io { source } => source,
            other => std::io::Error::new(std::io::ErrorKind::Other, other),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
