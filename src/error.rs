//! Error types for the Lichat client core.
//!
//! Every variant maps to a stable cause code via [`ClientError::code`] so a
//! host can tell the user exactly what went wrong.

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

use crate::update::{Kind, Update};

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors surfaced by the client core.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The transport could not be established. Nothing was sent.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// The transport went away mid-session, or a send was attempted
    /// without one.
    #[error("connection lost: {reason}")]
    ConnectionLost { reason: String },

    /// The server rejected the handshake.
    #[error("connection failed: {reason}")]
    ConnectionFailed {
        reason: Rejection,
        update: Option<Box<Update>>,
    },

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// An outbound update is missing a field its kind requires.
    #[error(transparent)]
    InvalidUpdate(#[from] UpdateError),

    /// An explicit id collides with a callback that is still pending.
    #[error("id {0} is already awaiting a reply")]
    DuplicateId(u64),

    #[error("already connected")]
    AlreadyConnected,

    /// Receiving with no connection, including after a loss was reported.
    #[error("not connected")]
    NotConnected,
}

impl ClientError {
    pub(crate) fn lost(reason: impl Into<String>) -> Self {
        Self::ConnectionLost {
            reason: reason.into(),
        }
    }

    /// A stable, specific cause code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Connection(e) => e.code(),
            Self::ConnectionLost { .. } => "connection-lost",
            Self::ConnectionFailed { reason, .. } => reason.code(),
            Self::Protocol(e) => e.code(),
            Self::InvalidUpdate(_) => "invalid-update",
            Self::DuplicateId(_) => "duplicate-id",
            Self::AlreadyConnected => "already-connected",
            Self::NotConnected => "not-connected",
        }
    }
}

/// Transport-level failures while opening a connection.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("could not resolve {host}: {source}")]
    Resolve { host: String, source: io::Error },

    #[error("{host} resolved to no addresses")]
    NoAddress { host: String },

    #[error("could not connect to {addr}: {source}")]
    Connect { addr: SocketAddr, source: io::Error },

    #[error("{host} is not a valid TLS server name")]
    InvalidServerName { host: String },

    #[error("TLS setup failed: {0}")]
    TlsConfig(#[from] rustls::Error),

    #[error("TLS handshake with {host} failed: {source}")]
    Tls { host: String, source: io::Error },
}

impl ConnectionError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Resolve { .. } | Self::NoAddress { .. } => "resolve-failed",
            Self::Connect { source, .. } if source.kind() == io::ErrorKind::ConnectionRefused => {
                "connection-refused"
            }
            Self::Connect { .. } => "connect-failed",
            Self::InvalidServerName { .. } => "invalid-server-name",
            Self::TlsConfig(_) | Self::Tls { .. } => "tls-failed",
        }
    }
}

/// Why the server (or the clock) refused the handshake.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Rejection {
    #[error("invalid password")]
    InvalidPassword,
    #[error("no such profile")]
    NoSuchProfile,
    #[error("too many connections")]
    TooManyConnections,
    #[error("no handshake response in time")]
    Timeout,
    #[error("{kind}: {}", .text.as_deref().unwrap_or("no reason given"))]
    Failure { kind: Kind, text: Option<String> },
    #[error("unexpected {0} during handshake")]
    Unexpected(Kind),
}

impl Rejection {
    /// Classify the server's response to a `connect` update.
    pub fn from_update(update: &Update) -> Self {
        match update.kind() {
            Kind::InvalidPassword => Self::InvalidPassword,
            Kind::NoSuchProfile => Self::NoSuchProfile,
            Kind::TooManyConnections => Self::TooManyConnections,
            kind if kind.is_failure() => Self::Failure {
                kind,
                text: update.text().map(str::to_string),
            },
            kind => Self::Unexpected(kind),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidPassword => "invalid-password",
            Self::NoSuchProfile => "no-such-profile",
            Self::TooManyConnections => "too-many-connections",
            Self::Timeout => "handshake-timeout",
            Self::Failure { kind, .. } => kind.name(),
            Self::Unexpected(_) => "unexpected-handshake-reply",
        }
    }
}

/// Malformed or unknown data on the wire.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProtocolError {
    #[error("unknown update kind {0}")]
    UnknownKind(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("frame exceeds {limit} bytes without a delimiter")]
    FrameTooLarge { limit: usize },
}

impl ProtocolError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownKind(_) => "unknown-kind",
            Self::MalformedFrame(_) => "malformed-frame",
            Self::FrameTooLarge { .. } => "frame-too-large",
        }
    }
}

/// Structural problems with an update about to be sent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UpdateError {
    #[error("{kind} update is missing required field {field}")]
    MissingField { kind: Kind, field: &'static str },
}

/// Emote cache failures.
#[derive(Debug, Error)]
pub enum EmoteError {
    #[error("no emote named {0}")]
    NotFound(String),

    #[error("{0:?} is not usable as an emote name")]
    InvalidName(String),

    #[error("emote update carries no usable payload")]
    MissingPayload,

    #[error("unsupported emote content type {0}")]
    UnsupportedType(String),

    #[error("emote payload is not valid base64: {0}")]
    Payload(#[from] base64::DecodeError),

    #[error(transparent)]
    Io(#[from] io::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejection_codes_are_specific() {
        let update = Update::new(Kind::InvalidPassword);
        assert_eq!(Rejection::from_update(&update), Rejection::InvalidPassword);

        let update = Update::new(Kind::UsernameTaken).with("text", "taken");
        let rejection = Rejection::from_update(&update);
        assert_eq!(rejection.code(), "username-taken");
        assert_eq!(rejection.to_string(), "username-taken: taken");

        assert_eq!(
            Rejection::from_update(&Update::new(Kind::Message)),
            Rejection::Unexpected(Kind::Message)
        );
    }

    #[test]
    fn client_error_codes() {
        let err = ClientError::ConnectionFailed {
            reason: Rejection::NoSuchProfile,
            update: None,
        };
        assert_eq!(err.code(), "no-such-profile");
        assert_eq!(ClientError::lost("eof").code(), "connection-lost");
        assert_eq!(
            ClientError::from(ProtocolError::UnknownKind("zap".into())).code(),
            "unknown-kind"
        );
    }
}
