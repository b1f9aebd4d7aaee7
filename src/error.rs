use thiserror::Error;

use crate::message::{Alert, AlertDescription};

/// Errors surfaced by the protocol engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("Parse needs more data")]
    ParseIncomplete,

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Unexpected message: {0}")]
    UnexpectedMessage(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("Crypto error: {0}")]
    CryptoError(String),

    #[error("Record authentication failed: {0}")]
    BadRecordMac(String),

    #[error("Certificate error: {0}")]
    CertificateError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("Receive queue full")]
    ReceiveQueueFull,

    #[error("Transmit queue full")]
    TransmitQueueFull,

    #[error("Too many records in packet")]
    TooManyRecords,

    #[error("Renegotiation is not allowed")]
    RenegotiationAttempt,

    #[error("Peer alert: {0}")]
    PeerAlert(Alert),

    #[error("Connection is closed")]
    Closed,
}

impl Error {
    /// The alert to send to the peer before tearing down, if any.
    pub(crate) fn to_alert(&self) -> Option<Alert> {
        let description = match self {
            Error::ParseIncomplete | Error::ParseError(_) => AlertDescription::DecodeError,
            Error::UnexpectedMessage(_) => AlertDescription::UnexpectedMessage,
            Error::SecurityError(_) => AlertDescription::HandshakeFailure,
            Error::CryptoError(_) => AlertDescription::DecryptError,
            Error::BadRecordMac(_) => AlertDescription::BadRecordMac,
            Error::CertificateError(_) => AlertDescription::BadCertificate,
            Error::RenegotiationAttempt => AlertDescription::NoRenegotiation,
            _ => return None,
        };
        Some(Alert::fatal(description))
    }
}

impl<E: std::fmt::Debug> From<nom::Err<E>> for Error {
    fn from(value: nom::Err<E>) -> Self {
        match value {
            nom::Err::Incomplete(_) => Error::ParseIncomplete,
            nom::Err::Error(e) | nom::Err::Failure(e) => Error::ParseError(format!("{:?}", e)),
        }
    }
}
