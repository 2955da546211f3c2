//! Error types for the SMB session engine

use crate::protocol::smb2_constants::Smb2Command;
use std::fmt;
use std::io;
use thiserror::Error;

/// Result type for SMB operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for SMB session operations
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error occurred
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Fewer bytes remain in a buffer than a read requires
    #[error("Buffer underrun: need {need} bytes, have {have}")]
    BufferUnderrun { need: usize, have: usize },

    /// Malformed or truncated packet
    #[error("Decode failure: {0}")]
    DecodeFailure(String),

    /// Signature verification failed on a received frame
    #[error("Integrity failure: {0}")]
    IntegrityFailure(String),

    /// The transport failed or was disconnected
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// A structural lock could not be acquired in time
    #[error("Timed out waiting for connection lock")]
    TransportTimeout,

    /// The caller's wait for a response expired
    #[error("Operation timed out")]
    Timeout,

    /// The server rejected a request with a non-success status
    #[error("{command:?} failed with status {status}")]
    ProtocolStatus { status: NtStatus, command: Smb2Command },

    /// Negotiation did not produce a usable dialect
    #[error("Negotiation failed: {0}")]
    NegotiationFailed(String),

    /// Authentication failed
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// A message ID is already registered
    #[error("Message ID {0} is already outstanding")]
    DuplicateMessageId(u64),

    /// Signing error
    #[error("Message signing error: {0}")]
    SigningError(String),

    /// Configuration rejected at build time
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Operation not valid in the current state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Why an outstanding exchange was failed without a response.
///
/// Cloned once per outstanding exchange when a connection is torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeFailure {
    /// Transport I/O error or end of stream
    Transport(String),
    /// A received frame failed signature verification
    Integrity(String),
    /// A received frame could not be decoded
    Decode(String),
    /// The negotiate response was rejected
    Negotiation(String),
    /// The connection was closed locally
    Disconnected,
}

impl fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExchangeFailure::Transport(msg) => write!(f, "transport: {}", msg),
            ExchangeFailure::Integrity(msg) => write!(f, "integrity: {}", msg),
            ExchangeFailure::Decode(msg) => write!(f, "decode: {}", msg),
            ExchangeFailure::Negotiation(msg) => write!(f, "negotiation: {}", msg),
            ExchangeFailure::Disconnected => write!(f, "connection closed"),
        }
    }
}

impl From<ExchangeFailure> for Error {
    fn from(failure: ExchangeFailure) -> Self {
        match failure {
            ExchangeFailure::Transport(msg) => Error::TransportFailure(msg),
            ExchangeFailure::Integrity(msg) => Error::IntegrityFailure(msg),
            ExchangeFailure::Decode(msg) => Error::DecodeFailure(msg),
            ExchangeFailure::Negotiation(msg) => Error::NegotiationFailed(msg),
            ExchangeFailure::Disconnected => {
                Error::TransportFailure("connection closed".to_string())
            }
        }
    }
}

/// SMB protocol status codes (subset of NTSTATUS)
///
/// Values the engine does not name are kept as [`NtStatus::Unknown`] so that
/// undocumented server codes still round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NtStatus {
    /// The operation completed successfully
    Success,
    /// The operation will complete asynchronously
    Pending,
    /// Change notification enumerates the directory
    NotifyEnumDir,
    /// No more files
    NoMoreFiles,
    /// More processing required
    MoreProcessingRequired,
    /// The request is not supported
    NotSupported,
    /// Access denied
    AccessDenied,
    /// The object name is not found
    ObjectNameNotFound,
    /// The specified handle is invalid
    InvalidHandle,
    /// The parameter is incorrect
    InvalidParameter,
    /// Cannot create a file that already exists
    ObjectNameCollision,
    /// The buffer is too small
    BufferTooSmall,
    /// The user name or password is incorrect
    LogonFailure,
    /// Account is disabled
    AccountDisabled,
    /// The request was cancelled
    Cancelled,
    /// The specified network name is no longer available
    NetworkNameDeleted,
    /// Bad network path
    BadNetworkPath,
    /// Bad network name
    BadNetworkName,
    /// The request timed out
    IoTimeout,
    /// Insufficient resources
    InsufficientResources,
    /// The session referenced is no longer valid
    UserSessionDeleted,
    /// The session has expired
    NetworkSessionExpired,
    /// Request was not accepted, too many outstanding
    RequestNotAccepted,
    /// A status the engine does not name
    Unknown(u32),
}

impl NtStatus {
    const NAMED: [(NtStatus, u32); 23] = [
        (NtStatus::Success, 0x0000_0000),
        (NtStatus::Pending, 0x0000_0103),
        (NtStatus::NotifyEnumDir, 0x0000_010C),
        (NtStatus::NoMoreFiles, 0x8000_0006),
        (NtStatus::MoreProcessingRequired, 0xC000_0016),
        (NtStatus::NotSupported, 0xC000_00BB),
        (NtStatus::AccessDenied, 0xC000_0022),
        (NtStatus::ObjectNameNotFound, 0xC000_0034),
        (NtStatus::InvalidHandle, 0xC000_0008),
        (NtStatus::InvalidParameter, 0xC000_000D),
        (NtStatus::ObjectNameCollision, 0xC000_0035),
        (NtStatus::BufferTooSmall, 0xC000_0023),
        (NtStatus::LogonFailure, 0xC000_006D),
        (NtStatus::AccountDisabled, 0xC000_0072),
        (NtStatus::Cancelled, 0xC000_0120),
        (NtStatus::NetworkNameDeleted, 0xC000_00C9),
        (NtStatus::BadNetworkPath, 0xC000_00BE),
        (NtStatus::BadNetworkName, 0xC000_00CC),
        (NtStatus::IoTimeout, 0xC000_00B5),
        (NtStatus::InsufficientResources, 0xC000_009A),
        (NtStatus::UserSessionDeleted, 0xC000_0203),
        (NtStatus::NetworkSessionExpired, 0xC000_035C),
        (NtStatus::RequestNotAccepted, 0xC000_00D0),
    ];

    /// Create from a raw u32 value
    pub fn from_u32(value: u32) -> Self {
        Self::NAMED
            .iter()
            .find(|(_, raw)| *raw == value)
            .map(|(status, _)| *status)
            .unwrap_or(NtStatus::Unknown(value))
    }

    /// Raw wire value
    pub fn to_u32(self) -> u32 {
        match self {
            NtStatus::Unknown(raw) => raw,
            named => Self::NAMED
                .iter()
                .find(|(status, _)| *status == named)
                .map(|(_, raw)| *raw)
                .unwrap_or_default(),
        }
    }

    /// Check if this is a success status
    pub fn is_success(self) -> bool {
        self == NtStatus::Success
    }

    /// Check if this is an error status
    pub fn is_error(self) -> bool {
        self.to_u32() & 0xC000_0000 == 0xC000_0000
    }

    /// Check if this is a warning status
    pub fn is_warning(self) -> bool {
        self.to_u32() & 0x8000_0000 == 0x8000_0000 && !self.is_error()
    }
}

impl From<u32> for NtStatus {
    fn from(value: u32) -> Self {
        NtStatus::from_u32(value)
    }
}

impl fmt::Display for NtStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            NtStatus::Success => "Success",
            NtStatus::Pending => "Pending",
            NtStatus::NotifyEnumDir => "Notify enum dir",
            NtStatus::NoMoreFiles => "No more files",
            NtStatus::MoreProcessingRequired => "More processing required",
            NtStatus::NotSupported => "Not supported",
            NtStatus::AccessDenied => "Access denied",
            NtStatus::ObjectNameNotFound => "Object name not found",
            NtStatus::InvalidHandle => "Invalid handle",
            NtStatus::InvalidParameter => "Invalid parameter",
            NtStatus::ObjectNameCollision => "Object name collision",
            NtStatus::BufferTooSmall => "Buffer too small",
            NtStatus::LogonFailure => "Logon failure",
            NtStatus::AccountDisabled => "Account disabled",
            NtStatus::Cancelled => "Cancelled",
            NtStatus::NetworkNameDeleted => "Network name deleted",
            NtStatus::BadNetworkPath => "Bad network path",
            NtStatus::BadNetworkName => "Bad network name",
            NtStatus::IoTimeout => "I/O timeout",
            NtStatus::InsufficientResources => "Insufficient resources",
            NtStatus::UserSessionDeleted => "User session deleted",
            NtStatus::NetworkSessionExpired => "Network session expired",
            NtStatus::RequestNotAccepted => "Request not accepted",
            NtStatus::Unknown(_) => "Unknown status",
        };
        write!(f, "{} (0x{:08X})", msg, self.to_u32())
    }
}
