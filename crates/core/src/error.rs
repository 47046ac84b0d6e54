//! Error types for the SAP library.

use std::fmt;
use std::time::Duration;

/// Errors that can occur in the SAP library.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Codec**: [`TooShort`](Self::TooShort),
///   [`UnsupportedVersion`](Self::UnsupportedVersion),
///   [`MalformedPayloadType`](Self::MalformedPayloadType),
///   [`UnsupportedAuthVersion`](Self::UnsupportedAuthVersion),
///   [`InvalidPadding`](Self::InvalidPadding),
///   [`BufferTooSmall`](Self::BufferTooSmall),
///   [`AuthDataTooLarge`](Self::AuthDataTooLarge).
/// - **Pipeline**: [`NotSessionDescription`](Self::NotSessionDescription),
///   [`SessionDescriptionParseFailed`](Self::SessionDescriptionParseFailed),
///   [`QueueFull`](Self::QueueFull).
/// - **RTP monitor**: [`ReadTimeout`](Self::ReadTimeout),
///   [`MalformedRtpPacket`](Self::MalformedRtpPacket),
///   [`Socket`](Self::Socket).
///
/// Codec and pipeline errors are per-packet: receive loops report them and
/// move on to the next datagram.
#[derive(Debug, thiserror::Error)]
pub enum SapError {
    /// The buffer ended where more header bytes were required.
    #[error("buffer too short: needed {needed} bytes, {available} available")]
    TooShort { needed: usize, available: usize },

    /// The 3-bit SAP version field is greater than 1.
    #[error("unsupported SAP version {0}")]
    UnsupportedVersion(u8),

    /// The payload type string has no NUL terminator.
    #[error("malformed payload type: missing NUL terminator")]
    MalformedPayloadType,

    /// The authentication sub-header version is not 1.
    #[error("unsupported authentication sub-header version {0}")]
    UnsupportedAuthVersion(u8),

    /// The authentication padding length exceeds the sub-header.
    #[error("invalid auth padding: {padding} bytes of padding in a {available} byte block")]
    InvalidPadding { padding: usize, available: usize },

    /// The destination buffer cannot hold the encoded packet.
    #[error("buffer too small: needed {needed} bytes, {available} available")]
    BufferTooSmall { needed: usize, available: usize },

    /// Authentication data too long to be described by the 8-bit word count.
    #[error("authentication data of {0} bytes does not fit in 255 words")]
    AuthDataTooLarge(usize),

    /// The payload type is not `application/sdp`.
    #[error("packet payload is not a session description: {0}")]
    NotSessionDescription(String),

    /// The session description payload could not be parsed (RFC 4566).
    #[error("session description parse error on line {line}: {kind}")]
    SessionDescriptionParseFailed { line: usize, kind: SdpErrorKind },

    /// The decoded-packet queue was full and the packet was dropped.
    #[error("announcement queue full")]
    QueueFull,

    /// No datagram arrived within the watchdog window.
    #[error("no packet received for {0:?}")]
    ReadTimeout(Duration),

    /// A datagram could not be parsed as RTP (RFC 3550 §5.1).
    #[error("malformed RTP packet: {kind}")]
    MalformedRtpPacket { kind: RtpErrorKind },

    /// Underlying socket error.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),
}

/// Specific kind of session description parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SdpErrorKind {
    /// The description was empty.
    Empty,
    /// The first line was not `v=`.
    MissingVersion,
    /// `v=` carried something other than `0`.
    UnsupportedVersion,
    /// A line was not of the form `<type>=<value>`.
    InvalidLine,
    /// The `o=` line did not have six fields.
    InvalidOrigin,
    /// The `c=` line did not have three fields.
    InvalidConnection,
    /// The `m=` line was malformed.
    InvalidMedia,
    /// No `o=` line was present.
    MissingOrigin,
    /// No `s=` line was present.
    MissingSessionName,
    /// The payload was not valid UTF-8.
    InvalidUtf8,
}

impl fmt::Display for SdpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "empty description"),
            Self::MissingVersion => write!(f, "missing v= line"),
            Self::UnsupportedVersion => write!(f, "unsupported protocol version"),
            Self::InvalidLine => write!(f, "invalid line"),
            Self::InvalidOrigin => write!(f, "invalid o= line"),
            Self::InvalidConnection => write!(f, "invalid c= line"),
            Self::InvalidMedia => write!(f, "invalid m= line"),
            Self::MissingOrigin => write!(f, "missing o= line"),
            Self::MissingSessionName => write!(f, "missing s= line"),
            Self::InvalidUtf8 => write!(f, "payload is not UTF-8"),
        }
    }
}

/// Specific kind of RTP parse failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RtpErrorKind {
    /// Fewer than 12 bytes.
    Truncated,
    /// Version field other than 2.
    BadVersion(u8),
    /// CSRC list, extension or padding run past the end of the datagram.
    BadLength,
}

impl fmt::Display for RtpErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Truncated => write!(f, "shorter than the fixed header"),
            Self::BadVersion(v) => write!(f, "version {v}"),
            Self::BadLength => write!(f, "header fields exceed datagram length"),
        }
    }
}

/// Convenience alias for `Result<T, SapError>`.
pub type Result<T> = std::result::Result<T, SapError>;
