//! Error types for the splitcast library.
//!
//! Variants map to specific failure modes across the stack:
//!
//! - **Malformed messages**: [`Parse`](Self::Parse) — RTSP/SDP/RTP/bridge
//!   grammar or field violations. Always recoverable: the peer gets a 500
//!   (or `ERR`) and the connection keeps being served.
//! - **Resource exhaustion**: [`PoolFull`](Self::PoolFull),
//!   [`BindExhausted`](Self::BindExhausted). Recoverable, reported as `ERR`.
//! - **Not found**: [`SessionNotFound`](Self::SessionNotFound),
//!   [`StreamNotFound`](Self::StreamNotFound),
//!   [`WorkerNotFound`](Self::WorkerNotFound).
//! - **Peer failure**: [`Bridge`](Self::Bridge) — the control/data-plane
//!   round trip failed to connect, timed out, or returned `ERR`.
//! - **Transport**: [`Io`](Self::Io) — socket failures; these terminate the
//!   affected connection or worker only.

use std::fmt;

/// Errors that can occur in the splitcast library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to parse an RTSP/SDP/RTP message or a bridge frame.
    #[error("parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// The request named a session id that is not in the session directory.
    #[error("session not found: {0}")]
    SessionNotFound(u64),

    /// No source/media matching the request URI exists in the session.
    #[error("stream not found: {0}")]
    StreamNotFound(String),

    /// No streaming worker is bound to the given ssrc.
    #[error("no worker for ssrc {0:#010x}")]
    WorkerNotFound(u32),

    /// CSeq did not increase with respect to the previous request on the
    /// same connection.
    #[error("CSeq {got} not greater than last seen {last}")]
    CseqOutOfOrder { got: u32, last: u32 },

    /// The worker pool is at its configured maximum.
    #[error("worker pool full")]
    PoolFull,

    /// Could not bind a consecutive UDP port pair within the attempt limit.
    #[error("exhausted UDP port bind attempts")]
    BindExhausted,

    /// The control/data-plane round trip failed or the peer replied ERR.
    #[error("bridge failure: {0}")]
    Bridge(String),

    /// `start` was called on a server that is already running.
    #[error("server already running")]
    AlreadyRunning,
}

/// Specific kind of message parse failure.
#[derive(Debug, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// Input was empty or had no request/status line.
    EmptyMessage,
    /// Request line did not have the `METHOD URI RTSP/1.0` shape.
    InvalidRequestLine,
    /// Method token is not one of the six recognized methods.
    UnknownMethod,
    /// URI does not start with `rtsp://`.
    InvalidUri,
    /// A header line had no `:` separator or an empty name/value.
    InvalidHeader,
    /// `Accept` was present but did not offer `application/sdp`.
    UnacceptableAccept,
    /// `Transport` was missing `RTP/AVP`, a cast mode, or a usable port.
    InvalidTransport,
    /// Mandatory `CSeq` header missing or unparseable.
    MissingCseq,
    /// `Session` header required by the method but absent.
    MissingSession,
    /// `Transport`/`client_port` required by SETUP but absent.
    MissingTransport,
    /// Input ended before the terminating blank line.
    MissingTerminator,
    /// Status line was not `RTSP/1.0 <code> ...` with a 2xx code.
    InvalidStatusLine,
    /// `Content-Length` without body bytes, or body bytes without it.
    BodyLengthMismatch,
    /// A response carried both a body and a `Transport` header.
    BodyWithTransport,
    /// SDP text lacked `m=`/`a=control:` lines or had them out of order.
    InvalidSdp,
    /// RTP packet shorter than the 12-byte fixed header.
    RtpTruncated,
    /// RTP marker bytes did not match `0x80 0x00`.
    RtpBadMarker,
    /// RTP payload would exceed the caller's maximum packet size.
    RtpOverflow,
    /// Bridge frame was truncated or had an unknown discriminant.
    InvalidFrame,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::UnknownMethod => write!(f, "unknown method"),
            Self::InvalidUri => write!(f, "invalid rtsp uri"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::UnacceptableAccept => write!(f, "Accept does not allow application/sdp"),
            Self::InvalidTransport => write!(f, "invalid Transport header"),
            Self::MissingCseq => write!(f, "missing CSeq"),
            Self::MissingSession => write!(f, "missing Session"),
            Self::MissingTransport => write!(f, "missing Transport/client_port"),
            Self::MissingTerminator => write!(f, "missing final empty line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::BodyLengthMismatch => write!(f, "Content-Length/body mismatch"),
            Self::BodyWithTransport => write!(f, "body and Transport are exclusive"),
            Self::InvalidSdp => write!(f, "invalid sdp"),
            Self::RtpTruncated => write!(f, "rtp packet truncated"),
            Self::RtpBadMarker => write!(f, "rtp marker mismatch"),
            Self::RtpOverflow => write!(f, "rtp payload too large"),
            Self::InvalidFrame => write!(f, "invalid bridge frame"),
        }
    }
}

impl From<ParseErrorKind> for Error {
    fn from(kind: ParseErrorKind) -> Self {
        Error::Parse { kind }
    }
}

/// Convenience alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;
