//! Error types for the RTSP session endpoint library.

use std::fmt;

/// Errors that can occur anywhere in the session endpoint.
///
/// Variants map to specific failure modes across the stack:
///
/// - **Protocol**: [`Parse`](Self::Parse), [`Desync`](Self::Desync) — malformed RTSP/interleaved framing.
/// - **Transport**: [`Io`](Self::Io) — socket/network failures.
/// - **Session**: [`SessionNotFound`](Self::SessionNotFound),
///   [`SessionNotPlaying`](Self::SessionNotPlaying),
///   [`TransportNotConfigured`](Self::TransportNotConfigured),
///   [`UnsupportedTransport`](Self::UnsupportedTransport).
/// - **Auth**: [`AuthChallenge`](Self::AuthChallenge), [`AuthRequired`](Self::AuthRequired).
/// - **Server**: [`NotStarted`](Self::NotStarted), [`AlreadyRunning`](Self::AlreadyRunning).
/// - **Mount**: [`MountNotFound`](Self::MountNotFound).
/// - **Client**: [`CallTimeout`](Self::CallTimeout), [`ConsumerGone`](Self::ConsumerGone).
/// - **Timing**: [`TooManyAudioShift`](Self::TooManyAudioShift).
#[derive(Debug, thiserror::Error)]
pub enum RtspError {
    /// Underlying I/O or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// No session with the given ID exists in the [`SessionManager`](crate::session::SessionManager).
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// SETUP has not been completed for this session (no transport negotiated).
    #[error("transport not configured for session: {0}")]
    TransportNotConfigured(String),

    /// Attempted to send media to a session that is not in the Playing state.
    #[error("session not in playing state: {0}")]
    SessionNotPlaying(String),

    /// [`Server::start`](crate::Server::start) has not been called yet.
    #[error("server not started")]
    NotStarted,

    /// [`Server::start`](crate::Server::start) was called while already running.
    #[error("server already running")]
    AlreadyRunning,

    /// Failed to parse an RTSP request or response message (RFC 2326 §6, §7).
    #[error("RTSP parse error: {kind}")]
    Parse { kind: ParseErrorKind },

    /// Control parser hit a framing error it cannot recover from; the
    /// session must terminate (RFC 2326 §4, interleaved framing §10.12).
    #[error("control channel desynchronized: {0}")]
    Desync(String),

    /// Server-side UDP port allocation exhausted the configured range.
    #[error("UDP port pool exhausted")]
    NoPorts,

    /// No mount registered at the requested path.
    #[error("mount not found: {0}")]
    MountNotFound(String),

    /// `SETUP` requested a `Transport` this endpoint cannot honor.
    #[error("unsupported transport: {0}")]
    UnsupportedTransport(String),

    /// A 401 challenge could not be parsed or satisfied.
    #[error("authentication challenge error: {0}")]
    AuthChallenge(String),

    /// Upstream collaborator (describe/play/announce) reported an
    /// authentication/authorization failure.
    #[error("authentication required")]
    AuthRequired,

    /// A synchronous client `call` exceeded its deadline (RFC 2326 leaves
    /// retransmission policy to the application; this crate kills the
    /// session rather than retry indefinitely).
    #[error("request timed out waiting for response")]
    CallTimeout,

    /// The external media source/consumer the session was bound to has
    /// gone away.
    #[error("media source or consumer is gone")]
    ConsumerGone,

    /// More than six consecutive audio/video drift corrections occurred;
    /// the session's timebase can no longer be trusted.
    #[error("too many audio drift corrections")]
    TooManyAudioShift,
}

/// Specific kind of RTSP parse failure.
#[derive(Debug)]
pub enum ParseErrorKind {
    /// Input was empty (no request/status line).
    EmptyRequest,
    /// Request line did not have the expected `Method URI Version` format.
    InvalidRequestLine,
    /// Status line did not have the expected `RTSP/1.0 code reason` format.
    InvalidStatusLine,
    /// A header line did not contain a colon separator.
    InvalidHeader,
    /// An interleaved `$` block had a truncated 4-byte prefix.
    InvalidInterleavedHeader,
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyRequest => write!(f, "empty request"),
            Self::InvalidRequestLine => write!(f, "invalid request line"),
            Self::InvalidStatusLine => write!(f, "invalid status line"),
            Self::InvalidHeader => write!(f, "invalid header"),
            Self::InvalidInterleavedHeader => write!(f, "invalid interleaved block header"),
        }
    }
}

/// Convenience alias for `Result<T, RtspError>`.
pub type Result<T> = std::result::Result<T, RtspError>;
