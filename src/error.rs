use thiserror::Error;

/// Which inbound frame field failed to validate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    /// `magic` did not satisfy `command ^ 0xFFFFFFFF`.
    Framing,
    /// The first frame on a new connection was not `CNXN`.
    ExpectedCnxn,
}

impl std::fmt::Display for ProtocolErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProtocolErrorKind::Framing => "framing",
            ProtocolErrorKind::ExpectedCnxn => "expected_cnxn",
        };
        write!(f, "{}", s)
    }
}

/// Which leg of the two-step host-ADB handshake a `FAIL` arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServicePhase {
    Transport,
    Service,
}

impl std::fmt::Display for ServicePhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ServicePhase::Transport => "transport",
            ServicePhase::Service => "service",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Error)]
pub enum AdbProxyError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    #[error("host-adb {phase} phase failed: {message}")]
    Service {
        phase: ServicePhase,
        message: String,
    },

    /// Internal signal for a stream operation racing with close. Never
    /// surfaced from a public function.
    #[error("stream closed")]
    StreamClosed,
}

pub type Result<T> = std::result::Result<T, AdbProxyError>;
