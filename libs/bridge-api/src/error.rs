/// Category of a bridge error. Lets the task decide between recovering
/// locally (retry next cycle) and failing the task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Invalid or missing setting. Fails the task at start.
    Config,
    /// Broker or transport failure. Retried by the next cycle.
    Io,
    /// Value does not fit its schema. Never retried.
    Encoding,
    /// Logical error (not found, invalid state, generic).
    Logic,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::Config => f.write_str("config"),
            ErrorKind::Io => f.write_str("io"),
            ErrorKind::Encoding => f.write_str("encoding"),
            ErrorKind::Logic => f.write_str("logic"),
        }
    }
}

/// Unified error type for every broker, log and codec boundary.
///
/// Carries an `ErrorKind` for categorization and a human-readable message.
/// `From` impls assign the kind automatically so implementations can use `?`.
#[derive(Clone, PartialEq, Eq)]
pub struct BridgeError {
    kind: ErrorKind,
    message: String,
}

impl BridgeError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Config, message: msg.into() }
    }

    pub fn io(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Io, message: msg.into() }
    }

    pub fn encoding(msg: impl Into<String>) -> Self {
        Self { kind: ErrorKind::Encoding, message: msg.into() }
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    /// Prefix the message with context, keeping the kind.
    ///
    /// Produces: `"context: original message"`.
    pub fn with_context(self, ctx: impl std::fmt::Display) -> Self {
        Self {
            kind: self.kind,
            message: format!("{ctx}: {}", self.message),
        }
    }
}

impl std::fmt::Debug for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.kind, self.message)
    }
}

impl std::fmt::Display for BridgeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for BridgeError {}

impl From<String> for BridgeError {
    fn from(s: String) -> Self { Self { kind: ErrorKind::Logic, message: s } }
}

impl From<&str> for BridgeError {
    fn from(s: &str) -> Self { Self { kind: ErrorKind::Logic, message: s.to_string() } }
}

impl From<std::io::Error> for BridgeError {
    fn from(e: std::io::Error) -> Self { Self { kind: ErrorKind::Io, message: e.to_string() } }
}

impl From<serde_json::Error> for BridgeError {
    fn from(e: serde_json::Error) -> Self { Self { kind: ErrorKind::Encoding, message: e.to_string() } }
}

impl From<std::string::FromUtf8Error> for BridgeError {
    fn from(e: std::string::FromUtf8Error) -> Self { Self { kind: ErrorKind::Encoding, message: e.to_string() } }
}

impl From<std::num::ParseIntError> for BridgeError {
    fn from(e: std::num::ParseIntError) -> Self { Self { kind: ErrorKind::Config, message: e.to_string() } }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_context_keeps_kind() {
        let err = BridgeError::io("connection reset").with_context("pull projects/p/subscriptions/s");
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), "pull projects/p/subscriptions/s: connection reset");
    }

    #[test]
    fn test_debug_shows_kind() {
        let err = BridgeError::encoding("missing required field id");
        assert_eq!(format!("{err:?}"), "[encoding] missing required field id");
        assert_eq!(err.to_string(), "missing required field id");
    }
}
