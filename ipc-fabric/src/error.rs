use std::fmt;
use std::io;

/// Fatal/reportable conditions raised by the fabric. Transient, expected
/// outcomes (peer disconnect, caller not authorized) are modeled structurally
/// by the callers rather than routed through this enum.
#[derive(Debug)]
pub enum IpcError {
    IncompatibleSegment {
        expected: (u16, u16),
        found: (u16, u16),
    },
    InvalidName(String),
    InvalidMessage,
    Os(io::Error),
}

impl fmt::Display for IpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpcError::IncompatibleSegment { expected, found } => write!(
                f,
                "incompatible segment: expected (kind={}, version={}), found (kind={}, version={})",
                expected.0, expected.1, found.0, found.1
            ),
            IpcError::InvalidName(name) => write!(f, "invalid segment name: {}", name),
            IpcError::InvalidMessage => write!(f, "message buffer did not match its own header"),
            IpcError::Os(e) => write!(f, "os error: {}", e),
        }
    }
}

impl std::error::Error for IpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            IpcError::Os(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for IpcError {
    fn from(e: io::Error) -> Self {
        IpcError::Os(e)
    }
}

pub type Result<T> = std::result::Result<T, IpcError>;
