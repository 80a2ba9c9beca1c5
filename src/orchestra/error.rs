use std::{error::Error, fmt, io};

/// The orchestra module's result type.
pub type Result<T> = std::result::Result<T, OrchestraError>;

/// Failures while setting up or driving a run.
///
/// Workload failures are not part of this type, they are contained by the
/// worker that hit them and surface as `WorkloadError`s in its report.
#[derive(Debug)]
pub enum OrchestraError {
    /// The worker pool or the presentation thread could not be started.
    Io(io::Error),
    /// The configuration file could not be parsed.
    Config(serde_json::Error),
    /// A configuration value is out of range.
    InvalidConfig(String),
}

impl fmt::Display for OrchestraError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Config(e) => write!(f, "malformed config: {e}"),
            Self::InvalidConfig(msg) => write!(f, "invalid config: {msg}"),
        }
    }
}

impl Error for OrchestraError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Config(e) => Some(e),
            Self::InvalidConfig(_) => None,
        }
    }
}

impl From<io::Error> for OrchestraError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for OrchestraError {
    fn from(value: serde_json::Error) -> Self {
        Self::Config(value)
    }
}

/// Error raised by a single workload invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadError {
    /// An intermediate value does not fit the integer type.
    Overflow { a: i64, b: i64 },
    /// The workload panicked, the payload message is kept when it was a string.
    Panicked(String),
    /// Caller-defined failure.
    Failed(String),
}

impl fmt::Display for WorkloadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Overflow { a, b } => write!(f, "arithmetic overflow computing gcd({a}, {b})"),
            Self::Panicked(msg) => write!(f, "workload panicked: {msg}"),
            Self::Failed(msg) => write!(f, "workload failed: {msg}"),
        }
    }
}

impl Error for WorkloadError {}
