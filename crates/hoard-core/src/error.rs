use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy every fetch error is mapped into.
///
/// The retry policy and the circuit breakers only ever look at the class,
/// never at the concrete error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Transient connectivity problem.
    Network,
    /// Registry or server throttling.
    RateLimit,
    /// The attempt exceeded its deadline.
    Timeout,
    /// Insufficient local storage.
    DiskSpace,
    /// Credential or permission failure.
    Auth,
    /// The artifact does not exist or the reference is malformed.
    Invalid,
    /// Uncaught or unclassified failure, including worker panics.
    Unknown,
}

impl ErrorClass {
    pub const ALL: [ErrorClass; 7] = [
        ErrorClass::Network,
        ErrorClass::RateLimit,
        ErrorClass::Timeout,
        ErrorClass::DiskSpace,
        ErrorClass::Auth,
        ErrorClass::Invalid,
        ErrorClass::Unknown,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorClass::Network => "network",
            ErrorClass::RateLimit => "rate_limit",
            ErrorClass::Timeout => "timeout",
            ErrorClass::DiskSpace => "disk_space",
            ErrorClass::Auth => "auth",
            ErrorClass::Invalid => "invalid",
            ErrorClass::Unknown => "unknown",
        }
    }

    /// `Auth` and `Invalid` never succeed on a retry.
    pub fn is_permanent(&self) -> bool {
        matches!(self, ErrorClass::Auth | ErrorClass::Invalid)
    }

    /// Classes that count towards a circuit breaker.
    pub fn trips_circuit(&self) -> bool {
        matches!(
            self,
            ErrorClass::Network | ErrorClass::RateLimit | ErrorClass::Timeout
        )
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for ErrorClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "network" => Ok(ErrorClass::Network),
            "rate_limit" | "ratelimit" => Ok(ErrorClass::RateLimit),
            "timeout" => Ok(ErrorClass::Timeout),
            "disk_space" | "diskspace" => Ok(ErrorClass::DiskSpace),
            "auth" => Ok(ErrorClass::Auth),
            "invalid" => Ok(ErrorClass::Invalid),
            "unknown" => Ok(ErrorClass::Unknown),
            _ => Err(format!("Unknown error class: {}", s)),
        }
    }
}

/// Application-wide error types for hoard.
#[derive(Error, Debug)]
pub enum AppError {
    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// Rate limit exceeded at the registry or server.
    #[error("Rate limit exceeded: {0}")]
    RateLimited(String),

    /// Request timed out.
    #[error("Timed out after {0} seconds")]
    Timeout(u64),

    /// Not enough local storage to hold the artifact.
    #[error("Insufficient disk space: {0}")]
    DiskSpace(String),

    /// Authentication or authorization failed.
    #[error("Authentication failed: {0}")]
    AuthError(String),

    /// The artifact does not exist or its reference is malformed.
    #[error("Invalid artifact reference: {0}")]
    InvalidReference(String),

    /// Configuration or work-list error.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Reading or appending the run state failed.
    #[error("State store error: {0}")]
    StateStoreError(String),

    /// Local IO failed.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    /// Generic error.
    #[error("{0}")]
    Generic(String),
}

impl AppError {
    /// Maps this error into the failure taxonomy.
    pub fn class(&self) -> ErrorClass {
        match self {
            AppError::NetworkError(_) => ErrorClass::Network,
            AppError::RateLimited(_) => ErrorClass::RateLimit,
            AppError::Timeout(_) => ErrorClass::Timeout,
            AppError::DiskSpace(_) => ErrorClass::DiskSpace,
            AppError::AuthError(_) => ErrorClass::Auth,
            AppError::InvalidReference(_) => ErrorClass::Invalid,
            AppError::Io(e) if e.kind() == std::io::ErrorKind::StorageFull => {
                ErrorClass::DiskSpace
            }
            AppError::Io(e) if e.kind() == std::io::ErrorKind::TimedOut => ErrorClass::Timeout,
            AppError::Io(e) if e.kind() == std::io::ErrorKind::PermissionDenied => {
                ErrorClass::Auth
            }
            _ => ErrorClass::Unknown,
        }
    }
}
