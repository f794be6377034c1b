use std::{
    error::Error,
    fmt::{self, Display},
    io,
};

use thiserror::Error;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a registry filesystem operation.
pub type RegistryFsResult<T> = Result<T, RegistryFsError>;

/// An error that occurred during a registry filesystem operation.
#[derive(pretty_error_debug::Debug, Error)]
pub enum RegistryFsError {
    /// The blob could not be reached or the fetch exhausted its retries
    #[error("blob not found: {0}")]
    NotFound(String),

    /// The operation's deadline was exceeded
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The registry's auth challenge was missing or unparseable
    #[error("malformed auth challenge: {0}")]
    AuthChallengeMalformed(String),

    /// The token endpoint or the registry rejected the credentials
    #[error("authentication denied: {0}")]
    AuthDenied(String),

    /// The registry answered a blob fetch with an unexpected status
    #[error("unexpected http status {status} for {url}")]
    HttpStatus {
        /// The status code the server answered with
        status: u16,

        /// The blob URL the fetch was issued for
        url: String,
    },

    /// The operation is not supported by a read-only registry filesystem
    #[error("operation not implemented on registry filesystem: {0}")]
    NotImplemented(&'static str),

    /// The HTTP transport failed below the status-code level
    #[error("http transport error: {0}")]
    HttpTransport(#[from] reqwest::Error),

    /// IO error during a filesystem operation
    #[error("io error: {0}")]
    Io(#[from] io::Error),

    /// Custom error.
    #[error(transparent)]
    Custom(#[from] AnyError),
}

/// An error that can represent any error.
#[derive(Debug)]
pub struct AnyError {
    error: anyhow::Error,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RegistryFsError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> RegistryFsError {
        RegistryFsError::Custom(AnyError {
            error: error.into(),
        })
    }

    /// Returns true when the error denotes a missing blob.
    pub fn is_not_found(&self) -> bool {
        matches!(self, RegistryFsError::NotFound(_))
    }
}

impl AnyError {
    /// Downcasts the error to a `T`.
    pub fn downcast<T>(&self) -> Option<&T>
    where
        T: Display + fmt::Debug + Send + Sync + 'static,
    {
        self.error.downcast_ref::<T>()
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `RegistryFsResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> RegistryFsResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Display for AnyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl Error for AnyError {}
