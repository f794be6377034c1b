use std::time::Duration;

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// How long a resolved blob URL stays usable before it is re-probed.
pub const DEFAULT_URL_INFO_TTL: Duration = Duration::from_secs(300);

/// How long a bearer token is reused before a fresh one is requested.
pub const DEFAULT_TOKEN_TTL: Duration = Duration::from_secs(30);

/// How long a discovered blob size is trusted.
pub const DEFAULT_BLOB_SIZE_TTL: Duration = Duration::from_secs(300);

/// Total attempts for a ranged blob fetch before the error surfaces.
pub const FETCH_ATTEMPTS: u32 = 3;

/// Pause between failed fetch attempts.
pub const FETCH_RETRY_BACKOFF: Duration = Duration::from_millis(1);

/// Largest token-endpoint response body that will be read.
pub const MAX_AUTH_RESPONSE_SIZE: usize = 16 * 1024;
