use thiserror::Error;

/// Classified failure from a Spotify Web API call.
///
/// Every collaborator call returns one of these instead of throwing; the
/// polling loops count and log them, they never crash the process.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Transport-level failure before any response arrived.
    #[error("network error talking to Spotify")]
    Network(#[source] reqwest::Error),

    /// Spotify answered with a non-success status.
    #[error("Spotify rejected the request with status {status}")]
    Request { status: reqwest::StatusCode },

    /// A response arrived but its body didn't match the expected shape.
    #[error("unexpected response shape from Spotify")]
    ResponseSchema(#[source] reqwest::Error),

    /// The caller cancelled the request. Expected during shutdown; never
    /// counted toward a failure ceiling, never logged as an error.
    #[error("request aborted")]
    Aborted,
}
