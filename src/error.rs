//! Unified error type.

/// The error type returned by kumi's fallible operations.
///
/// Application-level outcomes (404, 405, etc.) are written through the
/// [`ResponseWriter`](crate::ResponseWriter), not returned as `Error`s. This
/// type covers three things: a transport capability the sink does not have,
/// a route pattern the router refuses, and I/O failures in the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The wrapped sink cannot perform the named capability
    /// (`"hijack"`, `"push"`).
    #[error("feature not supported: {0}")]
    NotSupported(&'static str),

    #[error("invalid pattern `{pattern}`: {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("pattern `{pattern}` conflicts with an existing registration")]
    DuplicatePattern { pattern: String },

    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}
