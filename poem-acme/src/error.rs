//! Error types.

/// A possible error value when driving the ACME protocol locally.
///
/// Network level failures are not represented here: they are reported by the
/// [`HttpClient`](crate::HttpClient) as [`std::io::Error`] and only affect the
/// certificate being processed.
#[derive(Debug, thiserror::Error)]
pub enum AcmeError {
    /// A signed request was built without a fresh nonce.
    #[error("need nonce")]
    MissingNonce,

    /// A certificate request was built for an empty domain list.
    #[error("no domains set")]
    NoDomains,

    /// The directory does not contain the requested endpoint.
    #[error("directory has no `{0}` endpoint")]
    MissingEndpoint(String),

    /// A response or the current order is missing a required value.
    #[error("missing `{0}`")]
    MissingField(&'static str),

    /// The authorization does not offer the requested challenge type.
    #[error("unable to find `{0}` challenge")]
    MissingChallenge(&'static str),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// The private key could not be loaded or generated.
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Signing with the account key failed.
    #[error("failed to sign message")]
    Sign,

    /// The certificate chain could not be parsed.
    #[error("invalid certificate: {0}")]
    Certificate(String),

    /// The certificate signing request could not be built.
    #[error("certificate request: {0}")]
    Csr(#[from] rcgen::Error),

    /// JSON error.
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),

    /// Io error.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Represents a result type for ACME operations.
pub type Result<T, E = AcmeError> = std::result::Result<T, E>;
