use courier_interchange::EnvelopeError;

/// Failure to get any response out of the transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// DNS, connect or I/O failure: the server could not be reached.
    #[error("network unreachable: {0}")]
    Unreachable(String),

    /// The request did not complete in time.
    #[error("request timed out")]
    Timeout,

    /// The server answered with a non-2xx HTTP status and no usable body.
    #[error("HTTP status {status}")]
    Http { status: u16 },

    /// The body was not a valid response document.
    #[error("could not decode response: {0}")]
    Decode(String),
}

impl TransportError {
    /// Whether retrying the same request later may succeed.
    ///
    /// Unreachable servers, timeouts, 5xx, 408 and 429 are transient.
    /// Everything else will fail the same way again.
    pub fn is_transient(&self) -> bool {
        match self {
            TransportError::Unreachable(_) | TransportError::Timeout => true,
            TransportError::Http { status } => *status >= 500 || *status == 408 || *status == 429,
            TransportError::Decode(_) => false,
        }
    }
}

/// How a request ended when it did not produce a [`Response`].
///
/// Business failures (`jsonCode != 200`) are *not* errors: they arrive as an
/// `Ok(Response)` and are surfaced to users through store updates.
///
/// [`Response`]: courier_interchange::Response
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RequestError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The request references a temporary identifier that has not been
    /// resolved yet. Only raised for queued writes, which are deferred.
    #[error("request references unresolved optimistic id '{id}'")]
    Conflict { id: String },

    /// The auth token expired and could not be refreshed.
    #[error("reauthentication failed: {0}")]
    AuthFailed(String),

    /// A one-shot request was attempted while the network is known to be down.
    #[error("network is offline")]
    Offline,

    /// The client was shut down before the request could complete.
    #[error("client is shutting down")]
    Shutdown,

    /// The request could not be built.
    #[error(transparent)]
    Envelope(#[from] EnvelopeError),
}

/// Failure to refresh the auth token.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("no stored credentials to reauthenticate with")]
    MissingCredentials,

    #[error("authentication rejected (jsonCode {json_code}): {message}")]
    Rejected { json_code: i64, message: String },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// Invalid client configuration.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("could not read config '{path}': {message}")]
    Io { path: String, message: String },

    #[error("could not parse config: {0}")]
    Parse(String),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(TransportError::Unreachable("refused".into()).is_transient());
        assert!(TransportError::Timeout.is_transient());
        assert!(TransportError::Http { status: 502 }.is_transient());
        assert!(TransportError::Http { status: 429 }.is_transient());
        assert!(!TransportError::Http { status: 404 }.is_transient());
        assert!(!TransportError::Decode("eof".into()).is_transient());
    }
}
