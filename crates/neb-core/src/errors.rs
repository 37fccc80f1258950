/// Core error type.
///
/// Adapter crates map their specific failures into this type so the registry and
/// the administrative API can tell "not configured" apart from retryable
/// protocol trouble.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("identity not configured: {user_id}")]
    NotConfigured { user_id: String },

    #[error("unknown service: {service_id}")]
    UnknownService { service_id: String },

    #[error("unknown service type: {service_type}")]
    UnknownServiceType { service_type: String },

    #[error("invalid configuration: {0}")]
    Validation(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("delivery failed: {0}")]
    Delivery(String),

    #[error("encryption error: {0}")]
    Crypto(String),

    #[error("service registration failed: {0}")]
    Registration(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("external error: {0}")]
    External(String),
}

impl Error {
    /// True for errors an administrative caller should see as "no such thing".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::NotConfigured { .. }
                | Error::UnknownService { .. }
                | Error::UnknownServiceType { .. }
        )
    }

    /// True for errors caused by the caller's input rather than the host.
    pub fn is_client_error(&self) -> bool {
        self.is_not_found() || matches!(self, Error::Validation(_) | Error::Registration(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
