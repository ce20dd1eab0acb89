//! Error taxonomy for trust and token lifecycle operations.
//!
//! Recoverable-by-retry conditions (`AuthTokenInvalid`) are resolved
//! internally with a bounded retry count of one; everything else crosses
//! the component boundary as a typed failure.

use crate::traits::http::HttpError;

/// Application error code meaning the user has not signed the service's
/// terms of use.
pub const ERRCODE_TERMS_NOT_SIGNED: &str = "M_TERMS_NOT_SIGNED";

/// Application error code marking a rejected service token on a 403.
pub const ERRCODE_UNKNOWN_TOKEN: &str = "M_UNKNOWN_TOKEN";

/// Error type for trust and token lifecycle operations.
#[derive(Debug)]
pub enum TrustError {
    /// No identity server URL is set; terminal, never retried.
    NoIdentityServerConfigured,
    /// No integration manager is configured for this session; terminal.
    NoIntegrationManagerConfigured,
    /// The home server lacks a required capability; checked before any
    /// network I/O.
    OutdatedHomeServer,
    /// The service rejected the call until its terms are signed
    /// (403 + `M_TERMS_NOT_SIGNED`); terminal, must not trigger refresh.
    TermsNotSigned,
    /// The service token was rejected (401, or 403 + `M_UNKNOWN_TOKEN`);
    /// recoverable by exactly one token refresh.
    AuthTokenInvalid,
    /// Any other non-2xx response.
    Server { status: u16, message: String },
    /// Transport-level HTTP failure.
    Http(HttpError),
    /// Response body could not be decoded.
    Json(serde_json::Error),
    /// Credential storage failure.
    Storage(String),
    /// The operation handle was cancelled before completion.
    Cancelled,
}

impl TrustError {
    /// Whether this failure is resolved by clearing the cached token and
    /// acquiring a fresh one (once).
    pub fn is_auth_failure(&self) -> bool {
        matches!(self, TrustError::AuthTokenInvalid)
    }

    /// Whether this failure is terminal for the current operation: no
    /// retry will change the outcome.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TrustError::NoIdentityServerConfigured
                | TrustError::NoIntegrationManagerConfigured
                | TrustError::OutdatedHomeServer
                | TrustError::TermsNotSigned
        )
    }

    /// Classify a non-2xx HTTP response into the taxonomy.
    ///
    /// A 401 always means the token is invalid. A 403 is split by the
    /// application error code: terms-not-signed is terminal, an unknown
    /// token is the recoverable auth class, anything else is a generic
    /// server error.
    pub fn from_status(status: u16, errcode: Option<&str>, message: String) -> Self {
        match (status, errcode) {
            (401, _) => TrustError::AuthTokenInvalid,
            (403, Some(ERRCODE_TERMS_NOT_SIGNED)) => TrustError::TermsNotSigned,
            (403, Some(ERRCODE_UNKNOWN_TOKEN)) => TrustError::AuthTokenInvalid,
            _ => TrustError::Server { status, message },
        }
    }
}

impl std::fmt::Display for TrustError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TrustError::NoIdentityServerConfigured => {
                write!(f, "No identity server configured")
            }
            TrustError::NoIntegrationManagerConfigured => {
                write!(f, "No integration manager configured")
            }
            TrustError::OutdatedHomeServer => {
                write!(f, "Home server does not support this operation")
            }
            TrustError::TermsNotSigned => {
                write!(f, "Terms of service have not been signed")
            }
            TrustError::AuthTokenInvalid => {
                write!(f, "Service token rejected")
            }
            TrustError::Server { status, message } => {
                write!(f, "Server error ({}): {}", status, message)
            }
            TrustError::Http(e) => write!(f, "HTTP error: {}", e),
            TrustError::Json(e) => write!(f, "JSON error: {}", e),
            TrustError::Storage(msg) => write!(f, "Storage error: {}", msg),
            TrustError::Cancelled => write!(f, "Operation cancelled"),
        }
    }
}

impl std::error::Error for TrustError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            TrustError::Http(e) => Some(e),
            TrustError::Json(e) => Some(e),
            _ => None,
        }
    }
}

impl From<HttpError> for TrustError {
    fn from(e: HttpError) -> Self {
        TrustError::Http(e)
    }
}

impl From<serde_json::Error> for TrustError {
    fn from(e: serde_json::Error) -> Self {
        TrustError::Json(e)
    }
}
