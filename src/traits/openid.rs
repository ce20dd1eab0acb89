//! OpenID issuer capability trait.

use async_trait::async_trait;

use crate::error::TrustError;
use crate::models::OpenIdToken;

/// Trait for the home server's OpenID token issuer.
///
/// The issuer hands out short-lived assertions that third-party services
/// exchange for their own tokens. The capability flag is known from the
/// home server's advertised versions, so it can be checked without I/O.
#[async_trait]
pub trait OpenIdIssuer: Send + Sync {
    /// Request a one-time OpenID assertion for the current user.
    async fn get_open_id_token(&self) -> Result<OpenIdToken, TrustError>;

    /// Whether the home server supports three-pid binding against a
    /// separately-configured identity server. Binding operations fail
    /// with [`TrustError::OutdatedHomeServer`] when this is false,
    /// before any network I/O.
    fn supports_threepid_binding(&self) -> bool;
}
