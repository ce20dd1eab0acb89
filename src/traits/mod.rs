//! Capability traits consumed by the trust core.
//!
//! These traits are the seams to the surrounding session layer: the HTTP
//! executor, the account-data stream, the OpenID issuer, and credential
//! storage. Implementations live in [`crate::adapters`]; mocks for every
//! trait are provided for tests.

pub mod account_data;
pub mod http;
pub mod openid;
pub mod storage;

pub use account_data::{AccountDataSource, AccountDataStream};
pub use http::{Headers, HttpClient, HttpError, Response};
pub use openid::OpenIdIssuer;
pub use storage::CredentialStorage;
