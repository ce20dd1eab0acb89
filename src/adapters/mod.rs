//! Implementations of the capability traits.
//!
//! Production adapters (reqwest HTTP, file-backed storage, REST surfaces
//! for the identity and integration services) plus mock adapters for
//! tests.

pub mod file_storage;
pub mod identity_api;
pub mod memory_storage;
pub mod mock;
pub mod reqwest_http;
pub mod scalar_api;

pub use file_storage::FileCredentialStorage;
pub use identity_api::IdentityApiClient;
pub use memory_storage::MemoryCredentialStorage;
pub use reqwest_http::ReqwestHttpClient;
pub use scalar_api::ScalarApiClient;
