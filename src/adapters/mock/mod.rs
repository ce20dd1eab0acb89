//! Mock implementations of the capability traits for testing.

pub mod account_data;
pub mod http;
pub mod openid;

pub use account_data::MockAccountDataSource;
pub use http::{MockHttpClient, MockResponse, RecordedRequest};
pub use openid::MockOpenIdIssuer;
