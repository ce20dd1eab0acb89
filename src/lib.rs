//! Trustline - third-party service trust and token lifecycle for
//! session clients.
//!
//! Tracks which identity server and integration manager an account is
//! configured to use, exchanges home-server OpenID assertions for
//! service tokens (with transparent one-shot refresh on rejection), and
//! propagates configuration and permission changes to observers exactly
//! once per logical change.

pub mod acquisition;
pub mod adapters;
pub mod connectivity;
pub mod error;
pub mod extractor;
pub mod identity;
pub mod integrations;
pub mod models;
pub mod ops;
pub mod registry;
pub mod store;
pub mod traits;
pub mod watcher;
