//! API Handlers
//!
//! One module per endpoint group.

pub mod api_keys;
pub mod auth;
pub mod health;
pub mod oidc;
