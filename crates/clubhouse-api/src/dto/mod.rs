//! Request and response bodies

pub mod api_key;
pub mod auth;
pub mod oidc;

pub use api_key::*;
pub use auth::*;
pub use oidc::*;
