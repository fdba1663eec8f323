//! Repository implementations

mod api_key;
mod federated_user;
mod refresh_token;

pub use api_key::{Activation, ApiKeyRepository, PgApiKeyRepo};
pub use federated_user::{FederatedUserRepository, PgFederatedUserRepo};
pub use refresh_token::{PgRefreshTokenRepo, RefreshTokenRepository};
