//! Application state shared across handlers

use std::sync::Arc;

use clubhouse_auth::AuthService;
use clubhouse_db::{Database, FederatedUserRepository};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Credential services
    pub auth: Arc<AuthService>,
    /// Maps provider subjects to local users
    pub federated_users: Arc<dyn FederatedUserRepository>,
    /// Present when running against Postgres; drives readiness
    pub db: Option<Database>,
}

impl AppState {
    pub fn new(auth: Arc<AuthService>, federated_users: Arc<dyn FederatedUserRepository>) -> Self {
        Self {
            auth,
            federated_users,
            db: None,
        }
    }

    /// State backed by Postgres for every repository
    pub fn from_database(db: Database, auth: Arc<AuthService>) -> Self {
        Self {
            auth,
            federated_users: Arc::new(db.federated_user_repo()),
            db: Some(db),
        }
    }
}
