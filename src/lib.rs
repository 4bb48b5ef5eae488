use std::sync::Arc;

// Public modules
pub mod auth;
pub mod config;
pub mod domains;
pub mod errors;
pub mod globals;
pub mod validation;

// Private modules
mod db_migration;
mod utils;

#[cfg(test)]
mod test_support;

pub use config::CoreConfig;
pub use globals::{Collaborators, CoreServices};

/// Start the library: open the database, run migrations, wire every
/// component, recover the sync queue and start the background loops.
/// Must be called before `services()`.
pub async fn initialize(config: CoreConfig, collaborators: Collaborators) -> errors::ServiceResult<Arc<CoreServices>> {
    globals::initialize(config, collaborators).await
}

/// The running core
pub fn services() -> errors::ServiceResult<Arc<CoreServices>> {
    globals::services()
}

/// Stop every timer, cancel a running sync pass and close the database.
pub async fn shutdown() {
    globals::shutdown().await
}
