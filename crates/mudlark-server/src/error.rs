//! Error type for the server binary.

use mudlark_db::DbError;
use mudlark_entity::EntityError;
use mudlark_world::WorldError;

use crate::config::ConfigError;

/// Anything that can abort server startup or operation.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Configuration could not be loaded.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// The database could not be reached.
    #[error("database error: {0}")]
    Db(#[from] DbError),

    /// Entity runtime startup or shutdown failed.
    #[error("entity runtime error: {0}")]
    Entity(#[from] EntityError),

    /// A world operation failed.
    #[error("world error: {0}")]
    World(#[from] WorldError),

    /// An OS-level operation failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
