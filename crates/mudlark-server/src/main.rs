//! Mudlark server binary.
//!
//! Wires the persistence and world layers together: loads
//! configuration, waits for the database, reconciles every entity
//! table, bootstraps the world, and runs the place tick loop until a
//! shutdown signal arrives.
//!
//! # Startup Sequence
//!
//! 1. Initialize structured logging (tracing)
//! 2. Load configuration from `mudlark-config.yaml`
//! 3. Wait for the database and connect
//! 4. Register world entity kinds and start the runtime
//!    (all tables created/migrated in one transaction; any schema
//!    problem aborts startup here)
//! 5. Initialize the world (type registry, limbo bootstrap)
//! 6. Run the tick loop until ctrl-c
//! 7. Flush the write queue and shut down

mod config;
mod error;

use std::path::Path;
use std::sync::Arc;

use mudlark_db::{DbPool, PostgresConfig};
use mudlark_entity::{Entity, RuntimeBuilder};
use mudlark_world::{
    register_world_kinds, BoxFuture, Character, CharacterTemplate, GameHooks, PasswordVerifier,
    Place, PlaceTracker, User, World,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::ServerConfig;
use crate::error::ServerError;

/// Built-in game hooks used until a real game module is hosted.
///
/// Offers no character templates and sends every new character to
/// limbo.
struct DefaultGame;

impl GameHooks for DefaultGame {
    fn character_creation_options<'a>(
        &'a self,
        _user: &'a Entity<User>,
    ) -> BoxFuture<'a, Vec<CharacterTemplate>> {
        Box::pin(async { Vec::new() })
    }

    fn starting_place<'a>(
        &'a self,
        _character: &'a Entity<Character>,
        _user: &'a Entity<User>,
    ) -> BoxFuture<'a, Option<Entity<Place>>> {
        Box::pin(async { None })
    }
}

/// Development-only verifier comparing the stored value directly.
///
/// A deployment swaps this for a real hash check behind the same
/// trait; nothing else in the stack changes.
struct DevPasswordVerifier;

impl PasswordVerifier for DevPasswordVerifier {
    fn verify(&self, hash: &str, password: &str) -> bool {
        hash == password
    }
}

/// Application entry point for the Mudlark server.
///
/// # Errors
///
/// Returns an error if any startup step or the tick loop fails.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Initialize structured logging.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("mudlark-server starting");

    // 2. Load configuration.
    let config = load_config()?;
    let tick_interval = config.world.tick_interval()?;
    info!(
        database_url = %config.database.url,
        migration_mode = ?config.migrations.mode,
        ?tick_interval,
        "Configuration loaded"
    );

    // 3. Wait for the database.
    let pg_config = PostgresConfig::new(&config.database.url)
        .with_max_connections(config.database.max_connections);
    let pool = DbPool::wait_until_ready(&pg_config, config.database.startup_attempts)
        .await
        .map_err(ServerError::Db)?;
    info!("Database connection established");

    // 4. Register entity kinds and start the runtime. Any migration
    //    or drift problem aborts startup here, before the first write.
    let tracker = Arc::new(PlaceTracker::new());
    let builder = register_world_kinds(
        RuntimeBuilder::new(&config.migrations.data_dir),
        &tracker,
    )
    .map_err(ServerError::Entity)?;
    let runtime = Arc::new(
        builder
            .start(pool, config.migrations.mode.to_migrator())
            .await
            .map_err(ServerError::Entity)?,
    );
    info!("Entity runtime started");

    // 5. Initialize the world.
    let world = World::initialize(
        Arc::clone(&runtime),
        tracker,
        Vec::new(),
        Arc::new(DefaultGame),
        Arc::new(DevPasswordVerifier),
    )
    .await
    .map_err(ServerError::World)?;
    info!(limbo = world.limbo().id(), "World initialized");

    // 6. Tick until told to stop.
    let ticker = tokio::spawn({
        let world = Arc::clone(&world);
        async move { world.run_tick_loop(tick_interval).await }
    });

    tokio::signal::ctrl_c().await.map_err(ServerError::Io)?;
    info!("Shutdown signal received");

    // 7. Orderly shutdown: stop ticking, flush pending writes. The
    //    aborted task must be joined before its world handle is gone.
    ticker.abort();
    if let Ok(Err(error)) = ticker.await {
        tracing::error!(%error, "Tick loop failed");
    }
    drop(world);
    match Arc::try_unwrap(runtime) {
        Ok(runtime) => runtime.shutdown().await.map_err(ServerError::Entity)?,
        Err(_) => tracing::warn!("Runtime still shared at shutdown; skipping queue flush"),
    }

    info!("mudlark-server shutdown complete");
    Ok(())
}

/// Load the server configuration from `mudlark-config.yaml`.
///
/// A missing file is not an error; defaults apply.
fn load_config() -> Result<ServerConfig, ServerError> {
    let config_path = Path::new("mudlark-config.yaml");
    if config_path.exists() {
        Ok(ServerConfig::from_file(config_path).map_err(ServerError::Config)?)
    } else {
        info!("Config file not found, using defaults");
        Ok(ServerConfig::parse("{}").map_err(ServerError::Config)?)
    }
}
