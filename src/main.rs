use anyhow::Result;
use diesel_migrations::{EmbeddedMigrations, embed_migrations};
use restaurant_orderservice::{
    app_state::AppState,
    bootstrap::{self, bootstrap},
    config, db,
};

/// Migrations embedded into the binary which helps with streamlining image building process
const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

#[tokio::main]
async fn main() -> Result<()> {
    bootstrap::init_tracing();
    bootstrap::init_env();

    let config = config::load()?;

    tracing::info!("Running migrations...");
    let migrations_count = db::run_migrations_blocking(MIGRATIONS, &config.database.url).await?;
    tracing::info!("Run {} new migrations successfully", migrations_count);

    let db_pool = db::create_pool(&config.database.url, config.database.max_connections).await?;
    let state = AppState::new(&config, db_pool);

    tracing::info!("Bootstrapping...");
    bootstrap("OrderService", &config, state).await?;
    Ok(())
}
