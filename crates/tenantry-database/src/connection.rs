//! Database connection management

use sea_orm::{ConnectOptions, Database, DatabaseConnection};
use std::sync::Arc;
use tenantry_core::{ServiceError, ServiceResult};
use tenantry_migrations::{Migrator, MigratorTrait};
use tracing::info;

pub type DbConnection = DatabaseConnection;

pub async fn establish_connection(database_url: &str) -> ServiceResult<Arc<DbConnection>> {
    let mut opt = ConnectOptions::new(database_url);
    if database_url.starts_with("sqlite::memory:") {
        // Every pooled connection would otherwise see its own empty database
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(20).min_connections(2);
    }
    opt.sqlx_logging(false);

    let db = Database::connect(opt)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;

    // Run migrations
    Migrator::up(&db, None)
        .await
        .map_err(|e| ServiceError::Database(e.to_string()))?;
    info!("Database ready, migrations applied");

    Ok(Arc::new(db))
}
