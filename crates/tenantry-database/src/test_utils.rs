//! Test utilities for database integration tests
//!
//! Every `TestDatabase` is a private in-memory SQLite database with all
//! migrations applied, so tests never share state.

use crate::DbConnection;
use sea_orm::{ConnectOptions, Database};
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;
use tenantry_migrations::Migrator;

pub struct TestDatabase {
    pub db: Arc<DbConnection>,
}

impl TestDatabase {
    pub async fn new() -> anyhow::Result<Self> {
        let mut opt = ConnectOptions::new("sqlite::memory:");
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let db = Database::connect(opt).await?;
        Migrator::up(&db, None).await?;

        Ok(Self { db: Arc::new(db) })
    }

    pub fn connection(&self) -> Arc<DbConnection> {
        self.db.clone()
    }
}
