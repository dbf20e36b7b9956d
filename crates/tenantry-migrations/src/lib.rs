//! Database migrations for the Tenantry schema

pub use sea_orm_migration::prelude::*;

mod migration;
pub use migration::Migrator;
