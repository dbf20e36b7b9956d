//! Database connection and test utilities

pub use sea_orm;
mod connection;

pub use connection::{establish_connection, DbConnection};

// Export test utilities for use by other crates in their tests
pub mod test_utils;

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{ConnectionTrait, EntityTrait, PaginatorTrait};
    use tenantry_entities::tenants;

    #[tokio::test]
    async fn test_establish_connection_runs_migrations() -> anyhow::Result<()> {
        let db = establish_connection("sqlite::memory:").await?;

        let backend = db.get_database_backend();
        let result = db
            .query_one(sea_orm::Statement::from_string(
                backend,
                "SELECT 1".to_owned(),
            ))
            .await?;
        assert!(result.is_some());

        let count = tenants::Entity::find().count(db.as_ref()).await?;
        assert_eq!(count, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_url_is_database_error() {
        let err = establish_connection("notadb://nowhere").await.unwrap_err();
        assert!(matches!(err, tenantry_core::ServiceError::Database(_)));
    }
}
