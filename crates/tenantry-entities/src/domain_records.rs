use async_trait::async_trait;
use sea_orm::entity::prelude::*;
use sea_orm::{ActiveValue::Set, ConnectionTrait, DbErr};
use serde::{Deserialize, Serialize};
use tenantry_core::DBDateTime;

use crate::types::{DomainStatus, ErrorLogEntry};

/// Correlation state linking a tenant's domain to its DNS, proxy and
/// registrar identifiers.
#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "domain_records")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub tenant_id: i32,
    #[sea_orm(unique)]
    pub domain: String,
    pub is_subdomain: bool,
    pub status: DomainStatus,
    pub registrar_domain_id: Option<String>,
    pub cloudflare_zone_id: Option<String>,
    pub cloudflare_record_id: Option<String>,
    pub cloudflare_proxied: bool,
    pub caddy_route_id: Option<String>,
    /// JSON array of nameserver host names, custom domains only.
    #[sea_orm(column_type = "Text", nullable)]
    pub target_nameservers: Option<String>,
    pub last_verified_at: Option<DBDateTime>,
    /// JSON array of `ErrorLogEntry`.
    #[sea_orm(column_type = "Text")]
    pub error_log: String,
    pub created_at: DBDateTime,
    pub updated_at: DBDateTime,
}

impl Model {
    pub fn target_nameservers(&self) -> Vec<String> {
        self.target_nameservers
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok())
            .unwrap_or_default()
    }

    pub fn error_entries(&self) -> Vec<ErrorLogEntry> {
        serde_json::from_str(&self.error_log).unwrap_or_default()
    }
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::tenants::Entity",
        from = "Column::TenantId",
        to = "super::tenants::Column::Id",
        on_delete = "Cascade"
    )]
    Tenant,
}

impl Related<super::tenants::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Tenant.def()
    }
}

#[async_trait]
impl ActiveModelBehavior for ActiveModel {
    async fn before_save<C>(mut self, _db: &C, insert: bool) -> Result<Self, DbErr>
    where
        C: ConnectionTrait,
    {
        let now = chrono::Utc::now();

        if insert {
            if self.created_at.is_not_set() {
                self.created_at = Set(now);
            }
            if self.updated_at.is_not_set() {
                self.updated_at = Set(now);
            }
            if self.error_log.is_not_set() {
                self.error_log = Set("[]".to_string());
            }
        } else {
            self.updated_at = Set(now);
        }

        Ok(self)
    }
}
