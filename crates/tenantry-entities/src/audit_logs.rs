use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};
use tenantry_core::DBDateTime;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel, Eq, Serialize, Deserialize)]
#[sea_orm(table_name = "audit_logs")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub operation_type: String,
    pub customer_id: Option<i32>,
    pub tenant_id: Option<i32>,
    pub ip_address: Option<String>,
    pub user_agent: String,
    #[sea_orm(column_type = "Text")]
    pub data: String,
    pub audit_date: DBDateTime,
    pub created_at: DBDateTime,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
