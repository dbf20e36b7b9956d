use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

fn timestamps(table: &mut TableCreateStatement) -> &mut TableCreateStatement {
    table
        .col(
            ColumnDef::new(Alias::new("created_at"))
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
        .col(
            ColumnDef::new(Alias::new("updated_at"))
                .timestamp_with_time_zone()
                .not_null()
                .default(Expr::current_timestamp()),
        )
}

fn id_column() -> ColumnDef {
    ColumnDef::new(Alias::new("id"))
        .integer()
        .not_null()
        .auto_increment()
        .primary_key()
        .to_owned()
}

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                timestamps(
                    Table::create()
                        .table(Alias::new("customers"))
                        .if_not_exists()
                        .col(&mut id_column())
                        .col(ColumnDef::new(Alias::new("name")).string().not_null())
                        .col(
                            ColumnDef::new(Alias::new("email"))
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("password_hash"))
                                .string()
                                .not_null(),
                        ),
                )
                .to_owned(),
            )
            .await?;

        // tenants.domain UNIQUE is the serialization point for concurrent provisioning
        manager
            .create_table(
                timestamps(
                    Table::create()
                        .table(Alias::new("tenants"))
                        .if_not_exists()
                        .col(&mut id_column())
                        .col(ColumnDef::new(Alias::new("customer_id")).integer().not_null())
                        .col(
                            ColumnDef::new(Alias::new("domain"))
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("is_subdomain"))
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(ColumnDef::new(Alias::new("parent_domain")).string().null())
                        .col(
                            ColumnDef::new(Alias::new("theme"))
                                .string()
                                .not_null()
                                .default("default"),
                        )
                        .col(
                            ColumnDef::new(Alias::new("plan"))
                                .string()
                                .not_null()
                                .default("free"),
                        )
                        .col(
                            ColumnDef::new(Alias::new("is_deleted"))
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(
                            ColumnDef::new(Alias::new("deleted_at"))
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_tenants_customer_id")
                                .from(Alias::new("tenants"), Alias::new("customer_id"))
                                .to(Alias::new("customers"), Alias::new("id"))
                                .on_delete(ForeignKeyAction::Cascade),
                        ),
                )
                .to_owned(),
            )
            .await?;

        manager
            .create_table(
                timestamps(
                    Table::create()
                        .table(Alias::new("domain_records"))
                        .if_not_exists()
                        .col(&mut id_column())
                        .col(ColumnDef::new(Alias::new("tenant_id")).integer().not_null())
                        .col(
                            ColumnDef::new(Alias::new("domain"))
                                .string()
                                .not_null()
                                .unique_key(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("is_subdomain"))
                                .boolean()
                                .not_null()
                                .default(true),
                        )
                        .col(
                            ColumnDef::new(Alias::new("status"))
                                .string_len(32)
                                .not_null()
                                .default("pending"),
                        )
                        .col(
                            ColumnDef::new(Alias::new("registrar_domain_id"))
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("cloudflare_zone_id"))
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("cloudflare_record_id"))
                                .string()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("cloudflare_proxied"))
                                .boolean()
                                .not_null()
                                .default(false),
                        )
                        .col(ColumnDef::new(Alias::new("caddy_route_id")).string().null())
                        .col(
                            ColumnDef::new(Alias::new("target_nameservers"))
                                .text()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("last_verified_at"))
                                .timestamp_with_time_zone()
                                .null(),
                        )
                        .col(
                            ColumnDef::new(Alias::new("error_log"))
                                .text()
                                .not_null()
                                .default("[]"),
                        )
                        .foreign_key(
                            ForeignKey::create()
                                .name("fk_domain_records_tenant_id")
                                .from(Alias::new("domain_records"), Alias::new("tenant_id"))
                                .to(Alias::new("tenants"), Alias::new("id"))
                                .on_delete(ForeignKeyAction::Cascade),
                        ),
                )
                .to_owned(),
            )
            .await?;

        // Scheduler scans non-terminal records by status and age
        manager
            .create_index(
                Index::create()
                    .name("idx_domain_records_status_updated_at")
                    .table(Alias::new("domain_records"))
                    .col(Alias::new("status"))
                    .col(Alias::new("updated_at"))
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Alias::new("scheduler_state"))
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Alias::new("job"))
                            .string()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("last_run_at"))
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_table(
                Table::create()
                    .table(Alias::new("audit_logs"))
                    .if_not_exists()
                    .col(&mut id_column())
                    .col(
                        ColumnDef::new(Alias::new("operation_type"))
                            .string()
                            .not_null(),
                    )
                    .col(ColumnDef::new(Alias::new("customer_id")).integer().null())
                    .col(ColumnDef::new(Alias::new("tenant_id")).integer().null())
                    .col(ColumnDef::new(Alias::new("ip_address")).string().null())
                    .col(
                        ColumnDef::new(Alias::new("user_agent"))
                            .string()
                            .not_null()
                            .default(""),
                    )
                    .col(ColumnDef::new(Alias::new("data")).text().not_null())
                    .col(
                        ColumnDef::new(Alias::new("audit_date"))
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(Alias::new("created_at"))
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_audit_logs_tenant_id")
                    .table(Alias::new("audit_logs"))
                    .col(Alias::new("tenant_id"))
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        for table in [
            "audit_logs",
            "scheduler_state",
            "domain_records",
            "tenants",
            "customers",
        ] {
            manager
                .drop_table(Table::drop().table(Alias::new(table)).if_exists().to_owned())
                .await?;
        }

        Ok(())
    }
}
