use super::auth::ApiTokenAuth;
use super::types::{
    CheckAvailabilityRequest, CheckAvailabilityResponse, CreateFreeTenantRequest,
    CreateFreeTenantResponse, CustomDomainBody, CustomDomainResponse, DeleteSecureRequest,
    DeleteSecureResponse, DomainAppState, DomainRecordResponse, PurgeRequest, SuccessResponse,
    TenantRecordsResponse, TenantStatusResponse,
};
use crate::{CustomDomainRequest, DomainError, FreeTenantRequest, UnavailableReason};
use tenantry_core::envelope::ErrorEnvelope;
use tenantry_core::error_builder::{
    bad_gateway, bad_request, conflict, internal_server_error, not_found, unauthorized,
};
use tenantry_core::{ApiError, RequestContext};
use tenantry_entities::types::{DomainStatus, ErrorLogEntry};

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use utoipa::openapi::security::{Http, HttpAuthScheme, SecurityScheme};
use utoipa::{Modify, OpenApi};

impl From<DomainError> for ApiError {
    fn from(error: DomainError) -> Self {
        let code = error.error_code();
        match error {
            DomainError::Validation(msg) => bad_request().message(msg).build(),
            DomainError::AvailabilityConflict { domain, reason } => conflict()
                .message(format!("{} is not available", domain))
                .value("error_code", code)
                .value("reason", reason)
                .build(),
            DomainError::Unauthorized => unauthorized()
                .message("Invalid credentials")
                .value("error_code", code)
                .build(),
            DomainError::NotFound(msg) => not_found().message(msg).build(),
            DomainError::InvalidTransition { from, to } => conflict()
                .message(format!("Domain is {} and cannot move to {}", from, to))
                .value("error_code", code)
                .build(),
            DomainError::InvalidState(msg) => conflict()
                .message(msg)
                .value("error_code", code)
                .build(),
            DomainError::RegistrarLock(detail) => {
                warn!("Registrar refused a nameserver change: {}", detail);
                conflict()
                    .message("The registrar refused the nameserver change while the domain is locked or still registering")
                    .value("error_code", code)
                    .build()
            }
            DomainError::Registrar(e) => {
                error!("Registrar call failed: {}", e);
                bad_gateway()
                    .message("The domain registrar could not complete the request")
                    .value("error_code", code)
                    .build()
            }
            DomainError::DnsProvider(e) => {
                error!("DNS provider call failed: {}", e);
                bad_gateway()
                    .message("The DNS provider could not complete the request")
                    .value("error_code", code)
                    .build()
            }
            DomainError::ProxyConfig(e) => {
                error!("Reverse proxy call failed: {}", e);
                bad_gateway()
                    .message("The reverse proxy could not be configured")
                    .value("error_code", code)
                    .build()
            }
            DomainError::Database(e) => {
                error!("Database error: {}", e);
                internal_server_error().build()
            }
            DomainError::Internal(msg) => {
                error!("Internal error: {}", msg);
                internal_server_error().build()
            }
        }
    }
}

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        let mut http_scheme = Http::new(HttpAuthScheme::Bearer);
        http_scheme.description =
            Some("Platform API token. Use format: `Bearer <token>`.".to_string());

        let components = openapi.components.get_or_insert_with(Default::default);
        components.add_security_scheme("bearer_auth", SecurityScheme::Http(http_scheme));
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        create_free_tenant,
        check_availability,
        get_tenant_records,
        delete_secure,
        reconfigure_tenant,
        get_tenant_status,
        add_custom_domain,
        purge_tenant
    ),
    components(
        schemas(
            CreateFreeTenantRequest,
            CreateFreeTenantResponse,
            CheckAvailabilityRequest,
            CheckAvailabilityResponse,
            DeleteSecureRequest,
            DeleteSecureResponse,
            PurgeRequest,
            SuccessResponse,
            TenantStatusResponse,
            CustomDomainBody,
            CustomDomainResponse,
            DomainRecordResponse,
            TenantRecordsResponse,
            DomainStatus,
            ErrorLogEntry,
            UnavailableReason,
            ErrorEnvelope
        )
    ),
    modifiers(&SecurityAddon),
    info(
        title = "Domain Manager API",
        description = "Provisioning and lifecycle of tenant domains. \
        Creates free subdomains, attaches custom domains and tears sites down again.",
        version = "1.0.0"
    ),
    tags(
        (name = "Domain Manager", description = "Tenant domain provisioning endpoints")
    )
)]
pub struct DomainManagerApiDoc;

/// Provision a free subdomain site
///
/// Creates the customer (or reuses an existing one after checking the
/// password), the tenant and its domain record, then configures DNS and the
/// reverse proxy. Any failure undoes the steps already applied.
#[utoipa::path(
    post,
    path = "/domain-manager/create-free",
    request_body = CreateFreeTenantRequest,
    responses(
        (status = 201, description = "Site is live", body = CreateFreeTenantResponse),
        (status = 400, description = "Invalid input", body = ErrorEnvelope),
        (status = 401, description = "Missing API token or wrong password", body = ErrorEnvelope),
        (status = 409, description = "Subdomain not available", body = ErrorEnvelope),
        (status = 502, description = "A control plane failed", body = ErrorEnvelope),
        (status = 500, description = "Internal server error", body = ErrorEnvelope)
    ),
    tag = "Domain Manager",
    security(
        ("bearer_auth" = [])
    )
)]
async fn create_free_tenant(
    _auth: ApiTokenAuth,
    State(app_state): State<Arc<DomainAppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateFreeTenantRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = RequestContext::from_headers(&headers);
    let provisioned = app_state
        .orchestrator
        .provision_free_tenant(
            &ctx,
            FreeTenantRequest {
                subdomain: request.subdomain,
                customer_name: request.customer_name,
                customer_email: request.customer_email,
                customer_password: request.customer_password,
                send_welcome_email: request.send_welcome_email,
            },
        )
        .await?;

    info!(
        "Provisioned {} for tenant {}",
        provisioned.domain, provisioned.tenant_id
    );
    Ok((
        StatusCode::CREATED,
        Json(CreateFreeTenantResponse {
            success: true,
            domain: provisioned.domain,
            tenant_id: provisioned.tenant_id,
        }),
    ))
}

/// Check whether a subdomain can be claimed
///
/// Pure read. A positive answer does not reserve the name.
#[utoipa::path(
    post,
    path = "/domain-manager/check-availability",
    request_body = CheckAvailabilityRequest,
    responses(
        (status = 200, description = "Availability verdict", body = CheckAvailabilityResponse),
        (status = 502, description = "DNS provider lookup failed", body = ErrorEnvelope)
    ),
    tag = "Domain Manager"
)]
async fn check_availability(
    State(app_state): State<Arc<DomainAppState>>,
    Json(request): Json<CheckAvailabilityRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let result = app_state
        .orchestrator
        .check_availability(&request.subdomain)
        .await?;

    Ok(Json(CheckAvailabilityResponse {
        success: true,
        subdomain: result.subdomain,
        domain: result.domain,
        available: result.available,
        reason: result.reason,
    }))
}

/// Persisted domain records of a tenant
///
/// Returns status, correlation ids and the error log without probing any
/// external system.
#[utoipa::path(
    get,
    path = "/domain-manager/{id}",
    params(
        ("id" = i32, Path, description = "Tenant ID")
    ),
    responses(
        (status = 200, description = "Tenant records", body = TenantRecordsResponse),
        (status = 401, description = "Missing or invalid API token", body = ErrorEnvelope),
        (status = 404, description = "Tenant not found", body = ErrorEnvelope)
    ),
    tag = "Domain Manager",
    security(
        ("bearer_auth" = [])
    )
)]
async fn get_tenant_records(
    _auth: ApiTokenAuth,
    State(app_state): State<Arc<DomainAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let records = app_state.orchestrator.records(tenant_id).await?;

    Ok(Json(TenantRecordsResponse {
        success: true,
        tenant_id: records.tenant.id,
        domain: records.tenant.domain,
        is_deleted: records.tenant.is_deleted,
        records: records
            .records
            .into_iter()
            .map(DomainRecordResponse::from)
            .collect(),
    }))
}

/// Deprovision a tenant
///
/// Requires the owner's password. Removes the proxy route first, then the
/// DNS record unless `deleteFromCloudflare` is false, then soft-deletes the
/// tenant.
#[utoipa::path(
    post,
    path = "/domain-manager/{id}/delete-secure",
    params(
        ("id" = i32, Path, description = "Tenant ID")
    ),
    request_body = DeleteSecureRequest,
    responses(
        (status = 200, description = "Tenant deprovisioned", body = DeleteSecureResponse),
        (status = 401, description = "Missing API token or wrong password", body = ErrorEnvelope),
        (status = 404, description = "Tenant not found", body = ErrorEnvelope),
        (status = 502, description = "Proxy route could not be removed", body = ErrorEnvelope)
    ),
    tag = "Domain Manager",
    security(
        ("bearer_auth" = [])
    )
)]
async fn delete_secure(
    _auth: ApiTokenAuth,
    State(app_state): State<Arc<DomainAppState>>,
    Path(tenant_id): Path<i32>,
    headers: HeaderMap,
    Json(request): Json<DeleteSecureRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = RequestContext::from_headers(&headers);
    let outcome = app_state
        .orchestrator
        .deprovision(
            &ctx,
            tenant_id,
            &request.password,
            request.delete_from_cloudflare,
        )
        .await?;

    Ok(Json(DeleteSecureResponse {
        success: true,
        message: outcome.message,
        dns_cleanup_failed: outcome.dns_cleanup_failed,
    }))
}

/// Re-apply the tenant's proxy routes
///
/// Idempotent. Never touches DNS or the registrar.
#[utoipa::path(
    post,
    path = "/domain-manager/{id}/reconfigure",
    params(
        ("id" = i32, Path, description = "Tenant ID")
    ),
    responses(
        (status = 200, description = "Routes applied", body = SuccessResponse),
        (status = 401, description = "Missing or invalid API token", body = ErrorEnvelope),
        (status = 404, description = "Tenant not found", body = ErrorEnvelope),
        (status = 502, description = "Reverse proxy unreachable", body = ErrorEnvelope)
    ),
    tag = "Domain Manager",
    security(
        ("bearer_auth" = [])
    )
)]
async fn reconfigure_tenant(
    _auth: ApiTokenAuth,
    State(app_state): State<Arc<DomainAppState>>,
    Path(tenant_id): Path<i32>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = RequestContext::from_headers(&headers);
    let applied = app_state.orchestrator.reconfigure(&ctx, tenant_id).await?;
    debug!("Re-applied {} route(s) for tenant {}", applied, tenant_id);

    Ok(Json(SuccessResponse { success: true }))
}

/// Live status of a tenant's site
///
/// Probes the domain over HTTPS. Never changes stored state.
#[utoipa::path(
    get,
    path = "/domain-manager/{id}/status",
    params(
        ("id" = i32, Path, description = "Tenant ID")
    ),
    responses(
        (status = 200, description = "Live status", body = TenantStatusResponse),
        (status = 404, description = "Tenant not found", body = ErrorEnvelope),
        (status = 502, description = "Reverse proxy unreachable", body = ErrorEnvelope)
    ),
    tag = "Domain Manager"
)]
async fn get_tenant_status(
    State(app_state): State<Arc<DomainAppState>>,
    Path(tenant_id): Path<i32>,
) -> Result<impl IntoResponse, ApiError> {
    let status = app_state.orchestrator.status(tenant_id).await?;

    Ok(Json(TenantStatusResponse {
        success: true,
        domain: status.domain,
        caddy_status: status.caddy_status,
        route_exists: status.route_exists,
        domain_responds: status.domain_responds,
        ssl_valid: status.ssl_valid,
        http_code: status.http_code,
    }))
}

/// Attach a customer-owned domain
///
/// The record waits in `ns_pending` until the domain's live nameservers
/// match the returned targets. Registrar-managed domains get the nameservers
/// pushed right away when the registrar allows it.
#[utoipa::path(
    post,
    path = "/domain-manager/{id}/custom-domain",
    params(
        ("id" = i32, Path, description = "Tenant ID")
    ),
    request_body = CustomDomainBody,
    responses(
        (status = 201, description = "Domain recorded, waiting for delegation", body = CustomDomainResponse),
        (status = 400, description = "Invalid domain", body = ErrorEnvelope),
        (status = 401, description = "Missing or invalid API token", body = ErrorEnvelope),
        (status = 409, description = "Domain taken or registrar lock", body = ErrorEnvelope),
        (status = 502, description = "Registrar failed", body = ErrorEnvelope)
    ),
    tag = "Domain Manager",
    security(
        ("bearer_auth" = [])
    )
)]
async fn add_custom_domain(
    _auth: ApiTokenAuth,
    State(app_state): State<Arc<DomainAppState>>,
    Path(tenant_id): Path<i32>,
    headers: HeaderMap,
    Json(request): Json<CustomDomainBody>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = RequestContext::from_headers(&headers);
    let record = app_state
        .orchestrator
        .provision_custom_domain(
            &ctx,
            tenant_id,
            CustomDomainRequest {
                domain: request.domain,
                registrar_domain_id: request.registrar_domain_id,
            },
        )
        .await?;

    let target_nameservers = record.target_nameservers();
    Ok((
        StatusCode::CREATED,
        Json(CustomDomainResponse {
            success: true,
            domain: record.domain,
            status: record.status,
            target_nameservers,
        }),
    ))
}

/// Hard-delete a deprovisioned tenant
///
/// Only allowed once every domain record is `deleted`. Removes the customer
/// too when no other tenant remains.
#[utoipa::path(
    post,
    path = "/domain-manager/{id}/purge",
    params(
        ("id" = i32, Path, description = "Tenant ID")
    ),
    request_body = PurgeRequest,
    responses(
        (status = 200, description = "Tenant purged", body = SuccessResponse),
        (status = 401, description = "Missing API token or wrong password", body = ErrorEnvelope),
        (status = 404, description = "Tenant not found", body = ErrorEnvelope),
        (status = 409, description = "Tenant not fully deprovisioned", body = ErrorEnvelope)
    ),
    tag = "Domain Manager",
    security(
        ("bearer_auth" = [])
    )
)]
async fn purge_tenant(
    _auth: ApiTokenAuth,
    State(app_state): State<Arc<DomainAppState>>,
    Path(tenant_id): Path<i32>,
    headers: HeaderMap,
    Json(request): Json<PurgeRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let ctx = RequestContext::from_headers(&headers);
    app_state
        .orchestrator
        .purge(&ctx, tenant_id, &request.password)
        .await?;

    Ok(Json(SuccessResponse { success: true }))
}

/// Kick off a reconciliation pass once the response is ready. The pass is
/// gated, so most requests return without doing anything.
async fn reconcile_after_request(
    State(app_state): State<Arc<DomainAppState>>,
    request: Request,
    next: Next,
) -> Response {
    let response = next.run(request).await;

    let scheduler = app_state.scheduler.clone();
    tokio::spawn(async move {
        match scheduler.maybe_run().await {
            Ok(Some(report)) => debug!("Request-triggered reconciliation: {:?}", report),
            Ok(None) => {}
            Err(e) => warn!("Request-triggered reconciliation failed: {}", e),
        }
    });

    response
}

pub fn configure_routes() -> Router<Arc<DomainAppState>> {
    Router::new()
        .route("/domain-manager/create-free", post(create_free_tenant))
        .route("/domain-manager/check-availability", post(check_availability))
        .route("/domain-manager/{id}", get(get_tenant_records))
        .route("/domain-manager/{id}/delete-secure", post(delete_secure))
        .route("/domain-manager/{id}/reconfigure", post(reconfigure_tenant))
        .route("/domain-manager/{id}/status", get(get_tenant_status))
        .route("/domain-manager/{id}/custom-domain", post(add_custom_domain))
        .route("/domain-manager/{id}/purge", post(purge_tenant))
}

/// Routes with the request-tail reconciliation trigger, ready to serve.
pub fn create_router(app_state: Arc<DomainAppState>) -> Router {
    configure_routes()
        .layer(middleware::from_fn_with_state(
            app_state.clone(),
            reconcile_after_request,
        ))
        .with_state(app_state)
}
