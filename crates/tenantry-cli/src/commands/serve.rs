use clap::Args;
use tenantry_domains::{create_domain_app_state, create_router, DomainManagerApiDoc};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use super::platform::{Platform, PlatformArgs};

#[derive(Args)]
pub struct ServeCommand {
    /// Address to bind the server to
    #[arg(long, default_value = "127.0.0.1:3000", env = "TENANTRY_ADDRESS")]
    pub address: String,

    /// Bearer token required on mutating endpoints
    #[arg(long, env = "TENANTRY_API_TOKEN", hide_env_values = true)]
    pub api_token: Option<String>,

    #[command(flatten)]
    pub platform: PlatformArgs,
}

impl ServeCommand {
    pub fn execute(self) -> anyhow::Result<()> {
        let rt = tokio::runtime::Runtime::new()?;
        rt.block_on(self.run())
    }

    async fn run(self) -> anyhow::Result<()> {
        let platform = Platform::connect(&self.platform).await?;

        if self.api_token.as_deref().map_or(true, str::is_empty) {
            warn!("No API token configured, mutating endpoints are open");
        }

        // The ticker and request-triggered passes share the same gate
        tokio::spawn(platform.scheduler.clone().start());

        let app_state = create_domain_app_state(
            platform.orchestrator.clone(),
            platform.scheduler.clone(),
            self.api_token.clone(),
        );
        let app = create_router(app_state)
            .merge(
                SwaggerUi::new("/swagger-ui")
                    .url("/api-docs/openapi.json", DomainManagerApiDoc::openapi()),
            )
            .layer(TraceLayer::new_for_http());

        let listener = TcpListener::bind(&self.address).await?;
        info!("Tenantry API listening on {}", self.address);

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
        info!("Tenantry API exited");
        Ok(())
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
