use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use relforge_local_deployment::LocalDeployment;
use relforge_server::routes::router;
use relforge_services::{
    HttpInternalForgeClient, HttpPackageServiceClient, HttpReviewForgeClient, InternalForgeClient,
    LocalToolchain, PackageServiceClient, ReviewForgeClient, DEFAULT_CRP_BASE_URL,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    relforge_utils::tracing_init::init();

    let db_path = env::var("RELFORGE_DB_PATH").unwrap_or_else(|_| "relforge.db".to_string());
    let pool = relforge_db::connect(&PathBuf::from(db_path)).await?;

    let review_forge: Option<Arc<dyn ReviewForgeClient>> =
        match (env::var("REVIEW_FORGE_BASE_URL"), env::var("REVIEW_FORGE_TOKEN")) {
            (Ok(base_url), Ok(token)) => Some(Arc::new(HttpReviewForgeClient::new(base_url, token))),
            _ => None,
        };

    let internal_forge: Option<Arc<dyn InternalForgeClient>> = match (
        env::var("INTERNAL_FORGE_BASE_URL"),
        env::var("INTERNAL_FORGE_USERNAME"),
        env::var("INTERNAL_FORGE_PASSWORD"),
    ) {
        (Ok(base_url), Ok(username), Ok(password)) => {
            Some(Arc::new(HttpInternalForgeClient::new(base_url, username, password)))
        }
        _ => None,
    };

    let package_service_base_url =
        env::var("PACKAGE_SERVICE_BASE_URL").unwrap_or_else(|_| DEFAULT_CRP_BASE_URL.to_string());
    let package_service: Arc<dyn PackageServiceClient> =
        Arc::new(HttpPackageServiceClient::new(package_service_base_url));

    let local_toolchain = Arc::new(LocalToolchain::new());

    let deployment = LocalDeployment::new(pool, review_forge, internal_forge, package_service, local_toolchain);
    deployment.recover().await;

    let app = router(deployment);

    let addr: SocketAddr = env::var("RELFORGE_LISTEN_ADDR")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;

    tracing::info!(%addr, "relforge-server listening");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
