//! Server initialization and routing

use crate::api;
use crate::config::Config;
use crate::middleware::PrincipalTokenReader;
use crate::repository::{
    identity::IdentityRepositoryImpl, organization::OrganizationRepositoryImpl,
    resource::ResourceRepositoryImpl,
};
use crate::resolver::{DirectoryView, IdentityResolver, PrincipalResolver};
use crate::service::{IdentityService, OrganizationService, ProvisioningService, ResourceService};
use crate::state::HasServices;
use anyhow::Result;
use axum::{
    routing::{get, post, put},
    Router,
};
use sqlx::{mysql::MySqlPoolOptions, MySqlPool};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub db_pool: MySqlPool,
    pub token_reader: PrincipalTokenReader,
    pub resolver: IdentityResolver<IdentityRepositoryImpl>,
    pub identity_service: Arc<IdentityService<IdentityRepositoryImpl, ResourceRepositoryImpl>>,
    pub organization_service: Arc<OrganizationService<OrganizationRepositoryImpl>>,
    pub resource_service: Arc<ResourceService<ResourceRepositoryImpl, IdentityRepositoryImpl>>,
    pub provisioning_service:
        Arc<ProvisioningService<IdentityRepositoryImpl, OrganizationRepositoryImpl>>,
}

impl AppState {
    /// Wire repositories and services over one pool.
    pub fn new(config: Config, db_pool: MySqlPool) -> Self {
        let identity_repo = Arc::new(IdentityRepositoryImpl::new(db_pool.clone()));
        let organization_repo = Arc::new(OrganizationRepositoryImpl::new(db_pool.clone()));
        let resource_repo = Arc::new(ResourceRepositoryImpl::new(db_pool.clone()));

        let resolver = IdentityResolver::new(identity_repo.clone());
        let shared_resolver: Arc<dyn PrincipalResolver> = Arc::new(resolver.clone());

        let identity_service = Arc::new(IdentityService::new(
            identity_repo.clone(),
            resource_repo.clone(),
            shared_resolver.clone(),
        ));
        let organization_service = Arc::new(OrganizationService::new(
            organization_repo.clone(),
            shared_resolver.clone(),
        ));
        let resource_service = Arc::new(ResourceService::new(
            resource_repo,
            identity_repo.clone(),
            shared_resolver,
        ));
        let provisioning_service = Arc::new(ProvisioningService::new(
            identity_repo,
            organization_repo,
            config.provisioning.clone(),
        ));

        Self {
            token_reader: PrincipalTokenReader::new(&config.auth),
            config: Arc::new(config),
            db_pool,
            resolver,
            identity_service,
            organization_service,
            resource_service,
            provisioning_service,
        }
    }

    /// Read-only identity surface for collaborators outside the policy layer
    pub fn directory(&self) -> &impl DirectoryView {
        &self.resolver
    }
}

impl HasServices for AppState {
    type IdentityRepo = IdentityRepositoryImpl;
    type OrganizationRepo = OrganizationRepositoryImpl;
    type ResourceRepo = ResourceRepositoryImpl;

    fn config(&self) -> &Config {
        &self.config
    }

    fn token_reader(&self) -> &PrincipalTokenReader {
        &self.token_reader
    }

    fn identity_service(&self) -> &IdentityService<Self::IdentityRepo, Self::ResourceRepo> {
        &self.identity_service
    }

    fn organization_service(&self) -> &OrganizationService<Self::OrganizationRepo> {
        &self.organization_service
    }

    fn resource_service(&self) -> &ResourceService<Self::ResourceRepo, Self::IdentityRepo> {
        &self.resource_service
    }

    fn provisioning_service(
        &self,
    ) -> &ProvisioningService<Self::IdentityRepo, Self::OrganizationRepo> {
        &self.provisioning_service
    }
}

/// Run the HTTP server
pub async fn run(config: Config) -> Result<()> {
    let db_pool = MySqlPoolOptions::new()
        .max_connections(config.database.max_connections)
        .min_connections(config.database.min_connections)
        .connect(&config.database.url)
        .await?;

    info!("Connected to database");

    let http_addr = config.http_addr();
    let state = AppState::new(config, db_pool);
    let app = build_router(state);

    let listener = TcpListener::bind(&http_addr).await?;
    info!("HTTP server started on {}", http_addr);
    axum::serve(listener, app).await?;

    Ok(())
}

/// Build the HTTP router with generic state type
///
/// Generic over the state so handler tests can run against mock repositories.
pub fn build_router<S: HasServices>(state: S) -> Router {
    Router::new()
        // Signup events from the authentication boundary
        .route("/api/v1/auth/events", post(api::auth_event::receive::<S>))
        // Identity endpoints
        .route("/api/v1/me", get(api::identity::me::<S>))
        .route(
            "/api/v1/identities",
            get(api::identity::list::<S>).post(api::identity::create::<S>),
        )
        .route(
            "/api/v1/identities/{id}",
            get(api::identity::get::<S>)
                .patch(api::identity::update_profile::<S>)
                .delete(api::identity::delete::<S>),
        )
        .route(
            "/api/v1/identities/{id}/assignment",
            put(api::identity::reassign::<S>),
        )
        // Organization endpoints
        .route(
            "/api/v1/organizations",
            get(api::organization::list::<S>).post(api::organization::create::<S>),
        )
        .route(
            "/api/v1/organizations/{id}",
            get(api::organization::get::<S>)
                .put(api::organization::update::<S>)
                .delete(api::organization::delete::<S>),
        )
        // Protected resource endpoints
        .route(
            "/api/v1/resources/{kind}",
            get(api::resource::list::<S>).post(api::resource::create::<S>),
        )
        .route(
            "/api/v1/resources/{kind}/{id}",
            get(api::resource::get::<S>)
                .put(api::resource::update::<S>)
                .delete(api::resource::delete::<S>),
        )
        .route(
            "/api/v1/resources/{kind}/{id}/workflow",
            put(api::resource::update_workflow::<S>),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
