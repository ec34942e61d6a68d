pub mod api;
pub mod config;
pub mod models;
pub mod services;
pub mod utils;

use crate::api::client::HttpClient;
use crate::api::error::ClientError;
use crate::api::middleware::auth::TokenGuard;
use crate::api::reqwest_client::ReqwestClient;
use crate::config::ClientConfig;
use crate::services::auth_service::AuthService;
use crate::services::session::AuthSession;
use crate::services::upload_coordinator::UploadCoordinator;
use std::sync::Arc;

/// Everything a front end needs, wired around one session.
#[derive(Clone)]
pub struct ClientState {
    pub session: Arc<AuthSession>,
    /// Authenticated client: every call goes through the token guard.
    pub http: Arc<dyn HttpClient>,
    pub auth: Arc<AuthService>,
    pub uploads: UploadCoordinator,
    pub config: ClientConfig,
}

/// Composes the transport, the token guard and the coordinator.
pub fn create_client(
    transport: Arc<dyn HttpClient>,
    session: Arc<AuthSession>,
    config: ClientConfig,
) -> ClientState {
    let http: Arc<dyn HttpClient> = Arc::new(TokenGuard::new(transport.clone(), session.clone()));
    let auth = Arc::new(AuthService::new(transport, session.clone()));
    let uploads = UploadCoordinator::new(http.clone(), config.upload_rules(), config.poll_policy());

    ClientState {
        session,
        http,
        auth,
        uploads,
        config,
    }
}

/// `create_client` over the real HTTP transport.
pub fn connect(config: ClientConfig, session: Arc<AuthSession>) -> Result<ClientState, ClientError> {
    let transport: Arc<dyn HttpClient> = Arc::new(ReqwestClient::from_config(&config)?);
    Ok(create_client(transport, session, config))
}
