use crate::api::client::{ApiRequest, HttpClient};
use crate::api::error::ClientError;
use crate::models::TokenPair;
use crate::services::session::{AuthSession, LogoutReason};
use std::sync::Arc;

pub const LOGIN_PATH: &str = "/auth/login";
pub const LOGOUT_PATH: &str = "/auth/logout";

/// Opens and closes sessions. Talks to the raw transport: neither call may
/// trigger a token refresh.
pub struct AuthService {
    transport: Arc<dyn HttpClient>,
    session: Arc<AuthSession>,
}

impl AuthService {
    pub fn new(transport: Arc<dyn HttpClient>, session: Arc<AuthSession>) -> Self {
        Self { transport, session }
    }

    /// OAuth2 password login; on success the session holds the new pair.
    pub async fn login(&self, email: &str, password: &str) -> Result<(), ClientError> {
        let fields = vec![
            ("username".to_string(), email.to_string()),
            ("password".to_string(), password.to_string()),
        ];

        let response = self
            .transport
            .execute(ApiRequest::post(LOGIN_PATH).form(fields))
            .await?;

        if response.is_unauthorized() {
            return Err(ClientError::Auth(response.error_message()));
        }

        let pair: TokenPair = response.error_for_status()?.json()?;
        self.session.establish(pair);
        tracing::info!("Logged in as {}", email);
        Ok(())
    }

    /// Tells the server (best effort) and ends the session locally either way.
    pub async fn logout(&self) {
        if let Some(token) = self.session.access_token() {
            let request = ApiRequest::post(LOGOUT_PATH).with_bearer(Some(token));
            if let Err(e) = self.transport.execute(request).await {
                tracing::debug!("Logout request failed, discarding tokens anyway: {}", e);
            }
        }
        self.session.end(LogoutReason::UserRequested);
    }
}
