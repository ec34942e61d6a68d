use crate::api::client::{ApiRequest, ApiResponse, HttpClient};
use crate::api::error::ClientError;
use crate::models::{RefreshRequest, TokenPair};
use crate::services::session::{AuthSession, LogoutReason};
use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use std::sync::Arc;
use tokio::sync::Mutex;

pub const REFRESH_PATH: &str = "/auth/refresh";

type RefreshFlight = Shared<BoxFuture<'static, Result<TokenPair, ClientError>>>;

/// Bearer-token middleware around another `HttpClient`.
///
/// Every request is sent with the session's current access token. A 401
/// triggers at most one refresh per failure window, shared by every request
/// that hit it, followed by exactly one retry of the original request.
pub struct TokenGuard {
    inner: Arc<dyn HttpClient>,
    session: Arc<AuthSession>,
    in_flight: Mutex<Option<RefreshFlight>>,
}

impl TokenGuard {
    pub fn new(inner: Arc<dyn HttpClient>, session: Arc<AuthSession>) -> Self {
        Self {
            inner,
            session,
            in_flight: Mutex::new(None),
        }
    }

    pub fn session(&self) -> &Arc<AuthSession> {
        &self.session
    }

    /// Joins the refresh already in flight, or starts one.
    async fn refresh(&self) -> Result<TokenPair, ClientError> {
        let flight = {
            let mut slot = self.in_flight.lock().await;
            match slot.as_ref() {
                Some(flight) => {
                    tracing::debug!("Joining in-flight token refresh");
                    flight.clone()
                }
                None => {
                    let flight = refresh_tokens(self.inner.clone(), self.session.clone())
                        .boxed()
                        .shared();
                    *slot = Some(flight.clone());
                    flight
                }
            }
        };

        let outcome = flight.clone().await;

        let mut slot = self.in_flight.lock().await;
        if slot.as_ref().is_some_and(|current| current.ptr_eq(&flight)) {
            *slot = None;
        }
        outcome
    }
}

#[async_trait::async_trait]
impl HttpClient for TokenGuard {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let sent_with = self.session.access_token();
        let response = self
            .inner
            .execute(request.clone().with_bearer(sent_with.clone()))
            .await?;

        if !response.is_unauthorized() {
            return Ok(response);
        }

        tracing::debug!("{} {} unauthorized, refreshing credentials", request.method, request.path);

        // Someone refreshed while this request was out: their token is newer than ours.
        let access_token = match self.session.access_token() {
            Some(current) if sent_with.as_ref() != Some(&current) => current,
            _ => self.refresh().await?.access_token,
        };

        let retried = self
            .inner
            .execute(request.clone().with_bearer(Some(access_token)))
            .await?;

        if retried.is_unauthorized() {
            let message = retried.error_message();
            tracing::warn!(
                "{} {} still unauthorized after refresh: {}",
                request.method,
                request.path,
                message
            );
            self.session.end(LogoutReason::RetryRejected);
            return Err(ClientError::Auth(message));
        }

        Ok(retried)
    }
}

/// One network refresh. Ends the session when the server turns the refresh
/// token down or none is held; transport failures leave the session intact.
/// The new pair is only stored if the session it was issued for is still open.
async fn refresh_tokens(
    client: Arc<dyn HttpClient>,
    session: Arc<AuthSession>,
) -> Result<TokenPair, ClientError> {
    let (refresh_token, episode) = session.refresh_grant();
    let Some(refresh_token) = refresh_token else {
        session.end(LogoutReason::MissingRefreshToken);
        return Err(ClientError::Auth(
            "Session expired and no refresh token is available".to_string(),
        ));
    };

    tracing::info!("Refreshing access token");
    let body = serde_json::to_value(RefreshRequest {
        refresh_token: &refresh_token,
    })?;
    let response = client
        .execute(ApiRequest::post(REFRESH_PATH).json(body))
        .await?;

    if !response.is_success() {
        let message = response.error_message();
        tracing::warn!("Token refresh rejected ({}): {}", response.status, message);
        session.end(LogoutReason::RefreshRejected);
        return Err(ClientError::Auth(format!("Token refresh rejected: {}", message)));
    }

    let pair: TokenPair = match response.json() {
        Ok(pair) => pair,
        Err(e) => {
            session.end(LogoutReason::RefreshRejected);
            return Err(ClientError::Auth(format!("Malformed token refresh response: {}", e)));
        }
    };

    if !session.store(&pair, episode) {
        tracing::warn!("Session ended while refreshing, discarding new tokens");
        return Err(ClientError::Auth(
            "Session ended while refreshing credentials".to_string(),
        ));
    }
    tracing::info!("Access token refreshed");
    Ok(pair)
}
