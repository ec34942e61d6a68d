#![allow(dead_code)]

use reqwest::StatusCode;
use rust_upload_client::api::client::{ApiRequest, ApiResponse, HttpClient, RequestBody};
use rust_upload_client::api::error::ClientError;
use rust_upload_client::config::ClientConfig;
use rust_upload_client::models::{FileRef, RemoteStatus, TokenPair};
use rust_upload_client::services::session::AuthSession;
use rust_upload_client::{ClientState, create_client};
use serde_json::json;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub const REFRESH: &str = "/auth/refresh";
pub const UPLOAD: &str = "/documents/upload";
pub const LOGIN: &str = "/auth/login";
pub const LOGOUT: &str = "/auth/logout";
pub const PASSWORD: &str = "correct-horse";

pub fn status_path(document_id: &str) -> String {
    format!("/documents/{}/status", document_id)
}

/// Document id the mock assigns to an uploaded file.
pub fn document_id_for(file_name: &str) -> String {
    format!("doc-{}", file_name)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedCall {
    pub method: String,
    pub path: String,
    pub bearer: Option<String>,
}

/// One scripted answer to a status check.
#[derive(Debug, Clone)]
pub enum StatusReply {
    Status(RemoteStatus),
    Failed(String),
    TransportError,
    ServerError,
}

#[derive(Debug, Default)]
struct MockState {
    /// Bearer the protected endpoints accept; `None` rejects every bearer.
    valid_access: Option<String>,
    valid_refresh: Option<String>,
    generation: u32,
    /// Protected endpoints answer 401 no matter what.
    deny_all: bool,
    refresh_delay: Duration,
    upload_delay: Duration,
    status_delays: HashMap<String, Duration>,
    calls: Vec<RecordedCall>,
    upload_failures: HashMap<String, StatusCode>,
    status_scripts: HashMap<String, VecDeque<StatusReply>>,
}

/// In-process stand-in for the document API.
///
/// Tokens rotate on refresh (`access-2`, `refresh-2`, ...). Uploaded files
/// get the id `doc-<file name>`; status checks for an unscripted document,
/// or past the end of its script, answer `pending`.
#[derive(Debug)]
pub struct MockApi {
    state: Mutex<MockState>,
}

impl MockApi {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(MockState {
                valid_access: Some("access-1".to_string()),
                valid_refresh: Some("refresh-1".to_string()),
                generation: 1,
                ..MockState::default()
            }),
        })
    }

    pub fn session() -> Arc<AuthSession> {
        Arc::new(AuthSession::with_tokens(TokenPair::new("access-1", "refresh-1")))
    }

    /// The access token everyone holds stops being accepted.
    pub fn expire_access(&self) {
        self.state.lock().unwrap().valid_access = None;
    }

    pub fn revoke_refresh(&self) {
        self.state.lock().unwrap().valid_refresh = None;
    }

    pub fn deny_all(&self) {
        self.state.lock().unwrap().deny_all = true;
    }

    pub fn set_refresh_delay(&self, delay: Duration) {
        self.state.lock().unwrap().refresh_delay = delay;
    }

    pub fn set_upload_delay(&self, delay: Duration) {
        self.state.lock().unwrap().upload_delay = delay;
    }

    /// Holds back status checks for one document (request and retry alike).
    pub fn set_status_delay(&self, document_id: &str, delay: Duration) {
        self.state
            .lock()
            .unwrap()
            .status_delays
            .insert(status_path(document_id), delay);
    }

    pub fn fail_upload(&self, file_name: &str, status: StatusCode) {
        self.state
            .lock()
            .unwrap()
            .upload_failures
            .insert(file_name.to_string(), status);
    }

    pub fn script_status(&self, document_id: &str, replies: Vec<StatusReply>) {
        self.state
            .lock()
            .unwrap()
            .status_scripts
            .insert(document_id.to_string(), replies.into());
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn calls_to(&self, path: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .calls
            .iter()
            .filter(|c| c.path == path)
            .count()
    }

    fn respond(&self, request: &ApiRequest) -> Result<ApiResponse, ClientError> {
        let mut state = self.state.lock().unwrap();

        if request.path == REFRESH {
            let presented = match &request.body {
                RequestBody::Json(body) => body["refresh_token"].as_str().map(str::to_string),
                _ => None,
            };
            if presented.is_none() || presented != state.valid_refresh {
                return Ok(reply(StatusCode::UNAUTHORIZED, json!({"detail": "Invalid refresh token"})));
            }
            state.generation += 1;
            let access = format!("access-{}", state.generation);
            let refresh = format!("refresh-{}", state.generation);
            state.valid_access = Some(access.clone());
            state.valid_refresh = Some(refresh.clone());
            return Ok(reply(
                StatusCode::OK,
                json!({
                    "access_token": access,
                    "refresh_token": refresh,
                    "token_type": "bearer",
                    "expires_in": 3600
                }),
            ));
        }

        if request.path == LOGIN {
            let accepted = match &request.body {
                RequestBody::Form(fields) => fields.iter().any(|(k, v)| k == "password" && v == PASSWORD),
                _ => false,
            };
            if !accepted {
                return Ok(reply(
                    StatusCode::UNAUTHORIZED,
                    json!({"detail": "Incorrect email or password"}),
                ));
            }
            state.generation += 1;
            let access = format!("access-{}", state.generation);
            let refresh = format!("refresh-{}", state.generation);
            state.valid_access = Some(access.clone());
            state.valid_refresh = Some(refresh.clone());
            return Ok(reply(
                StatusCode::OK,
                json!({"access_token": access, "refresh_token": refresh, "token_type": "bearer"}),
            ));
        }

        if state.deny_all || request.bearer.is_none() || request.bearer != state.valid_access {
            return Ok(reply(
                StatusCode::UNAUTHORIZED,
                json!({"detail": "Could not validate credentials"}),
            ));
        }

        if request.path == LOGOUT {
            state.valid_access = None;
            state.valid_refresh = None;
            return Ok(reply(StatusCode::OK, json!({"message": "Logged out"})));
        }

        if request.path == UPLOAD {
            let RequestBody::Multipart(form) = &request.body else {
                return Ok(reply(StatusCode::UNPROCESSABLE_ENTITY, json!({"detail": "file required"})));
            };
            if let Some(progress) = &form.progress {
                progress.report(form.file.size / 2, form.file.size);
                progress.report(form.file.size, form.file.size);
            }
            if let Some(status) = state.upload_failures.get(&form.file.name) {
                return Ok(reply(*status, json!({"detail": "Upload rejected"})));
            }
            return Ok(reply(StatusCode::OK, json!({"id": document_id_for(&form.file.name)})));
        }

        if let Some(document_id) = request
            .path
            .strip_prefix("/documents/")
            .and_then(|rest| rest.strip_suffix("/status"))
        {
            let next = state
                .status_scripts
                .get_mut(document_id)
                .and_then(|script| script.pop_front())
                .unwrap_or(StatusReply::Status(RemoteStatus::Pending));
            return match next {
                StatusReply::Status(status) => Ok(reply(
                    StatusCode::OK,
                    json!({"document_id": document_id, "status": status}),
                )),
                StatusReply::Failed(reason) => Ok(reply(
                    StatusCode::OK,
                    json!({"document_id": document_id, "status": "failed", "error": reason}),
                )),
                StatusReply::TransportError => {
                    Err(ClientError::Network("connection reset by peer".to_string()))
                }
                StatusReply::ServerError => Ok(reply(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    json!({"detail": "Internal Server Error"}),
                )),
            };
        }

        Ok(reply(StatusCode::NOT_FOUND, json!({"detail": "Not Found"})))
    }
}

#[async_trait::async_trait]
impl HttpClient for MockApi {
    async fn execute(&self, request: ApiRequest) -> Result<ApiResponse, ClientError> {
        let delay = {
            let mut state = self.state.lock().unwrap();
            state.calls.push(RecordedCall {
                method: request.method.to_string(),
                path: request.path.clone(),
                bearer: request.bearer.clone(),
            });
            match request.path.as_str() {
                REFRESH => state.refresh_delay,
                UPLOAD => state.upload_delay,
                path => state.status_delays.get(path).copied().unwrap_or_default(),
            }
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        self.respond(&request)
    }
}

fn reply(status: StatusCode, body: serde_json::Value) -> ApiResponse {
    ApiResponse::new(status, body.to_string())
}

pub fn test_config(max_poll_attempts: u32) -> ClientConfig {
    ClientConfig {
        poll_grace_ms: 1000,
        poll_interval_ms: 500,
        max_poll_attempts,
        ..ClientConfig::default()
    }
}

pub fn client(mock: &Arc<MockApi>, session: Arc<AuthSession>, max_poll_attempts: u32) -> ClientState {
    create_client(mock.clone(), session, test_config(max_poll_attempts))
}

pub fn pdf(name: &str) -> FileRef {
    FileRef::new(name, "application/pdf", bytes::Bytes::from_static(b"%PDF-1.7 test document"))
}
