use crate::api::client::{ApiRequest, HttpClient};
use crate::api::error::ClientError;
use crate::models::{ProcessingStatusResponse, RemoteStatus};
use async_stream::stream;
use futures::Stream;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

/// Timing of status checks for one document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Delay before the first check, while the server starts ingesting.
    pub grace_period: Duration,
    pub interval: Duration,
    pub max_attempts: u32,
}

impl PollPolicy {
    /// Upper bound on how long a watcher can live, ignoring request latency.
    pub fn worst_case(&self) -> Duration {
        self.grace_period + self.interval * self.max_attempts.saturating_sub(1)
    }
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self {
            grace_period: Duration::from_secs(2),
            interval: Duration::from_secs(2),
            max_attempts: 30,
        }
    }
}

/// One report from a watcher. `Completed`, `Failed`, `TimedOut` and
/// `Unauthorized` are final: the stream ends right after them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// The server has the document but is not done with it.
    Waiting { attempt: u32, status: RemoteStatus },
    /// The check could not be made or understood; counts toward the cap.
    Missed { attempt: u32, reason: String },
    Completed { attempt: u32 },
    Failed { attempt: u32, reason: String },
    TimedOut { attempts: u32 },
    Unauthorized { reason: String },
}

impl WatchEvent {
    pub fn is_final(&self) -> bool {
        matches!(
            self,
            WatchEvent::Completed { .. }
                | WatchEvent::Failed { .. }
                | WatchEvent::TimedOut { .. }
                | WatchEvent::Unauthorized { .. }
        )
    }
}

/// Polls `GET /documents/{id}/status` until the document reaches a terminal
/// state, the attempt cap runs out, or the cancellation token fires.
pub struct ProcessWatcher {
    client: Arc<dyn HttpClient>,
    document_id: String,
    policy: PollPolicy,
    cancel: CancellationToken,
}

impl ProcessWatcher {
    pub fn new(
        client: Arc<dyn HttpClient>,
        document_id: impl Into<String>,
        policy: PollPolicy,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            client,
            document_id: document_id.into(),
            policy,
            cancel,
        }
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// Lazily runs the checks. Nothing is sent until the stream is polled,
    /// and once cancelled it yields nothing more and sends nothing more.
    pub fn watch(self) -> impl Stream<Item = WatchEvent> + Send + 'static {
        let Self {
            client,
            document_id,
            policy,
            cancel,
        } = self;

        stream! {
            let path = format!("/documents/{}/status", document_id);

            for attempt in 1..=policy.max_attempts {
                let delay = if attempt == 1 { policy.grace_period } else { policy.interval };
                if !pause(&cancel, delay).await {
                    tracing::debug!("Watcher for document {} cancelled", document_id);
                    return;
                }

                let checked = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => None,
                    result = check_status(client.as_ref(), &path) => Some(result),
                };
                let Some(result) = checked else {
                    tracing::debug!("Watcher for document {} cancelled mid-check", document_id);
                    return;
                };

                match result {
                    Ok(report) => match report.status {
                        RemoteStatus::Completed => {
                            tracing::info!("Document {} processed after {} checks", document_id, attempt);
                            yield WatchEvent::Completed { attempt };
                            return;
                        }
                        RemoteStatus::Failed => {
                            let reason = report
                                .error
                                .unwrap_or_else(|| "Document processing failed".to_string());
                            tracing::warn!("Document {} failed processing: {}", document_id, reason);
                            yield WatchEvent::Failed { attempt, reason };
                            return;
                        }
                        status @ (RemoteStatus::Pending | RemoteStatus::Processing) => {
                            tracing::debug!("Document {} is {:?} (check {}/{})", document_id, status, attempt, policy.max_attempts);
                            yield WatchEvent::Waiting { attempt, status };
                        }
                    },
                    Err(ClientError::Auth(reason)) => {
                        yield WatchEvent::Unauthorized { reason };
                        return;
                    }
                    Err(e) => {
                        tracing::warn!("Status check {} for document {} missed: {}", attempt, document_id, e);
                        yield WatchEvent::Missed { attempt, reason: e.to_string() };
                    }
                }
            }

            tracing::warn!("Document {} still not processed after {} checks", document_id, policy.max_attempts);
            yield WatchEvent::TimedOut { attempts: policy.max_attempts };
        }
    }
}

/// Sleeps unless cancelled first; `false` means cancelled.
async fn pause(cancel: &CancellationToken, delay: Duration) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        _ = sleep(delay) => true,
    }
}

async fn check_status(
    client: &dyn HttpClient,
    path: &str,
) -> Result<ProcessingStatusResponse, ClientError> {
    client
        .execute(ApiRequest::get(path))
        .await?
        .error_for_status()?
        .json()
}
