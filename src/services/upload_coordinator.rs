use crate::api::client::{ApiRequest, HttpClient, MultipartForm, ProgressSink};
use crate::api::error::{ClientError, CoordinatorError};
use crate::models::{FileRef, TaskId, UploadResponse, UploadStatus, UploadTarget, UploadTask};
use crate::services::process_watcher::{PollPolicy, ProcessWatcher, WatchEvent};
use crate::utils::validation::{ValidationError, ValidationRules, validate_file};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use futures::StreamExt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;

pub const UPLOAD_PATH: &str = "/documents/upload";

const UPDATE_CHANNEL_CAPACITY: usize = 1024;

/// Change notifications for observers (the UI layer).
#[derive(Debug, Clone)]
pub enum TaskEvent {
    Updated(UploadTask),
    Removed(TaskId),
}

struct TaskSlot {
    seq: u64,
    task: UploadTask,
    /// Stops the upload driver and its watcher. Present only while one runs.
    cancel: Option<CancellationToken>,
}

/// Owns every upload task and drives each through
/// `Pending -> Uploading -> Processing -> Completed | Error`.
///
/// Tasks live in a map keyed by id; every change goes through the entry for
/// that id and is checked against the state machine, so interleaved
/// completions of different tasks never touch each other's fields and a
/// single task can never move backwards.
#[derive(Clone)]
pub struct UploadCoordinator {
    client: Arc<dyn HttpClient>,
    rules: Arc<ValidationRules>,
    policy: PollPolicy,
    tasks: Arc<DashMap<TaskId, TaskSlot>>,
    next_seq: Arc<AtomicU64>,
    updates: broadcast::Sender<TaskEvent>,
}

impl UploadCoordinator {
    pub fn new(client: Arc<dyn HttpClient>, rules: ValidationRules, policy: PollPolicy) -> Self {
        let (updates, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self {
            client,
            rules: Arc::new(rules),
            policy,
            tasks: Arc::new(DashMap::new()),
            next_seq: Arc::new(AtomicU64::new(0)),
            updates,
        }
    }

    /// Registers a selected file as a `Pending` task.
    pub fn add_file(&self, file: FileRef) -> TaskId {
        let task = UploadTask::new(file);
        let id = task.id;
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);

        tracing::info!("Task {} added for '{}' ({} bytes)", id, task.file.name, task.file.size);
        self.tasks.insert(
            id,
            TaskSlot {
                seq,
                task: task.clone(),
                cancel: None,
            },
        );
        self.publish(TaskEvent::Updated(task));
        id
    }

    pub fn add_files(&self, files: impl IntoIterator<Item = FileRef>) -> Vec<TaskId> {
        files.into_iter().map(|file| self.add_file(file)).collect()
    }

    pub fn get(&self, id: TaskId) -> Option<UploadTask> {
        self.tasks.get(&id).map(|slot| slot.task.clone())
    }

    /// Snapshot of all tasks in the order they were added.
    pub fn tasks(&self) -> Vec<UploadTask> {
        let mut slots: Vec<(u64, UploadTask)> = self
            .tasks
            .iter()
            .map(|slot| (slot.seq, slot.task.clone()))
            .collect();
        slots.sort_by_key(|(seq, _)| *seq);
        slots.into_iter().map(|(_, task)| task).collect()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.updates.subscribe()
    }

    /// Starts uploading a `Pending` task.
    ///
    /// Local validation runs first; a rejected file never reaches the network
    /// and its task stays `Pending` with `validation_message` set. On success
    /// the task is `Uploading` when this returns and a background driver
    /// (spawned on the current tokio runtime) carries it the rest of the way.
    pub fn confirm(&self, id: TaskId, target: UploadTarget) -> Result<(), CoordinatorError> {
        let (file, cancel) = {
            let mut slot = self
                .tasks
                .get_mut(&id)
                .ok_or(CoordinatorError::NotFound(id))?;

            let status = slot.task.status;
            if status != UploadStatus::Pending {
                return Err(CoordinatorError::InvalidTransition {
                    from: status,
                    to: UploadStatus::Uploading,
                });
            }

            let checked =
                validate_target(&target).and_then(|_| validate_file(&slot.task.file, &self.rules));
            if let Err(e) = checked {
                tracing::warn!("Task {} rejected before upload: {}", id, e);
                slot.task.validation_message = Some(e.message.clone());
                self.publish(TaskEvent::Updated(slot.task.clone()));
                return Err(e.into());
            }

            let cancel = CancellationToken::new();
            slot.task.status = UploadStatus::Uploading;
            slot.task.progress = 0;
            slot.task.validation_message = None;
            slot.task.document_type = Some(target.document_type.clone());
            slot.cancel = Some(cancel.clone());

            tracing::info!("Task {} pending -> uploading", id);
            self.publish(TaskEvent::Updated(slot.task.clone()));
            (slot.task.file.clone(), cancel)
        };

        tokio::spawn(self.clone().drive(id, file, target, cancel));
        Ok(())
    }

    /// Deletes a task that is not in flight, stopping anything still attached to it.
    pub fn remove(&self, id: TaskId) -> Result<UploadTask, CoordinatorError> {
        let slot = match self.tasks.entry(id) {
            Entry::Vacant(_) => return Err(CoordinatorError::NotFound(id)),
            Entry::Occupied(entry) => {
                let status = entry.get().task.status;
                if status.is_transient() {
                    return Err(CoordinatorError::RemovalRejected(status));
                }
                entry.remove()
            }
        };

        if let Some(cancel) = &slot.cancel {
            cancel.cancel();
        }
        tracing::info!("Task {} removed", id);
        self.publish(TaskEvent::Removed(id));
        Ok(slot.task)
    }

    /// Session teardown: cancels every driver and watcher and drops every task,
    /// in flight or not.
    pub fn teardown(&self) {
        let ids: Vec<TaskId> = self.tasks.iter().map(|slot| *slot.key()).collect();
        for id in ids {
            if let Some((_, slot)) = self.tasks.remove(&id) {
                if let Some(cancel) = slot.cancel {
                    cancel.cancel();
                }
                self.publish(TaskEvent::Removed(id));
            }
        }
        tracing::info!("Upload tasks torn down");
    }

    /// Waits until the task reaches `Completed` or `Error`.
    /// Fails with `NotFound` if the task is (or gets) removed.
    pub async fn settled(&self, id: TaskId) -> Result<UploadTask, CoordinatorError> {
        let mut rx = self.updates.subscribe();
        loop {
            match self.get(id) {
                None => return Err(CoordinatorError::NotFound(id)),
                Some(task) if task.status.is_terminal() => return Ok(task),
                Some(_) => {}
            }

            loop {
                match rx.recv().await {
                    Ok(TaskEvent::Updated(task)) if task.id == id && task.status.is_terminal() => {
                        return Ok(task);
                    }
                    Ok(TaskEvent::Removed(removed)) if removed == id => {
                        return Err(CoordinatorError::NotFound(id));
                    }
                    Ok(_) => {}
                    // Missed some events; re-read the arena.
                    Err(RecvError::Lagged(_)) => break,
                    Err(RecvError::Closed) => return Err(CoordinatorError::NotFound(id)),
                }
            }
        }
    }

    async fn drive(self, id: TaskId, file: FileRef, target: UploadTarget, cancel: CancellationToken) {
        let uploaded = tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            result = self.upload(id, file, &target) => result,
        };

        let document_id = match uploaded {
            Ok(document_id) => document_id,
            Err(e) => {
                self.fail(id, &e);
                return;
            }
        };

        let entered = self.transition(id, UploadStatus::Processing, |task| {
            task.document_id = Some(document_id.clone());
            task.progress = 100;
        });
        if !entered {
            return;
        }

        let watcher = ProcessWatcher::new(self.client.clone(), document_id, self.policy, cancel);
        let mut events = std::pin::pin!(watcher.watch());
        while let Some(event) = events.next().await {
            match event {
                WatchEvent::Completed { .. } => {
                    self.transition(id, UploadStatus::Completed, |_| {});
                }
                WatchEvent::Failed { reason, .. } => {
                    self.fail(id, &ClientError::ServerProcessing(reason));
                }
                WatchEvent::TimedOut { attempts } => {
                    self.fail(id, &ClientError::Timeout { attempts });
                }
                WatchEvent::Unauthorized { reason } => {
                    self.fail(id, &ClientError::Auth(reason));
                }
                WatchEvent::Waiting { .. } | WatchEvent::Missed { .. } => {}
            }
        }
    }

    async fn upload(&self, id: TaskId, file: FileRef, target: &UploadTarget) -> Result<String, ClientError> {
        let form = MultipartForm {
            fields: vec![
                ("venture_id".to_string(), target.venture_id.clone()),
                ("document_type".to_string(), target.document_type.clone()),
            ],
            file_field: "file".to_string(),
            file,
            progress: Some(self.progress_sink(id)),
        };

        let response: UploadResponse = self
            .client
            .execute(ApiRequest::post(UPLOAD_PATH).multipart(form))
            .await?
            .error_for_status()?
            .json()?;
        Ok(response.id)
    }

    /// Maps bytes sent to a 0-100 progress on the task while it is `Uploading`.
    /// Progress only grows, so a resend after a token refresh does not rewind it.
    fn progress_sink(&self, id: TaskId) -> ProgressSink {
        let tasks = self.tasks.clone();
        let updates = self.updates.clone();
        ProgressSink::new(move |sent, total| {
            let percent = if total == 0 {
                100
            } else {
                (sent.min(total) * 100 / total) as u8
            };
            if let Some(mut slot) = tasks.get_mut(&id) {
                if slot.task.status == UploadStatus::Uploading && percent > slot.task.progress {
                    slot.task.progress = percent;
                    let _ = updates.send(TaskEvent::Updated(slot.task.clone()));
                }
            }
        })
    }

    /// Applies one state machine edge. Returns `false` (and changes nothing)
    /// when the task is gone or the edge is not allowed from its current state.
    fn transition(&self, id: TaskId, to: UploadStatus, apply: impl FnOnce(&mut UploadTask)) -> bool {
        let Some(mut slot) = self.tasks.get_mut(&id) else {
            tracing::debug!("Task {} no longer exists, dropping move to {}", id, to);
            return false;
        };

        let from = slot.task.status;
        if !from.can_advance_to(to) {
            tracing::warn!("Task {} ignoring {} -> {}", id, from, to);
            return false;
        }

        slot.task.status = to;
        apply(&mut slot.task);
        if to.is_terminal() {
            slot.cancel = None;
        }

        tracing::info!("Task {} {} -> {}", id, from, to);
        self.publish(TaskEvent::Updated(slot.task.clone()));
        true
    }

    fn fail(&self, id: TaskId, error: &ClientError) {
        let message = match error {
            ClientError::ServerProcessing(reason) => reason.clone(),
            other => other.to_string(),
        };
        tracing::warn!("Task {} failed: {}", id, message);
        self.transition(id, UploadStatus::Error, |task| task.error = Some(message));
    }

    fn publish(&self, event: TaskEvent) {
        // No receivers is fine: nobody is watching yet.
        let _ = self.updates.send(event);
    }
}

fn validate_target(target: &UploadTarget) -> Result<(), ValidationError> {
    if target.venture_id.trim().is_empty() {
        return Err(ValidationError {
            code: "MISSING_VENTURE",
            message: "Choose the venture this document belongs to".to_string(),
        });
    }
    if target.document_type.trim().is_empty() {
        return Err(ValidationError {
            code: "MISSING_DOCUMENT_TYPE",
            message: "Choose a document type before uploading".to_string(),
        });
    }
    Ok(())
}
