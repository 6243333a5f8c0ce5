//! TaskRegistry - actor that owns every task record
//!
//! All reads and writes go through one channel, so each operation's
//! read-modify-write runs to completion before the next one starts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::domain::{ErrorInfo, Feedback, FeedbackStatus, Phase, Plan, Task, TaskSnapshot, TaskStatus};
use crate::services::{Notification, Notifier};

use super::messages::{RegistryCommand, RegistryError, RegistryResponse, Transition};

/// Broadcast when task state changes
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    TaskCreated { id: String },
    StatusChanged { id: String, status: TaskStatus },
    FeedbackSubmitted { id: String, critical: bool },
    TaskCancelled { id: String },
}

/// Handle to send commands to the TaskRegistry
#[derive(Clone)]
pub struct TaskRegistry {
    tx: mpsc::Sender<RegistryCommand>,
    event_tx: broadcast::Sender<RegistryEvent>,
    notifier: Option<Arc<dyn Notifier>>,
}

impl TaskRegistry {
    /// Spawn a registry actor without a notifier
    pub fn spawn() -> Self {
        Self::spawn_inner(None)
    }

    /// Spawn a registry actor that reports transitions to `notifier`
    pub fn spawn_with_notifier(notifier: Arc<dyn Notifier>) -> Self {
        Self::spawn_inner(Some(notifier))
    }

    fn spawn_inner(notifier: Option<Arc<dyn Notifier>>) -> Self {
        debug!(has_notifier = notifier.is_some(), "spawn: called");
        let (tx, rx) = mpsc::channel(256);
        let (event_tx, _) = broadcast::channel(64);

        tokio::spawn(actor_loop(rx));
        info!("TaskRegistry spawned");

        Self { tx, event_tx, notifier }
    }

    /// Subscribe to state change events
    pub fn subscribe_events(&self) -> broadcast::Receiver<RegistryEvent> {
        self.event_tx.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<RegistryResponse<T>>) -> RegistryCommand,
    ) -> RegistryResponse<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(build(reply_tx))
            .await
            .map_err(|_| RegistryError::ChannelError)?;
        reply_rx.await.map_err(|_| RegistryError::ChannelError)?
    }

    fn publish(&self, event: RegistryEvent) {
        // No subscribers is not an error
        let _ = self.event_tx.send(event);
    }

    /// Publish and notify for an applied transition
    async fn after_transition(&self, transition: &Option<Transition>) {
        let Some(transition) = transition else {
            return;
        };
        let snapshot = &transition.snapshot;
        if transition.status_changed {
            self.publish(RegistryEvent::StatusChanged {
                id: snapshot.id.clone(),
                status: snapshot.status,
            });
        }

        let Some(notifier) = &self.notifier else {
            return;
        };
        let text = format!(
            "{} {:>3.0}% {}",
            snapshot.status,
            snapshot.progress.overall * 100.0,
            snapshot.progress.message
        );
        let files = match (snapshot.status, &snapshot.artifact_path) {
            (TaskStatus::Completed, Some(path)) => vec![path.clone()],
            _ => Vec::new(),
        };
        if let Err(e) = notifier.notify(&snapshot.id, Notification { text: Some(text), files }).await {
            warn!(task_id = %snapshot.id, error = %e, "Notification failed");
        }
    }

    // === Lifecycle ===

    /// Register a new task in Planning status
    pub async fn create(
        &self,
        id: impl Into<String>,
        description: impl Into<String>,
        workdir: impl Into<PathBuf>,
    ) -> RegistryResponse<TaskSnapshot> {
        let id = id.into();
        debug!(%id, "create: called");
        let description = description.into();
        let workdir = workdir.into();
        let snapshot = self
            .request(|reply| RegistryCommand::Create {
                id: id.clone(),
                description,
                workdir,
                reply,
            })
            .await?;
        self.publish(RegistryEvent::TaskCreated { id });
        Ok(snapshot)
    }

    pub async fn get(&self, id: &str) -> RegistryResponse<Option<TaskSnapshot>> {
        debug!(%id, "get: called");
        self.request(|reply| RegistryCommand::Get { id: id.to_string(), reply })
            .await
    }

    /// Get a task, returning an error if absent
    pub async fn get_required(&self, id: &str) -> RegistryResponse<TaskSnapshot> {
        self.get(id).await?.ok_or_else(|| RegistryError::NotFound(id.to_string()))
    }

    pub async fn list(&self) -> RegistryResponse<Vec<TaskSnapshot>> {
        debug!("list: called");
        self.request(|reply| RegistryCommand::List { reply }).await
    }

    /// Record phase progress; a no-op (false) for absent or terminal tasks
    pub async fn update_progress(
        &self,
        id: &str,
        phase: Phase,
        fraction: f64,
        message: impl Into<String>,
    ) -> RegistryResponse<bool> {
        let message = message.into();
        debug!(%id, %phase, fraction, %message, "update_progress: called");
        let transition = self
            .request(|reply| RegistryCommand::UpdateProgress {
                id: id.to_string(),
                phase,
                fraction,
                message,
                reply,
            })
            .await?;
        self.after_transition(&transition).await;
        Ok(transition.is_some())
    }

    pub async fn complete(&self, id: &str, message: impl Into<String>) -> RegistryResponse<bool> {
        let message = message.into();
        debug!(%id, %message, "complete: called");
        let transition = self
            .request(|reply| RegistryCommand::Complete {
                id: id.to_string(),
                message,
                reply,
            })
            .await?;
        self.after_transition(&transition).await;
        Ok(transition.is_some())
    }

    pub async fn fail(&self, id: &str, reason: impl Into<String>) -> RegistryResponse<bool> {
        let reason = reason.into();
        debug!(%id, %reason, "fail: called");
        let transition = self
            .request(|reply| RegistryCommand::Fail {
                id: id.to_string(),
                reason,
                reply,
            })
            .await?;
        self.after_transition(&transition).await;
        Ok(transition.is_some())
    }

    /// Cancel a task; false when absent or already terminal
    pub async fn cancel(&self, id: &str, actor_id: &str) -> RegistryResponse<bool> {
        debug!(%id, %actor_id, "cancel: called");
        let transition = self
            .request(|reply| RegistryCommand::Cancel {
                id: id.to_string(),
                actor_id: actor_id.to_string(),
                reply,
            })
            .await?;
        let cancelled = transition.is_some();
        if cancelled {
            self.publish(RegistryEvent::TaskCancelled { id: id.to_string() });
        }
        self.after_transition(&transition).await;
        Ok(cancelled)
    }

    // === Pipeline bookkeeping ===

    pub async fn set_description(&self, id: &str, description: impl Into<String>) -> RegistryResponse<()> {
        debug!(%id, "set_description: called");
        let description = description.into();
        self.request(|reply| RegistryCommand::SetDescription {
            id: id.to_string(),
            description,
            reply,
        })
        .await
    }

    pub async fn set_plan(&self, id: &str, plan: Plan) -> RegistryResponse<()> {
        debug!(%id, files = plan.files.len(), "set_plan: called");
        self.request(|reply| RegistryCommand::SetPlan {
            id: id.to_string(),
            plan,
            reply,
        })
        .await
    }

    pub async fn push_error(&self, id: &str, error: ErrorInfo) -> RegistryResponse<()> {
        debug!(%id, error_type = %error.error_type, "push_error: called");
        self.request(|reply| RegistryCommand::PushError {
            id: id.to_string(),
            error,
            reply,
        })
        .await
    }

    pub async fn set_requires_recoding(&self, id: &str, value: bool) -> RegistryResponse<()> {
        debug!(%id, value, "set_requires_recoding: called");
        self.request(|reply| RegistryCommand::SetRequiresRecoding {
            id: id.to_string(),
            value,
            reply,
        })
        .await
    }

    pub async fn record_artifact(&self, id: &str, path: PathBuf, duration_ms: u64) -> RegistryResponse<()> {
        debug!(%id, path = %path.display(), duration_ms, "record_artifact: called");
        self.request(|reply| RegistryCommand::RecordArtifact {
            id: id.to_string(),
            path,
            duration_ms,
            reply,
        })
        .await
    }

    // === Feedback ===

    /// Append feedback; false when the task is absent or terminal
    ///
    /// Critical items raise `has_critical_feedback` inside the same command.
    pub async fn submit_feedback(&self, id: &str, feedback: Feedback) -> RegistryResponse<bool> {
        debug!(%id, feedback_id = %feedback.id, critical = feedback.is_critical(), "submit_feedback: called");
        let critical = feedback.is_critical();
        let accepted = self
            .request(|reply| RegistryCommand::SubmitFeedback {
                id: id.to_string(),
                feedback,
                reply,
            })
            .await?;
        if accepted {
            self.publish(RegistryEvent::FeedbackSubmitted {
                id: id.to_string(),
                critical,
            });
        }
        Ok(accepted)
    }

    /// Drain everything past the cursor that is still pending
    pub async fn take_pending_feedback(&self, id: &str) -> RegistryResponse<Vec<Feedback>> {
        debug!(%id, "take_pending_feedback: called");
        self.request(|reply| RegistryCommand::TakePendingFeedback {
            id: id.to_string(),
            reply,
        })
        .await
    }

    /// Claim pending critical items and clear the critical flag
    ///
    /// When every critical item was already drained by a checkpoint, the most
    /// recent one is returned with its current status so it can still be
    /// handed to critical handling.
    pub async fn take_critical_feedback(&self, id: &str) -> RegistryResponse<Vec<Feedback>> {
        debug!(%id, "take_critical_feedback: called");
        self.request(|reply| RegistryCommand::TakeCriticalFeedback {
            id: id.to_string(),
            reply,
        })
        .await
    }

    pub async fn resolve_feedback(
        &self,
        id: &str,
        feedback_id: &str,
        status: FeedbackStatus,
    ) -> RegistryResponse<bool> {
        debug!(%id, %feedback_id, ?status, "resolve_feedback: called");
        self.request(|reply| RegistryCommand::ResolveFeedback {
            id: id.to_string(),
            feedback_id: feedback_id.to_string(),
            status,
            reply,
        })
        .await
    }

    /// Stop the actor
    pub async fn shutdown(&self) -> RegistryResponse<()> {
        debug!("shutdown: called");
        self.tx
            .send(RegistryCommand::Shutdown)
            .await
            .map_err(|_| RegistryError::ChannelError)
    }
}

/// Apply `change` to a task, reporting the transition if it took effect
fn transition(tasks: &mut HashMap<String, Task>, id: &str, change: impl FnOnce(&mut Task) -> bool) -> Option<Transition> {
    let task = tasks.get_mut(id)?;
    let before = task.status;
    if !change(task) {
        return None;
    }
    Some(Transition {
        status_changed: task.status != before,
        snapshot: task.snapshot(),
    })
}

fn with_task<T>(
    tasks: &mut HashMap<String, Task>,
    id: &str,
    f: impl FnOnce(&mut Task) -> T,
) -> RegistryResponse<T> {
    tasks
        .get_mut(id)
        .map(f)
        .ok_or_else(|| RegistryError::NotFound(id.to_string()))
}

/// The actor loop that owns all task records
async fn actor_loop(mut rx: mpsc::Receiver<RegistryCommand>) {
    debug!("TaskRegistry actor started");
    let mut tasks: HashMap<String, Task> = HashMap::new();

    while let Some(cmd) = rx.recv().await {
        match cmd {
            RegistryCommand::Create {
                id,
                description,
                workdir,
                reply,
            } => {
                debug!(%id, "actor_loop: Create command");
                let result = if tasks.contains_key(&id) {
                    Err(RegistryError::AlreadyExists(id))
                } else {
                    let task = Task::new(id.clone(), description, workdir);
                    let snapshot = task.snapshot();
                    tasks.insert(id, task);
                    Ok(snapshot)
                };
                let _ = reply.send(result);
            }

            RegistryCommand::Get { id, reply } => {
                let _ = reply.send(Ok(tasks.get(&id).map(Task::snapshot)));
            }

            RegistryCommand::List { reply } => {
                let mut all: Vec<TaskSnapshot> = tasks.values().map(Task::snapshot).collect();
                all.sort_by_key(|s| s.created_at);
                let _ = reply.send(Ok(all));
            }

            RegistryCommand::UpdateProgress {
                id,
                phase,
                fraction,
                message,
                reply,
            } => {
                let result = transition(&mut tasks, &id, |t| t.update_progress(phase, fraction, message));
                if result.is_none() {
                    debug!(%id, "actor_loop: UpdateProgress ignored (absent or terminal)");
                }
                let _ = reply.send(Ok(result));
            }

            RegistryCommand::Complete { id, message, reply } => {
                debug!(%id, "actor_loop: Complete command");
                let _ = reply.send(Ok(transition(&mut tasks, &id, |t| t.complete(message))));
            }

            RegistryCommand::Fail { id, reason, reply } => {
                debug!(%id, "actor_loop: Fail command");
                let _ = reply.send(Ok(transition(&mut tasks, &id, |t| t.fail(reason))));
            }

            RegistryCommand::Cancel { id, actor_id, reply } => {
                debug!(%id, %actor_id, "actor_loop: Cancel command");
                let _ = reply.send(Ok(transition(&mut tasks, &id, |t| t.cancel(actor_id))));
            }

            RegistryCommand::SetDescription { id, description, reply } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| t.description = description));
            }

            RegistryCommand::SetPlan { id, plan, reply } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| t.plan = Some(plan)));
            }

            RegistryCommand::PushError { id, error, reply } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| t.push_error(error)));
            }

            RegistryCommand::SetRequiresRecoding { id, value, reply } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| t.requires_recoding = value));
            }

            RegistryCommand::RecordArtifact {
                id,
                path,
                duration_ms,
                reply,
            } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| {
                    t.artifact_path = Some(path);
                    t.duration_ms = Some(duration_ms);
                }));
            }

            RegistryCommand::SubmitFeedback { id, feedback, reply } => {
                debug!(%id, feedback_id = %feedback.id, "actor_loop: SubmitFeedback command");
                let accepted = tasks.get_mut(&id).is_some_and(|t| t.submit_feedback(feedback));
                let _ = reply.send(Ok(accepted));
            }

            RegistryCommand::TakePendingFeedback { id, reply } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| t.feedback_queue.take_pending()));
            }

            RegistryCommand::TakeCriticalFeedback { id, reply } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| {
                    t.has_critical_feedback = false;
                    let mut items = t.feedback_queue.take_critical();
                    // An earlier checkpoint already applied it; hand over the latest one again
                    if items.is_empty()
                        && let Some(latest) = t.feedback_queue.latest_critical()
                    {
                        items.push(latest.clone());
                    }
                    items
                }));
            }

            RegistryCommand::ResolveFeedback {
                id,
                feedback_id,
                status,
                reply,
            } => {
                let _ = reply.send(with_task(&mut tasks, &id, |t| t.feedback_queue.resolve(&feedback_id, status)));
            }

            RegistryCommand::Shutdown => {
                info!("TaskRegistry shutting down");
                break;
            }
        }
    }

    debug!("TaskRegistry actor stopped");
}
