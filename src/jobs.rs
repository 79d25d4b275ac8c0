use crate::security::AuthContext;
use arbitrage_engine::{
    Engine,
    batch::BatchHooks,
    models::{ApiError, BatchQuoteRequest, BatchQuoteResponse},
};
use serde::Serialize;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{
    sync::{Mutex, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tracing::{info, warn};
use uuid::Uuid;

/// Background pricing batches. One batch runs at a time; the controller
/// bounds the concurrency inside it. Finished jobs stay queryable for `ttl`.
#[derive(Clone)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
    statuses: Statuses,
}

struct Job {
    id: Uuid,
    request: BatchQuoteRequest,
    context: AuthContext,
}

#[derive(Clone, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued { total: usize },
    Running { total: usize },
    Completed { result: BatchQuoteResponse },
    Failed { error: String, stage: Option<String> },
}

impl JobState {
    fn is_finished(&self) -> bool {
        matches!(self, JobState::Completed { .. } | JobState::Failed { .. })
    }
}

#[derive(Clone, Serialize)]
pub struct JobInfo {
    pub id: String,
    #[serde(flatten)]
    pub state: JobState,
}

struct JobEntry {
    state: JobState,
    updated: Instant,
}

#[derive(Clone)]
struct Statuses {
    entries: Arc<Mutex<HashMap<Uuid, JobEntry>>>,
    ttl: Duration,
}

impl Statuses {
    fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    fn expired(&self, entry: &JobEntry) -> bool {
        entry.state.is_finished() && entry.updated.elapsed() >= self.ttl
    }

    /// Records `state` and drops finished jobs older than the TTL.
    async fn set(&self, id: Uuid, state: JobState) {
        let mut entries = self.entries.lock().await;
        entries.retain(|_, entry| !self.expired(entry));
        entries.insert(
            id,
            JobEntry {
                state,
                updated: Instant::now(),
            },
        );
    }

    async fn get(&self, id: Uuid) -> Option<JobState> {
        let entries = self.entries.lock().await;
        entries
            .get(&id)
            .filter(|entry| !self.expired(entry))
            .map(|entry| entry.state.clone())
    }

    async fn remove(&self, id: Uuid) {
        self.entries.lock().await.remove(&id);
    }

    #[cfg(test)]
    async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }
}

impl JobQueue {
    pub fn spawn(engine: Engine, capacity: usize, ttl: Duration) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Job>(capacity.max(1));
        let statuses = Statuses::new(ttl);
        let statuses_bg = statuses.clone();

        let handle = tokio::spawn(async move {
            while let Some(job) = rx.recv().await {
                let total = job.request.items.len();
                let health = engine.batch().health();
                if !health.accepting {
                    let error = health.reason.unwrap_or_else(|| "batch intake paused".into());
                    warn!(target = "arbitrage.batch", job_id = %job.id, error = %error, "batch job rejected");
                    statuses_bg
                        .set(
                            job.id,
                            JobState::Failed {
                                error,
                                stage: Some("batch_health".into()),
                            },
                        )
                        .await;
                    continue;
                }

                statuses_bg.set(job.id, JobState::Running { total }).await;
                info!(
                    target = "arbitrage.batch",
                    job_id = %job.id,
                    org_id = %job.context.org_id,
                    total,
                    requested_concurrency = ?job.request.concurrency,
                    "batch job started"
                );
                let report = engine
                    .quote_batch(job.request.items, job.request.concurrency, &BatchHooks::default())
                    .await;
                statuses_bg
                    .set(
                        job.id,
                        JobState::Completed {
                            result: BatchQuoteResponse::from(report),
                        },
                    )
                    .await;
            }
        });

        (Self { tx, statuses }, handle)
    }

    pub async fn enqueue(&self, request: BatchQuoteRequest, context: AuthContext) -> Result<Uuid, ApiError> {
        let id = Uuid::new_v4();
        let total = request.items.len();
        self.statuses.set(id, JobState::Queued { total }).await;
        let job = Job { id, request, context };
        if self.tx.send(job).await.is_err() {
            self.statuses.remove(id).await;
            return Err(ApiError {
                error: "queue_send_failed".into(),
                detail: Some("worker not available".into()),
            });
        }
        Ok(id)
    }

    pub async fn get(&self, id: Uuid) -> Option<JobInfo> {
        self.statuses.get(id).await.map(|state| JobInfo {
            id: id.to_string(),
            state,
        })
    }
}
