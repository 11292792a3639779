use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use kindred_core::{Disposition, SessionManager};
use kindred_memory::ConversationMemory;
use tokio::sync::RwLock;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::InitiativeConfig;

/// What one sweep did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Remembered conversations of active identities that were looked at.
    pub considered: usize,
    /// Conversation ids an initiative was started for.
    pub triggered: Vec<String>,
    pub sent: usize,
    pub failed: usize,
}

type InFlight = Arc<Mutex<HashSet<String>>>;

/// Holds a conversation's in-flight slot until the initiative task ends,
/// panics included.
struct InFlightGuard {
    set: InFlight,
    conversation_id: String,
}

impl InFlightGuard {
    fn claim(set: &InFlight, conversation_id: &str) -> Option<Self> {
        let mut claimed = set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.insert(conversation_id.to_string()).then(|| Self {
            set: Arc::clone(set),
            conversation_id: conversation_id.to_string(),
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        let mut claimed = self.set.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        claimed.remove(&self.conversation_id);
    }
}

/// Periodically nudges idle conversations with an opening line.
pub struct InitiativeScheduler {
    session: Arc<SessionManager>,
    config: InitiativeConfig,
    in_flight: InFlight,
    last_sweep: RwLock<DateTime<Utc>>,
}

impl InitiativeScheduler {
    pub fn new(session: Arc<SessionManager>, config: InitiativeConfig) -> Self {
        Self {
            session,
            config,
            in_flight: Arc::new(Mutex::new(HashSet::new())),
            last_sweep: RwLock::new(Utc::now()),
        }
    }

    pub fn config(&self) -> &InitiativeConfig {
        &self.config
    }

    /// Sweeps on a timer until `shutdown` fires. Each sweep runs as its own
    /// task, so a slow initiative never holds up the next tick or shutdown;
    /// sweeps still running at shutdown are aborted.
    pub async fn run(self: Arc<Self>, shutdown: CancellationToken) {
        if !self.config.enabled {
            tracing::info!("initiative scheduler disabled");
            return;
        }

        let mut sweep = tokio::time::interval(self.config.sweep_interval());
        sweep.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        sweep.tick().await;
        let mut recheck = self.config.recheck_interval().map(|period| {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            ticker
        });
        if let Some(ticker) = recheck.as_mut() {
            ticker.tick().await;
        }

        tracing::info!(
            sweep_secs = self.config.sweep_interval_secs,
            idle_secs = self.config.idle_threshold_secs,
            "initiative scheduler started"
        );

        let mut running: JoinSet<SweepReport> = JoinSet::new();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!(running = running.len(), "initiative scheduler stopped");
                    running.shutdown().await;
                    return;
                }
                _ = sweep.tick() => {
                    let scheduler = Arc::clone(&self);
                    running.spawn(async move { scheduler.sweep().await });
                }
                _ = async {
                    match recheck.as_mut() {
                        Some(ticker) => ticker.tick().await,
                        None => std::future::pending().await,
                    }
                } => {
                    let scheduler = Arc::clone(&self);
                    running.spawn(async move { scheduler.recheck().await });
                }
                Some(joined) = running.join_next(), if !running.is_empty() => {
                    if let Err(e) = joined {
                        tracing::warn!("initiative sweep task failed: {e}");
                    }
                }
            }
        }
    }

    pub async fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now()).await
    }

    /// Full sweep, evaluating idleness as of `now`.
    pub async fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        let candidates = self.candidates().await;
        let report = self.trigger_idle(candidates, now).await;
        *self.last_sweep.write().await = now;
        if !report.triggered.is_empty() {
            tracing::info!(
                considered = report.considered,
                sent = report.sent,
                failed = report.failed,
                "initiative sweep finished"
            );
        } else {
            tracing::debug!(considered = report.considered, "initiative sweep found nothing idle");
        }
        report
    }

    pub async fn recheck(&self) -> SweepReport {
        self.recheck_at(Utc::now()).await
    }

    /// Like [`sweep_at`](Self::sweep_at) but limited to conversations that
    /// started after the previous full sweep.
    pub async fn recheck_at(&self, now: DateTime<Utc>) -> SweepReport {
        let since = *self.last_sweep.read().await;
        let candidates = self
            .candidates()
            .await
            .into_iter()
            .filter(|memory| memory.started_at >= since)
            .collect();
        self.trigger_idle(candidates, now).await
    }

    async fn candidates(&self) -> Vec<ConversationMemory> {
        match self.session.initiative_candidates().await {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!("failed to list initiative candidates: {e}");
                Vec::new()
            }
        }
    }

    async fn trigger_idle(
        &self,
        candidates: Vec<ConversationMemory>,
        now: DateTime<Utc>,
    ) -> SweepReport {
        let threshold = self.config.idle_threshold();
        let mut report = SweepReport {
            considered: candidates.len(),
            ..Default::default()
        };

        let mut tasks = JoinSet::new();
        for memory in candidates {
            if memory.idle_for(now) <= threshold {
                continue;
            }
            let conversation_id = memory.conversation_id;
            let Some(guard) = InFlightGuard::claim(&self.in_flight, &conversation_id) else {
                tracing::debug!(%conversation_id, "initiative already in flight");
                continue;
            };
            report.triggered.push(conversation_id.clone());

            let session = Arc::clone(&self.session);
            tasks.spawn(async move {
                let result = session.initiate(&conversation_id).await;
                drop(guard);
                (conversation_id, result)
            });
        }

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(Disposition::Replied(_)))) => report.sent += 1,
                Ok((conversation_id, Ok(disposition))) => {
                    tracing::debug!(%conversation_id, ?disposition, "initiative not sent");
                }
                Ok((conversation_id, Err(e))) => {
                    report.failed += 1;
                    tracing::warn!(%conversation_id, "initiative failed: {e}");
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::warn!("initiative task panicked: {e}");
                }
            }
        }
        report.triggered.sort();
        report
    }
}
