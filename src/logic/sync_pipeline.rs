use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::error::{EngineError, Result};
use crate::logic::sync::SyncConflictResolver;
use crate::model::{ChangeEvent, SyncOutcome};

const ACTOR_QUEUE_DEPTH: usize = 1024;

/// Async front for a [`SyncConflictResolver`]: one task per shard, events
/// routed by identifier so each identifier's events are decided in arrival
/// order, plus a ticker that expires orphans.
pub struct SyncPipeline {
    resolver: Arc<SyncConflictResolver>,
    senders: Vec<mpsc::Sender<ChangeEvent>>,
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl SyncPipeline {
    /// Start the actors. Outcomes, including replays and expirations, arrive
    /// on the returned receiver.
    pub fn start(
        resolver: Arc<SyncConflictResolver>,
        sweep_interval: Duration,
    ) -> (Self, mpsc::UnboundedReceiver<SyncOutcome>) {
        let (outcome_tx, outcome_rx) = mpsc::unbounded_channel();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let actors = resolver.config().shards.max(1);

        let mut senders = Vec::with_capacity(actors);
        let mut tasks = Vec::with_capacity(actors + 1);
        for shard in 0..actors {
            let (tx, mut rx) = mpsc::channel::<ChangeEvent>(ACTOR_QUEUE_DEPTH);
            let resolver = Arc::clone(&resolver);
            let outcomes = outcome_tx.clone();
            tasks.push(tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    for outcome in resolver.submit(event) {
                        if outcomes.send(outcome).is_err() {
                            debug!("sync actor {} lost its outcome receiver", shard);
                            return;
                        }
                    }
                }
            }));
            senders.push(tx);
        }

        let sweeper = Arc::clone(&resolver);
        let mut stop = shutdown_rx;
        tasks.push(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        for outcome in sweeper.expire_orphans(Utc::now()) {
                            if outcome_tx.send(outcome).is_err() {
                                return;
                            }
                        }
                    }
                    _ = stop.changed() => return,
                }
            }
        }));

        info!("sync pipeline started with {} actors", actors);
        (
            Self {
                resolver,
                senders,
                shutdown,
                tasks,
            },
            outcome_rx,
        )
    }

    pub fn resolver(&self) -> &Arc<SyncConflictResolver> {
        &self.resolver
    }

    pub async fn submit(&self, event: ChangeEvent) -> Result<()> {
        let actor = self.resolver.shard_index(&event.identifier) % self.senders.len();
        self.senders[actor].send(event).await.map_err(|_| EngineError::Cancelled)
    }

    /// Stop accepting events, let the actors drain, and wait for them.
    pub async fn shutdown(self) {
        if self.shutdown.send(true).is_err() {
            debug!("orphan sweeper already stopped");
        }
        drop(self.senders);
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!("sync task ended abnormally during shutdown: {}", e);
            }
        }
        info!("sync pipeline stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ChangeOperation;

    #[tokio::test]
    async fn test_pipeline_releases_orphans_across_actors() {
        let resolver = Arc::new(SyncConflictResolver::default());
        let (pipeline, mut outcomes) = SyncPipeline::start(resolver, Duration::from_secs(3600));

        let child = ChangeEvent::new("line:1", "order_lines", ChangeOperation::Insert, "east").with_parent("order:1");
        pipeline.submit(child.clone()).await.unwrap();
        let first = outcomes.recv().await.unwrap();
        assert!(!first.is_applied());

        pipeline
            .submit(ChangeEvent::new("order:1", "orders", ChangeOperation::Insert, "east"))
            .await
            .unwrap();
        let parent = outcomes.recv().await.unwrap();
        let replay = outcomes.recv().await.unwrap();
        assert!(parent.is_applied());
        assert!(replay.replayed && replay.is_applied());
        assert_eq!(replay.event.event_id, child.event_id);

        pipeline.shutdown().await;
        println!("✓ Orphan released through the actor pipeline");
    }
}
