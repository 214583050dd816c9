use std::collections::hash_map::DefaultHasher;
use std::collections::{HashMap, HashSet, VecDeque};
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use parking_lot::{Mutex, RwLock};

use crate::model::{
    AppliedChange, ChangeEvent, ChangeOperation, DeferReason, Id, OrphanReason, RejectReason, RuleAction,
    SyncDecision, SyncOutcome, SyncStrategy,
};

#[derive(Debug, Clone)]
pub struct ResolverConfig {
    pub shards: usize,
    /// How long an event may wait for its parent before it is surfaced as
    /// an unresolved orphan.
    pub orphan_timeout: Duration,
    /// Total deferred events across all identifiers.
    pub orphan_capacity: usize,
    pub default_strategy: SyncStrategy,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            shards: 16,
            orphan_timeout: Duration::from_secs(300),
            orphan_capacity: 10_000,
            default_strategy: SyncStrategy::default(),
        }
    }
}

#[derive(Debug)]
struct Pending {
    event: ChangeEvent,
    queued_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct Shard {
    /// Last change applied per identifier since it last converged.
    applied: HashMap<Id, AppliedChange>,
    /// Deferred events keyed by the identifier they change, in arrival order.
    deferred: HashMap<Id, VecDeque<Pending>>,
}

/// Decides, per change event, whether it applies, loses a conflict, waits for
/// a missing parent, or has to be surfaced as an orphan.
///
/// State is split into shards by identifier hash; a decision for one
/// identifier only takes that identifier's shard lock. Presence of
/// identifiers at the target lives in a separate sharded set that is only
/// ever locked after (never while waiting for) a state shard.
pub struct SyncConflictResolver {
    config: ResolverConfig,
    orphan_window: chrono::Duration,
    shards: Vec<Mutex<Shard>>,
    observed: Vec<RwLock<HashSet<Id>>>,
    strategies: RwLock<HashMap<String, SyncStrategy>>,
    pending: AtomicUsize,
}

impl Default for SyncConflictResolver {
    fn default() -> Self {
        Self::new(ResolverConfig::default())
    }
}

impl SyncConflictResolver {
    pub fn new(config: ResolverConfig) -> Self {
        let count = config.shards.max(1);
        let orphan_window = chrono::Duration::from_std(config.orphan_timeout).unwrap_or(chrono::Duration::MAX);
        Self {
            orphan_window,
            shards: (0..count).map(|_| Mutex::new(Shard::default())).collect(),
            observed: (0..count).map(|_| RwLock::new(HashSet::new())).collect(),
            strategies: RwLock::new(HashMap::new()),
            pending: AtomicUsize::new(0),
            config,
        }
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Strategy used for events of `object_class`; others use the default.
    pub fn set_strategy(&self, object_class: &str, strategy: SyncStrategy) {
        self.strategies.write().insert(object_class.to_string(), strategy);
    }

    pub fn strategy_for(&self, object_class: &str) -> SyncStrategy {
        self.strategies
            .read()
            .get(object_class)
            .cloned()
            .unwrap_or_else(|| self.config.default_strategy.clone())
    }

    pub fn shard_index(&self, identifier: &str) -> usize {
        let mut hasher = DefaultHasher::new();
        identifier.hash(&mut hasher);
        (hasher.finish() % self.shards.len() as u64) as usize
    }

    pub fn is_observed(&self, identifier: &str) -> bool {
        self.observed[self.shard_index(identifier)].read().contains(identifier)
    }

    /// Seed identifiers that already exist at the target. Events waiting on
    /// them are replayed and returned.
    pub fn observe_existing<I, S>(&self, identifiers: I) -> Vec<SyncOutcome>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut worklist = Vec::new();
        for identifier in identifiers {
            let identifier = identifier.as_ref();
            if self.observed[self.shard_index(identifier)].write().insert(identifier.to_string()) {
                worklist.push(identifier.to_string());
            }
        }
        let mut outcomes = Vec::new();
        self.release_waiting(worklist, &mut outcomes);
        outcomes
    }

    /// Forget the applied-change history of an identifier once both sides agree.
    pub fn mark_converged(&self, identifier: &str) {
        self.shards[self.shard_index(identifier)].lock().applied.remove(identifier);
    }

    pub fn last_applied(&self, identifier: &str) -> Option<AppliedChange> {
        self.shards[self.shard_index(identifier)].lock().applied.get(identifier).cloned()
    }

    /// Number of deferred events across all identifiers.
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    pub fn deferred_events(&self, identifier: &str) -> Vec<ChangeEvent> {
        self.shards[self.shard_index(identifier)]
            .lock()
            .deferred
            .get(identifier)
            .map(|queue| queue.iter().map(|p| p.event.clone()).collect())
            .unwrap_or_default()
    }

    /// Decide one event. The first outcome is for `event`; any further
    /// outcomes are deferred events released by it, in the order they were
    /// decided.
    pub fn submit(&self, event: ChangeEvent) -> Vec<SyncOutcome> {
        let mut worklist = Vec::new();
        let outcome = {
            let mut shard = self.shards[self.shard_index(&event.identifier)].lock();

            let blocking_parent = shard
                .deferred
                .get(&event.identifier)
                .and_then(|queue| queue.front())
                .map(|head| head.event.parent.clone().unwrap_or_else(|| head.event.identifier.clone()));
            let missing_parent = event
                .parent
                .clone()
                .filter(|p| p != &event.identifier && !self.is_observed(p));

            if let Some(parent) = blocking_parent {
                self.enqueue(&mut shard, event, DeferReason::QueuedBehind { parent })
            } else if let Some(parent) = missing_parent {
                self.enqueue(&mut shard, event, DeferReason::AwaitingParent { parent })
            } else {
                let decision = self.decide(&mut shard, &event, &mut worklist);
                SyncOutcome {
                    event,
                    decision,
                    replayed: false,
                }
            }
        };

        let mut outcomes = vec![outcome];
        self.release_waiting(worklist, &mut outcomes);
        outcomes
    }

    /// Surface deferred events whose parent did not arrive within the
    /// timeout. Events queued behind an expired one are re-evaluated.
    pub fn expire_orphans(&self, now: DateTime<Utc>) -> Vec<SyncOutcome> {
        let mut outcomes = Vec::new();
        let mut worklist = Vec::new();
        for shard in &self.shards {
            let mut shard = shard.lock();
            let mut identifiers: Vec<Id> = shard.deferred.keys().cloned().collect();
            identifiers.sort();
            for identifier in identifiers {
                self.advance(&mut shard, &identifier, Some(now), &mut outcomes, &mut worklist);
            }
        }
        self.release_waiting(worklist, &mut outcomes);
        outcomes
    }

    fn enqueue(&self, shard: &mut Shard, event: ChangeEvent, reason: DeferReason) -> SyncOutcome {
        let parent = match &reason {
            DeferReason::AwaitingParent { parent } | DeferReason::QueuedBehind { parent } => parent.clone(),
            DeferReason::ManualReview { .. } => event.identifier.clone(),
        };
        let reserved = self.pending.fetch_add(1, Ordering::SeqCst);
        if reserved >= self.config.orphan_capacity {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            warn!("deferred queue full, surfacing {} on {}", event.event_id, event.identifier);
            return SyncOutcome {
                event,
                decision: SyncDecision::UnresolvedOrphan {
                    parent,
                    reason: OrphanReason::QueueFull,
                },
                replayed: false,
            };
        }

        debug!("deferring {} on {} ({:?})", event.event_id, event.identifier, reason);
        shard
            .deferred
            .entry(event.identifier.clone())
            .or_default()
            .push_back(Pending {
                event: event.clone(),
                queued_at: Utc::now(),
            });
        SyncOutcome {
            event,
            decision: SyncDecision::Defer(reason),
            replayed: false,
        }
    }

    /// Replay deferred events unblocked by newly observed identifiers. Each
    /// shard is locked on its own; identifiers observed during a replay are
    /// pushed back onto the worklist.
    fn release_waiting(&self, mut worklist: Vec<Id>, outcomes: &mut Vec<SyncOutcome>) {
        while let Some(parent) = worklist.pop() {
            for shard in &self.shards {
                let mut shard = shard.lock();
                let mut waiting: Vec<Id> = shard
                    .deferred
                    .iter()
                    .filter(|(_, queue)| {
                        queue
                            .front()
                            .map(|head| head.event.parent.as_deref() == Some(parent.as_str()))
                            .unwrap_or(false)
                    })
                    .map(|(identifier, _)| identifier.clone())
                    .collect();
                waiting.sort();
                for identifier in waiting {
                    self.advance(&mut shard, &identifier, None, outcomes, &mut worklist);
                }
            }
        }
    }

    /// Work through the queue of one identifier until its head is still
    /// waiting on a missing parent (or the queue is empty).
    fn advance(
        &self,
        shard: &mut Shard,
        identifier: &str,
        now: Option<DateTime<Utc>>,
        outcomes: &mut Vec<SyncOutcome>,
        worklist: &mut Vec<Id>,
    ) {
        loop {
            let Some(queue) = shard.deferred.get_mut(identifier) else {
                return;
            };
            let Some(head) = queue.front() else {
                shard.deferred.remove(identifier);
                return;
            };

            let missing_parent = head
                .event
                .parent
                .clone()
                .filter(|p| p != identifier && !self.is_observed(p));
            let expired = now
                .and_then(|now| {
                    head.queued_at
                        .checked_add_signed(self.orphan_window)
                        .map(|deadline| deadline <= now)
                })
                .unwrap_or(false);

            let decision = match missing_parent {
                Some(_) if !expired => return,
                Some(parent) => Some(SyncDecision::UnresolvedOrphan {
                    parent,
                    reason: OrphanReason::TimedOut,
                }),
                None => None,
            };
            let Some(pending) = queue.pop_front() else {
                return;
            };
            if queue.is_empty() {
                shard.deferred.remove(identifier);
            }
            self.pending.fetch_sub(1, Ordering::SeqCst);

            let decision = match decision {
                Some(orphan) => {
                    warn!("{} on {} timed out waiting for its parent", pending.event.event_id, identifier);
                    orphan
                }
                None => self.decide(shard, &pending.event, worklist),
            };
            outcomes.push(SyncOutcome {
                event: pending.event,
                decision,
                replayed: true,
            });
        }
    }

    /// Conflict decision for an event whose parent is present. Caller holds
    /// the identifier's shard lock.
    fn decide(&self, shard: &mut Shard, event: &ChangeEvent, worklist: &mut Vec<Id>) -> SyncDecision {
        let decision = match shard.applied.get(&event.identifier) {
            Some(existing) if existing.source != event.source => self.resolve_conflict(event, existing),
            _ => SyncDecision::Apply,
        };
        if decision == SyncDecision::Apply {
            shard.applied.insert(event.identifier.clone(), AppliedChange::from(event));
            let mut observed = self.observed[self.shard_index(&event.identifier)].write();
            match event.operation {
                ChangeOperation::Delete => {
                    observed.remove(&event.identifier);
                }
                ChangeOperation::Insert | ChangeOperation::Update => {
                    if observed.insert(event.identifier.clone()) {
                        worklist.push(event.identifier.clone());
                    }
                }
            }
        }
        decision
    }

    fn resolve_conflict(&self, incoming: &ChangeEvent, existing: &AppliedChange) -> SyncDecision {
        match self.strategy_for(&incoming.object_class) {
            SyncStrategy::LatestTimestampWins => latest_wins(incoming, existing),
            SyncStrategy::SourceAlwaysWins { source } => prefer_source(&source, incoming, existing),
            SyncStrategy::RuleBased { rules } => {
                let matched = rules
                    .iter()
                    .enumerate()
                    .find(|(_, rule)| rule.predicate.matches(incoming, existing));
                match matched {
                    None => latest_wins(incoming, existing),
                    Some((rule_index, rule)) => match &rule.action {
                        RuleAction::Apply => SyncDecision::Apply,
                        RuleAction::Reject => SyncDecision::Reject(RejectReason::RuleRejected { rule_index }),
                        RuleAction::Defer => SyncDecision::Defer(DeferReason::ManualReview { rule_index }),
                        RuleAction::PreferSource(source) => prefer_source(source, incoming, existing),
                        RuleAction::LatestWins => latest_wins(incoming, existing),
                    },
                }
            }
        }
    }
}

fn lost_to(existing: &AppliedChange) -> SyncDecision {
    SyncDecision::Reject(RejectReason::LostConflict {
        winner_event_id: existing.event_id.clone(),
        winner_source: existing.source.clone(),
    })
}

/// Logical clocks decide when both sides carry one, timestamps otherwise;
/// exact ties go to the greater source tag.
fn latest_wins(incoming: &ChangeEvent, existing: &AppliedChange) -> SyncDecision {
    let ordering = match (incoming.logical_clock, existing.logical_clock) {
        (Some(a), Some(b)) => a.cmp(&b),
        _ => incoming.timestamp.cmp(&existing.timestamp),
    }
    .then_with(|| incoming.source.cmp(&existing.source));
    if ordering.is_gt() {
        SyncDecision::Apply
    } else {
        lost_to(existing)
    }
}

fn prefer_source(source: &str, incoming: &ChangeEvent, existing: &AppliedChange) -> SyncDecision {
    if incoming.source == source {
        SyncDecision::Apply
    } else if existing.source == source {
        lost_to(existing)
    } else {
        latest_wins(incoming, existing)
    }
}
