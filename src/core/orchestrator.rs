//! Build orchestration
//!
//! Walks a [`BuildPlan`] with a bounded pool of workers. Each node moves
//! through
//!
//! ```text
//! Pending -> Done(cache hit)
//! Pending -> Reserving -> Building -> Done(built) | Failed
//! ```
//!
//! A node is dispatched only once all its dependencies are `Done`. When a
//! node fails, every transitive dependent becomes `Blocked`, and the run
//! carries on with whatever is still buildable so the report shows the whole
//! blast radius. Workers talk to each other only through the store; they
//! report transitions to the run loop, which owns all traversal state.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::Path;
use std::time::Duration;

use backoff::ExponentialBackoffBuilder;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::defaults;
use crate::core::assemble::{self, AssemblyOptions, AssemblyReport};
use crate::core::hasher::ContentHash;
use crate::core::plan::{BuildPlan, ResolvedNode};
use crate::core::target::Target;
use crate::error::{AssemblyError, StoreError};
use crate::infra::executor::{DependencyArtifact, Executor};
use crate::infra::store::{Reservation, Store};

/// Orchestrator settings
#[derive(Debug, Clone, Copy)]
pub struct OrchestratorConfig {
    /// Concurrent builds
    pub jobs: usize,
    /// Longest wait on another process's reservation
    pub reservation_wait: Duration,
    /// First backoff interval while waiting
    pub initial_backoff: Duration,
    /// Backoff interval cap
    pub max_backoff: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            jobs: num_cpus::get(),
            reservation_wait: Duration::from_secs(defaults::RESERVATION_WAIT_SECS),
            initial_backoff: Duration::from_millis(defaults::RESERVATION_INITIAL_BACKOFF_MS),
            max_backoff: Duration::from_millis(defaults::RESERVATION_MAX_BACKOFF_MS),
        }
    }
}

/// How a node reached `Done`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    /// Found complete in the store
    CacheHit,
    /// Built by this run
    Built,
}

/// Per-node state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeState {
    /// Waiting for dependencies or a free worker
    Pending,
    /// Claiming the store entry
    Reserving,
    /// The build capability is running
    Building,
    /// Artifacts are in the store
    Done(Outcome),
    /// The node's own attempt failed
    Failed(String),
    /// A dependency failed
    Blocked {
        /// Failed nodes this one transitively depends on
        by: BTreeSet<ContentHash>,
    },
    /// Not run because the operator cancelled
    Cancelled,
}

impl NodeState {
    /// Whether the state is final
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Done(_) | Self::Failed(_) | Self::Blocked { .. } | Self::Cancelled
        )
    }

    /// Short label for progress output
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Reserving => "reserving",
            Self::Building => "building",
            Self::Done(Outcome::CacheHit) => "cached",
            Self::Done(Outcome::Built) => "built",
            Self::Failed(_) => "failed",
            Self::Blocked { .. } => "blocked",
            Self::Cancelled => "cancelled",
        }
    }
}

/// A failed node and its root cause
#[derive(Debug, Clone, Serialize)]
pub struct FailedNode {
    pub hash: ContentHash,
    pub id: String,
    pub cause: String,
}

/// A blocked node and the failures blocking it
#[derive(Debug, Clone, Serialize)]
pub struct BlockedNode {
    pub hash: ContentHash,
    pub id: String,
    pub blocked_by: Vec<String>,
}

/// Result of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct BuildReport {
    /// Nodes built by this run, `name@version`
    pub built: Vec<String>,
    /// Nodes found in the store
    pub cache_hits: Vec<String>,
    /// Nodes whose own build failed
    pub failed: Vec<FailedNode>,
    /// Nodes not attempted because a dependency failed
    pub blocked: Vec<BlockedNode>,
    /// Nodes not attempted because of cancellation
    pub cancelled: Vec<String>,
    /// Final state of every node
    #[serde(skip)]
    pub states: BTreeMap<ContentHash, NodeState>,
}

impl BuildReport {
    /// Every node is done
    pub fn success(&self) -> bool {
        self.failed.is_empty() && self.blocked.is_empty() && self.cancelled.is_empty()
    }

    fn from_states(plan: &BuildPlan, states: BTreeMap<ContentHash, NodeState>) -> Self {
        let id = |hash: &ContentHash| plan.node(hash).map_or_else(|| hash.to_string(), ResolvedNode::id);
        let mut report = Self::default();

        for node in plan.order() {
            match states.get(&node.hash) {
                Some(NodeState::Done(Outcome::Built)) => report.built.push(node.id()),
                Some(NodeState::Done(Outcome::CacheHit)) => report.cache_hits.push(node.id()),
                Some(NodeState::Failed(cause)) => report.failed.push(FailedNode {
                    hash: node.hash.clone(),
                    id: node.id(),
                    cause: cause.clone(),
                }),
                Some(NodeState::Blocked { by }) => report.blocked.push(BlockedNode {
                    hash: node.hash.clone(),
                    id: node.id(),
                    blocked_by: by.iter().map(id).collect(),
                }),
                Some(NodeState::Cancelled) => report.cancelled.push(node.id()),
                _ => {}
            }
        }

        report.states = states;
        report
    }
}

/// What a worker hands back to the run loop
#[derive(Debug)]
enum WorkerResult {
    Done(Outcome),
    Failed(String),
    Cancelled,
}

enum WaitError {
    Held(String),
    Cancelled,
    Store(StoreError),
}

/// Runs plans against a store
#[derive(Debug, Clone)]
pub struct Orchestrator {
    store: Store,
    executor: Executor,
    config: OrchestratorConfig,
}

impl Orchestrator {
    /// Create an orchestrator
    pub fn new(store: Store, executor: Executor, config: OrchestratorConfig) -> Self {
        Self {
            store,
            executor,
            config: OrchestratorConfig {
                jobs: config.jobs.max(1),
                ..config
            },
        }
    }

    /// The store
    pub fn store(&self) -> &Store {
        &self.store
    }

    /// The executor
    pub fn executor(&self) -> &Executor {
        &self.executor
    }

    /// Build every node of a plan
    ///
    /// `observer` sees each state transition as the run loop applies it.
    /// Cancelling `cancel` stops dispatch at once; builds already running
    /// finish, reservations not yet building are released, and the rest of
    /// the plan is reported as cancelled.
    pub async fn run<F>(
        &self,
        plan: &BuildPlan,
        cancel: &CancellationToken,
        mut observer: F,
    ) -> BuildReport
    where
        F: FnMut(&ResolvedNode, &NodeState),
    {
        let order: BTreeMap<&ContentHash, usize> = plan
            .order()
            .enumerate()
            .map(|(i, node)| (&node.hash, i))
            .collect();

        let mut states: BTreeMap<ContentHash, NodeState> = plan
            .order()
            .map(|node| (node.hash.clone(), NodeState::Pending))
            .collect();
        let mut waiting_on: BTreeMap<ContentHash, usize> = plan
            .order()
            .map(|node| (node.hash.clone(), node.dependencies.len()))
            .collect();
        let mut ready: VecDeque<ContentHash> = plan
            .order()
            .filter(|node| node.dependencies.is_empty())
            .map(|node| node.hash.clone())
            .collect();

        let (events_tx, mut events_rx) = mpsc::unbounded_channel::<(ContentHash, NodeState)>();
        let mut workers: JoinSet<(ContentHash, WorkerResult)> = JoinSet::new();

        tracing::info!(
            "Building {} node(s) with {} worker(s)",
            plan.len(),
            self.config.jobs
        );

        loop {
            while !cancel.is_cancelled() && workers.len() < self.config.jobs {
                let Some(hash) = ready.pop_front() else {
                    break;
                };
                let Some(node) = plan.node(&hash) else {
                    continue;
                };
                let dependencies = node
                    .dependencies
                    .iter()
                    .map(|d| DependencyArtifact {
                        name: d.name.clone(),
                        path: self.store.entry_path(&d.hash),
                    })
                    .collect();

                let worker = tokio::spawn(run_node(
                    self.clone(),
                    node.clone(),
                    plan.target().clone(),
                    dependencies,
                    cancel.clone(),
                    events_tx.clone(),
                ));
                workers.spawn(async move {
                    match worker.await {
                        Ok(done) => done,
                        Err(e) => (hash, WorkerResult::Failed(panic_cause("build worker", e))),
                    }
                });
            }

            if workers.is_empty() {
                break;
            }

            tokio::select! {
                Some((hash, state)) = events_rx.recv() => {
                    let current = states.get(&hash);
                    if current.is_some_and(|s| !s.is_terminal()) {
                        if let Some(node) = plan.node(&hash) {
                            observer(node, &state);
                        }
                        states.insert(hash, state);
                    }
                }
                Some(joined) = workers.join_next() => {
                    let (hash, result) = match joined {
                        Ok(done) => done,
                        Err(e) => {
                            tracing::error!("Build worker terminated: {}", e);
                            continue;
                        }
                    };

                    let state = match result {
                        WorkerResult::Done(outcome) => NodeState::Done(outcome),
                        WorkerResult::Failed(cause) => NodeState::Failed(cause),
                        WorkerResult::Cancelled => NodeState::Cancelled,
                    };
                    if let Some(node) = plan.node(&hash) {
                        observer(node, &state);
                    }

                    match &state {
                        NodeState::Done(_) => {
                            let mut unlocked: Vec<&ContentHash> = Vec::new();
                            for dependent in plan.dependents(&hash) {
                                if let Some(count) = waiting_on.get_mut(dependent) {
                                    *count = count.saturating_sub(1);
                                    if *count == 0 {
                                        unlocked.push(dependent);
                                    }
                                }
                            }
                            unlocked.sort_by_key(|h| order.get(h).copied().unwrap_or(usize::MAX));
                            ready.extend(unlocked.into_iter().cloned());
                        }
                        NodeState::Failed(cause) => {
                            tracing::warn!("{} failed: {}", plan.node(&hash).map_or_else(String::new, ResolvedNode::id), cause);
                            for dependent in plan.transitive_dependents(&hash) {
                                let blocked = match states.get_mut(&dependent) {
                                    Some(NodeState::Blocked { by }) => {
                                        by.insert(hash.clone());
                                        continue;
                                    }
                                    Some(state) if !state.is_terminal() => state,
                                    _ => continue,
                                };
                                *blocked = NodeState::Blocked {
                                    by: BTreeSet::from([hash.clone()]),
                                };
                                if let Some(node) = plan.node(&dependent) {
                                    observer(node, blocked);
                                }
                            }
                        }
                        _ => {}
                    }
                    states.insert(hash, state);
                }
            }
        }

        if cancel.is_cancelled() {
            tracing::warn!("Build cancelled; nodes not yet started were skipped");
        }

        for (hash, state) in &mut states {
            let next = match state {
                NodeState::Pending if cancel.is_cancelled() => NodeState::Cancelled,
                NodeState::Reserving | NodeState::Building => {
                    NodeState::Failed("build worker terminated unexpectedly".to_string())
                }
                _ => continue,
            };
            if let Some(node) = plan.node(hash) {
                observer(node, &next);
            }
            *state = next;
        }

        let report = BuildReport::from_states(plan, states);
        tracing::info!(
            "Build finished: {} built, {} cached, {} failed, {} blocked, {} cancelled",
            report.built.len(),
            report.cache_hits.len(),
            report.failed.len(),
            report.blocked.len(),
            report.cancelled.len()
        );
        report
    }

    /// Assemble the plan's output from the store
    pub fn assemble(
        &self,
        plan: &BuildPlan,
        destination: &Path,
        options: &AssemblyOptions,
    ) -> Result<AssemblyReport, AssemblyError> {
        assemble::assemble(plan, &self.store, destination, options)
    }

    /// Claim a node's store entry, waiting out other holders
    async fn reserve(
        &self,
        node: &ResolvedNode,
        cancel: &CancellationToken,
    ) -> Result<Reservation, WaitError> {
        let policy = ExponentialBackoffBuilder::new()
            .with_initial_interval(self.config.initial_backoff)
            .with_max_interval(self.config.max_backoff)
            .with_max_elapsed_time(Some(self.config.reservation_wait))
            .build();

        let store = &self.store;
        let version = node.version.to_string();
        let version = version.as_str();

        let attempt = backoff::future::retry(policy, move || async move {
            if cancel.is_cancelled() {
                return Err(backoff::Error::permanent(WaitError::Cancelled));
            }
            match store.reserve(&node.hash, node.name(), version) {
                Ok(Reservation::AlreadyReserved { holder }) => {
                    tracing::debug!("{} is being built by {}; waiting", node.id(), holder);
                    Err(backoff::Error::transient(WaitError::Held(holder.to_string())))
                }
                Ok(reservation) => Ok(reservation),
                Err(e) => Err(backoff::Error::permanent(WaitError::Store(e))),
            }
        });

        tokio::select! {
            result = attempt => result,
            () = cancel.cancelled() => Err(WaitError::Cancelled),
        }
    }
}

/// One node, from cache check to commit
async fn run_node(
    orchestrator: Orchestrator,
    node: ResolvedNode,
    target: Target,
    dependencies: Vec<DependencyArtifact>,
    cancel: CancellationToken,
    events: mpsc::UnboundedSender<(ContentHash, NodeState)>,
) -> (ContentHash, WorkerResult) {
    let hash = node.hash.clone();
    let store = &orchestrator.store;

    if store.lookup(&hash).is_some() {
        touch(store, &node);
        return (hash, WorkerResult::Done(Outcome::CacheHit));
    }

    let _ = events.send((hash.clone(), NodeState::Reserving));
    let token = match orchestrator.reserve(&node, &cancel).await {
        Ok(Reservation::Claimed(token)) => token,
        Ok(Reservation::AlreadyComplete(_)) => {
            touch(store, &node);
            return (hash, WorkerResult::Done(Outcome::CacheHit));
        }
        // `reserve` retries until the holder is gone; this arm is unreachable
        // unless the backoff gives up without an error
        Ok(Reservation::AlreadyReserved { holder }) => {
            return (
                hash.clone(),
                WorkerResult::Failed(
                    StoreError::ReservationTimeout {
                        hash: hash.to_string(),
                        holder: holder.to_string(),
                    }
                    .to_string(),
                ),
            )
        }
        Err(WaitError::Cancelled) => return (hash, WorkerResult::Cancelled),
        Err(WaitError::Held(holder)) => {
            return (
                hash.clone(),
                WorkerResult::Failed(
                    StoreError::ReservationTimeout {
                        hash: hash.to_string(),
                        holder,
                    }
                    .to_string(),
                ),
            )
        }
        Err(WaitError::Store(e)) => return (hash, WorkerResult::Failed(e.to_string())),
    };

    if cancel.is_cancelled() {
        if let Err(e) = store.release(token, "cancelled before build") {
            tracing::warn!("Failed to release {}: {}", node.id(), e);
        }
        return (hash, WorkerResult::Cancelled);
    }

    let _ = events.send((hash.clone(), NodeState::Building));
    let build = {
        let executor = orchestrator.executor.clone();
        let node = node.clone();
        let staging = token.staging_dir().to_path_buf();
        tokio::spawn(async move {
            executor
                .build(&node, &target, &dependencies, &staging)
                .await
        })
    };
    let built = match build.await {
        Ok(built) => built.map_err(|e| e.to_string()),
        Err(e) => Err(panic_cause("build", e)),
    };

    let result = match built {
        Ok(artifacts) => match store.commit(token, &artifacts) {
            Ok(_) => WorkerResult::Done(Outcome::Built),
            Err(e) => WorkerResult::Failed(e.to_string()),
        },
        Err(cause) => {
            if let Err(release_error) = store.release(token, &cause) {
                tracing::warn!("Failed to release {}: {}", node.id(), release_error);
            }
            WorkerResult::Failed(cause)
        }
    };
    (hash, result)
}

/// Failure cause for a task that panicked or was aborted
fn panic_cause(what: &str, error: JoinError) -> String {
    let Ok(payload) = error.try_into_panic() else {
        return format!("{what} was aborted");
    };
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned());
    match message {
        Some(message) => format!("{what} panicked: {message}"),
        None => format!("{what} panicked"),
    }
}

fn touch(store: &Store, node: &ResolvedNode) {
    if let Err(e) = store.touch(&node.hash) {
        tracing::warn!("Failed to record use of {}: {}", node.id(), e);
    }
    tracing::debug!("Cache hit for {} ({})", node.id(), node.hash.short());
}
