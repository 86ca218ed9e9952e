//! Asynchronous, incrementally-updatable dependency graph tracer.
//!
//! The tracer repeatedly drives a caller-supplied [`Resolver`] to discover
//! the (possibly cyclic) dependency graph from a set of entry points. Jobs
//! are cooperatively cancellable: a retrace of an identifier invalidates the
//! in-flight job for it, whose eventual result is then discarded. When the
//! pending set drains, nodes that became unreachable from the entry points
//! are pruned and a completion event is broadcast.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::broadcast;
use tracing::{debug, error, info};

use crate::graph::Graph;
use crate::traversal::find_disconnected_from_entry_points;

/// Resolves one identifier to the identifiers it depends on.
///
/// Supplied by the orchestrator; a typical implementation opens a dependency
/// trap on the file cache, reads the file through it, and extracts resolved
/// import paths. May fail with any error; failures are reported per-id and
/// never abort sibling resolutions.
#[async_trait]
pub trait Resolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Result<Vec<String>>;
}

/// One in-flight resolution attempt.
///
/// Cancellation is cooperative: invalidation flips `live` and the settling
/// code discards the result instead of aborting the underlying I/O.
struct TraceJob {
    id: String,
    live: AtomicBool,
}

impl TraceJob {
    fn new(id: &str) -> Self {
        TraceJob {
            id: id.to_string(),
            live: AtomicBool::new(true),
        }
    }

    fn invalidate(&self) {
        self.live.store(false, Ordering::SeqCst);
    }

    fn is_live(&self) -> bool {
        self.live.load(Ordering::SeqCst)
    }
}

/// A resolution failure, keyed by the identifier that failed.
#[derive(Debug, Clone)]
pub struct TraceError {
    pub id: String,
    pub error: Arc<anyhow::Error>,
}

/// Lifecycle signals broadcast by the tracer.
#[derive(Debug, Clone)]
pub enum TracerEvent {
    /// A new trace epoch began, triggered by tracing `id`.
    Started { id: String },
    /// The pending set drained: the graph snapshot after pruning, the ids
    /// pruned as disconnected, and every error accumulated this epoch.
    Completed {
        graph: Arc<Graph>,
        pruned: Vec<String>,
        errors: Vec<TraceError>,
    },
    /// One identifier failed to resolve. Does not block completion.
    Failed { id: String, error: Arc<anyhow::Error> },
}

struct TracerState {
    graph: Graph,
    pending: HashMap<String, Arc<TraceJob>>,
    started: bool,
    errors: Vec<TraceError>,
}

struct Shared {
    resolver: Arc<dyn Resolver>,
    state: Mutex<TracerState>,
    events: broadcast::Sender<TracerEvent>,
}

/// The cyclic dependency graph tracer. Cheap to clone; all clones share one
/// graph and one pending set.
#[derive(Clone)]
pub struct GraphTracer {
    shared: Arc<Shared>,
}

impl GraphTracer {
    pub fn new(resolver: Arc<dyn Resolver>) -> Self {
        let (events, _) = broadcast::channel(256);
        GraphTracer {
            shared: Arc::new(Shared {
                resolver,
                state: Mutex::new(TracerState {
                    graph: Graph::new(),
                    pending: HashMap::new(),
                    started: false,
                    errors: Vec::new(),
                }),
                events,
            }),
        }
    }

    /// Subscribe to tracer lifecycle events. Subscribe before the first
    /// `trace` call to observe the epoch's `Started` signal.
    pub fn subscribe(&self) -> broadcast::Receiver<TracerEvent> {
        self.shared.events.subscribe()
    }

    /// Declare `id` as an entry point and trace it. Entry points always
    /// reappear in the next completed graph, even if transiently pruned.
    pub fn add_entry_point(&self, id: &str) {
        let mut state = self.lock_state();
        state.graph.add_entry_point(id);
        Shared::trace_locked(&self.shared, &mut state, id);
    }

    /// Trace `id`: invalidate any still-pending job for it and schedule a
    /// fresh resolution. Resolution never starts synchronously, leaving a
    /// window for invalidation before any I/O begins.
    pub fn trace(&self, id: &str) {
        let mut state = self.lock_state();
        Shared::trace_locked(&self.shared, &mut state, id);
    }

    /// Invalidate any pending job for `id` and remove the node and its edges
    /// from the graph. An entry point is immediately re-traced.
    pub fn prune(&self, id: &str) {
        let mut state = self.lock_state();
        if let Some(job) = state.pending.remove(id) {
            job.invalidate();
        }
        if state.graph.has_node(id) {
            debug!("Pruning node {id}");
            state.graph.remove_node_and_edges(id);
        }
        if state.graph.is_entry_point(id) {
            Shared::trace_locked(&self.shared, &mut state, id);
        } else {
            Shared::maybe_complete(&self.shared, &mut state);
        }
    }

    /// Remove every node unreachable from the entry points. The same sweep
    /// runs automatically at epoch completion; this entry point exists for
    /// callers that mutate the graph out of band.
    pub fn prune_disconnected(&self) -> Vec<String> {
        let mut state = self.lock_state();
        Shared::prune_disconnected_locked(&mut state)
    }

    /// Snapshot of the current graph.
    pub fn graph(&self) -> Graph {
        self.lock_state().graph.clone()
    }

    /// Number of jobs currently pending.
    pub fn pending_count(&self) -> usize {
        self.lock_state().pending.len()
    }

    fn lock_state(&self) -> MutexGuard<'_, TracerState> {
        self.shared.state.lock().expect("tracer state lock poisoned")
    }
}

impl Shared {
    fn trace_locked(shared: &Arc<Shared>, state: &mut TracerState, id: &str) {
        if let Some(previous) = state.pending.remove(id) {
            debug!("Invalidating pending trace for {id}");
            previous.invalidate();
        }
        let job = Arc::new(TraceJob::new(id));
        state.pending.insert(id.to_string(), job.clone());

        if !state.started {
            state.started = true;
            info!("Trace epoch started at {id}");
            let _ = shared.events.send(TracerEvent::Started { id: id.to_string() });
        }

        let shared = shared.clone();
        tokio::spawn(async move {
            // The spawn boundary is the invalidation window: a job can be
            // superseded before its resolution ever starts.
            if !job.is_live() {
                return;
            }
            let resolved = shared.resolver.resolve(&job.id).await;
            Shared::settle(&shared, &job, resolved);
        });
    }

    /// Merge a settled resolution into the graph, unless the job was
    /// invalidated while its I/O was in flight.
    fn settle(shared: &Arc<Shared>, job: &TraceJob, resolved: Result<Vec<String>>) {
        let mut state = shared.state.lock().expect("tracer state lock poisoned");
        if !job.is_live() {
            debug!("Discarding invalidated trace result for {}", job.id);
            return;
        }
        state.pending.remove(&job.id);

        match resolved {
            Ok(dependencies) => {
                debug!(
                    "Resolved {} -> {} dependencies",
                    job.id,
                    dependencies.len()
                );
                if !state.graph.has_node(&job.id) {
                    state.graph.add_node(&job.id);
                }
                for dep in &dependencies {
                    // A module importing itself is legal input; the graph
                    // has no self-edges, so the import contributes nothing.
                    if dep == &job.id {
                        debug!("Ignoring self-dependency of {}", job.id);
                        continue;
                    }
                    if !state.graph.has_node(dep) {
                        state.graph.add_node(dep);
                        if !state.pending.contains_key(dep) {
                            Shared::trace_locked(shared, &mut state, dep);
                        }
                    }
                    state.graph.add_edge(&job.id, dep);
                }
            }
            Err(err) => {
                error!("Failed to resolve {}: {err:#}", job.id);
                let error = Arc::new(err);
                state.errors.push(TraceError {
                    id: job.id.clone(),
                    error: error.clone(),
                });
                let _ = shared.events.send(TracerEvent::Failed {
                    id: job.id.clone(),
                    error,
                });
            }
        }

        Shared::maybe_complete(shared, &mut state);
    }

    /// Emit the completion signal if a live epoch just drained.
    fn maybe_complete(shared: &Arc<Shared>, state: &mut TracerState) {
        if !state.started || !state.pending.is_empty() {
            return;
        }
        let pruned = Shared::prune_disconnected_locked(state);
        let errors = std::mem::take(&mut state.errors);
        state.started = false;
        info!(
            "Trace epoch completed: {} nodes, {} pruned, {} errors",
            state.graph.node_count(),
            pruned.len(),
            errors.len()
        );
        let _ = shared.events.send(TracerEvent::Completed {
            graph: Arc::new(state.graph.clone()),
            pruned,
            errors,
        });
    }

    fn prune_disconnected_locked(state: &mut TracerState) -> Vec<String> {
        let disconnected = find_disconnected_from_entry_points(&state.graph);
        for id in &disconnected {
            state.graph.remove_node_and_edges(id);
        }
        disconnected
    }
}
