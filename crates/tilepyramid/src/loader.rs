//! Asynchronous tile loading with prioritization and deduplication.
//!
//! The owner thread submits requests with a priority (distance from the eye;
//! nearer is more urgent) and dispatches them once per frame. At most
//! `max_in_flight` fetches run at a time, and a key already in flight is
//! never fetched twice, even by another loader sharing the same
//! [`InFlightRegistry`]. Finished fetches come back over an `async_channel`
//! and are drained on the owner thread.

use crate::{
    delegates::{Completion, DelegatePipeline, FetchOutcome, FetchTask, RequestContext, TileRequest},
    error::Error,
    memory::TileMemoryCache,
    tile::TileKey,
};
use std::{
    cmp::Ordering,
    collections::{BinaryHeap, HashMap, HashSet},
    sync::{Arc, Mutex, PoisonError},
};
use tokio::runtime::Handle;

/// What happened to a submitted request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Submission {
    /// Queued for dispatch.
    Queued,
    /// Already queued; its priority was updated.
    Reprioritized,
    /// Already being fetched; nothing was queued.
    AlreadyInFlight,
    /// The requester resolved it without a task.
    Resolved,
}

impl Submission {
    /// Whether the submission left a fetch queued or running.
    #[must_use]
    pub fn is_pending(self) -> bool {
        !matches!(self, Submission::Resolved)
    }
}

/// Keys being fetched by any of the loaders sharing the registry.
///
/// Layers whose keys transform to the same cache slot share one registry
/// through [`Services`](crate::Services), so only one of them fetches it.
/// Clones share the same set.
#[derive(Debug, Clone, Default)]
pub struct InFlightRegistry {
    keys: Arc<Mutex<HashSet<TileKey>>>,
}

impl InFlightRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether some loader is fetching `key`.
    #[must_use]
    pub fn contains(&self, key: &TileKey) -> bool {
        self.lock().contains(key)
    }

    /// Number of keys being fetched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// Whether nothing is being fetched.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Claim `key` for one fetch. `None` if another fetch holds it.
    fn try_claim(&self, key: &TileKey) -> Option<InFlightClaim> {
        if !self.lock().insert(key.clone()) {
            return None;
        }
        Some(InFlightClaim {
            registry: self.clone(),
            key: key.clone(),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<TileKey>> {
        self.keys.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Releases its key when dropped.
#[derive(Debug)]
struct InFlightClaim {
    registry: InFlightRegistry,
    key: TileKey,
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        self.registry.lock().remove(&self.key);
    }
}

/// An entry in the priority queue.
#[derive(Debug)]
struct QueueEntry {
    key: TileKey,
    priority: f64,
    /// Generation counter to handle stale entries after priority updates.
    generation: u64,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for QueueEntry {}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: smaller distance first, then older submissions.
        other
            .priority
            .total_cmp(&self.priority)
            .then_with(|| other.generation.cmp(&self.generation))
    }
}

/// Schedules fetch tasks onto a Tokio runtime.
#[derive(Debug)]
pub struct TileLoader {
    runtime: Handle,
    max_in_flight: usize,
    heap: BinaryHeap<QueueEntry>,
    queued: HashMap<TileKey, (u64, FetchTask)>,
    next_generation: u64,
    in_flight: HashSet<TileKey>,
    registry: InFlightRegistry,
    completion_tx: async_channel::Sender<Completion>,
    completion_rx: async_channel::Receiver<Completion>,
}

impl TileLoader {
    /// Create a loader spawning onto `runtime`, deduplicating only its own
    /// fetches.
    #[must_use]
    pub fn new(runtime: Handle, max_in_flight: usize) -> Self {
        Self::with_registry(runtime, max_in_flight, InFlightRegistry::new())
    }

    /// Create a loader that skips keys other loaders on `registry` are
    /// fetching.
    #[must_use]
    pub fn with_registry(runtime: Handle, max_in_flight: usize, registry: InFlightRegistry) -> Self {
        let (completion_tx, completion_rx) = async_channel::unbounded();
        Self {
            runtime,
            max_in_flight: max_in_flight.max(1),
            heap: BinaryHeap::new(),
            queued: HashMap::new(),
            next_generation: 0,
            in_flight: HashSet::new(),
            registry,
            completion_tx,
            completion_rx,
        }
    }

    /// Submit a request with `priority` (distance; smaller is more urgent).
    pub fn submit(
        &mut self,
        pipeline: &DelegatePipeline,
        request: TileRequest,
        priority: f64,
        memory: &TileMemoryCache,
    ) -> Submission {
        if self.in_flight.contains(&request.key) || self.registry.contains(&request.key) {
            return Submission::AlreadyInFlight;
        }

        self.next_generation += 1;
        let generation = self.next_generation;

        if let Some((queued_generation, _)) = self.queued.get_mut(&request.key) {
            *queued_generation = generation;
            self.heap.push(QueueEntry {
                key: request.key,
                priority,
                generation,
            });
            return Submission::Reprioritized;
        }

        let ctx = RequestContext {
            memory,
            completions: &self.completion_tx,
        };
        let Some(task) = pipeline.requester().request_task(request, &ctx) else {
            return Submission::Resolved;
        };

        let key = task.request.key.clone();
        self.heap.push(QueueEntry {
            key: key.clone(),
            priority,
            generation,
        });
        self.queued.insert(key, (generation, task));
        Submission::Queued
    }

    /// Start queued fetches, most urgent first, up to the concurrency limit.
    ///
    /// Returns the number of fetches started.
    pub fn dispatch(&mut self, pipeline: &DelegatePipeline) -> usize {
        let mut started = 0;
        while self.in_flight.len() < self.max_in_flight {
            let Some(entry) = self.heap.pop() else {
                break;
            };
            // Skip entries superseded by a later priority update.
            let current = self
                .queued
                .get(&entry.key)
                .is_some_and(|(generation, _)| *generation == entry.generation);
            if !current {
                continue;
            }
            let Some((_, task)) = self.queued.remove(&entry.key) else {
                continue;
            };
            // Another loader started it since it was queued; its result
            // reaches the shared caches.
            let Some(claim) = self.registry.try_claim(&entry.key) else {
                tracing::trace!(key = %entry.key, "already fetched by another loader");
                continue;
            };

            self.in_flight.insert(entry.key);
            self.spawn(pipeline, task, claim);
            started += 1;
        }
        if started > 0 {
            tracing::trace!(
                started,
                in_flight = self.in_flight.len(),
                queued = self.queued.len(),
                "dispatched fetches"
            );
        }
        started
    }

    fn spawn(&self, pipeline: &DelegatePipeline, task: FetchTask, claim: InFlightClaim) {
        let fetch = Arc::clone(pipeline.fetch_context());
        let tx = self.completion_tx.clone();
        let runtime = self.runtime.clone();
        self.runtime.spawn(async move {
            let key = task.request.key.clone();
            let tile = task.request.tile.clone();
            // Run the fetch as its own task so a panic still releases the key.
            let outcome = match runtime.spawn(fetch.execute(task.request)).await {
                Ok(outcome) => outcome,
                Err(e) => FetchOutcome::Failed(Error::from(e)),
            };
            drop(claim);
            if tx.send(Completion { key, tile, outcome }).await.is_err() {
                tracing::debug!("loader dropped before fetch completed");
            }
        });
    }

    /// Collect every completion delivered so far, without blocking.
    pub fn drain_completions(&mut self) -> Vec<Completion> {
        let mut completions = Vec::new();
        while let Ok(completion) = self.completion_rx.try_recv() {
            self.in_flight.remove(&completion.key);
            completions.push(completion);
        }
        completions
    }

    /// Wait for the next completion.
    ///
    /// Returns `None` if nothing is in flight and no completion is pending.
    /// Queued requests are not dispatched by waiting.
    pub async fn next_completion(&mut self) -> Option<Completion> {
        if self.in_flight.is_empty() && self.completion_rx.is_empty() {
            return None;
        }
        let completion = self.completion_rx.recv().await.ok()?;
        self.in_flight.remove(&completion.key);
        Some(completion)
    }

    /// Drop every queued, undispatched request.
    ///
    /// Called at the start of a frame; requests still wanted are submitted
    /// again with fresh priorities.
    pub fn clear_queue(&mut self) {
        self.heap.clear();
        self.queued.clear();
    }

    /// The registry shared with other loaders.
    #[must_use]
    pub fn registry(&self) -> &InFlightRegistry {
        &self.registry
    }

    /// Whether `key` is being fetched by this loader.
    #[must_use]
    pub fn is_in_flight(&self, key: &TileKey) -> bool {
        self.in_flight.contains(key)
    }

    /// Whether `key` is queued for dispatch.
    #[must_use]
    pub fn is_queued(&self, key: &TileKey) -> bool {
        self.queued.contains_key(key)
    }

    /// Number of fetches in flight.
    #[must_use]
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    /// Number of queued requests.
    #[must_use]
    pub fn queued_count(&self) -> usize {
        self.queued.len()
    }

    /// Whether nothing is queued, in flight or waiting to be drained.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.queued.is_empty() && self.in_flight.is_empty() && self.completion_rx.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tile::TileCoord;

    fn key(column: i32) -> TileKey {
        TileKey::new(TileCoord::new(2, 1, column), Arc::from("shared"))
    }

    #[test]
    fn test_claims_exclusive_until_dropped() {
        let registry = InFlightRegistry::new();
        let other_loader = registry.clone();

        let claim = registry.try_claim(&key(0)).unwrap();
        assert!(other_loader.contains(&key(0)));
        assert!(other_loader.try_claim(&key(0)).is_none());
        // Released at the end of the statement.
        assert!(other_loader.try_claim(&key(1)).is_some());
        assert_eq!(registry.len(), 1);

        drop(claim);
        assert!(registry.is_empty());
        assert!(other_loader.try_claim(&key(0)).is_some());
    }
}
