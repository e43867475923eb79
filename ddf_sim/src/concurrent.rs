//! Concurrent round executor: one tokio task per seeker.
//!
//! Seekers talk only through per-link `mpsc` channels, one per direction.
//! Every round is split by a `Barrier` into the same two phases as the
//! synchronous executor:
//!
//! ```text
//!   task i:  local update ─► send to each neighbor ─┐
//!                                                   ├─ barrier ─► receive from each
//!   task j:  local update ─► send to each neighbor ─┘   neighbor ─► fuse ─ barrier ─►
//!                                                       next round
//! ```
//!
//! Each node fuses its neighbors in id order regardless of arrival order,
//! and every measurement is a pure function of (agent, target, step), so
//! the result is bit-identical to [`ddf_core::FusionNetwork::run_round`].
//!
//! A failing task records the phase it failed in before reaching the
//! barrier; after that barrier every task sees the record and stops, so no
//! task is left waiting for a peer that has already quit.

use crate::error::SimError;
use crate::sensor::Sensor;

use ddf_core::{
    AgentId, CommunicationSchedule, FusionConfig, FusionError, FusionNode, NovelInformation,
};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Barrier};
use tracing::{debug, error};

/// Messages one seeker sends one neighbor in one round.
type Batch = Vec<NovelInformation>;

/// Buffered rounds per link
const LINK_CAPACITY: usize = 16;

const NO_FAILURE: u64 = u64::MAX;

/// Nodes handed back after a concurrent run.
#[derive(Debug)]
pub struct ConcurrentOutcome {
    pub nodes: BTreeMap<AgentId, FusionNode>,

    /// Novel-information messages delivered
    pub messages: u64,
}

/// Runs rounds `first..=last` with one task per node.
///
/// Every node needs a sensor. Links come from `schedule`; channel filters
/// must already be open on the nodes.
pub async fn run_rounds(
    nodes: BTreeMap<AgentId, FusionNode>,
    mut sensors: BTreeMap<AgentId, Sensor>,
    schedule: &CommunicationSchedule,
    config: FusionConfig,
    first: u64,
    last: u64,
) -> Result<ConcurrentOutcome, SimError> {
    if nodes.is_empty() || first > last {
        return Ok(ConcurrentOutcome { nodes, messages: 0 });
    }

    // Validate before spawning anything, so no task can be left at a barrier
    for &id in nodes.keys() {
        if !sensors.contains_key(&id) {
            return Err(SimError::Setup(FusionError::UnknownAgent(id)));
        }
    }
    for (a, b) in schedule.edges() {
        for id in [a, b] {
            if !nodes.contains_key(&id) {
                return Err(SimError::Setup(FusionError::UnknownAgent(id)));
            }
        }
    }

    let mut outgoing: BTreeMap<AgentId, BTreeMap<AgentId, mpsc::Sender<Batch>>> = BTreeMap::new();
    let mut incoming: BTreeMap<AgentId, BTreeMap<AgentId, mpsc::Receiver<Batch>>> = BTreeMap::new();
    for (a, b) in schedule.edges() {
        for (from, to) in [(a, b), (b, a)] {
            let (tx, rx) = mpsc::channel(LINK_CAPACITY);
            outgoing.entry(from).or_default().insert(to, tx);
            incoming.entry(to).or_default().insert(from, rx);
        }
    }

    let barrier = Arc::new(Barrier::new(nodes.len()));
    let failed_phase = Arc::new(AtomicU64::new(NO_FAILURE));

    let mut handles = Vec::with_capacity(nodes.len());
    for (id, node) in nodes {
        let sensor = sensors
            .remove(&id)
            .ok_or(SimError::Setup(FusionError::UnknownAgent(id)))?;
        let task = SeekerTask {
            id,
            node,
            sensor,
            config,
            outgoing: outgoing.remove(&id).unwrap_or_default(),
            incoming: incoming.remove(&id).unwrap_or_default(),
            barrier: barrier.clone(),
            failed_phase: failed_phase.clone(),
            phase: 0,
        };
        handles.push((id, tokio::spawn(task.run(first, last))));
    }
    debug!("Spawned {} seeker tasks for steps {}..={}", handles.len(), first, last);

    let mut finished = BTreeMap::new();
    let mut messages = 0;
    let mut failure = None;
    for (id, handle) in handles {
        match handle.await {
            Ok(Ok(Some((node, sent)))) => {
                messages += sent;
                finished.insert(id, node);
            }
            Ok(Ok(None)) => {}
            Ok(Err(e)) => {
                error!("{} failed: {}", id, e);
                failure.get_or_insert(e);
            }
            Err(e) => {
                failure.get_or_insert(SimError::task(format!("{id}: {e}")));
            }
        }
    }

    match failure {
        Some(e) => Err(e),
        None => Ok(ConcurrentOutcome {
            nodes: finished,
            messages,
        }),
    }
}

/// One seeker's side of the concurrent run.
struct SeekerTask {
    id: AgentId,
    node: FusionNode,
    sensor: Sensor,
    config: FusionConfig,
    outgoing: BTreeMap<AgentId, mpsc::Sender<Batch>>,
    incoming: BTreeMap<AgentId, mpsc::Receiver<Batch>>,
    barrier: Arc<Barrier>,

    /// Earliest phase in which any task failed
    failed_phase: Arc<AtomicU64>,

    /// Phases completed by this task
    phase: u64,
}

impl SeekerTask {
    /// Returns the node and its sent-message count, or `None` if a peer
    /// aborted the run.
    async fn run(mut self, first: u64, last: u64) -> Result<Option<(FusionNode, u64)>, SimError> {
        let mut sent = 0;

        for step in first..=last {
            let communicates = self.config.communicates_at(step);

            let local = self.local_phase(step, communicates).await;
            if self.sync(local.is_err()).await {
                return local.map(|_| None);
            }
            sent += local?;

            if communicates {
                let fused = self.fuse_phase(step).await;
                if self.sync(fused.is_err()).await {
                    return fused.map(|_| None);
                }
            }
        }

        Ok(Some((self.node, sent)))
    }

    /// Local update, then send (or commit on silent steps).
    async fn local_phase(&mut self, step: u64, communicates: bool) -> Result<u64, SimError> {
        self.node
            .local_update(&mut self.sensor, step)
            .map_err(|e| SimError::round(step, e))?;

        if !communicates {
            self.node.commit_local().map_err(|e| SimError::round(step, e))?;
            return Ok(0);
        }

        let mut batches: BTreeMap<AgentId, Batch> = BTreeMap::new();
        for message in self.node.send().map_err(|e| SimError::round(step, e))? {
            batches.entry(message.to).or_default().push(message);
        }

        let mut sent = 0;
        for (&to, tx) in &self.outgoing {
            let batch = batches.remove(&to).unwrap_or_default();
            sent += batch.len() as u64;
            tx.send(batch)
                .await
                .map_err(|_| SimError::LinkClosed { from: self.id, to })?;
        }

        if let Some(&to) = batches.keys().next() {
            return Err(SimError::round(step, FusionError::UnknownAgent(to)));
        }
        Ok(sent)
    }

    /// Receive one batch per neighbor and fuse.
    async fn fuse_phase(&mut self, step: u64) -> Result<(), SimError> {
        let mut inbox = Vec::new();
        for (&from, rx) in self.incoming.iter_mut() {
            let batch = rx.recv().await.ok_or(SimError::LinkClosed { from, to: self.id })?;
            inbox.extend(batch);
        }

        self.node
            .receive_and_fuse(inbox)
            .map_err(|e| SimError::round(step, e))
    }

    /// Waits for every task. True when some task failed and the run stops.
    async fn sync(&mut self, failed: bool) -> bool {
        let phase = self.phase;
        self.phase += 1;
        if failed {
            self.failed_phase.fetch_min(phase, Ordering::SeqCst);
        }
        self.barrier.wait().await;

        // A peer may already be failing in the next phase; only this one counts
        self.failed_phase.load(Ordering::SeqCst) <= phase
    }
}
