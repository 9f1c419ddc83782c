// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::too_many_arguments, clippy::new_without_default)]

//! The Thread Dispatcher (§4.6 of the spec): tracks registered engines' health and
//! load, holds the cross-process queue of threads waiting for an engine, and runs the
//! `dispatch()` selection algorithm once per PCore loop tick.
//!
//! Like `process`, a `Dispatcher` never holds its own lock while calling into
//! [`process::Process`] (it sits above Process in the lock order: Pool < Namespace <
//! Graph < Process < Dispatcher < PCore), so `dispatch()` snapshots each candidate
//! thread's owning Process state, decides, and only then mutates its own queue.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use engine_client::RuntimeInfo;
use fnv::FnvHashMap as HashMap;
use graph::SamplingConfig;
use log::{debug, warn};
use parking_lot::Mutex;
use process::{Process, Thread, ThreadId, ThreadState};
use recycle_pool::{PoolError, RecyclePool};
use serde::{Deserialize, Serialize};

pub type EngineId = recycle_pool::Id;

#[derive(Debug, Eq, PartialEq)]
pub enum DispatchError {
    UnknownEngine(EngineId),
    Pool(PoolError),
}

impl fmt::Display for DispatchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DispatchError::UnknownEngine(id) => write!(f, "no engine registered with id {id}"),
            DispatchError::Pool(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for DispatchError {}

impl From<PoolError> for DispatchError {
    fn from(e: PoolError) -> DispatchError {
        DispatchError::Pool(e)
    }
}

/// How the dispatcher orders queued threads across processes when more than one is
/// eligible for the same engine. Within a single process, threads are always
/// considered in submission order regardless of policy (§4.6).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub enum Policy {
    Fifo,
    ShortestFirst,
    CapabilityMatched,
}

/// An engine's admission requirements, supplied at `register_engine` time (§6's
/// `engine_config`).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// The model family this engine serves; `None` admits any call regardless of the
    /// sampling config's requested model.
    pub model: Option<String>,
    pub capabilities: Vec<String>,
}

struct EngineRecord {
    addr: String,
    config: EngineConfig,
    runtime_info: RuntimeInfo,
    dead: bool,
    last_successful_ping: Option<Instant>,
    last_seen: Instant,
    assigned_count: usize,
}

struct QueuedThread {
    thread: Arc<Thread>,
    process: Arc<Process>,
    sampling_config: SamplingConfig,
}

struct Inner {
    engine_ids: RecyclePool,
    engines: HashMap<EngineId, EngineRecord>,
    queue: VecDeque<QueuedThread>,
    assignments: HashMap<ThreadId, EngineId>,
}

fn projected_load(record: &EngineRecord) -> usize {
    record.runtime_info.pending_jobs + record.assigned_count
}

fn is_healthy(record: &EngineRecord, freshness_window: Duration) -> bool {
    !record.dead
        && record
            .last_successful_ping
            .map(|t| t.elapsed() <= freshness_window)
            .unwrap_or(false)
}

fn admits(record: &EngineRecord, required_model: Option<&str>) -> bool {
    match required_model {
        Some(model) => record.config.model.as_deref() == Some(model),
        None => true,
    }
}

///
/// The Thread Dispatcher: the engine registry plus the cross-process dispatch queue.
///
pub struct Dispatcher {
    policy: Policy,
    max_queued_per_engine: usize,
    ping_on_select: bool,
    freshness_window: Duration,
    inner: Mutex<Inner>,
}

impl Dispatcher {
    pub fn new(
        policy: Policy,
        max_queued_per_engine: usize,
        ping_on_select: bool,
        freshness_window: Duration,
        engine_capacity: u32,
    ) -> Dispatcher {
        Dispatcher {
            policy,
            max_queued_per_engine,
            ping_on_select,
            freshness_window,
            inner: Mutex::new(Inner {
                engine_ids: RecyclePool::new(engine_capacity),
                engines: HashMap::default(),
                queue: VecDeque::new(),
                assignments: HashMap::default(),
            }),
        }
    }

    pub fn ping_on_select(&self) -> bool {
        self.ping_on_select
    }

    /// Enrolls a new engine, considering it healthy from the moment it registers
    /// (a freshly registered engine has no ping history to be stale).
    pub fn register_engine(&self, addr: impl Into<String>, config: EngineConfig) -> Result<EngineId, DispatchError> {
        let mut inner = self.inner.lock();
        let id = inner.engine_ids.allocate()?;
        inner.engines.insert(
            id,
            EngineRecord {
                addr: addr.into(),
                config,
                runtime_info: RuntimeInfo::default(),
                dead: false,
                last_successful_ping: Some(Instant::now()),
                last_seen: Instant::now(),
                assigned_count: 0,
            },
        );
        debug!("registered engine {id}");
        Ok(id)
    }

    /// Frees a dead engine's id and forgets it. Called by `pcore`'s `sweep_dead_clients`.
    pub fn deregister_engine(&self, id: EngineId) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        inner.engines.remove(&id).ok_or(DispatchError::UnknownEngine(id))?;
        inner.engine_ids.free(id)?;
        Ok(())
    }

    pub fn engine_addr(&self, id: EngineId) -> Option<String> {
        self.inner.lock().engines.get(&id).map(|e| e.addr.clone())
    }

    pub fn is_engine_dead(&self, id: EngineId) -> bool {
        self.inner.lock().engines.get(&id).map(|e| e.dead).unwrap_or(true)
    }

    /// Every currently-registered engine marked dead, for `pcore`'s `sweep_dead_clients`
    /// to deregister.
    pub fn dead_engines(&self) -> Vec<EngineId> {
        let inner = self.inner.lock();
        inner.engines.iter().filter(|&(_, r)| r.dead).map(|(id, _)| *id).collect()
    }

    /// Refreshes an engine's self-reported load and liveness timestamp (the
    /// `/engine_heartbeat` route). Does not by itself affect dispatch eligibility;
    /// that is gated on `last_successful_ping`, refreshed only via `mark_pinged`.
    pub fn engine_heartbeat(&self, id: EngineId, runtime_info: RuntimeInfo) -> Result<(), DispatchError> {
        let mut inner = self.inner.lock();
        let record = inner.engines.get_mut(&id).ok_or(DispatchError::UnknownEngine(id))?;
        record.runtime_info = runtime_info;
        record.last_seen = Instant::now();
        Ok(())
    }

    /// Marks every engine whose `last_seen` exceeds `expire_after` as `dead`, and
    /// returns their ids so the caller can sweep them (§4.7 `check_expired`).
    pub fn mark_expired_engines(&self, expire_after: Duration) -> Vec<EngineId> {
        let mut inner = self.inner.lock();
        let mut newly_dead = Vec::new();
        for (id, record) in inner.engines.iter_mut() {
            if !record.dead && record.last_seen.elapsed() > expire_after {
                record.dead = true;
                newly_dead.push(*id);
            }
        }
        for id in &newly_dead {
            warn!("engine {id} expired (missed heartbeat deadline)");
        }
        newly_dead
    }

    /// Engine ids the dispatcher hasn't successfully pinged within the freshness
    /// window, paired with their address, for the caller to probe before `dispatch()`
    /// when `ping_on_select` is set.
    pub fn stale_engines(&self) -> Vec<(EngineId, String)> {
        let inner = self.inner.lock();
        inner
            .engines
            .iter()
            .filter(|&(_, r)| !r.dead && !is_healthy(r, self.freshness_window))
            .map(|(id, r)| (*id, r.addr.clone()))
            .collect()
    }

    /// Records the outcome of a `ping_engine` probe: `Some(runtime_info)` refreshes
    /// both load and the ping freshness clock; `None` (ping failure) marks the engine
    /// dead, mirroring a missed heartbeat.
    pub fn mark_pinged(&self, id: EngineId, result: Option<RuntimeInfo>) {
        let mut inner = self.inner.lock();
        let Some(record) = inner.engines.get_mut(&id) else { return };
        match result {
            Some(runtime_info) => {
                record.runtime_info = runtime_info;
                record.last_successful_ping = Some(Instant::now());
            }
            None => {
                if !record.dead {
                    warn!("engine {id} failed to respond to ping; marking dead");
                }
                record.dead = true;
            }
        }
    }

    /// Queues a thread for dispatch. Threads belonging to the same process are always
    /// considered for an engine in the order they were pushed.
    pub fn push_thread(&self, thread: Arc<Thread>, process: Arc<Process>, sampling_config: SamplingConfig) {
        self.inner.lock().queue.push_back(QueuedThread { thread, process, sampling_config });
    }

    /// Runs one round of the selection algorithm (§4.6): for every queued thread, in
    /// policy order, finds the least-loaded healthy engine that admits it and assigns
    /// it, transitioning the owning Process's thread state to `Dispatched`. Threads
    /// whose process has died or been declared deadlocked are dropped with a logged
    /// discard rather than assigned.
    /// Returns every thread assigned this round; each thread is returned at most once
    /// across its lifetime.
    pub fn dispatch(&self) -> Vec<Arc<Thread>> {
        let mut inner = self.inner.lock();

        let mut candidates: Vec<usize> = (0..inner.queue.len()).collect();
        match self.policy {
            Policy::Fifo => {}
            Policy::ShortestFirst => {
                candidates.sort_by_key(|&i| inner.queue[i].sampling_config.max_tokens.unwrap_or(u32::MAX));
            }
            Policy::CapabilityMatched => {
                candidates.sort_by_key(|&i| if inner.queue[i].sampling_config.model.is_some() { 0 } else { 1 });
            }
        }

        let mut dispatched = Vec::new();
        let mut drop_indices = Vec::new();
        let freshness_window = self.freshness_window;
        let max_queued_per_engine = self.max_queued_per_engine;

        for index in candidates {
            let queued = &inner.queue[index];
            if queued.process.is_dead() || queued.process.is_deadlocked() {
                debug!("discarding thread {:?} of dead or deadlocked process {}", queued.thread.id, queued.process.pid());
                drop_indices.push(index);
                continue;
            }

            let required_model = queued.sampling_config.model.as_deref();
            let winner = inner
                .engines
                .iter()
                .filter(|&(_, r)| is_healthy(r, freshness_window))
                .filter(|&(_, r)| admits(r, required_model))
                .filter(|&(_, r)| r.assigned_count < max_queued_per_engine)
                .min_by_key(|&(id, r)| (projected_load(r), *id))
                .map(|(id, _)| *id);

            let Some(engine_id) = winner else { continue };

            let record = inner.engines.get_mut(&engine_id).expect("winner came from this map");
            record.assigned_count += 1;
            let thread = inner.queue[index].thread.clone();
            let process = inner.queue[index].process.clone();
            inner.assignments.insert(thread.id, engine_id);
            process.set_thread_state(thread.id, ThreadState::Dispatched);
            debug!("dispatched thread {:?} to engine {engine_id}", thread.id);

            dispatched.push(thread);
            drop_indices.push(index);
        }

        drop_indices.sort_unstable();
        for &index in drop_indices.iter().rev() {
            inner.queue.remove(index);
        }

        dispatched
    }

    /// The engine a dispatched thread was assigned to, for routing its `fill`/
    /// `generate` RPCs.
    pub fn assigned_engine(&self, thread_id: ThreadId) -> Option<EngineId> {
        self.inner.lock().assignments.get(&thread_id).copied()
    }

    /// Releases a completed (or abandoned) thread's claim on its engine's capacity.
    pub fn complete_thread(&self, thread_id: ThreadId) -> Option<EngineId> {
        let mut inner = self.inner.lock();
        let engine_id = inner.assignments.remove(&thread_id)?;
        if let Some(record) = inner.engines.get_mut(&engine_id) {
            record.assigned_count = record.assigned_count.saturating_sub(1);
        }
        Some(engine_id)
    }

    pub fn queue_len(&self) -> usize {
        self.inner.lock().queue.len()
    }
}
