// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(
    clippy::len_without_is_empty,
    clippy::new_without_default,
    clippy::too_many_arguments,
    clippy::mutex_atomic
)]

//! The Process abstraction (§3, §4.5 of the spec): one registered VM's placeholders,
//! the call threads it has queued against the shared Static Graph, and the liveness
//! bookkeeping (`dead`/`bad`/`bad_exception`) that the rest of the runtime consults
//! before dispatching any more work on its behalf.
//!
//! A Process never locks its own state while calling into [`graph::Graph`] or
//! [`svar::SvNamespace`]: those sit below Process in the lock order (Pool < Namespace
//! < Graph < Process < Dispatcher < PCore), so a Process method gathers what it needs
//! from them first, drops any borrow, and only then takes its own lock to record the
//! result. This mirrors the teacher's own rule of never holding a `parking_lot` guard
//! across something that can itself recurse into another lock.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_latch::AsyncLatch;
use fnv::FnvHashMap as HashMap;
use graph::{EntryId, Graph, GraphError, NodeKind, Placeholder};
use log::{debug, warn};
use parking_lot::Mutex;
use svar::{SvError, SvId, SvNamespace};

pub type Pid = recycle_pool::Id;
/// A thread is identified by the `EntryId` of the `PlaceholderGen` node it is
/// anchored at: that id is already unique and stable for the node's lifetime, so
/// there is no need for a second, Process-local counter.
pub type ThreadId = EntryId;
/// A placeholder is identified externally by the id of the semantic variable it is
/// bound to: the two are created together by `rewrite_call` and never diverge.
pub type PlaceholderId = SvId;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProcessError {
    UnknownPlaceholder(PlaceholderId),
    AlreadySet(PlaceholderId),
    Graph(GraphError),
    /// The VM has been marked dead (missed its heartbeat deadline) and can no longer
    /// submit calls or have its placeholders mutated.
    ProcessDead(Pid),
    /// A native call's computation raised an exception.
    NativeCallFailed(String),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::UnknownPlaceholder(id) => write!(f, "no placeholder bound to {id}"),
            ProcessError::AlreadySet(id) => write!(f, "{id} already has content"),
            ProcessError::Graph(e) => write!(f, "{e}"),
            ProcessError::ProcessDead(pid) => write!(f, "process {pid} is dead"),
            ProcessError::NativeCallFailed(exception) => write!(f, "native call failed: {exception}"),
        }
    }
}

impl std::error::Error for ProcessError {}

impl From<GraphError> for ProcessError {
    fn from(e: GraphError) -> ProcessError {
        ProcessError::Graph(e)
    }
}

impl From<SvError> for ProcessError {
    fn from(e: SvError) -> ProcessError {
        match e {
            SvError::AlreadySet(id) => ProcessError::AlreadySet(id),
            SvError::UnknownVariable(id) => ProcessError::UnknownPlaceholder(id),
        }
    }
}

/// One segment of a call's template, as submitted by a VM (§3). A call is rewritten
/// into a chain of Static Graph nodes in order, each linked to the previous by
/// edge_a.
#[derive(Clone, Debug)]
pub enum CallSegment {
    Constant(String),
    Input(Placeholder),
    Output(Placeholder),
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ThreadState {
    /// Inserted into the graph but not yet handed to the Dispatcher.
    Queued,
    /// Handed to the Dispatcher and assigned to an Engine.
    Dispatched,
    /// The Engine has acknowledged and is actively generating.
    Running,
    Done,
    Failed,
}

struct ThreadRecord {
    state: ThreadState,
}

///
/// One pending Engine round-trip belonging to a Process: the unit the Dispatcher
/// selects an Engine for and tracks through to completion (§4.6). The actual
/// prompt/sampling payload is not known until the Graph reports the underlying
/// `PlaceholderGen` node ready (`Graph::get_ready_task`); a `Thread` is just the
/// Process-owned handle that lets the Dispatcher and `pcore` route that eventual
/// `GenTask` back to the right VM.
///
pub struct Thread {
    pub id: ThreadId,
    pub pid: Pid,
    /// The semantic variable this thread will produce, once an Engine generates it.
    pub placeholder: PlaceholderId,
}

///
/// A registered VM: owns the placeholders it has created and the call threads
/// rewritten from its submitted calls, and tracks its own liveness.
///
pub struct Process {
    pid: Pid,
    graph: Arc<Graph>,
    namespace: Arc<SvNamespace>,
    threads: Mutex<HashMap<ThreadId, ThreadRecord>>,
    dead: AtomicBool,
    bad: AtomicBool,
    bad_exception: Mutex<Option<String>>,
    deadlocked: AtomicBool,
    last_heartbeat: Mutex<Instant>,
    shutdown: AsyncLatch,
}

impl Process {
    /// Registers a new Process. Its liveness deadline is not enforced by a
    /// background task of its own: `PCore::tick`'s `check_expired` step calls
    /// `check_expired` on every registered Process once per loop tick (§4.7), the
    /// same cadence Engine expiry already uses.
    pub fn new(pid: Pid, graph: Arc<Graph>, namespace: Arc<SvNamespace>) -> Arc<Process> {
        Arc::new(Process {
            pid,
            graph,
            namespace,
            threads: Mutex::new(HashMap::default()),
            dead: AtomicBool::new(false),
            bad: AtomicBool::new(false),
            bad_exception: Mutex::new(None),
            deadlocked: AtomicBool::new(false),
            last_heartbeat: Mutex::new(Instant::now()),
            shutdown: AsyncLatch::new(),
        })
    }

    pub fn pid(&self) -> Pid {
        self.pid
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn namespace(&self) -> &SvNamespace {
        &self.namespace
    }

    /// Resets the heartbeat deadline. Called from the `/vm_heartbeat` HTTP handler.
    pub fn heartbeat(&self) {
        *self.last_heartbeat.lock() = Instant::now();
    }

    pub fn is_dead(&self) -> bool {
        self.dead.load(Ordering::Acquire)
    }

    pub fn is_bad(&self) -> bool {
        self.bad.load(Ordering::Acquire)
    }

    pub fn bad_exception(&self) -> Option<String> {
        self.bad_exception.lock().clone()
    }

    pub fn mark_bad(&self, exception: impl Into<String>) {
        self.bad.store(true, Ordering::Release);
        *self.bad_exception.lock() = Some(exception.into());
        // `live = !dead && !bad` (§3): a bad process is no more able to make progress
        // than a dead one, so anything waiting on it should wake the same way.
        self.shutdown.trigger();
    }

    pub fn is_deadlocked(&self) -> bool {
        self.deadlocked.load(Ordering::Acquire)
    }

    /// Marks this process as permanently stuck: it still has outstanding Gen tasks in
    /// the Static Graph, but none of them is dispatched or running and none ever will
    /// be (§4.4). Distinct from `bad`, which is raised by a computation that actually
    /// ran and failed; a deadlocked process never got that far.
    pub fn mark_deadlocked(&self) {
        self.deadlocked.store(true, Ordering::Release);
        self.shutdown.trigger();
    }

    /// Resolves as soon as this process stops being live — `dead` by watchdog expiry
    /// or explicit `shutdown`, or `bad` by a failed native call or an unrecoverable
    /// generation. Lets an in-flight `placeholder_fetch` race a variable's `get()`
    /// against the process going non-live out from under it (§5's cancellation
    /// model), rather than waiting forever on a producer that will never run.
    pub async fn dead_signal(&self) {
        self.shutdown.triggered().await;
    }

    /// Marks this process dead if its heartbeat deadline has passed. Called once per
    /// `PCore::tick` (§4.7's `check_expired` step), mirroring how the Dispatcher
    /// expires stale Engines. Returns whether this call is the one that marked it.
    pub fn check_expired(&self, heartbeat_timeout: Duration) -> bool {
        let overdue = self.last_heartbeat.lock().elapsed() > heartbeat_timeout;
        if overdue && !self.dead.swap(true, Ordering::AcqRel) {
            warn!("process {} missed its heartbeat deadline; marking dead", self.pid);
            self.shutdown.trigger();
            return true;
        }
        false
    }

    /// Rewrites a submitted call's template into a chain of Static Graph nodes,
    /// queuing a `Thread` for every `Output` segment. Returns the newly-queued
    /// threads so the caller (the Dispatcher-facing glue in `pcore`) can push them.
    pub fn rewrite_call(&self, template: Vec<CallSegment>) -> Result<Vec<Arc<Thread>>, ProcessError> {
        if self.is_dead() {
            return Err(ProcessError::ProcessDead(self.pid));
        }

        let mut prev: Option<EntryId> = None;
        let mut new_threads = Vec::new();
        for segment in template {
            let kind = match segment {
                CallSegment::Constant(text) => NodeKind::ConstantFill { text },
                CallSegment::Input(placeholder) => NodeKind::PlaceholderFill { placeholder },
                CallSegment::Output(placeholder) => NodeKind::PlaceholderGen { placeholder },
            };
            let is_gen = matches!(kind, NodeKind::PlaceholderGen { .. });
            let id = self.graph.insert_node(kind, prev, &self.namespace)?;
            prev = Some(id);

            if is_gen {
                let placeholder = self
                    .graph
                    .sv_id_of(id)
                    .expect("a PlaceholderGen node always has a bound semantic variable");
                debug!("process {}: queued thread for node {:?}", self.pid, id);
                new_threads.push(self.make_thread(id, placeholder));
            }
        }
        Ok(new_threads)
    }

    fn make_thread(&self, id: ThreadId, placeholder: PlaceholderId) -> Arc<Thread> {
        self.threads.lock().insert(id, ThreadRecord { state: ThreadState::Queued });
        Arc::new(Thread { id, pid: self.pid, placeholder })
    }

    pub fn set_thread_state(&self, thread_id: ThreadId, state: ThreadState) {
        if let Some(record) = self.threads.lock().get_mut(&thread_id) {
            record.state = state;
        }
    }

    pub fn thread_state(&self, thread_id: ThreadId) -> Option<ThreadState> {
        self.threads.lock().get(&thread_id).map(|r| r.state)
    }

    pub fn has_running_threads(&self) -> bool {
        self.threads
            .lock()
            .values()
            .any(|r| matches!(r.state, ThreadState::Dispatched | ThreadState::Running))
    }

    /// Threads this Process has queued or dispatched that have not yet finished, for
    /// reporting back on `/vm_heartbeat` (§6's `VmRuntimeInfo`).
    pub fn thread_count(&self) -> usize {
        self.threads
            .lock()
            .values()
            .filter(|r| !matches!(r.state, ThreadState::Done))
            .count()
    }

    /// Executes a deterministic, process-local computation that never touches the
    /// Static Graph or an Engine (the fast path described for native calls). Marks
    /// the Process `bad` if the computation fails.
    pub fn execute_native_call(
        &self,
        f: impl FnOnce() -> Result<String, String>,
    ) -> Result<String, ProcessError> {
        if self.is_dead() {
            return Err(ProcessError::ProcessDead(self.pid));
        }
        match f() {
            Ok(result) => Ok(result),
            Err(exception) => {
                self.mark_bad(exception.clone());
                Err(ProcessError::NativeCallFailed(exception))
            }
        }
    }

    /// Sets a placeholder's content directly (used both for VM-supplied literal
    /// inputs and for the Dispatcher delivering generated output).
    pub fn placeholder_set(&self, id: PlaceholderId, value: impl Into<String>) -> Result<(), ProcessError> {
        let sv = self.namespace.lookup(id)?;
        sv.set(value)?;
        Ok(())
    }

    /// Non-blocking fetch: `None` if the placeholder is not yet resolved.
    pub fn placeholder_fetch(&self, id: PlaceholderId) -> Result<Option<String>, ProcessError> {
        let sv = self.namespace.lookup(id)?;
        Ok(sv.peek())
    }

    pub fn shutdown(&self) {
        self.shutdown.trigger();
    }
}
