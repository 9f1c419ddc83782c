// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::too_many_arguments, clippy::new_without_default)]

//! PCore (§4.7 of the spec): the coordinator that owns the Static Graph and the
//! semantic variable namespace for an entire server, registers VMs and Engines against
//! them, and runs the main loop that bridges the Graph's notion of "ready" to the
//! Dispatcher's notion of "assigned" and on to an actual Engine round-trip.
//!
//! PCore does not itself hold a lock higher in the order than [`dispatcher::Dispatcher`]
//! (Pool < Namespace < Graph < Process < Dispatcher < PCore): every method here either
//! delegates straight through to one of those or coordinates a handful of independent
//! `Mutex`es (`processes`, `thread_owner`, `pending_tasks`, `retries`) that are never
//! held across one another.

pub mod call;
mod error;

pub use crate::call::Call;
pub use crate::error::{EngineId, Error, InternalError, PlaceholderId, UserError};

use std::sync::Arc;
use std::time::{Duration, Instant};

use config::{Config, Constants};
use dispatcher::{Dispatcher, EngineConfig};
use engine_client::{EngineClient, EngineClientError, RuntimeInfo};
use fnv::{FnvHashMap as HashMap, FnvHashSet as HashSet};
use graph::{GenTask, Graph};
use log::{debug, info, warn};
use parking_lot::Mutex;
use process::{Pid, Process, Thread, ThreadId, ThreadState};
use recycle_pool::RecyclePool;
use svar::SvNamespace;
use task_executor::Executor;

/// A thread is retried against a different engine this many times (after the first
/// attempt) before its VM call is abandoned with `NoEligibleEngine` (§7).
const MAX_ENGINE_RETRIES: u32 = 3;

/// How long a process may go with pending Gen tasks but no thread DISPATCHED or
/// RUNNING before `check_deadlock` gives up on it (§4.4, §8 scenario 5). A single
/// tick's snapshot is too sensitive to ordinary scheduling jitter — e.g. the tick
/// that completes one call's output and the tick that dispatches the next chained
/// call's output are necessarily two different ticks — so this is a grace window,
/// not an instant check.
const DEADLOCK_GRACE: Duration = Duration::from_millis(50);

/// Reported back on `/vm_heartbeat` (§6). Placeholder memory/token accounting is out
/// of scope (see the Non-goals this crate was built against); only the thread count a
/// VM might reasonably poll on is tracked.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VmRuntimeInfo {
    pub thread_count: usize,
}

///
/// The coordinator for one running server: the single Static Graph and
/// `SvNamespace` shared by every registered Process, the Dispatcher those
/// Processes' threads flow through, and the bookkeeping that bridges the two.
///
pub struct PCore {
    pid_pool: Mutex<RecyclePool>,
    processes: Mutex<HashMap<Pid, Arc<Process>>>,
    graph: Arc<Graph>,
    namespace: Arc<SvNamespace>,
    dispatcher: Arc<Dispatcher>,
    engine_client: Arc<dyn EngineClient>,
    executor: Executor,
    // Which VM a given thread id belongs to, so a `GenTask` the Graph reports ready
    // can be routed back to the Process that queued it.
    thread_owner: Arc<Mutex<HashMap<ThreadId, Pid>>>,
    // Gen tasks the Graph has already handed out (and so will not hand out again)
    // but which have not yet been assigned an Engine, keyed by thread id.
    pending_tasks: Arc<Mutex<HashMap<ThreadId, GenTask>>>,
    retries: Arc<Mutex<HashMap<ThreadId, u32>>>,
    // First observed instant a process had pending Gen tasks with nothing
    // DISPATCHED/RUNNING, for `check_deadlock`'s grace window.
    deadlock_since: Mutex<HashMap<Pid, Instant>>,
    vm_heartbeat_timeout: Duration,
    engine_expire_time: Duration,
}

impl PCore {
    pub fn new(config: &Config, engine_client: Arc<dyn EngineClient>, executor: Executor) -> PCore {
        let dispatcher = Arc::new(Dispatcher::new(
            config.dispatcher.policy,
            config.dispatcher.max_queued_per_engine,
            config.dispatcher.ping_on_select,
            Constants::ENGINE_HEARTBEAT_INTERVAL,
            config.os.max_engines_num,
        ));
        PCore {
            pid_pool: Mutex::new(RecyclePool::new(config.os.max_proc_num)),
            processes: Mutex::new(HashMap::default()),
            graph: Arc::new(Graph::new()),
            namespace: Arc::new(SvNamespace::new()),
            dispatcher,
            engine_client,
            executor,
            thread_owner: Arc::new(Mutex::new(HashMap::default())),
            pending_tasks: Arc::new(Mutex::new(HashMap::default())),
            retries: Arc::new(Mutex::new(HashMap::default())),
            deadlock_since: Mutex::new(HashMap::default()),
            vm_heartbeat_timeout: Constants::VM_EXPIRE_TIME,
            engine_expire_time: Constants::ENGINE_EXPIRE_TIME,
        }
    }

    /// Registers a new VM and spawns its heartbeat watchdog. Corresponds to
    /// `/register_vm` (§6).
    pub fn register_vm(&self) -> Result<Pid, Error> {
        let pid = self.pid_pool.lock().allocate()?;
        let process = Process::new(pid, self.graph.clone(), self.namespace.clone());
        self.processes.lock().insert(pid, process);
        info!("registered VM {pid}");
        Ok(pid)
    }

    /// Enrolls a new Engine. Corresponds to `/register_engine` (§6).
    pub fn register_engine(&self, addr: impl Into<String>, engine_config: EngineConfig) -> Result<EngineId, Error> {
        Ok(self.dispatcher.register_engine(addr, engine_config)?)
    }

    fn process(&self, pid: Pid) -> Result<Arc<Process>, Error> {
        self.processes.lock().get(&pid).cloned().ok_or(Error::User(UserError::UnknownPid(pid)))
    }

    /// Fails if `process` is no longer live, surfacing whichever of `dead`/`bad`/
    /// `deadlocked` caused it (§3's `live = !dead && !bad`).
    fn check_live(&self, process: &Process) -> Result<(), Error> {
        if process.is_dead() {
            return Err(Error::User(UserError::DeadProcess(process.pid())));
        }
        if process.is_deadlocked() {
            return Err(graph::GraphError::Deadlock.into());
        }
        if process.is_bad() {
            return Err(Error::User(UserError::NativeCallFailed(process.bad_exception().unwrap_or_default())));
        }
        Ok(())
    }

    /// Any `InternalError` surfacing from a pid-scoped operation marks the owning
    /// process `bad` before it reaches the caller: this runtime implements only the
    /// lenient half of §7's InternalError handling (see [`InternalError`]'s doc
    /// comment), so a fatal invariant violation never strands the VM in a live state
    /// the runtime itself no longer trusts.
    fn mark_bad_on_internal_error(process: &Process, error: Error) -> Error {
        if let Error::Internal(ref e) = error {
            warn!("process {}: internal error, marking bad: {e}", process.pid());
            process.mark_bad(e.to_string());
        }
        error
    }

    /// Resets a VM's heartbeat deadline. Corresponds to `/vm_heartbeat` (§6).
    pub fn vm_heartbeat(&self, pid: Pid) -> Result<VmRuntimeInfo, Error> {
        let process = self.process(pid)?;
        self.check_live(&process)?;
        process.heartbeat();
        Ok(VmRuntimeInfo { thread_count: process.thread_count() })
    }

    /// Records an Engine's self-reported load. Corresponds to `/engine_heartbeat` (§6).
    pub fn engine_heartbeat(&self, engine_id: EngineId, runtime_info: RuntimeInfo) -> Result<(), Error> {
        Ok(self.dispatcher.engine_heartbeat(engine_id, runtime_info)?)
    }

    /// Parses and rewrites a submitted call into the Static Graph, returning the
    /// freshly-allocated placeholder id for every named Output in the call — the
    /// caller's handle for later `placeholder_fetch`es or for chaining as a later
    /// call's `InputBinding::Var`. Corresponds to `/submit_call` (§6). The new threads
    /// are not dispatched here: the next `tick()` will discover whichever of them are
    /// immediately ready.
    pub fn submit_semantic_call(&self, pid: Pid, call: Call) -> Result<HashMap<String, PlaceholderId>, Error> {
        let process = self.process(pid)?;
        self.check_live(&process)?;

        let segments = call::parse(&call)?;
        let output_names: Vec<String> = segments
            .iter()
            .filter_map(|s| match s {
                process::CallSegment::Output(p) => Some(p.name.clone()),
                _ => None,
            })
            .collect();

        let threads = process
            .rewrite_call(segments)
            .map_err(|e| Self::mark_bad_on_internal_error(&process, e.into()))?;
        debug_assert_eq!(output_names.len(), threads.len());

        let mut thread_owner = self.thread_owner.lock();
        for thread in &threads {
            thread_owner.insert(thread.id, thread.pid);
        }
        drop(thread_owner);

        debug!("process {pid}: call rewrote to {} output thread(s)", threads.len());
        Ok(output_names.into_iter().zip(threads.iter().map(|t| t.placeholder)).collect())
    }

    /// Runs a deterministic, process-local computation outside the Static Graph.
    pub fn submit_native_call(&self, pid: Pid, f: impl FnOnce() -> Result<String, String>) -> Result<String, Error> {
        let process = self.process(pid)?;
        self.check_live(&process)?;
        process
            .execute_native_call(f)
            .map_err(|e| Self::mark_bad_on_internal_error(&process, e.into()))
    }

    /// Sets a placeholder's content directly: used for literal VM-supplied inputs, not
    /// for Engine-produced output (that flows through `run_dispatched_thread` instead).
    pub fn placeholder_set(&self, pid: Pid, placeholder_id: PlaceholderId, value: impl Into<String>) -> Result<(), Error> {
        let process = self.process(pid)?;
        self.check_live(&process)?;
        process
            .placeholder_set(placeholder_id, value)
            .map_err(|e| Self::mark_bad_on_internal_error(&process, e.into()))
    }

    /// Awaits a placeholder's content, racing the underlying variable's producer
    /// against the requesting VM's own process going non-live out from under it
    /// (§5's cancellation model: a process that dies mid-fetch must not strand its
    /// caller forever). Corresponds to `/placeholder_fetch` (§6).
    ///
    /// §4.5 describes this as waiting on the placeholder's own `start_event` (set
    /// once its owning process begins executing) before touching the variable, then
    /// rechecking liveness a single time before the blocking `get`. The `select!`
    /// below is strictly stronger: it races the content and the liveness signal for
    /// the whole wait, not just once after a fixed gate, so a process that goes
    /// non-live at any point — before, during, or after the variable resolves — is
    /// observed immediately rather than only at one checkpoint.
    pub async fn placeholder_fetch(&self, pid: Pid, placeholder_id: PlaceholderId) -> Result<String, Error> {
        let process = self.process(pid)?;
        let sv = self.namespace.lookup(placeholder_id)?;

        tokio::select! {
            content = sv.get() => Ok(content),
            () = process.dead_signal() => {
                if process.is_deadlocked() {
                    Err(graph::GraphError::Deadlock.into())
                } else if process.is_bad() {
                    Err(Error::User(UserError::NativeCallFailed(process.bad_exception().unwrap_or_default())))
                } else {
                    Err(Error::User(UserError::DeadProcess(pid)))
                }
            }
        }
    }

    /// Runs one round of the coordinator loop (§4.7): expires stale clients, sweeps
    /// the dead ones, drains the Static Graph for newly-ready threads, probes any
    /// engine the Dispatcher hasn't heard from recently, hands off every thread
    /// `dispatch()` assigns this round to run against its engine, and finally checks
    /// whether any process is permanently stuck (§4.4).
    pub async fn tick(&self) {
        self.check_expired_processes();
        for engine_id in self.dispatcher.mark_expired_engines(self.engine_expire_time) {
            debug!("engine {engine_id} expired");
        }
        self.sweep_dead_processes();
        self.sweep_dead_engines();

        self.drain_ready_tasks();

        if self.dispatcher.ping_on_select() {
            self.refresh_stale_engines().await;
        }

        for thread in self.dispatcher.dispatch() {
            self.spawn_dispatched(thread);
        }

        self.check_deadlock();
    }

    /// `check_expired` (§4.7): marks every registered Process dead once its
    /// heartbeat deadline has passed, the same way `mark_expired_engines` already
    /// does for Engines. Runs on this loop's own cadence rather than a per-process
    /// background poller, so a missed deadline is observed on the very next tick.
    fn check_expired_processes(&self) {
        let processes: Vec<Arc<Process>> = self.processes.lock().values().cloned().collect();
        for process in processes {
            if process.check_expired(self.vm_heartbeat_timeout) {
                debug!("process {} expired", process.pid());
            }
        }
    }

    /// Runs `tick` forever, sleeping `interval` between rounds. Intended to be spawned
    /// once for the lifetime of the `parrot` process.
    pub async fn run(&self, interval: Duration) -> ! {
        loop {
            self.tick().await;
            tokio::time::sleep(interval).await;
        }
    }

    fn sweep_dead_processes(&self) {
        let dead: Vec<Pid> = self.processes.lock().values().filter(|p| p.is_dead()).map(|p| p.pid()).collect();
        for pid in dead {
            if let Some(process) = self.processes.lock().remove(&pid) {
                process.shutdown();
                if let Err(e) = self.pid_pool.lock().free(pid) {
                    warn!("freeing dead VM {pid}'s id failed: {e}");
                }
                info!("reclaimed dead VM {pid}");
            }
        }
    }

    fn sweep_dead_engines(&self) {
        for engine_id in self.dispatcher.dead_engines() {
            if self.dispatcher.deregister_engine(engine_id).is_ok() {
                info!("reclaimed dead engine {engine_id}");
            }
        }
    }

    async fn refresh_stale_engines(&self) {
        for (engine_id, addr) in self.dispatcher.stale_engines() {
            let result = self.engine_client.ping(&addr).await.ok().map(|r| r.runtime_info);
            self.dispatcher.mark_pinged(engine_id, result);
        }
    }

    /// Pulls every currently-ready `GenTask` out of the Static Graph and queues its
    /// thread with the Dispatcher, stashing the task itself until an Engine is
    /// actually assigned to it.
    fn drain_ready_tasks(&self) {
        while let Some(task) = self.graph.get_ready_task() {
            let owner = self.thread_owner.lock().get(&task.id).copied();
            let Some(pid) = owner else {
                warn!("ready task for node {:?} has no known owner; dropping", task.id);
                self.graph.remove_task(task.id);
                continue;
            };
            let Some(process) = self.processes.lock().get(&pid).cloned() else {
                // Its VM was reclaimed between rewrite_call and this tick.
                self.graph.remove_task(task.id);
                continue;
            };

            let thread = Arc::new(Thread { id: task.id, pid, placeholder: task.sv.id() });
            let sampling_config = task.placeholder.sampling_config.clone();
            self.pending_tasks.lock().insert(task.id, task);
            self.dispatcher.push_thread(thread, process, sampling_config);
        }
    }

    /// Checks every process with outstanding Gen tasks for whether it has anything
    /// DISPATCHED or RUNNING on its behalf. A process that goes `DEADLOCK_GRACE`
    /// with nothing running and the queue non-empty can never make further progress
    /// — no thread of its will ever be handed an Engine, or an ancestor it depends
    /// on has no producer that will ever run — and is marked deadlocked so its
    /// pending `placeholder_fetch`es fail instead of waiting forever (§4.4, §8
    /// scenario 5).
    fn check_deadlock(&self) {
        let pending = self.graph.pending_thread_ids();
        if pending.is_empty() {
            self.deadlock_since.lock().clear();
            return;
        }

        let owners: HashSet<Pid> = {
            let thread_owner = self.thread_owner.lock();
            pending.iter().filter_map(|id| thread_owner.get(id).copied()).collect()
        };

        let mut since = self.deadlock_since.lock();
        since.retain(|pid, _| owners.contains(pid));

        for pid in owners {
            let Some(process) = self.processes.lock().get(&pid).cloned() else {
                since.remove(&pid);
                continue;
            };
            if process.is_dead() || process.is_bad() || process.is_deadlocked() || process.has_running_threads() {
                since.remove(&pid);
                continue;
            }

            let first_stuck = *since.entry(pid).or_insert_with(Instant::now);
            if first_stuck.elapsed() < DEADLOCK_GRACE {
                continue;
            }

            warn!("process {pid}: no thread has made progress for {DEADLOCK_GRACE:?}; declaring deadlock");
            process.mark_deadlocked();
            since.remove(&pid);

            let mut thread_owner = self.thread_owner.lock();
            let stuck: Vec<ThreadId> =
                pending.iter().copied().filter(|id| thread_owner.get(id) == Some(&pid)).collect();
            for id in stuck {
                thread_owner.remove(&id);
                self.graph.remove_task(id);
            }
        }
    }

    fn spawn_dispatched(&self, thread: Arc<Thread>) {
        let Some(process) = self.processes.lock().get(&thread.pid).cloned() else {
            self.dispatcher.complete_thread(thread.id);
            return;
        };

        self.executor.native_spawn(run_dispatched_thread(
            thread,
            process,
            self.graph.clone(),
            self.dispatcher.clone(),
            self.engine_client.clone(),
            self.pending_tasks.clone(),
            self.retries.clone(),
            self.thread_owner.clone(),
        ));
    }
}

/// Drives one dispatched thread's Engine round-trip to completion: fills its prefix,
/// generates its output variable, and reports the outcome back to the Graph, the
/// Dispatcher and the owning Process. Engine failures requeue the thread for another
/// engine up to `MAX_ENGINE_RETRIES` times before giving up (§7's "engine loss
/// mid-flight" scenario).
async fn run_dispatched_thread(
    thread: Arc<Thread>,
    process: Arc<Process>,
    graph: Arc<Graph>,
    dispatcher: Arc<Dispatcher>,
    engine_client: Arc<dyn EngineClient>,
    pending_tasks: Arc<Mutex<HashMap<ThreadId, GenTask>>>,
    retries: Arc<Mutex<HashMap<ThreadId, u32>>>,
    thread_owner: Arc<Mutex<HashMap<ThreadId, Pid>>>,
) {
    let Some(task) = pending_tasks.lock().remove(&thread.id) else {
        warn!("dispatched thread {:?} had no pending gen task; dropping", thread.id);
        dispatcher.complete_thread(thread.id);
        return;
    };
    let Some(engine_id) = dispatcher.assigned_engine(thread.id) else {
        warn!("dispatched thread {:?} has no engine assignment", thread.id);
        return;
    };
    let Some(addr) = dispatcher.engine_addr(engine_id) else {
        warn!("engine {engine_id} vanished before thread {:?} could run", thread.id);
        requeue_or_fail(thread, process, graph, dispatcher, pending_tasks, retries, thread_owner, task).await;
        return;
    };

    process.set_thread_state(thread.id, ThreadState::Running);
    let context_id = thread.id.index() as u64;

    let outcome: Result<String, EngineClientError> = async {
        if !task.prefix.is_empty() {
            engine_client.fill(&addr, context_id, &task.prefix).await?;
        }
        engine_client.generate(&addr, context_id, &task.placeholder.sampling_config).await
    }
    .await;

    match outcome {
        Ok(content) => {
            let _ = engine_client.free_context(&addr, context_id).await;
            dispatcher.complete_thread(thread.id);
            if let Err(e) = process.placeholder_set(task.sv.id(), content) {
                warn!("thread {:?} generated but its variable rejected the content: {e}", thread.id);
                process.mark_bad(e.to_string());
            }
            graph.remove_task(thread.id);
            process.set_thread_state(thread.id, ThreadState::Done);
            retries.lock().remove(&thread.id);
            thread_owner.lock().remove(&thread.id);
        }
        Err(e) => {
            warn!("engine {engine_id} failed thread {:?}: {e}", thread.id);
            dispatcher.mark_pinged(engine_id, None);
            dispatcher.complete_thread(thread.id);
            requeue_or_fail(thread, process, graph, dispatcher, pending_tasks, retries, thread_owner, task).await;
        }
    }
}

async fn requeue_or_fail(
    thread: Arc<Thread>,
    process: Arc<Process>,
    graph: Arc<Graph>,
    dispatcher: Arc<Dispatcher>,
    pending_tasks: Arc<Mutex<HashMap<ThreadId, GenTask>>>,
    retries: Arc<Mutex<HashMap<ThreadId, u32>>>,
    thread_owner: Arc<Mutex<HashMap<ThreadId, Pid>>>,
    task: GenTask,
) {
    let attempt = {
        let mut retries = retries.lock();
        let count = retries.entry(thread.id).or_insert(0);
        *count += 1;
        *count
    };

    if attempt > MAX_ENGINE_RETRIES {
        warn!("thread {:?} exhausted its retry budget; failing its VM", thread.id);
        process.mark_bad(UserError::NoEligibleEngine.to_string());
        graph.remove_task(thread.id);
        process.set_thread_state(thread.id, ThreadState::Failed);
        retries.lock().remove(&thread.id);
        thread_owner.lock().remove(&thread.id);
        return;
    }

    let sampling_config = task.placeholder.sampling_config.clone();
    pending_tasks.lock().insert(thread.id, task);
    process.set_thread_state(thread.id, ThreadState::Queued);
    dispatcher.push_thread(thread, process, sampling_config);
}

#[cfg(test)]
mod tests;
