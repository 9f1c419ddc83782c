// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(clippy::all)]
#![allow(clippy::len_without_is_empty, clippy::new_without_default)]

//! Semantic variables (§3, §4.2, §4.3 of the spec): a write-once, many-reader latch
//! carrying the text produced for one placeholder slot, plus the namespace that hands
//! out globally-unique ids for them and looks them up by id.
//!
//! A [`NodeId`] here is an opaque index into whatever graph owns the producing/
//! consuming nodes; this crate never dereferences it. The Static Graph crate converts
//! its own `petgraph` node indices to and from `NodeId` at the boundary, keeping `svar`
//! decoupled from the graph's internal representation (the same separation of
//! concerns `async_latch` has from the `graph` crate that consumes it).

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_latch::AsyncLatch;
use fnv::FnvHashMap as HashMap;
use parking_lot::Mutex;

/// An opaque reference to a node in the owning Static Graph.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct NodeId(pub u32);

/// A globally-unique semantic variable id.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct SvId(pub u64);

impl fmt::Display for SvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sv-{}", self.0)
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SvError {
    /// `set` was called on a variable that already has content.
    AlreadySet(SvId),
    /// `lookup` was called with an id the namespace never issued.
    UnknownVariable(SvId),
}

impl fmt::Display for SvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SvError::AlreadySet(id) => write!(f, "{id} already has content"),
            SvError::UnknownVariable(id) => write!(f, "{id} is not a known semantic variable"),
        }
    }
}

impl std::error::Error for SvError {}

struct Inner {
    content: Mutex<Option<String>>,
    ready: AsyncLatch,
}

///
/// A semantic variable: one producer writes its content exactly once, and any number
/// of consumers may concurrently await it. Once `ready`, content is immutable and
/// every `get()` observes the same text (§4.3, invariant 1 and 2 of §8).
///
#[derive(Clone)]
pub struct SemanticVariable {
    id: SvId,
    name: String,
    inner: Arc<Inner>,
    // Bound once by the Graph at insert time; never mutated after the enclosing
    // thread starts running (§3's Node/edge_b invariant).
    producer: Arc<Mutex<Option<NodeId>>>,
    consumers: Arc<Mutex<Vec<NodeId>>>,
}

impl SemanticVariable {
    fn new(id: SvId, name: impl Into<String>) -> SemanticVariable {
        SemanticVariable {
            id,
            name: name.into(),
            inner: Arc::new(Inner {
                content: Mutex::new(None),
                ready: AsyncLatch::new(),
            }),
            producer: Arc::new(Mutex::new(None)),
            consumers: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn id(&self) -> SvId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stores `text` as this variable's content, waking every current and future
    /// waiter. Fails with `AlreadySet` if this variable already has content.
    pub fn set(&self, text: impl Into<String>) -> Result<(), SvError> {
        let mut content = self.inner.content.lock();
        if content.is_some() {
            return Err(SvError::AlreadySet(self.id));
        }
        *content = Some(text.into());
        // Drop the lock before waking waiters, so that a waiter which immediately
        // re-enters `get` never contends with this call.
        drop(content);
        self.inner.ready.trigger();
        Ok(())
    }

    /// Returns true if `set` has completed for this variable.
    pub fn is_ready(&self) -> bool {
        self.inner.ready.poll_triggered()
    }

    /// Non-blocking read: returns the content if `set` has already completed, else
    /// `None`. Used by readiness checks that must not suspend (§4.4).
    pub fn peek(&self) -> Option<String> {
        if self.is_ready() {
            self.inner.content.lock().clone()
        } else {
            None
        }
    }

    /// Suspends until this variable's producer has called `set`, then returns a
    /// clone of the content. Restartable: any number of concurrent callers may await
    /// the same variable, and all observe the same text (§4.3).
    pub async fn get(&self) -> String {
        self.inner.ready.triggered().await;
        self.inner
            .content
            .lock()
            .clone()
            .expect("ready latch triggered without content set")
    }

    /// Binds this variable's producer node. Called exactly once by the Graph at
    /// insert time for `PlaceholderGen` nodes (`ConstantFill`/`PlaceholderFill` never
    /// produce, so their variables keep `producer = None`).
    pub fn bind_producer(&self, node: NodeId) {
        let mut producer = self.producer.lock();
        debug_assert!(producer.is_none(), "a variable may have at most one producer");
        *producer = Some(node);
    }

    pub fn producer(&self) -> Option<NodeId> {
        *self.producer.lock()
    }

    /// Appends a consuming node. Called by the Graph at insert time for every Fill
    /// node that references this variable; may be called multiple times as later
    /// calls reuse the same shared variable.
    pub fn add_consumer(&self, node: NodeId) {
        self.consumers.lock().push(node);
    }

    pub fn consumers(&self) -> Vec<NodeId> {
        self.consumers.lock().clone()
    }
}

///
/// Issues globally-unique [`SvId`]s and maps them to their [`SemanticVariable`].
///
pub struct SvNamespace {
    next_id: AtomicU64,
    variables: Mutex<HashMap<SvId, SemanticVariable>>,
}

impl SvNamespace {
    pub fn new() -> SvNamespace {
        SvNamespace {
            next_id: AtomicU64::new(0),
            variables: Mutex::new(HashMap::default()),
        }
    }

    /// Allocates a fresh id. A monotonic counter suffices to guarantee global
    /// uniqueness for the lifetime of this namespace (§4.2).
    pub fn get_new_id(&self) -> SvId {
        SvId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Creates and registers a new, empty semantic variable under a fresh id.
    pub fn create(&self, name: impl Into<String>) -> SemanticVariable {
        let id = self.get_new_id();
        let sv = SemanticVariable::new(id, name);
        self.variables.lock().insert(id, sv.clone());
        sv
    }

    /// Looks up a previously-created variable by id.
    pub fn lookup(&self, id: SvId) -> Result<SemanticVariable, SvError> {
        self.variables
            .lock()
            .get(&id)
            .cloned()
            .ok_or(SvError::UnknownVariable(id))
    }
}
