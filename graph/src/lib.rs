// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

#![deny(warnings)]
#![deny(
    clippy::all,
    clippy::default_trait_access,
    clippy::expl_impl_clone_on_copy,
    clippy::if_not_else,
    clippy::needless_continue,
    clippy::unseparated_literal_suffix,
    clippy::used_underscore_binding
)]
#![allow(clippy::match_ref_pats)]
#![allow(
    clippy::len_without_is_empty,
    clippy::redundant_field_names,
    clippy::too_many_arguments
)]
#![allow(clippy::new_without_default, clippy::new_ret_no_self)]
#![allow(clippy::mutex_atomic)]

//! The Static Graph (§3, §4.4 of the spec): the per-call DAG of `ConstantFill` /
//! `PlaceholderFill` / `PlaceholderGen` nodes, threaded together by two kinds of
//! edge — edge_a, the call's own template order, and edge_b, the producer/consumer
//! relationship a node has with the semantic variable it is bound to. Unlike the
//! teacher's memoizing `Graph<N: Node>`, nodes here are never re-run, dirtied or
//! invalidated: a semantic variable is set at most once, so there is no cache
//! invalidation story to carry over.

mod node;

pub use crate::node::{
    EntryId, GenTask, GraphError, GraphNode, NodeKind, Placeholder, SamplingConfig,
};

use fnv::FnvHashSet as HashSet;
use parking_lot::Mutex;
use petgraph::dot;
use petgraph::stable_graph::StableDiGraph;
use svar::{NodeId, SvId, SvNamespace};

type PGraph = StableDiGraph<GraphNode, (), u32>;

struct InnerGraph {
    pg: PGraph,
    // Gen nodes inserted but not yet removed via `remove_task`, in insertion order.
    pending_gens: Vec<EntryId>,
    // Gen nodes currently handed out by `get_ready_task` and not yet `remove_task`d,
    // so that a second call doesn't dispatch the same Gen twice concurrently.
    in_flight: HashSet<EntryId>,
}

impl InnerGraph {
    fn new() -> InnerGraph {
        InnerGraph {
            pg: StableDiGraph::new(),
            pending_gens: Vec::new(),
            in_flight: HashSet::default(),
        }
    }

    fn entry_to_node_id(id: EntryId) -> NodeId {
        NodeId(id.index() as u32)
    }

    fn node_id_to_entry(id: NodeId) -> EntryId {
        EntryId::new(id.0 as usize)
    }

    fn insert_node(
        &mut self,
        kind: NodeKind,
        prev: Option<EntryId>,
        namespace: &SvNamespace,
    ) -> Result<EntryId, GraphError> {
        let id = EntryId::new(self.pg.node_count());

        let sv = match &kind {
            NodeKind::ConstantFill { text } => {
                let sv = namespace.create("constant");
                sv.set(text.clone())
                    .expect("freshly-created variable cannot already be set");
                sv
            }
            NodeKind::PlaceholderFill { placeholder } => {
                if let Some(const_value) = &placeholder.const_value {
                    let sv = namespace.create(placeholder.name.clone());
                    sv.set(const_value.clone())
                        .expect("freshly-created variable cannot already be set");
                    sv
                } else if let Some(var_id) = placeholder.var_id {
                    namespace
                        .lookup(var_id)
                        .map_err(|_| GraphError::UnknownVariable(var_id))?
                } else {
                    namespace.create(placeholder.name.clone())
                }
            }
            NodeKind::PlaceholderGen { placeholder } => {
                let sv = if let Some(var_id) = placeholder.var_id {
                    namespace
                        .lookup(var_id)
                        .map_err(|_| GraphError::UnknownVariable(var_id))?
                } else {
                    namespace.create(placeholder.name.clone())
                };
                if sv.producer().is_some() {
                    return Err(GraphError::AlreadyHasProducer(sv.id()));
                }
                sv
            }
        };

        let is_gen = matches!(&kind, NodeKind::PlaceholderGen { .. });
        let edge_b_producer = sv.producer();

        let inserted_id = self.pg.add_node(GraphNode::new(id, kind, sv.clone()));
        debug_assert_eq!(
            inserted_id, id,
            "StableDiGraph allocated a non-sequential index; did something remove a node?"
        );

        if is_gen {
            sv.bind_producer(Self::entry_to_node_id(id));
            self.pending_gens.push(id);
        } else {
            sv.add_consumer(Self::entry_to_node_id(id));
            if let Some(producer) = edge_b_producer {
                let producer_entry = Self::node_id_to_entry(producer);
                if self.pg.contains_node(producer_entry) {
                    self.pg.add_edge(producer_entry, id, ());
                }
            }
        }

        if let Some(prev_id) = prev {
            self.pg[id].set_edge_a_prev(prev_id);
            self.pg[prev_id].set_edge_a_next(id);
            self.pg.add_edge(prev_id, id, ());
        }

        Ok(id)
    }

    /// Walks backward along edge_a from `gen_id` (exclusive), returning ancestor ids
    /// nearest-to-farthest from the Gen node.
    fn edge_a_ancestors(&self, gen_id: EntryId) -> Vec<EntryId> {
        let mut ancestors = Vec::new();
        let mut cursor = self.pg[gen_id].edge_a_prev();
        while let Some(id) = cursor {
            ancestors.push(id);
            cursor = self.pg[id].edge_a_prev();
        }
        ancestors
    }

    fn is_ready(&self, gen_id: EntryId) -> bool {
        self.edge_a_ancestors(gen_id)
            .iter()
            .all(|id| self.pg[*id].sv().is_ready())
    }

    fn get_ready_task(&mut self) -> Option<GenTask> {
        let ready_id = self
            .pending_gens
            .iter()
            .filter(|id| !self.in_flight.contains(id))
            .find(|id| self.is_ready(**id))
            .copied()?;

        let mut ancestors = self.edge_a_ancestors(ready_id);
        ancestors.reverse();
        let prefix = ancestors
            .into_iter()
            .map(|id| {
                self.pg[id]
                    .sv()
                    .peek()
                    .expect("ancestor confirmed ready but has no content")
            })
            .collect();

        let node = &self.pg[ready_id];
        let placeholder = match node.kind() {
            NodeKind::PlaceholderGen { placeholder } => placeholder.clone(),
            _ => unreachable!("pending_gens only ever holds PlaceholderGen ids"),
        };

        self.in_flight.insert(ready_id);
        Some(GenTask {
            id: ready_id,
            sv: node.sv().clone(),
            placeholder,
            prefix,
        })
    }

    fn remove_task(&mut self, id: EntryId) {
        self.pending_gens.retain(|pending| *pending != id);
        self.in_flight.remove(&id);
    }

    fn has_pending_tasks(&self) -> bool {
        !self.pending_gens.is_empty()
    }

    fn pending_thread_ids(&self) -> Vec<EntryId> {
        self.pending_gens.clone()
    }

    fn sv_id_of(&self, id: EntryId) -> Option<SvId> {
        self.pg.node_weight(id).map(|node| node.sv().id())
    }

    fn to_dot(&self) -> String {
        let display = self.pg.filter_map(
            |id, node| Some(format!("{:?}@{}", node.kind(), id.index())),
            |_, _| Some(()),
        );
        format!("{}", dot::Dot::with_config(&display, &[dot::Config::EdgeNoLabel]))
    }

    fn stats(&self) -> Stats {
        Stats {
            nodes: self.pg.node_count(),
            pending_gens: self.pending_gens.len(),
            in_flight_gens: self.in_flight.len(),
        }
    }
}

impl std::fmt::Debug for NodeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NodeKind::ConstantFill { .. } => write!(f, "ConstantFill"),
            NodeKind::PlaceholderFill { placeholder } => {
                write!(f, "PlaceholderFill({})", placeholder.name)
            }
            NodeKind::PlaceholderGen { placeholder } => {
                write!(f, "PlaceholderGen({})", placeholder.name)
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Stats {
    pub nodes: usize,
    pub pending_gens: usize,
    pub in_flight_gens: usize,
}

///
/// The Static Graph for one PCore: every call, across every Process, inserts its
/// Fill/Gen nodes here as it is rewritten into the graph (§4.5's `rewrite_call`), and
/// the Dispatcher repeatedly pulls ready `GenTask`s from it until no Process has any
/// work left.
///
pub struct Graph {
    inner: Mutex<InnerGraph>,
}

impl Graph {
    pub fn new() -> Graph {
        Graph {
            inner: Mutex::new(InnerGraph::new()),
        }
    }

    /// Inserts one node, linking it after `prev` along edge_a if given. Returns the
    /// new node's id.
    pub fn insert_node(
        &self,
        kind: NodeKind,
        prev: Option<EntryId>,
        namespace: &SvNamespace,
    ) -> Result<EntryId, GraphError> {
        self.inner.lock().insert_node(kind, prev, namespace)
    }

    /// Returns the lowest-id `GenTask` whose entire prefix is resolved and which is
    /// not already in flight, if any. Does not remove it from the pending set: call
    /// `remove_task` once the task has actually completed.
    pub fn get_ready_task(&self) -> Option<GenTask> {
        self.inner.lock().get_ready_task()
    }

    /// Removes a Gen task from the pending set, once its variable has been `set` (or
    /// its owning Process has died and it will never run).
    pub fn remove_task(&self, id: EntryId) {
        self.inner.lock().remove_task(id)
    }

    /// True if the graph has outstanding Gen tasks that have not yet been removed.
    /// Combined with the Dispatcher's view of currently-running threads, this is how
    /// the caller decides whether "no ready task" means deadlock (§4.4).
    pub fn has_pending_tasks(&self) -> bool {
        self.inner.lock().has_pending_tasks()
    }

    /// Every Gen node still pending (not yet `remove_task`d), own process included
    /// whether or not it is currently in flight. `pcore` cross-references this
    /// against each owning Process's thread state once per tick to decide whether a
    /// pending node can ever make further progress (§4.4's deadlock detection).
    pub fn pending_thread_ids(&self) -> Vec<EntryId> {
        self.inner.lock().pending_thread_ids()
    }

    /// The semantic variable bound to an already-inserted node. Lets a caller
    /// (`process::rewrite_call`) learn a fresh Output placeholder's id right after
    /// inserting it, to report back to whoever submitted the call.
    pub fn sv_id_of(&self, id: EntryId) -> Option<SvId> {
        self.inner.lock().sv_id_of(id)
    }

    pub fn to_dot(&self) -> String {
        self.inner.lock().to_dot()
    }

    pub fn stats(&self) -> Stats {
        self.inner.lock().stats()
    }
}

#[cfg(test)]
mod tests;
