// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).

use std::fmt;

use petgraph::stable_graph;
use svar::{NodeId, SemanticVariable, SvId};

// 2^32 Nodes ought to be more than enough for anyone!
pub type EntryId = stable_graph::NodeIndex<u32>;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum GraphError {
    /// `insert_node` referenced a `var_id` the namespace never issued.
    UnknownVariable(SvId),
    /// A `PlaceholderFill`/`PlaceholderGen` referenced a variable that already has a
    /// producer bound to it (at most one Gen node may produce a given variable).
    AlreadyHasProducer(SvId),
    /// The graph has pending Gen tasks but none of them can make progress and no
    /// thread is currently running one: the call graph cannot complete (§4.4).
    Deadlock,
}

impl fmt::Display for GraphError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphError::UnknownVariable(id) => write!(f, "{id} is not a known semantic variable"),
            GraphError::AlreadyHasProducer(id) => write!(f, "{id} already has a producer node"),
            GraphError::Deadlock => write!(f, "no thread can make progress: deadlock"),
        }
    }
}

impl std::error::Error for GraphError {}

/// Sampling parameters forwarded verbatim to the Engine's `generate` call. Parrot
/// does not interpret these fields; it only carries them from the call site to the
/// dispatched `GenTask`.
#[derive(Clone, Debug, Default, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct SamplingConfig {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f32>,
    pub stop: Vec<String>,
}

/// A placeholder slot within a call's template, as handed to `insert_node` by the
/// Process that owns it (§3, §4.5). `graph` treats this as opaque payload: it reads
/// `const_value`/`var_id` once, at insert time, to decide how to bind the node's
/// semantic variable, and otherwise just carries `name`/`sampling_config` along for
/// whoever eventually dispatches the `GenTask`.
#[derive(Clone, Debug)]
pub struct Placeholder {
    pub name: String,
    /// Set for an input placeholder with a literal default baked into the template.
    pub const_value: Option<String>,
    /// Set for an input placeholder that reuses a variable produced elsewhere.
    pub var_id: Option<SvId>,
    /// Set for an output placeholder; ignored for input placeholders.
    pub sampling_config: SamplingConfig,
}

impl Placeholder {
    pub fn input(name: impl Into<String>) -> Placeholder {
        Placeholder {
            name: name.into(),
            const_value: None,
            var_id: None,
            sampling_config: SamplingConfig::default(),
        }
    }

    pub fn input_with_const(name: impl Into<String>, const_value: impl Into<String>) -> Placeholder {
        Placeholder {
            const_value: Some(const_value.into()),
            ..Placeholder::input(name)
        }
    }

    pub fn input_with_var(name: impl Into<String>, var_id: SvId) -> Placeholder {
        Placeholder {
            var_id: Some(var_id),
            ..Placeholder::input(name)
        }
    }

    pub fn output(name: impl Into<String>, sampling_config: SamplingConfig) -> Placeholder {
        Placeholder {
            sampling_config,
            ..Placeholder::input(name)
        }
    }
}

/// The kind of a node being inserted. Mirrors the three node kinds of §3.
#[derive(Clone)]
pub enum NodeKind {
    /// A literal run of template text. Always immediately ready.
    ConstantFill { text: String },
    /// An input placeholder: reads a semantic variable's content into the call.
    PlaceholderFill { placeholder: Placeholder },
    /// An output placeholder: generates a semantic variable's content via the Engine.
    PlaceholderGen { placeholder: Placeholder },
}

impl NodeKind {
    fn is_gen(&self) -> bool {
        matches!(self, NodeKind::PlaceholderGen { .. })
    }
}

/// One node of the Static Graph: either a Fill (consumes a variable) or a Gen
/// (produces one), linked to its neighbors along edge_a (the call's template order)
/// and, implicitly, along edge_b (the variable's producer/consumer relationship,
/// derived from `sv` rather than stored here).
pub struct GraphNode {
    id_in_graph: EntryId,
    kind: NodeKind,
    sv: SemanticVariable,
    edge_a_prev: Option<EntryId>,
    edge_a_next: Option<EntryId>,
}

impl GraphNode {
    pub(crate) fn new(id_in_graph: EntryId, kind: NodeKind, sv: SemanticVariable) -> GraphNode {
        GraphNode {
            id_in_graph,
            kind,
            sv,
            edge_a_prev: None,
            edge_a_next: None,
        }
    }

    pub fn id(&self) -> EntryId {
        self.id_in_graph
    }

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    pub fn sv(&self) -> &SemanticVariable {
        &self.sv
    }

    pub fn edge_a_prev(&self) -> Option<EntryId> {
        self.edge_a_prev
    }

    pub fn edge_a_next(&self) -> Option<EntryId> {
        self.edge_a_next
    }

    pub(crate) fn set_edge_a_prev(&mut self, prev: EntryId) {
        self.edge_a_prev = Some(prev);
    }

    pub(crate) fn set_edge_a_next(&mut self, next: EntryId) {
        self.edge_a_next = Some(next);
    }

    /// edge_b's incoming neighbor: the node that produces this node's bound variable,
    /// if any. A Gen node is itself that producer, so it never has one (§4.4).
    pub fn edge_b_prev(&self) -> Option<NodeId> {
        if self.kind.is_gen() {
            None
        } else {
            self.sv.producer()
        }
    }
}

/// A runnable unit of work anchored at a `PlaceholderGen` node: the Engine call that
/// will, once the prefix preceding it in the call is fully resolved, fill that prefix
/// and generate the node's output variable (§4.4, §4.6).
#[derive(Clone)]
pub struct GenTask {
    pub id: EntryId,
    pub sv: SemanticVariable,
    pub placeholder: Placeholder,
    /// The resolved text of every node preceding this Gen in the call's template
    /// order, in order, ready to hand to the Engine as `fill` calls before `generate`.
    pub prefix: Vec<String>,
}
