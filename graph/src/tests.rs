// Copyright 2026 Parrot project contributors (see CONTRIBUTORS.md).
// Licensed under the Apache License, Version 2.0 (see LICENSE).
use crate::Graph;
use crate::{GraphError, NodeKind, Placeholder, SamplingConfig};
use svar::SvNamespace;

fn gen(name: &str) -> NodeKind {
    NodeKind::PlaceholderGen {
        placeholder: Placeholder::output(name, SamplingConfig::default()),
    }
}

#[test]
fn constant_fill_is_immediately_consumable() {
    let ns = SvNamespace::new();
    let graph = Graph::new();
    graph
        .insert_node(
            NodeKind::ConstantFill { text: "Hello ".to_owned() },
            None,
            &ns,
        )
        .unwrap();
    assert_eq!(graph.stats().nodes, 1);
    assert!(graph.get_ready_task().is_none(), "no Gen node inserted yet");
}

#[test]
fn simple_chain_produces_one_ready_task() {
    let ns = SvNamespace::new();
    let graph = Graph::new();
    let a = graph
        .insert_node(
            NodeKind::ConstantFill { text: "Hello ".to_owned() },
            None,
            &ns,
        )
        .unwrap();
    graph.insert_node(gen("out"), Some(a), &ns).unwrap();

    let task = graph.get_ready_task().expect("chain has no unresolved inputs");
    assert_eq!(task.prefix, vec!["Hello ".to_owned()]);
    assert_eq!(task.placeholder.name, "out");
}

#[test]
fn gen_not_ready_until_prefix_input_resolves() {
    let ns = SvNamespace::new();
    let graph = Graph::new();
    let input = Placeholder::input("name");
    let fill = graph
        .insert_node(NodeKind::PlaceholderFill { placeholder: input }, None, &ns)
        .unwrap();
    graph.insert_node(gen("out"), Some(fill), &ns).unwrap();

    assert!(graph.get_ready_task().is_none(), "input placeholder is unset");

    // Simulate the owning Process's `placeholder_set`: the first variable this test
    // allocates is the one bound to the input Fill node above.
    let sv = ns.lookup(svar::SvId(0)).unwrap();
    sv.set("Ada").unwrap();

    let task = graph.get_ready_task().expect("input is now resolved");
    assert_eq!(task.prefix, vec!["Ada".to_owned()]);
}

#[test]
fn cross_call_dependency_via_var_id_becomes_ready_once_producer_completes() {
    let ns = SvNamespace::new();
    let graph = Graph::new();

    // Call 1: a bare output placeholder, ready immediately (empty prefix).
    graph.insert_node(gen("first"), None, &ns).unwrap();
    let task1 = graph.get_ready_task().expect("no prefix to resolve");
    let produced_var = task1.sv.id();

    // Call 2: an input Fill that reuses call 1's output variable.
    let fill2 = graph
        .insert_node(
            NodeKind::PlaceholderFill {
                placeholder: Placeholder::input_with_var("first", produced_var),
            },
            None,
            &ns,
        )
        .unwrap();
    graph.insert_node(gen("second"), Some(fill2), &ns).unwrap();

    assert!(
        graph.get_ready_task().is_none(),
        "call 1's task is in flight and call 2 depends on its unset output"
    );

    task1.sv.set("hello from call 1").unwrap();
    graph.remove_task(task1.id);

    let task2 = graph.get_ready_task().expect("producer has now completed");
    assert_eq!(task2.prefix, vec!["hello from call 1".to_owned()]);
}

#[test]
fn in_flight_task_is_not_handed_out_twice() {
    let ns = SvNamespace::new();
    let graph = Graph::new();
    let a = graph
        .insert_node(NodeKind::ConstantFill { text: "x".to_owned() }, None, &ns)
        .unwrap();
    graph.insert_node(gen("out"), Some(a), &ns).unwrap();

    let first = graph.get_ready_task();
    assert!(first.is_some());
    assert!(
        graph.get_ready_task().is_none(),
        "task is already in flight and must not be dispatched twice"
    );
}

#[test]
fn reusing_a_variable_that_already_has_a_producer_is_rejected() {
    let ns = SvNamespace::new();
    let graph = Graph::new();
    graph.insert_node(gen("out"), None, &ns).unwrap();
    let task = graph.get_ready_task().unwrap();

    let duplicate_producer = Placeholder {
        var_id: Some(task.sv.id()),
        ..Placeholder::output("out-again", SamplingConfig::default())
    };
    let err = graph
        .insert_node(
            NodeKind::PlaceholderGen { placeholder: duplicate_producer },
            None,
            &ns,
        )
        .unwrap_err();
    assert_eq!(err, GraphError::AlreadyHasProducer(task.sv.id()));
}

#[test]
fn fill_referencing_an_unknown_variable_is_rejected() {
    let ns = SvNamespace::new();
    let graph = Graph::new();
    let bogus = ns.get_new_id();
    let err = graph
        .insert_node(
            NodeKind::PlaceholderFill {
                placeholder: Placeholder::input_with_var("x", bogus),
            },
            None,
            &ns,
        )
        .unwrap_err();
    assert_eq!(err, GraphError::UnknownVariable(bogus));
}

#[test]
fn to_dot_includes_every_inserted_node() {
    let ns = SvNamespace::new();
    let graph = Graph::new();
    let a = graph
        .insert_node(NodeKind::ConstantFill { text: "x".to_owned() }, None, &ns)
        .unwrap();
    graph.insert_node(gen("out"), Some(a), &ns).unwrap();

    let dot = graph.to_dot();
    assert!(dot.contains("digraph"));
    assert!(dot.contains("ConstantFill"));
    assert!(dot.contains("PlaceholderGen"));
}
