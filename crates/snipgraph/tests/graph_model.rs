use snipgraph::graph::{ConstantValue, Dimension, OutputSpec, PartialShape};
use snipgraph::{ElementType, Graph, GraphBuilder, GraphError, OpKind, Operation};

fn add_mul_chain() -> (Graph, Vec<snipgraph::OutputRef>) {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 4]);
    let y = b.parameter("y", ElementType::F32, &[2, 4]);
    let sum = b.node("sum", Operation::Add, &[x, y]).unwrap();
    let prod = b.node("prod", Operation::Multiply, &[sum, y]).unwrap();
    b.result(prod).unwrap();
    (b.finish(), vec![x, y, sum, prod])
}

#[test]
fn builder_wires_consumers_and_infers_specs() {
    let (graph, values) = add_mul_chain();
    let [x, y, sum, prod] = values[..] else {
        unreachable!()
    };

    assert_eq!(graph.len(), 5);
    assert_eq!(graph.parameters().len(), 2);
    assert_eq!(graph.results().len(), 1);
    assert_eq!(graph.consumers(x).len(), 1);
    assert_eq!(graph.consumers(y).len(), 2);
    assert_eq!(
        graph.output_spec(prod),
        Some(&OutputSpec::static_shape(ElementType::F32, &[2, 4]))
    );
    assert_eq!(graph.node(sum.node).unwrap().name(), "sum");
    graph.validate().unwrap();
}

#[test]
fn replace_moves_every_consumer_and_releases_dead_producers() {
    let (mut graph, values) = add_mul_chain();
    let [x, y, sum, _] = values[..] else {
        unreachable!()
    };
    let consumers_before = graph.consumers(sum).to_vec();

    let released = graph.replace(sum, x).unwrap();

    assert_eq!(released, 1, "the Add has no consumers left");
    assert!(!graph.contains(sum.node));
    for consumer in consumers_before {
        assert_eq!(graph.producer(consumer), Some(x));
    }
    assert_eq!(graph.consumers(y).len(), 1);
    graph.validate().unwrap();
}

#[test]
fn replace_rejects_mismatched_element_types() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[4]);
    let idx = b.parameter("idx", ElementType::I32, &[4]);
    let twice = b.node("twice", Operation::Add, &[x, x]).unwrap();
    b.result(twice).unwrap();
    let mut graph = b.finish();
    let version = graph.version();

    let err = graph.replace(twice, idx).unwrap_err();

    assert!(matches!(err, GraphError::ElementTypeMismatch { .. }));
    assert_eq!(graph.version(), version, "a rejected replace leaves no trace");
    assert_eq!(graph.consumers(twice).len(), 1);
}

#[test]
fn released_handles_never_alias_new_nodes() {
    let (mut graph, values) = add_mul_chain();
    let [x, _, sum, _] = values[..] else {
        unreachable!()
    };
    graph.replace(sum, x).unwrap();

    let fresh = graph.add_node(Operation::Add, &[x, x]).unwrap();

    assert_eq!(fresh.index(), sum.node.index(), "the slot is recycled");
    assert_ne!(fresh, sum.node);
    assert!(graph.get(sum.node).is_none());
    assert!(matches!(
        graph.node(sum.node),
        Err(GraphError::UnknownNode { .. })
    ));
}

#[test]
fn pins_keep_unused_nodes_alive_until_released() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[4]);
    let twice = b.node("twice", Operation::Add, &[x, x]).unwrap();
    let mut graph = b.finish();

    graph.pin(twice.node).unwrap();
    assert_eq!(graph.collect_garbage(), 0);
    assert!(graph.contains(twice.node));

    assert_eq!(graph.unpin(twice.node).unwrap(), 1);
    assert!(!graph.contains(twice.node));
    assert!(graph.consumers(x).is_empty());
}

#[test]
fn add_node_checks_arity_and_inference() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3]);
    let y = b.parameter("y", ElementType::F32, &[4, 5]);
    let mut graph = b.finish();

    assert!(matches!(
        graph.add_node(Operation::Add, &[x]),
        Err(GraphError::InputArity { kind: OpKind::Add, .. })
    ));
    assert!(matches!(
        graph.add_node(Operation::Add, &[x, y]),
        Err(GraphError::ShapeInference { kind: OpKind::Add, .. })
    ));
}

#[test]
fn dynamic_dimensions_propagate_through_inference() {
    let mut b = GraphBuilder::new();
    let x = b.parameter_with_shape(
        "x",
        ElementType::F32,
        PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(8)]),
    );
    let w = b.parameter("w", ElementType::F32, &[16, 8]);
    let fc = b.node("fc", Operation::FullyConnected, &[x, w]).unwrap();
    let graph = b.finish();

    let spec = graph.output_spec(fc).unwrap();
    assert_eq!(
        spec.shape,
        PartialShape::new(vec![Dimension::Dynamic, Dimension::Static(16)])
    );
}

#[test]
fn copy_runtime_info_prefers_destination_values() {
    let (mut graph, values) = add_mul_chain();
    let [_, _, sum, prod] = values[..] else {
        unreachable!()
    };
    graph.set_rt_info(sum.node, "origin", "sum").unwrap();
    graph.set_rt_info(sum.node, "layer", "3").unwrap();
    graph.set_rt_info(prod.node, "origin", "prod").unwrap();

    graph.copy_runtime_info(&[sum.node], &[prod.node]).unwrap();

    let info = graph.node(prod.node).unwrap().rt_info();
    assert_eq!(info.get("origin").map(String::as_str), Some("prod"));
    assert_eq!(info.get("layer").map(String::as_str), Some("3"));
}

#[test]
fn topological_order_is_deterministic() {
    let (graph, _) = add_mul_chain();
    let first = graph.topological_order().unwrap();
    let second = graph.clone().topological_order().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.len(), graph.len());
}

#[test]
fn constants_validate_their_payload() {
    assert!(matches!(
        ConstantValue::new(ElementType::F32, vec![2, 2], vec![1.0, 2.0, 3.0]),
        Err(GraphError::ConstantPayload {
            expected: 4,
            actual: 3
        })
    ));

    let mut b = GraphBuilder::new();
    let c = b
        .constant(
            "c",
            ConstantValue::new(ElementType::I32, vec![3], vec![1.0, 2.0, 3.0]).unwrap(),
        )
        .unwrap();
    let graph = b.finish();
    assert_eq!(
        graph.output_spec(c),
        Some(&OutputSpec::static_shape(ElementType::I32, &[3]))
    );
}
