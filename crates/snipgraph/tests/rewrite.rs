use snipgraph::graph::ConstantValue;
use snipgraph::rewrite::{RewriteRegistry, ValueRef};
use snipgraph::{ElementType, GraphBuilder, GraphError, OpKind, Operation};

#[test]
fn staged_nodes_are_inferred_and_committed_atomically() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3]);
    let y = b.parameter("y", ElementType::F32, &[2, 3]);
    let sum = b.node("sum", Operation::Add, &[x, y]).unwrap();
    let out = b.node("out", Operation::Multiply, &[sum, y]).unwrap();
    b.result(out).unwrap();
    let mut graph = b.finish();
    graph.set_rt_info(sum.node, "origin", "layer0").unwrap();

    let mut registry = RewriteRegistry::new();
    let diff = registry
        .make(&graph, Operation::Subtract, &[x.into(), y.into()])
        .unwrap();
    let doubled = registry
        .make(&graph, Operation::Add, &[diff.output(0), diff.output(0)])
        .unwrap();
    assert_eq!(
        registry.spec(&graph, doubled.output(0)).unwrap().shape.static_dims(),
        Some(vec![2, 3])
    );
    registry.replace(sum, doubled.output(0));
    registry.copy_runtime_info_from(&[sum.node]);

    let stats = graph.commit(registry).unwrap();

    assert_eq!(stats.inserted.len(), 2);
    assert_eq!(stats.replaced, 1);
    assert_eq!(stats.released, 1);
    let new_root = stats.inserted[1];
    assert_eq!(graph.kind_of(new_root), Some(OpKind::Add));
    assert_eq!(graph.node(new_root).unwrap().name(), "sum", "name inherited");
    for id in &stats.inserted {
        let info = graph.node(*id).unwrap().rt_info();
        assert_eq!(info.get("origin").map(String::as_str), Some("layer0"));
    }
    assert_eq!(graph.producer(out.node.input(0)), Some(new_root.output(0)));
    graph.validate().unwrap();
}

#[test]
fn dropping_a_registry_leaves_the_graph_untouched() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[4]);
    let twice = b.node("twice", Operation::Add, &[x, x]).unwrap();
    b.result(twice).unwrap();
    let graph = b.finish();
    let version = graph.version();
    let len = graph.len();

    let mut registry = RewriteRegistry::new();
    let staged = registry.make(&graph, Operation::Multiply, &[x.into(), x.into()]).unwrap();
    registry.replace(twice, staged.output(0));
    drop(registry);

    assert_eq!(graph.version(), version);
    assert_eq!(graph.len(), len);
}

#[test]
fn make_reports_inference_failures() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3]);
    let idx = b.parameter("idx", ElementType::I32, &[2, 3]);
    let graph = b.finish();

    let mut registry = RewriteRegistry::new();
    let err = registry
        .make(&graph, Operation::Add, &[x.into(), idx.into()])
        .unwrap_err();
    assert!(matches!(err, GraphError::ShapeInference { kind: OpKind::Add, .. }));
    assert_eq!(registry.staged_len(), 0);
}

#[test]
fn commit_rejects_a_replacement_that_feeds_itself() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[4]);
    let a = b.node("a", Operation::Add, &[x, x]).unwrap();
    let m = b.node("m", Operation::Multiply, &[a, x]).unwrap();
    b.result(m).unwrap();
    let mut graph = b.finish();
    let version = graph.version();

    // `m` consumes `a`, so `a` cannot be replaced by something computed from `m`.
    let mut registry = RewriteRegistry::new();
    let looped = registry
        .make(&graph, Operation::Subtract, &[m.into(), x.into()])
        .unwrap();
    registry.replace(a, looped.output(0));

    let err = graph.commit(registry).unwrap_err();
    assert!(matches!(err, GraphError::CycleIntroduced { from, .. } if from == a));
    assert_eq!(graph.version(), version);
    graph.validate().unwrap();
}

#[test]
fn commit_rejects_self_replacement_and_type_changes() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[4]);
    let a = b.node("a", Operation::Add, &[x, x]).unwrap();
    b.result(a).unwrap();
    let mut graph = b.finish();

    let mut registry = RewriteRegistry::new();
    registry.replace(a, a);
    assert!(matches!(
        graph.commit(registry),
        Err(GraphError::SelfReplacement { .. })
    ));

    let mut registry = RewriteRegistry::new();
    let converted = registry
        .make(&graph, Operation::Convert { to: ElementType::F16 }, &[a.into()])
        .unwrap();
    registry.replace(a, converted.output(0));
    assert!(matches!(
        graph.commit(registry),
        Err(GraphError::ElementTypeMismatch {
            from_type: ElementType::F32,
            to_type: ElementType::F16,
            ..
        })
    ));
}

#[test]
fn staged_constants_replace_graph_values() {
    let mut b = GraphBuilder::new();
    let c = b
        .constant("c", ConstantValue::splat(ElementType::F32, vec![3], 2.0))
        .unwrap();
    let d = b.node("d", Operation::Add, &[c, c]).unwrap();
    b.result(d).unwrap();
    let mut graph = b.finish();

    let mut registry = RewriteRegistry::new();
    let folded = registry
        .make(
            &graph,
            Operation::Constant(ConstantValue::splat(ElementType::F32, vec![3], 4.0)),
            &[],
        )
        .unwrap();
    assert_eq!(folded.output(0), ValueRef::Staged { node: folded, port: 0 });
    registry.set_friendly_name(folded, "folded").unwrap();
    registry.replace(d, folded.output(0));

    let stats = graph.commit(registry).unwrap();

    assert_eq!(stats.released, 2, "the Add and its constant operand");
    let node = graph.node(stats.inserted[0]).unwrap();
    assert_eq!(node.name(), "folded", "explicit names win over inherited ones");
    assert_eq!(
        node.op().as_constant().map(|value| value.data().to_vec()),
        Some(vec![4.0; 3])
    );
}
