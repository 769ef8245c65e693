use snipgraph::graph::{ConstantValue, NodeId};
use snipgraph::pass::run_matcher_pass;
use snipgraph::passes::{
    ConstantFoldingPass, FullyConnectedBiasFusion, QuantizedFullyConnectedBiasFusion,
    ReshapeCanonicalizationPass, TransposeCanonicalizationPass, UniqueDecomposition,
};
use snipgraph::{ElementType, Graph, GraphBuilder, GraphPass, OpKind, Operation, OutputRef};

fn result_producer(graph: &Graph, index: usize) -> OutputRef {
    let sink = graph.results()[index];
    graph.producer(sink.input(0)).unwrap()
}

fn count(graph: &Graph, kind: OpKind) -> usize {
    graph
        .node_ids()
        .filter(|id| graph.kind_of(*id) == Some(kind))
        .count()
}

fn reshape(target: &[i64]) -> Operation {
    Operation::Reshape {
        target: target.to_vec(),
        special_zero: false,
    }
}

#[test]
fn transpose_chain_collapses_into_one_permutation() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3, 4]);
    let t0 = b.transpose("t0", x, &[1, 2, 0]).unwrap();
    let t1 = b.transpose("t1", t0, &[1, 2, 0]).unwrap();
    let keep = b.transpose("keep", t1, &[0, 1, 2]).unwrap();
    b.result(keep).unwrap();
    let mut graph = b.finish();

    let result = TransposeCanonicalizationPass::default()
        .run(&mut graph)
        .unwrap();

    assert!(result.changed);
    assert_eq!(count(&graph, OpKind::Transpose), 1);
    let out = result_producer(&graph, 0);
    let node = graph.node(out.node).unwrap();
    assert!(matches!(node.op(), Operation::Transpose { perm } if perm == &[2, 0, 1]));
    assert_eq!(node.input(0), Some(x));
    assert_eq!(
        graph.output_spec(out).unwrap().shape.static_dims(),
        Some(vec![4, 2, 3])
    );
    graph.validate().unwrap();
}

#[test]
fn reshape_chain_folds_and_identity_reshape_disappears() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3]);
    let same = b.node("same", reshape(&[2, 3]), &[x]).unwrap();
    let flat = b.node("flat", reshape(&[6]), &[same]).unwrap();
    let square = b.node("square", reshape(&[3, -1]), &[flat]).unwrap();
    b.result(square).unwrap();
    let mut graph = b.finish();

    let pass = ReshapeCanonicalizationPass::default();
    pass.run(&mut graph).unwrap();
    pass.run(&mut graph).unwrap();

    assert_eq!(count(&graph, OpKind::Reshape), 1);
    let out = result_producer(&graph, 0);
    assert_eq!(graph.node(out.node).unwrap().input(0), Some(x));
    assert_eq!(
        graph.output_spec(out).unwrap().shape.static_dims(),
        Some(vec![3, 2])
    );
    graph.validate().unwrap();
}

#[test]
fn constant_subexpressions_are_folded() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[3]);
    let one = b
        .constant("one", ConstantValue::splat(ElementType::F32, vec![3], 1.0))
        .unwrap();
    let two = b
        .constant("two", ConstantValue::splat(ElementType::F32, vec![3], 2.0))
        .unwrap();
    let sum = b.node("sum", Operation::Add, &[one, two]).unwrap();
    let scaled = b.node("scaled", Operation::Multiply, &[sum, x]).unwrap();
    b.result(scaled).unwrap();
    let mut graph = b.finish();

    let result = run_matcher_pass(&ConstantFoldingPass::new(), &mut graph).unwrap();

    assert_eq!(result.rewrites_applied, 1);
    assert_eq!(result.released_nodes, 3);
    let folded = graph.producer(scaled.node.input(0)).unwrap();
    let node = graph.node(folded.node).unwrap();
    assert_eq!(node.name(), "sum");
    assert_eq!(
        node.op().as_constant().map(|value| value.data().to_vec()),
        Some(vec![3.0; 3])
    );
    assert_eq!(count(&graph, OpKind::Add), 0);
}

fn fully_connected(b: &mut GraphBuilder) -> OutputRef {
    let x = b.parameter("x", ElementType::F32, &[2, 8]);
    let w = b
        .constant("w", ConstantValue::splat(ElementType::F32, vec![16, 8], 0.5))
        .unwrap();
    b.node("fc", Operation::FullyConnected, &[x, w]).unwrap()
}

#[test]
fn bias_add_is_folded_into_fully_connected() {
    let mut b = GraphBuilder::new();
    let fc = fully_connected(&mut b);
    let bias = b
        .constant("bias", ConstantValue::splat(ElementType::F32, vec![1, 16], 0.1))
        .unwrap();
    let add = b.node("add", Operation::Add, &[fc, bias]).unwrap();
    b.result(add).unwrap();
    let mut graph = b.finish();

    let result = run_matcher_pass(&FullyConnectedBiasFusion::new(), &mut graph).unwrap();

    assert!(result.changed);
    let fused = result_producer(&graph, 0);
    let node = graph.node(fused.node).unwrap();
    assert_eq!(node.kind(), OpKind::FullyConnected);
    assert_eq!(node.name(), "add");
    assert_eq!(node.inputs().len(), 3);
    let bias = graph.node(node.inputs()[2].node).unwrap();
    assert_eq!(
        bias.op().as_constant().map(|value| value.shape().to_vec()),
        Some(vec![16]),
        "the bias is flattened"
    );
    assert_eq!(count(&graph, OpKind::Add), 0);
    assert_eq!(count(&graph, OpKind::FullyConnected), 1);
    graph.validate().unwrap();
}

#[test]
fn non_constant_bias_is_left_alone() {
    let mut b = GraphBuilder::new();
    let fc = fully_connected(&mut b);
    let bias = b.parameter("bias", ElementType::F32, &[16]);
    let add = b.node("add", Operation::Add, &[fc, bias]).unwrap();
    b.result(add).unwrap();
    let mut graph = b.finish();
    let version = graph.version();

    let result = run_matcher_pass(&FullyConnectedBiasFusion::new(), &mut graph).unwrap();

    assert_eq!(result.matches, 1);
    assert!(!result.changed);
    assert_eq!(graph.version(), version);
}

#[test]
fn rescaled_fully_connected_keeps_the_scale_after_fusion() {
    let mut b = GraphBuilder::new();
    let fc = fully_connected(&mut b);
    let scale = b
        .constant("scale", ConstantValue::splat(ElementType::F32, vec![16], 0.02))
        .unwrap();
    let mul = b.node("mul", Operation::Multiply, &[fc, scale]).unwrap();
    let bias = b
        .constant("bias", ConstantValue::splat(ElementType::F32, vec![16], 1.0))
        .unwrap();
    let add = b.node("add", Operation::Add, &[mul, bias]).unwrap();
    b.result(add).unwrap();
    let mut graph = b.finish();

    let result =
        run_matcher_pass(&QuantizedFullyConnectedBiasFusion::new(), &mut graph).unwrap();

    assert!(result.changed);
    let out = result_producer(&graph, 0);
    let rescale = graph.node(out.node).unwrap();
    assert_eq!(rescale.kind(), OpKind::Multiply);
    assert_eq!(rescale.name(), "add");
    assert_eq!(rescale.input(1), Some(scale));
    let fused = graph.node(rescale.inputs()[0].node).unwrap();
    assert_eq!(fused.kind(), OpKind::FullyConnected);
    assert_eq!(fused.input(2), Some(bias));
    assert_eq!(count(&graph, OpKind::Add), 0);
    graph.validate().unwrap();
}

#[test]
fn per_channel_bias_must_match_the_channel_count() {
    let mut b = GraphBuilder::new();
    let fc = fully_connected(&mut b);
    let scale = b
        .constant("scale", ConstantValue::splat(ElementType::F32, vec![16], 0.02))
        .unwrap();
    let mul = b.node("mul", Operation::Multiply, &[fc, scale]).unwrap();
    let bias = b
        .constant("bias", ConstantValue::splat(ElementType::F32, vec![2, 16], 1.0))
        .unwrap();
    let add = b.node("add", Operation::Add, &[mul, bias]).unwrap();
    b.result(add).unwrap();
    let mut graph = b.finish();

    let result =
        run_matcher_pass(&QuantizedFullyConnectedBiasFusion::new(), &mut graph).unwrap();

    assert_eq!(result.matches, 1);
    assert!(!result.changed);
}

fn unique_graph(element_type: ElementType, dims: &[usize]) -> (Graph, NodeId) {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", element_type, dims);
    let unique = b
        .node_id(
            "u",
            Operation::Unique {
                index_type: ElementType::I64,
                axis: None,
            },
            &[x],
        )
        .unwrap();
    b.result(unique.output(0)).unwrap();
    b.result(unique.output(2)).unwrap();
    (b.finish(), unique)
}

#[test]
fn unique_is_lowered_to_primitives() {
    let (mut graph, unique) = unique_graph(ElementType::F32, &[2, 3]);

    let result = run_matcher_pass(&UniqueDecomposition::new(), &mut graph).unwrap();

    assert!(result.changed);
    assert!(!graph.contains(unique));
    assert_eq!(count(&graph, OpKind::Unique), 0);
    let values = result_producer(&graph, 0);
    let reverse = result_producer(&graph, 1);
    assert_eq!(graph.node(values.node).unwrap().name(), "u.0");
    assert_eq!(graph.node(reverse.node).unwrap().name(), "u.2");
    assert_eq!(graph.output_spec(values).unwrap().element_type, ElementType::F32);
    assert_eq!(graph.output_spec(reverse).unwrap().element_type, ElementType::I64);
    assert_eq!(count(&graph, OpKind::TopK), 2);
    graph.validate().unwrap();
}

#[test]
fn single_element_unique_needs_no_sorting() {
    let (mut graph, _) = unique_graph(ElementType::F32, &[1, 1]);

    run_matcher_pass(&UniqueDecomposition::new(), &mut graph).unwrap();

    assert_eq!(count(&graph, OpKind::Unique), 0);
    assert_eq!(count(&graph, OpKind::TopK), 0);
    let values = result_producer(&graph, 0);
    assert_eq!(graph.kind_of(values.node), Some(OpKind::Reshape));
    let reverse = result_producer(&graph, 1);
    let zero = graph.node(reverse.node).unwrap();
    assert_eq!(zero.name(), "u.2");
    assert_eq!(
        zero.op().as_constant().map(|value| value.data().to_vec()),
        Some(vec![0.0])
    );
    graph.validate().unwrap();
}

#[test]
fn unique_is_kept_when_counts_are_consumed_or_input_is_boolean() {
    let (mut graph, unique) = unique_graph(ElementType::Boolean, &[4]);
    run_matcher_pass(&UniqueDecomposition::new(), &mut graph).unwrap();
    assert!(graph.contains(unique));

    let (mut graph, unique) = unique_graph(ElementType::F32, &[4]);
    graph.add_result(unique.output(3)).unwrap();
    let result = run_matcher_pass(&UniqueDecomposition::new(), &mut graph).unwrap();
    assert!(!result.changed);
    assert!(graph.contains(unique));
}

#[test]
fn fused_nodes_inherit_provenance() {
    let mut b = GraphBuilder::new();
    let fc = fully_connected(&mut b);
    let bias = b
        .constant("bias", ConstantValue::splat(ElementType::F32, vec![16], 0.1))
        .unwrap();
    let add = b.node("add", Operation::Add, &[fc, bias]).unwrap();
    b.result(add).unwrap();
    let mut graph = b.finish();
    graph.set_rt_info(fc.node, "origin", "dense").unwrap();
    graph.set_rt_info(add.node, "layer", "3").unwrap();

    run_matcher_pass(&FullyConnectedBiasFusion::new(), &mut graph).unwrap();

    let fused = graph.node(result_producer(&graph, 0).node).unwrap();
    assert_eq!(fused.kind(), OpKind::FullyConnected);
    assert_eq!(
        fused.rt_info().get("origin").map(String::as_str),
        Some("dense")
    );
    assert_eq!(fused.rt_info().get("layer").map(String::as_str), Some("3"));
}

#[test]
fn unique_lowering_carries_provenance() {
    let (mut graph, unique) = unique_graph(ElementType::F32, &[2, 3]);
    graph.set_rt_info(unique, "origin", "unique").unwrap();

    run_matcher_pass(&UniqueDecomposition::new(), &mut graph).unwrap();

    let lowered = [result_producer(&graph, 0), result_producer(&graph, 1)]
        .into_iter()
        .map(|output| output.node)
        .chain(
            graph
                .node_ids()
                .filter(|id| graph.kind_of(*id) == Some(OpKind::TopK)),
        )
        .collect::<Vec<NodeId>>();
    assert_eq!(lowered.len(), 4);
    for id in lowered {
        let node = graph.node(id).unwrap();
        assert_eq!(
            node.rt_info().get("origin").map(String::as_str),
            Some("unique"),
            "{} lost its provenance",
            node.name()
        );
    }
}
