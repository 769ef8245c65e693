use snipgraph::pattern::predicate::{consumers_count, has_static_rank, type_matches};
use snipgraph::{ElementType, GraphBuilder, OpKind, Operation, Pattern};

fn transpose(perm: &[usize]) -> Operation {
    Operation::Transpose {
        perm: perm.to_vec(),
    }
}

#[test]
fn wrap_type_binds_inputs_positionally() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3]);
    let y = b.parameter("y", ElementType::F32, &[2, 3]);
    let sum = b.node("sum", Operation::Add, &[x, y]).unwrap();
    b.result(sum).unwrap();
    let graph = b.finish();

    let mut p = Pattern::builder();
    let lhs = p.any_input();
    let rhs = p.any_input();
    let add = p.wrap_type(&[OpKind::Add], &[lhs, rhs]);
    let pattern = p.finish(add);

    let matched = pattern.match_node(&graph, sum.node).unwrap();
    assert_eq!(matched.get(lhs), Some(x));
    assert_eq!(matched.get(rhs), Some(y));
    assert_eq!(matched.get(add), Some(sum));
    assert_eq!(matched.matched_nodes(), vec![sum.node]);
    assert!(pattern.match_node(&graph, x.node).is_none());
}

#[test]
fn predicate_failure_aborts_the_whole_match() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3]);
    let t = b.transpose("t", x, &[1, 0]).unwrap();
    let a = b.node("a", Operation::Add, &[t, t]).unwrap();
    b.result(a).unwrap();
    let graph = b.finish();

    let mut p = Pattern::builder();
    let source = p.any_input();
    let inner = p.wrap_type_with(&[OpKind::Transpose], &[source], consumers_count(1));
    let add = p.wrap_type(&[OpKind::Add], &[inner, inner]);
    let pattern = p.finish(add);

    assert!(
        pattern.match_node(&graph, a.node).is_none(),
        "the transpose feeds two input slots"
    );
}

#[test]
fn repeated_placeholder_must_bind_the_same_output() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[4]);
    let y = b.parameter("y", ElementType::F32, &[4]);
    let same = b.node("same", Operation::Add, &[x, x]).unwrap();
    let mixed = b.node("mixed", Operation::Add, &[x, y]).unwrap();
    b.result(same).unwrap();
    b.result(mixed).unwrap();
    let graph = b.finish();

    let mut p = Pattern::builder();
    let operand = p.any_input();
    let add = p.wrap_type(&[OpKind::Add], &[operand, operand]);
    let pattern = p.finish(add);

    assert!(pattern.match_node(&graph, same.node).is_some());
    assert!(pattern.match_node(&graph, mixed.node).is_none());
}

#[test]
fn optional_node_is_skipped_when_absent() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 3]);
    let t = b.transpose("t", x, &[1, 0]).unwrap();
    let with_transpose = b.node("softmax_t", Operation::Softmax { axis: -1 }, &[t]).unwrap();
    let without = b.node("softmax_x", Operation::Softmax { axis: -1 }, &[x]).unwrap();
    b.result(with_transpose).unwrap();
    b.result(without).unwrap();
    let graph = b.finish();

    let mut p = Pattern::builder();
    let source = p.any_input();
    let maybe = p.optional(&[OpKind::Transpose], &[source]);
    let softmax = p.wrap_type(&[OpKind::Softmax], &[maybe]);
    let pattern = p.finish(softmax);

    let present = pattern.match_node(&graph, with_transpose.node).unwrap();
    assert_eq!(present.get(maybe), Some(t));
    assert_eq!(present.get(source), Some(x));
    assert_eq!(present.matched_nodes().len(), 2);

    let absent = pattern.match_node(&graph, without.node).unwrap();
    assert_eq!(absent.get(maybe), None);
    assert_eq!(absent.get(source), Some(x));
    assert_eq!(absent.matched_nodes(), vec![without.node]);
}

#[test]
fn or_takes_the_first_matching_branch() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 2]);
    let t = b.transpose("t", x, &[1, 0]).unwrap();
    let r = b.node(
        "r",
        Operation::Reshape {
            target: vec![4],
            special_zero: false,
        },
        &[t],
    )
    .unwrap();
    b.result(r).unwrap();
    let graph = b.finish();

    let mut p = Pattern::builder();
    let source = p.any_input();
    let via_transpose = p.wrap_type(&[OpKind::Transpose], &[source]);
    let anything = p.any_input();
    let either = p.or(&[via_transpose, anything]);
    let reshape = p.wrap_type(&[OpKind::Reshape], &[either]);
    let pattern = p.finish(reshape);

    let matched = pattern.match_node(&graph, r.node).unwrap();
    assert_eq!(matched.get(via_transpose), Some(t));
    assert_eq!(matched.get(anything), None, "the second branch is never tried");
}

#[test]
fn root_kinds_follow_optional_and_or() {
    let mut p = Pattern::builder();
    let source = p.any_input();
    let transpose = p.optional(&[OpKind::Transpose], &[source]);
    let pattern = p.finish(transpose);
    assert_eq!(pattern.root_kinds(), None, "an optional root may fall back to any input");

    let mut p = Pattern::builder();
    let source = p.any_input();
    let add = p.wrap_type(&[OpKind::Add], &[source, source]);
    let mul = p.wrap_type(&[OpKind::Multiply], &[source, source]);
    let either = p.or(&[add, mul]);
    let pattern = p.finish(either);
    let kinds = pattern.root_kinds().unwrap();
    assert_eq!(kinds.as_slice(), &[OpKind::Add, OpKind::Multiply]);
}

#[test]
fn type_and_rank_predicates_guard_bindings() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[2, 2]);
    let i = b.parameter("i", ElementType::I32, &[2, 2]);
    let fx = b.node("fx", transpose(&[1, 0]), &[x]).unwrap();
    let fi = b.node("fi", transpose(&[1, 0]), &[i]).unwrap();
    b.result(fx).unwrap();
    b.result(fi).unwrap();
    let graph = b.finish();

    let mut p = Pattern::builder();
    let source = p.any_input_with(type_matches(ElementType::F32).and(has_static_rank()));
    let root = p.wrap_type(&[OpKind::Transpose], &[source]);
    let pattern = p.finish(root);

    assert!(pattern.match_node(&graph, fx.node).is_some());
    assert!(pattern.match_node(&graph, fi.node).is_none());
}

#[test]
fn matching_is_deterministic() {
    let mut b = GraphBuilder::new();
    let x = b.parameter("x", ElementType::F32, &[3, 3]);
    let t0 = b.transpose("t0", x, &[1, 0]).unwrap();
    let t1 = b.transpose("t1", t0, &[1, 0]).unwrap();
    b.result(t1).unwrap();
    let graph = b.finish();

    let mut p = Pattern::builder();
    let source = p.any_input();
    let inner = p.optional(&[OpKind::Transpose], &[source]);
    let outer = p.wrap_type(&[OpKind::Transpose], &[inner]);
    let pattern = p.finish(outer);

    let first = pattern.match_node(&graph, t1.node).unwrap();
    let second = pattern.match_node(&graph, t1.node).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.get(source), Some(x));
}
