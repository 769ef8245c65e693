use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::error::GraphError;
use crate::graph::{Graph, NodeId, Operation, OutputRef};
use crate::rewrite::{CommitStats, RewriteRegistry, ValueRef};

use super::legality::{Boundary, Island};

/// Annotation key recording which motif variant produced a Subgraph.
pub const VARIANT_KEY: &str = "tokenizer.variant";

/// Copies the island into a standalone body graph.
///
/// Parameters follow the boundary inputs, results follow the boundary outputs, and every fused
/// node keeps its name and annotations.
pub(crate) fn build_body(
    graph: &Graph,
    island: &Island,
    boundary: &Boundary,
) -> Result<Graph, GraphError> {
    let mut body = Graph::with_capabilities(graph.capabilities().clone());
    let mut mapping = HashMap::<OutputRef, OutputRef>::new();

    let mut names = HashSet::new();
    for (idx, input) in boundary.inputs.iter().enumerate() {
        let spec = graph
            .output_spec(*input)
            .cloned()
            .ok_or(GraphError::UnknownOutput { output: *input })?;
        let producer = graph.node(input.node)?.name();
        let mut name = if producer.is_empty() {
            format!("input{idx}")
        } else {
            producer.to_string()
        };
        if !names.insert(name.clone()) {
            name = format!("{name}.{idx}");
            names.insert(name.clone());
        }
        let parameter = body.add_parameter(name, spec);
        mapping.insert(*input, parameter.output(0));
    }

    for id in island.constants.iter().chain(&island.nodes) {
        let node = graph.node(*id)?;
        let inputs = node
            .inputs()
            .iter()
            .map(|input| {
                mapping
                    .get(input)
                    .copied()
                    .ok_or(GraphError::UnknownOutput { output: *input })
            })
            .collect::<Result<Vec<_>, _>>()?;
        let outputs = node
            .outputs()
            .iter()
            .map(|output| output.spec().clone())
            .collect();
        let copy = body.add_node_verbatim(node.op().clone(), &inputs, outputs)?;
        body.set_friendly_name(copy, node.name())?;
        for (key, value) in node.rt_info() {
            body.set_rt_info(copy, key.clone(), value.clone())?;
        }
        for port in 0..node.output_count() {
            mapping.insert(id.output(port), copy.output(port));
        }
    }

    for output in &boundary.outputs {
        let inner = mapping
            .get(output)
            .copied()
            .ok_or(GraphError::UnknownOutput { output: *output })?;
        body.add_result(inner)?;
    }
    Ok(body)
}

/// Replaces the island with one Subgraph node and commits the rewrite.
pub(crate) fn fuse(
    graph: &mut Graph,
    island: &Island,
    boundary: &Boundary,
) -> Result<(NodeId, CommitStats), GraphError> {
    let body = build_body(graph, island, boundary)?;
    let sink_name = graph.node(island.sink())?.name().to_string();

    let mut registry = RewriteRegistry::new();
    let inputs = boundary
        .inputs
        .iter()
        .map(|input| ValueRef::from(*input))
        .collect::<Vec<_>>();
    let fused = registry.make(
        graph,
        Operation::Subgraph {
            body: Box::new(body),
        },
        &inputs,
    )?;
    registry.set_friendly_name(fused, sink_name)?;
    registry.set_rt_info(fused, VARIANT_KEY, island.variant.as_str())?;
    registry.copy_runtime_info_from(&island.nodes);
    for (port, output) in boundary.outputs.iter().enumerate() {
        registry.replace(*output, fused.output(port));
    }

    let stats = graph.commit(registry)?;
    let subgraph = stats
        .inserted
        .first()
        .copied()
        .ok_or(GraphError::UnknownStaged { index: 0 })?;
    debug!(
        variant = island.variant.as_str(),
        nodes = island.nodes.len(),
        inputs = boundary.inputs.len(),
        outputs = boundary.outputs.len(),
        "fused attention island"
    );
    Ok((subgraph, stats))
}
