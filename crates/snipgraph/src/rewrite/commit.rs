use std::collections::HashMap;

use tracing::debug;

use crate::error::GraphError;
use crate::graph::{merge_rt_info, Graph, Node, NodeId, Output, OutputRef, RtInfo};

use super::registry::{RewriteRegistry, ValueRef};

/// Outcome of a successful [`Graph::commit`].
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CommitStats {
    /// Arena handles of the staged nodes, in staging order.
    pub inserted: Vec<NodeId>,
    pub replaced: usize,
    pub released: usize,
}

impl Graph {
    /// Applies a rewrite atomically: everything is validated first, then applied without failure
    /// points. On error the graph is untouched.
    pub fn commit(&mut self, registry: RewriteRegistry) -> Result<CommitStats, GraphError> {
        self.validate_commit(&registry)?;
        Ok(self.apply_commit(registry))
    }

    /// Repoints every consumer of `from` to `to`, releasing whatever becomes dead.
    pub fn replace(&mut self, from: OutputRef, to: OutputRef) -> Result<usize, GraphError> {
        let mut registry = RewriteRegistry::new();
        registry.replace(from, to);
        Ok(self.commit(registry)?.released)
    }

    fn validate_commit(&self, registry: &RewriteRegistry) -> Result<(), GraphError> {
        for (index, staged) in registry.staged.iter().enumerate() {
            for input in &staged.inputs {
                match *input {
                    ValueRef::Graph(output) => {
                        if !self.has_output(output) {
                            return Err(GraphError::UnknownOutput { output });
                        }
                    }
                    ValueRef::Staged { node, port } => {
                        let valid = node.0 < index
                            && registry
                                .staged
                                .get(node.0)
                                .is_some_and(|producer| port < producer.outputs.len());
                        if !valid {
                            return Err(GraphError::UnknownStaged { index: node.0 });
                        }
                    }
                }
            }
        }
        for source in &registry.sources {
            self.node(*source)?;
        }

        for &(from, to) in &registry.replacements {
            let from_spec = self
                .output_spec(from)
                .ok_or(GraphError::UnknownOutput { output: from })?;
            let to_spec = registry.spec(self, to).ok_or(match to {
                ValueRef::Graph(output) => GraphError::UnknownOutput { output },
                ValueRef::Staged { node, .. } => GraphError::UnknownStaged { index: node.0 },
            })?;
            if to == ValueRef::Graph(from) {
                return Err(GraphError::SelfReplacement { output: from });
            }
            if from_spec.element_type != to_spec.element_type {
                return Err(GraphError::ElementTypeMismatch {
                    from,
                    from_type: from_spec.element_type,
                    to_type: to_spec.element_type,
                });
            }
        }

        // A repointed consumer must not feed any replacement target.
        let mut roots = Vec::new();
        for &(_, to) in &registry.replacements {
            collect_graph_roots(registry, to, &mut roots);
        }
        let dependencies = self.ancestors(roots);
        for &(from, _) in &registry.replacements {
            if let Some(consumer) = self
                .consumers(from)
                .iter()
                .find(|consumer| dependencies.contains(&consumer.node))
            {
                return Err(GraphError::CycleIntroduced {
                    from,
                    consumer: consumer.node,
                });
            }
        }
        Ok(())
    }

    fn apply_commit(&mut self, registry: RewriteRegistry) -> CommitStats {
        let RewriteRegistry {
            staged,
            replacements,
            sources,
        } = registry;

        let mut provenance = RtInfo::new();
        for source in &sources {
            if let Some(node) = self.get(*source) {
                merge_rt_info(&mut provenance, node.rt_info());
            }
        }
        let inherited_names = replacements
            .iter()
            .filter_map(|(from, _)| Some((from.node, self.get(from.node)?.name().to_string())))
            .collect::<HashMap<_, _>>();

        let mut inserted = Vec::with_capacity(staged.len());
        let mut pending_inputs = Vec::with_capacity(staged.len());
        for node in staged {
            let mut rt_info = node.rt_info;
            merge_rt_info(&mut rt_info, &provenance);
            let id = self.allocate(Node {
                op: node.op,
                inputs: Vec::new(),
                outputs: node.outputs.into_iter().map(Output::new).collect(),
                name: node.name.unwrap_or_default(),
                rt_info,
            });
            inserted.push(id);
            pending_inputs.push(node.inputs);
        }
        let resolve = |value: ValueRef| match value {
            ValueRef::Graph(output) => output,
            ValueRef::Staged { node, port } => inserted[node.0].output(port),
        };

        for &(from, to) in &replacements {
            self.repoint_consumers(from, resolve(to));
        }
        for (id, inputs) in inserted.iter().zip(pending_inputs) {
            let inputs = inputs.into_iter().map(resolve).collect();
            self.wire_inputs(*id, inputs);
        }
        for &(from, to) in &replacements {
            if let (ValueRef::Staged { .. }, Some(name)) = (to, inherited_names.get(&from.node)) {
                self.set_name_if_empty(resolve(to).node, name);
            }
        }

        let mut released = 0usize;
        for &(from, _) in &replacements {
            released += self.release_if_dead(from.node);
        }
        for id in &inserted {
            released += self.release_if_dead(*id);
        }
        self.bump_version();

        debug!(
            inserted = inserted.len(),
            replaced = replacements.len(),
            released,
            "rewrite committed"
        );
        CommitStats {
            inserted,
            replaced: replacements.len(),
            released,
        }
    }
}

fn collect_graph_roots(registry: &RewriteRegistry, value: ValueRef, roots: &mut Vec<NodeId>) {
    let mut stack = vec![value];
    let mut visited = vec![false; registry.staged.len()];
    while let Some(value) = stack.pop() {
        match value {
            ValueRef::Graph(output) => roots.push(output.node),
            ValueRef::Staged { node, .. } => {
                if std::mem::replace(&mut visited[node.0], true) {
                    continue;
                }
                stack.extend(registry.staged[node.0].inputs.iter().copied());
            }
        }
    }
}
