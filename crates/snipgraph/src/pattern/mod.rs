//! Pattern templates and the top-down matcher.
//!
//! A pattern is a small DAG of placeholders built with [`PatternBuilder`]:
//! - `any_input` binds whatever output it is offered (subject to a predicate),
//! - `wrap_type` requires a producer of one of the listed kinds and recurses into its inputs,
//! - `optional` behaves like `wrap_type` but lets the match skip the node and continue with its
//!   first declared input,
//! - `or` tries alternatives in declaration order; the first success wins.

mod matcher;
pub mod predicate;

use smallvec::SmallVec;

use crate::graph::OpKind;

pub use matcher::{MatchContext, MatchResult};
pub use predicate::Predicate;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PatternId(u32);

impl PatternId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

pub(crate) type KindSet = SmallVec<[OpKind; 4]>;

#[derive(Debug, Clone)]
pub(crate) enum PatternNode {
    AnyInput {
        predicate: Predicate,
    },
    WrapType {
        kinds: KindSet,
        inputs: Vec<PatternId>,
        predicate: Predicate,
    },
    Optional {
        kinds: KindSet,
        inputs: Vec<PatternId>,
        predicate: Predicate,
    },
    Or {
        branches: Vec<PatternId>,
    },
}

#[derive(Debug, Clone)]
pub struct Pattern {
    nodes: Vec<PatternNode>,
    root: PatternId,
}

impl Pattern {
    pub fn builder() -> PatternBuilder {
        PatternBuilder::new()
    }

    pub fn root(&self) -> PatternId {
        self.root
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node(&self, id: PatternId) -> &PatternNode {
        &self.nodes[id.index()]
    }

    /// Kinds a root candidate may have; `None` when the root accepts any producer.
    pub fn root_kinds(&self) -> Option<SmallVec<[OpKind; 8]>> {
        let mut kinds = SmallVec::new();
        self.collect_root_kinds(self.root, &mut kinds).then_some(kinds)
    }

    fn collect_root_kinds(&self, id: PatternId, out: &mut SmallVec<[OpKind; 8]>) -> bool {
        match self.node(id) {
            PatternNode::AnyInput { .. } => false,
            PatternNode::WrapType { kinds, .. } => {
                extend_unique(out, kinds);
                true
            }
            PatternNode::Optional { kinds, inputs, .. } => {
                extend_unique(out, kinds);
                match inputs.first() {
                    Some(first) => self.collect_root_kinds(*first, out),
                    None => true,
                }
            }
            PatternNode::Or { branches } => branches
                .iter()
                .all(|branch| self.collect_root_kinds(*branch, out)),
        }
    }
}

fn extend_unique(out: &mut SmallVec<[OpKind; 8]>, kinds: &[OpKind]) {
    for kind in kinds {
        if !out.contains(kind) {
            out.push(*kind);
        }
    }
}

#[derive(Debug, Default)]
pub struct PatternBuilder {
    nodes: Vec<PatternNode>,
}

impl PatternBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, node: PatternNode) -> PatternId {
        let id = PatternId(self.nodes.len() as u32);
        self.nodes.push(node);
        id
    }

    pub fn any_input(&mut self) -> PatternId {
        self.any_input_with(Predicate::always())
    }

    pub fn any_input_with(&mut self, predicate: Predicate) -> PatternId {
        self.push(PatternNode::AnyInput { predicate })
    }

    /// Producer kind must be one of `kinds`. An empty `inputs` list leaves inputs unconstrained.
    pub fn wrap_type(&mut self, kinds: &[OpKind], inputs: &[PatternId]) -> PatternId {
        self.wrap_type_with(kinds, inputs, Predicate::always())
    }

    pub fn wrap_type_with(
        &mut self,
        kinds: &[OpKind],
        inputs: &[PatternId],
        predicate: Predicate,
    ) -> PatternId {
        self.push(PatternNode::WrapType {
            kinds: kinds.iter().copied().collect(),
            inputs: inputs.to_vec(),
            predicate,
        })
    }

    pub fn optional(&mut self, kinds: &[OpKind], inputs: &[PatternId]) -> PatternId {
        self.optional_with(kinds, inputs, Predicate::always())
    }

    pub fn optional_with(
        &mut self,
        kinds: &[OpKind],
        inputs: &[PatternId],
        predicate: Predicate,
    ) -> PatternId {
        self.push(PatternNode::Optional {
            kinds: kinds.iter().copied().collect(),
            inputs: inputs.to_vec(),
            predicate,
        })
    }

    pub fn or(&mut self, branches: &[PatternId]) -> PatternId {
        self.push(PatternNode::Or {
            branches: branches.to_vec(),
        })
    }

    pub fn finish(self, root: PatternId) -> Pattern {
        Pattern {
            nodes: self.nodes,
            root,
        }
    }
}
