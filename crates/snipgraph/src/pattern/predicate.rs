use std::fmt;
use std::sync::Arc;

use crate::graph::{ElementType, Graph, Operation, OutputRef};

type PredicateFn = dyn Fn(&Graph, OutputRef) -> bool + Send + Sync;

/// Composable boolean guard over one graph output.
#[derive(Clone)]
pub struct Predicate {
    check: Arc<PredicateFn>,
    label: Arc<str>,
}

impl fmt::Debug for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label)
    }
}

impl Default for Predicate {
    fn default() -> Self {
        Self::always()
    }
}

impl Predicate {
    pub fn new<F>(label: &str, check: F) -> Self
    where
        F: Fn(&Graph, OutputRef) -> bool + Send + Sync + 'static,
    {
        Self {
            check: Arc::new(check),
            label: Arc::from(label),
        }
    }

    pub fn always() -> Self {
        Self::new("true", |_, _| true)
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn test(&self, graph: &Graph, output: OutputRef) -> bool {
        (self.check)(graph, output)
    }

    pub fn and(self, other: Predicate) -> Predicate {
        let label = format!("({} && {})", self.label, other.label);
        Self::new(&label, move |graph, output| {
            self.test(graph, output) && other.test(graph, output)
        })
    }

    pub fn or(self, other: Predicate) -> Predicate {
        let label = format!("({} || {})", self.label, other.label);
        Self::new(&label, move |graph, output| {
            self.test(graph, output) || other.test(graph, output)
        })
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(self) -> Predicate {
        let label = format!("!{}", self.label);
        Self::new(&label, move |graph, output| !self.test(graph, output))
    }
}

/// Output has exactly `count` consumers.
pub fn consumers_count(count: usize) -> Predicate {
    Predicate::new(&format!("consumers_count({count})"), move |graph, output| {
        graph.consumers(output).len() == count
    })
}

pub fn has_static_rank() -> Predicate {
    Predicate::new("has_static_rank", |graph, output| {
        graph
            .output_spec(output)
            .is_some_and(|spec| spec.shape.has_static_rank())
    })
}

pub fn has_static_shape() -> Predicate {
    Predicate::new("has_static_shape", |graph, output| {
        graph
            .output_spec(output)
            .is_some_and(|spec| spec.shape.is_static())
    })
}

pub fn type_matches(element_type: ElementType) -> Predicate {
    Predicate::new(&format!("type_matches({element_type})"), move |graph, output| {
        graph
            .output_spec(output)
            .is_some_and(|spec| spec.element_type == element_type)
    })
}

pub fn type_matches_any(element_types: &[ElementType]) -> Predicate {
    let types = element_types.to_vec();
    Predicate::new("type_matches_any", move |graph, output| {
        graph
            .output_spec(output)
            .is_some_and(|spec| types.contains(&spec.element_type))
    })
}

/// Element type is floating point.
pub fn is_float() -> Predicate {
    Predicate::new("is_float", |graph, output| {
        graph
            .output_spec(output)
            .is_some_and(|spec| spec.element_type.is_float())
    })
}

/// Guard over the producing operation's parameters.
pub fn op_matches<F>(label: &str, check: F) -> Predicate
where
    F: Fn(&Operation) -> bool + Send + Sync + 'static,
{
    Predicate::new(label, move |graph, output| {
        graph.get(output.node).is_some_and(|node| check(node.op()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{GraphBuilder, PartialShape};

    #[test]
    fn combinators_compose() {
        let mut builder = GraphBuilder::new();
        let x = builder.parameter("x", ElementType::F32, &[2, 3]);
        let y = builder.parameter_with_shape("y", ElementType::F32, PartialShape::dynamic_rank());
        let graph = builder.finish();

        let static_float = has_static_shape().and(type_matches(ElementType::F32));
        assert!(static_float.test(&graph, x));
        assert!(!static_float.test(&graph, y));
        assert!(has_static_rank().not().test(&graph, y));
        assert!(has_static_rank().or(consumers_count(0)).test(&graph, y));
        assert_eq!(static_float.label(), "(has_static_shape && type_matches(f32))");
    }
}
