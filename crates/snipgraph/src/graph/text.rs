use std::fmt;

use super::op::Operation;
use super::Graph;

impl Graph {
    fn write_text(&self, f: &mut fmt::Formatter<'_>, indent: usize) -> fmt::Result {
        let pad = "  ".repeat(indent);
        let order = match self.topological_order() {
            Ok(order) => order,
            Err(err) => return writeln!(f, "{pad}<invalid graph: {err}>"),
        };
        for id in order {
            let Some(node) = self.get(id) else {
                continue;
            };
            write!(f, "{pad}{id} = {}", node.op())?;
            f.write_str("(")?;
            for (idx, input) in node.inputs().iter().enumerate() {
                if idx > 0 {
                    f.write_str(", ")?;
                }
                write!(f, "{input}")?;
            }
            f.write_str(")")?;
            if !node.outputs().is_empty() {
                f.write_str(" -> ")?;
                for (idx, output) in node.outputs().iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}", output.spec())?;
                }
            }
            if !node.name().is_empty() {
                write!(f, " \"{}\"", node.name())?;
            }
            if !node.rt_info().is_empty() {
                f.write_str(" {")?;
                for (idx, (key, value)) in node.rt_info().iter().enumerate() {
                    if idx > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{key}={value}")?;
                }
                f.write_str("}")?;
            }
            writeln!(f)?;
            if let Operation::Subgraph { body } = node.op() {
                body.write_text(f, indent + 1)?;
            }
        }
        Ok(())
    }
}

/// Textual dump in topological order, subgraph bodies indented under their node.
impl fmt::Display for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write_text(f, 0)
    }
}
