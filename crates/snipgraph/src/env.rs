use std::env;
use std::sync::OnceLock;

static SNIPGRAPH_MAX_SWEEPS: OnceLock<usize> = OnceLock::new();
static SNIPGRAPH_PASS_STATS: OnceLock<bool> = OnceLock::new();
static SNIPGRAPH_DUMP_GRAPH: OnceLock<bool> = OnceLock::new();

pub(crate) const DEFAULT_MAX_SWEEPS: usize = 16;

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

fn parse_usize(value: &str) -> Option<usize> {
    value.trim().parse::<usize>().ok().filter(|parsed| *parsed > 0)
}

fn flag(cell: &'static OnceLock<bool>, name: &str) -> bool {
    *cell.get_or_init(|| match env::var(name) {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

pub(crate) fn max_sweeps() -> usize {
    *SNIPGRAPH_MAX_SWEEPS.get_or_init(|| {
        env::var("SNIPGRAPH_MAX_SWEEPS")
            .ok()
            .and_then(|value| parse_usize(&value))
            .unwrap_or(DEFAULT_MAX_SWEEPS)
    })
}

pub(crate) fn pass_stats_enabled() -> bool {
    flag(&SNIPGRAPH_PASS_STATS, "SNIPGRAPH_PASS_STATS")
}

pub(crate) fn dump_graph_enabled() -> bool {
    flag(&SNIPGRAPH_DUMP_GRAPH, "SNIPGRAPH_DUMP_GRAPH")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_bool_accepts_common_spellings() {
        for value in ["1", "true", " YES ", "On"] {
            assert!(parse_bool(value), "{value}");
        }
        for value in ["0", "false", "off", "maybe"] {
            assert!(!parse_bool(value), "{value}");
        }
    }

    #[test]
    fn parse_usize_rejects_zero_and_garbage() {
        assert_eq!(parse_usize(" 8 "), Some(8));
        assert_eq!(parse_usize("0"), None);
        assert_eq!(parse_usize("many"), None);
    }
}
