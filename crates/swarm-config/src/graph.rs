//! Cycle detection over the `connections` graph.

use indexmap::IndexMap;
use swarm_core::SwarmError;

use crate::Instance;

#[derive(Clone, Copy, PartialEq)]
enum Mark {
    Unvisited,
    InStack,
    Done,
}

/// Depth-first traversal in document order. On the first back edge, reports
/// the minimal offending path `a -> b -> ... -> a`.
pub(crate) fn detect_cycles(instances: &IndexMap<String, Instance>) -> Result<(), SwarmError> {
    let mut marks: IndexMap<&str, Mark> = instances
        .keys()
        .map(|name| (name.as_str(), Mark::Unvisited))
        .collect();
    let mut stack: Vec<&str> = Vec::new();

    for name in instances.keys() {
        if marks[name.as_str()] == Mark::Unvisited {
            if let Some(cycle) = visit(name, instances, &mut marks, &mut stack) {
                return Err(SwarmError::config(format!(
                    "Circular dependency detected: {}",
                    cycle.join(" -> ")
                )));
            }
        }
    }
    Ok(())
}

fn visit<'a>(
    node: &'a str,
    instances: &'a IndexMap<String, Instance>,
    marks: &mut IndexMap<&'a str, Mark>,
    stack: &mut Vec<&'a str>,
) -> Option<Vec<String>> {
    marks.insert(node, Mark::InStack);
    stack.push(node);

    if let Some(instance) = instances.get(node) {
        for next in &instance.connections {
            match marks.get(next.as_str()).copied() {
                Some(Mark::InStack) => {
                    let start = stack
                        .iter()
                        .position(|entry| *entry == next.as_str())
                        .unwrap_or(0);
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|s| s.to_string()).collect();
                    cycle.push(next.clone());
                    return Some(cycle);
                }
                Some(Mark::Unvisited) => {
                    if let Some(cycle) = visit(next.as_str(), instances, marks, stack) {
                        return Some(cycle);
                    }
                }
                // Finished nodes cannot be part of a new cycle; edges into
                // missing nodes are reported before cycle detection runs.
                Some(Mark::Done) | None => {}
            }
        }
    }

    stack.pop();
    marks.insert(node, Mark::Done);
    None
}
