use super::graph::FlowGraph;
use crate::survey::QuestionId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Color {
    /// Not visited yet.
    White,
    /// On the current DFS path.
    Gray,
    /// Fully explored.
    Black,
}

/// Outcome of a cycle search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CycleReport {
    pub has_cycle: bool,
    /// Question ids along the cycle in edge order, starting at the node the
    /// search entered first. Empty when `has_cycle` is false.
    pub path: Vec<QuestionId>,
}

struct Frame {
    node: usize,
    successors: Vec<usize>,
    next: usize,
}

impl Frame {
    fn enter(graph: &FlowGraph, node: usize) -> Self {
        Self {
            node,
            successors: graph.successors(node).collect(),
            next: 0,
        }
    }
}

/// Three-color depth-first search over `GoToQuestion` edges.
///
/// Every question is used as a root in position order, so cycles that the
/// start question cannot reach are still found. The DFS keeps its own stack,
/// so deep surveys cannot overflow the thread stack.
pub struct CycleDetector;

impl CycleDetector {
    pub fn detect(graph: &FlowGraph) -> CycleReport {
        let mut color = vec![Color::White; graph.len()];

        for root in 0..graph.len() {
            if color[root] != Color::White {
                continue;
            }
            color[root] = Color::Gray;
            let mut stack = vec![Frame::enter(graph, root)];

            while let Some(frame) = stack.last_mut() {
                let Some(&next) = frame.successors.get(frame.next) else {
                    color[frame.node] = Color::Black;
                    stack.pop();
                    continue;
                };
                frame.next += 1;

                match color[next] {
                    Color::White => {
                        color[next] = Color::Gray;
                        stack.push(Frame::enter(graph, next));
                    }
                    Color::Gray => {
                        if let Some(start) = stack.iter().position(|f| f.node == next) {
                            let path = stack[start..]
                                .iter()
                                .map(|f| graph.node_id(f.node))
                                .collect();
                            return CycleReport {
                                has_cycle: true,
                                path,
                            };
                        }
                    }
                    Color::Black => {}
                }
            }
        }

        CycleReport::default()
    }
}
