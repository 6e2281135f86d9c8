use super::graph::FlowGraph;
use crate::survey::QuestionId;
use std::collections::VecDeque;

/// Outcome of a reachability pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReachabilityReport {
    pub all_reachable: bool,
    /// Questions that can never lead to an `EndSurvey` sink, in position order.
    /// Includes every question in `unset_routes`.
    pub unreachable: Vec<QuestionId>,
    /// Questions where some accepted answer or a skip has no determinant.
    pub unset_routes: Vec<QuestionId>,
}

/// Reverse BFS from every sink question.
///
/// A question with an unset route is never marked reached: a respondent can
/// land on an answer there that leads nowhere, so it counts as a dead end and
/// does not lend reachability to its predecessors.
///
/// Only meaningful on an acyclic graph: inside a cycle a node can look
/// "reachable" without any path that actually ends the survey.
pub struct ReachabilityChecker;

impl ReachabilityChecker {
    pub fn check(graph: &FlowGraph) -> ReachabilityReport {
        let n = graph.len();
        let mut reverse: Vec<Vec<usize>> = vec![Vec::new(); n];
        for from in 0..n {
            for to in graph.successors(from) {
                reverse[to].push(from);
            }
        }

        let mut reached = vec![false; n];
        let mut queue = VecDeque::new();
        for node in 0..n {
            if graph.is_sink(node) && !graph.has_unset_route(node) {
                reached[node] = true;
                queue.push_back(node);
            }
        }

        while let Some(node) = queue.pop_front() {
            for &pred in &reverse[node] {
                if !reached[pred] && !graph.has_unset_route(pred) {
                    reached[pred] = true;
                    queue.push_back(pred);
                }
            }
        }

        let unreachable: Vec<QuestionId> = (0..n)
            .filter(|&i| !reached[i])
            .map(|i| graph.node_id(i))
            .collect();
        let unset_routes: Vec<QuestionId> = (0..n)
            .filter(|&i| graph.has_unset_route(i))
            .map(|i| graph.node_id(i))
            .collect();
        if !unset_routes.is_empty() {
            tracing::debug!(?unset_routes, "questions with answers that lead nowhere");
        }

        ReachabilityReport {
            all_reachable: unreachable.is_empty(),
            unreachable,
            unset_routes,
        }
    }
}
