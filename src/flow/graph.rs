use super::FlowError;
use crate::survey::{NextDeterminant, QuestionId, Survey};
use std::collections::HashMap;

/// Adjacency view of a survey snapshot, built once per validation pass.
///
/// Nodes are kept in position order so every traversal over the graph is
/// deterministic.
#[derive(Debug, Clone)]
pub struct FlowGraph {
    nodes: Vec<QuestionId>,
    index: HashMap<QuestionId, usize>,
    edges: Vec<Vec<NextDeterminant>>,
    unset_route: Vec<bool>,
}

impl FlowGraph {
    /// Fails with `QuestionNotFound` if any determinant targets a question
    /// that is not part of the snapshot.
    pub fn build(survey: &Survey) -> Result<Self, FlowError> {
        let nodes: Vec<QuestionId> = survey.questions().iter().map(|q| q.id).collect();
        let index: HashMap<QuestionId, usize> =
            nodes.iter().enumerate().map(|(i, id)| (*id, i)).collect();

        let mut edges = Vec::with_capacity(nodes.len());
        let mut unset_route = Vec::with_capacity(nodes.len());
        for question in survey.questions() {
            let outgoing = question.outgoing();
            if let Some(missing) = outgoing
                .iter()
                .filter_map(|d| d.target())
                .find(|t| !index.contains_key(t))
            {
                tracing::error!(
                    survey_id = survey.id,
                    question_id = question.id,
                    "determinant targets unknown question {missing}"
                );
                return Err(FlowError::QuestionNotFound(missing));
            }
            edges.push(outgoing);
            unset_route.push(question.has_unset_route());
        }

        Ok(Self {
            nodes,
            index,
            edges,
            unset_route,
        })
    }

    /// Determinants leaving `question_id`: the default, then each option's
    /// effective determinant in display order.
    pub fn neighbors(&self, question_id: QuestionId) -> Result<&[NextDeterminant], FlowError> {
        self.index
            .get(&question_id)
            .map(|&i| self.edges[i].as_slice())
            .ok_or(FlowError::QuestionNotFound(question_id))
    }

    pub fn nodes(&self) -> &[QuestionId] {
        &self.nodes
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn node_id(&self, index: usize) -> QuestionId {
        self.nodes[index]
    }

    /// `GoToQuestion` targets of node `index`, as node indices.
    pub(crate) fn successors(&self, index: usize) -> impl Iterator<Item = usize> + '_ {
        self.edges[index]
            .iter()
            .filter_map(|d| d.target())
            .filter_map(|t| self.index.get(&t).copied())
    }

    /// True if any edge leaving node `index` ends the survey.
    pub(crate) fn is_sink(&self, index: usize) -> bool {
        self.edges[index].iter().any(NextDeterminant::is_end)
    }

    /// True if some accepted answer (or a skip) at node `index` resolves to
    /// no determinant at all.
    pub(crate) fn has_unset_route(&self, index: usize) -> bool {
        self.unset_route[index]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn survey(src: &str) -> Survey {
        Survey::from_toml_str(src).unwrap()
    }

    const BRANCHING: &str = r#"
[survey]
id = 1
title = "branch"

[[questions]]
id = 1
position = 1
kind = "single_choice"
text = "Which way?"
next = 2

[[questions.options]]
text = "A"
next = 2

[[questions.options]]
text = "B"
next = 3

[[questions.options]]
text = "C"

[[questions]]
id = 2
position = 2
kind = "text"
text = "Left"
next = "end"

[[questions]]
id = 3
position = 3
kind = "text"
text = "Right"
next = "end"
"#;

    #[test]
    fn neighbors_include_default_and_option_overrides() {
        let graph = FlowGraph::build(&survey(BRANCHING)).unwrap();
        let n = graph.neighbors(1).unwrap();
        assert_eq!(
            n,
            &[
                NextDeterminant::GoToQuestion(2),
                NextDeterminant::GoToQuestion(2),
                NextDeterminant::GoToQuestion(3),
                NextDeterminant::GoToQuestion(2),
            ]
        );
        assert_eq!(graph.neighbors(3).unwrap(), &[NextDeterminant::EndSurvey]);
    }

    #[test]
    fn neighbors_of_unknown_question_fails() {
        let graph = FlowGraph::build(&survey(BRANCHING)).unwrap();
        assert!(matches!(
            graph.neighbors(42),
            Err(FlowError::QuestionNotFound(42))
        ));
    }

    #[test]
    fn sinks_and_successors() {
        let graph = FlowGraph::build(&survey(BRANCHING)).unwrap();
        assert!(!graph.is_sink(0));
        assert!(graph.is_sink(1));
        let succ: Vec<_> = graph.successors(0).map(|i| graph.node_id(i)).collect();
        assert_eq!(succ, vec![2, 2, 3, 2]);
        assert_eq!(graph.nodes(), &[1, 2, 3]);
    }
}
