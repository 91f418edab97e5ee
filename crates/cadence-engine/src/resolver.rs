use std::collections::{HashMap, HashSet};

use tracing::warn;

use cadence_core::config::AmbiguityPolicy;
use cadence_core::error::{CadenceError, Result};
use cadence_core::types::{Agent, WorkflowGraph};

/// Ordered list of agents a run walks through.
#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub workflow_id: String,
    pub steps: Vec<Agent>,
}

impl ExecutionPlan {
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn node_ids(&self) -> Vec<&str> {
        self.steps.iter().map(|a| a.id.as_str()).collect()
    }
}

/// Turns a workflow graph into a linear execution plan.
///
/// Entry candidates are the explicit entry-edge targets (connection order)
/// followed by agents that no non-entry edge points at (agent order).
/// Several candidates, or an agent with several outgoing edges, are an
/// ambiguity handled according to the configured [`AmbiguityPolicy`].
#[derive(Debug, Clone, Copy, Default)]
pub struct GraphResolver {
    policy: AmbiguityPolicy,
}

impl GraphResolver {
    pub fn new(policy: AmbiguityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> AmbiguityPolicy {
        self.policy
    }

    pub fn resolve(&self, graph: &WorkflowGraph) -> Result<ExecutionPlan> {
        let workflow_id = graph.workflow.id.clone();
        let by_id: HashMap<&str, &Agent> =
            graph.agents.iter().map(|a| (a.id.as_str(), a)).collect();

        for conn in &graph.connections {
            if !by_id.contains_key(conn.to_agent_id.as_str()) {
                return Err(CadenceError::not_found("agent", conn.to_agent_id.clone()));
            }
            if let Some(from) = conn.from_agent_id.as_deref() {
                if !by_id.contains_key(from) {
                    return Err(CadenceError::not_found("agent", from));
                }
            }
        }

        if graph.agents.is_empty() {
            return Ok(ExecutionPlan {
                workflow_id,
                steps: vec![],
            });
        }

        let root = self.pick_root(graph)?;

        let mut steps = Vec::new();
        let mut visited: HashSet<&str> = HashSet::new();
        let mut current = root;
        loop {
            if !visited.insert(current) {
                return Err(CadenceError::Resolution(format!(
                    "cycle detected at agent '{}'",
                    current
                )));
            }
            steps.push(by_id[current].clone());

            let outgoing: Vec<&str> = graph
                .connections
                .iter()
                .filter(|c| c.from_agent_id.as_deref() == Some(current))
                .map(|c| c.to_agent_id.as_str())
                .collect();

            match outgoing.as_slice() {
                [] => break,
                [next] => current = *next,
                [next, ..] => {
                    self.ambiguous(format!(
                        "agent '{}' has {} outgoing connections",
                        current,
                        outgoing.len()
                    ))?;
                    current = *next;
                }
            }
        }

        if visited.len() < graph.agents.len() {
            let unreachable: Vec<&str> = graph
                .agents
                .iter()
                .map(|a| a.id.as_str())
                .filter(|id| !visited.contains(id))
                .collect();
            match self.policy {
                AmbiguityPolicy::Reject => {
                    return Err(CadenceError::Resolution(format!(
                        "unreachable agents: {}",
                        unreachable.join(", ")
                    )));
                }
                AmbiguityPolicy::FirstMatch => {
                    warn!(workflow_id = %workflow_id, unreachable = ?unreachable, "Agents not on the execution path are skipped");
                }
            }
        }

        Ok(ExecutionPlan { workflow_id, steps })
    }

    fn pick_root<'g>(&self, graph: &'g WorkflowGraph) -> Result<&'g str> {
        let targets: HashSet<&str> = graph
            .connections
            .iter()
            .filter(|c| !c.is_entry())
            .map(|c| c.to_agent_id.as_str())
            .collect();

        let explicit = graph
            .connections
            .iter()
            .filter(|c| c.is_entry())
            .map(|c| c.to_agent_id.as_str());
        let inferred = graph
            .agents
            .iter()
            .map(|a| a.id.as_str())
            .filter(|id| !targets.contains(id));

        let mut candidates: Vec<&str> = Vec::new();
        for id in explicit.chain(inferred) {
            if !candidates.contains(&id) {
                candidates.push(id);
            }
        }

        match candidates.as_slice() {
            [] => Err(CadenceError::Resolution(
                "no entry point: every agent has an incoming connection".to_string(),
            )),
            [only] => Ok(*only),
            [first, ..] => {
                self.ambiguous(format!(
                    "{} entry candidates ({})",
                    candidates.len(),
                    candidates.join(", ")
                ))?;
                Ok(*first)
            }
        }
    }

    fn ambiguous(&self, detail: String) -> Result<()> {
        match self.policy {
            AmbiguityPolicy::Reject => Err(CadenceError::Resolution(format!(
                "ambiguous graph: {}",
                detail
            ))),
            AmbiguityPolicy::FirstMatch => {
                warn!(detail = %detail, "Ambiguous graph, taking the first candidate");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::Connection;
    use cadence_test_utils::{agent, linear_graph, workflow};

    fn ids(plan: &ExecutionPlan) -> Vec<&str> {
        plan.node_ids()
    }

    #[test]
    fn linear_chain_resolves_in_order() {
        let names = ["A", "B", "C", "D", "E"];
        let graph = linear_graph("wf", "u1", &names);
        let plan = GraphResolver::default().resolve(&graph).unwrap();
        assert_eq!(plan.len(), names.len());
        assert_eq!(ids(&plan), names.to_vec());
    }

    #[test]
    fn chain_without_entry_edge_uses_inferred_root() {
        let mut graph = linear_graph("wf", "u1", &["A", "B", "C"]);
        graph.connections.retain(|c| !c.is_entry());
        // Declared out of order on purpose.
        graph.agents.reverse();
        let plan = GraphResolver::default().resolve(&graph).unwrap();
        assert_eq!(ids(&plan), vec!["A", "B", "C"]);
    }

    #[test]
    fn single_node_cycle_fails() {
        let graph = WorkflowGraph {
            workflow: workflow("wf", "u1"),
            agents: vec![agent("A", "wf", "A")],
            connections: vec![Connection::link("c1", "wf", "A", "A")],
        };
        let err = GraphResolver::default().resolve(&graph).unwrap_err();
        assert!(matches!(err, CadenceError::Resolution(_)));
    }

    #[test]
    fn cycle_behind_entry_fails() {
        let mut graph = linear_graph("wf", "u1", &["A", "B", "C"]);
        graph.connections.push(Connection::link("back", "wf", "C", "B"));
        let err = GraphResolver::default().resolve(&graph).unwrap_err();
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn empty_workflow_resolves_to_empty_plan() {
        let graph = WorkflowGraph {
            workflow: workflow("wf", "u1"),
            agents: vec![],
            connections: vec![],
        };
        assert!(GraphResolver::default().resolve(&graph).unwrap().is_empty());
    }

    #[test]
    fn unknown_agent_reference_is_not_found() {
        let mut graph = linear_graph("wf", "u1", &["A"]);
        graph.connections.push(Connection::link("c9", "wf", "A", "ghost"));
        let err = GraphResolver::default().resolve(&graph).unwrap_err();
        assert!(matches!(err, CadenceError::NotFound { kind: "agent", .. }));
    }

    fn two_roots() -> WorkflowGraph {
        WorkflowGraph {
            workflow: workflow("wf", "u1"),
            agents: vec![agent("A", "wf", "A"), agent("B", "wf", "B")],
            connections: vec![],
        }
    }

    #[test]
    fn multiple_roots_first_match_picks_insertion_order() {
        let plan = GraphResolver::new(AmbiguityPolicy::FirstMatch)
            .resolve(&two_roots())
            .unwrap();
        assert_eq!(ids(&plan), vec!["A"]);
    }

    #[test]
    fn multiple_roots_rejected_under_strict_policy() {
        let err = GraphResolver::new(AmbiguityPolicy::Reject)
            .resolve(&two_roots())
            .unwrap_err();
        assert!(matches!(err, CadenceError::Resolution(_)));
    }

    #[test]
    fn explicit_entry_wins_over_agent_order() {
        let graph = WorkflowGraph {
            workflow: workflow("wf", "u1"),
            agents: vec![agent("A", "wf", "A"), agent("B", "wf", "B")],
            connections: vec![
                Connection::entry("c0", "wf", "B"),
                Connection::link("c1", "wf", "B", "A"),
            ],
        };
        let plan = GraphResolver::new(AmbiguityPolicy::Reject)
            .resolve(&graph)
            .unwrap();
        assert_eq!(ids(&plan), vec!["B", "A"]);
    }

    #[test]
    fn fan_out_follows_first_edge_or_rejects() {
        let graph = WorkflowGraph {
            workflow: workflow("wf", "u1"),
            agents: vec![
                agent("A", "wf", "A"),
                agent("B", "wf", "B"),
                agent("C", "wf", "C"),
            ],
            connections: vec![
                Connection::entry("c0", "wf", "A"),
                Connection::link("c1", "wf", "A", "C"),
                Connection::link("c2", "wf", "A", "B"),
            ],
        };
        let plan = GraphResolver::default().resolve(&graph).unwrap();
        assert_eq!(ids(&plan), vec!["A", "C"]);

        let err = GraphResolver::new(AmbiguityPolicy::Reject)
            .resolve(&graph)
            .unwrap_err();
        assert!(err.to_string().contains("ambiguous"));
    }
}
