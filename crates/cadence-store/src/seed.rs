use cadence_core::types::{Agent, Connection, Workflow, WorkflowGraph};

pub const SAMPLE_WORKFLOW_NAME: &str = "Science Research Flow";

/// The two-step sample workflow: a Researcher whose output is checked by an
/// Evaluator, with an entry edge on the Researcher.
///
/// Agent and connection ids are derived from `workflow_id`, so the same
/// call always produces the same graph.
pub fn science_research_graph(workflow_id: &str, owner_id: &str) -> WorkflowGraph {
    let researcher_id = format!("{}:researcher", workflow_id);
    let evaluator_id = format!("{}:evaluator", workflow_id);

    let researcher = Agent {
        id: researcher_id.clone(),
        workflow_id: workflow_id.to_string(),
        name: "Researcher".to_string(),
        role: "Researcher".to_string(),
        model: "gpt-4o".to_string(),
        instructions: "You are a science researcher. Find 1 interesting fact about: {{input}}"
            .to_string(),
        capabilities: vec!["web_search".to_string()],
        output_schema: None,
    };
    let evaluator = Agent {
        id: evaluator_id.clone(),
        workflow_id: workflow_id.to_string(),
        name: "Evaluator".to_string(),
        role: "Evaluator".to_string(),
        model: "gpt-4o".to_string(),
        instructions: "Verify this fact for accuracy: {{input}}".to_string(),
        capabilities: vec!["fact_check".to_string()],
        output_schema: None,
    };

    WorkflowGraph {
        workflow: Workflow {
            id: workflow_id.to_string(),
            owner_id: owner_id.to_string(),
            name: SAMPLE_WORKFLOW_NAME.to_string(),
            active: true,
        },
        agents: vec![researcher, evaluator],
        connections: vec![
            Connection::entry(format!("{}:start", workflow_id), workflow_id, researcher_id.clone()),
            Connection::link(
                format!("{}:verify", workflow_id),
                workflow_id,
                researcher_id,
                evaluator_id,
            ),
        ],
    }
}
