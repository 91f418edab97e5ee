use serde::Serialize;
use serde_json::json;
use tracing::error;

/// A tool an agent may be given, as advertised to the model.
#[derive(Debug, Clone, Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Known capability (tool) ids.
#[derive(Debug, Clone)]
pub struct ToolRegistry {
    tools: Vec<ToolDefinition>,
}

fn query_tool(name: &str, description: &str) -> ToolDefinition {
    ToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        parameters: json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" }
            },
            "required": ["query"]
        }),
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self {
            tools: vec![
                query_tool("web_search", "Search the web for current information."),
                query_tool(
                    "science_news_search",
                    "Search recent science news articles.",
                ),
                query_tool("fact_check", "Check a factual claim against reliable sources."),
                ToolDefinition {
                    name: "submit_scene_plan".to_string(),
                    description: "Submit the final scene-by-scene plan.".to_string(),
                    parameters: json!({
                        "type": "object",
                        "properties": {
                            "title": { "type": "string" },
                            "scenes": {
                                "type": "array",
                                "items": {
                                    "type": "object",
                                    "properties": {
                                        "narration": { "type": "string" },
                                        "visual": { "type": "string" }
                                    }
                                }
                            }
                        },
                        "required": ["scenes"]
                    }),
                },
            ],
        }
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: &str) -> Option<&ToolDefinition> {
        self.tools.iter().find(|t| t.name == id)
    }

    pub fn ids(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    /// Definitions for the given ids. Unknown ids are logged and skipped.
    pub fn resolve(&self, agent: &str, ids: &[String]) -> Vec<ToolDefinition> {
        ids.iter()
            .filter_map(|id| match self.get(id) {
                Some(tool) => Some(tool.clone()),
                None => {
                    error!(agent = %agent, tool = %id, "Unknown tool id, skipping");
                    None
                }
            })
            .collect()
    }
}
