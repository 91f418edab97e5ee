use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use cadence_core::config::CapabilityConfig;
use cadence_core::error::{CadenceError, Result};
use cadence_core::traits::AgentCapability;
use cadence_core::types::AgentInvocation;

use crate::tools::{ToolDefinition, ToolRegistry};

const OPENAI_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Placeholder in agent instructions replaced by the chained input.
pub const INPUT_PLACEHOLDER: &str = "{{input}}";

/// Agent capability backed by an OpenAI-compatible chat-completions
/// endpoint. Works with OpenAI, Ollama, vLLM, Groq, OpenRouter, etc.
///
/// One non-streaming request per invocation: the agent's instructions
/// (with `{{input}}` filled in) as the system message, the input as the
/// user message.
pub struct OpenAiCapability {
    http: Client,
    config: CapabilityConfig,
    tools: ToolRegistry,
}

impl OpenAiCapability {
    pub fn new(config: CapabilityConfig) -> Result<Self> {
        let mut builder = Client::builder();
        if config.timeout_secs > 0 {
            builder = builder.timeout(Duration::from_secs(config.timeout_secs));
        }
        let http = builder
            .build()
            .map_err(|e| CadenceError::Config(format!("HTTP client: {}", e)))?;
        Ok(Self {
            http,
            config,
            tools: ToolRegistry::new(),
        })
    }
}

// Request types
#[derive(Serialize, Debug)]
struct ChatRequest {
    model: String,
    messages: Vec<OaiMessage>,
    max_tokens: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<OaiTool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    response_format: Option<serde_json::Value>,
}

#[derive(Serialize, Debug)]
struct OaiMessage {
    role: &'static str,
    content: String,
}

#[derive(Serialize, Debug)]
struct OaiTool {
    r#type: &'static str,
    function: ToolDefinition,
}

// Response types
#[derive(Deserialize, Debug)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize, Debug)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Deserialize, Debug)]
struct ResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Option<Vec<ResponseToolCall>>,
}

#[derive(Deserialize, Debug)]
struct ResponseToolCall {
    function: ResponseFunction,
}

#[derive(Deserialize, Debug)]
struct ResponseFunction {
    #[serde(default)]
    arguments: String,
}

/// Fill `{{input}}` in the agent's instructions.
pub fn render_instructions(instructions: &str, input: &str) -> String {
    instructions.replace(INPUT_PLACEHOLDER, input)
}

fn build_request(
    config: &CapabilityConfig,
    tools: &ToolRegistry,
    invocation: &AgentInvocation,
) -> ChatRequest {
    let agent = &invocation.agent;
    let model = if agent.model.trim().is_empty() {
        config.default_model.clone()
    } else {
        agent.model.clone()
    };

    let mut messages = Vec::with_capacity(2);
    let system = render_instructions(&agent.instructions, &invocation.input);
    if !system.trim().is_empty() {
        messages.push(OaiMessage {
            role: "system",
            content: system,
        });
    }
    messages.push(OaiMessage {
        role: "user",
        content: invocation.input.clone(),
    });

    let tools = tools
        .resolve(&agent.name, &agent.capabilities)
        .into_iter()
        .map(|function| OaiTool {
            r#type: "function",
            function,
        })
        .collect();

    // A declared output shape asks for a JSON object back.
    let response_format = agent
        .output_schema
        .as_ref()
        .map(|_| serde_json::json!({ "type": "json_object" }));

    ChatRequest {
        model,
        messages,
        max_tokens: config.max_tokens,
        temperature: (config.temperature > 0.0).then_some(config.temperature),
        tools,
        response_format,
    }
}

/// Text content if present, otherwise the arguments of the first tool call.
fn extract_output(agent: &str, response: ChatResponse) -> Result<String> {
    let choice = response
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| CadenceError::capability(agent, "malformed response: no choices"))?;

    match choice.message.content {
        Some(text) if !text.trim().is_empty() => Ok(text),
        _ => choice
            .message
            .tool_calls
            .into_iter()
            .flatten()
            .next()
            .map(|call| call.function.arguments)
            .ok_or_else(|| CadenceError::capability(agent, "malformed response: empty message")),
    }
}

impl AgentCapability for OpenAiCapability {
    fn invoke(&self, invocation: AgentInvocation) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let agent_name = invocation.agent.name.clone();
            let url = self.config.base_url.as_deref().unwrap_or(OPENAI_API_URL);
            let body = build_request(&self.config, &self.tools, &invocation);

            debug!(
                agent = %agent_name,
                model = %body.model,
                tools = body.tools.len(),
                "Invoking agent"
            );

            let mut req = self.http.post(url).json(&body);
            if let Some(ref key) = self.config.api_key {
                req = req.header("Authorization", format!("Bearer {}", key));
            }

            let response = req
                .send()
                .await
                .map_err(|e| CadenceError::capability(&agent_name, format!("request failed: {}", e)))?;

            let status = response.status();
            if !status.is_success() {
                let text = response.text().await.unwrap_or_default();
                warn!(agent = %agent_name, status = %status, "Agent request rejected");
                return Err(CadenceError::capability(
                    &agent_name,
                    format!("HTTP {}: {}", status.as_u16(), text),
                ));
            }

            let parsed: ChatResponse = response.json().await.map_err(|e| {
                CadenceError::capability(&agent_name, format!("malformed response: {}", e))
            })?;

            extract_output(&agent_name, parsed)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadence_core::types::Agent;

    fn invocation(model: &str, capabilities: &[&str]) -> AgentInvocation {
        AgentInvocation {
            workflow_id: "wf".into(),
            agent: Agent {
                id: "a1".into(),
                workflow_id: "wf".into(),
                name: "Researcher".into(),
                role: "Researcher".into(),
                model: model.into(),
                instructions: "Find 1 interesting fact about: {{input}}".into(),
                capabilities: capabilities.iter().map(|s| s.to_string()).collect(),
                output_schema: None,
            },
            input: "Black holes".into(),
        }
    }

    #[test]
    fn request_fills_placeholder_and_keeps_input_as_user_message() {
        let req = build_request(
            &CapabilityConfig::default(),
            &ToolRegistry::new(),
            &invocation("gpt-4o-mini", &["web_search", "nope"]),
        );
        assert_eq!(req.model, "gpt-4o-mini");
        assert_eq!(req.messages[0].role, "system");
        assert_eq!(req.messages[0].content, "Find 1 interesting fact about: Black holes");
        assert_eq!(req.messages[1].content, "Black holes");
        assert_eq!(req.tools.len(), 1);

        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["tools"][0]["function"]["name"], "web_search");
        assert!(json.get("temperature").is_none());
        assert!(json.get("response_format").is_none());
    }

    #[test]
    fn empty_model_falls_back_to_default() {
        let req = build_request(
            &CapabilityConfig::default(),
            &ToolRegistry::new(),
            &invocation("", &[]),
        );
        assert_eq!(req.model, "gpt-4o");
        assert!(serde_json::to_value(&req).unwrap().get("tools").is_none());
    }

    #[test]
    fn output_prefers_text_then_tool_arguments() {
        let text: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"Black holes evaporate."}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_output("R", text).unwrap(), "Black holes evaporate.");

        let tool: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":null,"tool_calls":[{"id":"c1","type":"function","function":{"name":"submit_scene_plan","arguments":"{\"scenes\":[]}"}}]}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_output("R", tool).unwrap(), "{\"scenes\":[]}");
    }

    #[test]
    fn null_tool_calls_accepted() {
        let text: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"Comets are icy.","tool_calls":null}}]}"#,
        )
        .unwrap();
        assert_eq!(extract_output("R", text).unwrap(), "Comets are icy.");

        let empty: ChatResponse = serde_json::from_str(
            r#"{"choices":[{"message":{"content":"","tool_calls":null}}]}"#,
        )
        .unwrap();
        assert!(matches!(
            extract_output("R", empty).unwrap_err(),
            CadenceError::Capability { .. }
        ));
    }

    #[test]
    fn empty_choices_is_a_capability_error() {
        let empty: ChatResponse = serde_json::from_str(r#"{"choices":[]}"#).unwrap();
        let err = extract_output("Researcher", empty).unwrap_err();
        assert!(matches!(err, CadenceError::Capability { .. }));
    }
}
