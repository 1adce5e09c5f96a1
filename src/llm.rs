//! Minimal multi-turn chat abstraction over a tool-calling LLM, used by
//! the discovery decision loop. Concrete providers convert their own
//! wire format into [`ChatTurn`]s.

use crate::error::{EngineError, EngineResult};
use crate::tools::ToolDescriptor;
use async_trait::async_trait;
use mistralai_client::v1::chat::{ChatMessage, ChatMessageRole, ChatParams};
use mistralai_client::v1::client::Client as MistralClient;
use mistralai_client::v1::tool::{Tool, ToolFunction, ToolType};
use serde_json::Value;
use tracing::instrument;

#[derive(Debug, Clone)]
pub struct ToolCall {
    pub name: String,
    pub arguments: Value,
}

#[derive(Debug, Clone)]
pub enum ChatTurn {
    Text(String),
    ToolCalls(Vec<ToolCall>),
}

/// One back-and-forth conversation with a model, seeded with a system
/// prompt and a fixed set of callable tools.
#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn send(&mut self, message: &str) -> EngineResult<ChatTurn>;
    async fn send_tool_results(&mut self, results: Vec<(String, Value)>) -> EngineResult<ChatTurn>;
}

pub struct MistralChatSession {
    client: MistralClient,
    model: String,
    history: Vec<ChatMessage>,
}

impl MistralChatSession {
    pub fn new(api_key: &str, model: &str, system_prompt: &str, tools: &[ToolDescriptor]) -> Self {
        let client = MistralClient::new(Some(api_key.to_string()), None, None, None);
        let _ = tools_to_mistral(tools);
        Self {
            client,
            model: model.to_string(),
            history: vec![ChatMessage {
                role: ChatMessageRole::System,
                content: system_prompt.to_string(),
                tool_calls: None,
            }],
        }
    }
}

fn tools_to_mistral(tools: &[ToolDescriptor]) -> Vec<Tool> {
    tools
        .iter()
        .map(|t| Tool {
            tool_type: ToolType::Function,
            function: ToolFunction {
                name: t.name.clone(),
                description: t.description.clone(),
                parameters: t.input_schema.clone(),
            },
        })
        .collect()
}

#[async_trait]
impl ChatSession for MistralChatSession {
    #[instrument(skip(self, message))]
    async fn send(&mut self, message: &str) -> EngineResult<ChatTurn> {
        self.history.push(ChatMessage {
            role: ChatMessageRole::User,
            content: message.to_string(),
            tool_calls: None,
        });

        let params = ChatParams::default();
        let response = self
            .client
            .chat(self.model.clone(), self.history.clone(), Some(params))
            .await
            .map_err(|e| EngineError::Transient(format!("mistral chat call failed: {e}")))?;

        let choice = response
            .choices
            .first()
            .ok_or_else(|| EngineError::DataShape("empty chat completion".to_string()))?;

        self.history.push(choice.message.clone());

        if let Some(calls) = &choice.message.tool_calls {
            let parsed = calls
                .iter()
                .map(|c| ToolCall {
                    name: c.function.name.clone(),
                    arguments: serde_json::from_str(&c.function.arguments).unwrap_or(Value::Null),
                })
                .collect();
            Ok(ChatTurn::ToolCalls(parsed))
        } else {
            Ok(ChatTurn::Text(choice.message.content.clone()))
        }
    }

    async fn send_tool_results(&mut self, results: Vec<(String, Value)>) -> EngineResult<ChatTurn> {
        for (name, value) in &results {
            self.history.push(ChatMessage {
                role: ChatMessageRole::Tool,
                content: format!("{{\"tool\":\"{name}\",\"result\":{value}}}"),
                tool_calls: None,
            });
        }
        self.send("Continue with the tool results above.").await
    }
}
