//! Answer generation with sequential tool calling.
//!
//! Each round sends the conversation to the model. When the model stops to
//! call tools, every `tool_use` block is executed through the
//! [`ToolManager`] and the results are appended as a single user turn.
//! After `max_tool_rounds` tool rounds one last call is made without tools,
//! which forces a text answer.

use anyhow::Result;
use std::sync::Arc;

use crate::anthropic::{
    ChatClient, ContentBlock, Message, MessageRequest, MessageResponse, Role, ToolChoice,
    ToolDefinition,
};
use crate::config::AnthropicConfig;
use crate::tools::ToolManager;

pub const SYSTEM_PROMPT: &str = "You are an AI assistant specialized in course materials and educational content with access to a comprehensive search tool for course information.

Search Tool Usage:
- Use `search_course_content` for questions about specific course content or detailed educational materials
- Use `get_course_outline` for questions about a course's structure: its title, link, instructor and lesson list
- You can make multiple searches if needed to gather comprehensive information
- Synthesize search results into accurate, fact-based responses
- If search yields no results, state this clearly without offering alternatives

Response Protocol:
- **General knowledge questions**: Answer using existing knowledge without searching
- **Course-specific questions**: Search first, then answer (multiple searches allowed if needed)
- **No meta-commentary**:
 - Provide direct answers only: no reasoning process, search explanations, or question-type analysis
 - Do not mention \"based on the search results\"

All responses must be:
1. **Brief, Concise and focused** - Get to the point quickly
2. **Educational** - Maintain instructional value
3. **Clear** - Use accessible language
4. **Example-supported** - Include relevant examples when they aid understanding
Provide only the direct answer to what was asked.";

pub const NO_TOOL_MANAGER: &str = "Unable to process tool requests - tool manager not available";
pub const NO_RESPONSE: &str = "No response generated";

pub struct AiGenerator {
    client: Arc<dyn ChatClient>,
    model: String,
    max_tokens: u32,
    temperature: f32,
    max_tool_rounds: usize,
}

impl AiGenerator {
    pub fn new(client: Arc<dyn ChatClient>, config: &AnthropicConfig) -> Self {
        Self {
            client,
            model: config.model.clone(),
            max_tokens: config.max_tokens,
            temperature: config.temperature,
            max_tool_rounds: config.max_tool_rounds,
        }
    }

    fn request(
        &self,
        system: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> MessageRequest {
        MessageRequest {
            model: self.model.clone(),
            max_tokens: self.max_tokens,
            temperature: self.temperature,
            system: system.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            tool_choice: (!tools.is_empty()).then_some(ToolChoice::Auto),
        }
    }

    pub async fn generate_response(
        &self,
        query: &str,
        conversation_history: Option<&str>,
        tools: &[ToolDefinition],
        tool_manager: Option<&ToolManager>,
    ) -> Result<String> {
        let system = match conversation_history {
            Some(history) if !history.is_empty() => {
                format!("{}\n\nPrevious conversation:\n{}", SYSTEM_PROMPT, history)
            }
            _ => SYSTEM_PROMPT.to_string(),
        };

        let mut messages = vec![Message::user(query)];

        for round in 0..self.max_tool_rounds {
            let response = self
                .client
                .create_message(&self.request(&system, &messages, tools))
                .await?;

            if !response.wants_tools() {
                return Ok(response_text(&response));
            }

            let Some(manager) = tool_manager else {
                return Ok(NO_TOOL_MANAGER.to_string());
            };

            tracing::debug!(round, "model requested tools");
            let results = run_tools(&response, manager).await;
            messages.push(Message::blocks(
                Role::Assistant,
                response
                    .content
                    .into_iter()
                    .filter(|b| !matches!(b, ContentBlock::Unknown))
                    .collect(),
            ));
            messages.push(Message::blocks(Role::User, results));
        }

        // Still asking for tools after the last round: answer without them.
        let response = self
            .client
            .create_message(&self.request(&system, &messages, &[]))
            .await?;
        Ok(response_text(&response))
    }
}

fn response_text(response: &MessageResponse) -> String {
    response
        .text()
        .map(str::to_string)
        .unwrap_or_else(|| NO_RESPONSE.to_string())
}

async fn run_tools(response: &MessageResponse, manager: &ToolManager) -> Vec<ContentBlock> {
    let mut results = Vec::new();
    for block in &response.content {
        let ContentBlock::ToolUse { id, name, input } = block else {
            continue;
        };
        let (content, is_error) = match manager.try_execute_tool(name, input.clone()).await {
            Ok(output) => (output, false),
            Err(e) => {
                tracing::warn!(tool = %name, error = %e, "tool call failed");
                (e.to_string(), true)
            }
        };
        results.push(ContentBlock::ToolResult {
            tool_use_id: id.clone(),
            content,
            is_error,
        });
    }
    results
}
