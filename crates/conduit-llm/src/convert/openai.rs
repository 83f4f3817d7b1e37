//! Conversion between IR types and `OpenAI` wire format

use conduit_ir::{
    ChatParameters, ChatRequest, ChatResponse, Content, ContentPart, FinishReason, Message, RequestMetadata,
    ResponseMetadata, Role, ToolChoice, ToolDefinition, Usage, assistant_message, parse_arguments,
};

use super::{arguments_string, image_part_from_url, image_url, simplify_parts, with_leading_system};
use crate::protocol::openai::{
    OpenAiChoice, OpenAiChoiceMessage, OpenAiContent, OpenAiContentPart, OpenAiFunction, OpenAiFunctionCall,
    OpenAiImageUrl, OpenAiMessage, OpenAiRequest, OpenAiResponse, OpenAiStop, OpenAiTool, OpenAiToolCall, OpenAiUsage,
    function_type,
};

// -- Outbound: IR -> OpenAI wire format --

impl From<&ChatRequest> for OpenAiRequest {
    fn from(req: &ChatRequest) -> Self {
        let messages = req.messages.iter().flat_map(ir_message_to_openai).collect();
        let params = &req.parameters;

        Self {
            model: params.model.clone(),
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            max_tokens: params.max_tokens,
            max_completion_tokens: None,
            stop: params.stop.clone().map(OpenAiStop::Many),
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            seed: params.seed,
            stream: req.stream.then_some(true),
            tools: req.tools.as_ref().map(|tools| tools.iter().map(Into::into).collect()),
            tool_choice: req.tool_choice.as_ref().map(tool_choice_to_openai),
            stream_options: None,
        }
    }
}

/// One IR message can expand into several `OpenAI` messages since each tool
/// result needs its own `tool` message
fn ir_message_to_openai(msg: &Message) -> Vec<OpenAiMessage> {
    let plain = |role: &str, content: Option<OpenAiContent>| OpenAiMessage {
        role: role.to_owned(),
        content,
        name: msg.name.clone(),
        tool_calls: None,
        tool_call_id: None,
    };

    match msg.role {
        Role::System => vec![plain("system", Some(OpenAiContent::Text(msg.content.as_text())))],
        Role::Assistant => {
            let tool_calls: Vec<OpenAiToolCall> = msg
                .content
                .tool_uses()
                .map(|(id, name, input)| OpenAiToolCall {
                    id: id.to_owned(),
                    tool_type: function_type(),
                    function: OpenAiFunctionCall {
                        name: name.to_owned(),
                        arguments: arguments_string(input),
                    },
                })
                .collect();
            let text = msg.content.as_text();

            if tool_calls.is_empty() {
                return vec![plain("assistant", Some(OpenAiContent::Text(text)))];
            }

            vec![OpenAiMessage {
                tool_calls: Some(tool_calls),
                ..plain("assistant", (!text.is_empty()).then_some(OpenAiContent::Text(text)))
            }]
        }
        Role::User | Role::Tool => {
            let mut out = Vec::new();
            let mut parts = Vec::new();

            for part in msg.content.to_parts() {
                match part {
                    ContentPart::Text { text } => parts.push(OpenAiContentPart::Text { text }),
                    ContentPart::Image { source, mime_type } => parts.push(OpenAiContentPart::ImageUrl {
                        image_url: OpenAiImageUrl {
                            url: image_url(&source, mime_type.as_deref()),
                            detail: None,
                        },
                    }),
                    ContentPart::ToolResult {
                        tool_use_id, content, ..
                    } => out.push(OpenAiMessage {
                        tool_call_id: Some(tool_use_id),
                        ..plain("tool", Some(OpenAiContent::Text(content)))
                    }),
                    ContentPart::ToolUse { .. } => {}
                }
            }

            if msg.role == Role::Tool && !parts.is_empty() {
                // Plain-text tool output addressed by name
                out.push(OpenAiMessage {
                    tool_call_id: msg.name.clone(),
                    ..plain("tool", Some(OpenAiContent::Text(msg.content.as_text())))
                });
            } else if !parts.is_empty() {
                let content = match &msg.content {
                    Content::Text(text) => OpenAiContent::Text(text.clone()),
                    Content::Parts(_) => OpenAiContent::Parts(parts),
                };
                out.push(plain("user", Some(content)));
            } else if out.is_empty() {
                out.push(plain("user", Some(OpenAiContent::Text(String::new()))));
            }

            out
        }
    }
}

impl From<&ToolDefinition> for OpenAiTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: function_type(),
            function: OpenAiFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: Some(tool.parameters.clone()),
            },
        }
    }
}

fn tool_choice_to_openai(choice: &ToolChoice) -> serde_json::Value {
    match choice {
        ToolChoice::Auto => "auto".into(),
        ToolChoice::None => "none".into(),
        ToolChoice::Required => "required".into(),
        ToolChoice::Tool { name } => serde_json::json!({"type": "function", "function": {"name": name}}),
    }
}

/// Map a buffered `OpenAI` response into IR
pub fn response_to_ir(response: OpenAiResponse, request: &RequestMetadata) -> ChatResponse {
    let mut metadata = ResponseMetadata::for_request(request);
    if !response.model.is_empty() {
        metadata.model = Some(response.model);
    }

    let (message, finish_reason) = match response.choices.into_iter().next() {
        Some(choice) => {
            let tool_calls = choice
                .message
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ContentPart::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    input: parse_arguments(&call.function.arguments),
                })
                .collect();
            let reason = choice.finish_reason.as_deref().map_or(FinishReason::Stop, finish_reason);
            (
                assistant_message(choice.message.content.unwrap_or_default(), tool_calls),
                reason,
            )
        }
        None => (Message::assistant(String::new()), FinishReason::Stop),
    };

    ChatResponse {
        message,
        usage: response
            .usage
            .map(|u| Usage::new(u.prompt_tokens, u.completion_tokens))
            .unwrap_or_default(),
        finish_reason,
        metadata,
    }
}

/// Map an `OpenAI` finish reason string
pub fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        "tool_calls" | "function_call" => FinishReason::ToolUse,
        "content_filter" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

// -- Inbound: OpenAI wire format -> IR --

impl From<OpenAiRequest> for ChatRequest {
    fn from(req: OpenAiRequest) -> Self {
        let mut system = Vec::new();
        let mut conversation = Vec::new();

        for msg in req.messages {
            match msg.role.as_str() {
                "system" | "developer" => system.push(msg.content.map(openai_content_text).unwrap_or_default()),
                _ => conversation.push(openai_message_to_ir(msg)),
            }
        }

        let mut request = Self::new(String::new(), with_leading_system(&system, conversation));
        request.parameters = ChatParameters {
            model: req.model,
            temperature: req.temperature,
            max_tokens: req.max_completion_tokens.or(req.max_tokens),
            top_p: req.top_p,
            top_k: None,
            stop: req.stop.map(OpenAiStop::into_vec),
            frequency_penalty: req.frequency_penalty,
            presence_penalty: req.presence_penalty,
            seed: req.seed,
        };
        request.stream = req.stream.unwrap_or(false);
        request.tools = req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| ToolDefinition {
                    name: tool.function.name,
                    description: tool.function.description,
                    parameters: tool
                        .function
                        .parameters
                        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                })
                .collect()
        });
        request.tool_choice = req.tool_choice.as_ref().and_then(tool_choice_to_ir);
        request
    }
}

fn openai_content_text(content: OpenAiContent) -> String {
    match content {
        OpenAiContent::Text(text) => text,
        OpenAiContent::Parts(parts) => parts
            .into_iter()
            .filter_map(|part| match part {
                OpenAiContentPart::Text { text } => Some(text),
                OpenAiContentPart::ImageUrl { .. } => None,
            })
            .collect(),
    }
}

fn openai_message_to_ir(msg: OpenAiMessage) -> Message {
    match msg.role.as_str() {
        "assistant" => {
            let text = msg.content.map(openai_content_text).unwrap_or_default();
            let tool_calls = msg
                .tool_calls
                .unwrap_or_default()
                .into_iter()
                .map(|call| ContentPart::ToolUse {
                    id: call.id,
                    name: call.function.name,
                    input: parse_arguments(&call.function.arguments),
                })
                .collect();
            Message {
                name: msg.name,
                ..assistant_message(text, tool_calls)
            }
        }
        "tool" => Message::parts(
            Role::Tool,
            vec![ContentPart::ToolResult {
                tool_use_id: msg.tool_call_id.unwrap_or_default(),
                content: msg.content.map(openai_content_text).unwrap_or_default(),
                is_error: false,
            }],
        ),
        _ => {
            let content = match msg.content {
                Some(OpenAiContent::Text(text)) => Content::Text(text),
                Some(OpenAiContent::Parts(parts)) => simplify_parts(
                    parts
                        .into_iter()
                        .map(|part| match part {
                            OpenAiContentPart::Text { text } => ContentPart::Text { text },
                            OpenAiContentPart::ImageUrl { image_url } => image_part_from_url(image_url.url),
                        })
                        .collect(),
                ),
                None => Content::Text(String::new()),
            };
            Message {
                role: Role::User,
                content,
                name: msg.name,
            }
        }
    }
}

fn tool_choice_to_ir(choice: &serde_json::Value) -> Option<ToolChoice> {
    match choice {
        serde_json::Value::String(mode) => match mode.as_str() {
            "none" => Some(ToolChoice::None),
            "required" => Some(ToolChoice::Required),
            _ => Some(ToolChoice::Auto),
        },
        serde_json::Value::Object(object) => object
            .get("function")
            .and_then(|function| function.get("name"))
            .and_then(serde_json::Value::as_str)
            .map(|name| ToolChoice::Tool { name: name.to_owned() }),
        _ => None,
    }
}

/// Render an IR response as an `OpenAI` chat completion
pub fn response_from_ir(response: &ChatResponse, id: String) -> OpenAiResponse {
    let tool_calls: Vec<OpenAiToolCall> = response
        .tool_calls()
        .into_iter()
        .map(|(id, name, input)| OpenAiToolCall {
            id: id.to_owned(),
            tool_type: function_type(),
            function: OpenAiFunctionCall {
                name: name.to_owned(),
                arguments: arguments_string(input),
            },
        })
        .collect();
    let text = response.text();

    OpenAiResponse {
        id,
        object: "chat.completion".to_owned(),
        created: response.metadata.timestamp / 1000,
        model: response.metadata.model.clone().unwrap_or_default(),
        choices: vec![OpenAiChoice {
            index: 0,
            message: OpenAiChoiceMessage {
                role: "assistant".to_owned(),
                content: (!text.is_empty() || tool_calls.is_empty()).then_some(text),
                tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
            },
            finish_reason: Some(finish_reason_str(response.finish_reason).to_owned()),
        }],
        usage: Some(OpenAiUsage {
            prompt_tokens: response.usage.prompt_tokens,
            completion_tokens: response.usage.completion_tokens,
            total_tokens: response.usage.total_tokens,
        }),
    }
}

/// `OpenAI` spelling of a finish reason
pub const fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "stop",
        FinishReason::Length => "length",
        FinishReason::ToolUse => "tool_calls",
        FinishReason::ContentFilter => "content_filter",
    }
}
