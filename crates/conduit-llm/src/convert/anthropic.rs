//! Conversion between IR types and Anthropic wire format

use conduit_ir::{
    ChatParameters, ChatRequest, ChatResponse, Content, ContentPart, FinishReason, ImageSource, Message,
    RequestMetadata, ResponseMetadata, Role, ToolChoice, ToolDefinition, Usage, assistant_message,
};

use super::{inline_image, simplify_parts, with_leading_system};
use crate::protocol::anthropic::{
    AnthropicContent, AnthropicContentBlock, AnthropicImageSource, AnthropicMessage, AnthropicRequest,
    AnthropicResponse, AnthropicResponseBlock, AnthropicSystem, AnthropicTool, AnthropicToolChoice,
    AnthropicToolResultContent, AnthropicUsage,
};
use crate::error::LlmError;

/// Default max tokens when not specified (Anthropic requires this field)
pub const DEFAULT_MAX_TOKENS: u32 = 4096;

// -- Outbound: IR -> Anthropic wire format --

impl TryFrom<&ChatRequest> for AnthropicRequest {
    type Error = LlmError;

    fn try_from(req: &ChatRequest) -> Result<Self, LlmError> {
        let mut messages: Vec<AnthropicMessage> = Vec::new();

        for msg in req.conversation() {
            let next = ir_message_to_anthropic(msg)?;

            // Anthropic rejects consecutive turns with the same role
            match messages.last_mut() {
                Some(last) if last.role == next.role => merge_content(&mut last.content, next.content),
                _ => messages.push(next),
            }
        }

        let params = &req.parameters;

        Ok(Self {
            model: params.model.clone(),
            max_tokens: params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            system: req.system_prompt().map(AnthropicSystem::Text),
            messages,
            temperature: params.temperature,
            top_p: params.top_p,
            top_k: params.top_k,
            stop_sequences: params.stop.clone(),
            stream: req.stream.then_some(true),
            tools: req.tools.as_ref().map(|tools| tools.iter().map(Into::into).collect()),
            tool_choice: req.tool_choice.as_ref().map(tool_choice_to_anthropic),
        })
    }
}

fn ir_message_to_anthropic(msg: &Message) -> Result<AnthropicMessage, LlmError> {
    let role = match msg.role {
        Role::Assistant => "assistant",
        Role::User | Role::Tool | Role::System => "user",
    };

    let content = match (&msg.content, msg.role) {
        // Plain-text tool output addressed by name
        (Content::Text(text), Role::Tool) => {
            let tool_use_id = msg
                .name
                .clone()
                .filter(|id| !id.is_empty())
                .ok_or_else(|| LlmError::Validation("tool message has no tool_use id".to_owned()))?;
            AnthropicContent::Blocks(vec![AnthropicContentBlock::ToolResult {
                tool_use_id,
                content: Some(AnthropicToolResultContent::Text(text.clone())),
                is_error: None,
            }])
        }
        (Content::Text(text), _) => AnthropicContent::Text(text.clone()),
        (Content::Parts(parts), _) => {
            let anonymous = parts
                .iter()
                .any(|part| matches!(part, ContentPart::ToolResult { tool_use_id, .. } if tool_use_id.is_empty()));
            if anonymous {
                return Err(LlmError::Validation("tool result has no tool_use id".to_owned()));
            }
            AnthropicContent::Blocks(parts.iter().map(ir_part_to_anthropic).collect())
        }
    };

    Ok(AnthropicMessage {
        role: role.to_owned(),
        content,
    })
}

fn ir_part_to_anthropic(part: &ContentPart) -> AnthropicContentBlock {
    match part {
        ContentPart::Text { text } => AnthropicContentBlock::Text { text: text.clone() },
        ContentPart::Image { source, mime_type } => {
            let source = match inline_image(source, mime_type.as_deref()) {
                Some(image) => AnthropicImageSource::Base64 {
                    media_type: image.mime_type,
                    data: image.data,
                },
                None => AnthropicImageSource::Url {
                    url: match source {
                        ImageSource::Url { url } => url.clone(),
                        _ => String::new(),
                    },
                },
            };
            AnthropicContentBlock::Image { source }
        }
        ContentPart::ToolUse { id, name, input } => AnthropicContentBlock::ToolUse {
            id: id.clone(),
            name: name.clone(),
            input: input.clone(),
        },
        ContentPart::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => AnthropicContentBlock::ToolResult {
            tool_use_id: tool_use_id.clone(),
            content: Some(AnthropicToolResultContent::Text(content.clone())),
            is_error: is_error.then_some(true),
        },
    }
}

fn merge_content(into: &mut AnthropicContent, next: AnthropicContent) {
    let into_blocks = |content: AnthropicContent| match content {
        AnthropicContent::Text(text) => vec![AnthropicContentBlock::Text { text }],
        AnthropicContent::Blocks(blocks) => blocks,
    };

    let mut blocks = into_blocks(std::mem::replace(into, AnthropicContent::Blocks(Vec::new())));
    blocks.extend(into_blocks(next));
    *into = AnthropicContent::Blocks(blocks);
}

impl From<&ToolDefinition> for AnthropicTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            input_schema: tool.parameters.clone(),
        }
    }
}

fn tool_choice_to_anthropic(choice: &ToolChoice) -> AnthropicToolChoice {
    let (choice_type, name) = match choice {
        ToolChoice::Auto => ("auto", None),
        ToolChoice::None => ("none", None),
        ToolChoice::Required => ("any", None),
        ToolChoice::Tool { name } => ("tool", Some(name.clone())),
    };

    AnthropicToolChoice {
        choice_type: choice_type.to_owned(),
        name,
    }
}

/// Map a buffered Anthropic response into IR
pub fn response_to_ir(response: AnthropicResponse, request: &RequestMetadata) -> ChatResponse {
    let mut metadata = ResponseMetadata::for_request(request);
    if !response.model.is_empty() {
        metadata.model = Some(response.model);
    }

    let mut text = String::new();
    let mut tool_calls = Vec::new();

    for block in response.content {
        match block {
            AnthropicResponseBlock::Text { text: chunk } => text.push_str(&chunk),
            AnthropicResponseBlock::ToolUse { id, name, input } => {
                tool_calls.push(ContentPart::ToolUse { id, name, input });
            }
            AnthropicResponseBlock::Unsupported => {}
        }
    }

    ChatResponse {
        message: assistant_message(text, tool_calls),
        usage: Usage::new(response.usage.input_tokens, response.usage.output_tokens),
        finish_reason: response.stop_reason.as_deref().map_or(FinishReason::Stop, stop_reason),
        metadata,
    }
}

/// Map an Anthropic stop reason
pub fn stop_reason(reason: &str) -> FinishReason {
    match reason {
        "max_tokens" => FinishReason::Length,
        "tool_use" => FinishReason::ToolUse,
        "refusal" => FinishReason::ContentFilter,
        // end_turn, stop_sequence, pause_turn
        _ => FinishReason::Stop,
    }
}

// -- Inbound: Anthropic wire format -> IR --

impl From<AnthropicRequest> for ChatRequest {
    fn from(req: AnthropicRequest) -> Self {
        let system: Vec<String> = req.system.map(AnthropicSystem::into_text).into_iter().collect();
        let conversation = req.messages.into_iter().map(anthropic_message_to_ir).collect();

        let mut request = Self::new(String::new(), with_leading_system(&system, conversation));
        request.parameters = ChatParameters {
            model: req.model,
            temperature: req.temperature,
            max_tokens: Some(req.max_tokens),
            top_p: req.top_p,
            top_k: req.top_k,
            stop: req.stop_sequences,
            ..ChatParameters::default()
        };
        request.stream = req.stream.unwrap_or(false);
        request.tools = req.tools.map(|tools| {
            tools
                .into_iter()
                .map(|tool| ToolDefinition {
                    name: tool.name,
                    description: tool.description,
                    parameters: tool.input_schema,
                })
                .collect()
        });
        request.tool_choice = req.tool_choice.map(tool_choice_to_ir);
        request
    }
}

fn anthropic_message_to_ir(msg: AnthropicMessage) -> Message {
    let role = match msg.role.as_str() {
        "assistant" => Role::Assistant,
        _ => Role::User,
    };

    let content = match msg.content {
        AnthropicContent::Text(text) => Content::Text(text),
        AnthropicContent::Blocks(blocks) => simplify_parts(blocks.into_iter().map(anthropic_block_to_ir).collect()),
    };

    Message {
        role,
        content,
        name: None,
    }
}

fn anthropic_block_to_ir(block: AnthropicContentBlock) -> ContentPart {
    match block {
        AnthropicContentBlock::Text { text } => ContentPart::Text { text },
        AnthropicContentBlock::Image { source } => match source {
            AnthropicImageSource::Base64 { media_type, data } => ContentPart::Image {
                source: ImageSource::Base64 { data },
                mime_type: Some(media_type),
            },
            AnthropicImageSource::Url { url } => ContentPart::Image {
                source: ImageSource::Url { url },
                mime_type: None,
            },
        },
        AnthropicContentBlock::ToolUse { id, name, input } => ContentPart::ToolUse { id, name, input },
        AnthropicContentBlock::ToolResult {
            tool_use_id,
            content,
            is_error,
        } => ContentPart::ToolResult {
            tool_use_id,
            content: content.map(AnthropicToolResultContent::into_text).unwrap_or_default(),
            is_error: is_error.unwrap_or(false),
        },
    }
}

fn tool_choice_to_ir(choice: AnthropicToolChoice) -> ToolChoice {
    match choice.choice_type.as_str() {
        "any" => ToolChoice::Required,
        "none" => ToolChoice::None,
        "tool" => choice.name.map_or(ToolChoice::Auto, |name| ToolChoice::Tool { name }),
        _ => ToolChoice::Auto,
    }
}

/// Render an IR response as an Anthropic message
pub fn response_from_ir(response: &ChatResponse, id: String) -> AnthropicResponse {
    let text = response.text();
    let tool_calls = response.tool_calls();

    let mut content = Vec::with_capacity(tool_calls.len() + 1);
    if !text.is_empty() || tool_calls.is_empty() {
        content.push(AnthropicResponseBlock::Text { text });
    }
    content.extend(tool_calls.into_iter().map(|(id, name, input)| AnthropicResponseBlock::ToolUse {
        id: id.to_owned(),
        name: name.to_owned(),
        input: input.clone(),
    }));

    AnthropicResponse {
        id,
        response_type: "message".to_owned(),
        role: "assistant".to_owned(),
        content,
        model: response.metadata.model.clone().unwrap_or_default(),
        stop_reason: Some(stop_reason_str(response.finish_reason).to_owned()),
        stop_sequence: None,
        usage: AnthropicUsage {
            input_tokens: response.usage.prompt_tokens,
            output_tokens: response.usage.completion_tokens,
        },
    }
}

/// Anthropic spelling of a finish reason
pub const fn stop_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop => "end_turn",
        FinishReason::Length => "max_tokens",
        FinishReason::ToolUse => "tool_use",
        FinishReason::ContentFilter => "refusal",
    }
}
