//! Conversion from IR types to Ollama wire format
//!
//! Ollama is only a backend, so there is no inbound direction.

use conduit_ir::{
    ChatParameters, ChatRequest, ChatResponse, ContentPart, FinishReason, Message, RequestMetadata, ResponseMetadata,
    Role, ToolDefinition, Usage, assistant_message,
};

use super::{call_id, inline_image};
use crate::protocol::ollama::{
    OllamaFunction, OllamaFunctionCall, OllamaMessage, OllamaOptions, OllamaRequest, OllamaResponse, OllamaTool,
    OllamaToolCall,
};

impl From<&ChatRequest> for OllamaRequest {
    fn from(req: &ChatRequest) -> Self {
        Self {
            model: req.parameters.model.clone(),
            messages: req.messages.iter().flat_map(|msg| ir_message_to_ollama(req, msg)).collect(),
            stream: req.stream,
            options: options(&req.parameters),
            tools: req.tools.as_ref().map(|tools| tools.iter().map(Into::into).collect()),
        }
    }
}

fn ir_message_to_ollama(req: &ChatRequest, msg: &Message) -> Vec<OllamaMessage> {
    let role = match msg.role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    };

    let mut text = String::new();
    let mut images = Vec::new();
    let mut tool_calls = Vec::new();
    let mut results = Vec::new();

    for part in msg.content.to_parts() {
        match part {
            ContentPart::Text { text: chunk } => text.push_str(&chunk),
            ContentPart::Image { source, mime_type } => match inline_image(&source, mime_type.as_deref()) {
                Some(image) => images.push(image.data),
                None => tracing::debug!("ollama does not fetch remote images, dropping image part"),
            },
            ContentPart::ToolUse { name, input, .. } => tool_calls.push(OllamaToolCall {
                function: OllamaFunctionCall { name, arguments: input },
            }),
            ContentPart::ToolResult {
                tool_use_id, content, ..
            } => results.push(OllamaMessage {
                role: "tool".to_owned(),
                content,
                tool_name: req.tool_name_for(&tool_use_id).map(str::to_owned),
                ..OllamaMessage::default()
            }),
        }
    }

    if !results.is_empty() && text.is_empty() && images.is_empty() {
        return results;
    }

    let mut out = results;
    out.push(OllamaMessage {
        role: role.to_owned(),
        content: text,
        images: (!images.is_empty()).then_some(images),
        tool_calls: (!tool_calls.is_empty()).then_some(tool_calls),
        tool_name: if msg.role == Role::Tool { msg.name.clone() } else { None },
    });
    out
}

fn options(params: &ChatParameters) -> Option<OllamaOptions> {
    let options = OllamaOptions {
        temperature: params.temperature,
        top_p: params.top_p,
        top_k: params.top_k,
        num_predict: params.max_tokens,
        stop: params.stop.clone(),
        seed: params.seed,
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
    };

    let empty = options.temperature.is_none()
        && options.top_p.is_none()
        && options.top_k.is_none()
        && options.num_predict.is_none()
        && options.stop.is_none()
        && options.seed.is_none()
        && options.frequency_penalty.is_none()
        && options.presence_penalty.is_none();

    (!empty).then_some(options)
}

impl From<&ToolDefinition> for OllamaTool {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            tool_type: "function".to_owned(),
            function: OllamaFunction {
                name: tool.name.clone(),
                description: tool.description.clone(),
                parameters: tool.parameters.clone(),
            },
        }
    }
}

/// Tool calls of one Ollama message as IR parts, numbered from `offset`
pub fn tool_calls_to_ir(calls: Vec<OllamaToolCall>, offset: usize) -> Vec<ContentPart> {
    calls
        .into_iter()
        .enumerate()
        .map(|(i, call)| ContentPart::ToolUse {
            id: call_id(offset + i, &call.function.name),
            name: call.function.name,
            input: call.function.arguments,
        })
        .collect()
}

/// Map a buffered Ollama response into IR
pub fn response_to_ir(response: OllamaResponse, request: &RequestMetadata) -> ChatResponse {
    let mut metadata = ResponseMetadata::for_request(request);
    if !response.model.is_empty() {
        metadata.model = Some(response.model);
    }

    let message = response.message.unwrap_or_default();
    let tool_calls = tool_calls_to_ir(message.tool_calls.unwrap_or_default(), 0);

    let finish_reason = if tool_calls.is_empty() {
        response.done_reason.as_deref().map_or(FinishReason::Stop, done_reason)
    } else {
        FinishReason::ToolUse
    };

    ChatResponse {
        message: assistant_message(message.content, tool_calls),
        usage: Usage::new(
            response.prompt_eval_count.unwrap_or(0),
            response.eval_count.unwrap_or(0),
        ),
        finish_reason,
        metadata,
    }
}

/// Map an Ollama `done_reason`
pub fn done_reason(reason: &str) -> FinishReason {
    match reason {
        "length" => FinishReason::Length,
        _ => FinishReason::Stop,
    }
}
