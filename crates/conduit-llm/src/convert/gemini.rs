//! Conversion between IR types and Gemini wire format

use conduit_ir::{
    ChatParameters, ChatRequest, ChatResponse, ContentPart, FinishReason, ImageSource, Message, RequestMetadata,
    ResponseMetadata, Role, ToolChoice, ToolDefinition, Usage, assistant_message,
};

use super::{call_id, inline_image, simplify_parts, with_leading_system};
use crate::protocol::gemini::{
    GeminiCandidate, GeminiChatRequest, GeminiContent, GeminiFileData, GeminiFunctionCall, GeminiFunctionCallingConfig,
    GeminiFunctionDeclaration, GeminiFunctionResponse, GeminiGenerationConfig, GeminiInlineData, GeminiPart,
    GeminiRequest, GeminiResponse, GeminiTool, GeminiToolConfig, GeminiUsageMetadata,
};

// -- Outbound: IR -> Gemini wire format --

impl From<&ChatRequest> for GeminiRequest {
    fn from(req: &ChatRequest) -> Self {
        let mut contents: Vec<GeminiContent> = Vec::new();

        for msg in req.conversation() {
            let role = if msg.role == Role::Assistant { "model" } else { "user" };
            let parts = ir_message_parts(req, msg);

            match contents.last_mut() {
                Some(last) if last.role.as_deref() == Some(role) => last.parts.extend(parts),
                _ => contents.push(GeminiContent {
                    role: Some(role.to_owned()),
                    parts,
                }),
            }
        }

        let system_instruction = req.system_prompt().map(|text| GeminiContent {
            role: None,
            parts: vec![GeminiPart::text(text)],
        });

        Self {
            contents,
            system_instruction,
            generation_config: generation_config(&req.parameters),
            tools: req.tools.as_ref().map(|tools| {
                vec![GeminiTool {
                    function_declarations: tools.iter().map(Into::into).collect(),
                }]
            }),
            tool_config: req.tool_choice.as_ref().map(tool_choice_to_gemini),
        }
    }
}

fn ir_message_parts(req: &ChatRequest, msg: &Message) -> Vec<GeminiPart> {
    if msg.role == Role::Tool
        && let conduit_ir::Content::Text(text) = &msg.content
    {
        // Plain-text tool output addressed by name
        return vec![GeminiPart {
            function_response: Some(GeminiFunctionResponse {
                name: msg.name.clone().unwrap_or_default(),
                response: tool_response_value(text),
            }),
            ..GeminiPart::default()
        }];
    }

    msg.content
        .to_parts()
        .into_iter()
        .map(|part| match part {
            ContentPart::Text { text } => GeminiPart::text(text),
            ContentPart::Image { source, mime_type } => match inline_image(&source, mime_type.as_deref()) {
                Some(image) => GeminiPart {
                    inline_data: Some(GeminiInlineData {
                        mime_type: image.mime_type,
                        data: image.data,
                    }),
                    ..GeminiPart::default()
                },
                None => GeminiPart {
                    file_data: Some(GeminiFileData {
                        mime_type,
                        file_uri: match source {
                            ImageSource::Url { url } => url,
                            _ => String::new(),
                        },
                    }),
                    ..GeminiPart::default()
                },
            },
            ContentPart::ToolUse { name, input, .. } => GeminiPart {
                function_call: Some(GeminiFunctionCall { name, args: input }),
                ..GeminiPart::default()
            },
            ContentPart::ToolResult {
                tool_use_id, content, ..
            } => GeminiPart {
                function_response: Some(GeminiFunctionResponse {
                    // Gemini matches results to calls by function name
                    name: req.tool_name_for(&tool_use_id).unwrap_or(&tool_use_id).to_owned(),
                    response: tool_response_value(&content),
                }),
                ..GeminiPart::default()
            },
        })
        .collect()
}

/// Gemini wants tool output as a JSON object
fn tool_response_value(content: &str) -> serde_json::Value {
    match serde_json::from_str::<serde_json::Value>(content) {
        Ok(object @ serde_json::Value::Object(_)) => object,
        Ok(other) => serde_json::json!({ "content": other }),
        Err(_) => serde_json::json!({ "content": content }),
    }
}

/// Inverse of [`tool_response_value`]
fn tool_response_text(response: &serde_json::Value) -> String {
    if let serde_json::Value::Object(object) = response
        && object.len() == 1
        && let Some(serde_json::Value::String(text)) = object.get("content")
    {
        return text.clone();
    }
    response.to_string()
}

fn generation_config(params: &ChatParameters) -> Option<GeminiGenerationConfig> {
    let config = GeminiGenerationConfig {
        temperature: params.temperature,
        top_p: params.top_p,
        top_k: params.top_k,
        max_output_tokens: params.max_tokens,
        stop_sequences: params.stop.clone(),
        frequency_penalty: params.frequency_penalty,
        presence_penalty: params.presence_penalty,
        seed: params.seed,
    };

    let empty = config.temperature.is_none()
        && config.top_p.is_none()
        && config.top_k.is_none()
        && config.max_output_tokens.is_none()
        && config.stop_sequences.is_none()
        && config.frequency_penalty.is_none()
        && config.presence_penalty.is_none()
        && config.seed.is_none();

    (!empty).then_some(config)
}

impl From<&ToolDefinition> for GeminiFunctionDeclaration {
    fn from(tool: &ToolDefinition) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: Some(tool.parameters.clone()),
        }
    }
}

fn tool_choice_to_gemini(choice: &ToolChoice) -> GeminiToolConfig {
    let (mode, allowed) = match choice {
        ToolChoice::Auto => ("AUTO", None),
        ToolChoice::None => ("NONE", None),
        ToolChoice::Required => ("ANY", None),
        ToolChoice::Tool { name } => ("ANY", Some(vec![name.clone()])),
    };

    GeminiToolConfig {
        function_calling_config: GeminiFunctionCallingConfig {
            mode: mode.to_owned(),
            allowed_function_names: allowed,
        },
    }
}

/// Map a buffered Gemini response into IR
pub fn response_to_ir(response: GeminiResponse, request: &RequestMetadata) -> ChatResponse {
    let mut metadata = ResponseMetadata::for_request(request);
    metadata.model = response.model_version;

    let candidate = response.candidates.into_iter().next().unwrap_or_default();

    let mut text = String::new();
    let mut tool_calls = Vec::new();
    for part in candidate.content.parts {
        if let Some(chunk) = part.answer_text() {
            text.push_str(chunk);
        }
        if let Some(call) = part.function_call {
            tool_calls.push(ContentPart::ToolUse {
                id: call_id(tool_calls.len(), &call.name),
                name: call.name,
                input: call.args,
            });
        }
    }

    let finish_reason = if tool_calls.is_empty() {
        candidate.finish_reason.as_deref().map_or(FinishReason::Stop, finish_reason)
    } else {
        FinishReason::ToolUse
    };
    let usage = response.usage_metadata.unwrap_or_default();

    ChatResponse {
        message: assistant_message(text, tool_calls),
        usage: Usage::new(usage.prompt_token_count, usage.candidates_token_count),
        finish_reason,
        metadata,
    }
}

/// Map a Gemini finish reason
pub fn finish_reason(reason: &str) -> FinishReason {
    match reason {
        "MAX_TOKENS" => FinishReason::Length,
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => FinishReason::ContentFilter,
        _ => FinishReason::Stop,
    }
}

// -- Inbound: Gemini wire format -> IR --

impl From<GeminiChatRequest> for ChatRequest {
    fn from(req: GeminiChatRequest) -> Self {
        let body = req.body;

        let system: Vec<String> = body
            .system_instruction
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(GeminiPart::answer_text)
                    .collect::<Vec<_>>()
                    .join("\n")
            })
            .into_iter()
            .collect();

        // Calls get synthetic ids; later responses find them by function name
        let mut calls: Vec<(String, String)> = Vec::new();
        let mut conversation = Vec::with_capacity(body.contents.len());

        for content in body.contents {
            let role = match content.role.as_deref() {
                Some("model") => Role::Assistant,
                _ => Role::User,
            };
            let parts = content
                .parts
                .into_iter()
                .filter_map(|part| gemini_part_to_ir(part, &mut calls))
                .collect();
            conversation.push(Message {
                role,
                content: simplify_parts(parts),
                name: None,
            });
        }

        let mut request = Self::new(String::new(), with_leading_system(&system, conversation));
        let config = body.generation_config.unwrap_or_default();
        request.parameters = ChatParameters {
            model: req.model,
            temperature: config.temperature,
            max_tokens: config.max_output_tokens,
            top_p: config.top_p,
            top_k: config.top_k,
            stop: config.stop_sequences,
            frequency_penalty: config.frequency_penalty,
            presence_penalty: config.presence_penalty,
            seed: config.seed,
        };
        request.stream = req.stream;
        request.tools = body.tools.map(|tools| {
            tools
                .into_iter()
                .flat_map(|tool| tool.function_declarations)
                .map(|decl| ToolDefinition {
                    name: decl.name,
                    description: decl.description,
                    parameters: decl
                        .parameters
                        .unwrap_or_else(|| serde_json::json!({"type": "object", "properties": {}})),
                })
                .collect()
        });
        request.tool_choice = body.tool_config.map(|config| tool_choice_to_ir(config.function_calling_config));
        request
    }
}

fn gemini_part_to_ir(part: GeminiPart, calls: &mut Vec<(String, String)>) -> Option<ContentPart> {
    if part.thought == Some(true) {
        return None;
    }
    if let Some(call) = part.function_call {
        let id = call_id(calls.len(), &call.name);
        calls.push((id.clone(), call.name.clone()));
        return Some(ContentPart::ToolUse {
            id,
            name: call.name,
            input: call.args,
        });
    }
    if let Some(response) = part.function_response {
        let tool_use_id = calls
            .iter()
            .rev()
            .find(|(_, name)| *name == response.name)
            .map_or_else(|| format!("call_{}", response.name), |(id, _)| id.clone());
        return Some(ContentPart::ToolResult {
            tool_use_id,
            content: tool_response_text(&response.response),
            is_error: false,
        });
    }
    if let Some(data) = part.inline_data {
        return Some(ContentPart::Image {
            source: ImageSource::Base64 { data: data.data },
            mime_type: Some(data.mime_type),
        });
    }
    if let Some(file) = part.file_data {
        return Some(ContentPart::Image {
            source: ImageSource::Url { url: file.file_uri },
            mime_type: file.mime_type,
        });
    }
    part.text.map(|text| ContentPart::Text { text })
}

fn tool_choice_to_ir(config: GeminiFunctionCallingConfig) -> ToolChoice {
    match config.mode.as_str() {
        "NONE" => ToolChoice::None,
        "ANY" => match config.allowed_function_names.as_deref() {
            Some([name]) => ToolChoice::Tool { name: name.clone() },
            _ => ToolChoice::Required,
        },
        _ => ToolChoice::Auto,
    }
}

/// Render an IR response as a Gemini response
pub fn response_from_ir(response: &ChatResponse, id: String) -> GeminiResponse {
    let text = response.text();
    let tool_calls = response.tool_calls();

    let mut parts = Vec::with_capacity(tool_calls.len() + 1);
    if !text.is_empty() || tool_calls.is_empty() {
        parts.push(GeminiPart::text(text));
    }
    parts.extend(tool_calls.into_iter().map(|(_, name, input)| GeminiPart {
        function_call: Some(GeminiFunctionCall {
            name: name.to_owned(),
            args: input.clone(),
        }),
        ..GeminiPart::default()
    }));

    GeminiResponse {
        candidates: vec![GeminiCandidate {
            content: GeminiContent {
                role: Some("model".to_owned()),
                parts,
            },
            finish_reason: Some(finish_reason_str(response.finish_reason).to_owned()),
            index: Some(0),
        }],
        usage_metadata: Some(usage_metadata(response.usage)),
        model_version: response.metadata.model.clone(),
        response_id: Some(id),
    }
}

pub const fn usage_metadata(usage: Usage) -> GeminiUsageMetadata {
    GeminiUsageMetadata {
        prompt_token_count: usage.prompt_tokens,
        candidates_token_count: usage.completion_tokens,
        total_token_count: usage.total_tokens,
    }
}

/// Gemini spelling of a finish reason; tool calls finish with `STOP`
pub const fn finish_reason_str(reason: FinishReason) -> &'static str {
    match reason {
        FinishReason::Stop | FinishReason::ToolUse => "STOP",
        FinishReason::Length => "MAX_TOKENS",
        FinishReason::ContentFilter => "SAFETY",
    }
}
