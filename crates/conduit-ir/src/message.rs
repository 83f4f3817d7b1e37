use serde::{Deserialize, Serialize};

/// Role of a message participant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instruction
    System,
    /// User turn
    User,
    /// Model turn
    Assistant,
    /// Tool results fed back to the model
    Tool,
}

/// One message of a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message
    pub role: Role,
    /// Message body
    pub content: Content,
    /// Optional participant name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl Message {
    /// Build a message with plain text content
    pub fn text(role: Role, text: impl Into<String>) -> Self {
        Self {
            role,
            content: Content::Text(text.into()),
            name: None,
        }
    }

    /// Build a message from typed parts, preserving their order
    pub fn parts(role: Role, parts: Vec<ContentPart>) -> Self {
        Self {
            role,
            content: Content::Parts(parts),
            name: None,
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self::text(Role::System, text)
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self::text(Role::User, text)
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self::text(Role::Assistant, text)
    }
}

/// Message body, either plain text or ordered typed parts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Content {
    /// Plain text
    Text(String),
    /// Multimodal or tool-bearing parts in insertion order
    Parts(Vec<ContentPart>),
}

impl Content {
    /// Concatenated text of all text parts
    pub fn as_text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter_map(|part| match part {
                    ContentPart::Text { text } => Some(text.as_str()),
                    _ => None,
                })
                .collect(),
        }
    }

    /// View the content as parts; plain text becomes a single text part
    pub fn to_parts(&self) -> Vec<ContentPart> {
        match self {
            Self::Text(text) if text.is_empty() => Vec::new(),
            Self::Text(text) => vec![ContentPart::Text { text: text.clone() }],
            Self::Parts(parts) => parts.clone(),
        }
    }

    /// Tool invocations contained in this content
    pub fn tool_uses(&self) -> impl Iterator<Item = (&str, &str, &serde_json::Value)> {
        let parts: &[ContentPart] = match self {
            Self::Text(_) => &[],
            Self::Parts(parts) => parts,
        };

        parts.iter().filter_map(|part| match part {
            ContentPart::ToolUse { id, name, input } => Some((id.as_str(), name.as_str(), input)),
            _ => None,
        })
    }

    pub fn is_empty(&self) -> bool {
        match self {
            Self::Text(text) => text.is_empty(),
            Self::Parts(parts) => parts.is_empty(),
        }
    }
}

impl From<String> for Content {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for Content {
    fn from(text: &str) -> Self {
        Self::Text(text.to_owned())
    }
}

/// Typed part of a multipart message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentPart {
    /// Text block
    Text { text: String },
    /// Image input
    Image {
        source: ImageSource,
        /// MIME type when known; backends default to `image/jpeg`
        #[serde(default, skip_serializing_if = "Option::is_none")]
        mime_type: Option<String>,
    },
    /// Tool invocation requested by the model
    ToolUse {
        id: String,
        name: String,
        input: serde_json::Value,
    },
    /// Output of a tool invocation
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// Where image bytes come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ImageSource {
    /// Remote URL
    Url { url: String },
    /// Base64 text, with or without a `data:` URI prefix
    Base64 { data: String },
    /// Raw bytes, base64-encoded when serialized for a provider
    Bytes { data: Vec<u8> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parts_keep_insertion_order() {
        let content = Content::Parts(vec![
            ContentPart::Text { text: "a".into() },
            ContentPart::Image {
                source: ImageSource::Url {
                    url: "https://x/y.png".into(),
                },
                mime_type: None,
            },
            ContentPart::Text { text: "b".into() },
        ]);

        assert_eq!(content.as_text(), "ab");
        assert!(matches!(content.to_parts()[1], ContentPart::Image { .. }));
    }

    #[test]
    fn empty_text_has_no_parts() {
        assert!(Content::Text(String::new()).to_parts().is_empty());
    }

    #[test]
    fn tool_uses_are_listed() {
        let content = Content::Parts(vec![
            ContentPart::Text { text: "calling".into() },
            ContentPart::ToolUse {
                id: "call_1".into(),
                name: "lookup".into(),
                input: serde_json::json!({"q": "rust"}),
            },
        ]);

        let uses: Vec<_> = content.tool_uses().collect();
        assert_eq!(uses.len(), 1);
        assert_eq!(uses[0].1, "lookup");
    }

    #[test]
    fn part_serializes_with_type_tag() {
        let part = ContentPart::ToolResult {
            tool_use_id: "call_1".into(),
            content: "42".into(),
            is_error: false,
        };
        let json = serde_json::to_value(&part).unwrap();

        assert_eq!(json["type"], "tool_result");
        assert!(json.get("is_error").is_none());
    }
}
