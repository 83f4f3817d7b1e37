//! Bidirectional conversion between IR types and wire formats
//!
//! Each submodule handles one provider's protocol. Outbound conversions
//! (IR to wire request, wire response to IR) serve the backends; inbound ones
//! (wire request to IR, IR to wire response) serve the frontends.

pub mod anthropic;
pub mod gemini;
pub mod ollama;
pub mod openai;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use conduit_ir::{ContentPart, ImageSource};

/// MIME type assumed when an image does not say
pub const DEFAULT_IMAGE_MIME: &str = "image/jpeg";

/// Base64 image payload with its MIME type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InlineImage {
    pub mime_type: String,
    pub data: String,
}

impl InlineImage {
    /// Render as a `data:` URI
    pub fn to_data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, self.data)
    }
}

/// Resolve an image to base64, or `None` for a remote URL
///
/// Base64 text may carry a `data:` URI prefix, whose MIME type then wins over
/// the declared one. Raw bytes are encoded here.
pub fn inline_image(source: &ImageSource, mime_type: Option<&str>) -> Option<InlineImage> {
    let declared = || mime_type.unwrap_or(DEFAULT_IMAGE_MIME).to_owned();

    match source {
        ImageSource::Url { url } => parse_data_uri(url),
        ImageSource::Base64 { data } => parse_data_uri(data).or_else(|| {
            Some(InlineImage {
                mime_type: declared(),
                data: data.clone(),
            })
        }),
        ImageSource::Bytes { data } => Some(InlineImage {
            mime_type: declared(),
            data: STANDARD.encode(data),
        }),
    }
}

/// Image as a URL: remote URLs pass through, everything else becomes a data URI
pub fn image_url(source: &ImageSource, mime_type: Option<&str>) -> String {
    match source {
        ImageSource::Url { url } => url.clone(),
        _ => inline_image(source, mime_type).map_or_else(String::new, |image| image.to_data_uri()),
    }
}

/// Split `data:<mime>;base64,<payload>`
pub fn parse_data_uri(uri: &str) -> Option<InlineImage> {
    let rest = uri.strip_prefix("data:")?;
    let (header, data) = rest.split_once(',')?;
    let mime_type = header.strip_suffix(";base64")?;

    Some(InlineImage {
        mime_type: if mime_type.is_empty() {
            DEFAULT_IMAGE_MIME.to_owned()
        } else {
            mime_type.to_owned()
        },
        data: data.to_owned(),
    })
}

/// IR image part from a URL that may be a data URI
pub fn image_part_from_url(url: String) -> ContentPart {
    match parse_data_uri(&url) {
        Some(image) => ContentPart::Image {
            source: ImageSource::Base64 { data: image.data },
            mime_type: Some(image.mime_type),
        },
        None => ContentPart::Image {
            source: ImageSource::Url { url },
            mime_type: None,
        },
    }
}

/// Serialize tool input for protocols that carry arguments as a string
pub fn arguments_string(input: &serde_json::Value) -> String {
    match input {
        serde_json::Value::String(raw) => raw.clone(),
        other => other.to_string(),
    }
}

/// Synthetic id for a tool call from a protocol that does not assign one
pub fn call_id(index: usize, name: &str) -> String {
    format!("call_{index}_{name}")
}

/// Prepend system texts as one leading system message
pub(crate) fn with_leading_system(system: &[String], conversation: Vec<conduit_ir::Message>) -> Vec<conduit_ir::Message> {
    if system.is_empty() {
        return conversation;
    }

    let mut messages = Vec::with_capacity(conversation.len() + 1);
    messages.push(conduit_ir::Message::system(system.join("\n")));
    messages.extend(conversation);
    messages
}

/// Collapse a single text part back to plain text
pub(crate) fn simplify_parts(parts: Vec<ContentPart>) -> conduit_ir::Content {
    match parts.as_slice() {
        [] => conduit_ir::Content::Text(String::new()),
        [ContentPart::Text { text }] => conduit_ir::Content::Text(text.clone()),
        _ => conduit_ir::Content::Parts(parts),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_uri_prefix_wins() {
        let source = ImageSource::Base64 {
            data: "data:image/png;base64,AAAA".into(),
        };
        let image = inline_image(&source, Some("image/gif")).unwrap();
        assert_eq!(image.mime_type, "image/png");
        assert_eq!(image.data, "AAAA");
    }

    #[test]
    fn bare_base64_defaults_to_jpeg() {
        let source = ImageSource::Base64 { data: "AAAA".into() };
        let image = inline_image(&source, None).unwrap();
        assert_eq!(image.mime_type, DEFAULT_IMAGE_MIME);
        assert_eq!(image.data, "AAAA");
    }

    #[test]
    fn bytes_are_encoded() {
        let source = ImageSource::Bytes { data: b"hi".to_vec() };
        let image = inline_image(&source, Some("image/png")).unwrap();
        assert_eq!(image.data, "aGk=");
        assert_eq!(image.to_data_uri(), "data:image/png;base64,aGk=");
    }

    #[test]
    fn remote_urls_stay_remote() {
        let source = ImageSource::Url {
            url: "https://example.com/cat.png".into(),
        };
        assert!(inline_image(&source, None).is_none());
        assert_eq!(image_url(&source, None), "https://example.com/cat.png");
    }

    #[test]
    fn data_url_becomes_base64_part() {
        let part = image_part_from_url("data:image/webp;base64,Zm9v".into());
        assert_eq!(
            part,
            ContentPart::Image {
                source: ImageSource::Base64 { data: "Zm9v".into() },
                mime_type: Some("image/webp".into()),
            }
        );
    }
}
