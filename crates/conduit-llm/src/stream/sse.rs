/// Classified SSE line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SseLine {
    /// `data:` payload with the event type in effect
    Data { event: Option<String>, data: String },
    /// Line that is not an SSE field; some providers send bare JSON
    Bare(String),
    /// Blank line, comment, `event:`, `id:` or `retry:`
    Skip,
}

/// Tracks the sticky `event:` type between lines
#[derive(Debug, Default)]
pub struct SseDecoder {
    event: Option<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) -> SseLine {
        if line.trim().is_empty() {
            self.event = None;
            return SseLine::Skip;
        }
        if line.starts_with(':') {
            return SseLine::Skip;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => {
                self.event = Some(value.trim().to_owned());
                SseLine::Skip
            }
            "data" => SseLine::Data {
                event: self.event.clone(),
                data: value.to_owned(),
            },
            "id" | "retry" => SseLine::Skip,
            _ => SseLine::Bare(line.to_owned()),
        }
    }
}
