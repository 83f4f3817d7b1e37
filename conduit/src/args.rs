use std::path::PathBuf;

use clap::{Parser, ValueEnum};

/// Conduit LLM bridge
#[derive(Debug, Parser)]
#[command(name = "conduit", about = "Send one chat request through a configured backend or router")]
pub struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "conduit.toml", env = "CONDUIT_CONFIG")]
    pub config: PathBuf,

    /// Format of the request on input and the response on output
    #[arg(short, long, value_enum, default_value_t = FrontendKind::Openai)]
    pub frontend: FrontendKind,

    /// Dispatch to this backend instead of the router
    #[arg(short, long)]
    pub backend: Option<String>,

    /// Print native stream events as they arrive
    #[arg(short, long)]
    pub stream: bool,

    /// Request body; reads stdin when absent or `-`
    #[arg(short, long)]
    pub input: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum FrontendKind {
    Openai,
    Anthropic,
    Gemini,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let args = Args::parse_from(["conduit"]);
        assert_eq!(args.frontend, FrontendKind::Openai);
        assert!(!args.stream);
        assert!(args.input.is_none());
    }

    #[test]
    fn overrides() {
        let args = Args::parse_from(["conduit", "-f", "anthropic", "--backend", "local", "--stream", "-i", "req.json"]);
        assert_eq!(args.frontend, FrontendKind::Anthropic);
        assert_eq!(args.backend.as_deref(), Some("local"));
        assert!(args.stream);
        assert_eq!(args.input, Some(PathBuf::from("req.json")));
    }
}
