#![allow(clippy::must_use_candidate, clippy::missing_errors_doc)]

mod args;
mod run;

use args::{Args, FrontendKind};
use clap::Parser;
use conduit_config::Config;
use conduit_llm::{AnthropicFrontend, Bridge, GeminiFrontend, OpenAiFrontend};
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = Config::load(&args.config)?;

    let _telemetry_guard = conduit_telemetry::init(Some(&config.telemetry), "warn")?;

    tracing::info!(
        config_path = %args.config.display(),
        frontend = ?args.frontend,
        stream = args.stream,
        "starting conduit"
    );

    let body = run::read_input(args.input.as_deref())?;
    let backend = run::select_backend(&config, args.backend.as_deref())?;
    let chain = conduit_llm::middleware::from_config(&config.middleware)?;

    // Ctrl-C cancels an in-flight request
    let cancel = CancellationToken::new();
    let cancel_on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling");
            cancel_on_signal.cancel();
        }
    });

    match args.frontend {
        FrontendKind::Openai => {
            let bridge = Bridge::new(OpenAiFrontend::new(), backend).with_chain(chain);
            run::execute(&bridge, &body, args.stream, &cancel).await
        }
        FrontendKind::Anthropic => {
            let bridge = Bridge::new(AnthropicFrontend::new(), backend).with_chain(chain);
            run::execute(&bridge, &body, args.stream, &cancel).await
        }
        FrontendKind::Gemini => {
            let bridge = Bridge::new(GeminiFrontend::new(), backend).with_chain(chain);
            run::execute(&bridge, &body, args.stream, &cancel).await
        }
    }
}
