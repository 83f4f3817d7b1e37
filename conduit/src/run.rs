use std::io::{Read, Write};
use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use conduit_config::Config;
use conduit_llm::{Backend, Bridge, Frontend, ReqwestTransport, Router, Transport, build_backend};
use futures_util::StreamExt;
use tokio_util::sync::CancellationToken;

/// Request body from a file, or stdin for `None` and `-`
pub fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    match path {
        Some(path) if path != Path::new("-") => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read request from {}", path.display())),
        _ => {
            let mut body = String::new();
            std::io::stdin()
                .read_to_string(&mut body)
                .context("failed to read request from stdin")?;
            Ok(body)
        }
    }
}

/// The named backend, else the router, else the only backend
pub fn select_backend(config: &Config, name: Option<&str>) -> anyhow::Result<Arc<dyn Backend>> {
    let transport: Arc<dyn Transport> = Arc::new(ReqwestTransport::new());

    let backends = config
        .backends
        .iter()
        .map(|(name, backend)| build_backend(name, backend, Arc::clone(&transport)))
        .collect::<Result<Vec<_>, _>>()?;

    if let Some(name) = name {
        return backends
            .into_iter()
            .find(|backend| backend.name() == name)
            .with_context(|| format!("no backend named '{name}' in configuration"));
    }

    if let Some(router) = &config.router {
        let router = Router::from_config(router, &backends)?;
        tracing::debug!(backends = router.backends().len(), strategy = router.strategy().name(), "using router");
        return Ok(Arc::new(router));
    }

    if backends.len() > 1 {
        anyhow::bail!("several backends configured without a router; pick one with --backend");
    }

    backends
        .into_iter()
        .next()
        .context("at least one backend must be configured")
}

/// Send one native request and print the native response or stream
pub async fn execute<F: Frontend>(
    bridge: &Bridge<F>,
    body: &str,
    stream: bool,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let request: F::Request = serde_json::from_str(body).context("request is not valid JSON for this frontend")?;

    let result = if stream {
        print_stream(bridge, request, cancel).await
    } else {
        print_response(bridge, request, cancel).await
    };

    bridge.destroy().await;
    result
}

async fn print_response<F: Frontend>(
    bridge: &Bridge<F>,
    request: F::Request,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let response = tokio::select! {
        () = cancel.cancelled() => anyhow::bail!("request cancelled"),
        response = bridge.chat(request) => response?,
    };

    let mut stdout = std::io::stdout().lock();
    serde_json::to_writer_pretty(&mut stdout, &response)?;
    writeln!(stdout)?;
    Ok(())
}

async fn print_stream<F: Frontend>(
    bridge: &Bridge<F>,
    request: F::Request,
    cancel: &CancellationToken,
) -> anyhow::Result<()> {
    let mut frames = bridge.chat_stream_sse(request, cancel.clone()).await?;

    loop {
        let frame = tokio::select! {
            () = cancel.cancelled() => {
                tracing::info!("stream cancelled");
                return Ok(());
            }
            frame = frames.next() => frame,
        };

        let Some(frame) = frame else {
            return Ok(());
        };

        let mut stdout = std::io::stdout().lock();
        stdout.write_all(frame?.as_bytes())?;
        stdout.flush()?;
    }
}
