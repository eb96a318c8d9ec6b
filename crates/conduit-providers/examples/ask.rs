//! Send one prompt from stdin to the small model.
//!
//! Reads `conduit.{jsonc,json,yml,yaml}` from the working directory or
//! `~/.config/conduit`, and the backend switches from the environment.
//!
//! ```sh
//! echo "Name this session" | RUST_LOG=debug cargo run -p conduit-providers --example ask
//! ```

use std::io::Read;

use anyhow::Context;
use conduit_providers::{CancellationToken, QueryOrchestrator, QueryOutcome, SmallQuery};
use conduit_telemetry::{init_subscriber, TelemetryConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_subscriber(&TelemetryConfig::default())?;

    let mut prompt = String::new();
    std::io::stdin()
        .read_to_string(&mut prompt)
        .context("Failed to read prompt from stdin")?;

    let orchestrator = QueryOrchestrator::load(None)?.build()?;

    let cancel = CancellationToken::new();
    let on_interrupt = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            on_interrupt.cancel();
        }
    });

    match orchestrator
        .query_small(SmallQuery::new(prompt.trim()), &cancel)
        .await
    {
        QueryOutcome::Response(response) if response.is_api_error => {
            anyhow::bail!(response.text())
        }
        QueryOutcome::Response(response) => println!("{}", response.text()),
        QueryOutcome::Aborted => eprintln!("aborted"),
    }
    Ok(())
}
