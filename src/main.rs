use anyhow::Context;
use tracing::{info, warn};

use hashmato_terminal::{logging, terminal, Terminal, TerminalConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = TerminalConfig::from_env().context("load configuration")?;
    let _log_guard = logging::init_logging(&config).context("initialise logging")?;

    let about = terminal::about();
    info!(
        version = about.version,
        build = about.build_timestamp,
        git = about.git_sha,
        "Starting Hashmato terminal"
    );

    let terminal = Terminal::start(config).context("start terminal")?;

    let snapshot = terminal.submitter().refresh_menu().await?;
    info!(items = snapshot.items.len(), fresh = snapshot.fresh, "Menu loaded");

    let api = terminal.api().clone();
    let subscription = terminal.on_update(move |msg| {
        let kind = msg.get("type").and_then(|t| t.as_str()).unwrap_or("unknown");
        info!(kind, "Backend update received");
        let api = api.clone();
        tokio::spawn(async move {
            match api.queue_board().await {
                Ok(board) => info!(
                    waiting = board.waiting.len(),
                    ready = board.ready.len(),
                    "Queue board refreshed"
                ),
                Err(e) => warn!("Queue board refresh failed: {e}"),
            }
        });
    });

    tokio::signal::ctrl_c().await.context("wait for ctrl-c")?;

    subscription.unsubscribe();
    if let Ok(status) = terminal.sync_status() {
        info!(
            pending = status.pending_orders,
            synced = status.synced_orders,
            "Final sync state"
        );
    }
    terminal.shutdown().await;
    Ok(())
}
