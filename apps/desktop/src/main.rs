use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::warn;
use tracing_subscriber::EnvFilter;

use board_core::{BoardReconciler, BoardSnapshot};
use remote::HttpRemoteStore;
use shared::protocol::ConnectionStatus;

/// Terminal viewer for the board: loads it from the remote store and reprints
/// the lanes whenever a local mutation or a remote change lands.
#[derive(Parser, Debug)]
struct Args {
    /// Base URL of the remote store, e.g. http://localhost:8000
    #[arg(long)]
    store_url: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();

    let store = Arc::new(HttpRemoteStore::new(&args.store_url)?);
    let board = BoardReconciler::new(store.clone());
    board.spawn_ingest();

    // Realtime is best-effort: without it the board still loads and mutates,
    // it just stops seeing other clients' changes.
    if let Err(err) = store.connect_realtime().await {
        warn!(%err, "continuing without live updates");
    }

    let mut snapshots = board.subscribe();
    board.load().await;
    print_snapshot(&board.snapshot().await);

    while let Ok(snapshot) = snapshots.recv().await {
        print_snapshot(&snapshot);
    }

    Ok(())
}

fn print_snapshot(snapshot: &BoardSnapshot) {
    let status = match snapshot.status {
        ConnectionStatus::Connecting => "connecting",
        ConnectionStatus::Connected => "connected",
        ConnectionStatus::Disconnected => "disconnected",
    };
    println!("== board ({status}) ==");
    if let Some(banner) = &snapshot.banner {
        println!("!! {banner}");
    }
    for lane in &snapshot.lanes {
        println!("[{}] {} cards", lane.title, lane.cards.len());
        for card in &lane.cards {
            println!("  - {} (#{})", card.title, card.id.0);
        }
    }
    println!();
}
