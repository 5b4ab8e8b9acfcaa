//! Opens several dashboard WebSocket connections against a relay backend,
//! keeps them open for a while and reports how many alert frames each one
//! received.

use clap::Parser;
use futures_util::StreamExt;
use lib_common::Alert;
use std::time::Duration;
use tokio_tungstenite::{connect_async, tungstenite::protocol::Message};

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// WebSocket endpoint of the relay backend
    #[clap(short, long, default_value = "ws://localhost:8000/ws")]
    url: String,

    /// Number of concurrent clients
    #[clap(short, long, default_value_t = 5)]
    clients: usize,

    /// Seconds each client stays connected
    #[clap(short, long, default_value_t = 10)]
    seconds: u64,
}

#[derive(Debug, Default)]
struct ClientReport {
    alerts: usize,
    undecodable: usize,
    closed_early: bool,
}

async fn run_client(n: usize, url: String, hold: Duration) -> anyhow::Result<ClientReport> {
    let (ws_stream, _) = connect_async(url.as_str()).await?;
    println!("🟢 Client {n} connected");
    let (_write, mut read) = ws_stream.split();
    let mut report = ClientReport::default();

    let deadline = tokio::time::sleep(hold);
    tokio::pin!(deadline);
    loop {
        tokio::select! {
            _ = &mut deadline => break,
            msg = read.next() => match msg {
                Some(Ok(Message::Text(text))) => match serde_json::from_str::<Alert>(&text) {
                    Ok(alert) => {
                        report.alerts += 1;
                        println!("📥 Client {n} received alert on {} at {}", alert.topic, alert.timestamp);
                    }
                    Err(_) => report.undecodable += 1,
                },
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => {
                    report.closed_early = true;
                    break;
                }
                Some(Ok(_)) => {}
            },
        }
    }
    Ok(report)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let hold = Duration::from_secs(args.seconds);
    println!("Connecting {} clients to {} for {}s...", args.clients, args.url, args.seconds);

    let handles: Vec<_> = (1..=args.clients)
        .map(|n| tokio::spawn(run_client(n, args.url.clone(), hold)))
        .collect();

    let mut total = 0;
    for (i, handle) in handles.into_iter().enumerate() {
        match handle.await? {
            Ok(report) => {
                total += report.alerts;
                println!(
                    "Client {}: {} alerts, {} undecodable frames{}",
                    i + 1,
                    report.alerts,
                    report.undecodable,
                    if report.closed_early { ", closed early" } else { "" }
                );
            }
            Err(e) => println!("🔴 Client {} failed: {e}", i + 1),
        }
    }
    println!("Total alerts received: {total}");
    Ok(())
}
