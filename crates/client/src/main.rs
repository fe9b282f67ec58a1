//! ffb-watch - follow the matchmaker's car table from a terminal
//!
//! Endpoints come from `FFB_MATCHMAKER_URL` / `FFB_GATEWAY_URL`.

use anyhow::Context;
use ffb_client::{view, EndpointConfig, SyncClient, TableSnapshot};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ffb_client=debug")),
        )
        .init();

    let client = SyncClient::start(EndpointConfig::from_env());
    let mut table = client.subscribe_table();
    let mut status = client.subscribe_status();

    println!("{}", client.status());

    let result = loop {
        tokio::select! {
            changed = table.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                let snapshot = table.borrow_and_update().clone();
                print_table(&snapshot);
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break Ok(());
                }
                println!("{}", *status.borrow_and_update());
            }
            signal = tokio::signal::ctrl_c() => {
                break signal.context("failed to listen for ctrl-c");
            }
        }
    };

    client.shutdown();
    result
}

fn print_table(table: &TableSnapshot) {
    println!("{:<12} {:<9} {:<16} {:>5}  {}", "ID", "STATE", "ASSIGNED", "TTL", "UPDATED");
    for row in view::rows(table) {
        println!(
            "{:<12} {:<9} {:<16} {:>5}  {}",
            row.id, row.state, row.assigned, row.ttl, row.updated
        );
    }
}
